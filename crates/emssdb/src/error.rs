//! Error and status types for structure operations.

use emssdb_engine::EngineError;
use thiserror::Error;

/// Failures surfaced by structure operations.
///
/// Validation errors are raised before anything is staged, so a failed call
/// leaves the store untouched.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A required key, name or field has zero length
    #[error("empty key")]
    EmptyKey,

    /// A name or field exceeds the 255-byte composite encoding limit
    #[error("key too long: {0} bytes (max 255)")]
    LongKey(usize),

    /// The logical entity does not exist
    #[error("not found")]
    NotFound,

    /// Stored bytes are not an 8-byte big-endian integer
    #[error("value is not an integer ({0} bytes, expected 8)")]
    NotAnInteger(usize),

    /// Queue sequence space is exhausted
    #[error("queue is full")]
    OutOfRange,

    /// The storage engine failed
    #[error("storage operation failed: {0}")]
    OperationFailed(#[from] EngineError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// What a successful mutation did to the structure's size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Applied without adding or removing an entry
    Unchanged,
    /// Entry count moved by the given delta
    Resized(i64),
    /// Nothing to act on; the entry was absent
    Missing,
}
