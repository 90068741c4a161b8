//! Error types for engine operations
//!
//! All engine failures are represented by [`EngineError`]. Variants carry
//! enough context (file, offset, sizes) to diagnose WAL damage after a crash.

use std::path::PathBuf;

use thiserror::Error;

/// Engine error types with detailed context
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// I/O operation failed
    #[error("I/O error in {}: {message} ({kind})", display_path(.path))]
    Io {
        /// The file path where the error occurred
        path: Option<PathBuf>,
        /// The underlying I/O error kind
        kind: std::io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// WAL record is structurally invalid
    #[error("WAL corrupted in {} at offset {offset}: {reason}", .path.display())]
    WalCorrupted {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    /// Checksum verification failed
    #[error(
        "Checksum mismatch in {} at offset {offset}: expected 0x{expected:08x}, got 0x{actual:08x}",
        .path.display()
    )]
    ChecksumMismatch {
        path: PathBuf,
        expected: u32,
        actual: u32,
        offset: u64,
    },

    /// Torn write detected (record started but never completed)
    #[error(
        "Torn write in {} at offset {offset}: expected {expected_size} bytes, only {available_bytes} available",
        .path.display()
    )]
    TornWrite {
        path: PathBuf,
        expected_size: u32,
        available_bytes: u64,
        offset: u64,
    },

    /// Key, value or whole record exceeds its size limit
    #[error("Entry {component} too large: {entry_size} bytes exceeds limit of {max_size} bytes")]
    OversizedEntry {
        entry_size: u64,
        max_size: u64,
        /// "key", "value" or "record"
        component: &'static str,
    },

    /// Magic bytes not found at expected location
    #[error(
        "Magic bytes not found in {} at offset {offset}: found {:02x}{:02x}{:02x}{:02x}",
        .path.display(), .found_bytes[0], .found_bytes[1], .found_bytes[2], .found_bytes[3]
    )]
    NoMagicFound {
        path: PathBuf,
        offset: u64,
        found_bytes: [u8; 4],
    },

    /// Configuration rejected by `Config::validate`
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The engine has been closed
    #[error("Engine is closed")]
    Closed,
}

fn display_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => path.display().to_string(),
        None => "<unknown>".to_string(),
    }
}

/// Convert std::io::Error to EngineError::Io
impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl EngineError {
    /// Wrap an I/O error with the file it happened on.
    pub(crate) fn io_at(path: &std::path::Path, err: std::io::Error, what: &str) -> Self {
        EngineError::Io {
            path: Some(path.to_path_buf()),
            kind: err.kind(),
            message: format!("{}: {}", what, err),
        }
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
