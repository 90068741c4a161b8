//! emssdb-engine: ordered RAM-first key-value engine
//!
//! A byte-ordered key-value store where RAM is the working surface and a
//! write-ahead log provides crash safety.
//!
//! # Architecture
//!
//! - **Read path**: point lookups and range cursors served from an ordered map in RAM
//! - **Write path**: one WAL record per batch, then the batch applied to RAM atomically
//! - **Checkpoint**: rewrites the WAL as a single image of the live data
//!
//! The engine knows nothing about data structures. Multi-structure layers
//! (hashes, sorted sets, queues) live in separate crates and map onto the
//! flat keyspace with prefix bytes.

pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod iter;
pub mod platform_durability;
pub mod wal;

// Re-export key types for convenience
pub use batch::{BatchOp, WriteBatch};
pub use config::Config;
pub use engine::{Engine, EngineStats};
pub use error::{EngineError, EngineResult};
pub use format::Operation;
pub use iter::{Direction, RangeIter};
pub use wal::{CheckpointResult, WalReader, WalWriter};
