//! emssdb: Redis-style data structures over an ordered key-value engine
//!
//! Flat keys, hashes, sorted sets, double-ended queues and expiring keys,
//! all stored in the single byte-ordered keyspace of an [`emssdb_engine::Engine`].
//!
//! # Architecture
//!
//! - Each structure owns a one-byte tag; its physical keys start with that
//!   byte (see [`codec`] for the layouts)
//! - A logical write touches several physical keys (entry, size counter,
//!   secondary index); they are staged in one [`writer::WriteTxn`] and
//!   committed as a single atomic batch
//! - One writer lock per store serializes all write transactions; reads go
//!   straight to the engine
//! - Scans return typed [`cursor::Cursor`]s decoding physical keys back into
//!   logical entries
//! - A background thread sweeps keys whose expiration has passed
//!
//! ```no_run
//! use emssdb::{Db, Options};
//!
//! # fn main() -> emssdb::Result<()> {
//! let db = Db::open("/tmp/emssdb-demo", Options::default())?;
//! db.hset(b"user:1", b"name", b"ada")?;
//! db.zset(b"scores", b"ada", 42)?;
//! db.qpush_back(b"jobs", b"send-mail")?;
//! assert_eq!(db.hsize(b"user:1")?, 1);
//! db.close()?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod cursor;
pub mod db;
pub mod error;
pub mod expire;
pub mod hash;
pub mod kv;
pub mod options;
pub mod queue;
pub mod sweeper;
pub mod writer;
pub mod zset;

pub use cursor::{Cursor, Decoder, ExpireEntry, HashEntry, KvEntry, QueueEntry, StampEntry, ZsetEntry};
pub use db::Db;
pub use error::{Change, Error, Result};
pub use expire::{SweepOutcome, SweepSnapshot};
pub use options::Options;
pub use writer::{BatchWriter, WriteTxn};

pub use emssdb_engine::{Config, Direction, EngineStats};
