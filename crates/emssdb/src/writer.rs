//! Batch writer: one write transaction in flight per store.
//!
//! Every mutating structure operation runs as
//! `begin -> read current state -> stage ops -> commit`, all while holding
//! the writer lock, so its read-modify-write sequence cannot interleave with
//! another writer. The lock guard lives inside [`WriteTxn`]; it is released
//! on every exit path, including `?` returns that drop the transaction.

use std::sync::Arc;

use emssdb_engine::{Engine, WriteBatch};
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::codec::{decode_i64, encode_i64};
use crate::error::Result;

/// Serializes write transactions against one engine.
pub struct BatchWriter {
    lock: Mutex<()>,
    engine: Arc<Engine>,
}

impl BatchWriter {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { lock: Mutex::new(()), engine }
    }

    /// Start a transaction, blocking until the previous one has ended.
    pub fn begin(&self) -> WriteTxn<'_> {
        let guard = self.lock.lock();
        WriteTxn {
            _guard: guard,
            engine: &self.engine,
            batch: WriteBatch::new(),
            finished: false,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

impl std::fmt::Debug for BatchWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWriter")
            .field("locked", &self.lock.is_locked())
            .finish()
    }
}

/// A pending batch plus exclusive write access.
///
/// Reads through [`WriteTxn::get`] see committed state only, never the
/// operations staged so far. Dropping an uncommitted transaction discards it.
pub struct WriteTxn<'a> {
    _guard: MutexGuard<'a, ()>,
    engine: &'a Engine,
    batch: WriteBatch,
    finished: bool,
}

impl<'a> WriteTxn<'a> {
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.engine.get(key)?)
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.batch.put(key, value);
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.batch.delete(key);
    }

    /// Committed value of an i64 counter; absent reads as zero.
    pub fn counter(&self, key: &[u8]) -> Result<i64> {
        read_counter(self.engine, key)
    }

    /// Stage a counter write. Zero removes the key so empty structures leave no trace.
    pub fn set_counter(&mut self, key: &[u8], value: i64) {
        if value == 0 {
            self.batch.delete(key);
        } else {
            self.batch.put(key, &encode_i64(value));
        }
    }

    /// Read a counter, add `delta`, stage the result. Returns the new count.
    pub fn bump_counter(&mut self, key: &[u8], delta: i64) -> Result<i64> {
        let size = self.counter(key)?.wrapping_add(delta);
        self.set_counter(key, size);
        Ok(size)
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Apply every staged op atomically and release the lock.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.engine.write(&self.batch)?;
        Ok(())
    }

    /// Discard staged ops and release the lock.
    pub fn rollback(mut self) {
        self.finished = true;
        self.batch.clear();
    }
}

impl Drop for WriteTxn<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.batch.is_empty() {
            debug!(ops = self.batch.len(), "write transaction dropped without commit");
        }
    }
}

/// Committed value of an i64 counter; absent reads as zero.
pub fn read_counter(engine: &Engine, key: &[u8]) -> Result<i64> {
    match engine.get(key)? {
        Some(raw) => decode_i64(&raw),
        None => Ok(0),
    }
}
