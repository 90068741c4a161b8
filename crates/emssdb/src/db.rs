//! Store handle.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use emssdb_engine::{CheckpointResult, Direction, Engine, EngineStats};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::cursor::{Cursor, Decoder};
use crate::error::Result;
use crate::expire::{sweep_expired, SweepOutcome, SweepSnapshot, SweepStats};
use crate::options::{clamp_interval, Options};
use crate::sweeper::{start_sweeper, SweeperHandle};
use crate::writer::BatchWriter;

/// An open store: the engine, its single batch writer and the expiry sweeper.
///
/// Structure operations live in the `kv`, `hash`, `zset`, `queue` and
/// `expire` modules as further `impl Db` blocks.
pub struct Db {
    pub(crate) engine: Arc<Engine>,
    pub(crate) writer: Arc<BatchWriter>,
    expire_interval: Arc<AtomicU64>,
    stats: Arc<SweepStats>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl Db {
    /// Open or create a store and start its expiry sweeper.
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        let options = options.normalized();
        let engine = Arc::new(Engine::open(path.as_ref(), options.engine)?);
        let writer = Arc::new(BatchWriter::new(Arc::clone(&engine)));
        let expire_interval = Arc::new(AtomicU64::new(options.expire_interval.as_millis() as u64));
        let stats = Arc::new(SweepStats::default());

        let sweeper = start_sweeper(
            Arc::clone(&engine),
            Arc::clone(&writer),
            Arc::clone(&expire_interval),
            Arc::clone(&stats),
        )?;

        info!(
            path = %path.as_ref().display(),
            entries = engine.len(),
            expire_interval_ms = options.expire_interval.as_millis() as u64,
            "store opened"
        );

        Ok(Self {
            engine,
            writer,
            expire_interval,
            stats,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// Stop the sweeper, then close the engine.
    pub fn close(self) -> Result<()> {
        self.stop_sweeper();
        self.engine.close()?;
        info!(path = %self.engine.path().display(), "store closed");
        Ok(())
    }

    fn stop_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.shutdown();
            debug!("expiry sweeper stopped");
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn path(&self) -> &Path {
        self.engine.path()
    }

    /// The store's batch writer, for staging raw multi-key batches.
    pub fn writer(&self) -> &BatchWriter {
        &self.writer
    }

    pub(crate) fn cursor<D: Decoder>(&self, start: &[u8], end: &[u8], direction: Direction) -> Cursor<D> {
        Cursor::new(self.engine.range(start, Some(end), direction))
    }

    /// Untagged read of a physical key.
    pub fn raw_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.engine.get(key)?)
    }

    /// Untagged write of a physical key; bypasses every structure invariant.
    pub fn raw_set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut txn = self.writer.begin();
        txn.put(key, value);
        txn.commit()
    }

    pub fn raw_del(&self, key: &[u8]) -> Result<()> {
        let mut txn = self.writer.begin();
        txn.delete(key);
        txn.commit()
    }

    pub fn info(&self) -> Result<EngineStats> {
        Ok(self.engine.stats()?)
    }

    /// Rewrite the engine's log as a compact image of the live data.
    pub fn compact(&self) -> Result<CheckpointResult> {
        Ok(self.engine.checkpoint()?)
    }

    pub fn expire_interval(&self) -> Duration {
        Duration::from_millis(self.expire_interval.load(Ordering::Acquire))
    }

    /// Change the sweep interval (clamped to at least one second).
    /// The running sweeper uses it from its next wait.
    pub fn set_expire_interval(&self, interval: Duration) {
        let interval = clamp_interval(interval);
        self.expire_interval.store(interval.as_millis() as u64, Ordering::Release);
    }

    /// Run one expiry pass now, treating `now` (Unix seconds) as the current time.
    pub fn sweep(&self, now: u64) -> SweepOutcome {
        let outcome = sweep_expired(&self.engine, &self.writer, now);
        self.stats.record(&outcome);
        outcome
    }

    pub fn sweep_stats(&self) -> SweepSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("path", &self.engine.path())
            .field("entries", &self.engine.len())
            .field("expire_interval", &self.expire_interval())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emssdb_engine::Config;
    use tempfile::TempDir;

    fn test_db() -> (Db, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Db::open(dir.path(), Options::new(Config::relaxed())).unwrap();
        (db, dir)
    }

    #[test]
    fn test_open_and_debug() {
        let (db, _dir) = test_db();
        let debug_str = format!("{:?}", db);
        assert!(debug_str.contains("Db"));
        assert_eq!(db.expire_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_raw_access() {
        let (db, _dir) = test_db();
        db.raw_set(b"\x01raw", b"bytes").unwrap();
        assert_eq!(db.raw_get(b"\x01raw").unwrap(), Some(b"bytes".to_vec()));
        db.raw_del(b"\x01raw").unwrap();
        assert_eq!(db.raw_get(b"\x01raw").unwrap(), None);
    }

    #[test]
    fn test_expire_interval_clamped() {
        let (db, _dir) = test_db();
        db.set_expire_interval(Duration::from_millis(5));
        assert_eq!(db.expire_interval(), Duration::from_secs(1));
        db.set_expire_interval(Duration::from_secs(7));
        assert_eq!(db.expire_interval(), Duration::from_secs(7));
    }

    #[test]
    fn test_info_and_compact() {
        let (db, _dir) = test_db();
        for i in 0..20u8 {
            db.raw_set(&[i], b"v").unwrap();
        }
        for i in 0..15u8 {
            db.raw_del(&[i]).unwrap();
        }
        assert_eq!(db.info().unwrap().entries, 5);
        let result = db.compact().unwrap();
        assert_eq!(result.live_entries, 5);
        assert_eq!(db.info().unwrap().wal_files, 1);
    }

    #[test]
    fn test_close_then_reopen() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(dir.path(), Options::default()).unwrap();
        db.raw_set(b"k", b"v").unwrap();
        db.close().unwrap();

        let db = Db::open(dir.path(), Options::default()).unwrap();
        assert_eq!(db.raw_get(b"k").unwrap(), Some(b"v".to_vec()));
    }
}
