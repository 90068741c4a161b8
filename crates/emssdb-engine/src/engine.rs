//! Core storage engine.
//!
//! An ordered map in RAM serves every read; the WAL makes writes durable.
//!
//! **Read path**: `BTreeMap` behind an `RwLock`, point lookups and range cursors
//! **Write path**: one WAL record per batch, then the whole batch applied to RAM
//! under a single write lock, so readers see all of a batch or none of it

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::batch::{BatchOp, WriteBatch};
use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::format::{Limits, RecordKind};
use crate::iter::{Direction, RangeIter};
use crate::wal::{wal_files, CheckpointResult, WalReader, WalWriter};

/// Point-in-time engine statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Live key-value pairs
    pub entries: usize,
    /// Bytes across all WAL files
    pub wal_bytes: u64,
    /// Number of WAL files
    pub wal_files: usize,
    /// Range cursors not yet dropped
    pub live_iterators: usize,
}

/// Ordered key-value engine: RAM map + WAL.
///
/// All methods take `&self`. Readers share the map lock; writers serialize
/// on the WAL mutex and then take the map write lock briefly.
pub struct Engine {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    wal: Mutex<WalWriter>,
    closed: Arc<AtomicBool>,
    live_iterators: Arc<AtomicUsize>,
    path: PathBuf,
    config: Config,
}

impl Engine {
    /// Open or create an engine at the given path, replaying the WAL.
    pub fn open<P: AsRef<Path>>(path: P, config: Config) -> EngineResult<Self> {
        config.validate().map_err(EngineError::InvalidConfig)?;

        let path = path.as_ref().to_path_buf();
        let wal_dir = path.join("wal");
        std::fs::create_dir_all(&wal_dir)
            .map_err(|e| EngineError::io_at(&wal_dir, e, "Failed to create WAL directory"))?;

        let mut data = BTreeMap::new();
        let records = WalReader::new(&wal_dir).recover_records()?;
        let replayed = records.len();
        for record in records {
            if record.kind == RecordKind::Checkpoint {
                data.clear();
            }
            apply_ops(&mut data, record.ops);
        }

        if replayed > 0 {
            info!(
                records = replayed,
                entries = data.len(),
                wal = %wal_dir.display(),
                "recovered engine state from WAL"
            );
        }

        let limits = Limits {
            max_key_size: config.max_key_size,
            max_value_size: config.max_value_size,
        };
        let wal = WalWriter::new(&wal_dir, config.wal_rotation_size_bytes, limits)?;

        Ok(Self {
            data: Arc::new(RwLock::new(data)),
            wal: Mutex::new(wal),
            closed: Arc::new(AtomicBool::new(false)),
            live_iterators: Arc::new(AtomicUsize::new(0)),
            path,
            config,
        })
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    /// Get value for key.
    pub fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        let data = self.data.read();
        Ok(data.get(key).cloned())
    }

    pub fn contains_key(&self, key: &[u8]) -> EngineResult<bool> {
        self.ensure_open()?;
        Ok(self.data.read().contains_key(key))
    }

    /// Single put, committed as a one-op batch.
    pub fn put(&self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(&batch)
    }

    /// Single delete, committed as a one-op batch. Deleting an absent key is fine.
    pub fn delete(&self, key: &[u8]) -> EngineResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(&batch)
    }

    /// Commit a batch atomically.
    ///
    /// WRITE ORDERING:
    /// 1. WAL append of the whole batch as one record (synced if configured)
    /// 2. every op applied to RAM under one write lock
    ///
    /// If the WAL append fails, RAM is never modified.
    pub fn write(&self, batch: &WriteBatch) -> EngineResult<()> {
        self.ensure_open()?;
        if batch.is_empty() {
            return Ok(());
        }

        let mut wal = self.wal.lock();
        wal.append(batch.ops(), self.config.sync_on_commit)?;

        let mut data = self.data.write();
        apply_ops(&mut data, batch.ops().iter().cloned());
        Ok(())
    }

    /// Cursor over keys in `[start, end)`; `end = None` runs to the end of the keyspace.
    ///
    /// A cursor on a closed engine yields nothing.
    pub fn range(&self, start: &[u8], end: Option<&[u8]>, direction: Direction) -> RangeIter {
        RangeIter::new(
            Arc::clone(&self.data),
            Arc::clone(&self.closed),
            Arc::clone(&self.live_iterators),
            start,
            end,
            direction,
        )
    }

    /// Rewrite the WAL as a single image of the live data.
    ///
    /// Holds the WAL mutex for the duration, so commits wait; reads proceed.
    pub fn checkpoint(&self) -> EngineResult<CheckpointResult> {
        self.ensure_open()?;
        let mut wal = self.wal.lock();
        let live: Vec<BatchOp> = {
            let data = self.data.read();
            data.iter()
                .map(|(k, v)| BatchOp::Put { key: k.clone(), value: v.clone() })
                .collect()
        };
        wal.checkpoint(&live)
    }

    /// Number of key-value pairs in RAM.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    pub fn stats(&self) -> EngineResult<EngineStats> {
        let files = wal_files(&self.path.join("wal"))?;
        let wal_bytes = files
            .iter()
            .map(|(_, p)| std::fs::metadata(p).map(|m| m.len()).unwrap_or(0))
            .sum();
        Ok(EngineStats {
            entries: self.len(),
            wal_bytes,
            wal_files: files.len(),
            live_iterators: self.live_iterators.load(Ordering::Acquire),
        })
    }

    /// Data directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Sync the WAL and refuse further access. Idempotent.
    pub fn close(&self) -> EngineResult<()> {
        let wal = self.wal.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        wal.sync()?;
        debug!(path = %self.path.display(), "engine closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn apply_ops<I>(data: &mut BTreeMap<Vec<u8>, Vec<u8>>, ops: I)
where
    I: IntoIterator<Item = BatchOp>,
{
    for op in ops {
        match op {
            BatchOp::Put { key, value } => {
                data.insert(key, value);
            }
            BatchOp::Delete { key } => {
                data.remove(&key);
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            let _ = self.wal.lock().sync();
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("path", &self.path)
            .field("entries", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_engine() -> (Engine, TempDir) {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), Config::relaxed()).unwrap();
        (engine, dir)
    }

    fn collect(iter: RangeIter) -> Vec<Vec<u8>> {
        iter.map(|(k, _)| k).collect()
    }

    #[test]
    fn test_open_empty() {
        let (engine, _dir) = test_engine();
        assert_eq!(engine.len(), 0);
        assert!(engine.is_empty());
    }

    #[test]
    fn test_put_get_delete() {
        let (engine, _dir) = test_engine();
        engine.put(b"hello", b"world").unwrap();
        assert_eq!(engine.get(b"hello").unwrap(), Some(b"world".to_vec()));
        assert!(engine.contains_key(b"hello").unwrap());

        engine.delete(b"hello").unwrap();
        engine.delete(b"never-there").unwrap();
        assert_eq!(engine.get(b"hello").unwrap(), None);
        assert_eq!(engine.len(), 0);
    }

    #[test]
    fn test_batch_applies_in_order() {
        let (engine, _dir) = test_engine();
        let mut batch = WriteBatch::new();
        batch.put(b"a", b"1");
        batch.put(b"b", b"2");
        batch.delete(b"a");
        batch.put(b"b", b"3");
        engine.write(&batch).unwrap();

        assert_eq!(engine.get(b"a").unwrap(), None);
        assert_eq!(engine.get(b"b").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn test_oversized_batch_leaves_no_trace() {
        let (engine, _dir) = test_engine();
        let mut batch = WriteBatch::new();
        batch.put(b"ok", b"1");
        batch.put(&vec![b'k'; engine.config().max_key_size + 1], b"2");

        assert!(matches!(engine.write(&batch), Err(EngineError::OversizedEntry { .. })));
        assert_eq!(engine.get(b"ok").unwrap(), None);
    }

    #[test]
    fn test_range_bounds_and_direction() {
        let (engine, _dir) = test_engine();
        for key in [&b"a"[..], b"b", b"c", b"d"] {
            engine.put(key, b"v").unwrap();
        }

        assert_eq!(
            collect(engine.range(b"b", Some(b"d"), Direction::Forward)),
            vec![b"b".to_vec(), b"c".to_vec()]
        );
        assert_eq!(
            collect(engine.range(b"b", Some(b"d"), Direction::Backward)),
            vec![b"c".to_vec(), b"b".to_vec()]
        );
        assert_eq!(collect(engine.range(b"", None, Direction::Backward)).len(), 4);
    }

    #[test]
    fn test_crash_recovery() {
        let dir = TempDir::new().unwrap();
        {
            let engine = Engine::open(dir.path(), Config::default()).unwrap();
            engine.put(b"survive1", b"yes").unwrap();
            engine.put(b"survive2", b"also_yes").unwrap();
            engine.put(b"doomed", b"temp").unwrap();
            engine.delete(b"doomed").unwrap();
        }
        {
            let engine = Engine::open(dir.path(), Config::default()).unwrap();
            assert_eq!(engine.get(b"survive1").unwrap(), Some(b"yes".to_vec()));
            assert_eq!(engine.get(b"survive2").unwrap(), Some(b"also_yes".to_vec()));
            assert_eq!(engine.get(b"doomed").unwrap(), None);
            assert_eq!(engine.len(), 2);
        }
    }

    #[test]
    fn test_checkpoint_then_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let engine = Engine::open(dir.path(), Config::relaxed()).unwrap();
            for i in 0..50u8 {
                engine.put(&[i], &[i; 16]).unwrap();
            }
            for i in 0..40u8 {
                engine.delete(&[i]).unwrap();
            }
            let result = engine.checkpoint().unwrap();
            assert_eq!(result.live_entries, 10);
            engine.put(b"post", b"checkpoint").unwrap();
            engine.close().unwrap();
        }
        let engine = Engine::open(dir.path(), Config::relaxed()).unwrap();
        assert_eq!(engine.len(), 11);
        assert_eq!(engine.get(&[45]).unwrap(), Some(vec![45; 16]));
        assert_eq!(engine.get(&[5]).unwrap(), None);
        assert_eq!(engine.stats().unwrap().wal_files, 1);
    }

    #[test]
    fn test_close_rejects_access() {
        let (engine, _dir) = test_engine();
        engine.put(b"k", b"v").unwrap();
        let cursor = engine.range(b"", None, Direction::Forward);
        engine.close().unwrap();
        engine.close().unwrap();

        assert!(engine.is_closed());
        assert!(matches!(engine.get(b"k"), Err(EngineError::Closed)));
        assert!(matches!(engine.put(b"k", b"v"), Err(EngineError::Closed)));
        assert_eq!(cursor.count(), 0);
    }

    #[test]
    fn test_stats_track_cursors() {
        let (engine, _dir) = test_engine();
        engine.put(b"k", b"v").unwrap();
        let a = engine.range(b"", None, Direction::Forward);
        let b = engine.range(b"", None, Direction::Backward);
        assert_eq!(engine.stats().unwrap().live_iterators, 2);
        drop(a);
        drop(b);
        let stats = engine.stats().unwrap();
        assert_eq!(stats.live_iterators, 0);
        assert_eq!(stats.entries, 1);
        assert!(stats.wal_bytes > 0);
    }

    #[test]
    fn test_concurrent_reads_during_writes() {
        let (engine, _dir) = test_engine();
        let engine = Arc::new(engine);
        for i in 0..100 {
            engine.put(format!("k{:03}", i).as_bytes(), b"v").unwrap();
        }

        let mut handles = vec![];
        for t in 0..4 {
            let e = Arc::clone(&engine);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    let mut batch = WriteBatch::new();
                    batch.put(format!("t{}-{:03}", t, i).as_bytes(), b"x");
                    e.write(&batch).unwrap();
                    assert!(e.get(format!("k{:03}", i).as_bytes()).unwrap().is_some());
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(engine.len(), 500);
    }
}
