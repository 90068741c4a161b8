//! Keys with an expiration time.
//!
//! `EXKV ‖ key` holds `stamp ‖ value`; `EXSTAMP ‖ stamp ‖ key` indexes the
//! same key by expiration so a sweep can walk everything that is due. The two
//! entries are always written and removed together.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use emssdb_engine::{Direction, Engine};
use tracing::{debug, error, warn};

use crate::codec::{self, EXKV, EXSTAMP};
use crate::cursor::{Cursor, ExpireCursor, StampCursor, StampDecoder};
use crate::db::Db;
use crate::error::{Change, Error, Result};
use crate::writer::BatchWriter;

/// Consecutive failing sweep passes before each `error!` report
pub const FAILING_STREAK_ALERT: u64 = 5;

impl Db {
    /// Store `value` under `key` until `expire_at` (Unix seconds).
    ///
    /// Re-setting a key retires its previous index entry in the same batch.
    pub fn eset(&self, key: &[u8], value: &[u8], expire_at: u64) -> Result<Change> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        let exkv_key = codec::encode_single(EXKV, key);
        let mut txn = self.writer.begin();

        let previous = txn.get(&exkv_key)?;
        let change = match previous.as_deref().and_then(codec::decode_exkv_value) {
            Some((_, old)) => {
                if old != expire_at {
                    txn.delete(&codec::encode_exstamp(key, old));
                }
                Change::Unchanged
            }
            None => Change::Resized(1),
        };

        txn.put(&exkv_key, &codec::encode_exkv_value(value, expire_at));
        txn.put(&codec::encode_exstamp(key, expire_at), &[]);
        txn.commit()?;
        Ok(change)
    }

    /// Remove an expiring key and its index entry. An absent key reports `Missing`.
    pub fn edel(&self, key: &[u8]) -> Result<Change> {
        let exkv_key = codec::encode_single(EXKV, key);
        let mut txn = self.writer.begin();
        let Some(raw) = txn.get(&exkv_key)? else {
            return Ok(Change::Missing);
        };
        txn.delete(&exkv_key);
        if let Some((_, stamp)) = codec::decode_exkv_value(&raw) {
            txn.delete(&codec::encode_exstamp(key, stamp));
        }
        txn.commit()?;
        Ok(Change::Resized(-1))
    }

    /// Value and expiration of `key`. A stored value shorter than a stamp counts as absent.
    pub fn eget(&self, key: &[u8]) -> Result<(Vec<u8>, u64)> {
        let raw = self
            .engine
            .get(&codec::encode_single(EXKV, key))?
            .ok_or(Error::NotFound)?;
        let (value, stamp) = codec::decode_exkv_value(&raw).ok_or(Error::NotFound)?;
        Ok((value.to_vec(), stamp))
    }

    /// Expiring keys in `[start, end)`; an empty `end` runs to the last key.
    pub fn escan(&self, start: &[u8], end: &[u8]) -> ExpireCursor {
        let (lower, upper) = exkv_window(start, end);
        self.cursor(&lower, &upper, Direction::Forward)
    }

    pub fn erscan(&self, start: &[u8], end: &[u8]) -> ExpireCursor {
        let (lower, upper) = exkv_window(start, end);
        self.cursor(&lower, &upper, Direction::Backward)
    }

    /// Index entries with `start <= expire_at < end`, soonest first.
    /// An `end` before `start` selects the single instant `start`.
    pub fn elist(&self, start: u64, end: u64) -> StampCursor {
        stamp_window(&self.engine, start, end)
    }
}

fn exkv_window(start: &[u8], end: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let upper = if end.is_empty() { codec::tag_end(EXKV) } else { codec::encode_single(EXKV, end) };
    (codec::encode_single(EXKV, start), upper)
}

fn stamp_window(engine: &Engine, start: u64, end: u64) -> StampCursor {
    let end = if end < start { start.saturating_add(1) } else { end };
    let lower = codec::encode_exstamp(&[], start);
    let upper = if end == u64::MAX && start < end {
        codec::tag_end(EXSTAMP)
    } else {
        codec::encode_exstamp(&[], end)
    };
    Cursor::<StampDecoder>::new(engine.range(&lower, Some(&upper), Direction::Forward))
}

/// Current time in Unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Result of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Keys removed because their stamp was due
    pub expired: u64,
    /// Index entries removed whose key had been re-set or deleted
    pub stale: u64,
    /// Entries whose removal failed; retried on the next pass
    pub failed: u64,
}

/// Running sweep counters, shared with the sweeper thread.
#[derive(Debug, Default)]
pub struct SweepStats {
    passes: AtomicU64,
    expired: AtomicU64,
    failures: AtomicU64,
    failing_streak: AtomicU64,
}

/// Point-in-time copy of [`SweepStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSnapshot {
    pub passes: u64,
    pub expired: u64,
    pub failures: u64,
    /// Consecutive passes that had at least one failure
    pub failing_streak: u64,
}

impl SweepStats {
    pub fn record(&self, outcome: &SweepOutcome) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        self.expired.fetch_add(outcome.expired, Ordering::Relaxed);
        self.failures.fetch_add(outcome.failed, Ordering::Relaxed);

        if outcome.failed == 0 {
            self.failing_streak.store(0, Ordering::Relaxed);
            return;
        }
        let streak = self.failing_streak.fetch_add(1, Ordering::Relaxed) + 1;
        if streak % FAILING_STREAK_ALERT == 0 {
            error!(
                streak,
                failed = outcome.failed,
                total_failures = self.failures.load(Ordering::Relaxed),
                "expiry sweep keeps failing"
            );
        }
    }

    pub fn snapshot(&self) -> SweepSnapshot {
        SweepSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            failing_streak: self.failing_streak.load(Ordering::Relaxed),
        }
    }
}

/// Remove every key whose stamp is at or before `now`.
///
/// Each index entry is handled in its own transaction. The key itself is
/// removed only if its live stamp still matches the index entry, so a key
/// re-set after the listing survives; the index entry is removed either way.
/// A failing entry is logged and skipped.
pub fn sweep_expired(engine: &Engine, writer: &BatchWriter, now: u64) -> SweepOutcome {
    let mut outcome = SweepOutcome::default();

    for entry in stamp_window(engine, 0, now.saturating_add(1)) {
        match retire(writer, &entry.key, entry.expire_at) {
            Ok(true) => outcome.expired += 1,
            Ok(false) => outcome.stale += 1,
            Err(e) => {
                outcome.failed += 1;
                warn!(key_len = entry.key.len(), expire_at = entry.expire_at, error = %e, "failed to expire key");
            }
        }
    }

    if outcome.expired + outcome.stale > 0 {
        debug!(expired = outcome.expired, stale = outcome.stale, now, "expiry sweep");
    }
    outcome
}

fn retire(writer: &BatchWriter, key: &[u8], stamp: u64) -> Result<bool> {
    let exkv_key = codec::encode_single(EXKV, key);
    let mut txn = writer.begin();

    let live = txn.get(&exkv_key)?;
    let matches = live
        .as_deref()
        .and_then(codec::decode_exkv_value)
        .map_or(false, |(_, live_stamp)| live_stamp == stamp);

    if matches {
        txn.delete(&exkv_key);
    }
    txn.delete(&codec::encode_exstamp(key, stamp));
    txn.commit()?;
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Options;
    use emssdb_engine::Config;
    use std::time::Duration;
    use tempfile::TempDir;

    // Sweeps in these tests are driven by hand.
    fn test_db() -> (Db, TempDir) {
        let dir = TempDir::new().unwrap();
        let options = Options::new(Config::relaxed()).expire_interval(Duration::from_secs(3600));
        let db = Db::open(dir.path(), options).unwrap();
        (db, dir)
    }

    fn stamps(db: &Db) -> Vec<(Vec<u8>, u64)> {
        db.elist(0, u64::MAX).map(|e| (e.key, e.expire_at)).collect()
    }

    const LATER: u64 = 4_000_000_000;

    #[test]
    fn test_eset_eget() {
        let (db, _dir) = test_db();
        assert_eq!(db.eset(b"s", b"token", LATER).unwrap(), Change::Resized(1));
        assert_eq!(db.eget(b"s").unwrap(), (b"token".to_vec(), LATER));
        assert!(matches!(db.eget(b"none"), Err(Error::NotFound)));
        assert!(matches!(db.eset(b"", b"v", LATER), Err(Error::EmptyKey)));
    }

    #[test]
    fn test_reset_retires_old_stamp() {
        let (db, _dir) = test_db();
        db.eset(b"s", b"v1", LATER).unwrap();
        assert_eq!(db.eset(b"s", b"v2", LATER + 60).unwrap(), Change::Unchanged);
        assert_eq!(stamps(&db), vec![(b"s".to_vec(), LATER + 60)]);

        db.eset(b"s", b"v3", LATER + 60).unwrap();
        assert_eq!(stamps(&db), vec![(b"s".to_vec(), LATER + 60)]);
        assert_eq!(db.eget(b"s").unwrap().0, b"v3");
    }

    #[test]
    fn test_edel() {
        let (db, _dir) = test_db();
        db.eset(b"s", b"v", LATER).unwrap();
        assert_eq!(db.edel(b"s").unwrap(), Change::Resized(-1));
        assert_eq!(db.edel(b"s").unwrap(), Change::Missing);
        assert!(stamps(&db).is_empty());
        assert!(db.engine().is_empty());
    }

    #[test]
    fn test_short_value_reads_as_absent() {
        let (db, _dir) = test_db();
        db.raw_set(&codec::encode_single(EXKV, b"bad"), b"abc").unwrap();
        assert!(matches!(db.eget(b"bad"), Err(Error::NotFound)));
        assert_eq!(db.escan(b"", b"").count(), 0);
    }

    #[test]
    fn test_elist_windows() {
        let (db, _dir) = test_db();
        db.eset(b"a", b"", LATER + 30).unwrap();
        db.eset(b"b", b"", LATER + 10).unwrap();
        db.eset(b"c", b"", LATER + 20).unwrap();

        let keys: Vec<_> = db.elist(LATER, LATER + 30).map(|e| e.key).collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);

        let keys: Vec<_> = db.elist(LATER + 20, 0).map(|e| e.key).collect();
        assert_eq!(keys, vec![b"c".to_vec()]);
    }

    #[test]
    fn test_escan_by_key() {
        let (db, _dir) = test_db();
        db.eset(b"b", b"2", LATER).unwrap();
        db.eset(b"a", b"1", LATER + 1).unwrap();
        let entries: Vec<_> = db.escan(b"", b"").collect();
        assert_eq!(entries[0].key, b"a");
        assert_eq!(entries[0].expire_at, LATER + 1);
        let keys: Vec<_> = db.erscan(b"", b"").map(|e| e.key).collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn test_sweep_removes_due_keys_only() {
        let (db, _dir) = test_db();
        db.eset(b"old", b"v", 100).unwrap();
        db.eset(b"due", b"v", 200).unwrap();
        db.eset(b"later", b"v", LATER).unwrap();

        let outcome = db.sweep(200);
        assert_eq!(outcome, SweepOutcome { expired: 2, stale: 0, failed: 0 });
        assert!(matches!(db.eget(b"due"), Err(Error::NotFound)));
        assert_eq!(stamps(&db), vec![(b"later".to_vec(), LATER)]);
        assert_eq!(db.sweep_stats().expired, 2);
    }

    #[test]
    fn test_sweep_spares_refreshed_key() {
        let (db, _dir) = test_db();
        // An index entry left behind for a key that has since been re-set.
        db.eset(b"k", b"v", LATER).unwrap();
        db.raw_set(&codec::encode_exstamp(b"k", 50), &[]).unwrap();

        let outcome = db.sweep(100);
        assert_eq!(outcome, SweepOutcome { expired: 0, stale: 1, failed: 0 });
        assert_eq!(db.eget(b"k").unwrap(), (b"v".to_vec(), LATER));
        assert_eq!(stamps(&db), vec![(b"k".to_vec(), LATER)]);
    }

    #[test]
    fn test_failing_streak() {
        let stats = SweepStats::default();
        let failing = SweepOutcome { expired: 0, stale: 0, failed: 2 };
        for _ in 0..FAILING_STREAK_ALERT {
            stats.record(&failing);
        }
        assert_eq!(stats.snapshot().failing_streak, FAILING_STREAK_ALERT);
        assert_eq!(stats.snapshot().failures, 2 * FAILING_STREAK_ALERT);

        stats.record(&SweepOutcome::default());
        assert_eq!(stats.snapshot().failing_streak, 0);
        assert_eq!(stats.snapshot().passes, FAILING_STREAK_ALERT + 1);
    }

    #[test]
    fn test_sweep_on_closed_engine_is_noop() {
        let (db, _dir) = test_db();
        db.eset(b"k", b"v", 10).unwrap();
        db.engine().close().unwrap();
        // A closed engine yields no index entries, so nothing fails or expires.
        assert_eq!(db.sweep(100), SweepOutcome::default());
    }
}
