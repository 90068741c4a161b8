//! Sorted sets.
//!
//! Each member has two entries: `ZSET` maps member to score, `ZSCORE` orders
//! members by (score, member) for range scans. Both are written or removed
//! in the same batch. `ZSIZE ‖ name` counts members.

use emssdb_engine::Direction;

use crate::codec::{self, ZSCORE, ZSET, ZSIZE};
use crate::cursor::ZsetCursor;
use crate::db::Db;
use crate::error::{Change, Error, Result};
use crate::writer::{read_counter, WriteTxn};

impl Db {
    pub fn zget(&self, name: &[u8], member: &[u8]) -> Result<i64> {
        codec::check_pair(name, member)?;
        match self.engine.get(&codec::encode_composite(ZSET, name, member))? {
            Some(raw) => codec::decode_i64(&raw),
            None => Err(Error::NotFound),
        }
    }

    /// Set a member's score. Returns `Resized(1)` for a new member.
    pub fn zset(&self, name: &[u8], member: &[u8], score: i64) -> Result<Change> {
        codec::check_pair(name, member)?;
        let mut txn = self.writer.begin();
        let current = stored_score(&txn, name, member)?;
        let change = stage_score(&mut txn, name, member, current, score)?;
        txn.commit()?;
        Ok(change)
    }

    /// Remove a member and its score entry. An absent member reports `Missing`.
    pub fn zdel(&self, name: &[u8], member: &[u8]) -> Result<Change> {
        codec::check_pair(name, member)?;
        let mut txn = self.writer.begin();
        let Some(score) = stored_score(&txn, name, member)? else {
            return Ok(Change::Missing);
        };
        txn.delete(&codec::encode_composite(ZSET, name, member));
        txn.delete(&codec::encode_zscore(name, member, score));
        txn.bump_counter(&codec::encode_single(ZSIZE, name), -1)?;
        txn.commit()?;
        Ok(Change::Resized(-1))
    }

    /// Add `by` to a member's score; an absent member starts from zero.
    pub fn zincr(&self, name: &[u8], member: &[u8], by: i64) -> Result<i64> {
        codec::check_pair(name, member)?;
        let mut txn = self.writer.begin();
        let current = stored_score(&txn, name, member)?;
        let score = current.unwrap_or(0).wrapping_add(by);
        stage_score(&mut txn, name, member, current, score)?;
        txn.commit()?;
        Ok(score)
    }

    pub fn zsize(&self, name: &[u8]) -> Result<i64> {
        read_counter(&self.engine, &codec::encode_single(ZSIZE, name))
    }

    /// Members with `start <= score < end`, by score then member.
    /// An `end` of `i64::MAX` reaches the top of the set, that score included.
    pub fn zscan(&self, name: &[u8], start: i64, end: i64) -> Result<ZsetCursor> {
        let (lower, upper) = score_window(name, start, end)?;
        Ok(self.cursor(&lower, &upper, Direction::Forward))
    }

    /// Same window as [`Db::zscan`], highest score first.
    pub fn zrscan(&self, name: &[u8], start: i64, end: i64) -> Result<ZsetCursor> {
        let (lower, upper) = score_window(name, start, end)?;
        Ok(self.cursor(&lower, &upper, Direction::Backward))
    }

    pub fn zlist(&self, start: &[u8], end: &[u8]) -> Vec<Vec<u8>> {
        self.list_names(ZSIZE, start, end)
    }
}

fn stored_score(txn: &WriteTxn<'_>, name: &[u8], member: &[u8]) -> Result<Option<i64>> {
    match txn.get(&codec::encode_composite(ZSET, name, member))? {
        Some(raw) => Ok(Some(codec::decode_i64(&raw)?)),
        None => Ok(None),
    }
}

/// Stage both index entries for `score`, retiring the stale score entry.
/// A new member bumps the sorted set's own size counter.
fn stage_score(
    txn: &mut WriteTxn<'_>,
    name: &[u8],
    member: &[u8],
    current: Option<i64>,
    score: i64,
) -> Result<Change> {
    let change = match current {
        Some(old) if old == score => return Ok(Change::Unchanged),
        Some(old) => {
            txn.delete(&codec::encode_zscore(name, member, old));
            Change::Unchanged
        }
        None => {
            txn.bump_counter(&codec::encode_single(ZSIZE, name), 1)?;
            Change::Resized(1)
        }
    };
    txn.put(&codec::encode_zscore(name, member, score), &[]);
    txn.put(&codec::encode_composite(ZSET, name, member), &codec::encode_i64(score));
    Ok(change)
}

fn score_window(name: &[u8], start: i64, end: i64) -> Result<(Vec<u8>, Vec<u8>)> {
    codec::check_name(name)?;
    let lower = codec::encode_zscore(name, &[], start);
    let upper = if end == i64::MAX {
        codec::name_end(ZSCORE, name)
    } else {
        codec::encode_zscore(name, &[], end)
    };
    Ok((lower, upper))
}

#[cfg(test)]
mod tests {
    use crate::codec::{self, HSIZE, ZSIZE};
    use crate::{Change, Db, Error, Options};
    use emssdb_engine::Config;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn test_db() -> (Db, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Db::open(dir.path(), Options::new(Config::relaxed())).unwrap();
        (db, dir)
    }

    fn scan_all(db: &Db, name: &[u8]) -> Vec<(Vec<u8>, i64)> {
        db.zscan(name, i64::MIN, i64::MAX).unwrap().map(|e| (e.member, e.score)).collect()
    }

    #[test]
    fn test_rescore_keeps_one_index_entry() {
        let (db, _dir) = test_db();
        assert_eq!(db.zset(b"z", b"m", 10).unwrap(), Change::Resized(1));
        assert_eq!(db.zset(b"z", b"m", -4).unwrap(), Change::Unchanged);
        assert_eq!(db.zset(b"z", b"m", -4).unwrap(), Change::Unchanged);

        assert_eq!(scan_all(&db, b"z"), vec![(b"m".to_vec(), -4)]);
        assert_eq!(db.zget(b"z", b"m").unwrap(), -4);
        assert_eq!(db.zsize(b"z").unwrap(), 1);
    }

    #[test]
    fn test_zdel() {
        let (db, _dir) = test_db();
        db.zset(b"z", b"a", 1).unwrap();
        db.zset(b"z", b"b", 2).unwrap();
        assert_eq!(db.zdel(b"z", b"a").unwrap(), Change::Resized(-1));
        assert_eq!(db.zdel(b"z", b"a").unwrap(), Change::Missing);
        assert!(matches!(db.zget(b"z", b"a"), Err(Error::NotFound)));
        assert_eq!(scan_all(&db, b"z"), vec![(b"b".to_vec(), 2)]);

        db.zdel(b"z", b"b").unwrap();
        assert_eq!(db.zsize(b"z").unwrap(), 0);
        assert_eq!(db.raw_get(&codec::encode_single(ZSIZE, b"z")).unwrap(), None);
    }

    #[test]
    fn test_zincr_first_insert_counts_in_zsize() {
        let (db, _dir) = test_db();
        assert_eq!(db.zincr(b"board", b"alice", 5).unwrap(), 5);
        assert_eq!(db.zsize(b"board").unwrap(), 1);
        assert_eq!(db.hsize(b"board").unwrap(), 0);
        assert_eq!(db.raw_get(&codec::encode_single(HSIZE, b"board")).unwrap(), None);

        assert_eq!(db.zincr(b"board", b"alice", -8).unwrap(), -3);
        assert_eq!(db.zsize(b"board").unwrap(), 1);
        assert_eq!(scan_all(&db, b"board"), vec![(b"alice".to_vec(), -3)]);
    }

    #[test]
    fn test_scan_orders_by_score_then_member() {
        let (db, _dir) = test_db();
        db.zset(b"z", b"c", 0).unwrap();
        db.zset(b"z", b"a", 0).unwrap();
        db.zset(b"z", b"min", i64::MIN).unwrap();
        db.zset(b"z", b"max", i64::MAX).unwrap();
        db.zset(b"z", b"neg", -1).unwrap();
        db.zset(b"zz", b"other", 0).unwrap();

        let members: Vec<_> = scan_all(&db, b"z").into_iter().map(|(m, _)| m).collect();
        assert_eq!(
            members,
            vec![b"min".to_vec(), b"neg".to_vec(), b"a".to_vec(), b"c".to_vec(), b"max".to_vec()]
        );

        let window: Vec<_> = db.zscan(b"z", -1, 1).unwrap().map(|e| e.member).collect();
        assert_eq!(window, vec![b"neg".to_vec(), b"a".to_vec(), b"c".to_vec()]);

        let reversed: Vec<_> = db.zrscan(b"z", -1, 1).unwrap().map(|e| e.member).collect();
        assert_eq!(reversed, vec![b"c".to_vec(), b"a".to_vec(), b"neg".to_vec()]);

        assert_eq!(db.zscan(b"z", 5, 1).unwrap().count(), 0);
    }

    #[test]
    fn test_zscan_end_score_is_exclusive() {
        let (db, _dir) = test_db();
        db.zset(b"z", b"a", 1).unwrap();
        db.zset(b"z", b"b", 2).unwrap();
        db.zset(b"z", b"top", i64::MAX).unwrap();

        let window: Vec<_> = db.zscan(b"z", 1, 2).unwrap().map(|e| e.member).collect();
        assert_eq!(window, vec![b"a".to_vec()]);
        let reversed: Vec<_> = db.zrscan(b"z", 1, 2).unwrap().map(|e| e.member).collect();
        assert_eq!(reversed, vec![b"a".to_vec()]);

        let upper: Vec<_> = db.zscan(b"z", 2, i64::MAX).unwrap().map(|e| e.member).collect();
        assert_eq!(upper, vec![b"b".to_vec(), b"top".to_vec()]);
    }

    #[test]
    fn test_dual_index_after_mixed_ops() {
        let (db, _dir) = test_db();
        for i in 0..40i64 {
            let member = format!("m{}", i % 13);
            match i % 4 {
                0 | 1 => { db.zset(b"z", member.as_bytes(), i * 7 - 100).unwrap(); }
                2 => { db.zincr(b"z", member.as_bytes(), -i).unwrap(); }
                _ => { db.zdel(b"z", member.as_bytes()).unwrap(); }
            }
        }

        let entries = scan_all(&db, b"z");
        let unique: HashSet<_> = entries.iter().map(|(m, _)| m.clone()).collect();
        assert_eq!(unique.len(), entries.len());
        assert_eq!(db.zsize(b"z").unwrap(), entries.len() as i64);
        for (member, score) in entries {
            assert_eq!(db.zget(b"z", &member).unwrap(), score);
        }
    }

    #[test]
    fn test_zlist() {
        let (db, _dir) = test_db();
        db.zset(b"a", b"m", 1).unwrap();
        db.zset(b"b", b"m", 1).unwrap();
        db.hset(b"c", b"f", b"v").unwrap();
        assert_eq!(db.zlist(b"", b""), vec![b"a".to_vec(), b"b".to_vec()]);
    }
}
