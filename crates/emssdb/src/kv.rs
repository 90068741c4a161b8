//! Flat key-value structure.

use emssdb_engine::Direction;

use crate::codec::{self, KV};
use crate::cursor::KvCursor;
use crate::db::Db;
use crate::error::{Error, Result};

impl Db {
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        let mut txn = self.writer.begin();
        txn.put(&codec::encode_single(KV, key), value);
        txn.commit()
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.engine.get(&codec::encode_single(KV, key))?.ok_or(Error::NotFound)
    }

    /// Delete a key. Absent keys are not an error.
    pub fn del(&self, key: &[u8]) -> Result<()> {
        let mut txn = self.writer.begin();
        txn.delete(&codec::encode_single(KV, key));
        txn.commit()
    }

    /// Add `by` to the integer stored at `key` (absent counts as zero).
    pub fn incr(&self, key: &[u8], by: i64) -> Result<i64> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        let raw_key = codec::encode_single(KV, key);
        let mut txn = self.writer.begin();
        let current = match txn.get(&raw_key)? {
            Some(raw) => codec::decode_i64(&raw)?,
            None => 0,
        };
        let value = current.wrapping_add(by);
        txn.put(&raw_key, &codec::encode_i64(value));
        txn.commit()?;
        Ok(value)
    }

    /// Set pairs in one batch. Pairing stops at the shorter slice.
    pub fn multi_set<K, V>(&self, keys: &[K], values: &[V]) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        if keys.iter().take(values.len()).any(|k| k.as_ref().is_empty()) {
            return Err(Error::EmptyKey);
        }
        let mut txn = self.writer.begin();
        for (key, value) in keys.iter().zip(values) {
            txn.put(&codec::encode_single(KV, key.as_ref()), value.as_ref());
        }
        txn.commit()
    }

    pub fn multi_del<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<()> {
        let mut txn = self.writer.begin();
        for key in keys {
            txn.delete(&codec::encode_single(KV, key.as_ref()));
        }
        txn.commit()
    }

    /// Keys in `[start, end)`; an empty `end` runs to the last key.
    pub fn scan(&self, start: &[u8], end: &[u8]) -> KvCursor {
        let (lower, upper) = kv_window(start, end);
        self.cursor(&lower, &upper, Direction::Forward)
    }

    /// Same window as [`Db::scan`], walked from the top.
    pub fn rscan(&self, start: &[u8], end: &[u8]) -> KvCursor {
        let (lower, upper) = kv_window(start, end);
        self.cursor(&lower, &upper, Direction::Backward)
    }
}

fn kv_window(start: &[u8], end: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let upper = if end.is_empty() { codec::tag_end(KV) } else { codec::encode_single(KV, end) };
    (codec::encode_single(KV, start), upper)
}
