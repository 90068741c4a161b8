//! Hash maps: named collections of field/value pairs.
//!
//! Fields live under `HASH` composite keys; `HSIZE ‖ name` counts them and is
//! absent whenever the hash is empty.

use emssdb_engine::Direction;

use crate::codec::{self, HASH, HSIZE};
use crate::cursor::{Cursor, HashCursor, NameDecoder};
use crate::db::Db;
use crate::error::{Change, Error, Result};
use crate::writer::read_counter;

impl Db {
    pub fn hget(&self, name: &[u8], field: &[u8]) -> Result<Vec<u8>> {
        codec::check_pair(name, field)?;
        self.engine
            .get(&codec::encode_composite(HASH, name, field))?
            .ok_or(Error::NotFound)
    }

    /// Insert or overwrite a field. Returns `Resized(1)` for a new field.
    pub fn hset(&self, name: &[u8], field: &[u8], value: &[u8]) -> Result<Change> {
        codec::check_pair(name, field)?;
        let key = codec::encode_composite(HASH, name, field);
        let mut txn = self.writer.begin();
        let change = match txn.get(&key)? {
            None => {
                txn.bump_counter(&codec::encode_single(HSIZE, name), 1)?;
                txn.put(&key, value);
                Change::Resized(1)
            }
            Some(current) => {
                if current != value {
                    txn.put(&key, value);
                }
                Change::Unchanged
            }
        };
        txn.commit()?;
        Ok(change)
    }

    /// Remove a field. An absent field reports `Missing`.
    pub fn hdel(&self, name: &[u8], field: &[u8]) -> Result<Change> {
        codec::check_pair(name, field)?;
        let key = codec::encode_composite(HASH, name, field);
        let mut txn = self.writer.begin();
        if txn.get(&key)?.is_none() {
            return Ok(Change::Missing);
        }
        txn.delete(&key);
        txn.bump_counter(&codec::encode_single(HSIZE, name), -1)?;
        txn.commit()?;
        Ok(Change::Resized(-1))
    }

    /// Add `by` to an integer field, creating it at `by` if absent.
    pub fn hincr(&self, name: &[u8], field: &[u8], by: i64) -> Result<i64> {
        codec::check_pair(name, field)?;
        let key = codec::encode_composite(HASH, name, field);
        let mut txn = self.writer.begin();
        let value = match txn.get(&key)? {
            Some(raw) => codec::decode_i64(&raw)?.wrapping_add(by),
            None => {
                txn.bump_counter(&codec::encode_single(HSIZE, name), 1)?;
                by
            }
        };
        txn.put(&key, &codec::encode_i64(value));
        txn.commit()?;
        Ok(value)
    }

    pub fn hsize(&self, name: &[u8]) -> Result<i64> {
        read_counter(&self.engine, &codec::encode_single(HSIZE, name))
    }

    /// Fields of `name` in `[start, end)`; an empty `end` runs to the last field.
    pub fn hscan(&self, name: &[u8], start: &[u8], end: &[u8]) -> Result<HashCursor> {
        let (lower, upper) = hash_window(name, start, end)?;
        Ok(self.cursor(&lower, &upper, Direction::Forward))
    }

    pub fn hrscan(&self, name: &[u8], start: &[u8], end: &[u8]) -> Result<HashCursor> {
        let (lower, upper) = hash_window(name, start, end)?;
        Ok(self.cursor(&lower, &upper, Direction::Backward))
    }

    /// Names of non-empty hashes in `[start, end)`; an empty `end` runs to the last name.
    pub fn hlist(&self, start: &[u8], end: &[u8]) -> Vec<Vec<u8>> {
        self.list_names(HSIZE, start, end)
    }

    pub(crate) fn list_names(&self, tag: u8, start: &[u8], end: &[u8]) -> Vec<Vec<u8>> {
        let upper = if end.is_empty() { codec::tag_end(tag) } else { codec::encode_single(tag, end) };
        let names: Cursor<NameDecoder> =
            self.cursor(&codec::encode_single(tag, start), &upper, Direction::Forward);
        names.collect()
    }
}

fn hash_window(name: &[u8], start: &[u8], end: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    codec::check_name(name)?;
    let upper = if end.is_empty() {
        codec::name_end(HASH, name)
    } else {
        codec::encode_composite(HASH, name, end)
    };
    Ok((codec::encode_composite(HASH, name, start), upper))
}
