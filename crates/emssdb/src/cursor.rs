//! Typed cursors over physical key ranges.
//!
//! One cursor type serves every structure; a [`Decoder`] turns each raw
//! `(key, value)` pair from the engine into the structure's logical entry.
//! Entries that fail to decode are skipped.
//!
//! The engine cursor is released when the [`Cursor`] is dropped, including
//! when a loop over it breaks early.

use std::marker::PhantomData;

use emssdb_engine::RangeIter;

use crate::codec;

/// Decoding strategy for one key family.
pub trait Decoder {
    type Item;

    fn decode(key: &[u8], value: Vec<u8>) -> Option<Self::Item>;
}

/// Lazy cursor yielding decoded entries in key order (or reverse).
pub struct Cursor<D: Decoder> {
    inner: RangeIter,
    _decoder: PhantomData<D>,
}

impl<D: Decoder> Cursor<D> {
    pub(crate) fn new(inner: RangeIter) -> Self {
        Self { inner, _decoder: PhantomData }
    }
}

impl<D: Decoder> Iterator for Cursor<D> {
    type Item = D::Item;

    fn next(&mut self) -> Option<Self::Item> {
        for (key, value) in self.inner.by_ref() {
            if let Some(item) = D::decode(&key, value) {
                return Some(item);
            }
        }
        None
    }
}

impl<D: Decoder> std::fmt::Debug for Cursor<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("decoder", &std::any::type_name::<D>())
            .field("inner", &self.inner)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashEntry {
    pub name: Vec<u8>,
    pub field: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZsetEntry {
    pub name: Vec<u8>,
    pub member: Vec<u8>,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub seq: u64,
    pub value: Vec<u8>,
}

/// An expiring key with its value and expiration (Unix seconds).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpireEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub expire_at: u64,
}

/// One record of the expiration index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampEntry {
    pub key: Vec<u8>,
    pub expire_at: u64,
}

#[derive(Debug)]
pub enum KvDecoder {}

impl Decoder for KvDecoder {
    type Item = KvEntry;

    fn decode(key: &[u8], value: Vec<u8>) -> Option<KvEntry> {
        Some(KvEntry { key: codec::decode_single(key).to_vec(), value })
    }
}

#[derive(Debug)]
pub enum HashDecoder {}

impl Decoder for HashDecoder {
    type Item = HashEntry;

    fn decode(key: &[u8], value: Vec<u8>) -> Option<HashEntry> {
        let (name, field) = codec::decode_composite(key)?;
        Some(HashEntry { name: name.to_vec(), field: field.to_vec(), value })
    }
}

#[derive(Debug)]
pub enum ZsetDecoder {}

impl Decoder for ZsetDecoder {
    type Item = ZsetEntry;

    fn decode(key: &[u8], _value: Vec<u8>) -> Option<ZsetEntry> {
        let (name, member, score) = codec::decode_zscore(key)?;
        Some(ZsetEntry { name: name.to_vec(), member: member.to_vec(), score })
    }
}

#[derive(Debug)]
pub enum QueueDecoder {}

impl Decoder for QueueDecoder {
    type Item = QueueEntry;

    fn decode(key: &[u8], value: Vec<u8>) -> Option<QueueEntry> {
        let (_, seq) = codec::decode_queue_item(key)?;
        Some(QueueEntry { seq, value })
    }
}

#[derive(Debug)]
pub enum ExpireDecoder {}

impl Decoder for ExpireDecoder {
    type Item = ExpireEntry;

    fn decode(key: &[u8], value: Vec<u8>) -> Option<ExpireEntry> {
        let (payload, expire_at) = codec::decode_exkv_value(&value)?;
        Some(ExpireEntry {
            key: codec::decode_single(key).to_vec(),
            value: payload.to_vec(),
            expire_at,
        })
    }
}

#[derive(Debug)]
pub enum StampDecoder {}

impl Decoder for StampDecoder {
    type Item = StampEntry;

    fn decode(key: &[u8], _value: Vec<u8>) -> Option<StampEntry> {
        let (key, expire_at) = codec::decode_exstamp(key)?;
        Some(StampEntry { key: key.to_vec(), expire_at })
    }
}

/// Structure names from a size-counter family.
#[derive(Debug)]
pub enum NameDecoder {}

impl Decoder for NameDecoder {
    type Item = Vec<u8>;

    fn decode(key: &[u8], _value: Vec<u8>) -> Option<Vec<u8>> {
        Some(codec::decode_single(key).to_vec())
    }
}

pub type KvCursor = Cursor<KvDecoder>;
pub type HashCursor = Cursor<HashDecoder>;
pub type ZsetCursor = Cursor<ZsetDecoder>;
pub type QueueCursor = Cursor<QueueDecoder>;
pub type ExpireCursor = Cursor<ExpireDecoder>;
pub type StampCursor = Cursor<StampDecoder>;

#[cfg(test)]
mod tests {
    use super::*;
    use emssdb_engine::{Config, Direction, Engine};
    use tempfile::TempDir;

    fn test_engine() -> (Engine, TempDir) {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), Config::relaxed()).unwrap();
        (engine, dir)
    }

    #[test]
    fn test_skips_undecodable_entries() {
        let (engine, _dir) = test_engine();
        engine.put(&codec::encode_composite(codec::HASH, b"n", b"a"), b"1").unwrap();
        engine.put(b"h\x40broken", b"x").unwrap();
        engine.put(&codec::encode_composite(codec::HASH, b"o", b"b"), b"2").unwrap();

        let cursor: HashCursor = Cursor::new(engine.range(&[codec::HASH], Some(&codec::tag_end(codec::HASH)), Direction::Forward));
        let fields: Vec<_> = cursor.map(|e| e.field).collect();
        assert_eq!(fields, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_expire_decoder_drops_short_values() {
        assert_eq!(ExpireDecoder::decode(b"ekey", b"1234".to_vec()), None);
        let decoded = ExpireDecoder::decode(b"ekey", codec::encode_exkv_value(b"v", 7)).unwrap();
        assert_eq!(decoded, ExpireEntry { key: b"key".to_vec(), value: b"v".to_vec(), expire_at: 7 });
    }

    #[test]
    fn test_early_drop_releases_engine_cursor() {
        let (engine, _dir) = test_engine();
        for i in 0..10u8 {
            engine.put(&codec::encode_single(codec::KV, &[i]), b"v").unwrap();
        }
        {
            let mut cursor: KvCursor = Cursor::new(engine.range(&[codec::KV], None, Direction::Backward));
            assert_eq!(cursor.next().map(|e| e.key), Some(vec![9]));
            assert_eq!(engine.stats().unwrap().live_iterators, 1);
        }
        assert_eq!(engine.stats().unwrap().live_iterators, 0);
    }
}
