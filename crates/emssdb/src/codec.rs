//! Physical key layouts.
//!
//! Every structure owns a one-byte tag that prefixes all of its physical
//! keys, partitioning the engine's flat keyspace:
//!
//! | tag | family   | key                                        | value              |
//! |-----|----------|--------------------------------------------|--------------------|
//! | `k` | KV       | `k ‖ key`                                  | raw value          |
//! | `h` | HASH     | `h ‖ len ‖ name ‖ 0x00 ‖ field`            | raw value          |
//! | `H` | HSIZE    | `H ‖ name`                                 | i64 count          |
//! | `s` | ZSET     | `s ‖ len ‖ name ‖ 0x00 ‖ member`           | i64 score          |
//! | `z` | ZSCORE   | `z ‖ len ‖ name ‖ 0x00 ‖ score ‖ member`   | empty              |
//! | `Z` | ZSIZE    | `Z ‖ name`                                 | i64 count          |
//! | `q` | QUEUE    | `q ‖ name ‖ 0x00 ‖ seq`                    | item, or a pointer |
//! | `Q` | QSIZE    | `Q ‖ name`                                 | i64 count          |
//! | `e` | EXKV     | `e ‖ key`                                  | stamp ‖ value      |
//! | `x` | EXSTAMP  | `x ‖ stamp ‖ key`                          | empty              |
//!
//! Integers are 8 bytes big-endian. Scores are biased by 2^63 first so
//! byte order matches signed numeric order. These layouts are the on-disk
//! format.

use crate::error::{Error, Result};

pub const KV: u8 = b'k';
pub const HASH: u8 = b'h';
pub const HSIZE: u8 = b'H';
pub const ZSET: u8 = b's';
pub const ZSCORE: u8 = b'z';
pub const ZSIZE: u8 = b'Z';
pub const QUEUE: u8 = b'q';
pub const QSIZE: u8 = b'Q';
pub const EXKV: u8 = b'e';
pub const EXSTAMP: u8 = b'x';

/// Longest name or field a composite key can carry
pub const MAX_NAME_LEN: usize = 255;

const SEPARATOR: u8 = 0x00;
const SCORE_BIAS: u64 = 1 << 63;

/// `tag ‖ key`
pub fn encode_single(tag: u8, key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + key.len());
    buf.push(tag);
    buf.extend_from_slice(key);
    buf
}

/// Strip the tag byte. A tag-only or empty input yields an empty key.
pub fn decode_single(raw: &[u8]) -> &[u8] {
    raw.get(1..).unwrap_or(&[])
}

/// Exclusive upper bound of a whole tag family.
pub fn tag_end(tag: u8) -> Vec<u8> {
    vec![tag.wrapping_add(1)]
}

fn composite_prefix(tag: u8, name: &[u8], separator: u8, extra: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(3 + name.len() + extra);
    buf.push(tag);
    buf.push(name.len() as u8);
    buf.extend_from_slice(name);
    buf.push(separator);
    buf
}

/// `tag ‖ len(name) ‖ name ‖ 0x00 ‖ key`. `name` must already be validated.
pub fn encode_composite(tag: u8, name: &[u8], key: &[u8]) -> Vec<u8> {
    let mut buf = composite_prefix(tag, name, SEPARATOR, key.len());
    buf.extend_from_slice(key);
    buf
}

/// Split a composite key into `(name, key)`.
///
/// Returns `None` if the declared name length runs past the buffer.
pub fn decode_composite(raw: &[u8]) -> Option<(&[u8], &[u8])> {
    let len = *raw.get(1)? as usize;
    if raw.len() < 3 + len {
        return None;
    }
    Some((&raw[2..2 + len], &raw[3 + len..]))
}

/// Exclusive upper bound of every composite key under `name`.
pub fn name_end(tag: u8, name: &[u8]) -> Vec<u8> {
    composite_prefix(tag, name, SEPARATOR + 1, 0)
}

pub fn encode_score(score: i64) -> [u8; 8] {
    ((score as u64) ^ SCORE_BIAS).to_be_bytes()
}

pub fn decode_score(raw: &[u8]) -> Option<i64> {
    let bytes: [u8; 8] = raw.try_into().ok()?;
    Some((u64::from_be_bytes(bytes) ^ SCORE_BIAS) as i64)
}

/// `z ‖ len ‖ name ‖ 0x00 ‖ score ‖ member`
pub fn encode_zscore(name: &[u8], member: &[u8], score: i64) -> Vec<u8> {
    let mut buf = composite_prefix(ZSCORE, name, SEPARATOR, 8 + member.len());
    buf.extend_from_slice(&encode_score(score));
    buf.extend_from_slice(member);
    buf
}

/// Split a score index key into `(name, member, score)`.
pub fn decode_zscore(raw: &[u8]) -> Option<(&[u8], &[u8], i64)> {
    let (name, rest) = decode_composite(raw)?;
    if rest.len() < 8 {
        return None;
    }
    let score = decode_score(&rest[..8])?;
    Some((name, &rest[8..], score))
}

/// `q ‖ name ‖ 0x00 ‖ seq`. Queue names carry no length byte.
pub fn encode_queue_item(name: &[u8], seq: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10 + name.len());
    buf.push(QUEUE);
    buf.extend_from_slice(name);
    buf.push(SEPARATOR);
    buf.extend_from_slice(&seq.to_be_bytes());
    buf
}

/// Split a queue item key into `(name, seq)`, reading the sequence from the tail.
pub fn decode_queue_item(raw: &[u8]) -> Option<(&[u8], u64)> {
    if raw.len() < 10 || raw[raw.len() - 9] != SEPARATOR {
        return None;
    }
    let (head, seq) = raw.split_at(raw.len() - 8);
    Some((&head[1..head.len() - 1], u64::from_be_bytes(seq.try_into().ok()?)))
}

/// `stamp ‖ value`
pub fn encode_exkv_value(value: &[u8], stamp: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + value.len());
    buf.extend_from_slice(&stamp.to_be_bytes());
    buf.extend_from_slice(value);
    buf
}

/// Split an expiring value into `(value, stamp)`; shorter than 8 bytes is `None`.
pub fn decode_exkv_value(raw: &[u8]) -> Option<(&[u8], u64)> {
    if raw.len() < 8 {
        return None;
    }
    let (stamp, value) = raw.split_at(8);
    Some((value, u64::from_be_bytes(stamp.try_into().ok()?)))
}

/// `x ‖ stamp ‖ key`
pub fn encode_exstamp(key: &[u8], stamp: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9 + key.len());
    buf.push(EXSTAMP);
    buf.extend_from_slice(&stamp.to_be_bytes());
    buf.extend_from_slice(key);
    buf
}

pub fn decode_exstamp(raw: &[u8]) -> Option<(&[u8], u64)> {
    decode_exkv_value(decode_single(raw))
}

pub fn encode_i64(value: i64) -> [u8; 8] {
    value.to_be_bytes()
}

/// Read an 8-byte big-endian integer; any other width is [`Error::NotAnInteger`].
pub fn decode_i64(raw: &[u8]) -> Result<i64> {
    let bytes: [u8; 8] = raw.try_into().map_err(|_| Error::NotAnInteger(raw.len()))?;
    Ok(i64::from_be_bytes(bytes))
}

/// Reject names that cannot be length-prefixed.
pub fn check_name(name: &[u8]) -> Result<()> {
    if name.is_empty() {
        return Err(Error::EmptyKey);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::LongKey(name.len()));
    }
    Ok(())
}

/// Reject a (name, field) pair for a hash or sorted set.
pub fn check_pair(name: &[u8], key: &[u8]) -> Result<()> {
    check_name(name)?;
    check_name(key)
}
