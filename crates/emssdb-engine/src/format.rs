//! Binary format definitions for WAL records
//!
//! One record holds one whole write batch, so replay applies a batch
//! entirely or not at all:
//!
//! RecordHeader (32 bytes) + op_count(u32) + op_count × [op(u8) + key_len(u16) + value_len(u32) + key + value]
//!
//! All integers are little-endian. The checksum covers the payload only.

use std::path::PathBuf;

use crate::batch::{BatchOp, WriteBatch};
use crate::error::{EngineError, EngineResult};

/// Magic bytes identifying a WAL record: "EMSW" in ASCII
pub const MAGIC_ARRAY: [u8; 4] = [0x45, 0x4D, 0x53, 0x57];

/// Header size in bytes
pub const HEADER_SIZE: usize = 32;

/// Hard ceiling on a key imposed by the u16 length field
pub const KEY_LEN_LIMIT: usize = u16::MAX as usize;

/// Per-op fixed overhead: op(1) + key_len(2) + value_len(4)
const OP_HEADER_SIZE: usize = 7;

/// Kind of WAL record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// An ordinary committed batch
    Batch = 1,
    /// A full image of the live data; replay clears state before applying it
    Checkpoint = 2,
}

/// Operation tags inside a record payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    /// Insert or update a key-value pair
    Put = 1,
    /// Delete a key
    Delete = 2,
}

/// Fixed-size header for each WAL record
///
/// Layout:
///   [0..4]   magic:    [u8;4] - "EMSW"
///   [4..8]   length:   u32    - payload length in bytes
///   [8..12]  checksum: u32    - CRC32C of payload bytes
///   [12]     kind:     u8     - record kind
///   [13..16] reserved: [u8;3]
///   [16..32] padding
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub magic: [u8; 4],
    pub length: u32,
    pub checksum: u32,
    pub kind: u8,
}

impl RecordHeader {
    pub fn new(length: u32, checksum: u32, kind: RecordKind) -> Self {
        Self {
            magic: MAGIC_ARRAY,
            length,
            checksum,
            kind: kind as u8,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        buf[12] = self.kind;
        buf
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Self {
            magic,
            length: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            checksum: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            kind: bytes[12],
        }
    }
}

/// A decoded WAL record
#[derive(Debug, Clone)]
pub struct WalRecord {
    pub kind: RecordKind,
    pub ops: Vec<BatchOp>,
}

/// Size limits enforced while serializing
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_key_size: usize,
    pub max_value_size: usize,
}

/// Serialize a batch into a complete WAL record.
///
/// Sizes are validated before anything is allocated for the payload.
pub fn serialize_record(kind: RecordKind, ops: &[BatchOp], limits: Limits) -> EngineResult<Vec<u8>> {
    let mut payload_size = 4usize;
    for op in ops {
        let (key, value) = match op {
            BatchOp::Put { key, value } => (key.as_slice(), value.as_slice()),
            BatchOp::Delete { key } => (key.as_slice(), &[][..]),
        };
        let max_key = limits.max_key_size.min(KEY_LEN_LIMIT);
        if key.len() > max_key {
            return Err(EngineError::OversizedEntry {
                entry_size: key.len() as u64,
                max_size: max_key as u64,
                component: "key",
            });
        }
        if value.len() > limits.max_value_size {
            return Err(EngineError::OversizedEntry {
                entry_size: value.len() as u64,
                max_size: limits.max_value_size as u64,
                component: "value",
            });
        }
        payload_size += OP_HEADER_SIZE + key.len() + value.len();
    }
    if payload_size > u32::MAX as usize {
        return Err(EngineError::OversizedEntry {
            entry_size: payload_size as u64,
            max_size: u32::MAX as u64,
            component: "record",
        });
    }

    let mut payload = Vec::with_capacity(payload_size);
    payload.extend_from_slice(&(ops.len() as u32).to_le_bytes());
    for op in ops {
        match op {
            BatchOp::Put { key, value } => {
                payload.push(Operation::Put as u8);
                payload.extend_from_slice(&(key.len() as u16).to_le_bytes());
                payload.extend_from_slice(&(value.len() as u32).to_le_bytes());
                payload.extend_from_slice(key);
                payload.extend_from_slice(value);
            }
            BatchOp::Delete { key } => {
                payload.push(Operation::Delete as u8);
                payload.extend_from_slice(&(key.len() as u16).to_le_bytes());
                payload.extend_from_slice(&0u32.to_le_bytes());
                payload.extend_from_slice(key);
            }
        }
    }

    let checksum = crc32c::crc32c(&payload);
    let header = RecordHeader::new(payload.len() as u32, checksum, kind);

    let mut buffer = Vec::with_capacity(HEADER_SIZE + payload.len());
    buffer.extend_from_slice(&header.to_bytes());
    buffer.extend_from_slice(&payload);
    Ok(buffer)
}

/// Serialize a write batch as an ordinary record.
pub fn serialize_batch(batch: &WriteBatch, limits: Limits) -> EngineResult<Vec<u8>> {
    serialize_record(RecordKind::Batch, batch.ops(), limits)
}

fn corrupted(offset: usize, reason: String) -> EngineError {
    EngineError::WalCorrupted {
        path: PathBuf::from("<buffer>"),
        offset: offset as u64,
        reason,
    }
}

/// Deserialize a WAL record from a byte slice that starts at a record header.
pub fn deserialize_record(data: &[u8]) -> EngineResult<WalRecord> {
    if data.len() < HEADER_SIZE {
        return Err(corrupted(
            0,
            format!("Record too short: {} bytes, need at least {}", data.len(), HEADER_SIZE),
        ));
    }

    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes.copy_from_slice(&data[..HEADER_SIZE]);
    let header = RecordHeader::from_bytes(&header_bytes);

    if header.magic != MAGIC_ARRAY {
        return Err(EngineError::NoMagicFound {
            path: PathBuf::from("<buffer>"),
            offset: 0,
            found_bytes: header.magic,
        });
    }

    let payload_end = HEADER_SIZE + header.length as usize;
    if data.len() < payload_end {
        return Err(EngineError::TornWrite {
            path: PathBuf::from("<buffer>"),
            expected_size: header.length,
            available_bytes: (data.len() - HEADER_SIZE) as u64,
            offset: HEADER_SIZE as u64,
        });
    }

    let payload = &data[HEADER_SIZE..payload_end];
    let computed = crc32c::crc32c(payload);
    if computed != header.checksum {
        return Err(EngineError::ChecksumMismatch {
            path: PathBuf::from("<buffer>"),
            expected: header.checksum,
            actual: computed,
            offset: HEADER_SIZE as u64,
        });
    }

    let kind = match header.kind {
        1 => RecordKind::Batch,
        2 => RecordKind::Checkpoint,
        other => return Err(corrupted(12, format!("Invalid record kind: {}", other))),
    };

    if payload.len() < 4 {
        return Err(corrupted(HEADER_SIZE, "Payload too short for op count".to_string()));
    }
    let count = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;

    let mut ops = Vec::with_capacity(count.min(payload.len() / OP_HEADER_SIZE + 1));
    let mut pos = 4;
    for index in 0..count {
        if pos + OP_HEADER_SIZE > payload.len() {
            return Err(corrupted(HEADER_SIZE + pos, format!("Op {} header truncated", index)));
        }
        let op = payload[pos];
        let key_len = u16::from_le_bytes([payload[pos + 1], payload[pos + 2]]) as usize;
        let value_len = u32::from_le_bytes([
            payload[pos + 3], payload[pos + 4], payload[pos + 5], payload[pos + 6],
        ]) as usize;
        let key_start = pos + OP_HEADER_SIZE;
        let value_end = key_start + key_len + value_len;
        if value_end > payload.len() {
            return Err(corrupted(
                HEADER_SIZE + pos,
                format!("Op {} needs {} bytes, payload has {}", index, value_end, payload.len()),
            ));
        }
        let key = payload[key_start..key_start + key_len].to_vec();
        match op {
            1 => ops.push(BatchOp::Put {
                key,
                value: payload[key_start + key_len..value_end].to_vec(),
            }),
            2 => ops.push(BatchOp::Delete { key }),
            other => {
                return Err(corrupted(HEADER_SIZE + pos, format!("Invalid operation type: {}", other)))
            }
        }
        pos = value_end;
    }

    Ok(WalRecord { kind, ops })
}
