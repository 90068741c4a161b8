//! Double-ended queues.
//!
//! Items sit at 60-bit sequence numbers under `q ‖ name ‖ 0x00 ‖ seq` keys. Two
//! reserved slots outside the sequence space hold the front and back
//! pointers; both exist exactly when the queue is non-empty. Pushing at the
//! front moves the front pointer up, pushing at the back moves the back
//! pointer down, so sequence order runs from back to front.

use emssdb_engine::Direction;

use crate::codec::{self, QSIZE};
use crate::cursor::QueueCursor;
use crate::db::Db;
use crate::error::{Error, Result};
use crate::writer::{read_counter, WriteTxn};

/// Sequence numbers wrap within this mask
pub const SEQ_MASK: u64 = (1 << 60) - 1;
/// First sequence of a fresh queue
pub const SEQ_INIT: u64 = SEQ_MASK / 2;

const FRONT_SLOT: u64 = u64::MAX;
const BACK_SLOT: u64 = u64::MAX - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Front,
    Back,
}

impl End {
    fn slot(self) -> u64 {
        match self {
            End::Front => FRONT_SLOT,
            End::Back => BACK_SLOT,
        }
    }

    /// Next free sequence beyond `seq` at this end.
    fn advance(self, seq: u64) -> u64 {
        match self {
            End::Front => seq.wrapping_add(1) & SEQ_MASK,
            End::Back => seq.wrapping_sub(1) & SEQ_MASK,
        }
    }

    /// Sequence of the item that becomes this end after `seq` is popped.
    fn retreat(self, seq: u64) -> u64 {
        match self {
            End::Front => seq.wrapping_sub(1) & SEQ_MASK,
            End::Back => seq.wrapping_add(1) & SEQ_MASK,
        }
    }
}

impl Db {
    /// Push at the front. Returns the new size.
    pub fn qpush_front(&self, name: &[u8], item: &[u8]) -> Result<i64> {
        self.qpush(name, item, End::Front)
    }

    /// Push at the back. Returns the new size.
    pub fn qpush_back(&self, name: &[u8], item: &[u8]) -> Result<i64> {
        self.qpush(name, item, End::Back)
    }

    pub fn qpop_front(&self, name: &[u8]) -> Result<Vec<u8>> {
        self.qpop(name, End::Front)
    }

    pub fn qpop_back(&self, name: &[u8]) -> Result<Vec<u8>> {
        self.qpop(name, End::Back)
    }

    pub fn qfront(&self, name: &[u8]) -> Result<Vec<u8>> {
        self.qpeek(name, End::Front)
    }

    pub fn qback(&self, name: &[u8]) -> Result<Vec<u8>> {
        self.qpeek(name, End::Back)
    }

    /// Item stored at a raw sequence number.
    pub fn qget(&self, name: &[u8], seq: u64) -> Result<Vec<u8>> {
        self.engine.get(&codec::encode_queue_item(name, seq))?.ok_or(Error::NotFound)
    }

    pub fn qsize(&self, name: &[u8]) -> Result<i64> {
        read_counter(&self.engine, &codec::encode_single(QSIZE, name))
    }

    /// Every item in sequence order, as `(seq, value)`.
    pub fn qscan(&self, name: &[u8]) -> Result<QueueCursor> {
        let lower = codec::encode_queue_item(name, 0);
        let upper = codec::encode_queue_item(name, SEQ_MASK + 1);
        Ok(self.cursor(&lower, &upper, Direction::Forward))
    }

    pub fn qlist(&self, start: &[u8], end: &[u8]) -> Vec<Vec<u8>> {
        self.list_names(QSIZE, start, end)
    }

    fn qpush(&self, name: &[u8], item: &[u8], end: End) -> Result<i64> {
        let size_key = codec::encode_single(QSIZE, name);
        let mut txn = self.writer.begin();

        let size = txn.counter(&size_key)?;
        if size >= SEQ_MASK as i64 {
            return Err(Error::OutOfRange);
        }

        let seq = match read_pointer(&txn, name, end)? {
            Some(seq) => {
                let seq = end.advance(seq);
                write_pointer(&mut txn, name, end, seq);
                seq
            }
            None => {
                write_pointer(&mut txn, name, End::Front, SEQ_INIT);
                write_pointer(&mut txn, name, End::Back, SEQ_INIT);
                SEQ_INIT
            }
        };

        txn.put(&codec::encode_queue_item(name, seq), item);
        txn.set_counter(&size_key, size + 1);
        txn.commit()?;
        Ok(size + 1)
    }

    fn qpop(&self, name: &[u8], end: End) -> Result<Vec<u8>> {
        let size_key = codec::encode_single(QSIZE, name);
        let mut txn = self.writer.begin();

        let seq = read_pointer(&txn, name, end)?.ok_or(Error::NotFound)?;
        let item_key = codec::encode_queue_item(name, seq);
        let item = txn.get(&item_key)?.ok_or(Error::NotFound)?;
        let size = txn.counter(&size_key)? - 1;

        txn.delete(&item_key);
        if size <= 0 {
            txn.delete(&codec::encode_queue_item(name, FRONT_SLOT));
            txn.delete(&codec::encode_queue_item(name, BACK_SLOT));
            txn.set_counter(&size_key, 0);
        } else {
            write_pointer(&mut txn, name, end, end.retreat(seq));
            txn.set_counter(&size_key, size);
        }
        txn.commit()?;
        Ok(item)
    }

    fn qpeek(&self, name: &[u8], end: End) -> Result<Vec<u8>> {
        let raw = self
            .engine
            .get(&codec::encode_queue_item(name, end.slot()))?
            .ok_or(Error::NotFound)?;
        let seq = codec::decode_i64(&raw)? as u64;
        self.engine.get(&codec::encode_queue_item(name, seq))?.ok_or(Error::NotFound)
    }
}

fn read_pointer(txn: &WriteTxn<'_>, name: &[u8], end: End) -> Result<Option<u64>> {
    match txn.get(&codec::encode_queue_item(name, end.slot()))? {
        Some(raw) => Ok(Some(codec::decode_i64(&raw)? as u64)),
        None => Ok(None),
    }
}

fn write_pointer(txn: &mut WriteTxn<'_>, name: &[u8], end: End, seq: u64) {
    txn.put(&codec::encode_queue_item(name, end.slot()), &codec::encode_i64(seq as i64));
}
