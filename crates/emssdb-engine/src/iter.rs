//! Range cursors over the ordered map.
//!
//! A [`RangeIter`] never holds the map lock between calls: it copies a
//! bounded chunk of entries under a short read lock, then narrows its own
//! bounds past the last key it returned. Writers are never blocked by an
//! idle cursor, and a cursor observes whatever was committed when each
//! chunk was taken.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Entries copied per lock acquisition
const CHUNK_SIZE: usize = 128;

/// Iteration order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Lazy cursor over `[start, end)` in byte order.
pub struct RangeIter {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    closed: Arc<AtomicBool>,
    live: Arc<AtomicUsize>,
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    direction: Direction,
    buffer: VecDeque<(Vec<u8>, Vec<u8>)>,
    exhausted: bool,
}

impl RangeIter {
    pub(crate) fn new(
        data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
        closed: Arc<AtomicBool>,
        live: Arc<AtomicUsize>,
        start: &[u8],
        end: Option<&[u8]>,
        direction: Direction,
    ) -> Self {
        live.fetch_add(1, Ordering::AcqRel);
        let lower = Bound::Included(start.to_vec());
        let upper = match end {
            Some(end) => Bound::Excluded(end.to_vec()),
            None => Bound::Unbounded,
        };
        let exhausted = match (&lower, &upper) {
            (Bound::Included(s), Bound::Excluded(e)) => s >= e,
            _ => false,
        };
        Self {
            data,
            closed,
            live,
            lower,
            upper,
            direction,
            buffer: VecDeque::new(),
            exhausted,
        }
    }

    fn refill(&mut self) {
        if self.closed.load(Ordering::Acquire) {
            self.exhausted = true;
            return;
        }

        let data = self.data.read();
        let range = data.range((self.lower.clone(), self.upper.clone()));
        match self.direction {
            Direction::Forward => {
                self.buffer.extend(range.take(CHUNK_SIZE).map(|(k, v)| (k.clone(), v.clone())));
            }
            Direction::Backward => {
                self.buffer.extend(range.rev().take(CHUNK_SIZE).map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        drop(data);

        if self.buffer.len() < CHUNK_SIZE {
            self.exhausted = true;
        }
        if let Some((last, _)) = self.buffer.back() {
            match self.direction {
                Direction::Forward => self.lower = Bound::Excluded(last.clone()),
                Direction::Backward => self.upper = Bound::Excluded(last.clone()),
            }
        }
    }
}

impl Iterator for RangeIter {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            self.refill();
        }
        self.buffer.pop_front()
    }
}

impl Drop for RangeIter {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for RangeIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeIter")
            .field("direction", &self.direction)
            .field("buffered", &self.buffer.len())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}
