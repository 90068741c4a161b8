//! Write batches: an ordered list of puts and deletes committed atomically.

/// One staged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOp {
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }
}

/// A set of operations applied by [`Engine::write`](crate::Engine::write)
/// as a single unit. Later ops on the same key win.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.ops.push(BatchOp::Put { key: key.to_vec(), value: value.to_vec() });
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.ops.push(BatchOp::Delete { key: key.to_vec() });
    }

    /// Drop every staged op.
    pub fn clear(&mut self) {
        self.ops.clear();
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_keeps_order() {
        let mut batch = WriteBatch::new();
        batch.put(b"a", b"1");
        batch.delete(b"a");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.ops()[0].key(), b"a");
        assert!(matches!(batch.ops()[1], BatchOp::Delete { .. }));

        batch.clear();
        assert!(batch.is_empty());
    }
}
