//! Engine configuration
//!
//! Two presets cover the usual trade-off between commit latency and
//! durability; individual fields can be adjusted afterwards.

use crate::format::KEY_LEN_LIMIT;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// WAL file rotation threshold (bytes)
    pub wal_rotation_size_bytes: u64,
    /// Maximum key size in bytes
    pub max_key_size: usize,
    /// Maximum value size in bytes
    pub max_value_size: usize,
    /// Sync the WAL on every committed batch
    pub sync_on_commit: bool,
}

impl Config {
    /// Every commit is synced before it becomes visible.
    pub fn durable() -> Self {
        Self {
            wal_rotation_size_bytes: 64 * 1024 * 1024,
            max_key_size: 4096,
            max_value_size: 32 * 1024 * 1024,
            sync_on_commit: true,
        }
    }

    /// Commits reach the OS page cache only; a power loss may drop the last
    /// few batches, never part of one.
    pub fn relaxed() -> Self {
        Self {
            sync_on_commit: false,
            ..Self::durable()
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.wal_rotation_size_bytes < 1024 * 1024 {
            return Err("wal_rotation_size_bytes must be >= 1MB".into());
        }
        if self.max_key_size == 0 || self.max_key_size > KEY_LEN_LIMIT {
            return Err(format!("max_key_size must be in [1, {}]", KEY_LEN_LIMIT));
        }
        if self.max_value_size == 0 || self.max_value_size > 128 * 1024 * 1024 {
            return Err("max_value_size must be in [1, 128MB]".into());
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::durable()
    }
}
