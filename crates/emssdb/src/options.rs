//! Store options

use std::time::Duration;

use emssdb_engine::Config;

/// Shortest allowed pause between expiry sweeps
pub const MIN_EXPIRE_INTERVAL: Duration = Duration::from_secs(1);

/// Options for [`Db::open`](crate::Db::open)
#[derive(Debug, Clone)]
pub struct Options {
    /// Engine configuration
    pub engine: Config,
    /// Pause between expiry sweeps; clamped up to [`MIN_EXPIRE_INTERVAL`]
    pub expire_interval: Duration,
}

impl Options {
    pub fn new(engine: Config) -> Self {
        Self { engine, expire_interval: MIN_EXPIRE_INTERVAL }
    }

    pub fn expire_interval(mut self, interval: Duration) -> Self {
        self.expire_interval = interval;
        self
    }

    /// Copy with every value pulled into its allowed range.
    pub fn normalized(mut self) -> Self {
        self.expire_interval = clamp_interval(self.expire_interval);
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

pub(crate) fn clamp_interval(interval: Duration) -> Duration {
    interval.max(MIN_EXPIRE_INTERVAL)
}
