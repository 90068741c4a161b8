//! Background expiry sweeper.
//!
//! One thread per open store. It waits for the configured interval, then runs
//! one [`sweep_expired`] pass, until shut down.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use emssdb_engine::{Engine, EngineError};
use tracing::{debug, info};

use crate::error::Result;
use crate::expire::{sweep_expired, unix_now, SweepStats};
use crate::writer::BatchWriter;

/// Granularity of shutdown checks while waiting
const POLL: Duration = Duration::from_millis(100);

/// Handle to a running sweeper thread.
/// Dropping the handle stops the thread and waits for it.
pub struct SweeperHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SweeperHandle {
    /// Request shutdown and wait for the thread to finish its current pass.
    pub fn shutdown(mut self) {
        self.stop();
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |h| !h.is_finished())
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start the sweeper thread.
///
/// `interval_ms` is re-read before every wait, so interval changes apply
/// from the next pass.
pub fn start_sweeper(
    engine: Arc<Engine>,
    writer: Arc<BatchWriter>,
    interval_ms: Arc<AtomicU64>,
    stats: Arc<SweepStats>,
) -> Result<SweeperHandle> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    let path = engine.path().to_path_buf();

    let thread = thread::Builder::new()
        .name("emssdb-sweeper".to_string())
        .spawn(move || {
            sweep_loop(&engine, &writer, &interval_ms, &stats, &shutdown_clone);
        })
        .map_err(|e| EngineError::Io {
            path: Some(path),
            kind: e.kind(),
            message: format!("Failed to spawn sweeper thread: {}", e),
        })?;

    Ok(SweeperHandle { shutdown, thread: Some(thread) })
}

fn sweep_loop(
    engine: &Engine,
    writer: &BatchWriter,
    interval_ms: &AtomicU64,
    stats: &SweepStats,
    shutdown: &AtomicBool,
) {
    info!("expiry sweeper started");
    loop {
        let interval = Duration::from_millis(interval_ms.load(Ordering::Acquire));
        let wake_time = Instant::now() + interval;
        while Instant::now() < wake_time {
            if shutdown.load(Ordering::Acquire) {
                debug!("expiry sweeper exiting");
                return;
            }
            thread::sleep(POLL.min(wake_time.saturating_duration_since(Instant::now())));
        }

        if shutdown.load(Ordering::Acquire) || engine.is_closed() {
            debug!("expiry sweeper exiting");
            return;
        }

        let outcome = sweep_expired(engine, writer, unix_now());
        stats.record(&outcome);
    }
}
