//! Progress reporting for a running download.
//!
//! Progress is measured at the write frontier, so reports only ever grow. A
//! report is emitted for the first written block, whenever the whole-percent
//! value has grown by at least `PROGRESS_STEP` since the previous report, and
//! once on reaching 100%.

use tokio::time::Instant;
use tracing::info;

/// Minimum growth in percent between two reports
pub const PROGRESS_STEP: u64 = 3;

/// Callback invoked with `(bytes_done, total_bytes)`
pub type ProgressCallback = Box<dyn FnMut(u64, u64) + Send>;

pub(crate) struct ProgressReporter {
    callback: Option<ProgressCallback>,
    total: u64,
    last_percent: Option<u64>,
    started_at: Instant,
}

impl ProgressReporter {
    pub fn new(callback: Option<ProgressCallback>, total: u64) -> Self {
        Self { callback, total, last_percent: None, started_at: Instant::now() }
    }

    /// Average throughput since the reporter was created, in MiB/s
    pub fn speed_mib(&self, done: u64) -> f64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        done as f64 / elapsed / (1024.0 * 1024.0)
    }

    /// Reports `done` bytes if the threshold was crossed
    ///
    /// # Returns
    ///
    /// `true` if the callback was invoked
    pub fn update(&mut self, done: u64) -> bool {
        if self.total == 0 {
            return false;
        }
        let percent = done.saturating_mul(100) / self.total;
        let due = match self.last_percent {
            None => true,
            Some(last) if last >= 100 => false,
            Some(last) => percent >= last + PROGRESS_STEP || percent == 100,
        };
        if !due {
            return false;
        }
        self.last_percent = Some(percent);
        info!(
            "download progress {}% ({}/{} Bytes, {:.2} MiB/s)",
            percent,
            done,
            self.total,
            self.speed_mib(done)
        );
        if let Some(callback) = self.callback.as_mut() {
            callback(done, self.total);
        }
        true
    }
}
