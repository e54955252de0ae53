//! Tunables for a single download.
//!
//! The defaults were found empirically against CDJ/XDJ players: more than four
//! outstanding READs did not raise throughput and only made the player drop
//! requests. They are defaults, not protocol limits.

use std::time::Duration;

use crate::error::DownloadError;

/// Bytes requested per READ call
pub const DEFAULT_CHUNK_SIZE: u32 = 1280;
/// Outstanding READ calls per download
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;
/// How long the write frontier may stand still before a stall is counted
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Stall checks tolerated before the download fails
pub const DEFAULT_MAX_STALL_RETRIES: u32 = 3;

/// Per-download configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadConfig {
    /// Maximum bytes per READ. Larger values are faster on a clean link but a
    /// lost reply costs more.
    pub chunk_size: u32,
    /// Maximum number of READ calls outstanding at once
    pub max_in_flight: usize,
    /// Time without frontier progress after which the transfer counts as stuck
    pub single_request_timeout: Duration,
    /// Number of stuck checks tolerated; the next one fails the transfer
    pub max_stall_retries: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            single_request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_stall_retries: DEFAULT_MAX_STALL_RETRIES,
        }
    }
}

impl DownloadConfig {
    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.single_request_timeout = timeout;
        self
    }

    pub fn with_max_stall_retries(mut self, retries: u32) -> Self {
        self.max_stall_retries = retries;
        self
    }

    /// Checks that the configuration can drive a transfer
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.chunk_size == 0 {
            return Err(DownloadError::InvalidConfig("chunk_size must be non-zero"));
        }
        if self.max_in_flight == 0 {
            return Err(DownloadError::InvalidConfig("max_in_flight must be non-zero"));
        }
        if self.single_request_timeout.is_zero() {
            return Err(DownloadError::InvalidConfig("single_request_timeout must be non-zero"));
        }
        Ok(())
    }

    /// Period of the timer that re-runs the stall check while no reply arrives
    pub(crate) fn stall_check_interval(&self) -> Duration {
        (self.single_request_timeout / 4).max(Duration::from_millis(1))
    }
}
