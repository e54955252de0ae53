//! Stuck-transfer detection.
//!
//! A transfer is stuck when the write frontier has not moved for longer than
//! the request timeout while the block it needs is still missing. Later
//! blocks may keep arriving; only frontier progress resets the clock.
//!
//! Detection does not re-send anything. A detected stall only pauses new
//! requests for one cycle so the struggling server can drain what it already
//! has, and consumes one unit of the retry budget. Exhausting the budget is
//! fatal.

use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

/// Verdict of one stall check
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum StallCheck {
    /// Frontier is moving, or its block is already buffered
    Progressing,
    /// Stuck; skip issuing requests this cycle
    Backoff { attempt: u32 },
    /// Stuck more often than the budget allows
    Exhausted { attempts: u32 },
}

pub(crate) struct StallDetector {
    timeout: Duration,
    max_retries: u32,
    retries: u32,
    last_progress: Instant,
}

impl StallDetector {
    /// Starts the progress clock now
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self { timeout, max_retries, retries: 0, last_progress: Instant::now() }
    }

    /// Called whenever bytes are written at the frontier
    pub fn record_progress(&mut self) {
        self.last_progress = Instant::now();
        self.retries = 0;
    }

    /// Evaluates the frontier
    ///
    /// # Arguments
    ///
    /// * `frontier` - Offset of the next byte to be written, for logging
    /// * `waiting` - `true` if the transfer is incomplete and the frontier
    ///   block has not been received
    pub fn check(&mut self, frontier: u64, waiting: bool) -> StallCheck {
        if !waiting || self.last_progress.elapsed() <= self.timeout {
            return StallCheck::Progressing;
        }
        self.retries += 1;
        if self.retries > self.max_retries {
            return StallCheck::Exhausted { attempts: self.retries };
        }
        warn!(
            "read at offset {} appears stuck, backing off ({}/{})",
            frontier, self.retries, self.max_retries
        );
        self.last_progress = Instant::now();
        StallCheck::Backoff { attempt: self.retries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(2);

    #[tokio::test(start_paused = true)]
    async fn quiet_within_timeout() {
        let mut detector = StallDetector::new(TIMEOUT, 3);
        tokio::time::advance(TIMEOUT).await;
        assert_eq!(detector.check(0, true), StallCheck::Progressing);
    }

    #[tokio::test(start_paused = true)]
    async fn buffered_frontier_is_not_a_stall() {
        let mut detector = StallDetector::new(TIMEOUT, 3);
        tokio::time::advance(TIMEOUT * 10).await;
        assert_eq!(detector.check(0, false), StallCheck::Progressing);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_budget() {
        let mut detector = StallDetector::new(TIMEOUT, 2);
        for attempt in 1..=2 {
            tokio::time::advance(TIMEOUT + Duration::from_millis(1)).await;
            assert_eq!(detector.check(128, true), StallCheck::Backoff { attempt });
            // the clock was reset by the backoff
            assert_eq!(detector.check(128, true), StallCheck::Progressing);
        }
        tokio::time::advance(TIMEOUT + Duration::from_millis(1)).await;
        assert_eq!(detector.check(128, true), StallCheck::Exhausted { attempts: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn progress_resets_budget() {
        let mut detector = StallDetector::new(TIMEOUT, 1);
        tokio::time::advance(TIMEOUT * 2).await;
        assert_eq!(detector.check(0, true), StallCheck::Backoff { attempt: 1 });
        detector.record_progress();
        tokio::time::advance(TIMEOUT * 2).await;
        assert_eq!(detector.check(0, true), StallCheck::Backoff { attempt: 1 });
    }
}
