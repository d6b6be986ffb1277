//! Request pacing
//!
//! Keeps a minimum gap between consecutive requests and, when the API reports
//! an exhausted hourly quota, holds the next request until the window resets.
//! The control loop is sequential, so the pacer is plain owned state.

use crate::archiver::config::{rate_limit_wait, MIN_REQUEST_DELAY_MS};
use crate::source::QuotaStatus;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

/// Reset assumed when an exhausted quota carries no reset hint
const FALLBACK_RESET_SECS: u64 = 60;

/// Sequential request pacer
#[derive(Debug)]
pub struct RequestPacer {
    min_delay: Duration,
    last_request: Option<Instant>,
    hold_until: Option<Instant>,
}

impl RequestPacer {
    /// Create a pacer; delays below the floor are raised to it
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay: min_delay.max(Duration::from_millis(MIN_REQUEST_DELAY_MS)),
            last_request: None,
            hold_until: None,
        }
    }

    /// Effective minimum delay
    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Wait until the next request may be sent and mark it as sent
    ///
    /// The gap is measured start-to-start: a request that itself took longer
    /// than the minimum delay lets the next one go out immediately. Returns
    /// the time actually waited.
    pub async fn ready(&mut self) -> Duration {
        let now = Instant::now();
        let mut next = self.last_request.map_or(now, |last| last + self.min_delay);
        if let Some(hold) = self.hold_until.take() {
            next = next.max(hold);
        }

        let waited = next.saturating_duration_since(now);
        if !waited.is_zero() {
            debug!(wait_ms = waited.as_millis() as u64, "Pacing request");
            sleep_until(next).await;
        }

        self.last_request = Some(Instant::now());
        waited
    }

    /// Hold the next request for at least `wait` from now
    pub fn hold_for(&mut self, wait: Duration) {
        let until = Instant::now() + wait;
        self.hold_until = Some(self.hold_until.map_or(until, |h| h.max(until)));
    }

    /// Inspect quota counters from a successful response
    pub fn observe(&mut self, quota: &QuotaStatus) {
        if quota.hour_exhausted() {
            let wait = rate_limit_wait(quota.reset_seconds.unwrap_or(FALLBACK_RESET_SECS));
            info!(
                wait_secs = wait.as_secs(),
                "Hourly quota exhausted, holding next request"
            );
            self.hold_for(wait);
        }
    }
}
