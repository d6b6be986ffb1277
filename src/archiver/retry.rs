//! Retry state machine for one work item
//!
//! ```text
//! Pending → Requesting(1) ─ Success ──────────────→ Splitting → Done
//!               │
//!               ├─ RateLimited / Failure, attempt < max → Waiting → Requesting(n+1)
//!               └─ RateLimited / Failure, attempt = max → Abandoned
//! ```
//!
//! Every request counts as an attempt, rate-limited ones included, so an item
//! that is throttled forever still terminates.

use crate::archiver::config::{failure_backoff, rate_limit_wait, MAX_ATTEMPTS};
use crate::source::FetchOutcome;
use std::time::Duration;

/// Position of a work item in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItemStatus {
    /// Planned, not yet checked or requested
    Pending,
    /// Already on disk
    Skipped,
    /// Request `attempt` in flight
    Requesting {
        /// 1-indexed attempt
        attempt: u32,
    },
    /// Backing off after attempt `attempt`
    Waiting {
        /// Attempt that just finished
        attempt: u32,
        /// Time to wait before the next attempt
        wait: Duration,
    },
    /// Response received, writing shards
    Splitting,
    /// Shards written
    Done,
    /// Given up after `attempts` requests
    Abandoned {
        /// Requests made
        attempts: u32,
    },
}

impl WorkItemStatus {
    /// Whether the item will not change state again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkItemStatus::Skipped | WorkItemStatus::Done | WorkItemStatus::Abandoned { .. }
        )
    }
}

/// Retry limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Requests allowed per work item
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Status entered when a request is about to be sent
    ///
    /// `Pending` starts attempt 1, `Waiting` starts the following attempt.
    /// Other states are returned unchanged.
    pub fn start_request(&self, status: WorkItemStatus) -> WorkItemStatus {
        match status {
            WorkItemStatus::Pending => WorkItemStatus::Requesting { attempt: 1 },
            WorkItemStatus::Waiting { attempt, .. } => WorkItemStatus::Requesting {
                attempt: attempt + 1,
            },
            other => other,
        }
    }

    /// Status after attempt `attempt` produced `outcome`
    pub fn on_outcome(&self, attempt: u32, outcome: &FetchOutcome) -> WorkItemStatus {
        let wait = match outcome {
            FetchOutcome::Success { .. } => return WorkItemStatus::Splitting,
            FetchOutcome::RateLimited { reset_seconds, .. } => rate_limit_wait(*reset_seconds),
            FetchOutcome::Failure { .. } => failure_backoff(attempt),
        };

        if attempt >= self.max_attempts {
            WorkItemStatus::Abandoned { attempts: attempt }
        } else {
            WorkItemStatus::Waiting { attempt, wait }
        }
    }
}
