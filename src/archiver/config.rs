//! Run configuration and timing constants

use crate::archiver::ArchiveError;
use crate::registry::ResourceDescriptor;
use crate::Granularity;
use chrono::{NaiveDate, Utc};
use std::path::PathBuf;
use std::time::Duration;

/// Attempts made by the metadata resolver before the run aborts
pub const RESOLVER_MAX_ATTEMPTS: u32 = 5;

/// Resolver wait step; attempt k waits `(k-1) * RESOLVER_WAIT_STEP_SECS`
pub const RESOLVER_WAIT_STEP_SECS: u64 = 30;

/// Requests per work item before it is abandoned (rate-limited ones included)
pub const MAX_ATTEMPTS: u32 = 3;

/// Margin added to the server-reported reset time
pub const RATE_LIMIT_MARGIN_SECS: u64 = 10;

/// Upper bound for any quota wait
pub const MAX_RATE_LIMIT_WAIT_SECS: u64 = 300;

/// First failure backoff; doubles per attempt
pub const INITIAL_BACKOFF_SECS: u64 = 5;

/// Floor (and default) for the delay between two requests
pub const MIN_REQUEST_DELAY_MS: u64 = 200;

/// Default per-request timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default lower bound for computed group sizes
pub const DEFAULT_MIN_GROUP_SIZE: usize = 1;

/// Wait before resolver attempt `attempt` (1-indexed)
pub fn resolver_wait(attempt: u32) -> Duration {
    Duration::from_secs(RESOLVER_WAIT_STEP_SECS * u64::from(attempt.saturating_sub(1)))
}

/// Wait after a rate-limited response
pub fn rate_limit_wait(reset_seconds: u64) -> Duration {
    Duration::from_secs(
        reset_seconds
            .saturating_add(RATE_LIMIT_MARGIN_SECS)
            .min(MAX_RATE_LIMIT_WAIT_SECS),
    )
}

/// Wait after failed attempt `attempt` (1-indexed)
pub fn failure_backoff(attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_secs(INITIAL_BACKOFF_SECS.saturating_mul(factor))
}

/// Parameters of one archive run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Resource to archive
    pub resource: ResourceDescriptor,
    /// Parameters (columns) requested for every entity
    pub parameters: Vec<String>,
    /// Archive root directory
    pub archive_root: PathBuf,
    /// Explicit first day; defaults to the earliest `valid_from`
    pub start: Option<NaiveDate>,
    /// Explicit last day; defaults to today
    pub end: Option<NaiveDate>,
    /// Restrict the run to these entity ids
    pub entities: Option<Vec<String>>,
    /// Explicit group size, overriding the computed one
    pub group_size: Option<usize>,
    /// Lower bound for the computed group size
    pub min_group_size: usize,
    /// Bucket size
    pub granularity: Granularity,
    /// Minimum delay between two requests
    pub request_delay: Duration,
    /// Per-request timeout
    pub timeout: Duration,
    /// Day treated as "today" (defaults to the current UTC date)
    pub today: Option<NaiveDate>,
}

impl RunConfig {
    /// Create a configuration with defaults
    pub fn new(
        resource: ResourceDescriptor,
        parameters: Vec<String>,
        archive_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            resource,
            parameters,
            archive_root: archive_root.into(),
            start: None,
            end: None,
            entities: None,
            group_size: None,
            min_group_size: DEFAULT_MIN_GROUP_SIZE,
            granularity: Granularity::Month,
            request_delay: Duration::from_millis(MIN_REQUEST_DELAY_MS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            today: None,
        }
    }

    /// Set the bucket granularity
    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    /// Set both ends of the window
    pub fn with_date_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    /// Set the first day
    pub fn with_start(mut self, start: NaiveDate) -> Self {
        self.start = Some(start);
        self
    }

    /// Set the last day
    pub fn with_end(mut self, end: NaiveDate) -> Self {
        self.end = Some(end);
        self
    }

    /// Restrict the run to a subset of entities
    pub fn with_entities(mut self, ids: Vec<String>) -> Self {
        self.entities = Some(ids);
        self
    }

    /// Force a group size
    pub fn with_group_size(mut self, size: usize) -> Self {
        self.group_size = Some(size);
        self
    }

    /// Set the lower bound for computed group sizes
    pub fn with_min_group_size(mut self, size: usize) -> Self {
        self.min_group_size = size;
        self
    }

    /// Set the delay between requests (raised to the floor if lower)
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay.max(Duration::from_millis(MIN_REQUEST_DELAY_MS));
        self
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pin "today" (used when no end date is given)
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Effective "today"
    pub fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Check the configuration before any I/O
    pub fn validate(&self) -> Result<(), ArchiveError> {
        if self.parameters.is_empty() {
            return Err(ArchiveError::InvalidConfig(
                "at least one parameter is required".to_string(),
            ));
        }
        if let Some(p) = self.parameters.iter().find(|p| p.trim().is_empty()) {
            return Err(ArchiveError::InvalidConfig(format!(
                "empty parameter name: {p:?}"
            )));
        }
        if self.group_size == Some(0) {
            return Err(ArchiveError::InvalidConfig(
                "group size must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ArchiveError::InvalidConfig(
                "request timeout must be positive".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(ArchiveError::InvalidDateRange { start, end });
            }
        }
        self.resource.validate()?;
        Ok(())
    }
}
