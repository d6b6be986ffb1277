//! Run orchestration
//!
//! One run goes through these steps:
//!
//! 1. **Lock**: take the exclusive [`crate::archive::ArchiveLock`] for the resource
//! 2. **Resolve**: list entities via [`resolver::resolve_entities`] (5 attempts, linear waits)
//! 3. **Plan**: cut the window into buckets and the entities into groups ([`planner`])
//! 4. **Probe**: skip work items whose shards already exist ([`crate::archive::ArchiveProber`])
//! 5. **Acquire**: one paced bulk request per remaining item ([`acquire::AcquisitionClient`]),
//!    driven by the [`retry`] state machine
//! 6. **Split**: write per-entity shards ([`crate::archive::ShardWriter`])
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tabular_archiver::archiver::{Archiver, RunConfig};
//! use tabular_archiver::registry::ResourceRegistry;
//! use tabular_archiver::source::http::HttpSource;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ResourceRegistry::load_embedded()?;
//! let resource = registry.get("station-hourly")?.clone();
//! let config = RunConfig::new(resource, vec!["tl".into()], "./archive");
//!
//! let source = Arc::new(HttpSource::new("https://dataset.example.org/v1")?);
//! let summary = Archiver::new(config, source).run().await?;
//! assert_eq!(
//!     summary.skipped + summary.downloaded + summary.failed,
//!     summary.total_work_items
//! );
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Only [`ArchiveError`] stops a run. Request failures, rate limits and shard
//! errors are isolated to their work item or entity and reported through
//! [`RunSummary`].

use crate::archive::lock::LockError;
use crate::registry::RegistryError;
use chrono::NaiveDate;
use serde::Serialize;

pub mod acquire;
pub mod config;
pub mod executor;
pub mod pacer;
pub mod planner;
pub mod resolver;
pub mod retry;

pub use config::RunConfig;
pub use executor::Archiver;
pub use planner::{EntityGroup, Plan, TimeBucket, WorkItem};
pub use retry::{RetryPolicy, WorkItemStatus};

/// Errors that abort a run
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Entity metadata could not be fetched
    #[error("metadata fetch failed after {attempts} attempts: {last_error}")]
    MetadataFetch {
        /// Attempts made
        attempts: u32,
        /// Cause of the last failure
        last_error: String,
    },

    /// Start date lies after end date
    #[error("invalid date range: start {start} is after end {end}")]
    InvalidDateRange {
        /// First day
        start: NaiveDate,
        /// Last day
        end: NaiveDate,
    },

    /// Registry lookup or validation error
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Configuration rejected before any I/O
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Another run holds the archive lock
    #[error("{0}")]
    Locked(String),

    /// Filesystem error outside a single work item
    #[error("IO error: {0}")]
    Io(String),
}

impl From<LockError> for ArchiveError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Held(_) => ArchiveError::Locked(err.to_string()),
            LockError::IoError(msg) => ArchiveError::Io(msg),
        }
    }
}

/// A work item given up on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkItemFailure {
    /// Batch file name of the item
    pub batch: String,
    /// Requests made
    pub attempts: u32,
    /// Last failure cause
    pub reason: String,
}

/// Counters of one run
///
/// `skipped + downloaded + failed == total_work_items` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Planned work items
    pub total_work_items: usize,
    /// Items probed against the archive
    pub checked: usize,
    /// Items fetched and split
    pub downloaded: usize,
    /// Items already present on disk
    pub skipped: usize,
    /// Items abandoned
    pub failed: usize,
    /// Rate-limited responses received
    pub rate_limited: usize,
    /// Shards created or replaced
    pub shards_written: usize,
    /// Existing shards kept by the overwrite policy
    pub shards_kept: usize,
    /// Per-entity shard failures
    pub shard_errors: usize,
    /// Abandoned items
    pub failures: Vec<WorkItemFailure>,
}

impl RunSummary {
    /// Whether every planned item reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.skipped + self.downloaded + self.failed == self.total_work_items
    }
}
