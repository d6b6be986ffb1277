//! # Tabular Archiver Library
//!
//! An incremental, rate-limit-aware bulk archiver for station time-series APIs.
//! It fetches years of per-entity data from a service that caps the number of
//! values per request and enforces per-second and per-hour request quotas,
//! and stores the result as one file per entity per day.
//!
//! ## Features
//!
//! - **Request sizing**: entity groups are sized so no request exceeds the API's value ceiling
//! - **Resume Capability**: completed work is derived from the files on disk, so an
//!   interrupted run can simply be restarted
//! - **Rate Limiting**: a request pacer plus quota-aware backoff on 429 responses
//! - **Typed resources**: a closed registry of resource descriptors validated at startup
//!
//! ## Quick Start
//!
//! ```no_run
//! use tabular_archiver::archiver::{Archiver, RunConfig};
//! use tabular_archiver::registry::ResourceRegistry;
//! use tabular_archiver::source::http::HttpSource;
//! use tabular_archiver::Granularity;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ResourceRegistry::load().map_err(|e| e.to_string())?;
//! let resource = registry.get("station-daily")?.clone();
//!
//! let config = RunConfig::new(resource, vec!["tl".into(), "rr".into()], "./archive")
//!     .with_granularity(Granularity::Month);
//!
//! let source = HttpSource::new("https://dataset.example.org/v1")?;
//! let summary = Archiver::new(config, source).run().await?;
//! println!("downloaded {} batches", summary.downloaded);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`registry`] - Typed resource descriptors
//! - [`source`] - Upstream API seam ([`source::TabularSource`]) and its HTTP implementation
//! - [`archiver`] - Resolver, planner, retry state machine, pacing and the control loop
//! - [`archive`] - On-disk layout, existence prober, shard writer and archive lock
//! - [`metrics`] - Prometheus metrics
//! - [`cli`] - Command-line surface

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// On-disk archive layout, prober, shard writer and lock
pub mod archive;

/// Run orchestration
pub mod archiver;

/// CLI command implementations
pub mod cli;

/// Metrics collection
pub mod metrics;

/// Registry of resource descriptors
pub mod registry;

/// Upstream data source abstraction
pub mod source;

pub use archiver::{Archiver, RunConfig, RunSummary};
pub use registry::{ResourceDescriptor, ResourceRegistry};

/// One addressable data source (e.g., a monitoring station)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    /// Entity id as used by the API
    pub id: String,
    /// First day with data
    pub valid_from: NaiveDate,
}

impl Entity {
    /// Create a new entity
    pub fn new(id: impl Into<String>, valid_from: NaiveDate) -> Self {
        Self {
            id: id.into(),
            valid_from,
        }
    }
}

/// Size of one planned time bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One calendar day
    Day,
    /// Seven consecutive days, anchored at the run start
    Week,
    /// One calendar month
    Month,
    /// One calendar year
    Year,
}

impl Granularity {
    /// Longest bucket this granularity can produce, in days
    pub fn max_days(&self) -> u32 {
        match self {
            Granularity::Day => 1,
            Granularity::Week => 7,
            Granularity::Month => 31,
            Granularity::Year => 366,
        }
    }

    /// Natural last day of a bucket starting at `start` (not clipped to the run end)
    ///
    /// Returns `None` only when the date falls outside chrono's range.
    pub fn bucket_end(&self, start: NaiveDate) -> Option<NaiveDate> {
        match self {
            Granularity::Day => Some(start),
            Granularity::Week => start.checked_add_days(Days::new(6)),
            Granularity::Month => {
                let (year, month) = if start.month() == 12 {
                    (start.year() + 1, 1)
                } else {
                    (start.year(), start.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1)?.pred_opt()
            }
            Granularity::Year => NaiveDate::from_ymd_opt(start.year(), 12, 31),
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::Year => "year",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "day" | "daily" => Ok(Granularity::Day),
            "week" | "weekly" => Ok(Granularity::Week),
            "month" | "monthly" => Ok(Granularity::Month),
            "year" | "yearly" => Ok(Granularity::Year),
            _ => Err(format!(
                "Invalid granularity: {s}. Valid options: day, week, month, year"
            )),
        }
    }
}
