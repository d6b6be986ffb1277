//! Upstream data source abstraction
//!
//! The archiver talks to the remote API only through [`TabularSource`]: one
//! metadata call listing the queryable entities, and one bulk fetch per work
//! item that lands a combined multi-entity file on disk.

use crate::registry::ResourceDescriptor;
use crate::Entity;
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

pub mod http;

/// Source errors
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP transport error (connect, timeout, TLS)
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Non-success status code
    #[error("unexpected status {status}: {body}")]
    StatusError {
        /// HTTP status code
        status: u16,
        /// Response body (truncated)
        body: String,
    },

    /// Response parse error
    #[error("parse error: {0}")]
    ParseError(String),

    /// IO error while writing a response
    #[error("IO error: {0}")]
    IoError(String),
}

/// Result type for source operations
pub type SourceResult<T> = Result<T, SourceError>;

/// Output format requested from the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// Comma-separated values with a header row
    Csv,
}

impl DataFormat {
    /// Value of the `output_format` query parameter
    pub fn as_param(&self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
        }
    }

    /// File extension used for artifacts and shards
    pub fn extension(&self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
        }
    }
}

/// Quota counters reported by the API alongside a response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    /// Requests left in the current second
    pub remaining_second: Option<u64>,
    /// Requests left in the current hour
    pub remaining_hour: Option<u64>,
    /// Seconds until the quota window resets
    pub reset_seconds: Option<u64>,
}

impl QuotaStatus {
    /// Whether the hourly quota is known to be used up
    pub fn hour_exhausted(&self) -> bool {
        self.remaining_hour == Some(0)
    }
}

/// One bulk request against the data endpoint
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    /// Resource being queried
    pub resource: &'a ResourceDescriptor,
    /// Parameters (columns) to return
    pub parameters: &'a [String],
    /// Entities to return
    pub entity_ids: &'a [String],
    /// Window start in API timestamp format
    pub start: String,
    /// Window end in API timestamp format
    pub end: String,
    /// Response format
    pub format: DataFormat,
    /// Where the combined response must be written
    pub target_path: PathBuf,
    /// Upper bound for the whole request
    pub timeout: Duration,
}

/// Result of one bulk fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Response written to `path`
    Success {
        /// Combined artifact path
        path: PathBuf,
        /// Quota reported with the response
        quota: QuotaStatus,
    },
    /// The API refused the request because a quota window is exhausted
    RateLimited {
        /// Seconds until the window resets
        reset_seconds: u64,
        /// Quota reported with the response
        quota: QuotaStatus,
    },
    /// Any other failure (network, timeout, non-2xx status, IO)
    Failure {
        /// Human-readable cause
        reason: String,
    },
}

impl FetchOutcome {
    /// Short label used for metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Success { .. } => "success",
            FetchOutcome::RateLimited { .. } => "rate_limited",
            FetchOutcome::Failure { .. } => "failure",
        }
    }
}

/// Upstream tabular-data API
#[async_trait]
pub trait TabularSource: Send + Sync {
    /// List all queryable entities of a resource with their validity start
    async fn list_entities(&self, resource: &ResourceDescriptor) -> SourceResult<Vec<Entity>>;

    /// Fetch one combined multi-entity response into `request.target_path`
    ///
    /// Never returns an error: every failure is folded into [`FetchOutcome`]
    /// so the retry controller can classify it.
    async fn fetch(&self, request: &FetchRequest<'_>) -> FetchOutcome;
}

#[async_trait]
impl<T: TabularSource + ?Sized> TabularSource for std::sync::Arc<T> {
    async fn list_entities(&self, resource: &ResourceDescriptor) -> SourceResult<Vec<Entity>> {
        (**self).list_entities(resource).await
    }

    async fn fetch(&self, request: &FetchRequest<'_>) -> FetchOutcome {
        (**self).fetch(request).await
    }
}
