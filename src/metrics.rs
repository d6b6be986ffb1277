//! Prometheus metrics for archive runs
//!
//! Request outcomes, backoff waits, work item results and shard writes are
//! recorded through the `metrics` facade. Without an installed exporter every
//! call is a no-op, so the library records unconditionally and the binary
//! decides whether to expose a scrape endpoint.

use crate::source::{FetchOutcome, QuotaStatus};
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Initialize the Prometheus exporter
///
/// Idempotent: later calls are ignored.
///
/// # Arguments
/// * `addr` - Socket address of the scrape endpoint (e.g., "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "archiver_requests_total",
        Unit::Count,
        "Bulk data requests by outcome"
    );
    describe_histogram!(
        "archiver_request_duration_seconds",
        Unit::Seconds,
        "Bulk data request duration"
    );
    describe_histogram!(
        "archiver_backoff_seconds",
        Unit::Seconds,
        "Wait applied before retrying a work item"
    );
    describe_counter!(
        "archiver_work_items_total",
        Unit::Count,
        "Work items by final status"
    );
    describe_counter!(
        "archiver_shards_written_total",
        Unit::Count,
        "Per-entity shards created or replaced"
    );
    describe_counter!(
        "archiver_shard_errors_total",
        Unit::Count,
        "Per-entity shard failures"
    );
    describe_gauge!(
        "archiver_quota_remaining_hour",
        Unit::Count,
        "Requests left in the current hourly quota window"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Whether [`init_metrics`] has completed
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Timing of one bulk request
pub struct RequestMetrics {
    resource: String,
    attempt: u32,
    start_time: Instant,
}

impl RequestMetrics {
    /// Start timing a request
    pub fn start(resource: impl Into<String>, attempt: u32) -> Self {
        Self {
            resource: resource.into(),
            attempt,
            start_time: Instant::now(),
        }
    }

    /// Record the outcome of the request
    pub fn record(&self, outcome: &FetchOutcome) {
        let duration = self.start_time.elapsed();

        counter!(
            "archiver_requests_total",
            "resource" => self.resource.clone(),
            "outcome" => outcome.label(),
            "attempt" => self.attempt.to_string(),
        )
        .increment(1);

        histogram!(
            "archiver_request_duration_seconds",
            "resource" => self.resource.clone(),
        )
        .record(duration.as_secs_f64());

        match outcome {
            FetchOutcome::Success { quota, .. } | FetchOutcome::RateLimited { quota, .. } => {
                record_quota(quota)
            }
            FetchOutcome::Failure { .. } => {}
        }
    }
}

/// Record the remaining hourly quota when the API reported it
pub fn record_quota(quota: &QuotaStatus) {
    if let Some(remaining) = quota.remaining_hour {
        gauge!("archiver_quota_remaining_hour").set(remaining as f64);
    }
}

/// Record a retry wait
pub fn record_backoff(reason: &'static str, wait: Duration) {
    histogram!("archiver_backoff_seconds", "reason" => reason).record(wait.as_secs_f64());
}

/// Record the final status of a work item
pub fn record_work_item(status: &'static str) {
    counter!("archiver_work_items_total", "status" => status).increment(1);
}

/// Record shard results of one split
pub fn record_shards(written: usize, errors: usize) {
    counter!("archiver_shards_written_total").increment(written as u64);
    if errors > 0 {
        counter!("archiver_shard_errors_total").increment(errors as u64);
    }
}
