//! Bulk acquisition of one work item

use crate::archiver::planner::WorkItem;
use crate::registry::ResourceDescriptor;
use crate::source::{DataFormat, FetchOutcome, FetchRequest, TabularSource};
use std::time::Duration;
use tracing::warn;

/// Issues the bulk request for a work item
pub struct AcquisitionClient<'a, S: ?Sized> {
    source: &'a S,
    resource: &'a ResourceDescriptor,
    parameters: &'a [String],
    timeout: Duration,
}

impl<'a, S: TabularSource + ?Sized> AcquisitionClient<'a, S> {
    /// Create a client bound to one resource and parameter list
    pub fn new(
        source: &'a S,
        resource: &'a ResourceDescriptor,
        parameters: &'a [String],
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            resource,
            parameters,
            timeout,
        }
    }

    /// Build the request for `item`
    pub fn request_for<'b>(&'b self, item: &'b WorkItem) -> FetchRequest<'b> {
        FetchRequest {
            resource: self.resource,
            parameters: self.parameters,
            entity_ids: item.group.ids(),
            start: item.bucket.api_start(),
            end: item.bucket.api_end(),
            format: DataFormat::Csv,
            target_path: item.target_path.clone(),
            timeout: self.timeout,
        }
    }

    /// Fetch the combined response for `item`
    ///
    /// The whole call is bounded by the request timeout; expiry is reported as
    /// a [`FetchOutcome::Failure`].
    pub async fn acquire(&self, item: &WorkItem) -> FetchOutcome {
        let request = self.request_for(item);
        match tokio::time::timeout(self.timeout, self.source.fetch(&request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    batch = %item.label(),
                    timeout_secs = self.timeout.as_secs(),
                    "Request timed out"
                );
                FetchOutcome::Failure {
                    reason: format!("request timed out after {}s", self.timeout.as_secs()),
                }
            }
        }
    }
}
