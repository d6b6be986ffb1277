//! Sequential control loop of an archive run

use crate::archive::{ArchiveLayout, ArchiveLock, ArchiveProber, ShardWriter};
use crate::archiver::acquire::AcquisitionClient;
use crate::archiver::pacer::RequestPacer;
use crate::archiver::planner::{plan, PlanInput, WorkItem};
use crate::archiver::resolver::{filter_entities, resolve_entities};
use crate::archiver::retry::{RetryPolicy, WorkItemStatus};
use crate::archiver::{ArchiveError, RunConfig, RunSummary, WorkItemFailure};
use crate::metrics::{record_backoff, record_shards, record_work_item, RequestMetrics};
use crate::source::{DataFormat, FetchOutcome, TabularSource};
use indicatif::ProgressBar;
use tokio::time::sleep;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Runs one archive job against a [`TabularSource`]
pub struct Archiver<S> {
    config: RunConfig,
    source: S,
    policy: RetryPolicy,
    progress: Option<ProgressBar>,
}

/// Per-run state threaded through the work items
struct RunState<'a, S: ?Sized> {
    client: AcquisitionClient<'a, S>,
    writer: ShardWriter,
    pacer: RequestPacer,
    summary: RunSummary,
}

impl<S: TabularSource> Archiver<S> {
    /// Create an archiver with the default retry policy
    pub fn new(config: RunConfig, source: S) -> Self {
        Self {
            config,
            source,
            policy: RetryPolicy::default(),
            progress: None,
        }
    }

    /// Override the retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Report progress over the queued work items
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run configuration
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Underlying source
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Execute the run
    ///
    /// # Errors
    /// Only fatal conditions: invalid configuration, archive lock held,
    /// metadata unavailable after all attempts, invalid date range.
    pub async fn run(&self) -> Result<RunSummary, ArchiveError> {
        let span = info_span!(
            "archive_run",
            resource = %self.config.resource.id(),
            granularity = %self.config.granularity,
            root = %self.config.archive_root.display()
        );
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&self) -> Result<RunSummary, ArchiveError> {
        let config = &self.config;
        config.validate()?;
        let resource = &config.resource;

        info!(parameters = ?config.parameters, "Starting archive run");

        let layout = ArchiveLayout::new(
            &config.archive_root,
            resource.id(),
            DataFormat::Csv.extension(),
        );
        let _lock = ArchiveLock::try_acquire(layout.root())?;

        let mut pacer = RequestPacer::new(config.request_delay);
        let entities = resolve_entities(&self.source, resource, &mut pacer).await?;
        let entities = filter_entities(entities, config.entities.as_deref());

        let plan = plan(
            resource,
            &layout,
            &PlanInput {
                entities: &entities,
                num_parameters: config.parameters.len(),
                start: config.start,
                end: config.end,
                today: config.today(),
                granularity: config.granularity,
                group_size: config.group_size,
                min_group_size: config.min_group_size,
            },
        )?;

        info!(
            entities = entities.len(),
            start = %plan.start,
            end = %plan.end,
            buckets = plan.buckets.len(),
            groups = plan.groups.len(),
            group_size = plan.group_size,
            work_items = plan.items.len(),
            "Plan ready"
        );

        let mut prober = ArchiveProber::new(layout.clone()).with_valid_from(&entities);
        let mut state = RunState {
            client: AcquisitionClient::new(
                &self.source,
                resource,
                &config.parameters,
                config.timeout,
            ),
            writer: ShardWriter::new(layout),
            pacer,
            summary: RunSummary {
                total_work_items: plan.items.len(),
                ..Default::default()
            },
        };

        let mut queue = Vec::new();
        for mut item in plan.items {
            state.summary.checked += 1;
            if prober.is_satisfied(&item) {
                item.status = WorkItemStatus::Skipped;
                state.summary.skipped += 1;
                record_work_item("skipped");
            } else {
                queue.push(item);
            }
        }

        info!(
            queued = queue.len(),
            skipped = state.summary.skipped,
            "Existing shards checked"
        );

        if let Some(progress) = &self.progress {
            progress.set_length(queue.len() as u64);
        }

        for mut item in queue {
            let span = info_span!(
                "work_item",
                batch = %item.label(),
                entities = item.group.len(),
                start = %item.bucket.start,
                end = %item.bucket.end
            );
            self.process_item(&mut state, &mut item)
                .instrument(span)
                .await;

            if let Some(progress) = &self.progress {
                progress.inc(1);
            }
        }

        if let Some(progress) = &self.progress {
            progress.finish_and_clear();
        }

        let summary = state.summary;
        info!(
            total = summary.total_work_items,
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            failed = summary.failed,
            rate_limited = summary.rate_limited,
            shards_written = summary.shards_written,
            shard_errors = summary.shard_errors,
            "Archive run finished"
        );
        Ok(summary)
    }

    /// Drive one work item to a terminal state
    async fn process_item(&self, state: &mut RunState<'_, S>, item: &mut WorkItem) {
        let resource_id = self.config.resource.id();
        item.status = self.policy.start_request(item.status);

        while let WorkItemStatus::Requesting { attempt } = item.status {
            state.pacer.ready().await;

            let metrics = RequestMetrics::start(resource_id, attempt);
            let outcome = state.client.acquire(item).await;
            metrics.record(&outcome);

            if matches!(outcome, FetchOutcome::RateLimited { .. }) {
                state.summary.rate_limited += 1;
            }

            item.status = self.policy.on_outcome(attempt, &outcome);
            match (item.status, outcome) {
                (WorkItemStatus::Splitting, FetchOutcome::Success { path, quota }) => {
                    state.pacer.observe(&quota);
                    self.split(state, item, &path, attempt);
                }
                (WorkItemStatus::Waiting { wait, .. }, outcome) => {
                    let reason = outcome.label();
                    warn!(
                        attempt,
                        outcome = reason,
                        wait_secs = wait.as_secs(),
                        detail = %describe(&outcome),
                        "Request did not succeed, backing off"
                    );
                    record_backoff(reason, wait);
                    sleep(wait).await;
                    item.status = self.policy.start_request(item.status);
                }
                (WorkItemStatus::Abandoned { attempts }, outcome) => {
                    self.abandon(state, item, attempts, describe(&outcome));
                }
                (status, outcome) => {
                    // on_outcome only yields Splitting for a success
                    error!(?status, outcome = outcome.label(), "Inconsistent work item state");
                    self.abandon(state, item, attempt, describe(&outcome));
                }
            }
        }
    }

    fn split(
        &self,
        state: &mut RunState<'_, S>,
        item: &mut WorkItem,
        artifact: &std::path::Path,
        attempt: u32,
    ) {
        match state.writer.split(artifact, &item.bucket) {
            Ok(report) => {
                for (entity, err) in &report.entity_errors {
                    warn!(entity = %entity, error = %err, "Entity shard not written");
                }

                state.summary.downloaded += 1;
                state.summary.shards_written += report.shards_written;
                state.summary.shards_kept += report.shards_kept;
                state.summary.shard_errors += report.entity_errors.len();
                record_shards(report.shards_written, report.entity_errors.len());
                record_work_item("downloaded");

                item.status = WorkItemStatus::Done;
                debug!(
                    shards_written = report.shards_written,
                    shards_kept = report.shards_kept,
                    rows_skipped = report.rows_skipped,
                    "Work item done"
                );
            }
            Err(e) => {
                error!(error = %e, artifact = %artifact.display(), "Failed to split response");
                self.abandon(state, item, attempt, e.to_string());
            }
        }
    }

    fn abandon(&self, state: &mut RunState<'_, S>, item: &mut WorkItem, attempts: u32, reason: String) {
        error!(attempts, reason = %reason, "Work item abandoned");
        item.status = WorkItemStatus::Abandoned { attempts };
        state.summary.failed += 1;
        state.summary.failures.push(WorkItemFailure {
            batch: item.label(),
            attempts,
            reason,
        });
        record_work_item("failed");
    }
}

fn describe(outcome: &FetchOutcome) -> String {
    match outcome {
        FetchOutcome::Success { path, .. } => format!("response at {}", path.display()),
        FetchOutcome::RateLimited { reset_seconds, .. } => {
            format!("rate limited (reset in {reset_seconds}s)")
        }
        FetchOutcome::Failure { reason } => reason.clone(),
    }
}
