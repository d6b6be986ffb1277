//! Batch planning: time buckets × entity groups
//!
//! The overall window is cut into contiguous, non-overlapping [`TimeBucket`]s
//! and the entity list into [`EntityGroup`]s small enough that one request
//! never exceeds the resource's value ceiling. Every (bucket, group) pair is
//! one [`WorkItem`] with a deterministic batch artifact path.

use crate::archive::ArchiveLayout;
use crate::archiver::retry::WorkItemStatus;
use crate::archiver::ArchiveError;
use crate::registry::ResourceDescriptor;
use crate::{Entity, Granularity};
use chrono::{Days, NaiveDate};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Window start as sent to the API
const API_START_FORMAT: &str = "%Y-%m-%dT00:00";
/// Window end as sent to the API (inclusive end of day)
const API_END_FORMAT: &str = "%Y-%m-%dT23:59";
/// Compact date tag used in batch filenames
const DATE_TAG_FORMAT: &str = "%Y%m%d";
/// Hex characters of the group hash kept in batch filenames
const GROUP_HASH_LEN: usize = 8;

/// Inclusive date window covered by one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeBucket {
    /// First day (inclusive)
    pub start: NaiveDate,
    /// Last day (inclusive)
    pub end: NaiveDate,
}

impl TimeBucket {
    /// Create a bucket
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Start timestamp in the API's format
    pub fn api_start(&self) -> String {
        self.start.format(API_START_FORMAT).to_string()
    }

    /// End timestamp in the API's format
    pub fn api_end(&self) -> String {
        self.end.format(API_END_FORMAT).to_string()
    }

    /// Compact start tag (YYYYMMDD)
    pub fn start_tag(&self) -> String {
        self.start.format(DATE_TAG_FORMAT).to_string()
    }

    /// Compact end tag (YYYYMMDD)
    pub fn end_tag(&self) -> String {
        self.end.format(DATE_TAG_FORMAT).to_string()
    }

    /// Whether `day` lies inside the bucket
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Number of days covered
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// Ordered chunk of entity ids queried together
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EntityGroup {
    ids: Vec<String>,
}

impl EntityGroup {
    /// Create a group from ids in request order
    pub fn new(ids: Vec<String>) -> Self {
        Self { ids }
    }

    /// Ids in request order
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Number of entities
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the group is empty
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether the group contains `id`
    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|i| i == id)
    }

    /// Stable short hash of the sorted id list
    ///
    /// Identical groups map to the same value across runs regardless of order.
    pub fn hash8(&self) -> String {
        let mut sorted: Vec<&str> = self.ids.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        let digest = Sha256::digest(sorted.join(",").as_bytes());
        let hex = format!("{digest:x}");
        hex[..GROUP_HASH_LEN].to_string()
    }
}

/// One planned upstream request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Time window
    pub bucket: TimeBucket,
    /// Entities requested
    pub group: EntityGroup,
    /// Path of the combined batch artifact
    pub target_path: PathBuf,
    /// Position in the retry state machine
    pub status: WorkItemStatus,
}

impl WorkItem {
    /// Batch file name, used as a short label in logs
    pub fn label(&self) -> String {
        self.target_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Inputs of the planner that vary per run
#[derive(Debug, Clone)]
pub struct PlanInput<'a> {
    /// Target entities in resolver order
    pub entities: &'a [Entity],
    /// Number of requested parameters
    pub num_parameters: usize,
    /// Explicit first day
    pub start: Option<NaiveDate>,
    /// Explicit last day
    pub end: Option<NaiveDate>,
    /// Day used when no end is given
    pub today: NaiveDate,
    /// Bucket size
    pub granularity: Granularity,
    /// Explicit group size, overriding the computed one
    pub group_size: Option<usize>,
    /// Lower bound for the computed group size
    pub min_group_size: usize,
}

/// Result of planning
#[derive(Debug, Clone)]
pub struct Plan {
    /// Effective first day
    pub start: NaiveDate,
    /// Effective last day
    pub end: NaiveDate,
    /// Contiguous buckets covering `[start, end]`
    pub buckets: Vec<TimeBucket>,
    /// Entity partition
    pub groups: Vec<EntityGroup>,
    /// Group size used for the partition
    pub group_size: usize,
    /// Buckets × groups, bucket-major
    pub items: Vec<WorkItem>,
}

/// Cut `[start, end]` into contiguous buckets of the given granularity
///
/// # Errors
/// [`ArchiveError::InvalidDateRange`] when `start > end`.
pub fn plan_buckets(
    start: NaiveDate,
    end: NaiveDate,
    granularity: Granularity,
) -> Result<Vec<TimeBucket>, ArchiveError> {
    if start > end {
        return Err(ArchiveError::InvalidDateRange { start, end });
    }

    let mut buckets = Vec::new();
    let mut cursor = start;
    loop {
        let natural_end = granularity.bucket_end(cursor).unwrap_or(end);
        let bucket_end = natural_end.min(end);
        buckets.push(TimeBucket::new(cursor, bucket_end));

        if bucket_end >= end {
            break;
        }
        match bucket_end.checked_add_days(Days::new(1)) {
            Some(next) => cursor = next,
            None => break,
        }
    }

    Ok(buckets)
}

/// Largest group size keeping one request under the value ceiling
///
/// `floor(max_values / (num_parameters * time_steps_in_one_bucket))`, raised
/// to `min_group_size` (itself at least 1).
pub fn compute_group_size(
    resource: &ResourceDescriptor,
    num_parameters: usize,
    granularity: Granularity,
    min_group_size: usize,
) -> usize {
    let steps = resource.time_steps_in_days(granularity.max_days());
    let values_per_entity = (num_parameters.max(1) as u64).saturating_mul(steps);
    let fit = resource.max_values_per_request() / values_per_entity.max(1);
    let fit = usize::try_from(fit).unwrap_or(usize::MAX);
    fit.max(min_group_size).max(1)
}

/// Partition ids into ordered chunks of at most `group_size`
pub fn plan_groups(ids: &[String], group_size: usize) -> Vec<EntityGroup> {
    ids.chunks(group_size.max(1))
        .map(|chunk| EntityGroup::new(chunk.to_vec()))
        .collect()
}

/// Batch artifact path for a (bucket, group) pair
pub fn batch_path(layout: &ArchiveLayout, bucket: &TimeBucket, group: &EntityGroup) -> PathBuf {
    layout.batch_dir().join(format!(
        "batch_{}_to_{}_{}.{}",
        bucket.start_tag(),
        bucket.end_tag(),
        group.hash8(),
        layout.extension()
    ))
}

/// Build the full plan for a run
pub fn plan(
    resource: &ResourceDescriptor,
    layout: &ArchiveLayout,
    input: &PlanInput<'_>,
) -> Result<Plan, ArchiveError> {
    let computed = compute_group_size(
        resource,
        input.num_parameters,
        input.granularity,
        input.min_group_size,
    );
    let group_size = match input.group_size {
        Some(explicit) => {
            let explicit = explicit.max(1);
            if explicit > computed {
                warn!(
                    group_size = explicit,
                    ceiling_group_size = computed,
                    "Explicit group size exceeds the value ceiling; requests may be rejected"
                );
            }
            explicit
        }
        None => computed,
    };

    let earliest = input.entities.iter().map(|e| e.valid_from).min();
    let start = match (input.start, earliest) {
        (Some(start), _) => start,
        (None, Some(earliest)) => earliest,
        (None, None) => {
            info!("No target entities; nothing to plan");
            return Ok(Plan {
                start: input.today,
                end: input.end.unwrap_or(input.today),
                buckets: Vec::new(),
                groups: Vec::new(),
                group_size,
                items: Vec::new(),
            });
        }
    };
    let end = input.end.unwrap_or(input.today);

    let buckets = plan_buckets(start, end, input.granularity)?;
    let ids: Vec<String> = input.entities.iter().map(|e| e.id.clone()).collect();
    let groups = plan_groups(&ids, group_size);

    let items: Vec<WorkItem> = buckets
        .iter()
        .flat_map(|bucket| {
            groups.iter().map(move |group| WorkItem {
                bucket: *bucket,
                group: group.clone(),
                target_path: batch_path(layout, bucket, group),
                status: WorkItemStatus::Pending,
            })
        })
        .collect();

    debug!(
        start = %start,
        end = %end,
        buckets = buckets.len(),
        groups = groups.len(),
        group_size,
        "Plan built"
    );

    Ok(Plan {
        start,
        end,
        buckets,
        groups,
        group_size,
        items,
    })
}
