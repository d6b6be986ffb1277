//! Existence checks against the on-disk archive
//!
//! A work item counts as satisfied when every entity of its group already has
//! at least one shard dated inside the item's bucket, or has no data there at
//! all because the bucket ends before the entity's `valid_from`. Directory listings are
//! cached per entity for the lifetime of the prober, so a plan with thousands
//! of items reads each entity directory once.

use crate::archive::ArchiveLayout;
use crate::archiver::planner::{TimeBucket, WorkItem};
use crate::Entity;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::io;
use tracing::{debug, warn};

/// Decides which work items are already present on disk
#[derive(Debug)]
pub struct ArchiveProber {
    layout: ArchiveLayout,
    cache: HashMap<String, Vec<NaiveDate>>,
    valid_from: HashMap<String, NaiveDate>,
}

impl ArchiveProber {
    /// Create a prober with an empty cache
    pub fn new(layout: ArchiveLayout) -> Self {
        Self {
            layout,
            cache: HashMap::new(),
            valid_from: HashMap::new(),
        }
    }

    /// Know when each entity's series starts
    ///
    /// Buckets ending before an entity's start hold no rows for it upstream,
    /// so no shard can ever appear there.
    pub fn with_valid_from(mut self, entities: &[Entity]) -> Self {
        self.valid_from = entities
            .iter()
            .map(|e| (e.id.clone(), e.valid_from))
            .collect();
        self
    }

    /// Whether the item can be skipped
    ///
    /// Unreadable entity directories are treated as empty, which makes the
    /// item eligible for download rather than silently skipped.
    pub fn is_satisfied(&mut self, item: &WorkItem) -> bool {
        let bucket = item.bucket;
        for id in item.group.ids() {
            if self.before_start(id, &bucket) {
                continue;
            }
            if !self.has_shard_in(id, &bucket) {
                debug!(entity = %id, batch = %item.label(), "Entity missing in bucket");
                return false;
            }
        }
        true
    }

    fn before_start(&self, entity_id: &str, bucket: &TimeBucket) -> bool {
        self.valid_from
            .get(entity_id)
            .is_some_and(|start| bucket.end < *start)
    }

    /// Whether `entity_id` has at least one shard dated inside `bucket`
    pub fn has_shard_in(&mut self, entity_id: &str, bucket: &TimeBucket) -> bool {
        self.shard_dates(entity_id)
            .iter()
            .any(|day| bucket.contains(*day))
    }

    /// Sorted shard dates of one entity (cached)
    pub fn shard_dates(&mut self, entity_id: &str) -> &[NaiveDate] {
        if !self.cache.contains_key(entity_id) {
            let dates = match self.list_dates(entity_id) {
                Ok(dates) => dates,
                Err(e) => {
                    warn!(entity = %entity_id, error = %e, "Failed to list entity directory");
                    Vec::new()
                }
            };
            self.cache.insert(entity_id.to_string(), dates);
        }
        self.cache
            .get(entity_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn list_dates(&self, entity_id: &str) -> io::Result<Vec<NaiveDate>> {
        let dir = self.layout.entity_dir(entity_id);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut dates = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(day) = self
                .layout
                .parse_shard_date(entity_id, &name.to_string_lossy())
            {
                dates.push(day);
            }
        }
        dates.sort_unstable();
        dates.dedup();
        Ok(dates)
    }
}
