//! On-disk archive layout
//!
//! Durable shards live at
//! `root/{resource}/{entity}/{resource}_{entity}_{YYYY-MM-DD}.{ext}`; combined
//! batch artifacts live under `root/batches/` and are transient.
//!
//! - [`ArchiveLayout`] - path construction and shard filename parsing
//! - [`prober::ArchiveProber`] - decides which work items are already on disk
//! - [`shard::ShardWriter`] - splits a combined response into per-entity shards
//! - [`lock::ArchiveLock`] - exclusive lock for the archive root

use chrono::NaiveDate;
use std::path::{Path, PathBuf};

pub mod lock;
pub mod prober;
pub mod shard;

pub use lock::ArchiveLock;
pub use prober::ArchiveProber;
pub use shard::{ShardError, ShardWriter, SplitReport};

/// Directory holding combined batch artifacts
pub const BATCH_DIR: &str = "batches";

/// Date format embedded in shard filenames
const SHARD_DATE_FORMAT: &str = "%Y-%m-%d";

/// Path builder for one resource inside an archive root
#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    root: PathBuf,
    resource_id: String,
    extension: String,
}

impl ArchiveLayout {
    /// Create a layout
    ///
    /// # Arguments
    ///
    /// * `root` - Archive root directory
    /// * `resource_id` - Resource the shards belong to
    /// * `extension` - Shard file extension without the dot (e.g., "csv")
    pub fn new(root: impl Into<PathBuf>, resource_id: &str, extension: &str) -> Self {
        Self {
            root: root.into(),
            resource_id: sanitize_component(resource_id),
            extension: extension.to_string(),
        }
    }

    /// Archive root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sanitized resource id
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Shard file extension
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// `root/{resource}`
    pub fn resource_dir(&self) -> PathBuf {
        self.root.join(&self.resource_id)
    }

    /// `root/{resource}/{entity}`
    pub fn entity_dir(&self, entity_id: &str) -> PathBuf {
        self.resource_dir().join(sanitize_component(entity_id))
    }

    /// `root/batches`
    pub fn batch_dir(&self) -> PathBuf {
        self.root.join(BATCH_DIR)
    }

    /// Shard filename for one entity and day
    pub fn shard_file_name(&self, entity_id: &str, day: NaiveDate) -> String {
        format!(
            "{}_{}_{}.{}",
            self.resource_id,
            sanitize_component(entity_id),
            day.format(SHARD_DATE_FORMAT),
            self.extension
        )
    }

    /// Full shard path for one entity and day
    pub fn shard_path(&self, entity_id: &str, day: NaiveDate) -> PathBuf {
        self.entity_dir(entity_id)
            .join(self.shard_file_name(entity_id, day))
    }

    /// Extract the day from a shard filename belonging to `entity_id`
    ///
    /// Returns `None` for files that do not follow the shard naming scheme
    /// (temp files, foreign files, other entities).
    pub fn parse_shard_date(&self, entity_id: &str, file_name: &str) -> Option<NaiveDate> {
        let prefix = format!("{}_{}_", self.resource_id, sanitize_component(entity_id));
        let suffix = format!(".{}", self.extension);
        let date = file_name.strip_prefix(&prefix)?.strip_suffix(&suffix)?;
        NaiveDate::parse_from_str(date, SHARD_DATE_FORMAT).ok()
    }
}

/// Sanitize an id for use as a single path component
///
/// Prevents path traversal by replacing dangerous characters:
/// - `/`, `\`, `:` → `_`
/// - `..` → `__`
///
/// Case is preserved.
pub fn sanitize_component(name: &str) -> String {
    name.trim().replace("..", "__").replace(['/', '\\', ':'], "_")
}
