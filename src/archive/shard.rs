//! Splitting combined batch responses into per-entity shards
//!
//! A combined CSV holds rows for many entities. Rows are grouped by the entity
//! column and each group is written to one shard named after the calendar day
//! of its first row. Shard writes go through a temp file in the target
//! directory and are renamed into place, so a reader never sees a partial shard.

use crate::archive::ArchiveLayout;
use crate::archiver::planner::TimeBucket;
use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, Writer};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Accepted names of the entity column, in priority order
pub const ENTITY_COLUMN_ALIASES: &[&str] = &["station", "station_id", "entity_id", "id"];

/// Accepted names of the time column, in priority order
pub const TIME_COLUMN_ALIASES: &[&str] = &["time", "timestamp", "datetime", "date"];

/// Lower bound on bytes per row; an existing shard smaller than
/// `rows * ESTIMATED_BYTES_PER_ROW` is considered incomplete and rewritten.
pub const ESTIMATED_BYTES_PER_ROW: u64 = 10;

/// Shard errors
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    /// The combined response has no recognizable entity column
    #[error("no entity column in {path} (expected one of: {expected})")]
    MissingEntityColumn {
        /// Artifact path
        path: String,
        /// Accepted column names
        expected: String,
    },

    /// Malformed content
    #[error("parse error: {0}")]
    Parse(String),

    /// Writing one entity's shard failed
    #[error("failed to write shard {path}: {reason}")]
    Write {
        /// Shard path
        path: String,
        /// Underlying cause
        reason: String,
    },

    /// IO error on the artifact itself
    #[error("IO error: {0}")]
    Io(String),
}

/// Outcome of splitting one artifact
#[derive(Debug, Default)]
pub struct SplitReport {
    /// Shards created or replaced
    pub shards_written: usize,
    /// Existing shards left untouched by the overwrite policy
    pub shards_kept: usize,
    /// Rows that could not be parsed
    pub rows_skipped: usize,
    /// Per-entity failures; other entities are unaffected
    pub entity_errors: Vec<(String, ShardError)>,
}

/// Writes per-entity shards for one resource
#[derive(Debug, Clone)]
pub struct ShardWriter {
    layout: ArchiveLayout,
}

impl ShardWriter {
    /// Create a writer over `layout`
    pub fn new(layout: ArchiveLayout) -> Self {
        Self { layout }
    }

    /// Split `artifact` into shards and delete it
    ///
    /// Returns an error only when the artifact as a whole is unusable
    /// (unreadable, no entity column). In that case the artifact is kept.
    pub fn split(&self, artifact: &Path, bucket: &TimeBucket) -> Result<SplitReport, ShardError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(artifact)
            .map_err(|e| {
                ShardError::Io(format!("Failed to open {}: {e}", artifact.display()))
            })?;

        let headers = reader
            .headers()
            .map_err(|e| ShardError::Parse(format!("Invalid header row: {e}")))?
            .clone();

        let mut report = SplitReport::default();

        if headers.is_empty() {
            debug!(artifact = %artifact.display(), "Empty response, no shards to write");
            remove_artifact(artifact);
            return Ok(report);
        }

        let entity_idx = find_column(&headers, ENTITY_COLUMN_ALIASES).ok_or_else(|| {
            ShardError::MissingEntityColumn {
                path: artifact.display().to_string(),
                expected: ENTITY_COLUMN_ALIASES.join(", "),
            }
        })?;
        let time_idx = find_column(&headers, TIME_COLUMN_ALIASES);

        let mut by_entity: BTreeMap<String, Vec<StringRecord>> = BTreeMap::new();
        for result in reader.records() {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    debug!(error = %e, "Skipping malformed row");
                    report.rows_skipped += 1;
                    continue;
                }
            };
            let entity = record.get(entity_idx).map(str::trim).unwrap_or_default();
            if entity.is_empty() {
                report.rows_skipped += 1;
                continue;
            }
            by_entity.entry(entity.to_string()).or_default().push(record);
        }

        for (entity_id, rows) in &by_entity {
            let day = match time_idx {
                Some(idx) => {
                    let raw = rows.first().and_then(|r| r.get(idx)).unwrap_or_default();
                    match leading_date(raw) {
                        Ok(day) => day,
                        Err(e) => {
                            report.entity_errors.push((
                                entity_id.clone(),
                                ShardError::Parse(format!("Invalid date {raw:?}: {e}")),
                            ));
                            continue;
                        }
                    }
                }
                None => bucket.start,
            };

            let path = self.layout.shard_path(entity_id, day);
            let threshold = rows.len() as u64 * ESTIMATED_BYTES_PER_ROW;
            if let Ok(meta) = std::fs::metadata(&path) {
                if meta.len() >= threshold {
                    debug!(path = %path.display(), "Shard already complete, keeping");
                    report.shards_kept += 1;
                    continue;
                }
            }

            match write_shard(&path, &headers, rows) {
                Ok(()) => report.shards_written += 1,
                Err(e) => {
                    warn!(entity = %entity_id, error = %e, "Shard write failed");
                    report.entity_errors.push((entity_id.clone(), e));
                }
            }
        }

        remove_artifact(artifact);

        debug!(
            artifact = %artifact.display(),
            entities = by_entity.len(),
            written = report.shards_written,
            kept = report.shards_kept,
            skipped_rows = report.rows_skipped,
            errors = report.entity_errors.len(),
            "Artifact split"
        );

        Ok(report)
    }
}

/// Index of the first header matching an alias (case-insensitive)
fn find_column(headers: &StringRecord, aliases: &[&str]) -> Option<usize> {
    aliases.iter().find_map(|alias| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(alias))
    })
}

/// Parse the `YYYY-MM-DD` prefix of a time value
fn leading_date(value: &str) -> Result<NaiveDate, chrono::ParseError> {
    let value = value.trim();
    let prefix = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d")
}

fn write_shard(path: &Path, headers: &StringRecord, rows: &[StringRecord]) -> Result<(), ShardError> {
    let write_err = |reason: String| ShardError::Write {
        path: path.display().to_string(),
        reason,
    };

    let dir = path
        .parent()
        .ok_or_else(|| write_err("shard path has no parent directory".to_string()))?;
    std::fs::create_dir_all(dir).map_err(|e| write_err(format!("create directory: {e}")))?;

    let mut temp_file =
        NamedTempFile::new_in(dir).map_err(|e| write_err(format!("create temp file: {e}")))?;

    {
        let mut writer = Writer::from_writer(&mut temp_file);
        writer
            .write_record(headers)
            .map_err(|e| write_err(e.to_string()))?;
        for row in rows {
            writer.write_record(row).map_err(|e| write_err(e.to_string()))?;
        }
        writer.flush().map_err(|e| write_err(e.to_string()))?;
    }

    temp_file
        .flush()
        .map_err(|e| write_err(format!("flush temp file: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| write_err(format!("sync temp file: {e}")))?;
    temp_file
        .persist(path)
        .map_err(|e| write_err(format!("persist temp file: {e}")))?;

    Ok(())
}

fn remove_artifact(artifact: &Path) {
    if let Err(e) = std::fs::remove_file(artifact) {
        warn!(artifact = %artifact.display(), error = %e, "Failed to delete batch artifact");
    }
}
