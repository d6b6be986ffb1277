//! Shared fixtures: a scripted in-memory source and archive helpers

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use tabular_archiver::archive::ArchiveLayout;
use tabular_archiver::archiver::RunConfig;
use tabular_archiver::registry::ResourceDescriptor;
use tabular_archiver::source::{
    FetchOutcome, FetchRequest, QuotaStatus, SourceError, SourceResult, TabularSource,
};
use tabular_archiver::Entity;
use tokio::time::Instant;

/// Scripted reply to one fetch call
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
pub enum Reply {
    /// Write one row per entity per day and succeed
    Data,
    /// Like `Data`, reporting the given quota
    DataWithQuota(QuotaStatus),
    /// 429 with the given reset
    RateLimited(u64),
    /// Transport or server failure
    Failure(&'static str),
    /// Write this body verbatim and succeed
    Raw(&'static str),
}

/// Scripted reply to one metadata call
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
pub enum MetadataReply {
    /// Return the configured entities
    Entities,
    /// Return an empty list
    Empty,
    /// Fail with a status error
    Error,
}

/// One observed fetch call
#[derive(Debug, Clone)]
pub struct FetchCall {
    pub entity_ids: Vec<String>,
    pub start: String,
    pub end: String,
    pub at: Instant,
}

/// In-memory [`TabularSource`] with scripted replies
///
/// Unscripted calls succeed.
pub struct FakeSource {
    entities: Vec<Entity>,
    metadata_script: Mutex<VecDeque<MetadataReply>>,
    fetch_script: Mutex<VecDeque<Reply>>,
    metadata_calls: Mutex<Vec<Instant>>,
    fetch_calls: Mutex<Vec<FetchCall>>,
}

#[allow(dead_code)]
impl FakeSource {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self {
            entities,
            metadata_script: Mutex::new(VecDeque::new()),
            fetch_script: Mutex::new(VecDeque::new()),
            metadata_calls: Mutex::new(Vec::new()),
            fetch_calls: Mutex::new(Vec::new()),
        }
    }

    /// `count` entities with ids "1".."count", valid since `valid_from`
    pub fn with_stations(count: usize, valid_from: NaiveDate) -> Self {
        Self::new(
            (1..=count)
                .map(|i| Entity::new(i.to_string(), valid_from))
                .collect(),
        )
    }

    pub fn script_fetch(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.fetch_script.lock().unwrap().extend(replies);
        self
    }

    pub fn script_metadata(self, replies: impl IntoIterator<Item = MetadataReply>) -> Self {
        self.metadata_script.lock().unwrap().extend(replies);
        self
    }

    pub fn fetch_calls(&self) -> Vec<FetchCall> {
        self.fetch_calls.lock().unwrap().clone()
    }

    pub fn metadata_calls(&self) -> Vec<Instant> {
        self.metadata_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TabularSource for FakeSource {
    async fn list_entities(&self, _resource: &ResourceDescriptor) -> SourceResult<Vec<Entity>> {
        self.metadata_calls.lock().unwrap().push(Instant::now());
        let reply = self
            .metadata_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(MetadataReply::Entities);
        match reply {
            MetadataReply::Entities => Ok(self.entities.clone()),
            MetadataReply::Empty => Ok(Vec::new()),
            MetadataReply::Error => Err(SourceError::StatusError {
                status: 503,
                body: "unavailable".to_string(),
            }),
        }
    }

    async fn fetch(&self, request: &FetchRequest<'_>) -> FetchOutcome {
        self.fetch_calls.lock().unwrap().push(FetchCall {
            entity_ids: request.entity_ids.to_vec(),
            start: request.start.clone(),
            end: request.end.clone(),
            at: Instant::now(),
        });
        let reply = self
            .fetch_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Data);

        let body = match reply {
            Reply::Data | Reply::DataWithQuota(_) => daily_rows(request, &self.entities),
            Reply::Raw(body) => body.to_string(),
            Reply::RateLimited(reset_seconds) => {
                return FetchOutcome::RateLimited {
                    reset_seconds,
                    quota: QuotaStatus {
                        remaining_hour: Some(0),
                        reset_seconds: Some(reset_seconds),
                        ..Default::default()
                    },
                }
            }
            Reply::Failure(reason) => {
                return FetchOutcome::Failure {
                    reason: reason.to_string(),
                }
            }
        };
        let quota = match reply {
            Reply::DataWithQuota(quota) => quota,
            _ => QuotaStatus::default(),
        };

        if let Some(parent) = request.target_path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&request.target_path, body).unwrap();
        FetchOutcome::Success {
            path: request.target_path.clone(),
            quota,
        }
    }
}

/// Combined CSV with one row per entity per day of the request window
///
/// Like the real service, an entity has no rows before its `valid_from`.
fn daily_rows(request: &FetchRequest<'_>, entities: &[Entity]) -> String {
    let start = NaiveDate::parse_from_str(&request.start[..10], "%Y-%m-%d").unwrap();
    let end = NaiveDate::parse_from_str(&request.end[..10], "%Y-%m-%d").unwrap();

    let mut out = format!("time,station,{}\n", request.parameters.join(","));
    let values = vec!["1.5"; request.parameters.len()].join(",");
    let mut day = start;
    while day <= end {
        for id in request.entity_ids {
            let started = entities
                .iter()
                .find(|e| &e.id == id)
                .map_or(true, |e| e.valid_from <= day);
            if !started {
                continue;
            }
            out.push_str(&format!("{}T00:00+00:00,{id},{values}\n", day.format("%Y-%m-%d")));
        }
        day = day.checked_add_days(Days::new(1)).unwrap();
    }
    out
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn daily_resource() -> ResourceDescriptor {
    ResourceDescriptor::new("station-daily", 1440, 1_000_000)
}

#[allow(dead_code)]
pub fn hourly_resource() -> ResourceDescriptor {
    ResourceDescriptor::new("station-hourly", 60, 1_000_000)
}

/// Config over `root` with tl,rr and a pinned "today"
pub fn config(root: &Path) -> RunConfig {
    RunConfig::new(
        daily_resource(),
        vec!["tl".to_string(), "rr".to_string()],
        root,
    )
    .with_today(date(2024, 12, 31))
}

pub fn layout(root: &Path) -> ArchiveLayout {
    ArchiveLayout::new(root, "station-daily", "csv")
}

/// All shard files below the resource directory
pub fn shard_files(root: &Path) -> Vec<std::path::PathBuf> {
    let mut files = Vec::new();
    let resource_dir = layout(root).resource_dir();
    let Ok(entities) = std::fs::read_dir(resource_dir) else {
        return files;
    };
    for entity in entities.flatten() {
        if !entity.path().is_dir() {
            continue;
        }
        for file in std::fs::read_dir(entity.path()).unwrap().flatten() {
            files.push(file.path());
        }
    }
    files.sort();
    files
}
