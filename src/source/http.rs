//! HTTP implementation of [`TabularSource`]
//!
//! Talks to a station data API of the form:
//! - `GET {base}{metadata_path}` → `{"stations": [{"id": .., "valid_from": ..}, ..]}`
//! - `GET {base}{data_path}?parameters=..&{entity_param}=..&start=..&end=..&output_format=csv`
//!
//! Rate-limit state is read from the response headers on every call.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use super::{FetchOutcome, FetchRequest, QuotaStatus, SourceError, SourceResult, TabularSource};
use crate::registry::ResourceDescriptor;
use crate::Entity;

/// HTTP connect timeout (seconds) - time to establish TCP connection
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Metadata request timeout (seconds)
const METADATA_TIMEOUT_SECS: u64 = 60;
/// Reset assumed when a 429 carries no usable header
const DEFAULT_RESET_SECONDS: u64 = 60;
/// Longest error body kept in failure messages
const MAX_ERROR_BODY_CHARS: usize = 300;

const HEADER_REMAINING_SECOND: &str = "x-ratelimit-remaining-second";
const HEADER_REMAINING_HOUR: &str = "x-ratelimit-remaining-hour";
const RESET_HEADERS: [&str; 3] = ["ratelimit-reset", "x-ratelimit-reset", "retry-after"];

/// HTTP client for the station data API
pub struct HttpSource {
    client: Client,
    base_url: String,
}

impl HttpSource {
    /// Create a new source for the given API base URL
    ///
    /// # Arguments
    /// * `base_url` - API root, e.g. `https://dataset.example.org/v1`
    pub fn new(base_url: impl Into<String>) -> SourceResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .user_agent(concat!("tabular-archiver/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::HttpError(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a source around an existing client
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// Base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl TabularSource for HttpSource {
    async fn list_entities(&self, resource: &ResourceDescriptor) -> SourceResult<Vec<Entity>> {
        let url = format!("{}{}", self.base_url, resource.metadata_path());
        debug!(url = %url, "Requesting entity metadata");

        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(METADATA_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| SourceError::HttpError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::StatusError {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        let metadata: MetadataResponse = response
            .json()
            .await
            .map_err(|e| SourceError::ParseError(format!("Failed to parse metadata: {e}")))?;

        Ok(parse_entities(metadata.stations))
    }

    async fn fetch(&self, request: &FetchRequest<'_>) -> FetchOutcome {
        let url = format!("{}{}", self.base_url, request.resource.data_path());
        let query = build_query(request);

        debug!(
            url = %url,
            entities = request.entity_ids.len(),
            start = %request.start,
            end = %request.end,
            "Requesting batch"
        );

        let response = match self
            .client
            .get(&url)
            .query(&query)
            .timeout(request.timeout)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                let reason = describe_transport_error(&e, request.timeout);
                warn!(url = %url, "{}", reason);
                return FetchOutcome::Failure { reason };
            }
        };

        let status = response.status();
        let quota = parse_quota(response.headers());

        if status == StatusCode::TOO_MANY_REQUESTS {
            let reset_seconds = quota.reset_seconds.unwrap_or(DEFAULT_RESET_SECONDS);
            warn!(
                reset_seconds,
                remaining_hour = ?quota.remaining_hour,
                "Rate limit error (429)"
            );
            return FetchOutcome::RateLimited {
                reset_seconds,
                quota,
            };
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return FetchOutcome::Failure {
                reason: format!("HTTP {}: {}", status.as_u16(), truncate(&body)),
            };
        }

        match write_body(response, &request.target_path).await {
            Ok(bytes) => {
                debug!(
                    path = %request.target_path.display(),
                    bytes,
                    "Batch written"
                );
                FetchOutcome::Success {
                    path: request.target_path.clone(),
                    quota,
                }
            }
            Err(e) => {
                let _ = std::fs::remove_file(&request.target_path);
                FetchOutcome::Failure {
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Build the data endpoint query string
fn build_query<'a>(request: &'a FetchRequest<'_>) -> Vec<(&'a str, String)> {
    vec![
        ("parameters", request.parameters.join(",")),
        (request.resource.entity_param(), request.entity_ids.join(",")),
        ("start", request.start.clone()),
        ("end", request.end.clone()),
        ("output_format", request.format.as_param().to_string()),
    ]
}

/// Stream the response body into `path`, returning the number of bytes written
async fn write_body(mut response: Response, path: &Path) -> SourceResult<u64> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| SourceError::IoError(format!("Failed to create directory: {e}")))?;
    }

    let mut file = File::create(path)
        .map_err(|e| SourceError::IoError(format!("Failed to create file: {e}")))?;

    let mut written = 0u64;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| SourceError::HttpError(format!("Failed to read body: {e}")))?
    {
        file.write_all(&chunk)
            .map_err(|e| SourceError::IoError(format!("Failed to write body: {e}")))?;
        written += chunk.len() as u64;
    }

    file.flush()
        .map_err(|e| SourceError::IoError(format!("Failed to flush file: {e}")))?;
    Ok(written)
}

fn describe_transport_error(error: &reqwest::Error, timeout: Duration) -> String {
    if error.is_timeout() {
        format!("request timed out after {}s", timeout.as_secs())
    } else if error.is_connect() {
        format!("connection failed: {error}")
    } else {
        format!("request failed: {error}")
    }
}

/// Parse quota headers
///
/// Missing or malformed headers are reported as `None`.
pub fn parse_quota(headers: &HeaderMap) -> QuotaStatus {
    QuotaStatus {
        remaining_second: header_u64(headers, HEADER_REMAINING_SECOND),
        remaining_hour: header_u64(headers, HEADER_REMAINING_HOUR),
        reset_seconds: RESET_HEADERS
            .iter()
            .find_map(|name| header_u64(headers, name)),
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    let raw = headers.get(name)?.to_str().ok()?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Failed to parse header {}='{}': {}", name, raw, e);
            None
        }
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

#[derive(Debug, Deserialize)]
struct MetadataResponse {
    #[serde(alias = "entities")]
    stations: Vec<RawEntity>,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    id: serde_json::Value,
    #[serde(default)]
    valid_from: Option<String>,
}

/// Convert raw metadata rows, dropping rows without a usable id or start date
fn parse_entities(raw: Vec<RawEntity>) -> Vec<Entity> {
    raw.into_iter()
        .filter_map(|row| {
            let id = match &row.id {
                serde_json::Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                other => {
                    warn!(id = %other, "Skipping entity with unusable id");
                    return None;
                }
            };
            match row.valid_from.as_deref().and_then(parse_valid_from) {
                Some(valid_from) => Some(Entity { id, valid_from }),
                None => {
                    warn!(id = %id, valid_from = ?row.valid_from, "Skipping entity without valid_from");
                    None
                }
            }
        })
        .collect()
}

/// Parse RFC 3339 timestamps or plain `YYYY-MM-DD` dates
fn parse_valid_from(input: &str) -> Option<NaiveDate> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.date_naive());
    }
    NaiveDate::parse_from_str(input.get(..10)?, "%Y-%m-%d").ok()
}
