//! `run` command: archive one resource

use crate::archiver::config::{DEFAULT_MIN_GROUP_SIZE, DEFAULT_TIMEOUT_SECS, MIN_REQUEST_DELAY_MS};
use crate::archiver::{Archiver, RunConfig, RunSummary};
use crate::registry::ResourceRegistry;
use crate::source::http::HttpSource;
use crate::Granularity;
use chrono::NaiveDate;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use super::{Cli, CliError, OutputFormat};

/// Parse a YYYY-MM-DD date
fn parse_date(input: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|e| format!("'{input}' is not a YYYY-MM-DD date: {e}"))
}

/// Parse a group size (at least 1)
fn parse_group_size(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if value == 0 {
        return Err("group size must be at least 1".to_string());
    }
    Ok(value)
}

/// Arguments of the `run` command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Resource id from the registry (see `resources`)
    #[arg(long)]
    pub resource: String,

    /// Comma-separated parameters to request (e.g., tl,rr)
    #[arg(long, value_delimiter = ',', required = true)]
    pub parameters: Vec<String>,

    /// Archive root directory
    #[arg(long)]
    pub archive_root: PathBuf,

    /// First day (YYYY-MM-DD); defaults to the earliest entity start
    #[arg(long, value_parser = parse_date)]
    pub start: Option<NaiveDate>,

    /// Last day (YYYY-MM-DD); defaults to today
    #[arg(long, value_parser = parse_date)]
    pub end: Option<NaiveDate>,

    /// Comma-separated subset of entity ids
    #[arg(long, value_delimiter = ',')]
    pub entities: Option<Vec<String>>,

    /// Entities per request; computed from the value ceiling when omitted
    #[arg(long, value_parser = parse_group_size)]
    pub group_size: Option<usize>,

    /// Lower bound for the computed group size
    #[arg(long, default_value_t = DEFAULT_MIN_GROUP_SIZE, value_parser = parse_group_size)]
    pub min_group_size: usize,

    /// Bucket size: day, week, month or year
    #[arg(long, default_value = "month")]
    pub granularity: Granularity,

    /// Minimum delay between requests in milliseconds (floor: 200)
    #[arg(long, default_value_t = MIN_REQUEST_DELAY_MS)]
    pub request_delay_ms: u64,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_secs: u64,
}

impl RunArgs {
    /// Build the run configuration
    pub fn to_config(&self) -> Result<RunConfig, CliError> {
        let registry = ResourceRegistry::load_embedded()?;
        let resource = registry.get(&self.resource)?.clone();

        let parameters: Vec<String> = self
            .parameters
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if parameters.is_empty() {
            return Err(CliError::InvalidArgument(
                "--parameters must name at least one parameter".to_string(),
            ));
        }

        let mut config = RunConfig::new(resource, parameters, &self.archive_root)
            .with_granularity(self.granularity)
            .with_min_group_size(self.min_group_size)
            .with_request_delay(Duration::from_millis(self.request_delay_ms))
            .with_timeout(Duration::from_secs(self.timeout_secs));
        if let Some(start) = self.start {
            config = config.with_start(start);
        }
        if let Some(end) = self.end {
            config = config.with_end(end);
        }
        if let Some(entities) = &self.entities {
            config = config.with_entities(entities.clone());
        }
        if let Some(size) = self.group_size {
            config = config.with_group_size(size);
        }
        Ok(config)
    }

    /// Execute the run and print the summary
    pub async fn execute(&self, cli: &Cli) -> Result<RunSummary, CliError> {
        let base_url = cli.base_url.as_deref().ok_or_else(|| {
            CliError::ConfigurationError("--base-url is required for `run`".to_string())
        })?;
        let config = self.to_config()?;

        info!(
            resource = %config.resource.id(),
            base_url = %base_url,
            "Preparing archive run"
        );

        let source = HttpSource::new(base_url)?;
        let mut archiver = Archiver::new(config, source);
        if cli.output_format == OutputFormat::Human {
            archiver = archiver.with_progress(create_progress_bar(&self.resource));
        }

        let summary = archiver.run().await?;
        match cli.output_format {
            OutputFormat::Json => output_json(&summary)?,
            OutputFormat::Human => output_human(&summary),
        }
        Ok(summary)
    }
}

/// Print the summary as one JSON line
fn output_json(summary: &RunSummary) -> Result<(), CliError> {
    let json = serde_json::to_string(summary)
        .map_err(|e| CliError::ConfigurationError(format!("Failed to encode summary: {e}")))?;
    println!("{json}");
    Ok(())
}

/// Print the summary for humans
fn output_human(summary: &RunSummary) {
    println!("\nArchive run finished");
    println!("Work items: {}", summary.total_work_items);
    println!("Downloaded: {}", summary.downloaded);
    println!("Skipped:    {}", summary.skipped);
    println!("Failed:     {}", summary.failed);
    if summary.rate_limited > 0 {
        println!("Rate limited responses: {}", summary.rate_limited);
    }
    println!(
        "Shards written: {} (kept: {}, errors: {})",
        summary.shards_written, summary.shards_kept, summary.shard_errors
    );
    for failure in &summary.failures {
        eprintln!(
            "  failed {} after {} attempt(s): {}",
            failure.batch, failure.attempts, failure.reason
        );
    }
}

/// Progress bar over queued work items
fn create_progress_bar(resource: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar().template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(format!("Archiving {resource}"));
    pb
}
