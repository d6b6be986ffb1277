//! CLI command implementations

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::str::FromStr;

pub mod error;
pub mod resources;
pub mod run;

pub use error::CliError;
pub use resources::ResourcesCommand;
pub use run::RunArgs;

/// Tabular Archiver CLI
#[derive(Parser, Debug)]
#[command(name = "tabular-archiver")]
#[command(about = "Incrementally archive station time series into per-entity daily files", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// API base URL (e.g., https://dataset.example.org/v1)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Expose Prometheus metrics on this address (e.g., 127.0.0.1:9090)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Archive a resource into the local archive
    Run(RunArgs),

    /// List the resources known to the registry
    Resources(ResourcesCommand),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}. Valid options: json, human")),
        }
    }
}
