//! `resources` command: list the registry

use crate::registry::{ResourceDescriptor, ResourceRegistry};
use clap::Args;
use serde_json::json;

use super::{CliError, OutputFormat};

/// Resources subcommand
#[derive(Debug, Args)]
pub struct ResourcesCommand {
    /// Only show resources whose id contains this text
    pub filter: Option<String>,
}

impl ResourcesCommand {
    /// Print the registry entries
    pub fn execute(&self, format: OutputFormat) -> Result<(), CliError> {
        let registry = ResourceRegistry::load_embedded()?;
        let entries: Vec<&ResourceDescriptor> = registry
            .entries()
            .into_iter()
            .filter(|r| {
                self.filter
                    .as_deref()
                    .map_or(true, |f| r.id().contains(f))
            })
            .collect();

        match format {
            OutputFormat::Json => {
                let output = json!({
                    "schema_version": registry.schema_version(),
                    "resources": entries
                        .iter()
                        .map(|r| json!({
                            "id": r.id(),
                            "description": r.description(),
                            "time_step_minutes": r.time_step_minutes(),
                            "max_values_per_request": r.max_values_per_request(),
                            "data_path": r.data_path(),
                            "metadata_path": r.metadata_path(),
                        }))
                        .collect::<Vec<_>>(),
                });
                println!("{output}");
            }
            OutputFormat::Human => {
                println!(
                    "{:<24} {:>10} {:>14}  DESCRIPTION",
                    "ID", "STEP (min)", "MAX VALUES"
                );
                for r in &entries {
                    println!(
                        "{:<24} {:>10} {:>14}  {}",
                        r.id(),
                        r.time_step_minutes(),
                        r.max_values_per_request(),
                        r.description()
                    );
                }
                println!("\nTotal: {} resource(s)", entries.len());
            }
        }
        Ok(())
    }
}
