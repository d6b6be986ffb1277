//! Entity metadata resolution
//!
//! Lists the queryable entities of a resource, retrying on a fixed linear
//! schedule. An empty list is treated like an error: a resource without
//! entities almost always means a transient upstream problem.

use crate::archiver::config::{resolver_wait, RESOLVER_MAX_ATTEMPTS};
use crate::archiver::pacer::RequestPacer;
use crate::archiver::ArchiveError;
use crate::registry::ResourceDescriptor;
use crate::source::TabularSource;
use crate::Entity;
use std::collections::HashSet;
use tokio::time::sleep;
use tracing::{info, warn};

/// Fetch the entity list, retrying up to [`RESOLVER_MAX_ATTEMPTS`] times
///
/// # Errors
/// [`ArchiveError::MetadataFetch`] once every attempt failed.
pub async fn resolve_entities<S: TabularSource + ?Sized>(
    source: &S,
    resource: &ResourceDescriptor,
    pacer: &mut RequestPacer,
) -> Result<Vec<Entity>, ArchiveError> {
    let mut last_error = String::new();

    for attempt in 1..=RESOLVER_MAX_ATTEMPTS {
        let wait = resolver_wait(attempt);
        if !wait.is_zero() {
            info!(
                attempt,
                wait_secs = wait.as_secs(),
                "Retrying metadata request"
            );
            sleep(wait).await;
        }
        pacer.ready().await;

        match source.list_entities(resource).await {
            Ok(entities) if !entities.is_empty() => {
                info!(
                    resource = %resource.id(),
                    entities = entities.len(),
                    attempt,
                    "Resolved entities"
                );
                return Ok(entities);
            }
            Ok(_) => {
                last_error = "metadata listed no entities".to_string();
                warn!(attempt, "Metadata listed no entities");
            }
            Err(e) => {
                last_error = e.to_string();
                warn!(attempt, error = %e, "Metadata request failed");
            }
        }
    }

    Err(ArchiveError::MetadataFetch {
        attempts: RESOLVER_MAX_ATTEMPTS,
        last_error,
    })
}

/// Restrict `entities` to `subset`, keeping resolver order
///
/// Ids in `subset` the resolver does not know are logged and ignored.
pub fn filter_entities(entities: Vec<Entity>, subset: Option<&[String]>) -> Vec<Entity> {
    let Some(subset) = subset else {
        return entities;
    };

    let wanted: HashSet<&str> = subset.iter().map(|s| s.trim()).collect();
    let known: HashSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();
    for id in wanted.iter().filter(|id| !known.contains(*id)) {
        warn!(entity = %id, "Requested entity is unknown to the resource; ignoring");
    }

    entities
        .into_iter()
        .filter(|e| wanted.contains(e.id.as_str()))
        .collect()
}
