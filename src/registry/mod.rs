//! Resource registry for the upstream tabular-data API
//!
//! The registry is a closed set of typed resource descriptors (URL templates,
//! entity query parameter, time resolution and per-request value ceiling).
//! It is embedded in the binary, parsed and validated once, so an unknown
//! resource id is rejected before any request is made.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Embedded registry data
const REGISTRY_JSON: &str = include_str!("resources.json");

/// Placeholder substituted with the resource id in path templates
const RESOURCE_PLACEHOLDER: &str = "{resource}";

/// Minutes per calendar day
const MINUTES_PER_DAY: u64 = 24 * 60;

/// Global registry instance (loaded once)
static REGISTRY: Lazy<Result<ResourceRegistry, RegistryError>> =
    Lazy::new(|| ResourceRegistry::from_json(REGISTRY_JSON));

/// Registry of queryable resources
#[derive(Debug, Clone)]
pub struct ResourceRegistry {
    schema_version: String,
    #[allow(dead_code)]
    last_updated: String,
    resources: BTreeMap<String, ResourceDescriptor>,
}

impl ResourceRegistry {
    /// Load the embedded registry
    ///
    /// This is a singleton operation - the registry is loaded once and cached.
    pub fn load() -> Result<&'static Self, &'static RegistryError> {
        REGISTRY.as_ref()
    }

    /// Load embedded registry, returning an owned copy
    pub fn load_embedded() -> Result<Self, RegistryError> {
        Self::from_json(REGISTRY_JSON)
    }

    /// Parse and validate a registry from a JSON string
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let raw: RawRegistry = serde_json::from_str(json)
            .map_err(|e| RegistryError::ParseError(format!("Failed to parse registry: {e}")))?;

        let mut seen = HashSet::new();
        let mut resources = BTreeMap::new();
        for descriptor in raw.resources {
            descriptor.validate()?;
            if !seen.insert(descriptor.id.clone()) {
                return Err(RegistryError::Invalid(format!(
                    "duplicate resource id: {}",
                    descriptor.id
                )));
            }
            resources.insert(descriptor.id.clone(), descriptor);
        }

        Ok(Self {
            schema_version: raw.schema_version,
            last_updated: raw.last_updated,
            resources,
        })
    }

    /// Schema version of the embedded registry
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// All descriptors, ordered by id
    pub fn entries(&self) -> Vec<&ResourceDescriptor> {
        self.resources.values().collect()
    }

    /// Look up a descriptor by resource id
    pub fn get(&self, id: &str) -> Result<&ResourceDescriptor, RegistryError> {
        self.resources
            .get(id)
            .ok_or_else(|| RegistryError::UnknownResource {
                id: id.to_string(),
                known: self
                    .resources
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

/// Typed description of one queryable resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    id: String,
    description: String,
    data_path: String,
    metadata_path: String,
    entity_param: String,
    time_step_minutes: u32,
    max_values_per_request: u64,
}

impl ResourceDescriptor {
    /// Create a descriptor using the standard station path layout
    pub fn new(id: impl Into<String>, time_step_minutes: u32, max_values_per_request: u64) -> Self {
        let id = id.into();
        Self {
            description: id.clone(),
            id,
            data_path: "/station/historical/{resource}".to_string(),
            metadata_path: "/station/historical/{resource}/metadata".to_string(),
            entity_param: "station_ids".to_string(),
            time_step_minutes,
            max_values_per_request,
        }
    }

    /// Override the per-request value ceiling
    pub fn with_max_values_per_request(mut self, max_values: u64) -> Self {
        self.max_values_per_request = max_values;
        self
    }

    /// Check invariants of the descriptor
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.id.trim().is_empty() {
            return Err(RegistryError::Invalid("resource id cannot be empty".to_string()));
        }
        if self.time_step_minutes == 0 {
            return Err(RegistryError::Invalid(format!(
                "{}: time_step_minutes must be positive",
                self.id
            )));
        }
        if self.max_values_per_request == 0 {
            return Err(RegistryError::Invalid(format!(
                "{}: max_values_per_request must be positive",
                self.id
            )));
        }
        for template in [&self.data_path, &self.metadata_path] {
            if !template.contains(RESOURCE_PLACEHOLDER) {
                return Err(RegistryError::Invalid(format!(
                    "{}: path template '{template}' lacks {RESOURCE_PLACEHOLDER}",
                    self.id
                )));
            }
        }
        if self.entity_param.trim().is_empty() {
            return Err(RegistryError::Invalid(format!(
                "{}: entity_param cannot be empty",
                self.id
            )));
        }
        Ok(())
    }

    /// Resource id (e.g., "station-daily")
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Query parameter carrying the comma-joined entity ids
    pub fn entity_param(&self) -> &str {
        &self.entity_param
    }

    /// Time resolution of one record
    pub fn time_step_minutes(&self) -> u32 {
        self.time_step_minutes
    }

    /// Maximum number of values the API returns for a single request
    pub fn max_values_per_request(&self) -> u64 {
        self.max_values_per_request
    }

    /// Data endpoint path with the resource id filled in
    pub fn data_path(&self) -> String {
        self.data_path.replace(RESOURCE_PLACEHOLDER, &self.id)
    }

    /// Metadata endpoint path with the resource id filled in
    pub fn metadata_path(&self) -> String {
        self.metadata_path.replace(RESOURCE_PLACEHOLDER, &self.id)
    }

    /// Number of records one entity produces over `days` days (at least 1)
    pub fn time_steps_in_days(&self, days: u32) -> u64 {
        let minutes = u64::from(days) * MINUTES_PER_DAY;
        let step = u64::from(self.time_step_minutes);
        minutes.div_ceil(step).max(1)
    }
}

/// Raw registry structure for deserialization
#[derive(Debug, Deserialize)]
struct RawRegistry {
    schema_version: String,
    last_updated: String,
    resources: Vec<ResourceDescriptor>,
}

/// Errors that can occur when working with the registry
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Failed to parse registry JSON
    #[error("registry parse error: {0}")]
    ParseError(String),

    /// Registry content failed validation
    #[error("invalid registry: {0}")]
    Invalid(String),

    /// Resource id not present in the registry
    #[error("unknown resource id '{id}' (known: {known})")]
    UnknownResource {
        /// Requested id
        id: String,
        /// Comma-separated known ids
        known: String,
    },
}
