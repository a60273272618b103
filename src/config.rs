//! Environment-driven configuration.
//!
//! Environment variables:
//! - `RELATION_MAX_DEPTH`: default traversal depth for graph loads (default: 1)
//! - `RELATION_MAX_PER_TYPE`: default fan-out limit per array relation (default: 10)
//! - `RELATION_SCHEMA_PATH`: JSON schema declaration; the booking defaults
//!   are used when unset

use std::path::PathBuf;
use std::str::FromStr;

use crate::loader::LoadOptions;
use crate::schema::{RelationRegistry, SchemaError};
use crate::{DEFAULT_MAX_DEPTH, DEFAULT_MAX_RELATIONS_PER_TYPE};

/// Read and parse an environment variable, falling back to `default`.
pub(crate) fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Kernel configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    /// Default traversal depth.
    pub max_depth: u32,
    /// Default fan-out limit per array relation.
    pub max_relations_per_type: usize,
    /// Optional schema declaration file.
    pub schema_path: Option<PathBuf>,
}

impl KernelConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_depth: env_or("RELATION_MAX_DEPTH", DEFAULT_MAX_DEPTH),
            max_relations_per_type: env_or("RELATION_MAX_PER_TYPE", DEFAULT_MAX_RELATIONS_PER_TYPE),
            schema_path: std::env::var("RELATION_SCHEMA_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        }
    }

    /// Build the relation registry this configuration points at.
    pub fn load_registry(&self) -> Result<RelationRegistry, SchemaError> {
        match &self.schema_path {
            Some(path) => {
                let registry = RelationRegistry::from_file(path)?;
                tracing::info!(
                    path = %path.display(),
                    relations = registry.len(),
                    fingerprint = %registry.fingerprint(),
                    "Loaded relation schema"
                );
                Ok(registry)
            }
            None => Ok(RelationRegistry::booking_defaults()),
        }
    }

    /// Default load options derived from this configuration.
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions::new(self.max_depth).with_max_relations_per_type(self.max_relations_per_type)
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_relations_per_type: DEFAULT_MAX_RELATIONS_PER_TYPE,
            schema_path: None,
        }
    }
}
