//! Resolved configuration with full provenance
//!
//! The resolved config captures the final tree plus where it came from: the
//! layer documents (path and digest) and every override with the locations
//! it wrote.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

use super::loader::LayerSource;
use crate::error::{ConfigError, Result};
use crate::overrides::AppliedOverride;

/// Schema version for the resolved config record
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "expcfg/resolved_config@1";

/// Final configuration handed to training code. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub schema_version: u32,

    pub schema_id: String,

    /// When resolution finished
    pub created_at: DateTime<Utc>,

    /// Run version used for the log directory, if logging is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_version: Option<String>,

    /// The resolved tree
    pub config: Value,

    /// Layer documents in merge order
    pub sources: Vec<LayerSource>,

    /// Overrides in application order
    pub overrides: Vec<AppliedOverride>,
}

impl ResolvedConfig {
    pub fn new(
        config: Value,
        sources: Vec<LayerSource>,
        overrides: Vec<AppliedOverride>,
        run_version: Option<String>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            run_version,
            config,
            sources,
            overrides,
        }
    }

    /// Serialize the whole record to JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Render just the tree as YAML
    pub fn config_to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.config).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Write the record to file
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        fs::write(path, json).map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))
    }

    /// Get a config value by dotted path; numeric segments index sequences
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.config;
        for part in path.split('.') {
            current = match current {
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                other => other.get(part)?,
            };
        }
        Some(current)
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(|v| v.as_u64())
    }

    pub fn get_i64(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(|v| v.as_i64())
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|v| v.as_str())
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(|v| v.as_bool())
    }
}
