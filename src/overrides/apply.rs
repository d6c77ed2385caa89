//! Override applicator.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::coerce::coerce;
use super::locate::{apply_by_key, apply_by_path};
use crate::error::{ConfigError, Result};
use crate::sink::{EventSink, ResolutionEvent};

/// A raw `key=value` override as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    pub key: String,
    pub raw_value: String,
}

impl Override {
    /// Split on the first `=`.
    pub fn parse(raw: &str) -> Result<Self> {
        let (key, value) = raw.split_once('=').ok_or_else(|| ConfigError::InvalidOverride {
            raw: raw.to_string(),
            reason: "expected key=value".to_string(),
        })?;
        if key.is_empty() {
            return Err(ConfigError::InvalidOverride {
                raw: raw.to_string(),
                reason: "empty key".to_string(),
            });
        }
        Ok(Self {
            key: key.to_string(),
            raw_value: value.to_string(),
        })
    }

    /// Path mode when the key contains a dot, bare-key mode otherwise.
    pub fn is_path(&self) -> bool {
        self.key.contains('.')
    }

    pub fn resolve(&self) -> ResolvedOverride {
        ResolvedOverride {
            key: self.key.clone(),
            value: coerce(&self.raw_value),
        }
    }
}

/// An override after value coercion.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOverride {
    pub key: String,
    pub value: Value,
}

impl ResolvedOverride {
    /// Write this override into `tree`, returning every location set.
    ///
    /// Fails when nothing was written.
    pub fn apply(&self, tree: &mut Value) -> Result<Vec<String>> {
        if self.key.contains('.') {
            let written = apply_by_path(tree, &self.key, &self.value)?;
            // An empty sequence on the way fans out to nothing.
            if written.is_empty() {
                let last = self.key.rsplit('.').next().unwrap_or_default();
                return Err(ConfigError::UnresolvedPath {
                    path: self.key.clone(),
                    segment: last.to_string(),
                });
            }
            Ok(written)
        } else {
            let written = apply_by_key(tree, &self.key, &self.value);
            if written.is_empty() {
                return Err(ConfigError::UnresolvedKey {
                    key: self.key.clone(),
                });
            }
            Ok(written)
        }
    }
}

/// Record of an applied override, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedOverride {
    pub key: String,
    pub value: Value,
    pub locations: Vec<String>,
}

/// Apply `raw` overrides to `tree` in order. Later overrides win.
pub fn apply_overrides(
    tree: &mut Value,
    raw: &[String],
    sink: &mut dyn EventSink,
) -> Result<Vec<AppliedOverride>> {
    let mut applied = Vec::with_capacity(raw.len());

    for item in raw {
        let resolved = Override::parse(item)?.resolve();
        let locations = resolved.apply(tree)?;

        sink.emit(&ResolutionEvent::OverrideApplied {
            key: resolved.key.clone(),
            value: resolved.value.clone(),
            locations: locations.clone(),
        });

        applied.push(AppliedOverride {
            key: resolved.key,
            value: resolved.value,
            locations,
        });
    }

    Ok(applied)
}
