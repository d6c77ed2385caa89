//! Test fixtures for resolution tests
//!
//! - `configs/`: a config root with trainer, model and dataset documents
//! - `override_corpus/corpus.json`: override cases with expected values

#![allow(dead_code)]

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Config root holding `trainer/`, `models/` and `datasets/`
pub fn config_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/configs")
}

/// Path to the override corpus
pub fn override_corpus_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/override_corpus/corpus.json")
}

/// One override scenario from corpus.json
#[derive(Debug, Clone, Deserialize)]
pub struct OverrideCase {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub trainer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default)]
    pub devices: Option<String>,
    pub overrides: Vec<String>,
    #[serde(default)]
    pub expected: Option<Expectation>,
    #[serde(default)]
    pub expected_error: Option<String>,
}

/// Expected state of the resolved tree
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Expectation {
    /// Dotted path to value
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
    /// Paths that must not exist
    #[serde(default)]
    pub absent: Vec<String>,
    /// Override key to number of locations written
    #[serde(default)]
    pub locations: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverrideCorpus {
    pub version: u32,
    pub cases: Vec<OverrideCase>,
}

impl OverrideCorpus {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(override_corpus_path())?;
        Ok(serde_json::from_str(&content)?)
    }
}
