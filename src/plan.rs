//! Run plan: the typed hand-off from a resolved tree to training code.
//!
//! Collaborators (dataset, model, trainer and callback factories) only see
//! `target` plus `params`. Loader settings are split per stage.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::config::type_name;
use crate::error::{ConfigError, Result};

/// Collaborator to construct: a class/factory name plus its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub target: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl ComponentSpec {
    /// Read `{target, params}` at `path` from a mapping node.
    pub fn from_node(node: &Value, path: &str) -> Result<Self> {
        let map = node.as_object().ok_or_else(|| ConfigError::InvalidField {
            path: path.to_string(),
            reason: format!("expected a mapping, found {}", type_name(node)),
        })?;

        let target = match map.get("target") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                return Err(ConfigError::InvalidField {
                    path: format!("{}.target", path),
                    reason: format!("expected a string, found {}", type_name(other)),
                })
            }
            None => {
                return Err(ConfigError::MissingField {
                    path: format!("{}.target", path),
                })
            }
        };

        let params = match map.get("params") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(params)) => params.clone(),
            Some(other) => {
                return Err(ConfigError::InvalidField {
                    path: format!("{}.params", path),
                    reason: format!("expected a mapping, found {}", type_name(other)),
                })
            }
        };

        Ok(Self { target, params })
    }
}

/// Stage a data loader serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Train,
    Val,
    Test,
}

/// Data loader settings for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderSettings {
    pub stage: Stage,
    pub batch_size: u64,
    pub shuffle: bool,
    pub drop_last: bool,
    /// Remaining `dataloader` keys (num_workers, pin_memory, ...)
    pub kwargs: Map<String, Value>,
}

/// Build train/val/test loader settings from the `dataloader` mapping.
///
/// `val_batch_size` is removed from the shared keys and used for the val and
/// test loaders, falling back to `batch_size`. Only the train loader shuffles.
pub fn loader_settings(dataloader: &Value, shuffle_train: bool) -> Result<[LoaderSettings; 3]> {
    let mut kwargs = dataloader
        .as_object()
        .cloned()
        .ok_or_else(|| ConfigError::InvalidField {
            path: "dataloader".to_string(),
            reason: format!("expected a mapping, found {}", type_name(dataloader)),
        })?;

    let batch_size = take_batch_size(&mut kwargs, "batch_size")?.ok_or_else(|| {
        ConfigError::MissingField {
            path: "dataloader.batch_size".to_string(),
        }
    })?;
    let val_batch_size = take_batch_size(&mut kwargs, "val_batch_size")?.unwrap_or(batch_size);

    let settings = |stage, batch_size, shuffle| LoaderSettings {
        stage,
        batch_size,
        shuffle,
        drop_last: true,
        kwargs: kwargs.clone(),
    };

    Ok([
        settings(Stage::Train, batch_size, shuffle_train),
        settings(Stage::Val, val_batch_size, false),
        settings(Stage::Test, val_batch_size, false),
    ])
}

fn take_batch_size(kwargs: &mut Map<String, Value>, key: &str) -> Result<Option<u64>> {
    match kwargs.shift_remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .filter(|&n| n > 0)
            .map(Some)
            .ok_or_else(|| ConfigError::InvalidField {
                path: format!("dataloader.{}", key),
                reason: format!("expected a positive integer, found {}", v),
            }),
    }
}

/// Checkpoints supplied on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoints {
    /// Resume training state from here
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume: Option<PathBuf>,
    /// Load weights only from here
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load: Option<PathBuf>,
}

/// Everything training code needs, extracted from a resolved tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPlan {
    pub dataset: ComponentSpec,
    pub model: ComponentSpec,
    pub trainer: ComponentSpec,
    pub callbacks: Vec<ComponentSpec>,
    pub loaders: [LoaderSettings; 3],
    pub checkpoints: Checkpoints,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

impl RunPlan {
    pub fn from_tree(tree: &Value, checkpoints: Checkpoints, shuffle_train: bool) -> Result<Self> {
        let section = |key: &str| {
            tree.get(key).ok_or_else(|| ConfigError::MissingField {
                path: key.to_string(),
            })
        };

        let callbacks = match tree.get("callbacks") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, node)| ComponentSpec::from_node(node, &format!("callbacks[{}]", i)))
                .collect::<Result<_>>()?,
            Some(other) => {
                return Err(ConfigError::InvalidField {
                    path: "callbacks".to_string(),
                    reason: format!("expected a sequence, found {}", type_name(other)),
                })
            }
        };

        let seed = match tree.get("seed") {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.as_i64().ok_or_else(|| ConfigError::InvalidField {
                path: "seed".to_string(),
                reason: format!("expected an integer, found {}", v),
            })?),
        };

        Ok(Self {
            dataset: ComponentSpec::from_node(section("dataset")?, "dataset")?,
            model: ComponentSpec::from_node(section("model")?, "model")?,
            trainer: ComponentSpec::from_node(section("trainer")?, "trainer")?,
            callbacks,
            loaders: loader_settings(section("dataloader")?, shuffle_train)?,
            checkpoints,
            seed,
        })
    }

    pub fn loader(&self, stage: Stage) -> &LoaderSettings {
        match stage {
            Stage::Train => &self.loaders[0],
            Stage::Val => &self.loaders[1],
            Stage::Test => &self.loaders[2],
        }
    }
}
