//! Named configuration documents
//!
//! Each run loads one trainer, one model and one dataset document by logical
//! name from a configuration root:
//!
//! ```text
//! <root>/trainer/<name>.yaml
//! <root>/models/<name>.yaml
//! <root>/datasets/<name>.yaml
//! ```
//!
//! `.yml` and `.toml` are accepted as well, tried in that order.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};
use crate::sink::{EventSink, ResolutionEvent};

/// Extensions tried when locating a document.
const EXTENSIONS: &[&str] = &["yaml", "yml", "toml"];

/// One of the three merged layers, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Trainer,
    Model,
    Dataset,
}

impl Layer {
    /// Merge order: later layers win.
    pub const ALL: [Layer; 3] = [Layer::Trainer, Layer::Model, Layer::Dataset];

    /// Directory under the configuration root.
    pub fn dir(self) -> &'static str {
        match self {
            Layer::Trainer => "trainer",
            Layer::Model => "models",
            Layer::Dataset => "datasets",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Layer::Trainer => "trainer",
            Layer::Model => "model",
            Layer::Dataset => "dataset",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance of a loaded layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSource {
    pub layer: Layer,

    /// Logical name given on the command line
    pub name: String,

    pub path: String,

    /// SHA-256 digest of raw file bytes
    pub digest: String,
}

/// Logical document names for the three layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerNames {
    pub trainer: String,
    pub model: String,
    pub dataset: String,
}

impl LayerNames {
    pub fn new(
        trainer: impl Into<String>,
        model: impl Into<String>,
        dataset: impl Into<String>,
    ) -> Self {
        Self {
            trainer: trainer.into(),
            model: model.into(),
            dataset: dataset.into(),
        }
    }

    pub fn name(&self, layer: Layer) -> &str {
        match layer {
            Layer::Trainer => &self.trainer,
            Layer::Model => &self.model,
            Layer::Dataset => &self.dataset,
        }
    }
}

impl Default for LayerNames {
    fn default() -> Self {
        Self::new("default", "motion_clip", "motion_clip")
    }
}

/// Loads layer documents from a configuration root.
#[derive(Debug, Clone)]
pub struct DocumentLoader {
    root: PathBuf,
}

impl DocumentLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find the document file for `layer`/`name`.
    pub fn locate(&self, layer: Layer, name: &str) -> Result<PathBuf> {
        let dir = self.root.join(layer.dir());
        EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{}.{}", name, ext)))
            .find(|path| path.is_file())
            .ok_or_else(|| ConfigError::DocumentLoad {
                layer: layer.to_string(),
                name: name.to_string(),
                reason: format!("no {}.{{yaml,yml,toml}} in {}", name, dir.display()),
            })
    }

    /// Load and parse one layer document.
    pub fn load(&self, layer: Layer, name: &str) -> Result<(Value, LayerSource)> {
        let path = self.locate(layer, name)?;
        let load_err = |reason: String| ConfigError::DocumentLoad {
            layer: layer.to_string(),
            name: name.to_string(),
            reason,
        };

        let bytes = fs::read(&path).map_err(|e| load_err(format!("{}: {}", path.display(), e)))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hex::encode(hasher.finalize());

        let contents = String::from_utf8(bytes).map_err(|e| load_err(format!("invalid UTF-8: {}", e)))?;
        let value = parse_document(&path, &contents).map_err(load_err)?;

        let source = LayerSource {
            layer,
            name: name.to_string(),
            path: path.to_string_lossy().to_string(),
            digest,
        };
        Ok((value, source))
    }

    /// Load all three layers in merge order. Stops at the first failure.
    pub fn load_all(
        &self,
        names: &LayerNames,
        sink: &mut dyn EventSink,
    ) -> Result<(Vec<Value>, Vec<LayerSource>)> {
        let mut documents = Vec::with_capacity(Layer::ALL.len());
        let mut sources = Vec::with_capacity(Layer::ALL.len());

        for layer in Layer::ALL {
            let (value, source) = self.load(layer, names.name(layer))?;
            sink.emit(&ResolutionEvent::LayerLoaded {
                layer: layer.to_string(),
                name: source.name.clone(),
                path: source.path.clone(),
            });
            documents.push(value);
            sources.push(source);
        }

        Ok((documents, sources))
    }
}

/// Parse document text by file extension. The root must be a mapping; an
/// empty document is an empty mapping.
pub fn parse_document(path: &Path, contents: &str) -> std::result::Result<Value, String> {
    let is_toml = path.extension().is_some_and(|ext| ext == "toml");

    let value = if is_toml {
        let table: toml::Value =
            toml::from_str(contents).map_err(|e| format!("TOML parse error: {}", e))?;
        toml_to_json(table)?
    } else {
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(contents).map_err(|e| format!("YAML parse error: {}", e))?;
        yaml_to_json(yaml)?
    };

    match value {
        Value::Object(_) => Ok(value),
        Value::Null => Ok(Value::Object(Map::new())),
        other => Err(format!(
            "document root must be a mapping, found {}",
            type_name(&other)
        )),
    }
}

fn toml_to_json(toml: toml::Value) -> std::result::Result<Value, String> {
    Ok(match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => float_to_json(f)?,
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(
            arr.into_iter()
                .map(toml_to_json)
                .collect::<std::result::Result<_, _>>()?,
        ),
        toml::Value::Table(table) => {
            let mut map = Map::new();
            for (k, v) in table {
                map.insert(k, toml_to_json(v)?);
            }
            Value::Object(map)
        }
    })
}

fn yaml_to_json(yaml: serde_yaml::Value) -> std::result::Result<Value, String> {
    Ok(match yaml {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Number(i.into())
            } else if let Some(u) = n.as_u64() {
                Value::Number(u.into())
            } else {
                float_to_json(n.as_f64().unwrap_or(f64::NAN))?
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(seq) => Value::Array(
            seq.into_iter()
                .map(yaml_to_json)
                .collect::<std::result::Result<_, _>>()?,
        ),
        serde_yaml::Value::Mapping(mapping) => {
            let mut map = Map::new();
            for (k, v) in mapping {
                map.insert(yaml_key(k)?, yaml_to_json(v)?);
            }
            Value::Object(map)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

fn yaml_key(key: serde_yaml::Value) -> std::result::Result<String, String> {
    match key {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Null => Ok("null".to_string()),
        other => Err(format!("unsupported mapping key {:?}", other)),
    }
}

fn float_to_json(f: f64) -> std::result::Result<Value, String> {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| format!("non-finite float {} is not supported", f))
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_load_yaml_document() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "models/clip.yaml",
            "model:\n  target: models.Clip\n  params:\n    dim: 512\n    dropout: 0.1\n",
        );

        let loader = DocumentLoader::new(dir.path());
        let (value, source) = loader.load(Layer::Model, "clip").unwrap();

        assert_eq!(value["model"]["params"]["dim"], 512);
        assert_eq!(value["model"]["params"]["dropout"], 0.1);
        assert_eq!(source.layer, Layer::Model);
        assert_eq!(source.name, "clip");
        assert_eq!(source.digest.len(), 64);
    }

    #[test]
    fn test_yaml_preferred_over_toml() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "trainer/default.toml", "max_epochs = 1\n");
        write(dir.path(), "trainer/default.yaml", "max_epochs: 2\n");

        let loader = DocumentLoader::new(dir.path());
        let (value, source) = loader.load(Layer::Trainer, "default").unwrap();
        assert_eq!(value["max_epochs"], 2);
        assert!(source.path.ends_with("default.yaml"));
    }

    #[test]
    fn test_load_toml_document() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "datasets/toy.toml",
            "[dataset]\ntarget = \"data.Toy\"\nepoch_scaling = 2\n",
        );

        let loader = DocumentLoader::new(dir.path());
        let (value, _) = loader.load(Layer::Dataset, "toy").unwrap();
        assert_eq!(value, json!({"dataset": {"target": "data.Toy", "epoch_scaling": 2}}));
    }

    #[test]
    fn test_missing_document() {
        let dir = TempDir::new().unwrap();
        let loader = DocumentLoader::new(dir.path());

        let err = loader.load(Layer::Dataset, "nope").unwrap_err();
        match err {
            ConfigError::DocumentLoad { layer, name, .. } => {
                assert_eq!(layer, "dataset");
                assert_eq!(name, "nope");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_document() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "models/bad.yaml", "model: [unclosed\n");

        let err = DocumentLoader::new(dir.path())
            .load(Layer::Model, "bad")
            .unwrap_err();
        assert!(err.to_string().contains("YAML parse error"));
    }

    #[test]
    fn test_load_all_in_merge_order() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "trainer/default.yaml", "x: 1\n");
        write(dir.path(), "models/m.yaml", "y: 2\n");
        write(dir.path(), "datasets/d.toml", "z = 3\n");

        let mut sink = RecordingSink::new();
        let loader = DocumentLoader::new(dir.path());
        let (documents, sources) = loader
            .load_all(&LayerNames::new("default", "m", "d"), &mut sink)
            .unwrap();

        assert_eq!(documents, vec![json!({"x": 1}), json!({"y": 2}), json!({"z": 3})]);
        let layers: Vec<Layer> = sources.iter().map(|s| s.layer).collect();
        assert_eq!(layers, Layer::ALL.to_vec());
        assert_eq!(sink.events.len(), 3);
    }

    #[test]
    fn test_load_all_stops_on_missing_layer() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "trainer/default.yaml", "x: 1\n");

        let err = DocumentLoader::new(dir.path())
            .load_all(&LayerNames::new("default", "absent", "d"), &mut RecordingSink::new())
            .unwrap_err();
        assert!(matches!(err, ConfigError::DocumentLoad { ref layer, .. } if layer == "model"));
    }

    #[test]
    fn test_root_must_be_mapping() {
        assert!(parse_document(Path::new("x.yaml"), "- 1\n- 2\n").is_err());
        assert_eq!(parse_document(Path::new("x.yaml"), "").unwrap(), json!({}));
    }

    #[test]
    fn test_yaml_keys_and_tags() {
        let value = parse_document(Path::new("x.yaml"), "1: one\ntrue: yes\nv: !tag 3\n").unwrap();
        assert_eq!(value["1"], "one");
        assert_eq!(value["true"], "yes");
        assert_eq!(value["v"], 3);
    }

    #[test]
    fn test_non_finite_float_rejected() {
        assert!(parse_document(Path::new("x.yaml"), "lr: .nan\n").is_err());
    }
}
