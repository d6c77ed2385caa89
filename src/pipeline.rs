//! Resolution pipeline
//!
//! One call turns layer names, raw overrides and run options into a
//! [`ResolvedConfig`]:
//! - load and merge the trainer, model and dataset documents
//! - resolve `${...}` interpolations against the merged tree
//! - apply overrides in order
//! - recompute derived fields (devices, run name, batch size, epochs)
//! - derive the training-step count when the loader length is known
//! - run post-processing hooks
//!
//! Any error aborts the call; no partial tree is returned.

use chrono::{Local, NaiveDateTime};
use serde_json::Value;
use std::path::PathBuf;

use crate::config::{merge_layers, resolve_interpolations, DocumentLoader, Environment, LayerNames, ProcessEnv, ResolvedConfig};
use crate::derived::{recompute_derived, set_training_steps, DerivedOptions};
use crate::error::Result;
use crate::overrides::apply_overrides;
use crate::plan::{Checkpoints, RunPlan};
use crate::sink::{EventSink, ResolutionEvent};

/// The configuration tree: mappings, sequences and scalars.
pub type ConfigTree = Value;

/// Post-processing step run after derived fields are recomputed.
pub trait ConfigHook {
    fn apply(&self, tree: &mut ConfigTree) -> Result<()>;
}

impl<F> ConfigHook for F
where
    F: Fn(&mut ConfigTree) -> Result<()>,
{
    fn apply(&self, tree: &mut ConfigTree) -> Result<()> {
        self(tree)
    }
}

/// Options for one resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Directory holding `trainer/`, `models/` and `datasets/`
    pub config_root: PathBuf,

    pub layers: LayerNames,

    /// Comma-separated device ids; `None` runs on CPU
    pub devices: Option<String>,

    pub no_log: bool,

    pub log_suffix: String,

    pub log_root: String,

    /// Length of the training loader, for the step count
    pub train_batches: Option<u64>,

    pub resume_ckpt_path: Option<PathBuf>,

    pub load_ckpt_path: Option<PathBuf>,

    pub no_shuffle_train: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            config_root: PathBuf::from("src/configs"),
            layers: LayerNames::default(),
            devices: None,
            no_log: false,
            log_suffix: String::new(),
            log_root: "logs".to_string(),
            train_batches: None,
            resume_ckpt_path: None,
            load_ckpt_path: None,
            no_shuffle_train: false,
        }
    }
}

impl ResolveOptions {
    pub fn derived_options(&self) -> DerivedOptions {
        DerivedOptions {
            devices: self.devices.clone(),
            no_log: self.no_log,
            log_suffix: self.log_suffix.clone(),
            log_root: self.log_root.clone(),
            model_name: self.layers.model.clone(),
            dataset_name: self.layers.dataset.clone(),
        }
    }

    pub fn checkpoints(&self) -> Checkpoints {
        Checkpoints {
            resume: self.resume_ckpt_path.clone(),
            load: self.load_ckpt_path.clone(),
        }
    }
}

/// Configured resolution pipeline
pub struct Pipeline {
    options: ResolveOptions,
    env: Box<dyn Environment>,
    hooks: Vec<Box<dyn ConfigHook>>,
}

impl Pipeline {
    /// Pipeline reading the process environment, with no hooks
    pub fn new(options: ResolveOptions) -> Self {
        Self {
            options,
            env: Box::new(ProcessEnv),
            hooks: Vec::new(),
        }
    }

    /// Replace the environment used by `${oc.env:...}`
    pub fn with_env(mut self, env: impl Environment + 'static) -> Self {
        self.env = Box::new(env);
        self
    }

    /// Register a hook; hooks run in registration order
    pub fn with_hook(mut self, hook: impl ConfigHook + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    /// Resolve using the current local time for the run version.
    pub fn resolve(&self, overrides: &[String], sink: &mut dyn EventSink) -> Result<ResolvedConfig> {
        self.resolve_at(overrides, Local::now().naive_local(), sink)
    }

    pub fn resolve_at(
        &self,
        overrides: &[String],
        now: NaiveDateTime,
        sink: &mut dyn EventSink,
    ) -> Result<ResolvedConfig> {
        let loader = DocumentLoader::new(&self.options.config_root);
        let (documents, sources) = loader.load_all(&self.options.layers, sink)?;

        let mut tree = merge_layers(documents);
        resolve_interpolations(&mut tree, self.env.as_ref())?;

        let applied = apply_overrides(&mut tree, overrides, sink)?;
        let derived = recompute_derived(&mut tree, &self.options.derived_options(), now, sink)?;

        if let Some(train_batches) = self.options.train_batches {
            set_training_steps(&mut tree, train_batches, sink)?;
        }

        for hook in &self.hooks {
            hook.apply(&mut tree)?;
        }

        sink.emit(&ResolutionEvent::Resolved {
            config: tree.clone(),
        });

        Ok(ResolvedConfig::new(tree, sources, applied, derived.run_version))
    }

    /// Extract the run plan from a resolved config
    pub fn plan(&self, resolved: &ResolvedConfig) -> Result<RunPlan> {
        RunPlan::from_tree(
            &resolved.config,
            self.options.checkpoints(),
            !self.options.no_shuffle_train,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::sink::RecordingSink;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 5, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap()
    }

    fn write(root: &TempDir, rel: &str, contents: &str) {
        let path = root.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn config_root() -> TempDir {
        let root = TempDir::new().unwrap();
        write(
            &root,
            "trainer/default.yaml",
            "trainer:\n  target: Trainer\n  max_epochs: 40\n  logger:\n    target: TensorBoardLogger\n\
             dataloader:\n  batch_size: 64\n  num_workers: 2\nseed: 7\n",
        );
        write(
            &root,
            "models/motion_clip.yaml",
            "model:\n  target: models.Clip\n  params:\n    dim: 256\n    lr: 0.001\n\
             callbacks:\n  - target: EarlyStopping\n    params:\n      patience: 5\n",
        );
        write(
            &root,
            "datasets/motion_clip.yaml",
            "dataset:\n  target: data.Motion\n  params:\n    root: ${oc.env:DATA_ROOT,/data}\n  epoch_scaling: 2\n",
        );
        root
    }

    fn options(root: &TempDir) -> ResolveOptions {
        ResolveOptions {
            config_root: root.path().to_path_buf(),
            ..ResolveOptions::default()
        }
    }

    fn overrides(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_end_to_end() {
        let root = config_root();
        let pipeline = Pipeline::new(ResolveOptions {
            devices: Some("0,1".into()),
            ..options(&root)
        })
        .with_env(HashMap::from([("DATA_ROOT".to_string(), "/mnt/motion".to_string())]));

        let mut sink = RecordingSink::new();
        let resolved = pipeline
            .resolve_at(&overrides(&["patience=9", "model.params.dim=512"]), now(), &mut sink)
            .unwrap();

        assert_eq!(resolved.get_i64("callbacks.0.params.patience"), Some(9));
        assert_eq!(resolved.get_i64("model.params.dim"), Some(512));
        assert_eq!(resolved.get_str("dataset.params.root"), Some("/mnt/motion"));
        assert_eq!(resolved.get_u64("dataloader.batch_size"), Some(32));
        assert_eq!(resolved.get_i64("trainer.max_epochs"), Some(20));
        assert_eq!(resolved.run_version.as_deref(), Some("2026-05-01-08-30-00"));
        assert_eq!(resolved.sources.len(), 3);
        assert_eq!(resolved.overrides.len(), 2);
        assert!(matches!(sink.events.last(), Some(ResolutionEvent::Resolved { .. })));
    }

    #[test]
    fn test_unresolved_override_aborts() {
        let root = config_root();
        let err = Pipeline::new(options(&root))
            .resolve_at(&overrides(&["no_such_key=1"]), now(), &mut RecordingSink::new())
            .unwrap_err();

        assert_eq!(
            err,
            ConfigError::UnresolvedKey {
                key: "no_such_key".to_string()
            }
        );
    }

    #[test]
    fn test_training_steps_and_hooks() {
        let root = config_root();
        let pipeline = Pipeline::new(ResolveOptions {
            train_batches: Some(10),
            no_log: true,
            ..options(&root)
        })
        .with_hook(|tree: &mut ConfigTree| -> Result<()> {
            tree["trainer"]["max_epochs"] = Value::from(1);
            Ok(())
        });

        let resolved = pipeline
            .resolve_at(&[], now(), &mut RecordingSink::new())
            .unwrap();

        // Steps are derived before hooks run.
        assert_eq!(resolved.get_u64("model.training_kwargs.num_training_steps"), Some(200));
        assert_eq!(resolved.get_i64("trainer.max_epochs"), Some(1));
        assert_eq!(resolved.get_bool("trainer.logger"), Some(false));
        assert_eq!(resolved.run_version, None);
    }

    #[test]
    fn test_hook_error_aborts() {
        let root = config_root();
        let pipeline = Pipeline::new(options(&root)).with_hook(|_: &mut ConfigTree| -> Result<()> {
            Err(ConfigError::MissingField {
                path: "extra".to_string(),
            })
        });

        let mut sink = RecordingSink::new();
        assert!(pipeline.resolve_at(&[], now(), &mut sink).is_err());
        assert!(!sink.any(|e| matches!(e, ResolutionEvent::Resolved { .. })));
    }

    #[test]
    fn test_plan() {
        let root = config_root();
        let pipeline = Pipeline::new(ResolveOptions {
            no_shuffle_train: true,
            resume_ckpt_path: Some(PathBuf::from("last.ckpt")),
            ..options(&root)
        });
        let resolved = pipeline
            .resolve_at(&[], now(), &mut RecordingSink::new())
            .unwrap();
        let plan = pipeline.plan(&resolved).unwrap();

        assert_eq!(plan.model.target, "models.Clip");
        assert_eq!(plan.callbacks[0].target, "EarlyStopping");
        assert!(!plan.loaders[0].shuffle);
        assert_eq!(plan.loaders[0].batch_size, 64);
        assert_eq!(plan.checkpoints.resume, Some(PathBuf::from("last.ckpt")));
        assert_eq!(plan.seed, Some(7));
    }
}
