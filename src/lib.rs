//! expcfg - layered experiment configuration
//!
//! Resolves the configuration of a training run from three layer documents
//! (trainer, model, dataset), `${...}` interpolations, command-line
//! `key=value` overrides and a fixed set of derived fields. The result is a
//! [`ResolvedConfig`] with provenance and a typed [`RunPlan`] for the code
//! that builds the run.

pub mod config;
pub mod derived;
pub mod error;
pub mod overrides;
pub mod pipeline;
pub mod plan;
pub mod sink;

pub use config::{Environment, LayerNames, ProcessEnv, ResolvedConfig};
pub use derived::{recompute_derived, set_training_steps, DerivedFields, DerivedOptions};
pub use error::{ConfigError, Result};
pub use overrides::{apply_overrides, coerce, AppliedOverride, Override};
pub use pipeline::{ConfigHook, ConfigTree, Pipeline, ResolveOptions};
pub use plan::{Checkpoints, ComponentSpec, LoaderSettings, RunPlan, Stage};
pub use sink::{EventSink, RecordingSink, ResolutionEvent, TracingSink};
