//! Layered configuration
//!
//! Builds the base tree for a run:
//! 1. Trainer document (`<root>/trainer/<name>`)
//! 2. Model document (`<root>/models/<name>`)
//! 3. Dataset document (`<root>/datasets/<name>`)
//!
//! Layers deep-merge in that order, then a single interpolation pass
//! resolves `${...}` expressions.

mod interpolate;
mod loader;
mod merge;
mod resolved;

pub use interpolate::{resolve_interpolations, Environment, ProcessEnv};
pub use loader::{parse_document, DocumentLoader, Layer, LayerNames, LayerSource};
pub use merge::{deep_merge, merge_layers};
pub use resolved::{ResolvedConfig, SCHEMA_ID, SCHEMA_VERSION};

pub(crate) use loader::type_name;
