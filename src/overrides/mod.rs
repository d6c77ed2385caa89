//! Command-line overrides
//!
//! `key=value` strings are coerced into typed values and written into the
//! merged tree, either by bare key (every occurrence) or by dotted path
//! (with sequence fan-out).

mod apply;
mod coerce;
mod locate;

pub use apply::{apply_overrides, AppliedOverride, Override, ResolvedOverride};
pub use coerce::coerce;
pub use locate::{apply_by_key, apply_by_path};
