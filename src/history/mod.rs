//! Per-file history reconstruction
//!
//! - [`builder`] - log events into per-file chains, tags and authors
//! - [`implicit`] - directory-level actions copied onto descendant files
//! - [`file_history`] - chain to finished, LOC-annotated revisions
//! - [`filter`] - include/exclude path patterns

pub mod builder;
pub mod file_history;
pub mod filter;
pub mod implicit;

pub use builder::{HistoryBuilder, LogHistory, UNKNOWN_AUTHOR};
pub use file_history::{FileHistory, FinalLoc};
pub use filter::PathFilter;
pub use implicit::{ImplicitActionInferencer, InferenceReport};

use std::collections::BTreeMap;

/// Chains keyed by module-relative path.
pub type Histories = BTreeMap<String, FileHistory>;
