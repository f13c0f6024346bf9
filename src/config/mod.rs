//! Configuration module for loctrail
//!
//! This module handles:
//! - Project-level configuration (loctrail.toml)
//! - Command line overrides

mod analysis_config;

pub use analysis_config::{AnalysisConfig, ConfigOverrides, DiffMode, CONFIG_FILE};
