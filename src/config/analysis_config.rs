//! Analysis configuration (`loctrail.toml`)
//!
//! Priority, highest first:
//! 1. Command line flags
//! 2. `loctrail.toml` in the working copy root
//! 3. Built-in defaults

use crate::cache::default_cache_dir;
use crate::history::PathFilter;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const CONFIG_FILE: &str = "loctrail.toml";

/// Granularity of diff requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffMode {
    /// One request per revision covering every file it touched
    #[default]
    PerRevision,
    /// One request per (file, revision) pair
    PerFile,
}

/// Settings for one analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub threads: usize,
    pub concurrency_threshold_ms: u64,
    pub flush_interval_secs: u64,
    pub cache_dir: Option<PathBuf>,
    pub diff_mode: DiffMode,
    pub include: Option<String>,
    pub exclude: Option<String>,
    pub tags_pattern: Option<String>,
    pub tags_directory: String,
    pub svn_username: Option<String>,
    #[serde(skip_serializing)]
    pub svn_password: Option<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            threads: 25,
            concurrency_threshold_ms: 2000,
            flush_interval_secs: 120,
            cache_dir: None,
            diff_mode: DiffMode::PerRevision,
            include: None,
            exclude: None,
            tags_pattern: None,
            tags_directory: "/tags/".to_string(),
            svn_username: None,
            svn_password: None,
        }
    }
}

/// Partial settings; every `Some` replaces the current value on merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfigOverrides {
    pub threads: Option<usize>,
    pub concurrency_threshold_ms: Option<u64>,
    pub flush_interval_secs: Option<u64>,
    pub cache_dir: Option<PathBuf>,
    pub diff_mode: Option<DiffMode>,
    pub include: Option<String>,
    pub exclude: Option<String>,
    pub tags_pattern: Option<String>,
    pub tags_directory: Option<String>,
    pub svn_username: Option<String>,
    pub svn_password: Option<String>,
}

impl AnalysisConfig {
    /// Defaults overlaid with `loctrail.toml` from `working_copy`, if readable.
    pub fn load(working_copy: &Path) -> Self {
        let mut config = Self::default();
        let path = Self::config_path(working_copy);
        if !path.exists() {
            debug!("No {} in {}", CONFIG_FILE, working_copy.display());
            return config;
        }

        match std::fs::read_to_string(&path)
            .context("Failed to read config")
            .and_then(|content| {
                toml::from_str::<ConfigOverrides>(&content).context("Failed to parse config")
            }) {
            Ok(overrides) => {
                debug!("Loaded {}", path.display());
                config.merge(overrides);
            }
            Err(e) => warn!("Ignoring {}: {:#}", path.display(), e),
        }
        config
    }

    pub fn config_path(working_copy: &Path) -> PathBuf {
        working_copy.join(CONFIG_FILE)
    }

    /// Merge overrides into this config (overrides take priority)
    pub fn merge(&mut self, other: ConfigOverrides) {
        if let Some(threads) = other.threads {
            self.threads = threads;
        }
        if let Some(ms) = other.concurrency_threshold_ms {
            self.concurrency_threshold_ms = ms;
        }
        if let Some(secs) = other.flush_interval_secs {
            self.flush_interval_secs = secs;
        }
        if other.cache_dir.is_some() {
            self.cache_dir = other.cache_dir;
        }
        if let Some(mode) = other.diff_mode {
            self.diff_mode = mode;
        }
        if other.include.is_some() {
            self.include = other.include;
        }
        if other.exclude.is_some() {
            self.exclude = other.exclude;
        }
        if other.tags_pattern.is_some() {
            self.tags_pattern = other.tags_pattern;
        }
        if let Some(dir) = other.tags_directory {
            self.tags_directory = dir;
        }
        if other.svn_username.is_some() {
            self.svn_username = other.svn_username;
        }
        if other.svn_password.is_some() {
            self.svn_password = other.svn_password;
        }
    }

    /// Rejects settings no run can work with.
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            anyhow::bail!("threads must be at least 1");
        }
        if self.tags_directory.trim().is_empty() {
            anyhow::bail!("tags directory must not be empty");
        }
        self.path_filter()?;
        self.tags_regex()?;
        Ok(())
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn path_filter(&self) -> Result<PathFilter> {
        PathFilter::new(self.include.as_deref(), self.exclude.as_deref())
            .context("Invalid include/exclude pattern")
    }

    /// Tag name pattern, matched against the whole name.
    pub fn tags_regex(&self) -> Result<Option<Regex>> {
        self.tags_pattern
            .as_deref()
            .map(|pattern| {
                Regex::new(&format!("^(?:{})$", pattern))
                    .with_context(|| format!("Invalid tags pattern '{}'", pattern))
            })
            .transpose()
    }
}
