//! CLI definition and entry point

mod summary;

use anyhow::{Context, Result};
use clap::Parser;
use console::Term;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{AnalysisConfig, ConfigOverrides, DiffMode};
use crate::events::read_events_file;
use crate::pipeline::Pipeline;
use crate::repository::{SvnCommandLine, SvnCredentials};

/// Parse and validate thread count (1-256)
fn parse_threads(s: &str) -> Result<usize, String> {
    let n: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;
    if n == 0 {
        Err("threads must be at least 1".to_string())
    } else if n > 256 {
        Err("threads cannot exceed 256".to_string())
    } else {
        Ok(n)
    }
}

/// loctrail - lines-of-code timelines from Subversion history
#[derive(Parser, Debug)]
#[command(name = "loctrail")]
#[command(
    version,
    about = "Reconstruct per-file lines-of-code timelines from a Subversion log",
    after_help = "\
Examples:
  loctrail --log log.jsonl                     Analyze the working copy in the current directory
  loctrail ~/src/app --log log.jsonl -f json   JSON output for scripting
  loctrail . --log log.jsonl --per-file-diff   One diff per file revision (svn < 1.4)
  loctrail . --log log.jsonl --tags 'v\\d+.*'   Only tags whose name matches"
)]
pub struct Cli {
    /// Path to the working copy (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Log events, one JSON object per line
    #[arg(long, short = 'l')]
    pub log: PathBuf,

    /// Output format: text, json
    #[arg(long, short = 'f', default_value = "text", value_parser = ["text", "json"])]
    pub format: String,

    /// Write the output here instead of stdout
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Cache directory (default: ~/.loctrail)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Worker threads once diffs turn slow (1-256)
    #[arg(long, value_parser = parse_threads)]
    pub threads: Option<usize>,

    /// A diff slower than this many milliseconds starts the worker pool
    #[arg(long)]
    pub threshold_ms: Option<u64>,

    /// Request one diff per file revision instead of one per revision
    #[arg(long)]
    pub per_file_diff: bool,

    /// Only files matching this comma-separated glob list
    #[arg(long)]
    pub include: Option<String>,

    /// Skip files matching this comma-separated glob list
    #[arg(long)]
    pub exclude: Option<String>,

    /// Only tags whose name matches this regex
    #[arg(long)]
    pub tags: Option<String>,

    /// Path segment that marks a copy as a tag
    #[arg(long)]
    pub tags_dir: Option<String>,

    /// Subversion username
    #[arg(long, env = "LOCTRAIL_SVN_USERNAME")]
    pub username: Option<String>,

    /// Subversion password
    #[arg(long, env = "LOCTRAIL_SVN_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn", value_parser = ["error", "warn", "info", "debug", "trace"])]
    pub log_level: String,

    /// No progress bar
    #[arg(long, short = 'q')]
    pub quiet: bool,
}

impl Cli {
    /// Flags that take priority over `loctrail.toml`.
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            threads: self.threads,
            concurrency_threshold_ms: self.threshold_ms,
            cache_dir: self.cache_dir.clone(),
            diff_mode: self.per_file_diff.then_some(DiffMode::PerFile),
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            tags_pattern: self.tags.clone(),
            tags_directory: self.tags_dir.clone(),
            svn_username: self.username.clone(),
            svn_password: self.password.clone(),
            ..Default::default()
        }
    }
}

fn create_bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} diffs {msg}")
        .expect("valid template")
        .progress_chars("█▓▒░  ")
}

/// Run the CLI
pub fn run(cli: Cli) -> Result<()> {
    let path = cli
        .path
        .canonicalize()
        .with_context(|| format!("Working copy not found: {}", cli.path.display()))?;

    let mut config = AnalysisConfig::load(&path);
    config.merge(cli.overrides());
    config.validate().context("Invalid configuration")?;

    let credentials = SvnCredentials {
        username: config.svn_username.clone(),
        password: config.svn_password.clone(),
    };
    let svn = SvnCommandLine::open(&path, credentials)
        .with_context(|| format!("Failed to open working copy {}", path.display()))?;
    info!("svn {} at {}", svn.version(), svn.root_url());

    if config.diff_mode == DiffMode::PerRevision && !svn.supports_per_revision_diff() {
        warn!(
            "svn {} cannot diff whole revisions, falling back to per-file diffs",
            svn.version()
        );
        config.diff_mode = DiffMode::PerFile;
    }

    let events = read_events_file(&cli.log)
        .with_context(|| format!("Failed to read log {}", cli.log.display()))?;
    info!("Read {} log events", events.len());

    let progress = if cli.quiet || !Term::stderr().is_term() {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(0);
        bar.set_style(create_bar_style());
        bar
    };

    let summary = Pipeline::new(Arc::new(svn), config)
        .with_progress(progress)
        .run(&events)?;

    let rendered = match cli.format.as_str() {
        "json" => serde_json::to_string_pretty(&summary)?,
        _ => summary::render_text(&summary),
    };

    match &cli.output {
        Some(file) => {
            std::fs::write(file, rendered)
                .with_context(|| format!("Failed to write {}", file.display()))?;
            if !cli.quiet {
                eprintln!("Report written to {}", file.display());
            }
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_threads() {
        assert_eq!(parse_threads("4"), Ok(4));
        assert!(parse_threads("0").is_err());
        assert!(parse_threads("257").is_err());
        assert!(parse_threads("many").is_err());
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["loctrail", "--log", "log.jsonl"]).unwrap();
        assert_eq!(cli.path, PathBuf::from("."));
        assert_eq!(cli.format, "text");
        assert!(!cli.per_file_diff);

        let overrides = cli.overrides();
        assert_eq!(overrides.threads, None);
        assert_eq!(overrides.diff_mode, None);
    }

    #[test]
    fn test_log_is_required() {
        assert!(Cli::try_parse_from(["loctrail", "."]).is_err());
    }

    #[test]
    fn test_flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "loctrail",
            "/wc",
            "--log",
            "log.jsonl",
            "--threads",
            "8",
            "--threshold-ms",
            "500",
            "--per-file-diff",
            "--exclude",
            "**/*.min.js",
            "--tags-dir",
            "/releases/",
            "-f",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.format, "json");

        let mut config = AnalysisConfig::default();
        config.merge(cli.overrides());
        assert_eq!(config.threads, 8);
        assert_eq!(config.concurrency_threshold_ms, 500);
        assert_eq!(config.diff_mode, DiffMode::PerFile);
        assert_eq!(config.tags_directory, "/releases/");
        assert_eq!(config.exclude.as_deref(), Some("**/*.min.js"));
    }

    #[test]
    fn test_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["loctrail", "--log", "l", "-f", "sarif"]).is_err());
    }
}
