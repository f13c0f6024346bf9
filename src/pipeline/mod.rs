//! History reconstruction pipeline
//!
//! Orchestrates a full run:
//! 1. Ingest log events into per-file chains
//! 2. Infer implicit actions, repair chains, drop directories
//! 3. Reconcile binary status and apply cached line diffs
//! 4. Fetch the missing diffs
//! 5. Build the finished history model

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::cache::{CacheStats, LineDiffCache};
use crate::config::AnalysisConfig;
use crate::events::LogEvent;
use crate::fetch::{DiffFetcher, FetchConfig, FetchReport};
use crate::history::{HistoryBuilder, ImplicitActionInferencer, InferenceReport};
use crate::models::HistoryModel;
use crate::repository::{DiffProvider, RepositoryMetadata};

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub model: HistoryModel,
    pub inference: InferenceReport,
    /// Chain events filled in from the cache
    pub cache_applied: usize,
    pub fetch: FetchReport,
    pub cache: CacheStats,
    #[serde(skip)]
    pub duration: Duration,
}

/// Full reconstruction pipeline over one repository backend.
pub struct Pipeline<R> {
    repository: Arc<R>,
    config: AnalysisConfig,
    progress: ProgressBar,
}

impl<R> Pipeline<R>
where
    R: DiffProvider + RepositoryMetadata + 'static,
{
    pub fn new(repository: Arc<R>, config: AnalysisConfig) -> Self {
        Self {
            repository,
            config,
            progress: ProgressBar::hidden(),
        }
    }

    /// Progress bar advanced once per diff task.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Runs the pipeline over `events`, using the on-disk cache.
    pub fn run(&self, events: &[LogEvent]) -> Result<RunSummary> {
        let cache = LineDiffCache::open(
            &self.config.cache_dir(),
            self.repository.repository_uuid(),
            self.repository.module_name(),
            self.config.flush_interval(),
        );
        self.run_with_cache(events, cache)
    }

    /// Runs the pipeline with a caller-supplied cache.
    pub fn run_with_cache(&self, events: &[LogEvent], mut cache: LineDiffCache) -> Result<RunSummary> {
        let start = Instant::now();
        self.config.validate().context("Invalid configuration")?;
        let filter = self.config.path_filter()?;
        let metadata: &dyn RepositoryMetadata = self.repository.as_ref();

        let mut builder = HistoryBuilder::new(
            metadata.module_name(),
            self.config.tags_directory.clone(),
            self.config.tags_regex()?,
        );
        builder.ingest_all(events, metadata);
        let mut log = builder.finish();

        let inference = ImplicitActionInferencer::new(metadata).run(&mut log.histories);

        if let Some(root) = metadata.root_revision() {
            cache.reconcile_binary_status(
                log.histories
                    .iter()
                    .map(|(path, history)| (path.as_str(), history.is_binary())),
                root,
            );
        }
        let cache_applied = cache.apply_to(&mut log);

        let cache = Arc::new(Mutex::new(cache));
        let provider: Arc<dyn DiffProvider> = self.repository.clone();
        let fetcher = DiffFetcher::new(provider, FetchConfig::from(&self.config))
            .with_progress(self.progress.clone());
        let fetch = fetcher.run(&mut log.histories, &cache, &filter);

        let model = log.build_model(metadata, &filter);
        let cache_stats = {
            let mut cache = cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.flush();
            cache.stats()
        };

        let duration = start.elapsed();
        info!(
            "Reconstructed {} files ({} revisions, {} LOC) in {:.2?}",
            model.files.len(),
            model.revision_count(),
            model.total_loc(),
            duration
        );
        debug!(
            "Cache: {} files, {} records, {} applied this run",
            cache_stats.files, cache_stats.records, cache_applied
        );

        Ok(RunSummary {
            model,
            inference,
            cache_applied,
            fetch,
            cache: cache_stats,
            duration,
        })
    }
}
