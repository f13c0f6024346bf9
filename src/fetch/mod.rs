//! Diff fetching
//!
//! Resolves the line diffs the cache could not answer. Tasks run one at a
//! time until a single call takes longer than the concurrency threshold;
//! from then on the remaining tasks go to a pool of worker threads fed
//! through a bounded crossbeam channel.
//!
//! ```text
//! plan ──► sequential ──(slow call)──► job channel ──► N workers
//!                                                        │
//!            progress / flush / ETA ◄── result channel ◄─┘
//! ```
//!
//! Every resolution is written to the cache and to the chain right away, so
//! an interrupted run keeps whatever was flushed.

mod task;

pub use task::{plan, DiffTask};

use crate::cache::LineDiffCache;
use crate::config::{AnalysisConfig, DiffMode};
use crate::history::{Histories, PathFilter};
use crate::models::RevisionNumber;
use crate::repository::{DiffProvider, RepositoryError};
use crossbeam_channel::{
    bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError,
};
use indicatif::ProgressBar;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// How long the pool may take to drain before the run moves on.
const POOL_TIMEOUT: Duration = Duration::from_secs(2 * 24 * 60 * 60);

/// How long the submitting thread waits for a result while the job queue is full.
const SUBMIT_POLL: Duration = Duration::from_millis(50);

/// Fetcher settings.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Worker threads once the pool is active
    pub threads: usize,
    /// A sequential call slower than this activates the pool
    pub threshold: Duration,
    pub mode: DiffMode,
    pub pool_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::from(&AnalysisConfig::default())
    }
}

impl From<&AnalysisConfig> for FetchConfig {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            threads: config.threads,
            threshold: Duration::from_millis(config.concurrency_threshold_ms),
            mode: config.diff_mode,
            pool_timeout: POOL_TIMEOUT,
        }
    }
}

/// What a fetch run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub tasks_planned: usize,
    pub sequential_runs: usize,
    pub pooled_runs: usize,
    /// File revisions that received line counts
    pub resolved: usize,
    /// File revisions found to be binary
    pub binary: usize,
    /// Tasks that produced nothing
    pub failed: usize,
    pub pool_activated: bool,
    pub timed_out: bool,
}

impl FetchReport {
    fn absorb(&mut self, outcome: &TaskOutcome) {
        self.resolved += outcome.resolved;
        self.binary += outcome.binary;
        if outcome.failed {
            self.failed += 1;
        }
    }
}

#[derive(Debug, Clone, Default)]
struct TaskOutcome {
    resolved: usize,
    binary: usize,
    failed: bool,
    elapsed: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// State shared between the calling thread and the workers.
#[derive(Clone)]
struct Shared {
    provider: Arc<dyn DiffProvider>,
    cache: Arc<Mutex<LineDiffCache>>,
    histories: Arc<Mutex<Histories>>,
}

impl Shared {
    fn execute(&self, task: &DiffTask) -> TaskOutcome {
        let start = Instant::now();
        let mut outcome = match task {
            DiffTask::PerFile { path, new, old } => self.execute_file(path, *new, *old),
            DiffTask::PerRevision { revision } => self.execute_revision(*revision),
        };
        outcome.elapsed = start.elapsed();
        trace!("{} took {:?}", task, outcome.elapsed);
        outcome
    }

    fn execute_file(&self, path: &str, new: RevisionNumber, old: RevisionNumber) -> TaskOutcome {
        match self.provider.line_diff(old, new, path) {
            Ok(lines) => {
                lock(&self.cache).record_diff(path, new, lines.added, lines.removed, false);
                if let Some(history) = lock(&self.histories).get_mut(path) {
                    history.update_revision(new, lines.added, lines.removed);
                }
                TaskOutcome {
                    resolved: 1,
                    ..Default::default()
                }
            }
            Err(e) if e.is_binary() => {
                debug!("{} is binary at r{}", path, new);
                lock(&self.cache).record_diff(path, new, 0, 0, true);
                if let Some(history) = lock(&self.histories).get_mut(path) {
                    history.set_binary();
                    history.update_revision(new, 0, 0);
                }
                TaskOutcome {
                    binary: 1,
                    ..Default::default()
                }
            }
            Err(e @ RepositoryError::InconclusiveDiff { .. }) => {
                info!("{}", e);
                failed()
            }
            Err(e) => {
                warn!("Diff of {} r{}:r{} failed: {}", path, old, new, e);
                failed()
            }
        }
    }

    fn execute_revision(&self, revision: RevisionNumber) -> TaskOutcome {
        let diffs = match self.provider.revision_diff(revision) {
            Ok(diffs) => diffs,
            Err(e) => {
                warn!("Diff of r{} failed: {}", revision, e);
                return failed();
            }
        };

        let mut outcome = TaskOutcome::default();
        for diff in diffs {
            let Some(lines) = diff.lines else {
                info!("Diff of {} at r{} could not be interpreted", diff.path, revision);
                continue;
            };

            {
                let mut histories = lock(&self.histories);
                let Some(history) = histories.get_mut(&diff.path) else {
                    debug!("r{} touches {} which has no history", revision, diff.path);
                    continue;
                };
                let Some(event) = history.revisions().iter().find(|e| e.revision == revision)
                else {
                    debug!("{} has no event at r{}", diff.path, revision);
                    continue;
                };
                if event.is_deletion() {
                    continue;
                }
                if diff.binary {
                    history.set_binary();
                }
                history.update_revision(revision, lines.added, lines.removed);
            }

            lock(&self.cache).record_diff(
                &diff.path,
                revision,
                lines.added,
                lines.removed,
                diff.binary,
            );
            if diff.binary {
                outcome.binary += 1;
            } else {
                outcome.resolved += 1;
            }
        }
        outcome
    }
}

fn failed() -> TaskOutcome {
    TaskOutcome {
        failed: true,
        ..Default::default()
    }
}

/// Worker threads draining the job channel.
struct WorkerPool {
    jobs: Sender<DiffTask>,
    results: Receiver<TaskOutcome>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    fn start(threads: usize, shared: &Shared) -> Self {
        let (job_tx, job_rx) = bounded::<DiffTask>(threads * 4);
        let (result_tx, result_rx) = unbounded::<TaskOutcome>();

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let rx = job_rx.clone();
            let tx = result_tx.clone();
            let shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("diff-worker-{}", index))
                .spawn(move || {
                    for task in rx {
                        let outcome = shared.execute(&task);
                        if tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => warn!("Failed to start diff worker: {}", e),
            }
        }

        Self {
            jobs: job_tx,
            results: result_rx,
            workers,
        }
    }

    fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

/// Runs diff tasks against a [`DiffProvider`].
pub struct DiffFetcher {
    provider: Arc<dyn DiffProvider>,
    config: FetchConfig,
    progress: ProgressBar,
}

impl DiffFetcher {
    pub fn new(provider: Arc<dyn DiffProvider>, config: FetchConfig) -> Self {
        Self {
            provider,
            config,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Plans and executes every missing diff, filling in `histories` and
    /// the cache.
    pub fn run(
        &self,
        histories: &mut Histories,
        cache: &Arc<Mutex<LineDiffCache>>,
        filter: &PathFilter,
    ) -> FetchReport {
        let tasks = plan(histories, &lock(cache), filter, self.config.mode);
        let mut report = FetchReport {
            tasks_planned: tasks.len(),
            ..Default::default()
        };
        info!(
            "{} {} diffs to fetch",
            tasks.len(),
            match self.config.mode {
                DiffMode::PerFile => "per-file",
                DiffMode::PerRevision => "per-revision",
            }
        );
        if tasks.is_empty() {
            return report;
        }

        self.progress.set_length(tasks.len() as u64);
        let shared = Shared {
            provider: Arc::clone(&self.provider),
            cache: Arc::clone(cache),
            histories: Arc::new(Mutex::new(std::mem::take(histories))),
        };

        let mut clock = FlushClock::new(tasks.len(), self.config.threads);
        let mut pool: Option<WorkerPool> = None;

        for task in tasks {
            if let Some(active) = &pool {
                self.submit(active, task, &mut report, &mut clock, &shared);
                continue;
            }

            let outcome = shared.execute(&task);
            report.sequential_runs += 1;
            report.absorb(&outcome);
            clock.record(outcome.elapsed);
            self.progress.inc(1);
            clock.maybe_flush(&shared.cache);

            if outcome.elapsed > self.config.threshold && self.config.threads > 1 {
                info!(
                    "Diff took {:?} (threshold {:?}), switching to {} workers",
                    outcome.elapsed, self.config.threshold, self.config.threads
                );
                let started = WorkerPool::start(self.config.threads, &shared);
                if started.is_empty() {
                    warn!("No diff workers available, continuing sequentially");
                } else {
                    report.pool_activated = true;
                    pool = Some(started);
                }
            }
        }

        if let Some(pool) = pool {
            self.drain(pool, &mut report, &mut clock, &shared);
        }

        *histories = std::mem::take(&mut *lock(&shared.histories));
        lock(&shared.cache).flush();
        self.progress.finish_and_clear();

        info!(
            "Diffs done: {} resolved, {} binary, {} failed ({} sequential, {} pooled)",
            report.resolved,
            report.binary,
            report.failed,
            report.sequential_runs,
            report.pooled_runs
        );
        report
    }

    /// Queues `task` for the workers, absorbing finished results while the
    /// queue is full so progress and periodic flushes keep running.
    fn submit(
        &self,
        pool: &WorkerPool,
        task: DiffTask,
        report: &mut FetchReport,
        clock: &mut FlushClock,
        shared: &Shared,
    ) {
        let mut task = task;
        loop {
            loop {
                match pool.results.try_recv() {
                    Ok(outcome) => self.absorb_pooled(&outcome, report, clock, shared),
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }

            match pool.jobs.try_send(task) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    task = back;
                    match pool.results.recv_timeout(SUBMIT_POLL) {
                        Ok(outcome) => self.absorb_pooled(&outcome, report, clock, shared),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => {
                            warn!("Diff workers exited early, dropping {}", task);
                            report.failed += 1;
                            return;
                        }
                    }
                }
                Err(TrySendError::Disconnected(task)) => {
                    warn!("Diff pool closed early, dropping {}", task);
                    report.failed += 1;
                    return;
                }
            }
        }
    }

    fn absorb_pooled(
        &self,
        outcome: &TaskOutcome,
        report: &mut FetchReport,
        clock: &mut FlushClock,
        shared: &Shared,
    ) {
        report.pooled_runs += 1;
        report.absorb(outcome);
        clock.record(outcome.elapsed);
        self.progress.inc(1);
        clock.maybe_flush(&shared.cache);
    }

    /// Closes the job queue and waits for the workers' results.
    fn drain(
        &self,
        pool: WorkerPool,
        report: &mut FetchReport,
        clock: &mut FlushClock,
        shared: &Shared,
    ) {
        let WorkerPool {
            jobs,
            results,
            workers,
        } = pool;
        drop(jobs);

        let deadline = Instant::now() + self.config.pool_timeout;
        loop {
            match results.recv_deadline(deadline) {
                Ok(outcome) => self.absorb_pooled(&outcome, report, clock, shared),
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "Diff workers did not finish within {:?}; continuing with {} of {} diffs",
                        self.config.pool_timeout,
                        report.sequential_runs + report.pooled_runs,
                        report.tasks_planned
                    );
                    warn!("Diffs finishing after the timeout are only written to the cache");
                    report.timed_out = true;
                    return;
                }
            }
        }

        for worker in workers {
            let name = worker.thread().name().unwrap_or("diff-worker").to_string();
            if worker.join().is_err() {
                warn!("{} panicked; its diff is lost", name);
                report.failed += 1;
            }
        }
    }
}

/// Tracks call latency for periodic cache flushes and the completion estimate.
struct FlushClock {
    total: usize,
    threads: usize,
    done: usize,
    busy: Duration,
}

impl FlushClock {
    fn new(total: usize, threads: usize) -> Self {
        Self {
            total,
            threads: threads.max(1),
            done: 0,
            busy: Duration::ZERO,
        }
    }

    fn record(&mut self, elapsed: Duration) {
        self.done += 1;
        self.busy += elapsed;
    }

    /// Estimated time left: average call time × remaining calls / workers.
    fn remaining(&self) -> Duration {
        if self.done == 0 {
            return Duration::ZERO;
        }
        let average = self.busy / u32::try_from(self.done).unwrap_or(u32::MAX);
        let remaining = u32::try_from(self.total.saturating_sub(self.done)).unwrap_or(u32::MAX);
        average.checked_mul(remaining).unwrap_or(Duration::MAX)
            / u32::try_from(self.threads).unwrap_or(u32::MAX)
    }

    fn maybe_flush(&self, cache: &Mutex<LineDiffCache>) {
        if !lock(cache).maybe_flush() {
            return;
        }
        let remaining = self.remaining();
        let now = chrono::Local::now();
        let eta = chrono::Duration::from_std(remaining)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now);
        info!(
            "Saved line diff cache: {}/{} diffs done, estimated completion at {}",
            self.done,
            self.total,
            eta.format("%Y-%m-%d %H:%M:%S")
        );
    }
}
