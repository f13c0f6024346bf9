//! Line diff cache
//!
//! Persists resolved line diffs per repository so later runs only ask the
//! repository for revisions they have never seen:
//!
//! - `repositories.json` maps a repository UUID to its cache file
//! - `cache_<uuid>.json` holds one entry per absolute repository path with
//!   the newest revision whose binary status is known, plus every resolved
//!   (revision, added, removed, binary) record
//!
//! Writes go to a temp file that is renamed into place. Load and save
//! failures are logged; the run continues with whatever is in memory.

pub mod paths;
mod registry;

pub use paths::{default_cache_dir, ensure_cache_dir};
pub use registry::RepositoryRegistry;

use crate::history::LogHistory;
use crate::models::RevisionNumber;
use crate::repository::{absolute_in_module, relative_to_module};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Bump when the document layout changes
const CACHE_VERSION: u32 = 1;

/// Binary status of a path as of its latest known revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryStatus {
    #[default]
    Unknown,
    Binary,
    NotBinary,
}

impl From<bool> for BinaryStatus {
    fn from(binary: bool) -> Self {
        if binary {
            BinaryStatus::Binary
        } else {
            BinaryStatus::NotBinary
        }
    }
}

/// One resolved diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub revision: RevisionNumber,
    pub added: u32,
    pub removed: u32,
    #[serde(default)]
    pub binary: bool,
}

/// Cached facts about one path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub latest_revision: RevisionNumber,
    pub status: BinaryStatus,
    #[serde(default)]
    pub revisions: Vec<RevisionRecord>,
}

impl CacheEntry {
    /// Moves the status forward; older or equal revisions leave it untouched.
    fn advance(&mut self, revision: RevisionNumber, status: BinaryStatus) -> bool {
        if revision > self.latest_revision {
            self.latest_revision = revision;
            self.status = status;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheDocument {
    version: u32,
    uuid: String,
    #[serde(default)]
    files: BTreeMap<String, CacheEntry>,
}

impl CacheDocument {
    fn empty(uuid: &str) -> Self {
        Self {
            version: CACHE_VERSION,
            uuid: uuid.to_string(),
            files: BTreeMap::new(),
        }
    }
}

/// Counters for the run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub files: usize,
    pub records: usize,
    pub binary_files: usize,
}

/// Durable (path, revision) -> line diff store for one repository.
///
/// Paths given to the public methods are module-relative; entries are keyed
/// by absolute repository path so the cache survives switching between
/// checkouts of different modules of the same repository.
pub struct LineDiffCache {
    module: String,
    cache_file: Option<PathBuf>,
    document: CacheDocument,
    dirty: bool,
    flush_interval: Duration,
    last_flush: Instant,
}

impl LineDiffCache {
    /// Opens the cache of repository `uuid` in `cache_dir`.
    pub fn open(cache_dir: &Path, uuid: &str, module: &str, flush_interval: Duration) -> Self {
        if let Err(e) = ensure_cache_dir(cache_dir) {
            warn!("Failed to create cache directory: {}", e);
        }

        let mut registry = RepositoryRegistry::load(cache_dir);
        let cache_file = match registry.cache_file(uuid) {
            Ok(path) => path,
            Err(e) => {
                warn!("Failed to register repository {}: {:#}", uuid, e);
                cache_dir.join(paths::cache_file_name(uuid))
            }
        };

        let document = match load_document(&cache_file, uuid) {
            Ok(Some(document)) => document,
            Ok(None) => CacheDocument::empty(uuid),
            Err(e) => {
                info!("Ignoring unreadable line diff cache: {:#}", e);
                CacheDocument::empty(uuid)
            }
        };
        debug!(
            "Loaded line diff cache {:?} with {} files",
            cache_file,
            document.files.len()
        );

        Self {
            module: module.to_string(),
            cache_file: Some(cache_file),
            document,
            dirty: false,
            flush_interval,
            last_flush: Instant::now(),
        }
    }

    /// A cache that is never written to disk.
    pub fn in_memory(uuid: &str, module: &str) -> Self {
        Self {
            module: module.to_string(),
            cache_file: None,
            document: CacheDocument::empty(uuid),
            dirty: false,
            flush_interval: Duration::MAX,
            last_flush: Instant::now(),
        }
    }

    pub fn cache_file(&self) -> Option<&Path> {
        self.cache_file.as_deref()
    }

    fn key(&self, path: &str) -> String {
        absolute_in_module(&self.module, path)
    }

    pub fn entry(&self, path: &str) -> Option<&CacheEntry> {
        self.document.files.get(&self.key(path))
    }

    /// True only if the cache knows `path` is binary at or after `revision`.
    pub fn is_binary(&self, path: &str, revision: RevisionNumber) -> bool {
        self.entry(path).is_some_and(|entry| {
            entry.latest_revision >= revision && entry.status == BinaryStatus::Binary
        })
    }

    /// Stores a resolved diff. The record is always appended; the status
    /// only moves forward.
    pub fn record_diff(
        &mut self,
        path: &str,
        revision: RevisionNumber,
        added: u32,
        removed: u32,
        binary: bool,
    ) {
        let key = self.key(path);
        let entry = self.document.files.entry(key).or_default();
        entry.revisions.push(RevisionRecord {
            revision,
            added,
            removed,
            binary,
        });
        entry.advance(revision, BinaryStatus::from(binary));
        self.dirty = true;
    }

    /// Overwrites binary status from working copy knowledge as of
    /// `as_of` and adds entries for files the cache has not seen yet.
    pub fn reconcile_binary_status<'p>(
        &mut self,
        files: impl IntoIterator<Item = (&'p str, bool)>,
        as_of: RevisionNumber,
    ) {
        let mut added = 0;
        let mut updated = 0;
        for (path, binary) in files {
            let key = self.key(path);
            let status = BinaryStatus::from(binary);
            match self.document.files.get_mut(&key) {
                Some(entry) => {
                    if as_of >= entry.latest_revision
                        && (entry.latest_revision != as_of || entry.status != status)
                    {
                        entry.latest_revision = as_of;
                        entry.status = status;
                        updated += 1;
                    }
                }
                None => {
                    self.document.files.insert(
                        key,
                        CacheEntry {
                            latest_revision: as_of,
                            status,
                            revisions: Vec::new(),
                        },
                    );
                    added += 1;
                }
            }
        }
        if added + updated > 0 {
            debug!(
                "Binary status reconciled at r{}: {} added, {} updated",
                as_of, added, updated
            );
            self.dirty = true;
        }
    }

    /// Copies every cached record onto the matching chain event. Returns
    /// the number of events filled in.
    pub fn apply_to(&self, log: &mut LogHistory) -> usize {
        let mut applied = 0;
        for (key, entry) in &self.document.files {
            let Some(path) = relative_to_module(&self.module, key) else {
                continue;
            };
            for record in &entry.revisions {
                if log.update_revision(&path, record.revision, record.added, record.removed) {
                    applied += 1;
                }
            }
            if entry.status == BinaryStatus::Binary {
                if let Some(history) = log.histories.get_mut(&path) {
                    if !history.is_binary()
                        && history.latest_revision().is_some_and(|r| r <= entry.latest_revision)
                    {
                        history.set_binary();
                    }
                }
            }
        }
        debug!("Applied {} cached line diffs", applied);
        applied
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            files: self.document.files.len(),
            records: self.document.files.values().map(|e| e.revisions.len()).sum(),
            binary_files: self
                .document
                .files
                .values()
                .filter(|e| e.status == BinaryStatus::Binary)
                .count(),
        }
    }

    /// Writes the document if it changed since the last save.
    pub fn save(&mut self) -> Result<()> {
        self.last_flush = Instant::now();
        let Some(cache_file) = self.cache_file.as_ref() else {
            self.dirty = false;
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }

        let tmp_file = cache_file.with_extension("tmp");
        let file = File::create(&tmp_file).context("Failed to create temp cache file")?;
        serde_json::to_writer(BufWriter::new(file), &self.document)
            .context("Failed to write cache")?;
        fs::rename(&tmp_file, cache_file).context("Failed to rename temp cache")?;

        self.dirty = false;
        debug!("Saved line diff cache with {} files", self.document.files.len());
        Ok(())
    }

    /// Saves and logs a failure instead of returning it.
    pub fn flush(&mut self) {
        if let Err(e) = self.save() {
            warn!("Failed to save line diff cache: {:#}", e);
        }
    }

    /// Flushes when the flush interval has elapsed; true if it did.
    pub fn maybe_flush(&mut self) -> bool {
        if self.last_flush.elapsed() < self.flush_interval {
            return false;
        }
        self.flush();
        true
    }
}

impl Drop for LineDiffCache {
    fn drop(&mut self) {
        if let Err(e) = self.save() {
            warn!("Failed to save line diff cache on drop: {:#}", e);
        }
    }
}

fn load_document(cache_file: &Path, uuid: &str) -> Result<Option<CacheDocument>> {
    if !cache_file.exists() {
        debug!("No cache file found at {:?}", cache_file);
        return Ok(None);
    }

    let file = File::open(cache_file).context("Failed to open cache file")?;
    let document: CacheDocument =
        serde_json::from_reader(BufReader::new(file)).context("Failed to parse cache")?;

    if document.version != CACHE_VERSION {
        info!(
            "Cache version mismatch (got {}, expected {}), rebuilding",
            document.version, CACHE_VERSION
        );
        return Ok(None);
    }
    if document.uuid != uuid {
        info!(
            "Cache file belongs to repository {}, expected {}; rebuilding",
            document.uuid, uuid
        );
        return Ok(None);
    }
    Ok(Some(document))
}
