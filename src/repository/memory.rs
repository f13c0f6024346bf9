//! In-memory repository backend
//!
//! Answers both capabilities from fixtures registered with builder methods.
//! Used by tests and by callers that reconstruct histories without an `svn`
//! client on the machine.

use super::{DiffProvider, FileDiff, RepositoryError, RepositoryMetadata, RepositoryResult};
use crate::models::{LineDiff, RevisionNumber};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptedDiff {
    Lines(LineDiff),
    Binary,
    Failure,
}

/// Repository backed by in-memory fixtures.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    uuid: String,
    module: String,
    root_revision: Option<RevisionNumber>,
    files: HashMap<String, (i64, RevisionNumber)>,
    directories: HashSet<String>,
    binary_files: HashSet<String>,
    /// (path, newer revision) -> diff outcome.
    diffs: HashMap<(String, RevisionNumber), ScriptedDiff>,
    revision_diffs: BTreeMap<RevisionNumber, Vec<FileDiff>>,
    latency: Duration,
    diff_calls: AtomicUsize,
}

impl MemoryRepository {
    pub fn new(uuid: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            module: module.into(),
            ..Default::default()
        }
    }

    /// A file present in the working copy with `loc` lines, last changed at `revision`.
    pub fn with_file(mut self, path: &str, loc: i64, revision: u64) -> Self {
        self.files
            .insert(path.to_string(), (loc, RevisionNumber(revision)));
        self
    }

    pub fn with_directory(mut self, path: &str) -> Self {
        self.directories.insert(path.to_string());
        self
    }

    /// A working copy file whose mime type is binary.
    pub fn with_binary_file(mut self, path: &str, revision: u64) -> Self {
        self.binary_files.insert(path.to_string());
        self.files
            .insert(path.to_string(), (0, RevisionNumber(revision)));
        self
    }

    /// Diff of `path` between its previous revision and `revision`.
    pub fn with_file_diff(mut self, path: &str, revision: u64, added: u32, removed: u32) -> Self {
        self.diffs.insert(
            (path.to_string(), RevisionNumber(revision)),
            ScriptedDiff::Lines(LineDiff::new(added, removed)),
        );
        self
    }

    /// Diff of `path` at `revision` reports binary content.
    pub fn with_binary_diff(mut self, path: &str, revision: u64) -> Self {
        self.diffs.insert(
            (path.to_string(), RevisionNumber(revision)),
            ScriptedDiff::Binary,
        );
        self
    }

    /// Diff of `path` at `revision` produces output that cannot be interpreted.
    pub fn with_failing_diff(mut self, path: &str, revision: u64) -> Self {
        self.diffs.insert(
            (path.to_string(), RevisionNumber(revision)),
            ScriptedDiff::Failure,
        );
        self
    }

    /// Explicit whole-revision diff; overrides the per-file fixtures.
    pub fn with_revision_diff(mut self, revision: u64, diffs: Vec<FileDiff>) -> Self {
        self.revision_diffs.insert(RevisionNumber(revision), diffs);
        self
    }

    /// Delay applied to every diff request.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_root_revision(mut self, revision: u64) -> Self {
        self.root_revision = Some(RevisionNumber(revision));
        self
    }

    /// Number of diff requests served so far.
    pub fn diff_calls(&self) -> usize {
        self.diff_calls.load(Ordering::Relaxed)
    }

    fn serve(&self) {
        self.diff_calls.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
    }
}

impl DiffProvider for MemoryRepository {
    fn line_diff(
        &self,
        old: RevisionNumber,
        new: RevisionNumber,
        path: &str,
    ) -> RepositoryResult<LineDiff> {
        self.serve();
        match self.diffs.get(&(path.to_string(), new)) {
            Some(ScriptedDiff::Lines(lines)) => Ok(*lines),
            Some(ScriptedDiff::Binary) => Err(RepositoryError::BinaryContent),
            Some(ScriptedDiff::Failure) | None => Err(RepositoryError::InconclusiveDiff {
                path: path.to_string(),
                old,
                new,
            }),
        }
    }

    fn revision_diff(&self, revision: RevisionNumber) -> RepositoryResult<Vec<FileDiff>> {
        self.serve();
        if let Some(diffs) = self.revision_diffs.get(&revision) {
            return Ok(diffs.clone());
        }

        let mut diffs: Vec<FileDiff> = self
            .diffs
            .iter()
            .filter(|((_, rev), _)| *rev == revision)
            .map(|((path, _), scripted)| match scripted {
                ScriptedDiff::Lines(lines) => FileDiff {
                    path: path.clone(),
                    lines: Some(*lines),
                    binary: false,
                },
                ScriptedDiff::Binary => FileDiff {
                    path: path.clone(),
                    lines: Some(LineDiff::default()),
                    binary: true,
                },
                ScriptedDiff::Failure => FileDiff {
                    path: path.clone(),
                    lines: None,
                    binary: false,
                },
            })
            .collect();
        diffs.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(diffs)
    }
}

impl RepositoryMetadata for MemoryRepository {
    fn line_count(&self, path: &str) -> RepositoryResult<i64> {
        self.files
            .get(path)
            .map(|(loc, _)| *loc)
            .ok_or_else(|| RepositoryError::NoLineCount {
                path: path.to_string(),
                reason: "not in working copy".to_string(),
            })
    }

    fn is_directory(&self, path: &str) -> bool {
        self.directories.contains(path)
    }

    fn exists_in_working_copy(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.directories.contains(path)
    }

    fn is_binary(&self, path: &str) -> bool {
        self.binary_files.contains(path)
    }

    fn working_revision(&self, path: &str) -> Option<RevisionNumber> {
        self.files.get(path).map(|(_, rev)| *rev)
    }

    fn root_revision(&self) -> Option<RevisionNumber> {
        self.root_revision
            .or_else(|| self.files.values().map(|(_, rev)| *rev).max())
    }

    fn repository_uuid(&self) -> &str {
        &self.uuid
    }

    fn module_name(&self) -> &str {
        &self.module
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_diffs() {
        let repo = MemoryRepository::new("uuid-1", "/trunk")
            .with_file("a.c", 12, 3)
            .with_file_diff("a.c", 3, 5, 1)
            .with_binary_diff("logo.png", 3)
            .with_failing_diff("b.c", 3);

        assert_eq!(
            repo.line_diff(RevisionNumber(2), RevisionNumber(3), "a.c")
                .unwrap(),
            LineDiff::new(5, 1)
        );
        assert!(repo
            .line_diff(RevisionNumber(2), RevisionNumber(3), "logo.png")
            .unwrap_err()
            .is_binary());
        assert!(matches!(
            repo.line_diff(RevisionNumber(2), RevisionNumber(3), "b.c"),
            Err(RepositoryError::InconclusiveDiff { .. })
        ));
        assert_eq!(repo.diff_calls(), 3);
    }

    #[test]
    fn test_revision_diff_derived_from_file_diffs() {
        let repo = MemoryRepository::new("uuid-1", "/trunk")
            .with_file_diff("b.c", 4, 1, 0)
            .with_binary_diff("a.png", 4)
            .with_file_diff("c.c", 5, 9, 9);

        let diffs = repo.revision_diff(RevisionNumber(4)).unwrap();
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].path, "a.png");
        assert!(diffs[0].binary);
        assert_eq!(diffs[1].lines, Some(LineDiff::new(1, 0)));
    }

    #[test]
    fn test_metadata() {
        let repo = MemoryRepository::new("uuid-1", "/trunk")
            .with_file("src/a.c", 12, 3)
            .with_directory("src")
            .with_binary_file("img/logo.png", 2);

        assert_eq!(repo.line_count("src/a.c").unwrap(), 12);
        assert!(repo.line_count("missing.c").is_err());
        assert!(repo.is_directory("src"));
        assert!(repo.exists_in_working_copy("src"));
        assert!(repo.is_binary("img/logo.png"));
        assert_eq!(repo.root_revision(), Some(RevisionNumber(3)));
        assert_eq!(
            repo.absolute_to_relative("/trunk/src/a.c").as_deref(),
            Some("src/a.c")
        );
    }
}
