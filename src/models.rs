//! Core data models for loctrail
//!
//! Raw per-file revision events (as read from the history log) and the
//! finished, LOC-annotated history handed to reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A repository revision number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct RevisionNumber(pub u64);

impl RevisionNumber {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RevisionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RevisionNumber {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().trim_start_matches('r').parse().map(RevisionNumber)
    }
}

impl From<u64> for RevisionNumber {
    fn from(n: u64) -> Self {
        RevisionNumber(n)
    }
}

/// Path-level action recorded by the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "A", alias = "added")]
    Added,
    #[serde(rename = "M", alias = "modified")]
    Modified,
    #[serde(rename = "D", alias = "deleted")]
    Deleted,
    #[serde(rename = "R", alias = "replaced")]
    Replaced,
}

/// Lines added and removed by one revision of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LineDiff {
    pub added: u32,
    pub removed: u32,
}

impl LineDiff {
    pub fn new(added: u32, removed: u32) -> Self {
        Self { added, removed }
    }

    /// Net LOC change (added minus removed).
    pub fn delta(&self) -> i64 {
        i64::from(self.added) - i64::from(self.removed)
    }
}

/// Source of a copy recorded alongside an add or replace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopySource {
    pub path: String,
    pub revision: RevisionNumber,
}

/// One file's participation in one commit.
///
/// Line counts are unknown when the event is read from the log and are
/// filled in later from the diff cache or a repository diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionEvent {
    pub revision: RevisionNumber,
    pub date: DateTime<Utc>,
    pub author: String,
    pub comment: String,
    pub action: Action,
    pub copy_from: Option<CopySource>,
    lines: Option<LineDiff>,
}

impl RevisionEvent {
    pub fn new(
        revision: RevisionNumber,
        action: Action,
        date: DateTime<Utc>,
        author: impl Into<String>,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            revision,
            date,
            author: author.into(),
            comment: comment.into(),
            action,
            copy_from: None,
            lines: None,
        }
    }

    pub fn with_copy_from(mut self, copy_from: Option<CopySource>) -> Self {
        self.copy_from = copy_from;
        self
    }

    pub fn is_deletion(&self) -> bool {
        self.action == Action::Deleted
    }

    pub fn is_change(&self) -> bool {
        self.action == Action::Modified
    }

    pub fn is_creation_or_restore(&self) -> bool {
        matches!(self.action, Action::Added | Action::Replaced)
    }

    /// True once added/removed counts are known.
    pub fn lines_resolved(&self) -> bool {
        self.lines.is_some()
    }

    pub fn lines(&self) -> Option<LineDiff> {
        self.lines
    }

    pub fn set_lines(&mut self, added: u32, removed: u32) {
        self.lines = Some(LineDiff::new(added, removed));
    }

    pub fn clear_lines(&mut self) {
        self.lines = None;
    }

    pub fn lines_added(&self) -> u32 {
        self.lines.map_or(0, |l| l.added)
    }

    pub fn lines_removed(&self) -> u32 {
        self.lines.map_or(0, |l| l.removed)
    }

    /// Change in LOC caused by this event; unresolved events count as zero.
    /// Does not account for file creation or deletion.
    pub fn loc_change(&self) -> i64 {
        self.lines.map_or(0, |l| l.delta())
    }
}

/// Kind of a finished revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionKind {
    Creation,
    Change,
    Deletion,
    /// Synthetic revision holding the file's state when the log window opens.
    BeginOfLog,
}

impl fmt::Display for RevisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevisionKind::Creation => write!(f, "creation"),
            RevisionKind::Change => write!(f, "change"),
            RevisionKind::Deletion => write!(f, "deletion"),
            RevisionKind::BeginOfLog => write!(f, "begin-of-log"),
        }
    }
}

/// A revision of a file with its absolute LOC snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishedRevision {
    pub kind: RevisionKind,
    /// `None` for the synthetic begin-of-log revision.
    pub revision: Option<RevisionNumber>,
    pub date: DateTime<Utc>,
    pub author: Option<String>,
    pub comment: String,
    /// Lines of code after this revision (before it, for deletions).
    pub loc: i64,
    /// Net lines added by this revision; zero for synthetic revisions.
    pub lines_delta: i64,
    /// Lines counted as both removed and added.
    pub lines_replaced: u32,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

/// A file's complete history, oldest revision first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedFile {
    pub path: String,
    pub binary: bool,
    pub final_loc: i64,
    /// True when the newest revision is a deletion.
    pub dead: bool,
    pub revisions: Vec<FinishedRevision>,
}

impl VersionedFile {
    pub fn latest(&self) -> Option<&FinishedRevision> {
        self.revisions.last()
    }
}

/// A tag target as detected in the log: the revision a tag was copied from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagTarget {
    pub name: String,
    pub revision: RevisionNumber,
    pub date: DateTime<Utc>,
}

/// A tag with the file revisions it captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolicName {
    pub name: String,
    pub date: DateTime<Utc>,
    /// (path, revision) pairs belonging to the tag.
    pub revisions: Vec<(String, RevisionNumber)>,
}

/// Finished per-file history model handed to reporting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryModel {
    pub module: String,
    pub start_date: Option<DateTime<Utc>>,
    pub files: Vec<VersionedFile>,
    pub tags: Vec<SymbolicName>,
    pub authors: Vec<String>,
}

impl HistoryModel {
    /// Total LOC across all files at the end of the log.
    pub fn total_loc(&self) -> i64 {
        self.files
            .iter()
            .filter(|f| !f.dead)
            .map(|f| f.final_loc)
            .sum()
    }

    pub fn revision_count(&self) -> usize {
        self.files.iter().map(|f| f.revisions.len()).sum()
    }

    pub fn file(&self, path: &str) -> Option<&VersionedFile> {
        self.files.iter().find(|f| f.path == path)
    }
}
