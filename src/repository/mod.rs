//! Repository access
//!
//! The history core only talks to the repository through two capabilities:
//!
//! - [`DiffProvider`] - line diffs between two revisions of a file, or for a
//!   whole revision at once
//! - [`RepositoryMetadata`] - working copy facts (line counts, node kinds,
//!   revisions, binary files) and repository identity
//!
//! Two implementations exist: [`SvnCommandLine`] shells out to the `svn`
//! client, [`MemoryRepository`] answers from in-memory fixtures.

pub mod diff_parse;
mod memory;
mod svn_cli;
mod working_copy;

pub use memory::MemoryRepository;
pub use svn_cli::{SvnCommandLine, SvnCredentials, MINIMUM_VERSION, MINIMUM_VERSION_PER_REVISION};
pub use working_copy::WorkingCopy;

use crate::models::{LineDiff, RevisionNumber};
use thiserror::Error;

/// Errors raised by repository capabilities
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// The content type prevents textual diffing. Not a failure: callers
    /// record the file as binary with zero line changes.
    #[error("Cannot display: file marked as a binary type")]
    BinaryContent,

    #[error("Diff output for {path} (r{old} to r{new}) could not be interpreted")]
    InconclusiveDiff {
        path: String,
        old: RevisionNumber,
        new: RevisionNumber,
    },

    #[error("Could not get line count for '{path}': {reason}")]
    NoLineCount { path: String, reason: String },

    #[error("svn command failed: {command}: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Subversion {found} found, but {required} or newer is required")]
    VersionMismatch { found: String, required: String },

    #[error("Repository metadata unavailable: {0}")]
    MissingMetadata(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RepositoryError {
    pub fn is_binary(&self) -> bool {
        matches!(self, RepositoryError::BinaryContent)
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Line diff of one file inside a whole-revision diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    /// Module-relative path as printed by the diff.
    pub path: String,
    /// `None` when the diff could not be interpreted.
    pub lines: Option<LineDiff>,
    pub binary: bool,
}

/// "Diff between two points" capability.
pub trait DiffProvider: Send + Sync {
    /// Lines added/removed in `path` between `old` and `new`.
    fn line_diff(
        &self,
        old: RevisionNumber,
        new: RevisionNumber,
        path: &str,
    ) -> RepositoryResult<LineDiff>;

    /// Diffs of every file touched by `revision`.
    fn revision_diff(&self, revision: RevisionNumber) -> RepositoryResult<Vec<FileDiff>>;
}

/// "Repository metadata lookup" capability.
pub trait RepositoryMetadata: Send + Sync {
    /// Authoritative line count of `path` in the working copy.
    fn line_count(&self, path: &str) -> RepositoryResult<i64>;

    fn is_directory(&self, path: &str) -> bool;

    fn exists_in_working_copy(&self, path: &str) -> bool;

    /// Whether the working copy marks `path` as binary.
    fn is_binary(&self, path: &str) -> bool;

    /// Last changed revision of `path` in the working copy.
    fn working_revision(&self, path: &str) -> Option<RevisionNumber>;

    /// Revision of the working copy root.
    fn root_revision(&self) -> Option<RevisionNumber>;

    fn repository_uuid(&self) -> &str;

    /// Repository path of the working copy root, e.g. `/trunk`.
    fn module_name(&self) -> &str;

    /// Maps a repository path to a module-relative path; `None` when the
    /// path is outside the checked out module.
    fn absolute_to_relative(&self, absolute: &str) -> Option<String> {
        relative_to_module(self.module_name(), absolute)
    }
}

/// Strips `module` from a repository path.
pub fn relative_to_module(module: &str, absolute: &str) -> Option<String> {
    let absolute = absolute.strip_suffix('/').unwrap_or(absolute);
    let module = module.strip_suffix('/').unwrap_or(module);
    if absolute == module {
        return Some(".".to_string());
    }
    absolute
        .strip_prefix(module)?
        .strip_prefix('/')
        .filter(|rest| !rest.is_empty())
        .map(str::to_string)
}

/// Joins a module-relative path back onto `module`.
pub fn absolute_in_module(module: &str, relative: &str) -> String {
    let module = module.strip_suffix('/').unwrap_or(module);
    if relative == "." || relative.is_empty() {
        module.to_string()
    } else {
        format!("{}/{}", module, relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_to_module() {
        assert_eq!(
            relative_to_module("/trunk", "/trunk/src/main.c").as_deref(),
            Some("src/main.c")
        );
        assert_eq!(relative_to_module("/trunk", "/trunk/").as_deref(), Some("."));
        assert_eq!(relative_to_module("/trunk", "/tags/1.0/main.c"), None);
        // Sibling directory sharing the module prefix
        assert_eq!(relative_to_module("/trunk", "/trunk2/main.c"), None);
        assert_eq!(
            relative_to_module("", "/trunk/main.c").as_deref(),
            Some("trunk/main.c")
        );
    }

    #[test]
    fn test_absolute_in_module() {
        assert_eq!(absolute_in_module("/trunk", "src/a.c"), "/trunk/src/a.c");
        assert_eq!(absolute_in_module("/trunk/", "."), "/trunk");
        assert_eq!(absolute_in_module("", "a.c"), "/a.c");
    }

    #[test]
    fn test_binary_classification() {
        assert!(RepositoryError::BinaryContent.is_binary());
        assert!(!RepositoryError::MissingMetadata("uuid".into()).is_binary());
    }
}
