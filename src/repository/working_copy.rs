//! Local working copy access (line counts)

use super::{RepositoryError, RepositoryResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

/// A checked out module on the local filesystem.
#[derive(Debug, Clone)]
pub struct WorkingCopy {
    root: PathBuf,
}

impl WorkingCopy {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a module-relative path (always `/`-separated).
    pub fn resolve(&self, relative: &str) -> PathBuf {
        if relative == "." || relative.is_empty() {
            return self.root.clone();
        }
        relative
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    /// Counts lines the way a line reader would: a trailing line without a
    /// newline still counts.
    pub fn line_count(&self, relative: &str) -> RepositoryResult<i64> {
        let path = self.resolve(relative);
        let bytes = fs::read(&path).map_err(|e| RepositoryError::NoLineCount {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let count = count_lines(&bytes);
        trace!("line count for '{}': {}", path.display(), count);
        Ok(count)
    }
}

/// Number of lines in `bytes`.
pub fn count_lines(bytes: &[u8]) -> i64 {
    let newlines = memchr::memchr_iter(b'\n', bytes).count();
    let trailing = usize::from(!bytes.is_empty() && bytes.last() != Some(&b'\n'));
    i64::try_from(newlines + trailing).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_count_lines() {
        assert_eq!(count_lines(b""), 0);
        assert_eq!(count_lines(b"one"), 1);
        assert_eq!(count_lines(b"one\n"), 1);
        assert_eq!(count_lines(b"one\ntwo\n\nfour"), 4);
    }

    #[test]
    fn test_line_count_of_working_copy_file() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        fs::write(tmp.path().join("src/lib.rs"), "a\nb\nc\n").unwrap();

        let wc = WorkingCopy::new(tmp.path());
        assert_eq!(wc.line_count("src/lib.rs").unwrap(), 3);
        assert_eq!(wc.resolve("src/lib.rs"), tmp.path().join("src").join("lib.rs"));
        assert_eq!(wc.resolve("."), tmp.path().to_path_buf());
    }

    #[test]
    fn test_missing_file_has_no_line_count() {
        let tmp = TempDir::new().unwrap();
        let wc = WorkingCopy::new(tmp.path());
        let err = wc.line_count("gone.c").unwrap_err();
        assert!(matches!(err, RepositoryError::NoLineCount { .. }));
    }
}
