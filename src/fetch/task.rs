//! Diff task planning

use crate::cache::LineDiffCache;
use crate::config::DiffMode;
use crate::history::{Histories, PathFilter};
use crate::models::RevisionNumber;
use std::collections::BTreeSet;
use std::fmt;

/// One pending diff request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffTask {
    /// Diff of one file between two of its revisions.
    PerFile {
        path: String,
        new: RevisionNumber,
        old: RevisionNumber,
    },
    /// Every file touched by one revision.
    PerRevision { revision: RevisionNumber },
}

impl fmt::Display for DiffTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffTask::PerFile { path, new, old } => write!(f, "{} r{}:r{}", path, old, new),
            DiffTask::PerRevision { revision } => write!(f, "r{}", revision),
        }
    }
}

/// Lists the diffs still needed after the cache has been applied.
///
/// An event needs a diff when its lines are unknown, it has an older
/// neighbour, neither of the two is a deletion and the cache does not
/// already know the file is binary at that revision.
pub fn plan(
    histories: &Histories,
    cache: &LineDiffCache,
    filter: &PathFilter,
    mode: DiffMode,
) -> Vec<DiffTask> {
    let mut per_file = Vec::new();

    for (path, history) in histories {
        if history.is_binary() || !filter.matches(path) {
            continue;
        }
        for pair in history.revisions().windows(2) {
            let (event, older) = (&pair[0], &pair[1]);
            if event.lines_resolved()
                || event.is_deletion()
                || older.is_deletion()
                || cache.is_binary(path, event.revision)
            {
                continue;
            }
            per_file.push(DiffTask::PerFile {
                path: path.clone(),
                new: event.revision,
                old: older.revision,
            });
        }
    }

    match mode {
        DiffMode::PerFile => per_file,
        DiffMode::PerRevision => per_file
            .iter()
            .filter_map(|task| match task {
                DiffTask::PerFile { new, .. } => Some(*new),
                DiffTask::PerRevision { .. } => None,
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|revision| DiffTask::PerRevision { revision })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::FileHistory;
    use crate::models::{Action, RevisionEvent};
    use chrono::Utc;

    fn history(path: &str, binary: bool, events: &[(u64, Action, bool)]) -> FileHistory {
        let mut h = FileHistory::new(path, binary, true);
        for (rev, action, resolved) in events {
            let mut e = RevisionEvent::new(RevisionNumber(*rev), *action, Utc::now(), "a", "");
            if *resolved {
                e.set_lines(1, 0);
            }
            h.add_revision(e);
        }
        h
    }

    fn histories() -> Histories {
        let mut h = Histories::new();
        h.insert(
            "a.c".into(),
            history(
                "a.c",
                false,
                &[
                    (9, Action::Modified, false),
                    (7, Action::Added, false),
                    (5, Action::Deleted, false),
                    (3, Action::Modified, true),
                    (2, Action::Modified, false),
                    (1, Action::Added, false),
                ],
            ),
        );
        h.insert(
            "b.c".into(),
            history("b.c", false, &[(9, Action::Modified, false), (4, Action::Added, false)]),
        );
        h.insert(
            "logo.png".into(),
            history("logo.png", true, &[(9, Action::Modified, false), (4, Action::Added, false)]),
        );
        h
    }

    #[test]
    fn test_per_file_candidates() {
        let cache = LineDiffCache::in_memory("u", "/trunk");
        let tasks = plan(&histories(), &cache, &PathFilter::default(), DiffMode::PerFile);

        assert_eq!(
            tasks,
            vec![
                DiffTask::PerFile {
                    path: "a.c".into(),
                    new: RevisionNumber(9),
                    old: RevisionNumber(7)
                },
                DiffTask::PerFile {
                    path: "a.c".into(),
                    new: RevisionNumber(2),
                    old: RevisionNumber(1)
                },
                DiffTask::PerFile {
                    path: "b.c".into(),
                    new: RevisionNumber(9),
                    old: RevisionNumber(4)
                },
            ]
        );
    }

    #[test]
    fn test_per_revision_dedups() {
        let cache = LineDiffCache::in_memory("u", "/trunk");
        let tasks = plan(&histories(), &cache, &PathFilter::default(), DiffMode::PerRevision);
        assert_eq!(
            tasks,
            vec![
                DiffTask::PerRevision {
                    revision: RevisionNumber(2)
                },
                DiffTask::PerRevision {
                    revision: RevisionNumber(9)
                },
            ]
        );
    }

    #[test]
    fn test_cached_binary_and_filtered_files_skipped() {
        let mut cache = LineDiffCache::in_memory("u", "/trunk");
        cache.record_diff("b.c", RevisionNumber(9), 0, 0, true);
        let filter = PathFilter::new(None, Some("a.c")).unwrap();

        assert!(plan(&histories(), &cache, &filter, DiffMode::PerFile).is_empty());
    }
}
