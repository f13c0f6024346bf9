//! Implicit action inference
//!
//! The log records a directory add, copy or delete only once, on the
//! directory itself. This pass copies those events onto every file below
//! the directory, then repairs the chains where the copies overshoot.

use super::{FileHistory, Histories};
use crate::models::{RevisionEvent, RevisionNumber};
use crate::repository::RepositoryMetadata;
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::cmp::Ordering;
use tracing::{debug, trace};

/// What the inference pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InferenceReport {
    /// Paths recognized as directories and removed from the histories.
    pub directories: Vec<String>,
    /// Events copied from a directory onto a descendant.
    pub synthesized: usize,
    /// Consecutive deletions dropped.
    pub duplicate_deletions: usize,
    /// Entries dropped to make a vanished file end in a deletion.
    pub inconsistent_entries: usize,
}

/// Copies directory-level creations and deletions onto descendant files.
pub struct ImplicitActionInferencer<'a> {
    metadata: &'a dyn RepositoryMetadata,
    implicit: FxHashSet<(String, RevisionNumber)>,
}

impl<'a> ImplicitActionInferencer<'a> {
    pub fn new(metadata: &'a dyn RepositoryMetadata) -> Self {
        Self {
            metadata,
            implicit: FxHashSet::default(),
        }
    }

    /// Runs inference, both repairs and directory removal.
    pub fn run(&mut self, histories: &mut Histories) -> InferenceReport {
        let (directories, synthesized) = self.infer(histories);
        let duplicate_deletions = repair_duplicate_deletions(histories);
        let inconsistent_entries = self.repair_inconsistencies(histories);
        let directories = remove_directories(histories, directories, self.metadata);

        let report = InferenceReport {
            directories,
            synthesized,
            duplicate_deletions,
            inconsistent_entries,
        };
        debug!(
            "Implicit actions: {} synthesized, {} duplicate deletions, {} inconsistent entries, {} directories",
            report.synthesized,
            report.duplicate_deletions,
            report.inconsistent_entries,
            report.directories.len()
        );
        report
    }

    /// Whether the event at (`path`, `revision`) was synthesized.
    pub fn is_implicit(&self, path: &str, revision: RevisionNumber) -> bool {
        self.implicit.contains(&(path.to_string(), revision))
    }

    /// Synthesizes descendant events. Returns the paths that have
    /// descendants and the number of events inserted.
    pub fn infer(&mut self, histories: &mut Histories) -> (Vec<String>, usize) {
        let paths = sorted_paths(histories);
        let mut directories = Vec::new();
        let mut synthesized = 0;

        for (index, parent) in paths.iter().enumerate() {
            let prefix = format!("{}/", parent);
            let children: Vec<&String> = paths[index + 1..]
                .iter()
                .take_while(|p| p.starts_with(&prefix))
                .collect();
            if children.is_empty() {
                continue;
            }
            directories.push(parent.clone());

            let parent_events: Vec<RevisionEvent> = histories
                .get(parent)
                .map(|h| {
                    h.revisions()
                        .iter()
                        .filter(|e| e.is_creation_or_restore() || e.is_deletion())
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            if parent_events.is_empty() {
                continue;
            }

            for child in children {
                let Some(history) = histories.get_mut(child.as_str()) else {
                    continue;
                };
                for event in &parent_events {
                    if insert_implicit(history, event) {
                        trace!("implicit {:?} of {} at r{}", event.action, child, event.revision);
                        self.implicit.insert((child.clone(), event.revision));
                        synthesized += 1;
                    }
                }
            }
        }

        (directories, synthesized)
    }

    /// For files gone from the working copy whose newest event is not a
    /// deletion, drops synthesized entries newer than the oldest synthesized
    /// deletion reachable without crossing an explicit or change entry.
    pub fn repair_inconsistencies(&self, histories: &mut Histories) -> usize {
        let mut removed = 0;
        for (path, history) in histories.iter_mut() {
            if history.is_dead()
                || history.revisions().is_empty()
                || history.in_working_copy()
                || self.metadata.exists_in_working_copy(path)
            {
                continue;
            }

            let mut earliest_delete = None;
            for (index, event) in history.revisions().iter().enumerate() {
                if event.is_deletion() {
                    earliest_delete = Some(index);
                }
                if event.is_change() || !self.is_implicit(path, event.revision) {
                    break;
                }
            }

            if let Some(index) = earliest_delete.filter(|&i| i > 0) {
                debug!("Dropping {} inconsistent entries of {}", index, path);
                history.revisions_mut().drain(..index);
                removed += index;
            }
        }
        removed
    }
}

/// Inserts a copy of `event` at its place in the chain. Nothing happens on
/// an exact revision match or when every existing entry is newer.
fn insert_implicit(history: &mut FileHistory, event: &RevisionEvent) -> bool {
    let mut position = None;
    for (index, existing) in history.revisions().iter().enumerate() {
        match event.revision.cmp(&existing.revision) {
            Ordering::Equal => return false,
            Ordering::Greater => {
                position = Some(index);
                break;
            }
            Ordering::Less => {}
        }
    }
    let Some(index) = position else {
        return false;
    };

    let mut copy = event.clone();
    copy.clear_lines();
    if history.is_binary() && !copy.is_creation_or_restore() {
        copy.set_lines(0, 0);
    }
    history.revisions_mut().insert(index, copy);
    true
}

/// Drops every deletion directly following another deletion.
pub fn repair_duplicate_deletions(histories: &mut Histories) -> usize {
    let mut removed = 0;
    for history in histories.values_mut() {
        let before = history.revisions().len();
        let mut previous_deletion = false;
        history.revisions_mut().retain(|event| {
            let duplicate = previous_deletion && event.is_deletion();
            previous_deletion = event.is_deletion();
            !duplicate
        });
        removed += before - history.revisions().len();
    }
    removed
}

/// Removes directory histories: paths with descendants plus anything the
/// working copy reports as a directory.
pub fn remove_directories(
    histories: &mut Histories,
    mut directories: Vec<String>,
    metadata: &dyn RepositoryMetadata,
) -> Vec<String> {
    directories.extend(
        histories
            .keys()
            .filter(|path| metadata.is_directory(path))
            .cloned(),
    );
    directories.sort();
    directories.dedup();
    for directory in &directories {
        histories.remove(directory);
    }
    directories
}

/// Paths ordered so that a directory is immediately followed by its
/// descendants (`/` sorts before every other character).
fn sorted_paths(histories: &Histories) -> Vec<String> {
    let mut paths: Vec<String> = histories.keys().cloned().collect();
    paths.sort_by_cached_key(|p| p.replace('/', "\t"));
    paths
}
