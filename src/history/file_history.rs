//! Per-file revision chain and LOC reconstruction
//!
//! A [`FileHistory`] holds the raw events of one path, newest first. Once the
//! chain is complete (implicit actions inferred, line diffs filled in),
//! [`FileHistory::build`] turns it into a [`VersionedFile`]: finished
//! revisions, oldest first, each with an absolute LOC snapshot.
//!
//! LOC is anchored at the newest revision (the working copy count, or an
//! approximation for dead files) and walked backwards by subtracting each
//! event's net line change.

use crate::models::{
    FinishedRevision, RevisionEvent, RevisionKind, RevisionNumber, TagTarget, VersionedFile,
};
use crate::repository::RepositoryMetadata;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Raw revision chain of one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHistory {
    path: String,
    /// Newest first.
    revisions: Vec<RevisionEvent>,
    binary: bool,
    in_working_copy: bool,
}

/// Final LOC as resolved for the newest revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalLoc {
    pub loc: i64,
    /// True when the working copy supplied the count.
    pub counted: bool,
}

impl FileHistory {
    pub fn new(path: impl Into<String>, binary: bool, in_working_copy: bool) -> Self {
        Self {
            path: path.into(),
            revisions: Vec::new(),
            binary,
            in_working_copy,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Events, newest first.
    pub fn revisions(&self) -> &[RevisionEvent] {
        &self.revisions
    }

    pub(crate) fn revisions_mut(&mut self) -> &mut Vec<RevisionEvent> {
        &mut self.revisions
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }

    /// Marks the file binary and zeroes every non-creation event.
    pub fn set_binary(&mut self) {
        self.binary = true;
        for event in self.revisions.iter_mut() {
            if !event.is_creation_or_restore() {
                event.set_lines(0, 0);
            }
        }
    }

    pub fn in_working_copy(&self) -> bool {
        self.in_working_copy
    }

    /// Appends an event. Events of binary files carry no line changes
    /// unless they create the file.
    pub fn add_revision(&mut self, mut event: RevisionEvent) {
        if self.binary && !event.is_creation_or_restore() {
            event.set_lines(0, 0);
        }
        self.revisions.push(event);
    }

    /// Sets the line counts of the event at `revision`; false if no such event.
    pub fn update_revision(&mut self, revision: RevisionNumber, added: u32, removed: u32) -> bool {
        match self.revisions.iter_mut().find(|e| e.revision == revision) {
            Some(event) => {
                event.set_lines(added, removed);
                true
            }
            None => false,
        }
    }

    /// Restores newest-first order; stable for equal revisions.
    pub fn sort_newest_first(&mut self) {
        self.revisions.sort_by(|a, b| b.revision.cmp(&a.revision));
    }

    pub fn latest_revision(&self) -> Option<RevisionNumber> {
        self.revisions.first().map(|e| e.revision)
    }

    /// True when the newest event is a deletion.
    pub fn is_dead(&self) -> bool {
        self.revisions.first().is_some_and(RevisionEvent::is_deletion)
    }

    /// Whether every event has known line counts.
    pub fn fully_resolved(&self) -> bool {
        self.revisions.iter().all(RevisionEvent::lines_resolved)
    }

    /// Lower bound for the LOC before the file was deleted: the peak of the
    /// running line count, oldest event first.
    pub fn approximate_loc(&self) -> i64 {
        let mut current: i64 = 0;
        let mut max: i64 = 0;
        for event in self.revisions.iter().rev() {
            current += i64::from(event.lines_added());
            max = max.max(current);
            current -= i64::from(event.lines_removed());
        }
        max
    }

    /// LOC of the newest revision: the working copy count, or the
    /// approximation when the file cannot be counted.
    pub fn final_loc(&self, metadata: &dyn RepositoryMetadata) -> FinalLoc {
        if self.binary {
            return FinalLoc {
                loc: 0,
                counted: false,
            };
        }

        if !self.is_dead() {
            if let (Some(newest), Some(working)) =
                (self.latest_revision(), metadata.working_revision(&self.path))
            {
                if newest != working {
                    info!(
                        "Revision of {} does not match expected revision ({} in log, {} in working copy)",
                        self.path, newest, working
                    );
                }
            }
        }

        match metadata.line_count(&self.path) {
            Ok(loc) => FinalLoc { loc, counted: true },
            Err(e) => {
                if !self.is_dead() {
                    info!("{}", e);
                }
                FinalLoc {
                    loc: self.approximate_loc(),
                    counted: false,
                }
            }
        }
    }

    /// Whether the file existed at any point inside the log window.
    pub fn exists_in_log_period(&self, final_loc: FinalLoc) -> bool {
        !self.revisions.is_empty() || self.binary || final_loc.counted
    }

    /// Reconstructs the finished history, oldest revision first.
    ///
    /// `window_start` is the date of the oldest event in the whole log.
    pub fn build(
        &self,
        final_loc: i64,
        window_start: DateTime<Utc>,
        tags: &[TagTarget],
    ) -> VersionedFile {
        let begin_of_log_date = window_start - Duration::minutes(1);
        let mut finished: Vec<FinishedRevision> = Vec::with_capacity(self.revisions.len() + 2);

        if self.revisions.is_empty() {
            finished.push(begin_of_log(begin_of_log_date, final_loc));
            return self.versioned(final_loc, finished);
        }

        // Newest first while walking; reversed at the end.
        let mut loc = final_loc;
        let last = self.revisions.len() - 1;
        for (index, event) in self.revisions.iter().enumerate() {
            let newer = index.checked_sub(1).map(|i| self.revisions[i].revision);
            let event_tags = self.tags_for(event, newer, tags);
            let older_loc = loc - event.loc_change();

            if index < last {
                let older = &self.revisions[index + 1];
                if event.is_deletion() {
                    finished.push(deletion(event, loc, event_tags));
                } else if event.is_creation_or_restore() || event.is_change() {
                    if older.is_deletion() {
                        finished.push(creation(event, loc, event_tags));
                    } else {
                        finished.push(change(event, loc, event_tags));
                    }
                } else {
                    warn!("illegal state in {}:{}", self.path, event.revision);
                }
            } else if event.is_creation_or_restore() {
                finished.push(creation(event, loc, event_tags));
            } else if event.is_deletion() {
                finished.push(deletion(event, loc, event_tags));
                finished.push(begin_of_log(begin_of_log_date, older_loc));
            } else if event.is_change() {
                finished.push(change(event, loc, event_tags));
                // Synthetic creation holds the pre-change LOC, not 0.
                let mut synthetic = creation(event, older_loc, BTreeSet::new());
                synthetic.date = event.date - Duration::seconds(1);
                synthetic.lines_delta = 0;
                synthetic.lines_replaced = 0;
                finished.push(synthetic);
                finished.push(begin_of_log(begin_of_log_date, older_loc));
            } else {
                warn!("illegal state in {}:{}", self.path, event.revision);
            }

            loc = older_loc;
        }

        finished.reverse();
        let file = self.versioned(final_loc, finished);
        self.check_reconciliation(&file);
        file
    }

    /// Tags captured by `event`: those cut at or after it and before the
    /// next newer revision of this file.
    fn tags_for(
        &self,
        event: &RevisionEvent,
        newer: Option<RevisionNumber>,
        tags: &[TagTarget],
    ) -> BTreeSet<String> {
        if event.is_deletion() {
            return BTreeSet::new();
        }
        tags.iter()
            .filter(|tag| tag.revision >= event.revision)
            .filter(|tag| newer.map_or(true, |newer| tag.revision < newer))
            .map(|tag| tag.name.clone())
            .collect()
    }

    fn versioned(&self, final_loc: i64, revisions: Vec<FinishedRevision>) -> VersionedFile {
        VersionedFile {
            path: self.path.clone(),
            binary: self.binary,
            final_loc,
            dead: self.is_dead(),
            revisions,
        }
    }

    /// Begin-of-log LOC plus the summed deltas against the final LOC, when
    /// the two differ. Chains with unresolved events are not checked.
    fn check_reconciliation(&self, file: &VersionedFile) -> Option<(i64, i64)> {
        if !self.fully_resolved() {
            return None;
        }
        let mut loc = 0;
        for revision in &file.revisions {
            match revision.kind {
                RevisionKind::BeginOfLog => loc = revision.loc,
                RevisionKind::Deletion => loc = 0,
                RevisionKind::Creation | RevisionKind::Change => loc += revision.lines_delta,
            }
        }
        let expected = if file.dead { 0 } else { file.final_loc };
        if loc == expected {
            return None;
        }
        debug!(
            "LOC mismatch for {}: revisions sum to {}, final LOC is {}",
            self.path, loc, expected
        );
        Some((loc, expected))
    }
}

fn creation(event: &RevisionEvent, loc: i64, tags: BTreeSet<String>) -> FinishedRevision {
    finished(RevisionKind::Creation, event, loc, tags)
}

fn change(event: &RevisionEvent, loc: i64, tags: BTreeSet<String>) -> FinishedRevision {
    finished(RevisionKind::Change, event, loc, tags)
}

fn deletion(event: &RevisionEvent, loc: i64, tags: BTreeSet<String>) -> FinishedRevision {
    let mut revision = finished(RevisionKind::Deletion, event, loc, tags);
    revision.lines_delta = 0;
    revision.lines_replaced = 0;
    revision
}

fn finished(
    kind: RevisionKind,
    event: &RevisionEvent,
    loc: i64,
    tags: BTreeSet<String>,
) -> FinishedRevision {
    FinishedRevision {
        kind,
        revision: Some(event.revision),
        date: event.date,
        author: Some(event.author.clone()),
        comment: event.comment.clone(),
        loc,
        lines_delta: event.loc_change(),
        lines_replaced: event.lines_added().min(event.lines_removed()),
        tags,
    }
}

fn begin_of_log(date: DateTime<Utc>, loc: i64) -> FinishedRevision {
    FinishedRevision {
        kind: RevisionKind::BeginOfLog,
        revision: None,
        date,
        author: None,
        comment: String::new(),
        loc,
        lines_delta: 0,
        lines_replaced: 0,
        tags: BTreeSet::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Action;
    use crate::repository::MemoryRepository;
    use chrono::TimeZone;

    fn date(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    fn event(rev: u64, action: Action, lines: Option<(u32, u32)>) -> RevisionEvent {
        let mut e = RevisionEvent::new(RevisionNumber(rev), action, date(rev as u32), "dev", "");
        if let Some((a, r)) = lines {
            e.set_lines(a, r);
        }
        e
    }

    fn history(events: Vec<RevisionEvent>) -> FileHistory {
        let mut h = FileHistory::new("src/a.c", false, true);
        for e in events {
            h.add_revision(e);
        }
        h
    }

    fn kinds(file: &VersionedFile) -> Vec<RevisionKind> {
        file.revisions.iter().map(|r| r.kind).collect()
    }

    #[test]
    fn test_created_and_changed_file() {
        let h = history(vec![
            event(3, Action::Modified, Some((5, 2))),
            event(1, Action::Added, Some((10, 0))),
        ]);
        let file = h.build(13, date(1), &[]);

        assert_eq!(kinds(&file), vec![RevisionKind::Creation, RevisionKind::Change]);
        assert_eq!(file.revisions[0].loc, 10);
        assert_eq!(file.revisions[1].loc, 13);
        assert_eq!(file.revisions[1].lines_delta, 3);
        assert_eq!(file.revisions[1].lines_replaced, 2);
    }

    #[test]
    fn test_reconciliation_accepts_consistent_chain() {
        let h = history(vec![
            event(3, Action::Modified, Some((5, 2))),
            event(1, Action::Added, Some((10, 0))),
        ]);
        let file = h.build(13, date(1), &[]);
        assert_eq!(h.check_reconciliation(&file), None);
    }

    #[test]
    fn test_reconciliation_reports_mismatch() {
        let h = history(vec![
            event(3, Action::Modified, Some((5, 2))),
            event(1, Action::Added, Some((10, 0))),
        ]);
        // Working copy has 7 more lines than the diffs account for
        let file = h.build(20, date(1), &[]);
        assert_eq!(h.check_reconciliation(&file), Some((13, 20)));
    }

    #[test]
    fn test_reconciliation_skips_partially_resolved_chain() {
        let h = history(vec![
            event(3, Action::Modified, None),
            event(1, Action::Added, Some((10, 0))),
        ]);
        let file = h.build(20, date(1), &[]);
        assert_eq!(h.check_reconciliation(&file), None);
    }

    #[test]
    fn test_oldest_change_gets_synthetic_creation_and_begin_of_log() {
        let h = history(vec![event(4, Action::Modified, Some((5, 1)))]);
        let file = h.build(20, date(2), &[]);

        assert_eq!(
            kinds(&file),
            vec![
                RevisionKind::BeginOfLog,
                RevisionKind::Creation,
                RevisionKind::Change
            ]
        );
        let bol = &file.revisions[0];
        assert_eq!(bol.loc, 16);
        assert_eq!(bol.date, date(2) - Duration::minutes(1));
        assert_eq!(bol.revision, None);

        let synthetic = &file.revisions[1];
        assert_eq!(synthetic.loc, 16);
        assert_eq!(synthetic.lines_delta, 0);
        assert_eq!(synthetic.date, date(4) - Duration::seconds(1));
        assert_eq!(file.revisions[2].loc, 20);
    }

    #[test]
    fn test_oldest_deletion_gets_begin_of_log() {
        let h = history(vec![event(5, Action::Deleted, Some((0, 0)))]);
        let file = h.build(42, date(1), &[]);

        assert_eq!(kinds(&file), vec![RevisionKind::BeginOfLog, RevisionKind::Deletion]);
        assert_eq!(file.revisions[0].loc, 42);
        assert_eq!(file.revisions[1].loc, 42);
        assert!(file.dead);
    }

    #[test]
    fn test_change_after_deletion_is_a_restore() {
        let h = history(vec![
            event(7, Action::Modified, Some((4, 0))),
            event(5, Action::Deleted, None),
            event(2, Action::Added, Some((3, 0))),
        ]);
        let file = h.build(4, date(1), &[]);

        assert_eq!(
            kinds(&file),
            vec![
                RevisionKind::Creation,
                RevisionKind::Deletion,
                RevisionKind::Creation
            ]
        );
        assert_eq!(file.revisions[2].revision, Some(RevisionNumber(7)));
    }

    #[test]
    fn test_empty_chain_in_working_copy() {
        let h = FileHistory::new("README", false, true);
        let file = h.build(7, date(3), &[]);
        assert_eq!(kinds(&file), vec![RevisionKind::BeginOfLog]);
        assert_eq!(file.revisions[0].loc, 7);
    }

    #[test]
    fn test_binary_file_has_zero_deltas() {
        let mut h = FileHistory::new("logo.png", true, true);
        h.add_revision(event(3, Action::Modified, None));
        h.add_revision(event(1, Action::Added, None));
        assert_eq!(h.revisions()[0].lines(), Some(crate::models::LineDiff::default()));
        assert!(!h.revisions()[1].lines_resolved());

        let repo = MemoryRepository::new("u", "/trunk").with_file("logo.png", 99, 3);
        assert_eq!(h.final_loc(&repo).loc, 0);
    }

    #[test]
    fn test_approximate_loc_is_peak_of_running_count() {
        let h = history(vec![
            event(5, Action::Deleted, Some((0, 0))),
            event(3, Action::Modified, Some((2, 8))),
            event(2, Action::Modified, Some((6, 0))),
            event(1, Action::Added, Some((10, 0))),
        ]);
        assert_eq!(h.approximate_loc(), 18);
    }

    #[test]
    fn test_final_loc_falls_back_to_approximation() {
        let h = history(vec![
            event(5, Action::Deleted, Some((0, 0))),
            event(1, Action::Added, Some((10, 0))),
        ]);
        let repo = MemoryRepository::new("u", "/trunk");
        let final_loc = h.final_loc(&repo);
        assert_eq!(final_loc, FinalLoc { loc: 10, counted: false });
        assert!(h.exists_in_log_period(final_loc));

        let never = FileHistory::new("ghost.c", false, false);
        assert!(!never.exists_in_log_period(never.final_loc(&repo)));
    }

    #[test]
    fn test_tags_attach_to_latest_revision_at_cut() {
        let h = history(vec![
            event(8, Action::Modified, Some((1, 0))),
            event(4, Action::Modified, Some((1, 0))),
            event(1, Action::Added, Some((1, 0))),
        ]);
        let tags = vec![
            TagTarget {
                name: "v1".into(),
                revision: RevisionNumber(5),
                date: date(5),
            },
            TagTarget {
                name: "v2".into(),
                revision: RevisionNumber(9),
                date: date(9),
            },
            TagTarget {
                name: "v0".into(),
                revision: RevisionNumber(1),
                date: date(1),
            },
        ];
        let file = h.build(3, date(1), &tags);

        let tags_of = |rev: u64| {
            file.revisions
                .iter()
                .find(|r| r.revision == Some(RevisionNumber(rev)))
                .map(|r| r.tags.iter().cloned().collect::<Vec<_>>())
                .unwrap()
        };
        assert_eq!(tags_of(1), vec!["v0"]);
        assert_eq!(tags_of(4), vec!["v1"]);
        assert_eq!(tags_of(8), vec!["v2"]);
    }

    #[test]
    fn test_deleted_file_not_attributed_to_later_tag() {
        let h = history(vec![
            event(5, Action::Deleted, None),
            event(1, Action::Added, Some((1, 0))),
        ]);
        let tags = vec![TagTarget {
            name: "v1".into(),
            revision: RevisionNumber(6),
            date: date(6),
        }];
        let file = h.build(1, date(1), &tags);
        assert!(file.revisions.iter().all(|r| r.tags.is_empty()));
    }

    #[test]
    fn test_update_and_sort() {
        let mut h = history(vec![
            event(1, Action::Added, None),
            event(3, Action::Modified, None),
        ]);
        h.sort_newest_first();
        assert_eq!(h.latest_revision(), Some(RevisionNumber(3)));
        assert!(h.update_revision(RevisionNumber(3), 2, 1));
        assert!(!h.update_revision(RevisionNumber(9), 2, 1));
        assert!(!h.fully_resolved());
    }
}
