//! Event ingestion
//!
//! [`HistoryBuilder`] turns log events into per-file chains, collecting the
//! author registry, tag targets and the log window start on the way.
//! [`LogHistory`] is the result; after inference and diff resolution it
//! produces the finished [`HistoryModel`].

use super::{FileHistory, Histories, PathFilter};
use crate::events::LogEvent;
use crate::models::{HistoryModel, RevisionEvent, RevisionNumber, SymbolicName, TagTarget};
use crate::repository::RepositoryMetadata;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use regex::Regex;
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

/// Author name used for commits without one.
pub const UNKNOWN_AUTHOR: &str = "(unknown)";

/// Collects log events into per-file chains.
pub struct HistoryBuilder {
    module: String,
    tags_directory: String,
    tags_pattern: Option<Regex>,
    histories: Histories,
    authors: Vec<String>,
    author_keys: FxHashSet<String>,
    tags: Vec<TagTarget>,
    tag_names: FxHashSet<String>,
    start_date: Option<DateTime<Utc>>,
    outside_module: usize,
}

impl HistoryBuilder {
    pub fn new(
        module: impl Into<String>,
        tags_directory: impl Into<String>,
        tags_pattern: Option<Regex>,
    ) -> Self {
        Self {
            module: module.into(),
            tags_directory: tags_directory.into(),
            tags_pattern,
            histories: Histories::new(),
            authors: Vec::new(),
            author_keys: FxHashSet::default(),
            tags: Vec::new(),
            tag_names: FxHashSet::default(),
            start_date: None,
            outside_module: 0,
        }
    }

    pub fn ingest_all(&mut self, events: &[LogEvent], metadata: &dyn RepositoryMetadata) {
        for event in events {
            self.ingest(event, metadata);
        }
        debug!(
            "Ingested {} events: {} files, {} tags, {} authors, {} paths outside module",
            events.len(),
            self.histories.len(),
            self.tags.len(),
            self.authors.len(),
            self.outside_module
        );
    }

    /// Routes one event to its file chain, or to tag detection when the
    /// path lies outside the module.
    pub fn ingest(&mut self, event: &LogEvent, metadata: &dyn RepositoryMetadata) {
        let Some(path) = metadata.absolute_to_relative(&event.path) else {
            self.outside_module += 1;
            self.detect_tag(event);
            return;
        };
        if path == "." {
            trace!("Skipping event on module root at r{}", event.revision);
            return;
        }

        let binary = metadata.is_binary(&path);
        let in_working_copy = metadata.exists_in_working_copy(&path);
        self.build_file(&path, binary, in_working_copy);

        let author = self.register_author(&event.author);
        let revision = RevisionEvent::new(
            event.revision,
            event.action,
            event.date,
            author,
            event.message.clone(),
        )
        .with_copy_from(event.copy_from());
        self.build_revision(&path, revision);
    }

    /// Returns the history for `path`, creating it on first sighting. A
    /// history without events is replaced when re-announced as a different
    /// kind of file.
    pub fn build_file(&mut self, path: &str, binary: bool, in_working_copy: bool) -> &mut FileHistory {
        let replace = self
            .histories
            .get(path)
            .is_some_and(|h| h.revisions().is_empty() && h.is_binary() != binary);
        if replace {
            trace!("Replacing history of {}", path);
            self.histories.remove(path);
        }
        self.histories
            .entry(path.to_string())
            .or_insert_with(|| FileHistory::new(path, binary, in_working_copy))
    }

    /// Appends `event` to the chain of `path`, which must have been built.
    pub fn build_revision(&mut self, path: &str, event: RevisionEvent) {
        if self.start_date.map_or(true, |start| event.date < start) {
            self.start_date = Some(event.date);
        }
        match self.histories.get_mut(path) {
            Some(history) => history.add_revision(event),
            None => debug!("Revision r{} for unknown file {}", event.revision, path),
        }
    }

    /// Registers an author case-insensitively; returns the first spelling seen.
    pub fn register_author(&mut self, name: &str) -> String {
        let name = name.trim();
        let name = if name.is_empty() { UNKNOWN_AUTHOR } else { name };
        let key = name.to_lowercase();
        if self.author_keys.insert(key.clone()) {
            self.authors.push(name.to_string());
            return name.to_string();
        }
        self.authors
            .iter()
            .find(|a| a.to_lowercase() == key)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Records a tag unless one of that name is already known or it fails
    /// the tag pattern.
    pub fn add_tag(&mut self, name: &str, revision: RevisionNumber, date: DateTime<Utc>) -> bool {
        if self.tag_names.contains(name) {
            return false;
        }
        if let Some(pattern) = &self.tags_pattern {
            if !pattern.is_match(name) {
                trace!("Tag {} does not match the tag pattern", name);
                return false;
            }
        }
        self.tag_names.insert(name.to_string());
        self.tags.push(TagTarget {
            name: name.to_string(),
            revision,
            date,
        });
        true
    }

    fn detect_tag(&mut self, event: &LogEvent) {
        let Some(source) = event.copy_from() else {
            return;
        };
        let Some(start) = event.path.find(&self.tags_directory) else {
            return;
        };
        let rest = &event.path[start + self.tags_directory.len()..];
        let name = rest.split('/').next().unwrap_or_default();
        if name.is_empty() {
            return;
        }
        if self.add_tag(name, source.revision, event.date) {
            debug!("Found tag {} at r{}", name, source.revision);
        }
    }

    pub fn start_date(&self) -> Option<DateTime<Utc>> {
        self.start_date
    }

    pub fn histories(&self) -> &Histories {
        &self.histories
    }

    /// Sorts every chain newest first and hands over the collected state.
    pub fn finish(mut self) -> LogHistory {
        for history in self.histories.values_mut() {
            history.sort_newest_first();
        }
        self.tags.sort_by(|a, b| a.revision.cmp(&b.revision));
        LogHistory {
            module: self.module,
            start_date: self.start_date,
            histories: self.histories,
            tags: self.tags,
            authors: self.authors,
        }
    }
}

/// Ingested log: per-file chains plus log-wide facts.
#[derive(Debug, Clone, Default)]
pub struct LogHistory {
    pub module: String,
    pub start_date: Option<DateTime<Utc>>,
    pub histories: Histories,
    pub tags: Vec<TagTarget>,
    pub authors: Vec<String>,
}

impl LogHistory {
    /// Fills in the line counts of one event; false if there is no such event.
    pub fn update_revision(
        &mut self,
        path: &str,
        revision: RevisionNumber,
        added: u32,
        removed: u32,
    ) -> bool {
        self.histories
            .get_mut(path)
            .is_some_and(|h| h.update_revision(revision, added, removed))
    }

    /// Builds the finished model. Filtered files and files that never existed
    /// inside the log window are left out.
    pub fn build_model(
        &self,
        metadata: &dyn RepositoryMetadata,
        filter: &PathFilter,
    ) -> HistoryModel {
        let window_start = self.start_date.unwrap_or_else(Utc::now);

        let files: Vec<_> = self
            .histories
            .par_iter()
            .filter(|(path, _)| filter.matches(path))
            .filter_map(|(_, history)| {
                let final_loc = history.final_loc(metadata);
                if !history.exists_in_log_period(final_loc) {
                    trace!("{} never existed inside the log window", history.path());
                    return None;
                }
                Some(history.build(final_loc.loc, window_start, &self.tags))
            })
            .collect();

        let tags = self
            .tags
            .iter()
            .map(|tag| SymbolicName {
                name: tag.name.clone(),
                date: tag.date,
                revisions: files
                    .iter()
                    .flat_map(|file| {
                        file.revisions
                            .iter()
                            .filter(|r| r.tags.contains(&tag.name))
                            .filter_map(|r| r.revision.map(|rev| (file.path.clone(), rev)))
                    })
                    .collect(),
            })
            .collect();

        HistoryModel {
            module: self.module.clone(),
            start_date: self.start_date,
            files,
            tags,
            authors: self.authors.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, RevisionKind};
    use crate::repository::MemoryRepository;
    use chrono::TimeZone;

    fn date(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 9, 30, 0).unwrap()
    }

    fn log_event(path: &str, action: Action, rev: u64, author: &str) -> LogEvent {
        LogEvent {
            path: path.to_string(),
            action,
            copy_from_path: None,
            copy_from_revision: None,
            revision: RevisionNumber(rev),
            author: author.to_string(),
            date: date(rev as u32),
            message: format!("r{}", rev),
        }
    }

    fn builder() -> HistoryBuilder {
        HistoryBuilder::new("/trunk", "/tags/", None)
    }

    #[test]
    fn test_ingest_groups_events_by_file() {
        let repo = MemoryRepository::new("u", "/trunk").with_file("src/a.c", 3, 4);
        let mut b = builder();
        b.ingest_all(
            &[
                log_event("/trunk/src/a.c", Action::Modified, 4, "alice"),
                log_event("/trunk/src/b.c", Action::Deleted, 3, "Alice"),
                log_event("/trunk/src/a.c", Action::Added, 2, ""),
                log_event("/branches/x/a.c", Action::Added, 3, "bob"),
            ],
            &repo,
        );

        assert_eq!(b.histories().len(), 2);
        assert!(b.histories()["src/a.c"].in_working_copy());
        assert!(!b.histories()["src/b.c"].in_working_copy());
        assert_eq!(b.start_date(), Some(date(2)));

        let log = b.finish();
        assert_eq!(log.authors, vec!["alice", UNKNOWN_AUTHOR]);
        assert_eq!(log.histories["src/b.c"].revisions()[0].author, "alice");
    }

    #[test]
    fn test_finish_sorts_chains_newest_first() {
        let repo = MemoryRepository::new("u", "/trunk");
        let mut b = builder();
        b.ingest(&log_event("/trunk/a.c", Action::Added, 1, "a"), &repo);
        b.ingest(&log_event("/trunk/a.c", Action::Modified, 5, "a"), &repo);
        b.ingest(&log_event("/trunk/a.c", Action::Modified, 3, "a"), &repo);

        let log = b.finish();
        let revs: Vec<u64> = log.histories["a.c"]
            .revisions()
            .iter()
            .map(|e| e.revision.get())
            .collect();
        assert_eq!(revs, vec![5, 3, 1]);
    }

    #[test]
    fn test_tag_detection() {
        let repo = MemoryRepository::new("u", "/trunk");
        let mut b = HistoryBuilder::new("/trunk", "/tags/", Some(Regex::new("^v").unwrap()));

        let mut release = log_event("/tags/v1.0", Action::Added, 9, "rel");
        release.copy_from_path = Some("/trunk".into());
        release.copy_from_revision = Some(RevisionNumber(8));
        let mut again = log_event("/tags/v1.0/sub", Action::Added, 7, "rel");
        again.copy_from_path = Some("/trunk/sub".into());
        again.copy_from_revision = Some(RevisionNumber(6));
        let mut nightly = log_event("/tags/nightly", Action::Added, 9, "rel");
        nightly.copy_from_path = Some("/trunk".into());
        nightly.copy_from_revision = Some(RevisionNumber(8));
        let plain = log_event("/tags/v2.0", Action::Added, 10, "rel");

        for e in [&release, &again, &nightly, &plain] {
            b.ingest(e, &repo);
        }

        let log = b.finish();
        assert_eq!(log.tags.len(), 1);
        assert_eq!(log.tags[0].name, "v1.0");
        assert_eq!(log.tags[0].revision, RevisionNumber(8));
        assert_eq!(log.tags[0].date, date(9));
    }

    #[test]
    fn test_reannounced_empty_history_is_replaced() {
        let mut b = builder();
        b.build_file("img.png", false, true);
        assert!(b.build_file("img.png", true, true).is_binary());

        b.build_revision(
            "img.png",
            RevisionEvent::new(RevisionNumber(2), Action::Modified, date(2), "a", ""),
        );
        assert!(b.build_file("img.png", false, true).is_binary());
    }

    #[test]
    fn test_build_model_filters_and_collects_tags() {
        let repo = MemoryRepository::new("u", "/trunk")
            .with_file("a.c", 12, 3)
            .with_file("docs/readme.txt", 2, 1);
        let mut b = builder();
        let mut tag = log_event("/tags/r1", Action::Added, 4, "rel");
        tag.copy_from_path = Some("/trunk".into());
        tag.copy_from_revision = Some(RevisionNumber(3));

        b.ingest(&tag, &repo);
        b.ingest(&log_event("/trunk/a.c", Action::Modified, 3, "a"), &repo);
        b.ingest(&log_event("/trunk/docs/readme.txt", Action::Added, 1, "a"), &repo);
        b.ingest(&log_event("/trunk/a.c", Action::Added, 1, "a"), &repo);
        b.ingest(&log_event("/trunk/gone.c", Action::Added, 2, "a"), &repo);

        let mut log = b.finish();
        assert!(log.update_revision("a.c", RevisionNumber(3), 4, 2));
        assert!(log.update_revision("a.c", RevisionNumber(1), 10, 0));
        assert!(!log.update_revision("missing.c", RevisionNumber(1), 1, 0));

        let filter = PathFilter::new(None, Some("docs/")).unwrap();
        let model = log.build_model(&repo, &filter);

        assert_eq!(model.files.len(), 2);
        let a = model.file("a.c").unwrap();
        assert_eq!(a.final_loc, 12);
        assert_eq!(a.revisions[0].kind, RevisionKind::Creation);
        assert_eq!(a.revisions[0].loc, 10);
        assert!(model.file("docs/readme.txt").is_none());

        assert_eq!(model.tags.len(), 1);
        assert_eq!(
            model.tags[0].revisions,
            vec![
                ("a.c".to_string(), RevisionNumber(3)),
                ("gone.c".to_string(), RevisionNumber(2))
            ]
        );
    }
}
