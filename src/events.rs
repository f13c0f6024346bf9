//! History log events
//!
//! Path-level events as produced by a log converter, one JSON object per
//! line, e.g.
//!
//! ```text
//! {"path":"/trunk/src/main.c","action":"M","revision":12,"author":"alice","date":"2024-03-01T10:00:00Z","message":"fix"}
//! ```
//!
//! Events are expected newest revision first; the history builder re-sorts
//! each file's chain, so the order is not load-bearing.

use crate::models::{Action, CopySource, RevisionNumber};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// One path changed by one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Absolute repository path, e.g. `/trunk/src/main.c`.
    pub path: String,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_from_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_from_revision: Option<RevisionNumber>,
    pub revision: RevisionNumber,
    #[serde(default)]
    pub author: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub message: String,
}

impl LogEvent {
    /// Copy source, when both the path and revision are present.
    pub fn copy_from(&self) -> Option<CopySource> {
        match (&self.copy_from_path, self.copy_from_revision) {
            (Some(path), Some(revision)) => Some(CopySource {
                path: path.clone(),
                revision,
            }),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum EventSourceError {
    #[error("Failed to read history log: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed event on line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Reads JSON-lines events; blank lines and `#` comments are skipped.
pub fn read_events<R: Read>(reader: R) -> Result<Vec<LogEvent>, EventSourceError> {
    let mut events = Vec::new();
    for (index, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let event = serde_json::from_str(trimmed).map_err(|source| EventSourceError::Malformed {
            line: index + 1,
            source,
        })?;
        events.push(event);
    }
    Ok(events)
}

pub fn read_events_file(path: &Path) -> Result<Vec<LogEvent>, EventSourceError> {
    read_events(File::open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_events() {
        let input = r#"
# converted from svn log --xml -v
{"path":"/trunk/b.c","action":"M","revision":3,"author":"bob","date":"2024-03-02T10:00:00Z","message":"edit"}
{"path":"/trunk/b.c","action":"A","copy_from_path":"/trunk/a.c","copy_from_revision":1,"revision":2,"author":"alice","date":"2024-03-01T10:00:00Z"}
"#;
        let events = read_events(input.as_bytes()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, Action::Modified);
        assert_eq!(events[0].copy_from(), None);
        assert_eq!(events[1].message, "");
        assert_eq!(
            events[1].copy_from(),
            Some(CopySource {
                path: "/trunk/a.c".into(),
                revision: RevisionNumber(1)
            })
        );
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let input = "{\"path\":\"/a\",\"action\":\"M\",\"revision\":1,\"date\":\"2024-01-01T00:00:00Z\"}\nnot json\n";
        match read_events(input.as_bytes()) {
            Err(EventSourceError::Malformed { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected malformed error, got {:?}", other),
        }
    }
}
