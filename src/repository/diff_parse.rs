//! Line counting over `svn diff` output
//!
//! The counting is deliberately simple: every line starting with `+` is an
//! added line and every line starting with `-` a removed one. Both counters
//! start at -1 so the `---`/`+++` header pair of a file cancels out.

use super::FileDiff;
use crate::models::LineDiff;

/// Printed by `svn diff` instead of hunks for binary content.
pub const BINARY_MARKER: &str = "Cannot display: file marked as a binary type.";

const PROPERTY_CHANGE: &str = "Property changes on:";
const PROPERTY_NAME: &str = "Name:";
/// Line at which `Name:` announces a property-only diff.
const PROPERTY_NAME_LINE: usize = 4;
const INDEX_MARKER: &str = "Index: ";

/// Outcome of parsing the diff of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffSummary {
    Lines(LineDiff),
    Binary,
    /// No header pair was seen; the output is not a textual diff.
    Unknown,
}

/// Parses the diff of a single file.
pub fn parse_diff(output: &str) -> DiffSummary {
    let mut added: i64 = -1;
    let mut removed: i64 = -1;
    let mut property_change = false;

    if output.lines().next().is_none() {
        // Property edits and keyword expansion produce no output at all.
        return DiffSummary::Lines(LineDiff::default());
    }

    for (index, line) in output.lines().enumerate() {
        let line_number = index + 1;
        if line.is_empty() {
            continue;
        }
        if line.starts_with('+') {
            added += 1;
        } else if line.starts_with('-') {
            removed += 1;
        } else if line.starts_with(PROPERTY_CHANGE)
            || (line.starts_with(PROPERTY_NAME) && line_number == PROPERTY_NAME_LINE)
        {
            property_change = true;
        } else if line.starts_with(BINARY_MARKER) {
            return DiffSummary::Binary;
        }
    }

    if property_change && (added == -1 || removed == -1) {
        return DiffSummary::Lines(LineDiff::default());
    }
    if added < 0 || removed < 0 {
        return DiffSummary::Unknown;
    }
    DiffSummary::Lines(LineDiff::new(
        u32::try_from(added).unwrap_or(u32::MAX),
        u32::try_from(removed).unwrap_or(u32::MAX),
    ))
}

/// Splits a whole-revision diff on `Index: ` markers and parses each file.
pub fn parse_revision_diff(output: &str) -> Vec<FileDiff> {
    let mut results = Vec::new();
    let mut current: Option<(String, String)> = None;

    for line in output.lines() {
        if let Some(name) = line.strip_prefix(INDEX_MARKER) {
            if let Some((path, body)) = current.take() {
                results.push(summarize(path, &body));
            }
            current = Some((name.trim_end().to_string(), String::new()));
        }
        if let Some((_, body)) = current.as_mut() {
            body.push_str(line);
            body.push('\n');
        }
    }
    if let Some((path, body)) = current {
        results.push(summarize(path, &body));
    }

    results
}

fn summarize(path: String, body: &str) -> FileDiff {
    match parse_diff(body) {
        DiffSummary::Lines(lines) => FileDiff {
            path,
            lines: Some(lines),
            binary: false,
        },
        DiffSummary::Binary => FileDiff {
            path,
            lines: Some(LineDiff::default()),
            binary: true,
        },
        DiffSummary::Unknown => FileDiff {
            path,
            lines: None,
            binary: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_DIFF: &str = "\
Index: src/main.c
===================================================================
--- src/main.c\t(revision 3)
+++ src/main.c\t(revision 4)
@@ -1,3 +1,4 @@
 int main() {
-    return 0;
+    puts(\"hi\");
+    return 1;
 }
";

    #[test]
    fn test_counts_added_and_removed_lines() {
        assert_eq!(
            parse_diff(SIMPLE_DIFF),
            DiffSummary::Lines(LineDiff::new(2, 1))
        );
    }

    #[test]
    fn test_empty_output_is_zero_change() {
        assert_eq!(parse_diff(""), DiffSummary::Lines(LineDiff::default()));
    }

    #[test]
    fn test_binary_marker() {
        let output = "Index: logo.png\n\
===================================================================\n\
Cannot display: file marked as a binary type.\n\
svn:mime-type = application/octet-stream\n";
        assert_eq!(parse_diff(output), DiffSummary::Binary);
    }

    #[test]
    fn test_property_only_change() {
        let output = "\nProperty changes on: build.xml\n\
___________________________________________________________________\n\
Name: svn:keywords\n   + Id\n";
        assert_eq!(parse_diff(output), DiffSummary::Lines(LineDiff::default()));
    }

    #[test]
    fn test_output_without_headers_is_unknown() {
        assert_eq!(parse_diff("something unexpected\n"), DiffSummary::Unknown);
    }

    #[test]
    fn test_revision_diff_split_by_index_marker() {
        let output = format!(
            "{}Index: logo.png\n\
===================================================================\n\
Cannot display: file marked as a binary type.\n\
Index: README\n\
===================================================================\n\
--- README\t(revision 0)\n\
+++ README\t(revision 4)\n\
@@ -0,0 +1,2 @@\n\
+hello\n\
+world\n",
            SIMPLE_DIFF
        );

        let diffs = parse_revision_diff(&output);
        assert_eq!(diffs.len(), 3);
        assert_eq!(diffs[0].path, "src/main.c");
        assert_eq!(diffs[0].lines, Some(LineDiff::new(2, 1)));
        assert!(diffs[1].binary);
        assert_eq!(diffs[1].lines, Some(LineDiff::default()));
        assert_eq!(diffs[2].path, "README");
        assert_eq!(diffs[2].lines, Some(LineDiff::new(2, 0)));
    }

    #[test]
    fn test_revision_diff_ignores_preamble() {
        assert!(parse_revision_diff("no index here\n").is_empty());
    }
}
