//! Plain text run summary

use console::style;
use std::fmt::Write;

use crate::pipeline::RunSummary;

const LARGEST_FILES: usize = 10;

/// Renders the summary for a terminal.
pub(super) fn render_text(summary: &RunSummary) -> String {
    let model = &summary.model;
    let mut out = String::new();
    let live = model.files.iter().filter(|f| !f.dead).count();
    let binary = model.files.iter().filter(|f| f.binary).count();

    let _ = writeln!(out, "\n{}", style("loctrail summary").bold());
    let _ = writeln!(out, "  Module: {}", style(&model.module).cyan());
    if let Some(start) = model.start_date {
        let _ = writeln!(out, "  Log starts: {}", start.format("%Y-%m-%d %H:%M"));
    }
    let _ = writeln!(
        out,
        "  Files: {} ({} live, {} binary)",
        style(model.files.len()).cyan(),
        style(live).green(),
        style(binary).dim()
    );
    let _ = writeln!(
        out,
        "  Revisions: {}, authors: {}, tags: {}",
        style(model.revision_count()).cyan(),
        style(model.authors.len()).cyan(),
        style(model.tags.len()).cyan()
    );
    let _ = writeln!(out, "  Lines of code: {}", style(model.total_loc()).bold());

    let fetch = &summary.fetch;
    let _ = writeln!(out, "\n{}", style("Diffs").bold());
    let _ = writeln!(
        out,
        "  {} planned, {} sequential, {} pooled{}",
        fetch.tasks_planned,
        fetch.sequential_runs,
        fetch.pooled_runs,
        if fetch.pool_activated { " (pool active)" } else { "" }
    );
    let _ = writeln!(
        out,
        "  {} resolved, {} binary, {} failed",
        style(fetch.resolved).green(),
        style(fetch.binary).dim(),
        if fetch.failed > 0 {
            style(fetch.failed).red()
        } else {
            style(fetch.failed).dim()
        }
    );
    if fetch.timed_out {
        let _ = writeln!(out, "  {} worker pool timed out", style("[!!]").red());
    }

    let _ = writeln!(out, "\n{}", style("Cache").bold());
    let _ = writeln!(
        out,
        "  {} files, {} records ({} applied this run)",
        summary.cache.files, summary.cache.records, summary.cache_applied
    );
    let inference = &summary.inference;
    let _ = writeln!(
        out,
        "  {} implicit events, {} directories dropped",
        inference.synthesized,
        inference.directories.len()
    );

    let mut largest: Vec<_> = model.files.iter().filter(|f| !f.dead).collect();
    largest.sort_by(|a, b| b.final_loc.cmp(&a.final_loc).then_with(|| a.path.cmp(&b.path)));
    if !largest.is_empty() {
        let _ = writeln!(out, "\n{}", style("Largest files").bold());
        for file in largest.iter().take(LARGEST_FILES) {
            let _ = writeln!(out, "  {:>8}  {}", style(file.final_loc).cyan(), file.path);
        }
    }

    let _ = write!(out, "\n  Done in {:.2?}", summary.duration);
    out
}
