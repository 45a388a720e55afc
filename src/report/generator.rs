//! Markdown report generation.
//!
//! This module flattens the consolidated aggregate into per-event rows
//! and renders the SOC summary report from them.

use crate::analysis::{count_by_severity, rows_with_severity, severity_sections};
use crate::models::{EventRow, ReportEntry, Severity, SeverityCount, SocReport, TimeWindow};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::warn;

/// Build the report for `window` from the consolidated aggregate.
pub fn summarize(window: TimeWindow, entries: &[ReportEntry]) -> SocReport {
    let rows = flatten_rows(entries);
    let counts = count_by_severity(&rows);

    SocReport {
        window,
        counts,
        rows,
    }
}

/// One row per event. Lists are unwrapped one level; events of an actor
/// group carry the group's actor.
pub fn flatten_rows(entries: &[ReportEntry]) -> Vec<EventRow> {
    let mut rows = Vec::new();

    for entry in entries {
        match entry {
            ReportEntry::EventList(groups) => {
                for group in groups {
                    push_group_rows(group, &mut rows);
                }
            }
            group => push_group_rows(group, &mut rows),
        }
    }

    rows
}

fn push_group_rows(group: &ReportEntry, rows: &mut Vec<EventRow>) {
    match group {
        ReportEntry::ActorGroup(group) => {
            for event in &group.events {
                let mut event = event.clone();
                let actor = group.actor.clone().or_else(|| event.actor.take());
                event.actor = None;
                rows.push(EventRow { actor, event });
            }
        }
        ReportEntry::RawRecord(event) => {
            let mut event = event.clone();
            let actor = event.actor.take();
            rows.push(EventRow { actor, event });
        }
        ReportEntry::EventList(nested) => {
            warn!("Unexpected group format: nested list of {} entries", nested.len());
        }
    }
}

/// Generate the complete Markdown report.
pub fn generate_markdown_report(report: &SocReport) -> String {
    let mut output = String::new();

    output.push_str("# SOC Summary Report\n\n");
    output.push_str(&generate_window_line(&report.window));

    if report.is_empty() {
        output.push_str("_No relevant events detected._\n");
        return output;
    }

    output.push_str(&generate_breakdown_section(&report.counts));
    output.push_str("## Detailed Events by Severity\n\n");

    for severity in severity_sections(&report.rows) {
        output.push_str(&generate_severity_section(&severity, &report.rows));
    }

    output
}

fn generate_window_line(window: &TimeWindow) -> String {
    format!(
        "Time window: **{}Z** → **{}Z**\n\n",
        window.start.format("%Y-%m-%dT%H:%M:%S"),
        window.end.format("%Y-%m-%dT%H:%M:%S")
    )
}

/// Generate the event breakdown table.
fn generate_breakdown_section(counts: &[SeverityCount]) -> String {
    let mut section = String::new();

    section.push_str("## Event Breakdown\n\n");
    section.push_str("| severity | count |\n");
    section.push_str("|:---|---:|\n");
    for entry in counts {
        section.push_str(&format!("| {} | {} |\n", entry.severity, entry.count));
    }
    section.push('\n');

    section
}

fn generate_severity_section(severity: &Severity, rows: &[EventRow]) -> String {
    let mut section = format!("### {}\n\n", severity);
    for row in rows_with_severity(rows, severity) {
        section.push_str(&generate_event_block(row));
    }
    section
}

/// Generate a single event entry with its raw log lines.
fn generate_event_block(row: &EventRow) -> String {
    let event = &row.event;
    let mut block = format!(
        "- **Actor:** {} | **Action:** {} | **Context:** {} | **Source:** {} | **Time:** {}",
        row.actor.as_deref().unwrap_or("Unknown"),
        event.action,
        event.context,
        event.source,
        event.timestamp
    );
    if !event.technique.is_empty() {
        block.push_str(&format!(" | **Technique:** {}", event.technique));
    }
    block.push('\n');

    for log in &event.logs {
        block.push_str(&format!("    - {}\n", log));
    }
    block.push('\n');

    block
}

/// Generate a JSON report.
pub fn generate_json_report(report: &SocReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write report content, creating parent directories as needed.
pub fn write_report(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}
