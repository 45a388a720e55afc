//! Event aggregation and statistics.
//!
//! This module accumulates per-chunk classification results and computes
//! the per-severity statistics the report is built from.

use crate::models::{ClassifiedEvent, EventRow, Severity, SeverityCount};

/// Append a chunk's results to the aggregate. Empty or missing results
/// are ignored; nothing is deduplicated.
pub fn merge(
    mut aggregate: Vec<Vec<ClassifiedEvent>>,
    result: Option<Vec<ClassifiedEvent>>,
) -> Vec<Vec<ClassifiedEvent>> {
    if let Some(events) = result.filter(|events| !events.is_empty()) {
        aggregate.push(events);
    }
    aggregate
}

/// Flatten the aggregate into one list, keeping chunk order.
pub fn flatten(aggregate: &[Vec<ClassifiedEvent>]) -> Vec<ClassifiedEvent> {
    aggregate.iter().flatten().cloned().collect()
}

/// Count rows per severity, most frequent first. Ties keep the order in
/// which the severities first appear.
pub fn count_by_severity(rows: &[EventRow]) -> Vec<SeverityCount> {
    let mut counts: Vec<SeverityCount> = Vec::new();

    for row in rows {
        match counts
            .iter_mut()
            .find(|c| c.severity == row.event.severity)
        {
            Some(entry) => entry.count += 1,
            None => counts.push(SeverityCount {
                severity: row.event.severity.clone(),
                count: 1,
            }),
        }
    }

    counts.sort_by_key(|c| std::cmp::Reverse(c.count));
    counts
}

/// Severities to render as report sections, in order.
///
/// The fixed report order comes first; severities outside it that are
/// present (HIGH, MEDIUM, custom labels) follow, HIGH and MEDIUM first.
pub fn severity_sections(rows: &[EventRow]) -> Vec<Severity> {
    let present = |severity: &Severity| rows.iter().any(|r| &r.event.severity == severity);

    let mut sections: Vec<Severity> = Severity::REPORT_ORDER
        .iter()
        .filter(|s| present(*s))
        .cloned()
        .collect();

    for extra in [Severity::High, Severity::Medium] {
        if present(&extra) {
            sections.push(extra);
        }
    }

    for row in rows {
        if let Severity::Other(_) = row.event.severity {
            if !sections.contains(&row.event.severity) {
                sections.push(row.event.severity.clone());
            }
        }
    }

    sections
}

/// Rows carrying the given severity, in report order.
pub fn rows_with_severity<'a>(
    rows: &'a [EventRow],
    severity: &'a Severity,
) -> impl Iterator<Item = &'a EventRow> + 'a {
    rows.iter().filter(move |r| &r.event.severity == severity)
}
