//! Pipeline state and stages.

use crate::models::{ClassifiedEvent, LogLine, ReportEntry, SocReport, TimeWindow};
use std::collections::VecDeque;

/// Steps of a run.
///
/// `Fetch -> Chunk -> {Classify -> Merge -> Chunk}* -> Consolidate ->
/// Summarize -> Done`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Chunk,
    Classify,
    Merge,
    Consolidate,
    Summarize,
    Done,
}

/// A bounded slice of log lines classified as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    lines: Vec<LogLine>,
}

impl Chunk {
    pub fn new(lines: Vec<LogLine>) -> Self {
        Self { lines }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Lines joined with newlines, as sent to the model.
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(LogLine::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn into_strings(self) -> Vec<String> {
        self.lines.into_iter().map(LogLine::into_string).collect()
    }
}

/// Everything one run knows. Each step takes the state by value and
/// returns the next one.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub window: TimeWindow,
    /// Lines not yet chunked.
    pub remaining: VecDeque<LogLine>,
    /// Chunk waiting for classification.
    pub chunk: Option<Chunk>,
    /// Result of the latest classification.
    pub result: Option<Vec<ClassifiedEvent>>,
    /// Per-chunk results, in chunk order.
    pub aggregate: Vec<Vec<ClassifiedEvent>>,
    /// Output of the consolidation pass.
    pub consolidated: Vec<ReportEntry>,
    pub report: Option<SocReport>,
    /// Lines returned by the fetch step.
    pub fetched: usize,
    /// Classify steps taken so far.
    pub iterations: usize,
}

impl PipelineState {
    pub fn new(window: TimeWindow) -> Self {
        Self {
            window,
            remaining: VecDeque::new(),
            chunk: None,
            result: None,
            aggregate: Vec::new(),
            consolidated: Vec::new(),
            report: None,
            fetched: 0,
            iterations: 0,
        }
    }
}
