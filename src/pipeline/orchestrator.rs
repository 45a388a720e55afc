//! Run orchestration.
//!
//! Drives the stage machine from fetch to summary. Every step is
//! sequential and awaits its network call before the next one starts.

use crate::analysis;
use crate::llm::{AnalystError, EventAnalyst};
use crate::loki::{fetch_lines, LogBackend, LogQuery};
use crate::models::{ClassifiedEvent, ReportEntry, SocReport, TimeWindow};
use crate::pipeline::chunker::Chunker;
use crate::pipeline::state::{PipelineState, Stage};
use crate::report;
use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

/// Upper bound on classify steps per run unless configured otherwise.
///
/// With the default chunk size of 1500 this covers 150k lines.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Settings for one pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub query: LogQuery,
    pub chunk_size: usize,
    /// Hard cap on classify steps; exceeding it aborts the run.
    pub max_iterations: usize,
    pub show_progress: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            query: LogQuery::default(),
            chunk_size: 1500,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            show_progress: false,
        }
    }
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Lines returned by the backend.
    pub fetched: usize,
    /// Number of classify steps taken.
    pub iterations: usize,
    /// Consolidated aggregate; always a single entry.
    pub entries: Vec<ReportEntry>,
    pub report: SocReport,
}

/// Fetch, classify, consolidate and summarize one time window.
pub struct Pipeline<B, A> {
    backend: B,
    analyst: A,
    chunker: Chunker,
    settings: PipelineSettings,
}

impl<B: LogBackend, A: EventAnalyst> Pipeline<B, A> {
    pub fn new(backend: B, analyst: A, settings: PipelineSettings) -> Result<Self> {
        if settings.max_iterations == 0 {
            bail!("Max iterations must be at least 1");
        }
        let chunker = Chunker::new(settings.chunk_size)?;

        Ok(Self {
            backend,
            analyst,
            chunker,
            settings,
        })
    }

    /// Run every stage for `window`.
    pub async fn run(&self, window: TimeWindow) -> Result<RunOutcome> {
        let mut state = PipelineState::new(window);
        let mut stage = Stage::Fetch;
        let progress = ProgressBar::hidden();

        loop {
            debug!("Stage {:?}", stage);
            stage = match stage {
                Stage::Fetch => {
                    state = self.fetch(state).await?;
                    self.start_progress(&progress, state.fetched);
                    Stage::Chunk
                }
                Stage::Chunk => {
                    state = self.chunker.advance(state);
                    if state.chunk.is_some() {
                        Stage::Classify
                    } else {
                        Stage::Consolidate
                    }
                }
                Stage::Classify => {
                    if state.iterations >= self.settings.max_iterations {
                        progress.abandon();
                        bail!(
                            "Chunk loop exceeded {} iterations with {} lines still queued",
                            self.settings.max_iterations,
                            state.remaining.len()
                        );
                    }
                    state = self.classify(state).await?;
                    progress.inc(1);
                    Stage::Merge
                }
                Stage::Merge => {
                    state = merge(state);
                    Stage::Chunk
                }
                Stage::Consolidate => {
                    progress.finish_and_clear();
                    state = self.consolidate(state).await?;
                    Stage::Summarize
                }
                Stage::Summarize => {
                    state = summarize(state);
                    Stage::Done
                }
                Stage::Done => break,
            };
        }

        let report = state
            .report
            .ok_or_else(|| anyhow!("Pipeline finished without a report"))?;

        Ok(RunOutcome {
            fetched: state.fetched,
            iterations: state.iterations,
            entries: state.consolidated,
            report,
        })
    }

    async fn fetch(&self, state: PipelineState) -> Result<PipelineState> {
        let lines = fetch_lines(&self.backend, &self.settings.query, &state.window).await?;
        info!("[FetchLogs] pulled {} lines", lines.len());

        Ok(PipelineState {
            fetched: lines.len(),
            remaining: lines.into(),
            aggregate: Vec::new(),
            ..state
        })
    }

    async fn classify(&self, state: PipelineState) -> Result<PipelineState> {
        let Some(chunk) = state.chunk else {
            return Ok(PipelineState {
                chunk: None,
                ..state
            });
        };

        let answer = self.analyst.classify(&chunk.text()).await;
        let events = match answer {
            Ok(events) => events,
            Err(AnalystError::Parse(e)) => {
                warn!("[Categoriser] unusable model response ({}), flagging chunk", e);
                vec![ClassifiedEvent::placeholder(chunk.into_strings(), Utc::now())]
            }
            Err(AnalystError::Transport(e)) => {
                return Err(e.context("Chunk classification failed"));
            }
        };

        for event in &events {
            info!("[Categoriser] → {}", event.severity);
        }

        Ok(PipelineState {
            chunk: None,
            result: Some(events),
            iterations: state.iterations + 1,
            ..state
        })
    }

    async fn consolidate(&self, state: PipelineState) -> Result<PipelineState> {
        let flat = analysis::flatten(&state.aggregate);
        info!(
            "[Consolidate] regrouping {} events from {} chunks",
            flat.len(),
            state.aggregate.len()
        );

        let answer = self.analyst.consolidate(&flat).await;
        let entry = match answer {
            Ok(entry) => entry,
            Err(AnalystError::Parse(e)) => {
                warn!("[Consolidate] unusable model response ({}), keeping flat list", e);
                ReportEntry::from_events(flat)
            }
            Err(AnalystError::Transport(e)) => {
                return Err(e.context("Consolidation failed"));
            }
        };

        Ok(PipelineState {
            consolidated: vec![entry],
            ..state
        })
    }

    fn start_progress(&self, progress: &ProgressBar, lines: usize) {
        if !self.settings.show_progress {
            return;
        }
        progress.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        progress.set_length(self.chunker.chunk_count(lines) as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
    }
}

fn merge(state: PipelineState) -> PipelineState {
    PipelineState {
        aggregate: analysis::merge(state.aggregate, state.result),
        result: None,
        ..state
    }
}

fn summarize(state: PipelineState) -> PipelineState {
    let report = report::summarize(state.window, &state.consolidated);
    PipelineState {
        report: Some(report),
        ..state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::analyst::LlmAnalyst;
    use crate::llm::client::CompletionModel;
    use crate::loki::client::{LokiEntry, LokiStream, RangeQuery};
    use crate::models::Severity;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Serves `lines` as a single page, then an empty one.
    struct FixedBackend {
        lines: usize,
        served: Mutex<bool>,
    }

    impl FixedBackend {
        fn with_lines(lines: usize) -> Self {
            Self {
                lines,
                served: Mutex::new(false),
            }
        }
    }

    #[async_trait]
    impl LogBackend for FixedBackend {
        async fn query_range(&self, query: &RangeQuery) -> Result<Vec<LokiStream>> {
            let mut served = self.served.lock().unwrap();
            if *served || self.lines == 0 {
                return Ok(Vec::new());
            }
            *served = true;
            let values = (0..self.lines)
                .map(|i| {
                    let ts = query.start + i as i64;
                    LokiEntry::new(ts.to_string(), format!("event {}", i))
                })
                .collect();
            Ok(vec![LokiStream {
                stream: Default::default(),
                values,
            }])
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl LogBackend for FailingBackend {
        async fn query_range(&self, _query: &RangeQuery) -> Result<Vec<LokiStream>> {
            Err(anyhow!("Loki API error 503 Service Unavailable"))
        }
    }

    /// Deterministic analyst: answers from a script and records chunk sizes.
    struct ScriptedAnalyst {
        classify_answers: Mutex<VecDeque<Result<Vec<ClassifiedEvent>, AnalystError>>>,
        consolidate_answer: Mutex<Option<Result<ReportEntry, AnalystError>>>,
        chunk_sizes: Mutex<Vec<usize>>,
        consolidated_inputs: Mutex<Vec<Vec<ClassifiedEvent>>>,
    }

    impl ScriptedAnalyst {
        fn new() -> Self {
            Self {
                classify_answers: Mutex::new(VecDeque::new()),
                consolidate_answer: Mutex::new(None),
                chunk_sizes: Mutex::new(Vec::new()),
                consolidated_inputs: Mutex::new(Vec::new()),
            }
        }

        fn classify_with(self, answer: Result<Vec<ClassifiedEvent>, AnalystError>) -> Self {
            self.classify_answers.lock().unwrap().push_back(answer);
            self
        }

        fn consolidate_with(self, answer: Result<ReportEntry, AnalystError>) -> Self {
            *self.consolidate_answer.lock().unwrap() = Some(answer);
            self
        }
    }

    #[async_trait]
    impl EventAnalyst for ScriptedAnalyst {
        async fn classify(&self, chunk_text: &str) -> Result<Vec<ClassifiedEvent>, AnalystError> {
            self.chunk_sizes
                .lock()
                .unwrap()
                .push(chunk_text.lines().count());
            self.classify_answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![event(Severity::Info, "1.1.1.1")]))
        }

        async fn consolidate(
            &self,
            events: &[ClassifiedEvent],
        ) -> Result<ReportEntry, AnalystError> {
            self.consolidated_inputs.lock().unwrap().push(events.to_vec());
            self.consolidate_answer
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Ok(ReportEntry::from_events(events.to_vec())))
        }
    }

    fn event(severity: Severity, source: &str) -> ClassifiedEvent {
        ClassifiedEvent {
            severity,
            action: "investigate".to_string(),
            source: source.to_string(),
            ..Default::default()
        }
    }

    fn window() -> TimeWindow {
        TimeWindow::ending_at(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(), 6).unwrap()
    }

    fn settings(chunk_size: usize) -> PipelineSettings {
        PipelineSettings {
            chunk_size,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_3200_lines_take_three_iterations() {
        let pipeline = Pipeline::new(
            FixedBackend::with_lines(3200),
            ScriptedAnalyst::new(),
            settings(1500),
        )
        .unwrap();

        let outcome = pipeline.run(window()).await.unwrap();

        assert_eq!(outcome.fetched, 3200);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(
            *pipeline.analyst.chunk_sizes.lock().unwrap(),
            vec![1500, 1500, 200]
        );
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.report.rows.len(), 3);
    }

    #[tokio::test]
    async fn test_no_lines_goes_straight_to_consolidation() {
        let pipeline = Pipeline::new(
            FixedBackend::with_lines(0),
            ScriptedAnalyst::new(),
            settings(1500),
        )
        .unwrap();

        let outcome = pipeline.run(window()).await.unwrap();

        assert_eq!(outcome.iterations, 0);
        assert!(pipeline.analyst.chunk_sizes.lock().unwrap().is_empty());
        assert_eq!(pipeline.analyst.consolidated_inputs.lock().unwrap().len(), 1);
        assert!(outcome.report.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_classification_yields_placeholder() {
        let parse_error = crate::llm::analyst::parse_events("not json").unwrap_err();
        let pipeline = Pipeline::new(
            FixedBackend::with_lines(3),
            ScriptedAnalyst::new().classify_with(Err(AnalystError::Parse(parse_error))),
            settings(10),
        )
        .unwrap();

        let outcome = pipeline.run(window()).await.unwrap();

        let inputs = pipeline.analyst.consolidated_inputs.lock().unwrap();
        assert_eq!(inputs[0].len(), 1);
        let placeholder = &inputs[0][0];
        assert_eq!(placeholder.severity, Severity::Unknown);
        assert_eq!(placeholder.action, "investigate");
        assert_eq!(placeholder.logs.len(), 3);
        assert!(placeholder.logs[0].ends_with("event 0"));
        assert_eq!(outcome.report.rows[0].event.severity, Severity::Unknown);
    }

    #[tokio::test]
    async fn test_empty_classification_is_not_merged() {
        let pipeline = Pipeline::new(
            FixedBackend::with_lines(4),
            ScriptedAnalyst::new()
                .classify_with(Ok(vec![]))
                .classify_with(Ok(vec![event(Severity::High, "9.9.9.9")])),
            settings(2),
        )
        .unwrap();

        let outcome = pipeline.run(window()).await.unwrap();

        assert_eq!(outcome.iterations, 2);
        let inputs = pipeline.analyst.consolidated_inputs.lock().unwrap();
        assert_eq!(inputs[0].len(), 1);
        assert_eq!(inputs[0][0].severity, Severity::High);
    }

    #[tokio::test]
    async fn test_unparseable_consolidation_keeps_flat_list() {
        let parse_error = crate::llm::analyst::parse_consolidation("oops").unwrap_err();
        let pipeline = Pipeline::new(
            FixedBackend::with_lines(4),
            ScriptedAnalyst::new()
                .classify_with(Ok(vec![event(Severity::High, "a")]))
                .classify_with(Ok(vec![
                    event(Severity::Info, "b"),
                    event(Severity::Critical, "c"),
                ]))
                .consolidate_with(Err(AnalystError::Parse(parse_error))),
            settings(2),
        )
        .unwrap();

        let outcome = pipeline.run(window()).await.unwrap();

        assert_eq!(
            outcome.entries,
            vec![ReportEntry::from_events(vec![
                event(Severity::High, "a"),
                event(Severity::Info, "b"),
                event(Severity::Critical, "c"),
            ])]
        );
    }

    #[tokio::test]
    async fn test_consolidated_groups_reach_report() {
        let entry = crate::llm::analyst::parse_consolidation(
            r#"[{"actor": "1.2.3.4", "events": [{"severity": "HIGH", "action": "block"}]}]"#,
        )
        .unwrap();
        let pipeline = Pipeline::new(
            FixedBackend::with_lines(1),
            ScriptedAnalyst::new().consolidate_with(Ok(entry)),
            settings(10),
        )
        .unwrap();

        let outcome = pipeline.run(window()).await.unwrap();

        let rows = &outcome.report.rows;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event.severity, Severity::High);
        assert_eq!(rows[0].actor.as_deref(), Some("1.2.3.4"));
    }

    #[tokio::test]
    async fn test_iteration_cap_aborts_run() {
        let pipeline = Pipeline::new(
            FixedBackend::with_lines(10),
            ScriptedAnalyst::new(),
            PipelineSettings {
                chunk_size: 3,
                max_iterations: 3,
                ..Default::default()
            },
        )
        .unwrap();

        let err = pipeline.run(window()).await.unwrap_err();
        assert!(err.to_string().contains("exceeded 3 iterations"));
        assert!(pipeline.analyst.consolidated_inputs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_aborts_run() {
        let pipeline = Pipeline::new(
            FixedBackend::with_lines(5),
            ScriptedAnalyst::new().classify_with(Err(AnalystError::Transport(anyhow!(
                "Model API error 500"
            )))),
            settings(5),
        )
        .unwrap();

        let err = pipeline.run(window()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Model API error 500"));
    }

    #[tokio::test]
    async fn test_backend_error_aborts_run() {
        let pipeline =
            Pipeline::new(FailingBackend, ScriptedAnalyst::new(), settings(5)).unwrap();
        assert!(pipeline.run(window()).await.is_err());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        assert!(Pipeline::new(FailingBackend, ScriptedAnalyst::new(), settings(0)).is_err());
        assert!(Pipeline::new(
            FailingBackend,
            ScriptedAnalyst::new(),
            PipelineSettings {
                max_iterations: 0,
                ..Default::default()
            }
        )
        .is_err());
    }

    /// Model that never returns valid JSON.
    struct ChattyModel;

    #[async_trait]
    impl CompletionModel for ChattyModel {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            Ok("Sure! Here is my analysis of the logs.".to_string())
        }
    }

    #[tokio::test]
    async fn test_end_to_end_with_unhelpful_model() {
        let pipeline = Pipeline::new(
            FixedBackend::with_lines(5),
            LlmAnalyst::new(ChattyModel),
            settings(2),
        )
        .unwrap();

        let outcome = pipeline.run(window()).await.unwrap();

        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.report.rows.len(), 3);
        assert!(outcome
            .report
            .rows
            .iter()
            .all(|r| r.event.severity == Severity::Unknown));
        let logged: usize = outcome.report.rows.iter().map(|r| r.event.logs.len()).sum();
        assert_eq!(logged, 5);
    }
}
