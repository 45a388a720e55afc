//! Model-backed event classification and consolidation.
//!
//! The pipeline only sees [`EventAnalyst`]. Parse failures are reported
//! as [`AnalystError::Parse`] so the caller can substitute a fallback,
//! while transport failures abort the run.

use crate::llm::client::CompletionModel;
use crate::models::{ClassifiedEvent, ReportEntry};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Why a model answer could not be turned into events.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("response is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("expected a JSON list of events, got {0}")]
    UnexpectedShape(&'static str),
}

#[derive(Debug, Error)]
pub enum AnalystError {
    /// The model could not be reached or refused the request.
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
    /// The model answered, but not with usable JSON.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Narrow capability the pipeline needs from a language model.
#[async_trait]
pub trait EventAnalyst: Send + Sync {
    /// Classify one chunk of newline-joined log lines.
    async fn classify(&self, chunk_text: &str) -> Result<Vec<ClassifiedEvent>, AnalystError>;

    /// Regroup all classified events by actor.
    async fn consolidate(&self, events: &[ClassifiedEvent]) -> Result<ReportEntry, AnalystError>;
}

/// [`EventAnalyst`] that prompts a [`CompletionModel`].
pub struct LlmAnalyst<M> {
    model: M,
}

impl<M: CompletionModel> LlmAnalyst<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

#[async_trait]
impl<M: CompletionModel> EventAnalyst for LlmAnalyst<M> {
    async fn classify(&self, chunk_text: &str) -> Result<Vec<ClassifiedEvent>, AnalystError> {
        let user = format!(" Logs: \n{}", chunk_text);
        let raw = self.model.complete(CLASSIFY_SYSTEM_PROMPT, &user).await?;
        debug!("Classification response: {} bytes", raw.len());
        Ok(parse_events(&raw)?)
    }

    async fn consolidate(&self, events: &[ClassifiedEvent]) -> Result<ReportEntry, AnalystError> {
        let payload = serde_json::to_string(events).context("Failed to serialize events")?;
        let user = format!("Events: {}", payload);
        let raw = self.model.complete(CONSOLIDATE_SYSTEM_PROMPT, &user).await?;
        debug!("Consolidation response: {} bytes", raw.len());
        Ok(parse_consolidation(&raw)?)
    }
}

/// Strip surrounding whitespace and, when fenced, return the inner block
/// without its info string (e.g. `json`).
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }

    let segments: Vec<&str> = trimmed.split("```").collect();
    let block = if segments.len() >= 3 {
        segments[segments.len() - 2]
    } else {
        &trimmed[3..]
    };

    match block.split_once('\n') {
        Some((first, rest)) if !first.trim_start().starts_with(['[', '{']) => rest.trim(),
        _ => block.trim(),
    }
}

/// Parse a classification answer into events.
///
/// A single object is accepted as a one-element list.
pub fn parse_events(raw: &str) -> Result<Vec<ClassifiedEvent>, ParseError> {
    let value: Value = serde_json::from_str(strip_code_fence(raw))?;
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| {
                if item.is_object() {
                    Ok(serde_json::from_value::<ClassifiedEvent>(item)?)
                } else {
                    Err(ParseError::UnexpectedShape("a list with non-object entries"))
                }
            })
            .collect(),
        object @ Value::Object(_) => Ok(vec![serde_json::from_value(object)?]),
        Value::String(_) => Err(ParseError::UnexpectedShape("a string")),
        Value::Number(_) => Err(ParseError::UnexpectedShape("a number")),
        Value::Bool(_) => Err(ParseError::UnexpectedShape("a boolean")),
        Value::Null => Err(ParseError::UnexpectedShape("null")),
    }
}

/// Parse a consolidation answer into a report entry.
pub fn parse_consolidation(raw: &str) -> Result<ReportEntry, ParseError> {
    let value: Value = serde_json::from_str(strip_code_fence(raw))?;
    ReportEntry::ingest(value).ok_or(ParseError::UnexpectedShape("a scalar"))
}

/// System prompt for per-chunk classification
const CLASSIFY_SYSTEM_PROMPT: &str = r#"
You Are a SOC Analyst Assistant. You can read logs and categorize them into severity levels.

Read the logs given, and consider their context. Think about the following:
- What is the nature of the event?
- What is the source of the event? (e.g., IP address, user agent)
- Is it a normal event, or does it indicate a potential security incident?
- What is the severity level of the event? (e.g., INFO, WARNING, ERROR, CRITICAL)
- What action should be taken? (e.g., investigate, ignore, escalate)
- Are the failed logins related to a brute-force attack? Or is it a normal event?
- IGNORE ALL INTERNAL LOGS.

Consider that logs may come from separate actors; do not lump all logs together.
When consolidating multiple chunks, preserve all original fields and group related events by actor.

Severity levels:
- INFO: Normal event, no action needed
- MEDIUM: Potential issue, agent must investigate over the next 24h
- HIGH: Serious issue, agent must investigate immediately
- CRITICAL: Immediate action required, escalate to SOC team

All responses should return a JSON list of objects with these fields:
- severity, action, logs, context, source, timestamp, technique

After categorizing, consolidate the chunk-level outputs into a unified list grouping by actor.
"#;

/// System prompt for the final consolidation pass
const CONSOLIDATE_SYSTEM_PROMPT: &str = "You are a SOC Analyst Assistant. \
    Consolidate the following categorized events into a single JSON list, \
    preserving all fields and grouping related events by actor. Return valid JSON.";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use anyhow::{anyhow, Result};
    use std::sync::Mutex;

    /// Returns a fixed answer and records the prompts it was given.
    struct CannedModel {
        answer: Result<String, String>,
        prompts: Mutex<Vec<(String, String)>>,
    }

    impl CannedModel {
        fn answering(answer: &str) -> Self {
            Self {
                answer: Ok(answer.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                answer: Err(message.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionModel for CannedModel {
        async fn complete(&self, system: &str, user: &str) -> Result<String> {
            self.prompts
                .lock()
                .unwrap()
                .push((system.to_string(), user.to_string()));
            self.answer.clone().map_err(|e| anyhow!(e))
        }
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("  [1]  "), "[1]");
        assert_eq!(strip_code_fence("```json\n[{\"a\": 1}]\n```"), "[{\"a\": 1}]");
        assert_eq!(strip_code_fence("```\n[]\n```"), "[]");
        assert_eq!(strip_code_fence("```[]```"), "[]");
        assert_eq!(
            strip_code_fence("```json\n{\"x\": 1}\n```\nLet me know if you need more."),
            "{\"x\": 1}"
        );
        assert_eq!(strip_code_fence("```json\n[1, 2]"), "[1, 2]");
    }

    #[test]
    fn test_parse_events_list() {
        let raw = r#"```json
[
  {"severity": "HIGH", "action": "escalate", "logs": ["l1", "l2"], "context": "brute force",
   "source": "203.0.113.9", "timestamp": "2024-01-01T00:00:00Z", "technique": "T1110"},
  {"severity": "INFO", "action": "ignore", "logs": [], "context": "", "source": "",
   "timestamp": "", "technique": ""}
]
```"#;
        let events = parse_events(raw).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].severity, Severity::High);
        assert_eq!(events[0].technique, "T1110");
        assert_eq!(events[1].severity, Severity::Info);
    }

    #[test]
    fn test_parse_events_single_object() {
        let events = parse_events(r#"{"severity": "CRITICAL"}"#).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Critical);
    }

    #[test]
    fn test_parse_events_rejects_prose_and_scalars() {
        assert!(matches!(
            parse_events("Here are the results: none"),
            Err(ParseError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_events("\"no events\""),
            Err(ParseError::UnexpectedShape(_))
        ));
        assert!(matches!(
            parse_events("[\"a\", \"b\"]"),
            Err(ParseError::UnexpectedShape(_))
        ));
    }

    #[test]
    fn test_parse_empty_list() {
        assert!(parse_events("[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_consolidation() {
        let entry =
            parse_consolidation(r#"[{"actor": "1.2.3.4", "events": [{"severity": "HIGH"}]}]"#)
                .unwrap();
        assert!(matches!(entry, ReportEntry::EventList(ref groups) if groups.len() == 1));

        assert!(parse_consolidation("not json").is_err());
        assert!(parse_consolidation("7").is_err());
    }

    #[tokio::test]
    async fn test_classify_sends_chunk_with_prompt() {
        let analyst = LlmAnalyst::new(CannedModel::answering(r#"[{"severity": "MEDIUM"}]"#));
        let events = analyst.classify("line one\nline two").await.unwrap();
        assert_eq!(events[0].severity, Severity::Medium);

        let prompts = analyst.model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].0.contains("SOC Analyst Assistant"));
        assert_eq!(prompts[0].1, " Logs: \nline one\nline two");
    }

    #[tokio::test]
    async fn test_classify_reports_parse_error() {
        let analyst = LlmAnalyst::new(CannedModel::answering("I cannot help with that."));
        let result = analyst.classify("x").await;
        assert!(matches!(result, Err(AnalystError::Parse(_))));
    }

    #[tokio::test]
    async fn test_classify_reports_transport_error() {
        let analyst = LlmAnalyst::new(CannedModel::failing("Model API error 401"));
        let result = analyst.classify("x").await;
        assert!(matches!(result, Err(AnalystError::Transport(_))));
    }

    #[tokio::test]
    async fn test_consolidate_sends_events_as_json() {
        let analyst = LlmAnalyst::new(CannedModel::answering("[]"));
        let events = vec![ClassifiedEvent {
            severity: Severity::High,
            source: "1.2.3.4".to_string(),
            ..Default::default()
        }];

        let entry = analyst.consolidate(&events).await.unwrap();
        assert_eq!(entry, ReportEntry::EventList(vec![]));

        let prompts = analyst.model.prompts.lock().unwrap();
        assert!(prompts[0].0.contains("grouping related events by actor"));
        assert!(prompts[0].1.starts_with("Events: ["));
        assert!(prompts[0].1.contains("\"severity\":\"HIGH\""));
    }
}
