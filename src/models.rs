//! Data models for the honeypot log pipeline.
//!
//! This module contains the core data structures shared by the fetcher,
//! the model-backed classifier and the report generator: log lines,
//! classified events, actor groups and the report entry union that
//! consolidated model output is ingested into.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::warn;

/// Severity label of a classified event.
///
/// The model is asked for INFO, MEDIUM, HIGH or CRITICAL, but it regularly
/// answers with ERROR or WARNING too. Known labels match case-insensitively;
/// anything else is kept verbatim, minus surrounding whitespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Severity {
    /// Normal event, no action needed
    Info,
    /// Potential issue, investigate within 24h
    Medium,
    /// Serious issue, investigate immediately
    High,
    /// Immediate action required, escalate
    Critical,
    Error,
    Warning,
    /// Classification failed or the model gave no label
    #[default]
    Unknown,
    Other(String),
}

impl Severity {
    /// Sections the markdown report always renders first, in this order.
    pub const REPORT_ORDER: [Severity; 5] = [
        Severity::Critical,
        Severity::Error,
        Severity::Warning,
        Severity::Info,
        Severity::Unknown,
    ];

    /// Returns the upper-case label.
    pub fn as_str(&self) -> &str {
        match self {
            Severity::Info => "INFO",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Unknown => "UNKNOWN",
            Severity::Other(label) => label,
        }
    }

    /// Returns an emoji representation of the severity.
    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Critical => "🔴",
            Severity::High | Severity::Error => "🟠",
            Severity::Medium | Severity::Warning => "🟡",
            Severity::Info => "🟢",
            Severity::Unknown | Severity::Other(_) => "⚪",
        }
    }
}

impl From<&str> for Severity {
    fn from(s: &str) -> Self {
        let label = s.trim();
        match label.to_uppercase().as_str() {
            "INFO" => Severity::Info,
            "MEDIUM" => Severity::Medium,
            "HIGH" => Severity::High,
            "CRITICAL" => Severity::Critical,
            "ERROR" => Severity::Error,
            "WARNING" => Severity::Warning,
            "UNKNOWN" | "" => Severity::Unknown,
            _ => Severity::Other(label.to_string()),
        }
    }
}

impl From<String> for Severity {
    fn from(s: String) -> Self {
        Severity::from(s.as_str())
    }
}

impl From<Severity> for String {
    fn from(severity: Severity) -> Self {
        severity.as_str().to_string()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A timestamp-prefixed log line as fetched from the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogLine(String);

impl LogLine {
    /// Wrap an already formatted line.
    #[cfg(test)]
    pub fn new(line: impl Into<String>) -> Self {
        Self(line.into())
    }

    /// Build a line from a nanosecond timestamp and a raw message.
    ///
    /// Returns `None` when the message is blank after trimming.
    pub fn from_entry(timestamp_ns: i64, message: &str) -> Option<Self> {
        let message = message.trim();
        if message.is_empty() {
            return None;
        }
        let ts = Utc
            .timestamp_nanos(timestamp_ns)
            .to_rfc3339_opts(SecondsFormat::AutoSi, false);
        Some(Self(format!("[{}] {}", ts, message)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The time window a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window of `hours` ending at `end`.
    ///
    /// Fails when the start would fall outside the representable range.
    pub fn ending_at(end: DateTime<Utc>, hours: u32) -> Result<Self> {
        let start = end
            .checked_sub_signed(Duration::hours(i64::from(hours)))
            .ok_or_else(|| anyhow!("A {}-hour window ending at {} is out of range", hours, end))?;
        Ok(Self { start, end })
    }

    /// Window of `hours` ending now.
    pub fn last_hours(hours: u32) -> Result<Self> {
        Self::ending_at(Utc::now(), hours)
    }

    /// Start and end as nanoseconds since the epoch.
    pub fn bounds_ns(&self) -> Result<(i64, i64)> {
        let start = self
            .start
            .timestamp_nanos_opt()
            .ok_or_else(|| anyhow!("Window start {} is outside the nanosecond range", self.start))?;
        let end = self
            .end
            .timestamp_nanos_opt()
            .ok_or_else(|| anyhow!("Window end {} is outside the nanosecond range", self.end))?;
        Ok((start, end))
    }
}

/// One event as classified by the model.
///
/// Every field is parsed leniently: the model output is not trusted to
/// follow the requested shape exactly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedEvent {
    #[serde(default, deserialize_with = "lenient_severity")]
    pub severity: Severity,
    #[serde(default, deserialize_with = "lenient_string")]
    pub action: String,
    #[serde(default, deserialize_with = "string_or_list")]
    pub logs: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub context: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub source: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub timestamp: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub technique: String,
    /// Only present on records the consolidation pass attributed to an actor.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_opt_string"
    )]
    pub actor: Option<String>,
}

impl ClassifiedEvent {
    /// Placeholder emitted when a chunk's classification cannot be parsed.
    pub fn placeholder(logs: Vec<String>, now: DateTime<Utc>) -> Self {
        Self {
            severity: Severity::Unknown,
            action: "investigate".to_string(),
            logs,
            context: String::new(),
            source: String::new(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            technique: String::new(),
            actor: None,
        }
    }
}

/// Events the consolidation pass attributed to one actor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActorGroup {
    pub actor: Option<String>,
    pub events: Vec<ClassifiedEvent>,
}

/// Shape of one entry of the consolidated aggregate.
///
/// Decided once when the model output is ingested, so the report code never
/// inspects raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportEntry {
    /// A list of groups (a JSON array or a digit-keyed object).
    EventList(Vec<ReportEntry>),
    /// A group carrying an `events` list.
    ActorGroup(ActorGroup),
    /// A single record, possibly with its own `actor`.
    RawRecord(ClassifiedEvent),
}

impl ReportEntry {
    /// Wrap unconsolidated events as a single list of raw records.
    pub fn from_events(events: Vec<ClassifiedEvent>) -> Self {
        ReportEntry::EventList(events.into_iter().map(ReportEntry::RawRecord).collect())
    }

    /// Ingest a parsed consolidation response.
    ///
    /// Returns `None` for scalars, which cannot be turned into rows.
    pub fn ingest(value: Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(ReportEntry::EventList(
                items.into_iter().filter_map(Self::ingest_group).collect(),
            )),
            Value::Object(map) if is_digit_keyed(&map) => {
                let mut keyed: Vec<(u64, Value)> = map
                    .into_iter()
                    .filter_map(|(k, v)| k.parse::<u64>().ok().map(|n| (n, v)))
                    .collect();
                keyed.sort_by_key(|(n, _)| *n);
                Some(ReportEntry::EventList(
                    keyed
                        .into_iter()
                        .filter_map(|(_, v)| Self::ingest_group(v))
                        .collect(),
                ))
            }
            Value::Object(_) => Self::ingest_group(value),
            other => {
                warn!(group = %other, "Unexpected group format");
                None
            }
        }
    }

    fn ingest_group(value: Value) -> Option<Self> {
        let map = match value {
            Value::Object(map) => map,
            other => {
                warn!(group = %other, "Unexpected group format");
                return None;
            }
        };

        if let Some(Value::Array(events)) = map.get("events") {
            let actor = map.get("actor").and_then(value_to_opt_string);
            let events = events.iter().filter_map(event_from_value).collect();
            return Some(ReportEntry::ActorGroup(ActorGroup { actor, events }));
        }

        event_from_value(&Value::Object(map)).map(ReportEntry::RawRecord)
    }
}

/// Sorted view of how many rows carry each severity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeverityCount {
    pub severity: Severity,
    pub count: usize,
}

/// One report row: an event plus the actor it was attributed to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(flatten)]
    pub event: ClassifiedEvent,
}

/// The summarized result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct SocReport {
    pub window: TimeWindow,
    pub counts: Vec<SeverityCount>,
    pub rows: Vec<EventRow>,
}

impl SocReport {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn is_digit_keyed(map: &Map<String, Value>) -> bool {
    map.keys()
        .all(|k| !k.is_empty() && k.chars().all(|c| c.is_ascii_digit()))
}

fn event_from_value(value: &Value) -> Option<ClassifiedEvent> {
    if !value.is_object() {
        warn!(event = %value, "Skipping non-object event");
        return None;
    }
    match serde_json::from_value(value.clone()) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "Skipping malformed event");
            None
        }
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn value_to_opt_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(value_to_string(other)),
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(value_to_string(&Value::deserialize(deserializer)?))
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(value_to_opt_string(&Value::deserialize(deserializer)?))
}

fn lenient_severity<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Severity, D::Error> {
    Ok(Severity::from(value_to_string(&Value::deserialize(deserializer)?)))
}

fn string_or_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().map(value_to_string).collect(),
        Value::String(s) if s.is_empty() => Vec::new(),
        other => vec![value_to_string(&other)],
    })
}
