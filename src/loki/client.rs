//! Loki range-query client.
//!
//! Talks to `/loki/api/v1/query_range` and decodes the stream/value
//! pairs it returns. The pagination logic lives in the fetcher and only
//! sees the [`LogBackend`] trait.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// One page request against the backend. Pages are always requested
/// oldest first, so the cursor only moves forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    /// LogQL stream selector.
    pub query: String,
    /// Inclusive start, nanoseconds since the epoch.
    pub start: i64,
    /// End, nanoseconds since the epoch.
    pub end: i64,
    /// Maximum number of entries in the page.
    pub limit: usize,
}

/// A labelled stream and its entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LokiStream {
    #[serde(default)]
    pub stream: HashMap<String, String>,
    #[serde(default)]
    pub values: Vec<LokiEntry>,
}

/// A `[timestamp, line]` pair. Newer Loki versions may append a third
/// element with structured metadata; it is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Vec<Value>")]
pub struct LokiEntry {
    /// Nanosecond timestamp as sent by Loki (a decimal string).
    pub timestamp: String,
    pub line: String,
}

impl LokiEntry {
    #[cfg(test)]
    pub fn new(timestamp: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            line: line.into(),
        }
    }

    /// Parse the timestamp into nanoseconds.
    pub fn timestamp_ns(&self) -> Result<i64> {
        self.timestamp
            .trim()
            .parse::<i64>()
            .with_context(|| format!("Malformed Loki timestamp: {:?}", self.timestamp))
    }
}

impl TryFrom<Vec<Value>> for LokiEntry {
    type Error = String;

    fn try_from(parts: Vec<Value>) -> Result<Self, Self::Error> {
        let mut parts = parts.into_iter();
        let timestamp = match parts.next() {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            other => return Err(format!("expected a timestamp, got {:?}", other)),
        };
        let line = match parts.next() {
            Some(Value::String(s)) => s,
            other => return Err(format!("expected a log line, got {:?}", other)),
        };
        Ok(Self { timestamp, line })
    }
}

#[derive(Debug, Deserialize)]
struct QueryRangeResponse {
    #[serde(default)]
    data: QueryRangeData,
}

#[derive(Debug, Default, Deserialize)]
struct QueryRangeData {
    #[serde(default)]
    result: Vec<LokiStream>,
}

/// Anything that can answer a range query.
#[async_trait]
pub trait LogBackend: Send + Sync {
    async fn query_range(&self, query: &RangeQuery) -> Result<Vec<LokiStream>>;
}

/// HTTP client for a Loki instance.
pub struct LokiClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl LokiClient {
    /// Create a client for the Loki instance at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }
}

#[async_trait]
impl LogBackend for LokiClient {
    async fn query_range(&self, query: &RangeQuery) -> Result<Vec<LokiStream>> {
        let url = format!("{}/loki/api/v1/query_range", self.base_url);
        debug!(
            "Querying Loki from {} to {} (limit {})",
            query.start, query.end, query.limit
        );

        let params = [
            ("query", query.query.clone()),
            ("start", query.start.to_string()),
            ("end", query.end.to_string()),
            ("limit", query.limit.to_string()),
            ("direction", "FORWARD".to_string()),
        ];

        let response = self
            .http_client
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow!("Loki query timed out: {}", e)
                } else if e.is_connect() {
                    anyhow!("Cannot connect to Loki at {}", self.base_url)
                } else {
                    anyhow!("Failed to query Loki: {}", e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Loki API error {}: {}", status, body));
        }

        let body: QueryRangeResponse = response
            .json()
            .await
            .context("Failed to parse Loki response")?;

        Ok(body.data.result)
    }
}
