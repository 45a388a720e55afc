//! Paginated log fetching.
//!
//! Walks a time window forward page by page until the backend runs dry,
//! then flattens the streams into timestamp-prefixed lines.

use crate::loki::client::{LogBackend, LokiStream, RangeQuery};
use crate::models::{LogLine, TimeWindow};
use anyhow::Result;
use tracing::{debug, warn};

/// Which streams to pull and how large each page may be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub namespace: String,
    pub apps: Vec<String>,
    pub page_limit: usize,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            namespace: "honeypots".to_string(),
            apps: vec!["cowrie".to_string(), "dionaea".to_string()],
            page_limit: 800,
        }
    }
}

impl LogQuery {
    /// LogQL selector matching the namespace and any of the apps.
    pub fn expression(&self) -> String {
        format!(
            "{{namespace=\"{}\", app=~\"{}\"}}",
            self.namespace,
            self.apps.join("|")
        )
    }
}

/// Query `[start_ns, end_ns)` page by page.
///
/// Each page starts one nanosecond after the newest entry of the previous
/// page. Stops on an empty page or once the start reaches the end.
pub async fn fetch_streams<B: LogBackend + ?Sized>(
    backend: &B,
    query: &LogQuery,
    start_ns: i64,
    end_ns: i64,
) -> Result<Vec<LokiStream>> {
    let expression = query.expression();
    let mut all_streams = Vec::new();
    let mut current_start = start_ns;
    let mut pages = 0usize;

    while current_start < end_ns {
        let page = backend
            .query_range(&RangeQuery {
                query: expression.clone(),
                start: current_start,
                end: end_ns,
                limit: query.page_limit,
            })
            .await?;
        pages += 1;

        let Some(last) = newest_timestamp(&page)? else {
            break;
        };
        all_streams.extend(page);

        let next_start = last.saturating_add(1);
        if next_start <= current_start {
            warn!(
                "Loki cursor did not advance past {}; stopping pagination",
                current_start
            );
            break;
        }
        current_start = next_start;
    }

    debug!("Fetched {} streams in {} pages", all_streams.len(), pages);
    Ok(all_streams)
}

/// Flatten streams into lines, keeping page, stream and entry order.
pub fn extract_lines(streams: &[LokiStream]) -> Result<Vec<LogLine>> {
    let mut lines = Vec::new();
    for stream in streams {
        for entry in &stream.values {
            if let Some(line) = LogLine::from_entry(entry.timestamp_ns()?, &entry.line) {
                lines.push(line);
            }
        }
    }
    Ok(lines)
}

/// Fetch every line in the window.
pub async fn fetch_lines<B: LogBackend + ?Sized>(
    backend: &B,
    query: &LogQuery,
    window: &TimeWindow,
) -> Result<Vec<LogLine>> {
    let (start_ns, end_ns) = window.bounds_ns()?;
    let streams = fetch_streams(backend, query, start_ns, end_ns).await?;
    extract_lines(&streams)
}

fn newest_timestamp(page: &[LokiStream]) -> Result<Option<i64>> {
    let mut newest = None;
    for entry in page.iter().flat_map(|s| &s.values) {
        let ts = entry.timestamp_ns()?;
        newest = Some(newest.map_or(ts, |n: i64| n.max(ts)));
    }
    Ok(newest)
}
