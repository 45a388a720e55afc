//! Log backend access.
//!
//! This module provides the Loki client and the paginated fetcher that
//! turns a time window into timestamp-prefixed log lines.

pub mod client;
pub mod fetcher;

pub use client::{LogBackend, LokiClient};
pub use fetcher::{fetch_lines, LogQuery};
