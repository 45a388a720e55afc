//! Language model access.
//!
//! This module provides the chat-completion client and the analyst that
//! turns model answers into classified events.

pub mod analyst;
pub mod client;

pub use analyst::{AnalystError, EventAnalyst, LlmAnalyst};
pub use client::{ModelSettings, OpenAiClient};
