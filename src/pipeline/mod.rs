//! The fetch/classify/consolidate pipeline.
//!
//! This module provides the chunker, the pipeline state and the
//! orchestrator that drives one run.

pub mod chunker;
pub mod orchestrator;
pub mod state;

pub use orchestrator::{Pipeline, PipelineSettings, DEFAULT_MAX_ITERATIONS};
