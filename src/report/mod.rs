//! Report generation.
//!
//! This module turns the consolidated aggregate into rows and renders
//! Markdown or JSON reports from them.

pub mod generator;

pub use generator::*;
