//! Analysis modules.
//!
//! Aggregation of per-chunk results and report statistics.

pub mod aggregator;

pub use aggregator::*;
