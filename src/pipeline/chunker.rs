//! Fixed-size chunking of the fetched lines.

use crate::pipeline::state::{Chunk, PipelineState};
use anyhow::{bail, Result};
use tracing::info;

/// Splits the remaining lines into chunks of at most `size` lines.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    size: usize,
}

impl Chunker {
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            bail!("Chunk size must be at least 1");
        }
        Ok(Self { size })
    }

    /// Move the next chunk out of `remaining`. Sets `chunk` to `None` once
    /// nothing is left.
    pub fn advance(&self, state: PipelineState) -> PipelineState {
        let mut remaining = state.remaining;
        if remaining.is_empty() {
            return PipelineState {
                chunk: None,
                remaining,
                ..state
            };
        }

        let take = self.size.min(remaining.len());
        let chunk = Chunk::new(remaining.drain(..take).collect());
        info!(
            "[Chunker] emitting {} lines ({} left)",
            chunk.len(),
            remaining.len()
        );

        PipelineState {
            chunk: Some(chunk),
            remaining,
            ..state
        }
    }

    /// Number of chunks `lines` will be split into.
    pub fn chunk_count(&self, lines: usize) -> usize {
        lines.div_ceil(self.size)
    }
}
