//! Terminal-chunk guarantee for streamed generations.
//!
//! Every provider routes its stream through a [`ChunkEmitter`], so callers
//! see exactly one `done = true` chunk, last, whatever the vendor sent.

use luna_core::types::{ProviderId, StreamChunk, Usage};
use tracing::{debug, warn};

use crate::traits::ChunkSink;

/// Wraps the caller's chunk callback for the lifetime of one stream.
pub struct ChunkEmitter<'s, 'a> {
    provider: ProviderId,
    model: String,
    sink: &'s mut ChunkSink<'a>,
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    text_chunks: usize,
    finished: bool,
}

impl<'s, 'a> ChunkEmitter<'s, 'a> {
    pub fn new(provider: ProviderId, model: &str, sink: &'s mut ChunkSink<'a>) -> Self {
        Self {
            provider,
            model: model.to_string(),
            sink,
            prompt_tokens: None,
            completion_tokens: None,
            text_chunks: 0,
            finished: false,
        }
    }

    /// Forward an incremental text chunk. Empty text is dropped.
    pub fn text(&mut self, content: &str) {
        if self.finished || content.is_empty() {
            return;
        }
        self.text_chunks += 1;
        (self.sink)(StreamChunk::text(content));
    }

    /// Record usage counters. Later non-zero values replace earlier ones,
    /// field by field.
    pub fn record_usage(&mut self, prompt_tokens: Option<u32>, completion_tokens: Option<u32>) {
        if let Some(n) = prompt_tokens.filter(|n| *n > 0) {
            self.prompt_tokens = Some(n);
        }
        if let Some(n) = completion_tokens.filter(|n| *n > 0) {
            self.completion_tokens = Some(n);
        }
    }

    pub fn usage(&self) -> Option<Usage> {
        if self.prompt_tokens.is_none() && self.completion_tokens.is_none() {
            return None;
        }
        Some(Usage::new(
            self.prompt_tokens.unwrap_or(0),
            self.completion_tokens.unwrap_or(0),
        ))
    }

    pub fn text_chunks(&self) -> usize {
        self.text_chunks
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Emit the terminal chunk. Only the first call has any effect.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        if self.text_chunks == 0 {
            warn!(
                provider = %self.provider,
                model = %self.model,
                "Stream finished without any text chunks"
            );
        }
        let usage = self.usage();
        debug!(
            provider = %self.provider,
            chunks = self.text_chunks,
            completion_tokens = usage.map_or(0, |u| u.completion_tokens),
            "Stream complete"
        );
        (self.sink)(StreamChunk::done(usage));
    }
}
