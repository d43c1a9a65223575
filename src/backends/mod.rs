use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;

use crate::conversations::{ContentBlock, Message};

mod error;
pub mod mock;

pub use error::{BackendError, BackendResult};
pub use mock::MockBackend;

/// Usage reported by the backend at the end of a completion stream.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CompletionUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionChunk {
    Text(String),
    Usage(CompletionUsage),
}

pub type CompletionStream =
    Pin<Box<dyn Stream<Item = BackendResult<CompletionChunk>> + Send>>;

/// The language-model collaborator the engine is handed. Wire-level provider
/// adapters live behind this trait and are out of the engine's scope.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Start a completion over `messages` with `system_text` as the system
    /// prompt, returning a stream of text chunks terminated by a usage chunk.
    async fn create_message(
        &self,
        system_text: &str,
        messages: &[Message],
    ) -> BackendResult<CompletionStream>;

    /// Authoritative token count for a slice of content blocks.
    async fn count_tokens(&self, blocks: &[ContentBlock]) -> BackendResult<usize>;

    fn backend_name(&self) -> &'static str;
}

/// Drain a completion stream to completion, accumulating text and capturing
/// the final usage chunk if the backend reported one.
pub async fn drain_stream(
    mut stream: CompletionStream,
) -> Result<(String, Option<CompletionUsage>)> {
    let mut text = String::new();
    let mut usage = None;

    while let Some(chunk) = stream.next().await {
        match chunk.context("completion stream failed mid-flight")? {
            CompletionChunk::Text(delta) => text.push_str(&delta),
            CompletionChunk::Usage(reported) => usage = Some(reported),
        }
    }

    Ok((text, usage))
}
