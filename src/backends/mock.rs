use async_trait::async_trait;
use futures::stream;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{
    BackendError, BackendResult, CompletionBackend, CompletionChunk, CompletionStream,
    CompletionUsage,
};
use crate::conversations::{ContentBlock, Message};

/// Scriptable backend for tests. Returns a fixed response split into word
/// chunks, followed by a usage chunk, and counts every call it receives.
pub struct MockBackend {
    responses: Mutex<Vec<String>>,
    default_response: String,
    failure: Option<String>,
    usage: CompletionUsage,
    calls: AtomicUsize,
    count_calls: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            default_response: "Mock summary of the conversation.".to_string(),
            failure: None,
            usage: CompletionUsage {
                input_tokens: 100,
                output_tokens: 20,
                total_cost: 0.005,
            },
            calls: AtomicUsize::new(0),
            count_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.default_response = response.into();
        self
    }

    /// Queue responses returned in order before falling back to the default.
    pub fn with_queued_responses(self, responses: Vec<String>) -> Self {
        {
            let mut queue = self.responses.lock().unwrap();
            *queue = responses;
            queue.reverse();
        }
        self
    }

    pub fn failing_with(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn with_usage(mut self, usage: CompletionUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn count_tokens_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> String {
        self.responses
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| self.default_response.clone())
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionBackend for MockBackend {
    async fn create_message(
        &self,
        _system_text: &str,
        _messages: &[Message],
    ) -> BackendResult<CompletionStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = &self.failure {
            return Err(BackendError::RequestFailed {
                message: message.clone(),
                status: None,
            });
        }

        let response = self.next_response();
        let mut chunks: Vec<BackendResult<CompletionChunk>> = Vec::new();
        let word_count = response.split(' ').count();
        for (i, word) in response.split(' ').enumerate() {
            let chunk = if i + 1 < word_count {
                format!("{} ", word)
            } else {
                word.to_string()
            };
            chunks.push(Ok(CompletionChunk::Text(chunk)));
        }
        chunks.push(Ok(CompletionChunk::Usage(self.usage)));

        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn count_tokens(&self, blocks: &[ContentBlock]) -> BackendResult<usize> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);

        if self.failure.is_some() {
            return Err(BackendError::TokenCountFailed("mock failure".to_string()));
        }

        let chars: usize = blocks
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.len(),
                ContentBlock::ToolUse { name, input, .. } => name.len() + input.to_string().len(),
                ContentBlock::ToolResult { content, .. } => content.len(),
            })
            .sum();
        Ok(chars / 4)
    }

    fn backend_name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::drain_stream;

    #[tokio::test]
    async fn test_queued_responses_served_in_order() {
        let backend = MockBackend::new()
            .with_queued_responses(vec!["first".to_string(), "second".to_string()]);

        let (text, _) = drain_stream(backend.create_message("s", &[]).await.unwrap())
            .await
            .unwrap();
        assert_eq!(text, "first");

        let (text, _) = drain_stream(backend.create_message("s", &[]).await.unwrap())
            .await
            .unwrap();
        assert_eq!(text, "second");

        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_count_tokens_scales_with_content() {
        let backend = MockBackend::new();
        let small = backend
            .count_tokens(&[ContentBlock::text("abcd")])
            .await
            .unwrap();
        let large = backend
            .count_tokens(&[ContentBlock::text("abcd".repeat(100))])
            .await
            .unwrap();
        assert!(large > small);
    }
}
