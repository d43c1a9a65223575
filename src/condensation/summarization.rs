use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backends::drain_stream;
use crate::condensation::estimator::{estimate_messages_tokens, estimate_text_tokens};
use crate::condensation::{
    CondensationContext, CondensationError, CondensationOptions, CondensationResult,
    CondensationStrategy, PassMetrics, StrategyMetrics,
};
use crate::conversations::{ContentBlock, Message, MessageContent};

pub const SUMMARIZATION_STRATEGY_ID: &str = "summarization";

/// Nominal price per million input tokens, used only for cost estimates.
const ESTIMATE_COST_PER_MTOKEN: f64 = 3.0;

const SUMMARY_PROMPT: &str = "Summarize the conversation so far concisely. Focus on:\n\
    - Key decisions, configurations, and code changes\n\
    - Important context needed for future reference\n\
    - Unresolved issues or pending tasks\n\
    - Critical file paths, functions, or entities mentioned\n\n\
    Omit routine acknowledgments and redundant information.\n\
    Provide only the summary, no preamble.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizationConfig {
    /// Leading messages kept verbatim; the first may carry initial
    /// instructions.
    pub keep_first: usize,
    /// Trailing messages kept verbatim.
    pub keep_recent: usize,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            keep_first: 1,
            keep_recent: 10,
        }
    }
}

impl SummarizationConfig {
    pub fn with_keep_first(mut self, count: usize) -> Self {
        self.keep_first = count;
        self
    }

    pub fn with_keep_recent(mut self, count: usize) -> Self {
        self.keep_recent = count;
        self
    }
}

/// Sliding-window summarizer: everything between the kept head and the kept
/// tail is replaced by one model-generated summary message.
pub struct SummarizationStrategy {
    config: SummarizationConfig,
}

impl SummarizationStrategy {
    pub fn new(config: SummarizationConfig) -> Self {
        Self { config }
    }
}

impl Default for SummarizationStrategy {
    fn default() -> Self {
        Self::new(SummarizationConfig::default())
    }
}

fn messages_to_blocks(messages: &[Message]) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    for message in messages {
        match &message.content {
            MessageContent::Text(text) => blocks.push(ContentBlock::text(text.clone())),
            MessageContent::Blocks(inner) => blocks.extend(inner.iter().cloned()),
        }
    }
    blocks
}

#[async_trait]
impl CondensationStrategy for SummarizationStrategy {
    fn id(&self) -> &'static str {
        SUMMARIZATION_STRATEGY_ID
    }

    fn name(&self) -> &'static str {
        "Sliding-window summarization"
    }

    fn requires_backend(&self) -> bool {
        true
    }

    fn estimate_cost(&self, context: &CondensationContext) -> f64 {
        let tokens = estimate_messages_tokens(&context.messages);
        tokens as f64 / 1_000_000.0 * ESTIMATE_COST_PER_MTOKEN
    }

    async fn apply(
        &self,
        context: &CondensationContext,
        options: &CondensationOptions,
    ) -> CondensationResult {
        let messages = &context.messages;
        let keep_first = self.config.keep_first.min(messages.len());
        let tail_start = messages
            .len()
            .saturating_sub(self.config.keep_recent)
            .max(keep_first);

        let head = &messages[..keep_first];
        let tail = &messages[tail_start..];

        if tail.iter().any(|m| m.is_summary) {
            return CondensationResult::failed(context, CondensationError::CondensedRecently);
        }

        let window: Vec<Message> = messages[keep_first..tail_start]
            .iter()
            .filter(|m| !m.is_summary)
            .cloned()
            .collect();

        if window.len() <= 1 {
            return CondensationResult::failed(context, CondensationError::NotEnoughMessages);
        }

        let backend = match options.summarization_backend() {
            Some(backend) => backend,
            None => return CondensationResult::failed(context, CondensationError::MissingBackend),
        };

        let prompt = options
            .custom_prompt
            .clone()
            .unwrap_or_else(|| SUMMARY_PROMPT.to_string());

        tracing::debug!(
            window = window.len(),
            kept_head = head.len(),
            kept_tail = tail.len(),
            backend = backend.backend_name(),
            "requesting conversation summary"
        );

        let stream = match backend.create_message(&prompt, &window).await {
            Ok(stream) => stream,
            Err(error) => {
                return CondensationResult::failed(
                    context,
                    CondensationError::SummarizationFailed(error.to_string()),
                );
            }
        };

        let (summary_text, usage) = match drain_stream(stream).await {
            Ok(drained) => drained,
            Err(error) => {
                return CondensationResult::failed(
                    context,
                    CondensationError::SummarizationFailed(error.to_string()),
                );
            }
        };

        if summary_text.trim().is_empty() {
            return CondensationResult::failed(
                context,
                CondensationError::SummarizationFailed("model returned an empty summary".into()),
            );
        }

        let mut new_messages = Vec::with_capacity(head.len() + 1 + tail.len());
        new_messages.extend_from_slice(head);
        new_messages.push(Message::summary(summary_text.clone()));
        new_messages.extend_from_slice(tail);

        // Authoritative recount of the kept context, system prompt included;
        // the estimator only steps in when the collaborator cannot count.
        let kept: Vec<Message> = head.iter().chain(tail.iter()).cloned().collect();
        let mut kept_blocks = Vec::new();
        if let Some(system_prompt) = &context.system_prompt {
            kept_blocks.push(ContentBlock::text(system_prompt.clone()));
        }
        kept_blocks.extend(messages_to_blocks(&kept));
        let kept_tokens = match backend.count_tokens(&kept_blocks).await {
            Ok(tokens) => tokens,
            Err(error) => {
                tracing::warn!(%error, "token recount failed; falling back to estimate");
                let system_tokens = context
                    .system_prompt
                    .as_deref()
                    .map(estimate_text_tokens)
                    .unwrap_or(0);
                system_tokens + estimate_messages_tokens(&kept)
            }
        };

        let summary_tokens = usage
            .map(|u| u.output_tokens as usize)
            .filter(|&t| t > 0)
            .unwrap_or_else(|| estimate_text_tokens(&summary_text));

        let cost = usage.map(|u| u.total_cost).unwrap_or(0.0);
        let new_context_tokens = kept_tokens + summary_tokens;

        let mut metrics = StrategyMetrics::new(SUMMARIZATION_STRATEGY_ID);
        metrics.llm_calls = 1;
        metrics.passes.push(PassMetrics {
            pass_id: "summarization".to_string(),
            tokens_before: context.prev_context_tokens,
            tokens_after: new_context_tokens,
            time_elapsed_ms: 0,
            llm_calls: 1,
            cost,
            operations_applied: vec!["summarize".to_string()],
        });

        CondensationResult {
            messages: new_messages,
            cost,
            new_context_tokens,
            summary: Some(summary_text),
            error: None,
            metrics: Some(metrics),
        }
    }
}
