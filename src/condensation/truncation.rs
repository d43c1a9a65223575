use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::condensation::estimator::{estimate_messages_tokens, estimate_text_tokens};
use crate::condensation::{
    CondensationContext, CondensationOptions, CondensationResult, CondensationStrategy,
    PassMetrics, StrategyMetrics,
};
use crate::conversations::{ContentBlock, Message, MessageContent, Role};

pub const TRUNCATION_STRATEGY_ID: &str = "truncation";

const TOOL_RESULT_REMOVED: &str = "[tool result removed to reduce context]";
const TOOL_PARAMS_REMOVED: &str = "[tool parameters removed to reduce context]";
const ASSISTANT_TEXT_REMOVED: &str = "[assistant message removed to reduce context]";
const USER_TEXT_REMOVED: &str = "[user message removed to reduce context]";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruncationConfig {
    /// Leading messages never touched.
    pub preserve_first: usize,
    /// Trailing messages never touched.
    pub preserve_recent: usize,
}

impl Default for TruncationConfig {
    fn default() -> Self {
        Self {
            preserve_first: 1,
            preserve_recent: 10,
        }
    }
}

impl TruncationConfig {
    pub fn with_preserve_first(mut self, count: usize) -> Self {
        self.preserve_first = count;
        self
    }

    pub fn with_preserve_recent(mut self, count: usize) -> Self {
        self.preserve_recent = count;
        self
    }
}

/// Removal priority, highest first. Tool output goes before anything a human
/// wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemovalCategory {
    ToolResults,
    ToolParams,
    AssistantText,
    UserText,
}

const REMOVAL_ORDER: [RemovalCategory; 4] = [
    RemovalCategory::ToolResults,
    RemovalCategory::ToolParams,
    RemovalCategory::AssistantText,
    RemovalCategory::UserText,
];

/// Deterministic, rule-based reduction with no model calls. Strips content by
/// category priority, oldest first, outside a preserved head/tail window,
/// until the token budget is met.
pub struct TruncationStrategy {
    config: TruncationConfig,
}

impl TruncationStrategy {
    pub fn new(config: TruncationConfig) -> Self {
        Self { config }
    }

    fn removable_range(&self, len: usize) -> std::ops::Range<usize> {
        let start = self.config.preserve_first.min(len);
        let end = len.saturating_sub(self.config.preserve_recent).max(start);
        start..end
    }

    /// Strip the next oldest item of `category` inside `range`. Returns the
    /// estimated tokens saved, or None when the category is exhausted.
    fn strip_next(
        &self,
        messages: &mut [Message],
        range: &std::ops::Range<usize>,
        category: RemovalCategory,
    ) -> Option<usize> {
        for index in range.clone() {
            let message = &mut messages[index];
            match category {
                RemovalCategory::ToolResults => {
                    if message.role != Role::Tool {
                        continue;
                    }
                    if let MessageContent::Blocks(blocks) = &mut message.content {
                        for block in blocks.iter_mut() {
                            if let ContentBlock::ToolResult { content, .. } = block
                                && content.len() > TOOL_RESULT_REMOVED.len()
                            {
                                let saved = estimate_text_tokens(content)
                                    .saturating_sub(estimate_text_tokens(TOOL_RESULT_REMOVED));
                                *content = TOOL_RESULT_REMOVED.to_string();
                                return Some(saved);
                            }
                        }
                    }
                }
                RemovalCategory::ToolParams => {
                    if let MessageContent::Blocks(blocks) = &mut message.content {
                        for block in blocks.iter_mut() {
                            if let ContentBlock::ToolUse { input, .. } = block {
                                let serialized = input.to_string();
                                if serialized.len() > TOOL_PARAMS_REMOVED.len() + 2 {
                                    let saved = estimate_text_tokens(&serialized)
                                        .saturating_sub(estimate_text_tokens(TOOL_PARAMS_REMOVED));
                                    *input =
                                        serde_json::Value::String(TOOL_PARAMS_REMOVED.to_string());
                                    return Some(saved);
                                }
                            }
                        }
                    }
                }
                RemovalCategory::AssistantText => {
                    if message.role == Role::Assistant
                        && let Some(saved) = strip_text(message, ASSISTANT_TEXT_REMOVED)
                    {
                        return Some(saved);
                    }
                }
                RemovalCategory::UserText => {
                    if message.role == Role::User
                        && let Some(saved) = strip_text(message, USER_TEXT_REMOVED)
                    {
                        return Some(saved);
                    }
                }
            }
        }
        None
    }
}

fn strip_text(message: &mut Message, marker: &str) -> Option<usize> {
    match &mut message.content {
        MessageContent::Text(text) => {
            if text.len() <= marker.len() || text == marker {
                return None;
            }
            let saved =
                estimate_text_tokens(text).saturating_sub(estimate_text_tokens(marker));
            *text = marker.to_string();
            Some(saved)
        }
        MessageContent::Blocks(blocks) => {
            for block in blocks.iter_mut() {
                if let ContentBlock::Text { text } = block
                    && text.len() > marker.len()
                    && text != marker
                {
                    let saved =
                        estimate_text_tokens(text).saturating_sub(estimate_text_tokens(marker));
                    *text = marker.to_string();
                    return Some(saved);
                }
            }
            None
        }
    }
}

impl Default for TruncationStrategy {
    fn default() -> Self {
        Self::new(TruncationConfig::default())
    }
}

#[async_trait]
impl CondensationStrategy for TruncationStrategy {
    fn id(&self) -> &'static str {
        TRUNCATION_STRATEGY_ID
    }

    fn name(&self) -> &'static str {
        "Priority truncation"
    }

    async fn apply(
        &self,
        context: &CondensationContext,
        _options: &CondensationOptions,
    ) -> CondensationResult {
        let budget = context
            .target_tokens
            .unwrap_or(context.prev_context_tokens / 2);

        let tokens_before = estimate_messages_tokens(&context.messages);
        let mut current = tokens_before;

        if current <= budget {
            return CondensationResult {
                new_context_tokens: context.prev_context_tokens,
                ..CondensationResult::unchanged(context)
            };
        }

        let mut messages = context.messages.clone();
        let range = self.removable_range(messages.len());
        let mut operations_applied = Vec::new();

        'outer: for category in REMOVAL_ORDER {
            let mut stripped_any = false;
            while current > budget {
                match self.strip_next(&mut messages, &range, category) {
                    Some(saved) => {
                        current = current.saturating_sub(saved);
                        stripped_any = true;
                    }
                    None => break,
                }
            }
            if stripped_any {
                operations_applied.push(format!("{:?}", category));
            }
            if current <= budget {
                break 'outer;
            }
        }

        let saved = tokens_before.saturating_sub(current);
        let new_context_tokens = context.prev_context_tokens.saturating_sub(saved);

        tracing::debug!(
            budget,
            tokens_before,
            tokens_after = current,
            "truncation finished"
        );

        let mut metrics = StrategyMetrics::new(TRUNCATION_STRATEGY_ID);
        metrics.passes.push(PassMetrics {
            pass_id: "truncation".to_string(),
            tokens_before,
            tokens_after: current,
            time_elapsed_ms: 0,
            llm_calls: 0,
            cost: 0.0,
            operations_applied,
        });

        CondensationResult {
            messages,
            cost: 0.0,
            new_context_tokens,
            summary: None,
            error: None,
            metrics: Some(metrics),
        }
    }
}
