mod config;
mod decompose;
mod operations;

pub use config::{
    BatchOperation, ContentOperation, LaneOperations, LaneOverride, LaneRule, MessageSelection,
    PassCondition, PassConfig, PassMode, SmartConfig, SummarizeParams, TruncateParams,
};
pub use decompose::{DecomposedMessage, ToolParamEntry, ToolResultEntry, decompose, recompose};
pub use operations::{
    Lane, OperationExecutor, OperationOutcome, TEXT_SUPPRESSED_MARKER,
    TOOL_PARAMS_SUPPRESSED_MARKER, TOOL_RESULT_SUPPRESSED_MARKER, truncate_text,
};

use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Instant;

use crate::condensation::estimator::{estimate_messages_tokens, estimate_text_tokens};
use crate::condensation::lossless::LosslessStrategy;
use crate::condensation::summarization::{SummarizationConfig, SummarizationStrategy};
use crate::condensation::{
    CondensationContext, CondensationOptions, CondensationResult, CondensationStrategy,
    PassMetrics, StrategyMetrics,
};
use crate::conversations::Message;

pub const SMART_STRATEGY_ID: &str = "smart";

const ESTIMATE_COST_PER_MTOKEN: f64 = 3.0;

/// Multi-pass engine: each configured pass selects a slice of the working
/// transcript, transforms it whole-batch or lane-by-lane, and hands the
/// result to the next pass. Stops early once the target budget is met.
pub struct SmartStrategy {
    config: SmartConfig,
    lossless: LosslessStrategy,
}

impl SmartStrategy {
    pub fn new(config: SmartConfig) -> Self {
        Self {
            config,
            lossless: LosslessStrategy::new(),
        }
    }

    async fn run_batch(
        &self,
        messages: &mut Vec<Message>,
        selected: &[usize],
        operation: &BatchOperation,
        options: &CondensationOptions,
        conversation_id: &str,
    ) -> (Vec<String>, usize, f64) {
        let BatchOperation::Summarize {
            keep_first,
            keep_last,
        } = operation
        else {
            return (Vec::new(), 0, 0.0);
        };

        if selected.is_empty() {
            return (Vec::new(), 0, 0.0);
        }

        let batch: Vec<Message> = selected.iter().map(|&i| messages[i].clone()).collect();
        let batch_tokens = estimate_messages_tokens(&batch);
        let sub_context = CondensationContext::new(batch, conversation_id.to_string())
            .with_prev_context_tokens(batch_tokens);

        let delegate = SummarizationStrategy::new(
            SummarizationConfig::default()
                .with_keep_first(*keep_first)
                .with_keep_recent(*keep_last),
        );

        let sub_result = delegate.apply(&sub_context, options).await;
        if let Some(error) = &sub_result.error {
            // A batch that cannot be summarized passes through untouched;
            // only per-lane summarize carries the truncate fallback.
            tracing::warn!(%error, "batch summarization skipped");
            return (Vec::new(), 0, 0.0);
        }

        let selected_set: HashSet<usize> = selected.iter().copied().collect();
        let mut rebuilt = Vec::with_capacity(messages.len());
        let mut inserted = false;
        for (index, message) in messages.iter().enumerate() {
            if selected_set.contains(&index) {
                if !inserted {
                    rebuilt.extend(sub_result.messages.iter().cloned());
                    inserted = true;
                }
            } else {
                rebuilt.push(message.clone());
            }
        }
        *messages = rebuilt;

        (vec!["batch:summarize".to_string()], 1, sub_result.cost)
    }

    async fn run_individual(
        &self,
        messages: &mut [Message],
        selected: &[usize],
        lane_ops: &LaneOperations,
        options: &CondensationOptions,
    ) -> (Vec<String>, usize, f64) {
        let executor = OperationExecutor::new(options);
        let mut applied = Vec::new();
        let mut llm_calls = 0;
        let mut cost = 0.0;

        for &index in selected {
            let mut decomposed = decompose(&messages[index]);

            for lane in [Lane::Text, Lane::ToolParams, Lane::ToolResults] {
                let rule = match lane {
                    Lane::Text => lane_ops.rule_for_text(index),
                    Lane::ToolParams => lane_ops.rule_for_params(index),
                    Lane::ToolResults => lane_ops.rule_for_results(index),
                };

                if let Some(min_tokens) = rule.min_tokens
                    && lane_estimate(&decomposed, lane) < min_tokens
                {
                    continue;
                }

                let outcome = executor.apply(&mut decomposed, lane, &rule.operation).await;
                if let Some(operation) = outcome.applied {
                    applied.push(operation);
                }
                llm_calls += outcome.llm_calls;
                cost += outcome.cost;
            }

            messages[index] = recompose(decomposed);
        }

        (applied, llm_calls, cost)
    }
}

fn lane_estimate(decomposed: &DecomposedMessage, lane: Lane) -> usize {
    match lane {
        Lane::Text => decomposed
            .text
            .as_deref()
            .map(estimate_text_tokens)
            .unwrap_or(0),
        Lane::ToolParams => decomposed
            .tool_params
            .iter()
            .map(|entry| {
                estimate_text_tokens(&entry.name) + estimate_text_tokens(&entry.input.to_string())
            })
            .sum(),
        Lane::ToolResults => decomposed
            .tool_results
            .iter()
            .map(|entry| estimate_text_tokens(&entry.content))
            .sum(),
    }
}

#[async_trait]
impl CondensationStrategy for SmartStrategy {
    fn id(&self) -> &'static str {
        SMART_STRATEGY_ID
    }

    fn name(&self) -> &'static str {
        "Smart multi-pass"
    }

    fn requires_backend(&self) -> bool {
        // Lane-level summarize degrades to truncation on its own; only
        // whole-batch summarization hard-requires a collaborator.
        self.config.passes.iter().any(|pass| {
            matches!(
                pass.mode,
                PassMode::Batch(BatchOperation::Summarize { .. })
            )
        })
    }

    fn estimate_cost(&self, context: &CondensationContext) -> f64 {
        let summarizing_passes = self
            .config
            .passes
            .iter()
            .filter(|pass| match &pass.mode {
                PassMode::Batch(BatchOperation::Summarize { .. }) => true,
                PassMode::Batch(BatchOperation::Keep) => false,
                PassMode::Individual(ops) => [&ops.text, &ops.tool_params, &ops.tool_results]
                    .iter()
                    .any(|rule| matches!(rule.operation, ContentOperation::Summarize(_))),
            })
            .count();

        let tokens = estimate_messages_tokens(&context.messages);
        summarizing_passes as f64 * tokens as f64 / 1_000_000.0 * ESTIMATE_COST_PER_MTOKEN
    }

    async fn apply(
        &self,
        context: &CondensationContext,
        options: &CondensationOptions,
    ) -> CondensationResult {
        let mut messages = context.messages.clone();
        let mut passes: Vec<PassMetrics> = Vec::new();
        let mut total_cost = 0.0;
        let mut total_llm_calls = 0;

        let initial_estimate = estimate_messages_tokens(&messages);
        let mut current = initial_estimate;

        if self.config.run_lossless_first {
            let started = Instant::now();
            let (dedup_stats, consolidation_stats) = self.lossless.reduce(&mut messages);

            let mut operations_applied = Vec::new();
            if dedup_stats.duplicates_replaced > 0 {
                operations_applied.push("file_dedup".to_string());
            }
            operations_applied.extend(
                consolidation_stats
                    .strategies_applied
                    .iter()
                    .map(|s| s.to_string()),
            );

            let after = estimate_messages_tokens(&messages);
            passes.push(PassMetrics {
                pass_id: "lossless".to_string(),
                tokens_before: current,
                tokens_after: after,
                time_elapsed_ms: started.elapsed().as_millis() as u64,
                llm_calls: 0,
                cost: 0.0,
                operations_applied,
            });
            current = after;
        }

        let target = context.target_tokens.or(self.config.target_tokens);

        for pass in &self.config.passes {
            if let Some(target_tokens) = target
                && current <= target_tokens
            {
                break;
            }

            if let PassCondition::TokensAbove(threshold) = pass.condition
                && current <= threshold
            {
                tracing::debug!(pass = %pass.id, threshold, current, "pass skipped");
                continue;
            }

            let started = Instant::now();
            let tokens_before_pass = current;
            let selected = pass.selection.select(&messages);

            let (operations_applied, llm_calls, cost) = match &pass.mode {
                PassMode::Batch(operation) => {
                    self.run_batch(
                        &mut messages,
                        &selected,
                        operation,
                        options,
                        &context.conversation_id,
                    )
                    .await
                }
                PassMode::Individual(lane_ops) => {
                    self.run_individual(&mut messages, &selected, lane_ops, options)
                        .await
                }
            };

            current = estimate_messages_tokens(&messages);
            total_cost += cost;
            total_llm_calls += llm_calls;

            passes.push(PassMetrics {
                pass_id: pass.id.clone(),
                tokens_before: tokens_before_pass,
                tokens_after: current,
                time_elapsed_ms: started.elapsed().as_millis() as u64,
                llm_calls,
                cost,
                operations_applied,
            });

            if let Some(target_tokens) = target
                && current <= target_tokens
            {
                tracing::debug!(pass = %pass.id, current, target_tokens, "target met");
                break;
            }
        }

        let new_context_tokens = if context.prev_context_tokens > 0 {
            (context.prev_context_tokens as i64 + current as i64 - initial_estimate as i64).max(0)
                as usize
        } else {
            current
        };

        let mut metrics = StrategyMetrics::new(SMART_STRATEGY_ID);
        metrics.llm_calls = total_llm_calls;
        metrics.passes = passes;

        CondensationResult {
            messages,
            cost: total_cost,
            new_context_tokens,
            summary: None,
            error: None,
            metrics: Some(metrics),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockBackend;
    use crate::conversations::ContentBlock;
    use std::sync::Arc;

    fn tool_heavy_transcript(len: usize) -> Vec<Message> {
        let mut messages = Vec::new();
        for i in 0..len {
            match i % 3 {
                0 => messages.push(Message::user(format!("request {} {}", i, "pad ".repeat(20)))),
                1 => messages.push(Message::assistant_blocks(vec![
                    ContentBlock::text(format!("working on {}", i)),
                    ContentBlock::tool_use(
                        format!("call_{}", i),
                        "bash",
                        serde_json::json!({"cmd": format!("step {}", i)}),
                    ),
                ])),
                _ => messages.push(Message::tool_result(
                    format!("call_{}", i - 1),
                    format!("output {} {}", i, "data ".repeat(40)),
                )),
            }
        }
        messages
    }

    fn options() -> CondensationOptions {
        CondensationOptions::new(Arc::new(MockBackend::new().with_response("batch summary")))
    }

    #[tokio::test]
    async fn test_suppresses_old_tool_lanes_beyond_recent_window() {
        let messages = tool_heavy_transcript(40);
        let prev = estimate_messages_tokens(&messages);
        let context = CondensationContext::new(messages, "conv")
            .with_prev_context_tokens(prev);

        let config = SmartConfig::default()
            .without_lossless_prelude()
            .with_pass(PassConfig::new(
                "suppress-old-tools",
                MessageSelection::PreserveRecentCount(25),
                PassMode::Individual(LaneOperations {
                    text: LaneRule::keep(),
                    tool_params: LaneRule::suppress(),
                    tool_results: LaneRule::suppress(),
                    overrides: Default::default(),
                }),
            ));

        let result = SmartStrategy::new(config)
            .condense(&context, &options())
            .await;

        assert!(result.error.is_none(), "unexpected error: {:?}", result.error);

        // Message 5 is a tool result outside the recent window; its small
        // lane still becomes the fixed marker because no threshold is set.
        let blocks = result.messages[5].blocks().unwrap();
        let ContentBlock::ToolResult { content, .. } = &blocks[0] else {
            panic!("tool result expected");
        };
        assert_eq!(content, TOOL_RESULT_SUPPRESSED_MARKER);

        // Recent messages keep their lanes.
        let recent = &result.messages[38];
        let ContentBlock::ToolResult { content, .. } = &recent.blocks().unwrap()[0] else {
            panic!("tool result expected");
        };
        assert!(content.starts_with("output"));
    }

    #[tokio::test]
    async fn test_threshold_leaves_small_lanes_alone() {
        let messages = vec![
            Message::tool_result("c1", "tiny"),
            Message::tool_result("c2", "x".repeat(4000)),
            Message::user("latest"),
        ];
        let prev = estimate_messages_tokens(&messages);
        let context = CondensationContext::new(messages, "conv")
            .with_prev_context_tokens(prev);

        let config = SmartConfig::default()
            .without_lossless_prelude()
            .with_pass(PassConfig::new(
                "trim-large-results",
                MessageSelection::PreserveRecentCount(1),
                PassMode::Individual(LaneOperations {
                    tool_results: LaneRule::truncate(200).with_min_tokens(100),
                    ..Default::default()
                }),
            ));

        let result = SmartStrategy::new(config)
            .condense(&context, &options())
            .await;

        assert!(result.error.is_none());
        assert_eq!(result.messages[0].content.as_flat_text(), "tiny");
        let truncated = result.messages[1].content.as_flat_text();
        assert!(truncated.len() < 4000);
        assert!(truncated.ends_with('…'));
    }

    #[tokio::test]
    async fn test_conditional_pass_skipped_below_threshold() {
        let messages = vec![
            Message::user("short conversation"),
            Message::assistant("yes"),
            Message::user("latest"),
        ];
        let prev = estimate_messages_tokens(&messages);
        let context = CondensationContext::new(messages, "conv")
            .with_prev_context_tokens(prev);

        let config = SmartConfig::default()
            .without_lossless_prelude()
            .with_pass(
                PassConfig::new(
                    "only-when-huge",
                    MessageSelection::PreserveRecentCount(1),
                    PassMode::Individual(LaneOperations {
                        text: LaneRule::suppress(),
                        ..Default::default()
                    }),
                )
                .when_tokens_above(1_000_000),
            );

        let result = SmartStrategy::new(config)
            .apply(&context, &options())
            .await;

        // The skipped pass contributes nothing; only the message list's own
        // pass records would appear.
        assert_eq!(result.messages[0].content.as_flat_text(), "short conversation");
        let metrics = result.metrics.unwrap();
        assert!(metrics.passes.iter().all(|p| p.pass_id != "only-when-huge"));
    }

    #[tokio::test]
    async fn test_early_exit_once_target_met() {
        let messages = tool_heavy_transcript(30);
        let prev = estimate_messages_tokens(&messages);
        let context = CondensationContext::new(messages, "conv")
            .with_prev_context_tokens(prev);

        // First pass suppresses nearly everything, so the second never runs.
        let config = SmartConfig::default()
            .without_lossless_prelude()
            .with_target_tokens(prev / 2)
            .with_pass(PassConfig::new(
                "first",
                MessageSelection::PreserveRecentCount(2),
                PassMode::Individual(LaneOperations {
                    text: LaneRule::suppress(),
                    tool_params: LaneRule::suppress(),
                    tool_results: LaneRule::suppress(),
                    overrides: Default::default(),
                }),
            ))
            .with_pass(PassConfig::new(
                "second",
                MessageSelection::PreserveRecentCount(0),
                PassMode::Individual(LaneOperations {
                    text: LaneRule::suppress(),
                    ..Default::default()
                }),
            ));

        let result = SmartStrategy::new(config)
            .condense(&context, &options())
            .await;

        assert!(result.error.is_none());
        let metrics = result.metrics.unwrap();
        assert_eq!(metrics.passes.len(), 1);
        assert_eq!(metrics.passes[0].pass_id, "first");
    }

    #[tokio::test]
    async fn test_batch_summarize_delegates() {
        let messages = tool_heavy_transcript(40);
        let prev = estimate_messages_tokens(&messages);
        let context = CondensationContext::new(messages.clone(), "conv")
            .with_prev_context_tokens(prev);

        let backend = Arc::new(MockBackend::new().with_response("batch summary"));
        let options = CondensationOptions::new(backend.clone());

        let config = SmartConfig::default()
            .without_lossless_prelude()
            .with_pass(PassConfig::new(
                "summarize-old",
                MessageSelection::PreserveRecentCount(10),
                PassMode::Batch(BatchOperation::Summarize {
                    keep_first: 1,
                    keep_last: 4,
                }),
            ));

        let result = SmartStrategy::new(config).condense(&context, &options).await;

        assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
        assert_eq!(backend.call_count(), 1);
        assert!(result.messages.iter().any(|m| m.is_summary));
        // Batch head, summary, batch tail, then the preserved recent slice.
        assert!(result.messages.len() < messages.len());
        assert_eq!(&result.messages[result.messages.len() - 10..], &messages[30..]);
        assert!(result.cost > 0.0);

        let metrics = result.metrics.unwrap();
        assert_eq!(metrics.passes.len(), 1);
        assert_eq!(metrics.passes[0].cost, result.cost);
    }

    #[tokio::test]
    async fn test_pass_costs_sum_to_total() {
        let messages = tool_heavy_transcript(60);
        let prev = estimate_messages_tokens(&messages);
        let context = CondensationContext::new(messages, "conv")
            .with_prev_context_tokens(prev);

        let config = SmartConfig::default()
            .without_lossless_prelude()
            .with_pass(PassConfig::new(
                "summarize-oldest",
                MessageSelection::PreserveRecentCount(40),
                PassMode::Batch(BatchOperation::Summarize {
                    keep_first: 1,
                    keep_last: 4,
                }),
            ))
            .with_pass(PassConfig::new(
                "suppress-mid-tools",
                MessageSelection::PreserveRecentCount(20),
                PassMode::Individual(LaneOperations {
                    tool_results: LaneRule::suppress(),
                    ..Default::default()
                }),
            ));

        let result = SmartStrategy::new(config)
            .condense(&context, &options())
            .await;

        assert!(result.error.is_none());
        let metrics = result.metrics.unwrap();
        let summed: f64 = metrics.passes.iter().map(|p| p.cost).sum();
        assert!((summed - result.cost).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_per_message_override_beats_pass_default() {
        let messages = vec![
            Message::tool_result("c1", "a".repeat(2000)),
            Message::tool_result("c2", "b".repeat(2000)),
            Message::user("latest"),
        ];
        let prev = estimate_messages_tokens(&messages);
        let context = CondensationContext::new(messages, "conv")
            .with_prev_context_tokens(prev);

        let mut lane_ops = LaneOperations {
            tool_results: LaneRule::suppress(),
            ..Default::default()
        };
        lane_ops.overrides.insert(
            1,
            LaneOverride {
                tool_results: Some(LaneRule::truncate(100)),
                ..Default::default()
            },
        );

        let config = SmartConfig::default()
            .without_lossless_prelude()
            .with_pass(PassConfig::new(
                "mixed",
                MessageSelection::PreserveRecentCount(1),
                PassMode::Individual(lane_ops),
            ));

        let result = SmartStrategy::new(config)
            .condense(&context, &options())
            .await;

        assert!(result.error.is_none());
        // Message 0 follows the pass default; message 1 follows its override.
        assert_eq!(
            result.messages[0].content.as_flat_text(),
            TOOL_RESULT_SUPPRESSED_MARKER
        );
        let overridden = result.messages[1].content.as_flat_text();
        assert!(overridden.starts_with("bbb"));
        assert!(overridden.ends_with('…'));
    }

    #[tokio::test]
    async fn test_lossless_prelude_recorded_as_pass() {
        let body = "duplicated content ".repeat(100);
        let dump = format!("<file_content path=\"big.txt\">\n{}</file_content>", body);
        let messages = vec![
            Message::tool_result("c1", dump.clone()),
            Message::user("again"),
            Message::tool_result("c2", dump),
            Message::user("latest"),
        ];
        let prev = estimate_messages_tokens(&messages);
        let context = CondensationContext::new(messages, "conv")
            .with_prev_context_tokens(prev);

        let config = SmartConfig::default();
        let result = SmartStrategy::new(config)
            .condense(&context, &options())
            .await;

        assert!(result.error.is_none());
        let metrics = result.metrics.unwrap();
        assert_eq!(metrics.passes[0].pass_id, "lossless");
        assert!(metrics.passes[0].tokens_after < metrics.passes[0].tokens_before);
    }
}
