mod consolidator;
mod file_dedup;

pub use consolidator::{ConsolidationStats, ToolResultConsolidator};
pub use file_dedup::{DedupStats, FileContentDeduplicator};

use async_trait::async_trait;

use crate::condensation::estimator::estimate_messages_tokens;
use crate::condensation::{
    CondensationContext, CondensationOptions, CondensationResult, CondensationStrategy,
    PassMetrics, StrategyMetrics,
};
use crate::conversations::Message;

pub const LOSSLESS_STRATEGY_ID: &str = "lossless";

/// Composes content deduplication and tool-result consolidation. Always safe,
/// zero cost, no model calls; intended to run before anything lossy.
pub struct LosslessStrategy {
    dedup: FileContentDeduplicator,
    consolidator: ToolResultConsolidator,
}

impl LosslessStrategy {
    pub fn new() -> Self {
        Self {
            dedup: FileContentDeduplicator::new(),
            consolidator: ToolResultConsolidator::new(),
        }
    }

    /// Run both transforms over a message list in place, outside the
    /// strategy wrapper. The smart strategy uses this as its prelude.
    pub fn reduce(&self, messages: &mut [Message]) -> (DedupStats, ConsolidationStats) {
        let dedup_stats = self.dedup.dedupe(messages);
        let consolidation_stats = self.consolidator.consolidate(messages);
        (dedup_stats, consolidation_stats)
    }
}

impl Default for LosslessStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CondensationStrategy for LosslessStrategy {
    fn id(&self) -> &'static str {
        LOSSLESS_STRATEGY_ID
    }

    fn name(&self) -> &'static str {
        "Lossless consolidation"
    }

    async fn apply(
        &self,
        context: &CondensationContext,
        _options: &CondensationOptions,
    ) -> CondensationResult {
        let tokens_before = estimate_messages_tokens(&context.messages);
        let mut messages = context.messages.clone();

        let (dedup_stats, consolidation_stats) = self.reduce(&mut messages);
        let tokens_after = estimate_messages_tokens(&messages);

        tracing::debug!(
            duplicates = dedup_stats.duplicates_replaced,
            merged = consolidation_stats.results_merged,
            tokens_before,
            tokens_after,
            "lossless reduction finished"
        );

        let mut operations_applied: Vec<String> = Vec::new();
        if dedup_stats.duplicates_replaced > 0 {
            operations_applied.push("file_dedup".to_string());
        }
        operations_applied.extend(
            consolidation_stats
                .strategies_applied
                .iter()
                .map(|s| s.to_string()),
        );

        let saved = tokens_before.saturating_sub(tokens_after);
        let new_context_tokens = context.prev_context_tokens.saturating_sub(saved);

        let mut metrics = StrategyMetrics::new(LOSSLESS_STRATEGY_ID);
        metrics.passes.push(PassMetrics {
            pass_id: "lossless".to_string(),
            tokens_before,
            tokens_after,
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
