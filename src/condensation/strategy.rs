use async_trait::async_trait;
use std::time::Instant;

use crate::condensation::{
    CondensationContext, CondensationError, CondensationOptions, CondensationResult,
    StrategyMetrics,
};

/// One pluggable condensation algorithm. `apply` is the strategy-specific
/// transform; the provided `condense` wraps it with validation, timing,
/// metrics stamping, and the shrink-invariant check.
#[async_trait]
pub trait CondensationStrategy: Send + Sync {
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    /// Whether this strategy needs a completion backend to run.
    fn requires_backend(&self) -> bool {
        false
    }

    /// The strategy-specific transform. Implementations report errors through
    /// the result's error field, never by panicking.
    async fn apply(
        &self,
        context: &CondensationContext,
        options: &CondensationOptions,
    ) -> CondensationResult;

    /// Expected monetary cost of running this strategy; 0 for anything that
    /// never calls a model.
    fn estimate_cost(&self, _context: &CondensationContext) -> f64 {
        0.0
    }

    fn validate(
        &self,
        context: &CondensationContext,
        options: &CondensationOptions,
    ) -> Result<(), CondensationError> {
        if context.messages.is_empty() {
            return Err(CondensationError::EmptyContext);
        }
        if self.requires_backend() && options.summarization_backend().is_none() {
            return Err(CondensationError::MissingBackend);
        }
        Ok(())
    }

    async fn condense(
        &self,
        context: &CondensationContext,
        options: &CondensationOptions,
    ) -> CondensationResult {
        if let Err(error) = self.validate(context, options) {
            tracing::debug!(strategy = self.id(), %error, "validation rejected context");
            return CondensationResult::failed(context, error);
        }

        let started = Instant::now();
        let mut result = self.apply(context, options).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let metrics = result
            .metrics
            .get_or_insert_with(|| StrategyMetrics::new(self.id()));
        metrics.strategy_id = self.id().to_string();
        metrics.time_elapsed_ms = elapsed_ms;
        if context.prev_context_tokens > 0 {
            metrics.tokens_saved =
                context.prev_context_tokens as i64 - result.new_context_tokens as i64;
        }

        if result.error.is_none()
            && context.prev_context_tokens > 0
            && result.new_context_tokens >= context.prev_context_tokens
        {
            tracing::warn!(
                strategy = self.id(),
                before = context.prev_context_tokens,
                after = result.new_context_tokens,
                "condensation did not shrink the context"
            );
            // Cost and metrics already incurred stay on the result; the
            // transcript reverts to the original messages.
            result.error = Some(CondensationError::NoProgress {
                before: context.prev_context_tokens,
                after: result.new_context_tokens,
            });
            result.messages = context.messages.clone();
        }

        tracing::debug!(
            strategy = self.id(),
            elapsed_ms,
            cost = result.cost,
            new_tokens = result.new_context_tokens,
            error = ?result.error,
            "condensation attempt finished"
        );

        result
    }
}
