use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::condensation::{
    CondensationContext, CondensationError, CondensationOptions, CondensationResult,
    CondensationStrategy, StrategyInfo, StrategyMetrics, StrategyRegistry,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CondensationManagerConfig {
    /// Failed attempts tolerated per conversation before the guard engages.
    pub max_attempts_before_guard: u32,
    /// Guard window: a blocked conversation is released once this much time
    /// has passed since its last attempt.
    pub cooldown_secs: u64,
}

impl Default for CondensationManagerConfig {
    fn default() -> Self {
        Self {
            max_attempts_before_guard: 3,
            cooldown_secs: 60,
        }
    }
}

impl CondensationManagerConfig {
    pub fn with_cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts_before_guard = attempts;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct AttemptRecord {
    attempts: u32,
    last_attempt: Instant,
}

/// Owns the strategy registry, the default-strategy id, and the
/// per-conversation attempt state. One instance per host; callers pass it by
/// reference instead of reaching for a global.
pub struct CondensationManager {
    config: CondensationManagerConfig,
    registry: StrategyRegistry,
    default_strategy: Option<String>,
    attempts: Mutex<HashMap<String, AttemptRecord>>,
}

impl CondensationManager {
    pub fn new(config: CondensationManagerConfig) -> Self {
        Self {
            config,
            registry: StrategyRegistry::new(),
            default_strategy: None,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Manager with the four built-in strategies registered, lossless first,
    /// and sliding-window summarization as the default.
    pub fn with_builtin_strategies(config: CondensationManagerConfig) -> Self {
        use crate::condensation::{
            LosslessStrategy, SUMMARIZATION_STRATEGY_ID, SmartConfig, SmartStrategy,
            SummarizationConfig, SummarizationStrategy, TruncationConfig, TruncationStrategy,
        };

        let mut manager = Self::new(config);
        manager.register_strategy(Arc::new(LosslessStrategy::new()), true, 0);
        manager.register_strategy(
            Arc::new(TruncationStrategy::new(TruncationConfig::default())),
            true,
            10,
        );
        manager.register_strategy(
            Arc::new(SummarizationStrategy::new(SummarizationConfig::default())),
            true,
            20,
        );
        manager.register_strategy(
            Arc::new(SmartStrategy::new(SmartConfig::default())),
            true,
            30,
        );
        manager
            .set_default_strategy(SUMMARIZATION_STRATEGY_ID)
            .expect("builtin default strategy is registered");
        manager
    }

    pub fn register_strategy(
        &mut self,
        strategy: Arc<dyn CondensationStrategy>,
        enabled: bool,
        priority: i32,
    ) {
        self.registry.register(strategy, enabled, priority);
    }

    pub fn unregister_strategy(&mut self, id: &str) -> bool {
        let removed = self.registry.unregister(id);
        if removed && self.default_strategy.as_deref() == Some(id) {
            self.default_strategy = None;
        }
        removed
    }

    /// Fails when `id` is not registered; the default is validated against
    /// the registry on every change.
    pub fn set_default_strategy(&mut self, id: &str) -> Result<(), CondensationError> {
        if !self.registry.contains(id) {
            return Err(CondensationError::InvalidDefaultStrategy(id.to_string()));
        }
        self.default_strategy = Some(id.to_string());
        Ok(())
    }

    pub fn default_strategy(&self) -> Option<&str> {
        self.default_strategy.as_deref()
    }

    pub fn list_strategies(&self) -> Vec<StrategyInfo> {
        self.registry.list()
    }

    fn resolve(
        &self,
        strategy_id: Option<&str>,
    ) -> Result<Arc<dyn CondensationStrategy>, CondensationError> {
        let id = strategy_id
            .map(str::to_string)
            .or_else(|| self.default_strategy.clone())
            .ok_or_else(|| CondensationError::UnknownStrategy("<default unset>".to_string()))?;

        let entry = self
            .registry
            .get(&id)
            .ok_or_else(|| CondensationError::UnknownStrategy(id.clone()))?;

        if !entry.enabled {
            return Err(CondensationError::StrategyDisabled(id));
        }

        Ok(entry.strategy.clone())
    }

    /// Returns true when the conversation must be refused, false when the
    /// attempt was admitted and counted.
    fn check_and_count_attempt(&self, conversation_id: &str) -> bool {
        let mut attempts = self.attempts.lock().unwrap();
        let now = Instant::now();
        let cooldown = Duration::from_secs(self.config.cooldown_secs);

        let record = attempts
            .entry(conversation_id.to_string())
            .or_insert(AttemptRecord {
                attempts: 0,
                last_attempt: now,
            });

        if record.attempts >= self.config.max_attempts_before_guard
            && now.duration_since(record.last_attempt) < cooldown
        {
            return true;
        }

        record.attempts += 1;
        record.last_attempt = now;
        false
    }

    fn reset_attempts(&self, conversation_id: &str) {
        self.attempts.lock().unwrap().remove(conversation_id);
    }

    /// Run one condensation attempt end to end: validate, resolve the
    /// strategy, consult the loop guard, dispatch, and enforce the shrink
    /// invariant.
    pub async fn condense(
        &self,
        context: &CondensationContext,
        options: &CondensationOptions,
        strategy_id: Option<&str>,
    ) -> CondensationResult {
        if context.messages.is_empty() {
            return CondensationResult::failed(context, CondensationError::EmptyContext);
        }

        let strategy = match self.resolve(strategy_id) {
            Ok(strategy) => strategy,
            Err(error) => return CondensationResult::failed(context, error),
        };

        if self.check_and_count_attempt(&context.conversation_id) {
            tracing::warn!(
                conversation = %context.conversation_id,
                "loop guard refused condensation attempt"
            );
            let mut result = CondensationResult::failed(
                context,
                CondensationError::LoopGuard(context.conversation_id.clone()),
            );
            let mut metrics = StrategyMetrics::new(strategy.id());
            metrics.loop_guard_triggered = true;
            result.metrics = Some(metrics);
            return result;
        }

        let mut result = strategy.condense(context, options).await;

        // The base strategy wrapper already enforces this; re-checking here
        // keeps the invariant even for strategies overriding `condense`.
        if result.error.is_none()
            && context.prev_context_tokens > 0
            && result.new_context_tokens >= context.prev_context_tokens
        {
            result.error = Some(CondensationError::NoProgress {
                before: context.prev_context_tokens,
                after: result.new_context_tokens,
            });
            result.messages = context.messages.clone();
        }

        if result.error.is_none() {
            self.reset_attempts(&context.conversation_id);
            tracing::info!(
                conversation = %context.conversation_id,
                strategy = strategy.id(),
                automatic = options.is_automatic,
                before = context.prev_context_tokens,
                after = result.new_context_tokens,
                cost = result.cost,
                "condensation succeeded"
            );
        }

        result
    }

    pub fn estimate_cost(
        &self,
        context: &CondensationContext,
        strategy_id: Option<&str>,
    ) -> Result<f64, CondensationError> {
        let strategy = self.resolve(strategy_id)?;
        Ok(strategy.estimate_cost(context))
    }

    #[cfg(test)]
    pub(crate) fn attempt_count(&self, conversation_id: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(conversation_id)
            .map(|record| record.attempts)
            .unwrap_or(0)
    }
}

impl Default for CondensationManager {
    fn default() -> Self {
        Self::new(CondensationManagerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::Message;
    use async_trait::async_trait;

    struct StuckStrategy;

    #[async_trait]
    impl CondensationStrategy for StuckStrategy {
        fn id(&self) -> &'static str {
            "stuck"
        }

        fn name(&self) -> &'static str {
            "Stuck"
        }

        async fn apply(
            &self,
            context: &CondensationContext,
            _options: &CondensationOptions,
        ) -> CondensationResult {
            // Never reduces tokens.
            CondensationResult {
                new_context_tokens: context.prev_context_tokens,
                ..CondensationResult::unchanged(context)
            }
        }
    }

    struct HalvingStrategy;

    #[async_trait]
    impl CondensationStrategy for HalvingStrategy {
        fn id(&self) -> &'static str {
            "halving"
        }

        fn name(&self) -> &'static str {
            "Halving"
        }

        async fn apply(
            &self,
            context: &CondensationContext,
            _options: &CondensationOptions,
        ) -> CondensationResult {
            CondensationResult {
                new_context_tokens: context.prev_context_tokens / 2,
                ..CondensationResult::unchanged(context)
            }
        }
    }

    fn manager_with(strategy: Arc<dyn CondensationStrategy>) -> CondensationManager {
        let id = strategy.id();
        let mut manager = CondensationManager::default();
        manager.register_strategy(strategy, true, 10);
        manager.set_default_strategy(id).unwrap();
        manager
    }

    fn context(conversation: &str) -> CondensationContext {
        CondensationContext::new(vec![Message::user("hello"), Message::assistant("hi")], conversation)
            .with_prev_context_tokens(1000)
    }

    #[tokio::test]
    async fn test_empty_messages_short_circuit() {
        let manager = manager_with(Arc::new(HalvingStrategy));
        let ctx = CondensationContext::new(Vec::new(), "conv");
        let result = manager
            .condense(&ctx, &CondensationOptions::without_backend(), None)
            .await;
        assert_eq!(result.error, Some(CondensationError::EmptyContext));
        assert_eq!(manager.attempt_count("conv"), 0);
    }

    #[tokio::test]
    async fn test_unknown_and_disabled_strategies_fail() {
        let mut manager = manager_with(Arc::new(HalvingStrategy));
        let ctx = context("conv");

        let result = manager
            .condense(&ctx, &CondensationOptions::without_backend(), Some("nope"))
            .await;
        assert_eq!(
            result.error,
            Some(CondensationError::UnknownStrategy("nope".to_string()))
        );

        manager.register_strategy(Arc::new(HalvingStrategy), false, 10);
        let result = manager
            .condense(&ctx, &CondensationOptions::without_backend(), Some("halving"))
            .await;
        assert_eq!(
            result.error,
            Some(CondensationError::StrategyDisabled("halving".to_string()))
        );
    }

    #[tokio::test]
    async fn test_loop_guard_engages_on_fourth_attempt() {
        let manager = manager_with(Arc::new(StuckStrategy));
        let ctx = context("conv-loop");
        let options = CondensationOptions::without_backend();

        for _ in 0..3 {
            let result = manager.condense(&ctx, &options, None).await;
            assert!(matches!(
                result.error,
                Some(CondensationError::NoProgress { .. })
            ));
        }

        let result = manager.condense(&ctx, &options, None).await;
        assert_eq!(
            result.error,
            Some(CondensationError::LoopGuard("conv-loop".to_string()))
        );
        assert_eq!(result.cost, 0.0);
        assert_eq!(result.messages, ctx.messages);
        assert!(result.metrics.unwrap().loop_guard_triggered);
    }

    #[tokio::test]
    async fn test_loop_guard_releases_after_cooldown() {
        let mut manager = CondensationManager::new(
            CondensationManagerConfig::default().with_cooldown_secs(0),
        );
        manager.register_strategy(Arc::new(StuckStrategy), true, 10);
        manager.set_default_strategy("stuck").unwrap();

        let ctx = context("conv");
        let options = CondensationOptions::without_backend();

        for _ in 0..5 {
            let result = manager.condense(&ctx, &options, None).await;
            // Zero cooldown means the guard never holds the refusal window.
            assert!(matches!(
                result.error,
                Some(CondensationError::NoProgress { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_attempt_counters_are_per_conversation() {
        let manager = manager_with(Arc::new(StuckStrategy));
        let options = CondensationOptions::without_backend();

        for _ in 0..3 {
            manager.condense(&context("conv-a"), &options, None).await;
        }
        manager.condense(&context("conv-b"), &options, None).await;

        assert_eq!(manager.attempt_count("conv-a"), 3);
        assert_eq!(manager.attempt_count("conv-b"), 1);

        let guarded = manager.condense(&context("conv-a"), &options, None).await;
        assert!(matches!(
            guarded.error,
            Some(CondensationError::LoopGuard(_))
        ));

        let allowed = manager.condense(&context("conv-b"), &options, None).await;
        assert!(matches!(
            allowed.error,
            Some(CondensationError::NoProgress { .. })
        ));
    }

    #[tokio::test]
    async fn test_success_resets_attempt_state() {
        let mut manager = manager_with(Arc::new(StuckStrategy));
        manager.register_strategy(Arc::new(HalvingStrategy), true, 20);

        let ctx = context("conv");
        let options = CondensationOptions::without_backend();

        manager.condense(&ctx, &options, Some("stuck")).await;
        manager.condense(&ctx, &options, Some("stuck")).await;
        assert_eq!(manager.attempt_count("conv"), 2);

        let result = manager.condense(&ctx, &options, Some("halving")).await;
        assert!(result.error.is_none());
        assert_eq!(manager.attempt_count("conv"), 0);
    }

    #[tokio::test]
    async fn test_set_default_strategy_validates() {
        let mut manager = CondensationManager::default();
        assert_eq!(
            manager.set_default_strategy("ghost"),
            Err(CondensationError::InvalidDefaultStrategy("ghost".to_string()))
        );

        manager.register_strategy(Arc::new(HalvingStrategy), true, 10);
        manager.set_default_strategy("halving").unwrap();
        assert_eq!(manager.default_strategy(), Some("halving"));

        manager.unregister_strategy("halving");
        assert_eq!(manager.default_strategy(), None);
    }
}
