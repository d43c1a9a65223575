use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::backends::CompletionBackend;
use crate::condensation::CondensationError;
use crate::conversations::Message;

/// Immutable input to one condensation attempt. `prev_context_tokens` must
/// reflect the same message set passed in; the engine trusts it for the
/// growth check instead of recomputing.
#[derive(Clone)]
pub struct CondensationContext {
    pub messages: Vec<Message>,
    pub system_prompt: Option<String>,
    pub conversation_id: String,
    pub prev_context_tokens: usize,
    pub target_tokens: Option<usize>,
}

impl CondensationContext {
    pub fn new(messages: Vec<Message>, conversation_id: impl Into<String>) -> Self {
        Self {
            messages,
            system_prompt: None,
            conversation_id: conversation_id.into(),
            prev_context_tokens: 0,
            target_tokens: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_prev_context_tokens(mut self, tokens: usize) -> Self {
        self.prev_context_tokens = tokens;
        self
    }

    pub fn with_target_tokens(mut self, tokens: usize) -> Self {
        self.target_tokens = Some(tokens);
        self
    }
}

/// Capability handles a strategy is given for one attempt.
#[derive(Clone)]
pub struct CondensationOptions {
    pub backend: Option<Arc<dyn CompletionBackend>>,
    /// Dedicated collaborator for summarization-only calls, preferred over
    /// `backend` when present.
    pub condensing_backend: Option<Arc<dyn CompletionBackend>>,
    pub custom_prompt: Option<String>,
    /// Distinguishes automatic condensation from a user-triggered one.
    pub is_automatic: bool,
}

impl CondensationOptions {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            backend: Some(backend),
            condensing_backend: None,
            custom_prompt: None,
            is_automatic: true,
        }
    }

    /// For strategies that never call a model.
    pub fn without_backend() -> Self {
        Self {
            backend: None,
            condensing_backend: None,
            custom_prompt: None,
            is_automatic: true,
        }
    }

    pub fn with_condensing_backend(mut self, backend: Arc<dyn CompletionBackend>) -> Self {
        self.condensing_backend = Some(backend);
        self
    }

    pub fn with_custom_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.custom_prompt = Some(prompt.into());
        self
    }

    pub fn manual(mut self) -> Self {
        self.is_automatic = false;
        self
    }

    /// The backend summarization calls should go through.
    pub fn summarization_backend(&self) -> Option<Arc<dyn CompletionBackend>> {
        self.condensing_backend
            .clone()
            .or_else(|| self.backend.clone())
    }
}

/// Per-pass accounting for the smart strategy; single-shot strategies report
/// one pass. The sum of pass costs must equal the result's top-level cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassMetrics {
    pub pass_id: String,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub time_elapsed_ms: u64,
    pub llm_calls: usize,
    pub cost: f64,
    /// Lane operations actually applied; `keep` is never recorded.
    pub operations_applied: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyMetrics {
    pub strategy_id: String,
    pub time_elapsed_ms: u64,
    pub tokens_saved: i64,
    pub llm_calls: usize,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub loop_guard_triggered: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub passes: Vec<PassMetrics>,
}

impl StrategyMetrics {
    pub fn new(strategy_id: impl Into<String>) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            time_elapsed_ms: 0,
            tokens_saved: 0,
            llm_calls: 0,
            loop_guard_triggered: false,
            passes: Vec::new(),
        }
    }
}

/// Output of one condensation attempt, success or failure.
#[derive(Clone)]
pub struct CondensationResult {
    pub messages: Vec<Message>,
    pub cost: f64,
    pub new_context_tokens: usize,
    pub summary: Option<String>,
    pub error: Option<CondensationError>,
    pub metrics: Option<StrategyMetrics>,
}

impl CondensationResult {
    pub fn unchanged(context: &CondensationContext) -> Self {
        Self {
            messages: context.messages.clone(),
            cost: 0.0,
            new_context_tokens: context.prev_context_tokens,
            summary: None,
            error: None,
            metrics: None,
        }
    }

    pub fn failed(context: &CondensationContext, error: CondensationError) -> Self {
        Self {
            error: Some(error),
            ..Self::unchanged(context)
        }
    }

    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockBackend;

    #[test]
    fn test_context_builder() {
        let ctx = CondensationContext::new(vec![Message::user("hi")], "conv-1")
            .with_prev_context_tokens(5000)
            .with_target_tokens(1000)
            .with_system_prompt("You are helpful");

        assert_eq!(ctx.conversation_id, "conv-1");
        assert_eq!(ctx.prev_context_tokens, 5000);
        assert_eq!(ctx.target_tokens, Some(1000));
        assert!(ctx.system_prompt.is_some());
    }

    #[test]
    fn test_summarization_backend_prefers_dedicated() {
        let main = Arc::new(MockBackend::new());
        let dedicated: Arc<dyn CompletionBackend> = Arc::new(MockBackend::new());

        let options =
            CondensationOptions::new(main).with_condensing_backend(dedicated.clone());

        let chosen = options.summarization_backend().unwrap();
        assert!(Arc::ptr_eq(&chosen, &dedicated));
    }

    #[test]
    fn test_failed_result_keeps_original_messages() {
        let ctx = CondensationContext::new(vec![Message::user("hi")], "conv-1")
            .with_prev_context_tokens(100);
        let result = CondensationResult::failed(&ctx, CondensationError::EmptyContext);

        assert!(result.is_err());
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.cost, 0.0);
        assert_eq!(result.new_context_tokens, 100);
    }
}
