use thiserror::Error;

/// Engine errors travel inside `CondensationResult.error` so the orchestrator
/// can always hand back a well-formed result; nothing here crosses a strategy
/// boundary as a panic or a bare `Err`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CondensationError {
    #[error("no messages to condense")]
    EmptyContext,

    #[error("no completion backend available")]
    MissingBackend,

    #[error("strategy '{0}' is not registered")]
    UnknownStrategy(String),

    #[error("strategy '{0}' is disabled")]
    StrategyDisabled(String),

    #[error("cannot set default strategy to unknown id '{0}'")]
    InvalidDefaultStrategy(String),

    #[error("condensation did not reduce context ({before} -> {after} tokens)")]
    NoProgress { before: usize, after: usize },

    #[error("condensation loop guard triggered for conversation '{0}'")]
    LoopGuard(String),

    #[error("not enough messages to summarize")]
    NotEnoughMessages,

    #[error("context was condensed recently; the kept tail already contains a summary")]
    CondensedRecently,

    #[error("summarization failed: {0}")]
    SummarizationFailed(String),
}
