pub mod backends;
pub mod condensation;
pub mod conversations;

pub use backends::{
    BackendError, BackendResult, CompletionBackend, CompletionChunk, CompletionStream,
    CompletionUsage, MockBackend, drain_stream,
};
pub use condensation::{
    CondensationContext, CondensationError, CondensationManager, CondensationManagerConfig,
    CondensationOptions, CondensationResult, CondensationStrategy, LOSSLESS_STRATEGY_ID,
    LosslessStrategy, PassMetrics, SMART_STRATEGY_ID, SUMMARIZATION_STRATEGY_ID, SmartConfig,
    SmartStrategy, StrategyInfo, StrategyMetrics, StrategyRegistry, SummarizationConfig,
    SummarizationStrategy, TRUNCATION_STRATEGY_ID, TruncationConfig, TruncationStrategy,
};
pub use conversations::{ContentBlock, Message, MessageContent, Role};
