pub mod estimator;
mod error;
mod orchestrator;
mod registry;
mod strategy;
mod types;

pub mod lossless;
pub mod smart;
mod summarization;
mod truncation;

pub use error::CondensationError;
pub use lossless::{LOSSLESS_STRATEGY_ID, LosslessStrategy};
pub use orchestrator::{CondensationManager, CondensationManagerConfig};
pub use registry::{RegisteredStrategy, StrategyInfo, StrategyRegistry};
pub use smart::{SMART_STRATEGY_ID, SmartConfig, SmartStrategy};
pub use strategy::CondensationStrategy;
pub use summarization::{
    SUMMARIZATION_STRATEGY_ID, SummarizationConfig, SummarizationStrategy,
};
pub use truncation::{TRUNCATION_STRATEGY_ID, TruncationConfig, TruncationStrategy};
pub use types::{
    CondensationContext, CondensationOptions, CondensationResult, PassMetrics, StrategyMetrics,
};
