use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::conversations::Message;

/// Whether a pass runs at all.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PassCondition {
    Always,
    /// Run only while the current estimate exceeds this many tokens.
    TokensAbove(usize),
}

/// Splits the working transcript into a preserved slice (copied through
/// untouched) and the selected candidates for this pass.
#[derive(Clone)]
pub enum MessageSelection {
    /// Preserve the most recent K messages; select everything older.
    PreserveRecentCount(usize),
    /// Preserve the most recent fraction (0.0..=1.0) of messages.
    PreserveRecentPercent(f32),
    /// Select exactly the messages the predicate accepts.
    Custom(Arc<dyn Fn(usize, &Message) -> bool + Send + Sync>),
}

impl fmt::Debug for MessageSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreserveRecentCount(k) => write!(f, "PreserveRecentCount({})", k),
            Self::PreserveRecentPercent(p) => write!(f, "PreserveRecentPercent({})", p),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl MessageSelection {
    /// Indices of the messages selected for transformation.
    pub fn select(&self, messages: &[Message]) -> Vec<usize> {
        match self {
            Self::PreserveRecentCount(keep) => {
                let cutoff = messages.len().saturating_sub(*keep);
                (0..cutoff).collect()
            }
            Self::PreserveRecentPercent(fraction) => {
                let keep =
                    (messages.len() as f32 * fraction.clamp(0.0, 1.0)).ceil() as usize;
                let cutoff = messages.len().saturating_sub(keep);
                (0..cutoff).collect()
            }
            Self::Custom(predicate) => messages
                .iter()
                .enumerate()
                .filter(|(index, message)| predicate(*index, message))
                .map(|(index, _)| index)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TruncateParams {
    pub max_chars: Option<usize>,
    pub max_lines: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SummarizeParams {
    /// Override for the lane-summary instruction.
    pub prompt: Option<String>,
}

/// What to do to one content lane. The four shapes are the whole vocabulary;
/// anything else is unrepresentable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ContentOperation {
    Keep,
    Suppress,
    Truncate(TruncateParams),
    Summarize(SummarizeParams),
}

impl Default for ContentOperation {
    fn default() -> Self {
        Self::Keep
    }
}

/// Operation plus an optional size gate: lanes below `min_tokens` are left
/// alone regardless of the operation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LaneRule {
    pub operation: ContentOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_tokens: Option<usize>,
}

impl LaneRule {
    pub fn keep() -> Self {
        Self::default()
    }

    pub fn suppress() -> Self {
        Self {
            operation: ContentOperation::Suppress,
            min_tokens: None,
        }
    }

    pub fn truncate(max_chars: usize) -> Self {
        Self {
            operation: ContentOperation::Truncate(TruncateParams {
                max_chars: Some(max_chars),
                max_lines: None,
            }),
            min_tokens: None,
        }
    }

    pub fn summarize() -> Self {
        Self {
            operation: ContentOperation::Summarize(SummarizeParams::default()),
            min_tokens: None,
        }
    }

    pub fn with_min_tokens(mut self, min_tokens: usize) -> Self {
        self.min_tokens = Some(min_tokens);
        self
    }
}

/// Per-lane defaults for an individual-mode pass, with per-message overrides
/// keyed by index into the working transcript.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LaneOperations {
    pub text: LaneRule,
    pub tool_params: LaneRule,
    pub tool_results: LaneRule,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub overrides: HashMap<usize, LaneOverride>,
}

/// Override for a single message; unset lanes fall back to the pass default.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LaneOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<LaneRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_params: Option<LaneRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<LaneRule>,
}

impl LaneOperations {
    pub fn rule_for_text(&self, index: usize) -> &LaneRule {
        self.overrides
            .get(&index)
            .and_then(|o| o.text.as_ref())
            .unwrap_or(&self.text)
    }

    pub fn rule_for_params(&self, index: usize) -> &LaneRule {
        self.overrides
            .get(&index)
            .and_then(|o| o.tool_params.as_ref())
            .unwrap_or(&self.tool_params)
    }

    pub fn rule_for_results(&self, index: usize) -> &LaneRule {
        self.overrides
            .get(&index)
            .and_then(|o| o.tool_results.as_ref())
            .unwrap_or(&self.tool_results)
    }
}

/// Whole-batch behavior for a batch-mode pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchOperation {
    Keep,
    /// Delegate the selected slice to the summarization strategy, keeping a
    /// head/tail sub-window of the batch verbatim.
    Summarize { keep_first: usize, keep_last: usize },
}

#[derive(Debug, Clone)]
pub enum PassMode {
    Batch(BatchOperation),
    Individual(LaneOperations),
}

#[derive(Debug, Clone)]
pub struct PassConfig {
    pub id: String,
    pub condition: PassCondition,
    pub selection: MessageSelection,
    pub mode: PassMode,
}

impl PassConfig {
    pub fn new(id: impl Into<String>, selection: MessageSelection, mode: PassMode) -> Self {
        Self {
            id: id.into(),
            condition: PassCondition::Always,
            selection,
            mode,
        }
    }

    pub fn when_tokens_above(mut self, threshold: usize) -> Self {
        self.condition = PassCondition::TokensAbove(threshold);
        self
    }
}

#[derive(Debug, Clone)]
pub struct SmartConfig {
    /// Run the lossless reduction as a free prelude before the first pass.
    pub run_lossless_first: bool,
    /// Stop processing passes once the estimate drops to this level. The
    /// context's own target wins when both are set.
    pub target_tokens: Option<usize>,
    pub passes: Vec<PassConfig>,
}

impl Default for SmartConfig {
    fn default() -> Self {
        Self {
            run_lossless_first: true,
            target_tokens: None,
            passes: Vec::new(),
        }
    }
}

impl SmartConfig {
    pub fn with_pass(mut self, pass: PassConfig) -> Self {
        self.passes.push(pass);
        self
    }

    pub fn with_target_tokens(mut self, target: usize) -> Self {
        self.target_tokens = Some(target);
        self
    }

    pub fn without_lossless_prelude(mut self) -> Self {
        self.run_lossless_first = false;
        self
    }
}
