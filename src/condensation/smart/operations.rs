use crate::backends::drain_stream;
use crate::condensation::CondensationOptions;
use crate::condensation::smart::config::{ContentOperation, SummarizeParams, TruncateParams};
use crate::condensation::smart::decompose::{
    DecomposedMessage, ToolParamEntry, ToolResultEntry,
};
use crate::conversations::Message;

pub const TEXT_SUPPRESSED_MARKER: &str = "[earlier text omitted]";
pub const TOOL_PARAMS_SUPPRESSED_MARKER: &str = "[tool parameters omitted]";
pub const TOOL_RESULT_SUPPRESSED_MARKER: &str = "[tool result omitted]";

/// Truncation limit used when a lane summarization call fails.
const FALLBACK_TRUNCATE: TruncateParams = TruncateParams {
    max_chars: Some(512),
    max_lines: None,
};

const LANE_SUMMARY_PROMPT: &str = "Condense the following content into a short summary that \
    preserves file paths, identifiers, and outcomes. Provide only the summary.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Text,
    ToolParams,
    ToolResults,
}

impl Lane {
    pub fn label(self) -> &'static str {
        match self {
            Lane::Text => "text",
            Lane::ToolParams => "tool_params",
            Lane::ToolResults => "tool_results",
        }
    }
}

/// What one lane operation did, for pass metrics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationOutcome {
    /// `None` when nothing changed (an applied `keep` is not recorded).
    pub applied: Option<String>,
    pub llm_calls: usize,
    pub cost: f64,
}

impl OperationOutcome {
    fn noop() -> Self {
        Self::default()
    }

    fn applied(lane: Lane, operation: &str) -> Self {
        Self {
            applied: Some(format!("{}:{}", lane.label(), operation)),
            ..Self::default()
        }
    }
}

/// Cut to the configured char/line limits, appending an ellipsis when
/// anything was removed. Char cuts respect UTF-8 boundaries.
pub fn truncate_text(text: &str, params: &TruncateParams) -> String {
    let mut out = text.to_string();
    let mut cut = false;

    if let Some(max_lines) = params.max_lines {
        let lines: Vec<&str> = out.lines().collect();
        if lines.len() > max_lines {
            out = lines[..max_lines].join("\n");
            cut = true;
        }
    }

    if let Some(max_chars) = params.max_chars
        && out.len() > max_chars
    {
        let mut boundary = max_chars;
        while boundary > 0 && !out.is_char_boundary(boundary) {
            boundary -= 1;
        }
        out.truncate(boundary);
        cut = true;
    }

    if cut {
        out.push('…');
    }
    out
}

/// Applies one configured operation to each lane of a decomposed message.
/// A failed `summarize` degrades to `truncate` instead of failing the pass.
pub struct OperationExecutor<'a> {
    options: &'a CondensationOptions,
}

impl<'a> OperationExecutor<'a> {
    pub fn new(options: &'a CondensationOptions) -> Self {
        Self { options }
    }

    pub async fn apply(
        &self,
        decomposed: &mut DecomposedMessage,
        lane: Lane,
        operation: &ContentOperation,
    ) -> OperationOutcome {
        match lane {
            Lane::Text => self.apply_text(decomposed, operation).await,
            Lane::ToolParams => self.apply_params(decomposed, operation).await,
            Lane::ToolResults => self.apply_results(decomposed, operation).await,
        }
    }

    async fn apply_text(
        &self,
        decomposed: &mut DecomposedMessage,
        operation: &ContentOperation,
    ) -> OperationOutcome {
        let Some(text) = decomposed.text.clone() else {
            return OperationOutcome::noop();
        };

        match operation {
            ContentOperation::Keep => OperationOutcome::noop(),
            ContentOperation::Suppress => {
                decomposed.text = Some(TEXT_SUPPRESSED_MARKER.to_string());
                OperationOutcome::applied(Lane::Text, "suppress")
            }
            ContentOperation::Truncate(params) => {
                let truncated = truncate_text(&text, params);
                if truncated == text {
                    return OperationOutcome::noop();
                }
                decomposed.text = Some(truncated);
                OperationOutcome::applied(Lane::Text, "truncate")
            }
            ContentOperation::Summarize(params) => {
                let (summary, outcome) = self.summarize_lane(Lane::Text, &text, params).await;
                decomposed.text = Some(summary);
                outcome
            }
        }
    }

    async fn apply_params(
        &self,
        decomposed: &mut DecomposedMessage,
        operation: &ContentOperation,
    ) -> OperationOutcome {
        if decomposed.tool_params.is_empty() {
            return OperationOutcome::noop();
        }

        match operation {
            ContentOperation::Keep => OperationOutcome::noop(),
            ContentOperation::Suppress => {
                let placeholder = placeholder_param(
                    &decomposed.tool_params[0],
                    TOOL_PARAMS_SUPPRESSED_MARKER,
                );
                decomposed.tool_params = vec![placeholder];
                OperationOutcome::applied(Lane::ToolParams, "suppress")
            }
            ContentOperation::Truncate(params) => {
                let mut changed = false;
                for entry in &mut decomposed.tool_params {
                    let serialized = entry.input.to_string();
                    let truncated = truncate_text(&serialized, params);
                    if truncated != serialized {
                        entry.input = serde_json::Value::String(truncated);
                        changed = true;
                    }
                }
                if changed {
                    OperationOutcome::applied(Lane::ToolParams, "truncate")
                } else {
                    OperationOutcome::noop()
                }
            }
            ContentOperation::Summarize(params) => {
                let serialized = decomposed
                    .tool_params
                    .iter()
                    .map(|entry| format!("{}: {}", entry.name, entry.input))
                    .collect::<Vec<_>>()
                    .join("\n");
                let (summary, outcome) = self
                    .summarize_lane(Lane::ToolParams, &serialized, params)
                    .await;
                let placeholder = placeholder_param(&decomposed.tool_params[0], &summary);
                decomposed.tool_params = vec![placeholder];
                outcome
            }
        }
    }

    async fn apply_results(
        &self,
        decomposed: &mut DecomposedMessage,
        operation: &ContentOperation,
    ) -> OperationOutcome {
        if decomposed.tool_results.is_empty() {
            return OperationOutcome::noop();
        }

        match operation {
            ContentOperation::Keep => OperationOutcome::noop(),
            ContentOperation::Suppress => {
                let placeholder = placeholder_result(
                    &decomposed.tool_results[0],
                    TOOL_RESULT_SUPPRESSED_MARKER,
                );
                decomposed.tool_results = vec![placeholder];
                OperationOutcome::applied(Lane::ToolResults, "suppress")
            }
            ContentOperation::Truncate(params) => {
                let mut changed = false;
                for entry in &mut decomposed.tool_results {
                    let truncated = truncate_text(&entry.content, params);
                    if truncated != entry.content {
                        entry.content = truncated;
                        changed = true;
                    }
                }
                if changed {
                    OperationOutcome::applied(Lane::ToolResults, "truncate")
                } else {
                    OperationOutcome::noop()
                }
            }
            ContentOperation::Summarize(params) => {
                let joined = decomposed
                    .tool_results
                    .iter()
                    .map(|entry| entry.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                let (summary, outcome) = self
                    .summarize_lane(Lane::ToolResults, &joined, params)
                    .await;
                let placeholder = placeholder_result(&decomposed.tool_results[0], &summary);
                decomposed.tool_results = vec![placeholder];
                outcome
            }
        }
    }

    /// One single-turn model call over the lane content. Never fails: any
    /// backend problem falls back to a short truncation of the original.
    async fn summarize_lane(
        &self,
        lane: Lane,
        content: &str,
        params: &SummarizeParams,
    ) -> (String, OperationOutcome) {
        let Some(backend) = self.options.summarization_backend() else {
            tracing::warn!(lane = lane.label(), "no backend for lane summary; truncating");
            return (
                truncate_text(content, &FALLBACK_TRUNCATE),
                OperationOutcome::applied(lane, "summarize_fallback"),
            );
        };

        let prompt = params.prompt.as_deref().unwrap_or(LANE_SUMMARY_PROMPT);
        let request = [Message::user(content.to_string())];

        let drained = match backend.create_message(prompt, &request).await {
            Ok(stream) => drain_stream(stream).await,
            Err(error) => Err(error.into()),
        };

        match drained {
            Ok((text, usage)) if !text.trim().is_empty() => {
                let mut outcome = OperationOutcome::applied(lane, "summarize");
                outcome.llm_calls = 1;
                outcome.cost = usage.map(|u| u.total_cost).unwrap_or(0.0);
                (text, outcome)
            }
            Ok(_) => {
                tracing::warn!(lane = lane.label(), "empty lane summary; truncating");
                let mut outcome = OperationOutcome::applied(lane, "summarize_fallback");
                outcome.llm_calls = 1;
                (truncate_text(content, &FALLBACK_TRUNCATE), outcome)
            }
            Err(error) => {
                tracing::warn!(
                    lane = lane.label(),
                    %error,
                    "lane summary failed; truncating"
                );
                let mut outcome = OperationOutcome::applied(lane, "summarize_fallback");
                outcome.llm_calls = 1;
                (truncate_text(content, &FALLBACK_TRUNCATE), outcome)
            }
        }
    }
}

fn placeholder_param(first: &ToolParamEntry, note: &str) -> ToolParamEntry {
    ToolParamEntry {
        id: first.id.clone(),
        name: first.name.clone(),
        input: serde_json::Value::String(note.to_string()),
    }
}

fn placeholder_result(first: &ToolResultEntry, content: &str) -> ToolResultEntry {
    ToolResultEntry {
        tool_use_id: first.tool_use_id.clone(),
        content: content.to_string(),
        is_error: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockBackend;
    use crate::condensation::smart::decompose::decompose;
    use crate::conversations::ContentBlock;
    use std::sync::Arc;

    fn options() -> CondensationOptions {
        CondensationOptions::new(Arc::new(MockBackend::new().with_response("lane summary")))
    }

    #[test]
    fn test_truncate_text_by_chars_is_utf8_safe() {
        let params = TruncateParams {
            max_chars: Some(7),
            max_lines: None,
        };
        let out = truncate_text("Hello 世界!", &params);
        assert!(out.starts_with("Hello "));
        assert!(out.ends_with('…'));
    }

    #[test]
    fn test_truncate_text_by_lines() {
        let params = TruncateParams {
            max_chars: None,
            max_lines: Some(2),
        };
        let out = truncate_text("one\ntwo\nthree\nfour", &params);
        assert_eq!(out, "one\ntwo…");
    }

    #[test]
    fn test_truncate_no_cut_no_ellipsis() {
        let params = TruncateParams {
            max_chars: Some(100),
            max_lines: Some(10),
        };
        assert_eq!(truncate_text("short", &params), "short");
    }

    #[tokio::test]
    async fn test_suppress_text_lane() {
        let options = options();
        let executor = OperationExecutor::new(&options);
        let mut decomposed = decompose(&Message::assistant("long analysis here"));

        let outcome = executor
            .apply(&mut decomposed, Lane::Text, &ContentOperation::Suppress)
            .await;

        assert_eq!(decomposed.text.as_deref(), Some(TEXT_SUPPRESSED_MARKER));
        assert_eq!(outcome.applied.as_deref(), Some("text:suppress"));
        assert_eq!(outcome.llm_calls, 0);
    }

    #[tokio::test]
    async fn test_suppress_collapses_result_lane_to_placeholder() {
        let options = options();
        let executor = OperationExecutor::new(&options);
        let mut decomposed = decompose(&Message::tool_results(vec![
            ContentBlock::tool_result("c1", "x".repeat(500)),
            ContentBlock::tool_result("c2", "y".repeat(500)),
        ]));

        executor
            .apply(&mut decomposed, Lane::ToolResults, &ContentOperation::Suppress)
            .await;

        assert_eq!(decomposed.tool_results.len(), 1);
        assert_eq!(
            decomposed.tool_results[0].content,
            TOOL_RESULT_SUPPRESSED_MARKER
        );
        assert_eq!(decomposed.tool_results[0].tool_use_id, "c1");
    }

    #[tokio::test]
    async fn test_keep_is_not_recorded() {
        let options = options();
        let executor = OperationExecutor::new(&options);
        let mut decomposed = decompose(&Message::assistant("text"));

        let outcome = executor
            .apply(&mut decomposed, Lane::Text, &ContentOperation::Keep)
            .await;
        assert!(outcome.applied.is_none());
    }

    #[tokio::test]
    async fn test_summarize_lane_uses_backend() {
        let options = options();
        let executor = OperationExecutor::new(&options);
        let mut decomposed = decompose(&Message::assistant("a very long analysis ".repeat(50)));

        let outcome = executor
            .apply(
                &mut decomposed,
                Lane::Text,
                &ContentOperation::Summarize(SummarizeParams::default()),
            )
            .await;

        assert_eq!(decomposed.text.as_deref(), Some("lane summary"));
        assert_eq!(outcome.llm_calls, 1);
        assert!(outcome.cost > 0.0);
    }

    #[tokio::test]
    async fn test_summarize_failure_falls_back_to_truncate() {
        let options = CondensationOptions::new(Arc::new(
            MockBackend::new().failing_with("unavailable"),
        ));
        let executor = OperationExecutor::new(&options);

        let long = "z".repeat(2000);
        let mut decomposed = decompose(&Message::tool_result("c1", long.clone()));

        let outcome = executor
            .apply(
                &mut decomposed,
                Lane::ToolResults,
                &ContentOperation::Summarize(SummarizeParams::default()),
            )
            .await;

        let content = &decomposed.tool_results[0].content;
        assert!(content.len() < long.len());
        assert!(content.ends_with('…'));
        assert_eq!(outcome.applied.as_deref(), Some("tool_results:summarize_fallback"));
    }

    #[tokio::test]
    async fn test_dedicated_condensing_backend_preferred() {
        let main = Arc::new(MockBackend::new().with_response("main"));
        let dedicated = Arc::new(MockBackend::new().with_response("dedicated"));
        let options = CondensationOptions::new(main.clone())
            .with_condensing_backend(dedicated.clone());
        let executor = OperationExecutor::new(&options);

        let mut decomposed = decompose(&Message::assistant("content"));
        executor
            .apply(
                &mut decomposed,
                Lane::Text,
                &ContentOperation::Summarize(SummarizeParams::default()),
            )
            .await;

        assert_eq!(decomposed.text.as_deref(), Some("dedicated"));
        assert_eq!(dedicated.call_count(), 1);
        assert_eq!(main.call_count(), 0);
    }
}
