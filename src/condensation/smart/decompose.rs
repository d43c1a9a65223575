use crate::conversations::{ContentBlock, Message, MessageContent, Role};

#[derive(Debug, Clone, PartialEq)]
pub struct ToolParamEntry {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolResultEntry {
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
}

/// Position of each original block, so recomposition can restore order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LayoutSlot {
    Text(usize),
    ToolUse(usize),
    ToolResult(usize),
}

#[derive(Debug, Clone, PartialEq)]
enum ContentShape {
    PlainText,
    Blocks(Vec<LayoutSlot>),
}

/// A message split into its three content lanes. Absent lanes are `None` /
/// empty; `recompose` is the exact inverse for an unmodified decomposition.
#[derive(Debug, Clone, PartialEq)]
pub struct DecomposedMessage {
    pub role: Role,
    pub is_summary: bool,
    /// At most one text lane; multiple text blocks are joined for lane-level
    /// operations and restored from `original_texts` when untouched.
    pub text: Option<String>,
    pub tool_params: Vec<ToolParamEntry>,
    pub tool_results: Vec<ToolResultEntry>,
    original_texts: Vec<String>,
    shape: ContentShape,
}

const TEXT_JOIN: &str = "\n\n";

pub fn decompose(message: &Message) -> DecomposedMessage {
    match &message.content {
        MessageContent::Text(text) => DecomposedMessage {
            role: message.role,
            is_summary: message.is_summary,
            text: Some(text.clone()),
            tool_params: Vec::new(),
            tool_results: Vec::new(),
            original_texts: vec![text.clone()],
            shape: ContentShape::PlainText,
        },
        MessageContent::Blocks(blocks) => {
            let mut layout = Vec::with_capacity(blocks.len());
            let mut texts = Vec::new();
            let mut tool_params = Vec::new();
            let mut tool_results = Vec::new();

            for block in blocks {
                match block {
                    ContentBlock::Text { text } => {
                        layout.push(LayoutSlot::Text(texts.len()));
                        texts.push(text.clone());
                    }
                    ContentBlock::ToolUse { id, name, input } => {
                        layout.push(LayoutSlot::ToolUse(tool_params.len()));
                        tool_params.push(ToolParamEntry {
                            id: id.clone(),
                            name: name.clone(),
                            input: input.clone(),
                        });
                    }
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => {
                        layout.push(LayoutSlot::ToolResult(tool_results.len()));
                        tool_results.push(ToolResultEntry {
                            tool_use_id: tool_use_id.clone(),
                            content: content.clone(),
                            is_error: *is_error,
                        });
                    }
                }
            }

            let text = if texts.is_empty() {
                None
            } else {
                Some(texts.join(TEXT_JOIN))
            };

            DecomposedMessage {
                role: message.role,
                is_summary: message.is_summary,
                text,
                tool_params,
                tool_results,
                original_texts: texts,
                shape: ContentShape::Blocks(layout),
            }
        }
    }
}

pub fn recompose(decomposed: DecomposedMessage) -> Message {
    let DecomposedMessage {
        role,
        is_summary,
        text,
        tool_params,
        tool_results,
        original_texts,
        shape,
    } = decomposed;

    match shape {
        ContentShape::PlainText => Message {
            role,
            content: MessageContent::Text(text.unwrap_or_default()),
            is_summary,
        },
        ContentShape::Blocks(layout) => {
            // An untouched text lane restores the original per-block split;
            // a modified lane lands whole in the first text slot.
            let text_unchanged = match &text {
                Some(joined) => *joined == original_texts.join(TEXT_JOIN),
                None => original_texts.is_empty(),
            };

            let mut blocks = Vec::with_capacity(layout.len());
            let mut modified_text = text.filter(|_| !text_unchanged);

            for slot in layout {
                match slot {
                    LayoutSlot::Text(index) => {
                        if text_unchanged {
                            if let Some(original) = original_texts.get(index) {
                                blocks.push(ContentBlock::text(original.clone()));
                            }
                        } else if let Some(whole) = modified_text.take() {
                            blocks.push(ContentBlock::text(whole));
                        }
                    }
                    LayoutSlot::ToolUse(index) => {
                        if let Some(entry) = tool_params.get(index) {
                            blocks.push(ContentBlock::ToolUse {
                                id: entry.id.clone(),
                                name: entry.name.clone(),
                                input: entry.input.clone(),
                            });
                        }
                    }
                    LayoutSlot::ToolResult(index) => {
                        if let Some(entry) = tool_results.get(index) {
                            blocks.push(ContentBlock::ToolResult {
                                tool_use_id: entry.tool_use_id.clone(),
                                content: entry.content.clone(),
                                is_error: entry.is_error,
                            });
                        }
                    }
                }
            }

            // A lane collapsed to fewer entries than slots keeps its single
            // placeholder; a lane that gained text with no text slot appends.
            if let Some(leftover) = modified_text {
                blocks.push(ContentBlock::text(leftover));
            }

            Message {
                role,
                content: MessageContent::Blocks(blocks),
                is_summary,
            }
        }
    }
}
