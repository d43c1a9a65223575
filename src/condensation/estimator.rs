use crate::conversations::{ContentBlock, Message, MessageContent};

/// Rough bytes-per-token ratio used for every running estimate. The backend's
/// `count_tokens` is only consulted where an authoritative figure is needed.
pub const CHARS_PER_TOKEN: usize = 4;

/// Fixed overhead per message for role framing and separators.
const MESSAGE_OVERHEAD_TOKENS: usize = 3;

pub fn estimate_text_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

pub fn estimate_block_tokens(block: &ContentBlock) -> usize {
    match block {
        ContentBlock::Text { text } => estimate_text_tokens(text),
        ContentBlock::ToolUse { name, input, .. } => {
            estimate_text_tokens(name) + estimate_text_tokens(&input.to_string())
        }
        ContentBlock::ToolResult { content, .. } => estimate_text_tokens(content),
    }
}

pub fn estimate_message_tokens(message: &Message) -> usize {
    let content_tokens = match &message.content {
        MessageContent::Text(text) => estimate_text_tokens(text),
        MessageContent::Blocks(blocks) => blocks.iter().map(estimate_block_tokens).sum(),
    };
    content_tokens + MESSAGE_OVERHEAD_TOKENS
}

pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_estimate_tracks_length() {
        assert_eq!(estimate_text_tokens(""), 0);
        assert_eq!(estimate_text_tokens("abcd"), 1);
        assert_eq!(estimate_text_tokens(&"x".repeat(100)), 25);
    }

    #[test]
    fn test_message_estimate_includes_all_blocks() {
        let msg = Message::assistant_blocks(vec![
            ContentBlock::text("x".repeat(400)),
            ContentBlock::tool_use("id", "tool", serde_json::json!({"k": "v"})),
        ]);

        let estimate = estimate_message_tokens(&msg);
        assert!(estimate > 100);
    }

    #[test]
    fn test_slice_estimate_is_sum() {
        let messages = vec![Message::user("hello there"), Message::assistant("hi")];
        assert_eq!(
            estimate_messages_tokens(&messages),
            estimate_message_tokens(&messages[0]) + estimate_message_tokens(&messages[1])
        );
    }
}
