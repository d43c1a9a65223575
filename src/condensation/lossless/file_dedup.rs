use regex::Regex;
use sha2::{Digest, Sha256};

use crate::conversations::{ContentBlock, Message, MessageContent};

/// Where a file dump was found inside a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Slot {
    PlainText,
    Block(usize),
}

#[derive(Debug, Clone)]
struct FileDump {
    message_index: usize,
    slot: Slot,
    start: usize,
    end: usize,
    path: String,
    hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupStats {
    pub duplicates_replaced: usize,
    pub chars_saved: usize,
}

/// Detects byte-identical file-content dumps repeated across the transcript
/// and replaces older copies with short references to the retained one.
///
/// The transform is order-preserving and idempotent: references do not match
/// the dump pattern, so a second run finds no duplicate hashes.
pub struct FileContentDeduplicator {
    pattern: Regex,
}

impl FileContentDeduplicator {
    pub fn new() -> Self {
        Self {
            // A path marker followed by body text, closed by the end tag.
            pattern: Regex::new(r#"(?s)<file_content path="([^"]+)">\n?(.*?)</file_content>"#)
                .expect("file dump pattern is valid"),
        }
    }

    pub fn dedupe(&self, messages: &mut [Message]) -> DedupStats {
        let dumps = self.scan(messages);

        // Group by content hash; any hash seen more than once is a duplicate
        // set. The most recent occurrence keeps the full content.
        let mut by_hash: indexmap::IndexMap<String, Vec<FileDump>> = indexmap::IndexMap::new();
        for dump in dumps {
            by_hash.entry(dump.hash.clone()).or_default().push(dump);
        }

        let mut replacements: Vec<(FileDump, usize)> = Vec::new();
        for (_, mut occurrences) in by_hash {
            if occurrences.len() < 2 {
                continue;
            }
            occurrences.sort_by_key(|d| (d.message_index, d.slot, d.start));
            let keeper_index = occurrences.last().map(|d| d.message_index).unwrap_or(0);
            for duplicate in occurrences.into_iter().rev().skip(1) {
                replacements.push((duplicate, keeper_index));
            }
        }

        let mut stats = DedupStats::default();
        if replacements.is_empty() {
            return stats;
        }

        // Splice from the back of each string so earlier ranges stay valid.
        replacements.sort_by(|a, b| {
            (b.0.message_index, b.0.slot, b.0.start).cmp(&(a.0.message_index, a.0.slot, a.0.start))
        });

        for (dump, keeper_index) in replacements {
            let reference = format!(
                "[file content unchanged: {} (full content in message {})]",
                dump.path, keeper_index
            );
            let target = slot_content_mut(&mut messages[dump.message_index], dump.slot);
            if let Some(text) = target {
                let removed = dump.end - dump.start;
                stats.chars_saved += removed.saturating_sub(reference.len());
                stats.duplicates_replaced += 1;
                text.replace_range(dump.start..dump.end, &reference);
            }
        }

        stats
    }

    fn scan(&self, messages: &[Message]) -> Vec<FileDump> {
        let mut dumps = Vec::new();
        for (message_index, message) in messages.iter().enumerate() {
            match &message.content {
                MessageContent::Text(text) => {
                    self.scan_string(text, message_index, Slot::PlainText, &mut dumps);
                }
                MessageContent::Blocks(blocks) => {
                    for (block_index, block) in blocks.iter().enumerate() {
                        let text = match block {
                            ContentBlock::Text { text } => text,
                            ContentBlock::ToolResult { content, .. } => content,
                            ContentBlock::ToolUse { .. } => continue,
                        };
                        self.scan_string(text, message_index, Slot::Block(block_index), &mut dumps);
                    }
                }
            }
        }
        dumps
    }

    fn scan_string(
        &self,
        text: &str,
        message_index: usize,
        slot: Slot,
        dumps: &mut Vec<FileDump>,
    ) {
        for capture in self.pattern.captures_iter(text) {
            let full = capture.get(0).expect("match has a full capture");
            let path = capture.get(1).map(|m| m.as_str()).unwrap_or_default();
            let body = capture.get(2).map(|m| m.as_str()).unwrap_or_default();

            let mut hasher = Sha256::new();
            hasher.update(body.as_bytes());
            let hash = hex::encode(hasher.finalize());

            dumps.push(FileDump {
                message_index,
                slot,
                start: full.start(),
                end: full.end(),
                path: path.to_string(),
                hash,
            });
        }
    }
}

impl Default for FileContentDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}

fn slot_content_mut(message: &mut Message, slot: Slot) -> Option<&mut String> {
    match (&mut message.content, slot) {
        (MessageContent::Text(text), Slot::PlainText) => Some(text),
        (MessageContent::Blocks(blocks), Slot::Block(index)) => {
            match blocks.get_mut(index)? {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::ToolResult { content, .. } => Some(content),
                ContentBlock::ToolUse { .. } => None,
            }
        }
        _ => None,
    }
}
