use indexmap::IndexMap;
use regex::Regex;

use crate::conversations::{ContentBlock, Message, MessageContent, Role};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidationStats {
    pub strategies_applied: Vec<&'static str>,
    pub results_merged: usize,
}

/// One tool-result block addressed inside the transcript.
#[derive(Debug, Clone)]
struct ResultRecord {
    message_index: usize,
    block_index: usize,
    content: String,
}

#[derive(Debug, Clone, PartialEq)]
struct ListingResult {
    path: String,
    entries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct SearchMatch {
    path: String,
    line: u64,
    text: String,
}

#[derive(Debug, Clone, PartialEq)]
struct FileOpResult {
    op: String,
    path: String,
}

/// Merges semantically redundant tool outputs: repeated directory listings,
/// scattered search results, and sequential operations on one file.
///
/// Mergers run in a fixed order and each one only fires when it recognizes at
/// least two candidates; everything else passes through untouched, in its
/// original relative order. Blocks are rewritten rather than deleted so
/// tool-use/tool-result pairing survives.
pub struct ToolResultConsolidator {
    listing_header: Regex,
    search_line: Regex,
    file_op: Regex,
}

impl ToolResultConsolidator {
    pub fn new() -> Self {
        Self {
            listing_header: Regex::new(
                r"^(?:Directory listing for|Contents of directory|Contents of) (\S+?):?$",
            )
            .expect("listing header pattern is valid"),
            search_line: Regex::new(r"^([^\s:][^:]*):(\d+):(.*)$")
                .expect("search line pattern is valid"),
            file_op: Regex::new(
                r"^(Read|Wrote|Created|Modified|Edited|Deleted)(?: file)? (\S+)$",
            )
            .expect("file op pattern is valid"),
        }
    }

    pub fn consolidate(&self, messages: &mut [Message]) -> ConsolidationStats {
        let mut records = collect_tool_results(messages);
        let mut stats = ConsolidationStats::default();

        // Fixed order; each later merger only sees what the earlier ones
        // left unmerged.
        let mut consumed = vec![false; records.len()];
        let merged_listings = self.merge_listings(&mut records, &mut consumed);
        if merged_listings > 0 {
            stats.strategies_applied.push("listing_merge");
            stats.results_merged += merged_listings;
        }

        let merged_searches = self.merge_searches(&mut records, &mut consumed);
        if merged_searches > 0 {
            stats.strategies_applied.push("search_merge");
            stats.results_merged += merged_searches;
        }

        let merged_ops = self.merge_file_ops(&mut records, &mut consumed);
        if merged_ops > 0 {
            stats.strategies_applied.push("file_op_merge");
            stats.results_merged += merged_ops;
        }

        apply_records(messages, &records);
        stats
    }

    fn parse_listing(&self, content: &str) -> Option<ListingResult> {
        let mut lines = content.lines();
        let header = lines.next()?;
        let path = self.listing_header.captures(header)?.get(1)?.as_str();

        let entries: Vec<String> = lines
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        Some(ListingResult {
            path: path.to_string(),
            entries,
        })
    }

    fn parse_search(&self, content: &str) -> Option<Vec<SearchMatch>> {
        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.is_empty() {
            return None;
        }

        let mut matches = Vec::new();
        for line in lines {
            let capture = self.search_line.captures(line)?;
            matches.push(SearchMatch {
                path: capture.get(1)?.as_str().to_string(),
                line: capture.get(2)?.as_str().parse().ok()?,
                text: capture.get(3)?.as_str().to_string(),
            });
        }
        Some(matches)
    }

    fn parse_file_op(&self, content: &str) -> Option<FileOpResult> {
        // Single-line results only; multi-line output is not an op receipt.
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());
        let line = lines.next()?;
        if lines.next().is_some() {
            return None;
        }
        let capture = self.file_op.captures(line.trim())?;
        Some(FileOpResult {
            op: capture.get(1)?.as_str().to_lowercase(),
            path: capture.get(2)?.as_str().to_string(),
        })
    }

    /// Groups listing results by the directory they report; each group with
    /// two or more members collapses into the union of its entries.
    fn merge_listings(&self, records: &mut [ResultRecord], consumed: &mut [bool]) -> usize {
        let mut groups: IndexMap<String, Vec<(usize, ListingResult)>> = IndexMap::new();
        for (index, record) in records.iter().enumerate() {
            if consumed[index] {
                continue;
            }
            if let Some(listing) = self.parse_listing(&record.content) {
                groups.entry(listing.path.clone()).or_default().push((index, listing));
            }
        }

        let mut merged_groups = 0;
        for (path, group) in groups {
            if group.len() < 2 {
                continue;
            }
            merged_groups += 1;

            let mut entries: Vec<String> = Vec::new();
            for (_, listing) in &group {
                for entry in &listing.entries {
                    if !entries.contains(entry) {
                        entries.push(entry.clone());
                    }
                }
            }

            let keeper = group[0].0;
            records[keeper].content = format!(
                "Directory listing for {} (merged from {} results):\n{}",
                path,
                group.len(),
                entries.join("\n")
            );
            consumed[keeper] = true;

            let keeper_message = records[keeper].message_index;
            for &(index, _) in group.iter().skip(1) {
                records[index].content =
                    format!("[directory listing merged into message {}]", keeper_message);
                consumed[index] = true;
            }
        }
        merged_groups
    }

    /// Collapses every search-shaped result into one, enumerating distinct
    /// line matches per file.
    fn merge_searches(&self, records: &mut [ResultRecord], consumed: &mut [bool]) -> usize {
        let mut candidates: Vec<(usize, Vec<SearchMatch>)> = Vec::new();
        for (index, record) in records.iter().enumerate() {
            if consumed[index] {
                continue;
            }
            if let Some(matches) = self.parse_search(&record.content) {
                candidates.push((index, matches));
            }
        }

        if candidates.len() < 2 {
            return 0;
        }

        let mut by_path: IndexMap<String, Vec<(u64, String)>> = IndexMap::new();
        for (_, matches) in &candidates {
            for m in matches {
                let per_file = by_path.entry(m.path.clone()).or_default();
                let entry = (m.line, m.text.clone());
                if !per_file.contains(&entry) {
                    per_file.push(entry);
                }
            }
        }

        let mut merged = format!("Search results (merged from {} results):", candidates.len());
        for (path, mut hits) in by_path {
            hits.sort_by_key(|(line, _)| *line);
            merged.push_str(&format!("\n{}:", path));
            for (line, text) in hits {
                merged.push_str(&format!("\n  {}: {}", line, text));
            }
        }

        let keeper = candidates[0].0;
        records[keeper].content = merged;
        consumed[keeper] = true;

        let keeper_message = records[keeper].message_index;
        for &(index, _) in candidates.iter().skip(1) {
            records[index].content =
                format!("[search results merged into message {}]", keeper_message);
            consumed[index] = true;
        }

        1
    }

    /// Merges op receipts for the same file into one ordered sequence.
    fn merge_file_ops(&self, records: &mut [ResultRecord], consumed: &mut [bool]) -> usize {
        let mut groups: IndexMap<String, Vec<(usize, FileOpResult)>> = IndexMap::new();
        for (index, record) in records.iter().enumerate() {
            if consumed[index] {
                continue;
            }
            if let Some(op) = self.parse_file_op(&record.content) {
                groups.entry(op.path.clone()).or_default().push((index, op));
            }
        }

        let mut merged_groups = 0;
        for (path, group) in groups {
            if group.len() < 2 {
                continue;
            }
            merged_groups += 1;

            let sequence: Vec<String> = group.iter().map(|(_, op)| op.op.clone()).collect();
            let keeper = group[0].0;
            records[keeper].content = format!(
                "File operations on {}: {}",
                path,
                sequence.join(" -> ")
            );
            consumed[keeper] = true;

            let keeper_message = records[keeper].message_index;
            for &(index, _) in group.iter().skip(1) {
                records[index].content =
                    format!("[file operations merged into message {}]", keeper_message);
                consumed[index] = true;
            }
        }
        merged_groups
    }
}

impl Default for ToolResultConsolidator {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_tool_results(messages: &[Message]) -> Vec<ResultRecord> {
    let mut records = Vec::new();
    for (message_index, message) in messages.iter().enumerate() {
        if message.role != Role::Tool {
            continue;
        }
        let MessageContent::Blocks(blocks) = &message.content else {
            continue;
        };
        for (block_index, block) in blocks.iter().enumerate() {
            if let ContentBlock::ToolResult { content, .. } = block {
                records.push(ResultRecord {
                    message_index,
                    block_index,
                    content: content.clone(),
                });
            }
        }
    }
    records
}

fn apply_records(messages: &mut [Message], records: &[ResultRecord]) {
    for record in records {
        if let MessageContent::Blocks(blocks) = &mut messages[record.message_index].content
            && let Some(ContentBlock::ToolResult { content, .. }) =
                blocks.get_mut(record.block_index)
        {
            *content = record.content.clone();
        }
    }
}
