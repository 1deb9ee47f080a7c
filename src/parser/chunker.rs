//! Chunking policy over canonical messages.
//!
//! Groups messages into chunks whose rendered text stays under a
//! character budget, never splitting a single message. An oversized
//! message becomes its own chunk.

use unicode_segmentation::UnicodeSegmentation;

use crate::core::{Message, Role, TranscriptChunk};

/// Default chunk character budget.
pub const DEFAULT_CHUNK_BUDGET: usize = 24_000;

/// Maximum context-hint length in graphemes.
const HINT_LIMIT: usize = 120;

/// Groups `messages` into budgeted chunks.
#[must_use]
pub fn chunk_messages(messages: &[Message], budget: usize) -> Vec<TranscriptChunk> {
    let budget = budget.max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut text = String::new();

    for (i, message) in messages.iter().enumerate() {
        let rendered = message.render();
        let over_budget =
            !text.is_empty() && text.chars().count() + rendered.chars().count() + 1 > budget;
        if over_budget {
            chunks.push(build_chunk(messages, start, i, std::mem::take(&mut text), chunks.len()));
            start = i;
        }
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&rendered);
    }

    if !text.is_empty() {
        chunks.push(build_chunk(messages, start, messages.len(), text, chunks.len()));
    }

    chunks
}

fn build_chunk(
    messages: &[Message],
    start: usize,
    end: usize,
    text: String,
    chunk_index: usize,
) -> TranscriptChunk {
    let slice = &messages[start..end];
    TranscriptChunk {
        chunk_index,
        message_start: start,
        message_end: end,
        context_hint: context_hint(slice),
        timestamp_start: slice.iter().find_map(|m| m.timestamp),
        timestamp_end: slice.iter().rev().find_map(|m| m.timestamp),
        byte_end: slice.iter().rev().find_map(|m| m.byte_end),
        text,
    }
}

/// Short hint used in prompts: the first user line, or the first
/// markdown heading, truncated on a grapheme boundary.
#[must_use]
pub fn context_hint(messages: &[Message]) -> String {
    let candidate = messages
        .iter()
        .find(|m| m.role == Role::User)
        .and_then(|m| {
            m.text
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
        })
        .or_else(|| {
            messages.iter().find_map(|m| {
                m.text
                    .lines()
                    .map(str::trim)
                    .find(|line| line.starts_with('#') || !line.is_empty())
            })
        })
        .unwrap_or_default();

    let hint = candidate.trim_start_matches('#').trim();
    let graphemes: Vec<&str> = hint.graphemes(true).collect();
    if graphemes.len() <= HINT_LIMIT {
        hint.to_string()
    } else {
        graphemes[..HINT_LIMIT].concat()
    }
}
