//! Canonical transcript shapes produced by the parser.
//!
//! A transcript file is parsed into a flat sequence of [`Message`]s and
//! grouped into [`TranscriptChunk`]s that stay under a character budget
//! without ever splitting a message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker role of a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human user.
    User,
    /// The assistant.
    Assistant,
    /// System or injected context.
    System,
    /// Tool invocation or result.
    Tool,
}

impl Role {
    /// Uppercase label used when rendering messages into prompts.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Assistant => "ASSISTANT",
            Self::System => "SYSTEM",
            Self::Tool => "TOOL",
        }
    }

    /// Parses common role spellings from transcript records.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "assistant" | "agent" | "model" => Self::Assistant,
            "system" | "developer" => Self::System,
            "tool" | "function" => Self::Tool,
            _ => Self::User,
        }
    }
}

/// One canonical message from a transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Zero-based position within the file.
    pub index: usize,
    /// Speaker role.
    pub role: Role,
    /// Rendered text content.
    pub text: String,
    /// Record timestamp when the format carries one.
    pub timestamp: Option<DateTime<Utc>>,
    /// Byte offset just past this message's newline-terminated record.
    ///
    /// Monotonically increasing for JSONL files so tail-readers can
    /// resume after the last fully parsed record. `None` for formats
    /// without record framing.
    pub byte_end: Option<u64>,
}

impl Message {
    /// Renders this message as one prompt line block.
    #[must_use]
    pub fn render(&self) -> String {
        format!("{}: {}", self.role.label(), self.text)
    }
}

/// A contiguous slice of transcript messages under the character budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptChunk {
    /// Zero-based chunk position within the file.
    pub chunk_index: usize,
    /// Index of the first message included.
    pub message_start: usize,
    /// Index just past the last message included.
    pub message_end: usize,
    /// Rendered text of all included messages.
    pub text: String,
    /// Short hint (first user line or heading) used in prompts.
    pub context_hint: String,
    /// Timestamp of the first message with one, if any.
    pub timestamp_start: Option<DateTime<Utc>>,
    /// Timestamp of the last message with one, if any.
    pub timestamp_end: Option<DateTime<Utc>>,
    /// Byte offset past the last complete record in this chunk.
    pub byte_end: Option<u64>,
}

/// A fully parsed transcript: messages, chunks, and parse warnings.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    /// Canonical messages in file order.
    pub messages: Vec<Message>,
    /// Budgeted chunks over those messages.
    pub chunks: Vec<TranscriptChunk>,
    /// Non-fatal parse warnings (malformed lines, unknown blocks).
    pub warnings: Vec<String>,
}

impl Transcript {
    /// True when the file produced no usable messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Byte offset past the last fully parsed record, if the format
    /// carries record framing.
    #[must_use]
    pub fn last_byte_end(&self) -> Option<u64> {
        self.messages.iter().rev().find_map(|m| m.byte_end)
    }

    /// Total rendered character count across all messages.
    #[must_use]
    pub fn rendered_chars(&self) -> usize {
        self.messages.iter().map(|m| m.render().chars().count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("user"), Role::User);
        assert_eq!(Role::parse("Assistant"), Role::Assistant);
        assert_eq!(Role::parse("model"), Role::Assistant);
        assert_eq!(Role::parse("developer"), Role::System);
        assert_eq!(Role::parse("function"), Role::Tool);
        assert_eq!(Role::parse("anything-else"), Role::User);
    }

    #[test]
    fn test_message_render() {
        let msg = Message {
            index: 0,
            role: Role::User,
            text: "hello".to_string(),
            timestamp: None,
            byte_end: None,
        };
        assert_eq!(msg.render(), "USER: hello");
    }

    #[test]
    fn test_last_byte_end() {
        let mut transcript = Transcript::default();
        assert_eq!(transcript.last_byte_end(), None);

        transcript.messages.push(Message {
            index: 0,
            role: Role::User,
            text: "a".to_string(),
            timestamp: None,
            byte_end: Some(10),
        });
        transcript.messages.push(Message {
            index: 1,
            role: Role::Assistant,
            text: "b".to_string(),
            timestamp: None,
            byte_end: None,
        });
        assert_eq!(transcript.last_byte_end(), Some(10));
    }
}
