//! Markdown and plain-text transcript adapter.
//!
//! The whole file becomes a single message with role "user". Markdown
//! and plain text carry no record framing, so `byte_end` is absent.

use crate::core::{Message, Role, Transcript};

/// Parses a whole markdown or plain-text file as one user message.
#[must_use]
pub fn parse(content: &str) -> Transcript {
    let mut transcript = Transcript::default();
    if content.trim().is_empty() {
        return transcript;
    }

    transcript.messages.push(Message {
        index: 0,
        role: Role::User,
        text: content.to_string(),
        timestamp: None,
        byte_end: None,
    });
    transcript
}
