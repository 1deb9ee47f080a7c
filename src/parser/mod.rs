//! Transcript parsing: file-format adapters and chunking.
//!
//! Adapters are selected by extension: `.jsonl` gets the record-framed
//! JSONL reader (with `byte_end` tracking for tail resumes); `.md`,
//! `.markdown`, and everything else become a single user message.

mod chunker;
mod jsonl;
mod text;

pub use chunker::{DEFAULT_CHUNK_BUDGET, chunk_messages, context_hint};

use std::path::Path;

use crate::core::Transcript;
use crate::error::{ParseError, Result};

/// Source platforms the parser special-cases when detecting from paths.
pub const KNOWN_PLATFORMS: [&str; 4] = ["codex", "claude-code", "openclaw", "plaud"];

/// Parses a transcript file into messages and budgeted chunks.
///
/// `base_offset` applies to JSONL files and skips bytes already consumed
/// by a previous incremental read.
///
/// # Errors
///
/// Returns [`ParseError`] when the file cannot be read. Malformed content
/// inside a readable file degrades to warnings.
pub fn parse_file(path: &Path, base_offset: u64, chunk_budget: usize) -> Result<Transcript> {
    if !path.exists() {
        return Err(ParseError::FileNotFound {
            path: path.display().to_string(),
        }
        .into());
    }

    let bytes = std::fs::read(path).map_err(|e| ParseError::ReadFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut transcript = if is_jsonl(path) {
        let offset = (base_offset as usize).min(bytes.len());
        jsonl::parse(&bytes[offset..], offset as u64)
    } else {
        text::parse(&String::from_utf8_lossy(&bytes))
    };

    transcript.chunks = chunk_messages(&transcript.messages, chunk_budget);
    Ok(transcript)
}

/// True for record-framed JSONL transcripts.
#[must_use]
pub fn is_jsonl(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("jsonl"))
}

/// Detects the source platform from path components.
///
/// Only the evidenced platforms are special-cased; anything else returns
/// `None` and relies on the `--platform` flag.
#[must_use]
pub fn detect_platform(path: &Path) -> Option<&'static str> {
    let lowered = path.to_string_lossy().to_lowercase();
    for platform in KNOWN_PLATFORMS {
        if lowered.contains(platform) {
            return Some(platform);
        }
    }
    if lowered.contains("/.claude/") || lowered.starts_with(".claude/") {
        return Some("claude-code");
    }
    None
}
