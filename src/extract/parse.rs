//! Tolerant parsing and validation of LLM extraction output.
//!
//! Models return entries either through the `record_entries` tool or as
//! (possibly code-fenced) JSON text, and drift across synonym keys for
//! the same field. This module walks the JSON tree once, fills a strict
//! shape, and emits a warning per fallback used.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::core::{Entry, EntrySource, EntryType, Expiry};
use crate::llm::ChatResponse;

use super::prompt::RECORD_ENTRIES_TOOL;

/// Minimum content length a validated entry must have.
pub const MIN_CONTENT_LEN: usize = 20;

/// Minimum importance a validated entry must have.
pub const MIN_IMPORTANCE: u8 = 5;

/// Subjects that are always narration, never knowledge.
const BLOCKED_SUBJECTS: [&str; 7] = [
    "assistant",
    "the assistant",
    "user",
    "the user",
    "ai",
    "model",
    "conversation",
];

/// Narration openers that describe the conversation instead of stating
/// knowledge.
const META_PATTERN: &str =
    r"(?i)^(in this (conversation|session)|this (conversation|chat|session)|the (user|assistant) (asked|said|was|wanted|requested))";

fn meta_regex() -> Option<&'static regex::Regex> {
    static META_RE: std::sync::OnceLock<Option<regex::Regex>> = std::sync::OnceLock::new();
    META_RE
        .get_or_init(|| regex::Regex::new(META_PATTERN).ok())
        .as_ref()
}

/// Defaults applied to every parsed entry.
#[derive(Debug, Clone, Default)]
pub struct EntryDefaults {
    /// Source transcript path.
    pub source_file: String,
    /// Platform tag.
    pub platform: Option<String>,
    /// Lowercased project name.
    pub project: Option<String>,
}

/// Result of parsing one LLM response.
#[derive(Debug, Default)]
pub struct ParsedEntries {
    /// Validated entries.
    pub entries: Vec<Entry>,
    /// Warnings for fallbacks used and items rejected.
    pub warnings: Vec<String>,
}

/// Parses entries from a chat response: tool-call arguments first, then
/// JSON found in the text content.
#[must_use]
pub fn parse_response(
    response: &ChatResponse,
    defaults: &EntryDefaults,
    now: DateTime<Utc>,
) -> ParsedEntries {
    let mut out = ParsedEntries::default();

    let raw_items = if let Some(call) = response
        .tool_calls
        .iter()
        .find(|c| c.name == RECORD_ENTRIES_TOOL)
    {
        match serde_json::from_str::<Value>(&call.arguments) {
            Ok(args) => extract_item_array(&args),
            Err(e) => {
                out.warnings
                    .push(format!("unparseable tool arguments: {e}"));
                Vec::new()
            }
        }
    } else {
        match find_json(&response.content) {
            Some(value) => {
                if response.content.contains("```") {
                    out.warnings
                        .push("extraction JSON arrived code-fenced in text".to_string());
                }
                extract_item_array(&value)
            }
            None => {
                if !response.content.trim().is_empty() {
                    out.warnings
                        .push("response text contained no JSON entries".to_string());
                }
                Vec::new()
            }
        }
    };

    for item in raw_items {
        match build_entry(&item, defaults, now, &mut out.warnings) {
            Ok(entry) => out.entries.push(entry),
            Err(reason) => out.warnings.push(format!("rejected entry: {reason}")),
        }
    }

    out
}

/// Parses the post-extraction dedup response: a JSON array of survivors.
#[must_use]
pub fn parse_dedup_response(
    response: &ChatResponse,
    defaults: &EntryDefaults,
    now: DateTime<Utc>,
) -> ParsedEntries {
    let mut out = ParsedEntries::default();
    let Some(value) = find_json(&response.content) else {
        out.warnings
            .push("dedup response contained no JSON array".to_string());
        return out;
    };
    for item in extract_item_array(&value) {
        match build_entry(&item, defaults, now, &mut out.warnings) {
            Ok(entry) => out.entries.push(entry),
            Err(reason) => out.warnings.push(format!("rejected merged entry: {reason}")),
        }
    }
    out
}

/// Finds the outermost JSON value in text, tolerating code fences and
/// surrounding prose.
#[must_use]
pub fn find_json(text: &str) -> Option<Value> {
    let trimmed = strip_fences(text);
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    // Fall back to the first bracketed region
    for open in ['[', '{'] {
        let close = if open == '[' { ']' } else { '}' };
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if end > start {
                if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                    return Some(value);
                }
            }
        }
    }
    None
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line, then the closing fence
    let body = rest.split_once('\n').map_or(rest, |(_, b)| b);
    body.rsplit_once("```").map_or(body, |(b, _)| b).trim()
}

/// Pulls the items array out of a parsed value: a root array, or an
/// object's `entries` array.
fn extract_item_array(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Object(map) => map
            .get("entries")
            .or_else(|| map.get("items"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_else(|| vec![value.clone()]),
        _ => Vec::new(),
    }
}

/// Reads a field across its synonym keys, warning on fallback use.
fn string_field(
    item: &Value,
    canonical: &str,
    synonyms: &[&str],
    warnings: &mut Vec<String>,
) -> Option<String> {
    if let Some(v) = item.get(canonical).and_then(Value::as_str) {
        return Some(v.to_string());
    }
    for key in synonyms {
        if let Some(v) = item.get(*key).and_then(Value::as_str) {
            warnings.push(format!("entry used '{key}' instead of '{canonical}'"));
            return Some(v.to_string());
        }
    }
    None
}

fn build_entry(
    item: &Value,
    defaults: &EntryDefaults,
    now: DateTime<Utc>,
    warnings: &mut Vec<String>,
) -> std::result::Result<Entry, String> {
    let subject = string_field(item, "subject", &["name"], warnings)
        .ok_or_else(|| "missing subject".to_string())?;
    let content = string_field(
        item,
        "content",
        &["description", "text", "statement", "knowledge"],
        warnings,
    )
    .ok_or_else(|| "missing content".to_string())?;

    let subject = subject.trim().to_string();
    let content = content.trim().to_string();

    let lowered_subject = subject.to_lowercase();
    if BLOCKED_SUBJECTS.contains(&lowered_subject.as_str()) {
        return Err(format!("blocked subject '{subject}'"));
    }
    if meta_regex().is_some_and(|re| re.is_match(&content)) {
        return Err("meta narration, not durable knowledge".to_string());
    }
    if content.len() < MIN_CONTENT_LEN {
        return Err(format!("content too short ({} chars)", content.len()));
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let importance = match item.get("importance") {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0).clamp(0, 10) as u8,
        Some(Value::String(s)) => {
            warnings.push("importance arrived as a string".to_string());
            s.trim().parse::<u8>().unwrap_or(0)
        }
        _ => return Err("missing importance".to_string()),
    };
    if importance < MIN_IMPORTANCE {
        return Err(format!("importance {importance} below threshold"));
    }

    let kind = item
        .get("type")
        .or_else(|| item.get("kind"))
        .and_then(Value::as_str)
        .and_then(EntryType::parse)
        .unwrap_or_else(|| {
            warnings.push(format!("entry '{subject}' missing type, defaulting to fact"));
            EntryType::Fact
        });

    let expiry = item
        .get("expiry")
        .and_then(Value::as_str)
        .and_then(Expiry::parse)
        .unwrap_or(Expiry::Permanent);

    let mut entry = Entry::new(kind, subject, content, importance, expiry, now);
    entry.canonical_key = item
        .get("canonical_key")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());
    entry.tags = item
        .get("tags")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();
    entry.source = EntrySource {
        file: defaults.source_file.clone(),
        context: string_field(item, "source_context", &["source"], warnings),
    };
    entry.platform = defaults.platform.clone();
    entry.project = defaults.project.clone();
    Ok(entry)
}

/// In-process exact dedup over one chunk's entries: keeps the first of
/// each `(subject, content hash)` pair, folding tags and importance in.
#[must_use]
pub fn dedup_exact(entries: Vec<Entry>) -> Vec<Entry> {
    let mut seen: Vec<Entry> = Vec::new();
    for entry in entries {
        let hash = entry.content_hash();
        if let Some(existing) = seen
            .iter_mut()
            .find(|e| e.subject == entry.subject && e.content_hash() == hash)
        {
            existing.importance = existing.importance.max(entry.importance);
            for tag in entry.tags {
                if !existing.tags.contains(&tag) {
                    existing.tags.push(tag);
                }
            }
        } else {
            seen.push(entry);
        }
    }
    seen
}
