//! JSONL transcript adapter.
//!
//! Each line is a JSON object carrying at least `role` and `content`;
//! `content` may be a plain string or an array of typed blocks (text,
//! tool-use, tool-result). Malformed lines produce warnings, not fatal
//! errors, and bytes past the last newline-terminated record are ignored
//! so tail-readers can resume at `byte_end`.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::core::{Message, Role, Transcript};

/// Maximum rendered length of a tool result before truncation.
const TOOL_RESULT_LIMIT: usize = 500;

/// Parses JSONL transcript bytes starting at `base_offset`.
///
/// `base_offset` is added to every `byte_end` so incremental tail reads
/// report absolute file offsets.
#[must_use]
pub fn parse(bytes: &[u8], base_offset: u64) -> Transcript {
    let mut transcript = Transcript::default();
    let mut cursor = 0usize;
    let mut index = 0usize;

    while let Some(rel) = bytes[cursor..].iter().position(|&b| b == b'\n') {
        let line_end = cursor + rel;
        let line = &bytes[cursor..line_end];
        let byte_end = base_offset + (line_end as u64) + 1;
        cursor = line_end + 1;

        let text = String::from_utf8_lossy(line);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => {
                if let Some(mut message) = record_to_message(&value) {
                    message.index = index;
                    message.byte_end = Some(byte_end);
                    index += 1;
                    transcript.messages.push(message);
                }
            }
            Err(e) => {
                transcript
                    .warnings
                    .push(format!("skipping malformed JSONL line: {e}"));
            }
        }
    }

    transcript
}

/// Maps one JSONL record into a canonical message, or `None` for records
/// with no usable text (e.g. bookkeeping events).
fn record_to_message(value: &Value) -> Option<Message> {
    // Some platforms nest the payload under "message"
    let record = value.get("message").filter(|m| m.is_object()).unwrap_or(value);

    let role = record
        .get("role")
        .or_else(|| value.get("role"))
        .or_else(|| value.get("type"))
        .and_then(Value::as_str)
        .map(Role::parse)?;

    let content = record.get("content").or_else(|| value.get("content"))?;
    let text = render_content(content);
    if text.trim().is_empty() {
        return None;
    }

    let timestamp = value
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(parse_timestamp);

    Some(Message {
        index: 0,
        role,
        text,
        timestamp,
        byte_end: None,
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Renders a content value (string or typed block array) into plain text.
fn render_content(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => {
            let mut out = String::new();
            for block in blocks {
                let rendered = render_block(block);
                if rendered.is_empty() {
                    continue;
                }
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(&rendered);
            }
            out
        }
        _ => String::new(),
    }
}

fn render_block(block: &Value) -> String {
    let kind = block.get("type").and_then(Value::as_str).unwrap_or("text");
    match kind {
        "text" => block
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        "tool_use" | "toolu" => {
            let name = block
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let summary = block
                .get("input")
                .map(|input| summarize_tool_input(name, input))
                .unwrap_or_default();
            if summary.is_empty() {
                format!("[tool: {name}]")
            } else {
                format!("[tool: {name}({summary})]")
            }
        }
        "tool_result" => {
            let text = block
                .get("content")
                .map(render_content)
                .unwrap_or_default();
            if text.is_empty() {
                String::new()
            } else {
                format!("[tool result: {}]", truncate_chars(&text, TOOL_RESULT_LIMIT))
            }
        }
        _ => String::new(),
    }
}

/// Extracts the one argument worth keeping for well-known tools.
fn summarize_tool_input(name: &str, input: &Value) -> String {
    match name {
        "bash" | "shell" | "Bash" => input
            .get("command")
            .and_then(|c| {
                c.as_str().map(ToString::to_string).or_else(|| {
                    // Command arrays look like ["zsh", "-lc", "actual command"]
                    c.as_array()
                        .and_then(|arr| arr.last())
                        .and_then(Value::as_str)
                        .map(ToString::to_string)
                })
            })
            .unwrap_or_default(),
        "read_file" | "write_file" | "Read" | "Write" | "Edit" => input
            .get("path")
            .or_else(|| input.get("file_path"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

/// Truncates on a char boundary, appending an ellipsis marker.
fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let cut: String = text.chars().take(limit).collect();
    format!("{cut}...[truncated]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_lines() {
        let data = b"{\"role\":\"user\",\"content\":\"Hello\"}\n\
                     {\"role\":\"assistant\",\"content\":\"Hi there\"}\n";
        let t = parse(data, 0);
        assert_eq!(t.messages.len(), 2);
        assert_eq!(t.messages[0].role, Role::User);
        assert_eq!(t.messages[0].text, "Hello");
        assert_eq!(t.messages[1].role, Role::Assistant);
        assert!(t.warnings.is_empty());
    }

    #[test]
    fn test_byte_end_monotonic_and_past_last_record() {
        let line1 = "{\"role\":\"user\",\"content\":\"a\"}\n";
        let line2 = "{\"role\":\"user\",\"content\":\"b\"}\n";
        let partial = "{\"role\":\"user\",\"cont";
        let data = format!("{line1}{line2}{partial}");
        let t = parse(data.as_bytes(), 0);

        assert_eq!(t.messages.len(), 2);
        let e1 = t.messages[0].byte_end.unwrap();
        let e2 = t.messages[1].byte_end.unwrap();
        assert_eq!(e1, line1.len() as u64);
        assert_eq!(e2, (line1.len() + line2.len()) as u64);
        // The trailing partial record is invisible
        assert_eq!(t.last_byte_end(), Some(e2));
    }

    #[test]
    fn test_base_offset_applied() {
        let data = b"{\"role\":\"user\",\"content\":\"a\"}\n";
        let t = parse(data, 100);
        assert_eq!(t.messages[0].byte_end, Some(100 + data.len() as u64));
    }

    #[test]
    fn test_malformed_line_warns_and_continues() {
        let data = b"not json at all\n{\"role\":\"user\",\"content\":\"ok\"}\n";
        let t = parse(data, 0);
        assert_eq!(t.messages.len(), 1);
        assert_eq!(t.warnings.len(), 1);
        assert!(t.warnings[0].contains("malformed"));
    }

    #[test]
    fn test_content_block_array() {
        let data = br#"{"role":"assistant","content":[{"type":"text","text":"Answer"},{"type":"tool_use","name":"bash","input":{"command":"ls -la"}}]}
"#;
        let t = parse(data, 0);
        assert_eq!(t.messages.len(), 1);
        assert!(t.messages[0].text.contains("Answer"));
        assert!(t.messages[0].text.contains("[tool: bash(ls -la)]"));
    }

    #[test]
    fn test_tool_result_truncated() {
        let long = "x".repeat(600);
        let data = format!(
            "{{\"role\":\"tool\",\"content\":[{{\"type\":\"tool_result\",\"content\":\"{long}\"}}]}}\n"
        );
        let t = parse(data.as_bytes(), 0);
        assert_eq!(t.messages.len(), 1);
        assert!(t.messages[0].text.contains("...[truncated]"));
    }

    #[test]
    fn test_nested_message_payload() {
        let data = br#"{"type":"user","timestamp":"2026-01-10T12:00:00Z","message":{"role":"user","content":"nested"}}
"#;
        let t = parse(data, 0);
        assert_eq!(t.messages.len(), 1);
        assert_eq!(t.messages[0].text, "nested");
        assert!(t.messages[0].timestamp.is_some());
    }

    #[test]
    fn test_empty_content_skipped() {
        let data = b"{\"role\":\"user\",\"content\":\"\"}\n{\"role\":\"user\",\"content\":\"real\"}\n";
        let t = parse(data, 0);
        assert_eq!(t.messages.len(), 1);
        assert_eq!(t.messages[0].index, 0);
    }
}
