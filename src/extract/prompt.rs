//! Prompt construction for extraction and dedup LLM calls.
//!
//! The prompts are an input/output contract: the model is asked for JSON
//! the tolerant parser in [`super::parse`] accepts, either through the
//! `record_entries` tool or as fenced JSON text.

use crate::core::{Entry, TranscriptChunk};
use crate::llm::ToolDefinition;

/// Function name the extraction tool call uses.
pub const RECORD_ENTRIES_TOOL: &str = "record_entries";

/// System prompt for knowledge extraction.
pub const EXTRACTION_SYSTEM_PROMPT: &str = "\
You extract durable knowledge from chat transcripts into a personal memory store.

Extract only knowledge that stays true beyond this conversation: stable facts \
about the user and their systems, stated preferences, decisions with their \
reasons, significant events, open todos, and lessons learned from failures.

Rules:
- Write each item as ONE durable sentence in the user's voice.
- subject is a short noun phrase naming what the item is about. Never use \
'assistant', 'user', or 'conversation' as a subject.
- Skip narration of the conversation itself, one-off debugging detail, and \
anything trivially re-derivable from the code.
- importance is 1-10; only extract items of importance 5 or higher.
- type is one of: fact, preference, decision, event, todo, lesson.
- expiry is one of: core, permanent, temporary, session-only.
- canonical_key: set a short normalized key when the item is 'the current \
value of something' that later extractions may replace (e.g. editor-choice).

Call the record_entries tool with the extracted items. If nothing durable \
appears in the transcript, call it with an empty list.";

/// System prompt for the post-extraction dedup pass.
pub const DEDUP_SYSTEM_PROMPT: &str = "\
You deduplicate freshly extracted knowledge items.

Merge items that state the same durable knowledge, keeping the clearest \
sentence. A merged item keeps the highest importance and the union of tags. \
Items about different aspects of the same topic stay separate.

Return ONLY a JSON array of the surviving items, in the same shape they \
were given to you.";

/// System prompt for online dedup arbitration between a new item and one
/// stored near-duplicate.
pub const ONLINE_DEDUP_SYSTEM_PROMPT: &str = "\
You arbitrate between a NEW knowledge item and one SIMILAR item already \
stored. Decide exactly one action and return it as JSON:

{\"action\": \"skip\"}                          - NEW adds nothing over STORED
{\"action\": \"supersede\", \"target_id\": id}  - NEW replaces STORED (the fact changed)
{\"action\": \"merge\", \"target_id\": id, \"merged_content\": sentence}
                                             - one sentence covers both
{\"action\": \"insert\"}                        - they are genuinely different items

Return only the JSON object.";

/// Tool definition handed to the model for extraction calls.
#[must_use]
pub fn record_entries_tool() -> ToolDefinition {
    ToolDefinition {
        name: RECORD_ENTRIES_TOOL.to_string(),
        description: "Record durable knowledge items extracted from the transcript".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "entries": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "type": {"type": "string", "enum": ["fact", "preference", "decision", "event", "todo", "lesson"]},
                            "subject": {"type": "string"},
                            "content": {"type": "string"},
                            "canonical_key": {"type": "string"},
                            "importance": {"type": "integer", "minimum": 1, "maximum": 10},
                            "expiry": {"type": "string", "enum": ["core", "permanent", "temporary", "session-only"]},
                            "tags": {"type": "array", "items": {"type": "string"}},
                            "source_context": {"type": "string"}
                        },
                        "required": ["subject", "content", "importance"]
                    }
                }
            },
            "required": ["entries"]
        }),
    }
}

/// Builds the user prompt for one chunk, with an optional related-memories
/// section from pre-fetch.
#[must_use]
pub fn build_chunk_prompt(chunk: &TranscriptChunk, related: &[Entry]) -> String {
    let mut prompt = String::new();

    if !related.is_empty() {
        prompt.push_str("Memories already stored that may relate to this transcript:\n");
        for entry in related {
            prompt.push_str(&format!("- [{}] {}: {}\n", entry.kind.as_str(), entry.subject, entry.content));
        }
        prompt.push_str(
            "\nDo not re-extract these unless the transcript changes or contradicts them.\n\n",
        );
    }

    if !chunk.context_hint.is_empty() {
        prompt.push_str(&format!("Context: {}\n\n", chunk.context_hint));
    }

    prompt.push_str("Transcript:\n");
    prompt.push_str(&chunk.text);
    prompt
}

/// Builds the user prompt for whole-file extraction.
#[must_use]
pub fn build_whole_file_prompt(rendered: &str) -> String {
    format!("Full transcript:\n{rendered}")
}

/// Builds the user prompt for the post-extraction dedup pass.
#[must_use]
pub fn build_dedup_prompt(entries: &[Entry]) -> String {
    let items: Vec<serde_json::Value> = entries
        .iter()
        .map(|e| {
            serde_json::json!({
                "type": e.kind.as_str(),
                "subject": e.subject,
                "content": e.content,
                "canonical_key": e.canonical_key,
                "importance": e.importance,
                "expiry": e.expiry.as_str(),
                "tags": e.tags,
            })
        })
        .collect();
    format!(
        "Deduplicate these freshly extracted items:\n{}",
        serde_json::Value::Array(items)
    )
}

/// Builds the user prompt for online dedup arbitration.
#[must_use]
pub fn build_arbitration_prompt(new_entry: &Entry, stored: &Entry, similarity: f32) -> String {
    format!(
        "NEW item:\n  subject: {}\n  content: {}\n\nSTORED item (id {}, cosine {:.3}):\n  subject: {}\n  content: {}\n",
        new_entry.subject, new_entry.content, stored.id, similarity, stored.subject, stored.content
    )
}
