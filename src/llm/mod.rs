//! Pluggable LLM client abstraction.
//!
//! The pipeline depends on a provider-agnostic [`LlmClient`]: one-shot
//! chat completions for extraction and dedup arbitration, and a lazy
//! [`StreamEvent`] sequence for streaming consumers. Implementations
//! translate these into provider SDK calls.

pub mod openai;

pub use openai::OpenAiClient;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System instruction.
    System,
    /// User content.
    User,
    /// Assistant output.
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker role.
    pub role: ChatRole,
    /// Message content.
    pub content: String,
}

impl ChatMessage {
    /// Builds a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Builds a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// A callable tool exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// A tool invocation returned by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Raw JSON arguments.
    pub arguments: String,
}

/// Token accounting for one completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens consumed.
    pub prompt_tokens: u32,
    /// Completion tokens produced.
    pub completion_tokens: u32,
    /// Total tokens.
    pub total_tokens: u32,
}

/// Provider-agnostic chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation so far.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Completion token cap.
    pub max_tokens: Option<u32>,
    /// Tools the model may call.
    pub tools: Vec<ToolDefinition>,
}

impl ChatRequest {
    /// Builds a request with a system and user message.
    #[must_use]
    pub fn new(model: impl Into<String>, system: &str, user: &str) -> Self {
        Self {
            model: model.into(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            temperature: Some(0.2),
            max_tokens: Some(8192),
            tools: Vec::new(),
        }
    }
}

/// Provider-agnostic chat completion response.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    /// Text content (may be empty on tool-only responses).
    pub content: String,
    /// Tool calls the model made.
    pub tool_calls: Vec<ToolCall>,
    /// Token accounting.
    pub usage: TokenUsage,
}

/// One event in a streaming completion.
///
/// The sequence is lazy and finite, terminating after the last delta;
/// a failed stream yields a final [`StreamEvent::Error`].
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The model started a reasoning block.
    ThinkingStart,
    /// Incremental reasoning text.
    ThinkingDelta(String),
    /// The model finished a reasoning block.
    ThinkingEnd,
    /// Incremental answer text.
    TextDelta(String),
    /// Incremental tool-call arguments.
    ToolCallDelta {
        /// Tool name, present on the first delta of a call.
        name: Option<String>,
        /// Raw argument fragment.
        arguments: String,
    },
    /// The stream failed.
    Error(String),
}

/// Boxed event stream returned by [`LlmClient::chat_stream`].
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Trait for LLM provider backends.
///
/// Implementations handle the transport layer for a specific provider
/// while presenting a uniform interface to the extraction pipeline.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider name (e.g. `"openai"`, `"anthropic"`).
    fn name(&self) -> &'static str;

    /// Executes a chat completion request.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] on API failures, timeouts, or parse errors.
    async fn chat(&self, request: &ChatRequest) -> std::result::Result<ChatResponse, LlmError>;

    /// Executes a streaming chat completion request.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] on connection failures before the first event.
    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> std::result::Result<EventStream, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_builder() {
        let req = ChatRequest::new("gpt-5.2", "be terse", "extract knowledge");
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, ChatRole::System);
        assert_eq!(req.messages[1].content, "extract knowledge");
        assert!(req.tools.is_empty());
    }

    #[test]
    fn test_message_helpers() {
        assert_eq!(ChatMessage::system("x").role, ChatRole::System);
        assert_eq!(ChatMessage::user("x").role, ChatRole::User);
    }
}
