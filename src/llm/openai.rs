//! `OpenAI` client implementation using the `async-openai` crate.
//!
//! Supports any `OpenAI`-compatible API (`OpenAI`, Azure, local proxies)
//! via the base URL override.

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, ChatCompletionTool, ChatCompletionToolType,
    CreateChatCompletionRequest, FunctionObject,
};
use async_trait::async_trait;
use futures_util::StreamExt;

use crate::error::LlmError;
use crate::llm::{
    ChatRequest, ChatResponse, ChatRole, EventStream, LlmClient, StreamEvent, TokenUsage, ToolCall,
};

/// Default chat model for extraction and dedup calls.
pub const DEFAULT_CHAT_MODEL: &str = "gpt-5.2-2025-12-11";

/// `OpenAI`-compatible LLM client.
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
}

impl OpenAiClient {
    /// Creates a client for the given credentials.
    #[must_use]
    pub fn new(api_key: &str, base_url: Option<&str>) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(url) = base_url {
            config = config.with_api_base(url);
        }
        Self {
            client: Client::with_config(config),
        }
    }

    /// Converts our message type to the `OpenAI` SDK type.
    fn convert_message(msg: &crate::llm::ChatMessage) -> ChatCompletionRequestMessage {
        match msg.role {
            ChatRole::System => {
                ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                    content: async_openai::types::ChatCompletionRequestSystemMessageContent::Text(
                        msg.content.clone(),
                    ),
                    name: None,
                })
            }
            ChatRole::User | ChatRole::Assistant => {
                ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                    content: async_openai::types::ChatCompletionRequestUserMessageContent::Text(
                        msg.content.clone(),
                    ),
                    name: None,
                })
            }
        }
    }

    /// Builds an `OpenAI` chat completion request from our generic request.
    fn build_request(request: &ChatRequest, stream: bool) -> CreateChatCompletionRequest {
        let messages: Vec<_> = request.messages.iter().map(Self::convert_message).collect();

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|td| ChatCompletionTool {
                        r#type: ChatCompletionToolType::Function,
                        function: FunctionObject {
                            name: td.name.clone(),
                            description: Some(td.description.clone()),
                            parameters: Some(td.parameters.clone()),
                            strict: None,
                        },
                    })
                    .collect(),
            )
        };

        CreateChatCompletionRequest {
            model: request.model.clone(),
            messages,
            temperature: request.temperature.filter(|&t| t != 0.0),
            max_completion_tokens: request.max_tokens,
            stream: if stream { Some(true) } else { None },
            tools,
            ..Default::default()
        }
    }

    /// Splits provider failures into the spec's transient/permanent classes.
    fn classify(err: &async_openai::error::OpenAIError) -> LlmError {
        let message = err.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("429") || lowered.contains("rate limit") || lowered.contains("rate_limit")
        {
            return LlmError::RateLimited { message };
        }
        if lowered.contains("500")
            || lowered.contains("502")
            || lowered.contains("503")
            || lowered.contains("overloaded")
            || lowered.contains("server_error")
            || lowered.contains("connection")
        {
            return LlmError::Server { message };
        }
        if lowered.contains("timed out") || lowered.contains("timeout") {
            return LlmError::Timeout { seconds: 120 };
        }
        LlmError::Api {
            message,
            status: None,
        }
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient").finish_non_exhaustive()
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn chat(&self, request: &ChatRequest) -> std::result::Result<ChatResponse, LlmError> {
        let openai_request = Self::build_request(request, false);

        let response = self
            .client
            .chat()
            .create(openai_request)
            .await
            .map_err(|e| Self::classify(&e))?;

        let choice = response.choices.first();

        let content = choice
            .and_then(|c| c.message.content.as_ref())
            .cloned()
            .unwrap_or_default();

        let tool_calls = choice
            .and_then(|c| c.message.tool_calls.as_ref())
            .map(|tcs| {
                tcs.iter()
                    .map(|tc| ToolCall {
                        id: tc.id.clone(),
                        name: tc.function.name.clone(),
                        arguments: tc.function.arguments.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let usage = response
            .usage
            .map_or_else(TokenUsage::default, |u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            });

        Ok(ChatResponse {
            content,
            tool_calls,
            usage,
        })
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> std::result::Result<EventStream, LlmError> {
        let openai_request = Self::build_request(request, true);

        let stream = self
            .client
            .chat()
            .create_stream(openai_request)
            .await
            .map_err(|e| Self::classify(&e))?;

        let mapped = stream.flat_map(|result| {
            let events: Vec<StreamEvent> = match result {
                Ok(response) => response
                    .choices
                    .first()
                    .map(|choice| {
                        let mut out = Vec::new();
                        if let Some(text) = choice.delta.content.as_ref() {
                            if !text.is_empty() {
                                out.push(StreamEvent::TextDelta(text.clone()));
                            }
                        }
                        if let Some(tool_calls) = choice.delta.tool_calls.as_ref() {
                            for tc in tool_calls {
                                let name =
                                    tc.function.as_ref().and_then(|f| f.name.clone());
                                let arguments = tc
                                    .function
                                    .as_ref()
                                    .and_then(|f| f.arguments.clone())
                                    .unwrap_or_default();
                                out.push(StreamEvent::ToolCallDelta { name, arguments });
                            }
                        }
                        out
                    })
                    .unwrap_or_default(),
                Err(e) => vec![StreamEvent::Error(Self::classify(&e).to_string())],
            };
            futures_util::stream::iter(events)
        });

        Ok(Box::pin(mapped))
    }
}
