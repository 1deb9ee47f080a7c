//! `OpenAI`-compatible embedding provider.
//!
//! Wraps the `async-openai` embeddings endpoint. Compatible with any API
//! that follows the `OpenAI` embeddings spec via the base URL override.

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::CreateEmbeddingRequestArgs;
use async_trait::async_trait;

use crate::core::EMBEDDING_DIMENSIONS;
use crate::embedding::Embedder;
use crate::error::{EmbedError, Result};

/// Default embedding model.
pub const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-large";

/// `OpenAI`-compatible embedding client at the store's fixed width.
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    /// Creates an embedder for the given credentials and model.
    #[must_use]
    pub fn new(api_key: &str, base_url: Option<&str>, model: Option<&str>) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(url) = base_url {
            config = config.with_api_base(url);
        }
        Self {
            client: Client::with_config(config),
            model: model.unwrap_or(DEFAULT_EMBED_MODEL).to_string(),
        }
    }

    /// Splits provider failures into retryable and permanent classes.
    fn classify(err: &async_openai::error::OpenAIError) -> EmbedError {
        let message = err.to_string();
        let lowered = message.to_lowercase();
        let transient = lowered.contains("429")
            || lowered.contains("rate limit")
            || lowered.contains("rate_limit")
            || lowered.contains("500")
            || lowered.contains("502")
            || lowered.contains("503")
            || lowered.contains("overloaded")
            || lowered.contains("server_error")
            || lowered.contains("timed out")
            || lowered.contains("connection");
        if transient {
            EmbedError::Transient { message }
        } else {
            EmbedError::Permanent { message }
        }
    }
}

impl std::fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        #[allow(clippy::cast_possible_truncation)]
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(text)
            .dimensions(EMBEDDING_DIMENSIONS as u32)
            .build()
            .map_err(|e| Self::classify(&e))?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| Self::classify(&e))?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbedError::Permanent {
                message: "provider returned no embedding data".to_string(),
            })?;

        if embedding.len() != EMBEDDING_DIMENSIONS {
            return Err(EmbedError::DimensionMismatch {
                expected: EMBEDDING_DIMENSIONS,
                actual: embedding.len(),
            }
            .into());
        }

        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit_as_transient() {
        let err = async_openai::error::OpenAIError::InvalidArgument(
            "429 rate limit exceeded".to_string(),
        );
        assert!(OpenAiEmbedder::classify(&err).is_transient());
    }

    #[test]
    fn test_classify_bad_request_as_permanent() {
        let err =
            async_openai::error::OpenAIError::InvalidArgument("invalid model name".to_string());
        assert!(!OpenAiEmbedder::classify(&err).is_transient());
    }
}
