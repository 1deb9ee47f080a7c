//! Hash-projection fallback embedder.
//!
//! Produces deterministic pseudo-embeddings from lexical overlap. Used by
//! the test suite and as a last resort when no embedding provider is
//! configured; similarity reflects shared vocabulary, not semantics.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::Result;
use crate::core::EMBEDDING_DIMENSIONS;
use crate::embedding::Embedder;

/// Deterministic lexical-overlap embedder.
///
/// Projects word and character-trigram hashes into a fixed-width vector
/// and normalizes to unit length, so identical text embeds identically
/// and heavy word overlap lands well above the reinforce band.
pub struct FallbackEmbedder {
    dimensions: usize,
}

impl FallbackEmbedder {
    /// Creates a fallback embedder at the store's configured width.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            dimensions: EMBEDDING_DIMENSIONS,
        }
    }

    /// Creates a fallback embedder with custom dimensions (tests only).
    #[must_use]
    pub const fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn hash_token(s: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        hasher.finish()
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn project(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];

        let normalized: String = text
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c.is_whitespace() {
                    c.to_ascii_lowercase()
                } else {
                    ' '
                }
            })
            .collect();

        // Word-level hashing carries the primary signal
        for word in normalized.split_whitespace() {
            let hash = Self::hash_token(word);
            let idx = (hash as usize) % self.dimensions;
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            let magnitude = 1.0 + ((hash >> 16) & 0xFF) as f32 / 255.0;
            embedding[idx] += sign * magnitude;
        }

        // Character trigrams add fuzz tolerance
        let chars: Vec<char> = normalized.chars().collect();
        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            let hash = Self::hash_token(&trigram);
            let idx = (hash as usize) % self.dimensions;
            let sign = if (hash >> 32) & 1 == 0 { 0.5 } else { -0.5 };
            embedding[idx] += sign;
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for val in &mut embedding {
                *val /= magnitude;
            }
        }

        embedding
    }
}

impl Default for FallbackEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for FallbackEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.project(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[tokio::test]
    async fn test_deterministic() {
        let embedder = FallbackEmbedder::new();
        let a = embedder.embed("prefers NFM financing").await.unwrap();
        let b = embedder.embed("prefers NFM financing").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIMENSIONS);
    }

    #[tokio::test]
    async fn test_unit_length() {
        let embedder = FallbackEmbedder::new();
        let v = embedder.embed("some text to embed").await.unwrap();
        let mag: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((mag - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_overlap_beats_disjoint() {
        let embedder = FallbackEmbedder::new();
        let base = embedder
            .embed("prefers NFM financing for large purchases")
            .await
            .unwrap();
        let near = embedder
            .embed("prefers NFM financing for big purchases")
            .await
            .unwrap();
        let far = embedder
            .embed("kernel scheduler latency regression bisect")
            .await
            .unwrap();
        assert!(cosine_similarity(&base, &near) > cosine_similarity(&base, &far));
    }

    #[tokio::test]
    async fn test_empty_text() {
        let embedder = FallbackEmbedder::new();
        let v = embedder.embed("").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
