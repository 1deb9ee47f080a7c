//! Shared test doubles: a directive-driven LLM and a fault-injecting
//! embedder, plus pipeline wiring helpers.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use async_trait::async_trait;

use agenr::dedup::{DedupConfig, StorePipeline};
use agenr::embedding::{Embedder, EmbeddingCache, FallbackEmbedder};
use agenr::error::{EmbedError, LlmError, Result};
use agenr::extract::{Extractor, ExtractorConfig, WholeFileMode};
use agenr::ingest::IngestDriver;
use agenr::llm::{ChatRequest, ChatResponse, LlmClient, TokenUsage, ToolCall};
use agenr::queue::{QueueConfig, WriteQueue};
use agenr::storage::SqliteStorage;

/// LLM double that "extracts" whatever the transcript spells out.
///
/// Any transcript line of the form
/// `FACT: subject | content | importance` becomes one extracted entry,
/// so test fixtures declare their own expected extractions.
pub struct DirectiveLlm;

#[async_trait]
impl LlmClient for DirectiveLlm {
    fn name(&self) -> &'static str {
        "directive"
    }

    async fn chat(&self, request: &ChatRequest) -> std::result::Result<ChatResponse, LlmError> {
        let user = request
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, agenr::llm::ChatRole::User))
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let mut entries = Vec::new();
        for line in user.lines() {
            let Some(idx) = line.find("FACT:") else {
                continue;
            };
            let parts: Vec<&str> = line[idx + 5..].split('|').map(str::trim).collect();
            if parts.len() != 3 {
                continue;
            }
            let importance: u8 = parts[2].parse().unwrap_or(6);
            entries.push(serde_json::json!({
                "type": "fact",
                "subject": parts[0],
                "content": parts[1],
                "importance": importance,
                "expiry": "permanent"
            }));
        }

        Ok(ChatResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "call_1".to_string(),
                name: "record_entries".to_string(),
                arguments: serde_json::json!({ "entries": entries }).to_string(),
            }],
            usage: TokenUsage::default(),
        })
    }

    async fn chat_stream(
        &self,
        _request: &ChatRequest,
    ) -> std::result::Result<agenr::llm::EventStream, LlmError> {
        Err(LlmError::Stream {
            message: "not supported by the directive double".to_string(),
        })
    }
}

/// Embedder that fails with a server error on marked text.
pub struct FailingEmbedder {
    inner: FallbackEmbedder,
    marker: String,
}

impl FailingEmbedder {
    pub fn new(marker: &str) -> Self {
        Self {
            inner: FallbackEmbedder::new(),
            marker: marker.to_string(),
        }
    }
}

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.contains(&self.marker) {
            return Err(EmbedError::Transient {
                message: "embedding provider returned 500".to_string(),
            }
            .into());
        }
        self.inner.embed(text).await
    }
}

/// A fully wired pipeline over a temp home directory.
pub struct TestPipeline {
    pub queue: Arc<WriteQueue>,
    pub driver: IngestDriver,
    pub shutdown: Arc<AtomicBool>,
}

/// Builds a driver over the given home/db with the supplied doubles.
pub fn build_pipeline(
    home: &Path,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LlmClient>,
) -> TestPipeline {
    let db_path = home.join("agenr.db");
    let mut storage = SqliteStorage::open(&db_path).unwrap();
    storage.init().unwrap();

    let cache = Arc::new(tokio::sync::Mutex::new(EmbeddingCache::default()));
    let shutdown = Arc::new(AtomicBool::new(false));

    let pipeline = StorePipeline::new(
        Arc::clone(&embedder),
        cache,
        None,
        DedupConfig::default(),
    );
    let queue = WriteQueue::spawn(
        storage,
        pipeline,
        QueueConfig::default(),
        Arc::clone(&shutdown),
    );

    let extractor = Arc::new(
        Extractor::new(
            llm,
            None,
            ExtractorConfig {
                whole_file: WholeFileMode::Never,
                no_prefetch: true,
                no_dedup: true,
                llm_concurrency: 2,
                ..ExtractorConfig::default()
            },
            Arc::clone(&shutdown),
        )
        .with_retry_delay(Arc::new(|_| std::time::Duration::ZERO)),
    );

    let driver = IngestDriver {
        queue: Arc::clone(&queue),
        extractor,
        home: home.to_path_buf(),
        shutdown: Arc::clone(&shutdown),
    };

    TestPipeline {
        queue,
        driver,
        shutdown,
    }
}

/// Writes a JSONL transcript whose single user message carries the given
/// directive lines.
pub fn write_jsonl(path: &Path, directives: &[&str]) {
    let line = serde_json::json!({ "role": "user", "content": directives.join("\n") });
    std::fs::write(path, format!("{line}\n")).unwrap();
}

/// Writes a markdown transcript carrying the given directive lines.
pub fn write_markdown(path: &Path, directives: &[&str]) {
    std::fs::write(path, format!("# notes\n\n{}\n", directives.join("\n"))).unwrap();
}
