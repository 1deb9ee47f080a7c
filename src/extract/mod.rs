//! Chunk-level LLM extraction orchestration.
//!
//! Drives the extraction of knowledge entries from a parsed transcript:
//! whole-file or chunked mode, a bounded worker pool, per-chunk retries
//! with full-jitter backoff, an adaptive inter-chunk delay that reacts to
//! rate limiting, best-effort pre-fetch of related memories, and a
//! per-chunk completion callback.

pub mod parse;
pub mod prompt;

pub use parse::{EntryDefaults, ParsedEntries, dedup_exact};

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use rand::Rng;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::core::{Entry, Transcript};
use crate::embedding::{Embedder, EmbeddingCache, cosine_similarity};
use crate::error::{Error, Result};
use crate::llm::{ChatRequest, ChatResponse, LlmClient};
use crate::storage::{CandidateFilter, SqliteStorage};

/// Maximum attempts per chunk (first try included).
pub const MAX_CHUNK_ATTEMPTS: u32 = 5;

/// Base adaptive delay between chunk dispatches.
pub const BASE_CHUNK_DELAY_MS: u64 = 150;

/// Ceiling for the adaptive inter-chunk delay.
const MAX_CHUNK_DELAY_MS: u64 = 5_000;

/// Skip pre-fetch below this many active entries.
pub const PREFETCH_MIN_ENTRIES: usize = 20;

/// Cosine floor for pre-fetched related memories.
pub const PREFETCH_SIMILARITY: f32 = 0.72;

/// Cap on pre-fetched related memories per chunk.
pub const MAX_PREFETCH_RESULTS: usize = 5;

/// Wall-clock bound on the whole pre-fetch step.
pub const PREFETCH_TIMEOUT_MS: u64 = 3_000;

/// Rendered-character ceiling for whole-file auto mode.
pub const WHOLE_FILE_CHAR_BUDGET: usize = 160_000;

/// Whole-file extraction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WholeFileMode {
    /// Whole-file when the transcript fits the context budget.
    #[default]
    Auto,
    /// Always whole-file.
    Force,
    /// Always chunked.
    Never,
}

/// Extractor configuration.
#[derive(Clone)]
pub struct ExtractorConfig {
    /// Chat model for extraction and dedup calls.
    pub model: String,
    /// Whole-file mode selection.
    pub whole_file: WholeFileMode,
    /// Skip the related-memory pre-fetch.
    pub no_prefetch: bool,
    /// Skip the post-extraction dedup LLM call.
    pub no_dedup: bool,
    /// Maximum chunks in flight.
    pub llm_concurrency: usize,
    /// Watch mode always forces chunked extraction.
    pub watch_mode: bool,
    /// Platform tag stamped onto extracted entries.
    pub platform: Option<String>,
    /// Project stamped onto extracted entries.
    pub project: Option<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            model: crate::llm::openai::DEFAULT_CHAT_MODEL.to_string(),
            whole_file: WholeFileMode::Auto,
            no_prefetch: false,
            no_dedup: false,
            llm_concurrency: 4,
            watch_mode: false,
            platform: None,
            project: None,
        }
    }
}

/// Payload delivered to the per-chunk completion callback.
#[derive(Debug, Clone)]
pub struct ChunkCompletion {
    /// Index of the completed chunk.
    pub chunk_index: usize,
    /// Total chunks in this extraction.
    pub total_chunks: usize,
    /// Surviving entries after validation and dedup.
    pub entries: Vec<Entry>,
    /// Warnings raised while parsing this chunk's response.
    pub warnings: Vec<String>,
    /// Validated entry count before dedup.
    pub entries_extracted: usize,
    /// Wall-clock duration of the chunk, milliseconds.
    pub duration_ms: u64,
}

/// Async per-chunk completion callback.
pub type ChunkCallback = Arc<dyn Fn(ChunkCompletion) -> BoxFuture<'static, ()> + Send + Sync>;

/// Injectable retry backoff: attempt number (1-based) to sleep duration.
pub type RetryDelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Aggregate result of one file's extraction.
#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    /// Chunks that produced a completion.
    pub successful_chunks: usize,
    /// Chunks that failed after all retries.
    pub failed_chunks: usize,
    /// Chunks never dispatched because of shutdown.
    pub skipped_chunks: usize,
    /// Validated entries across all completions (pre-dedup).
    pub entries_extracted: usize,
    /// File-level warnings, including per-chunk failure reasons.
    pub warnings: Vec<String>,
    /// True when shutdown interrupted dispatch.
    pub aborted: bool,
    /// True when the whole-file path handled the file.
    pub whole_file_used: bool,
}

/// Read side used by the pre-fetch step.
pub struct PrefetchContext {
    /// Read connection to the store.
    pub storage: Arc<std::sync::Mutex<SqliteStorage>>,
    /// Embedder for chunk text.
    pub embedder: Arc<dyn Embedder>,
    /// Shared text → vector cache.
    pub cache: Arc<tokio::sync::Mutex<EmbeddingCache>>,
}

/// Chunk-level LLM extraction engine.
pub struct Extractor {
    client: Arc<dyn LlmClient>,
    prefetch: Option<Arc<PrefetchContext>>,
    config: ExtractorConfig,
    shutdown: Arc<AtomicBool>,
    retry_delay: RetryDelayFn,
    inter_chunk_delay_ms: Arc<AtomicU64>,
}

/// Full-jitter exponential backoff: uniform over `[0, 500ms * 2^(n-1)]`,
/// capped at 8s.
#[must_use]
pub fn default_retry_delay() -> RetryDelayFn {
    Arc::new(|attempt| {
        let cap = 500u64.saturating_mul(1u64 << attempt.saturating_sub(1).min(4));
        let cap = cap.min(8_000);
        let jittered = rand::rng().random_range(0..=cap);
        Duration::from_millis(jittered)
    })
}

impl Extractor {
    /// Creates an extractor over the given client.
    #[must_use]
    pub fn new(
        client: Arc<dyn LlmClient>,
        prefetch: Option<Arc<PrefetchContext>>,
        config: ExtractorConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            client,
            prefetch,
            config,
            shutdown,
            retry_delay: default_retry_delay(),
            inter_chunk_delay_ms: Arc::new(AtomicU64::new(BASE_CHUNK_DELAY_MS)),
        }
    }

    /// Replaces the retry backoff (used by tests for determinism).
    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: RetryDelayFn) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Extracts entries from a parsed transcript, firing `on_chunk` per
    /// completion. Failures are isolated per chunk and reported in the
    /// outcome instead of failing the call.
    pub async fn extract_file(
        &self,
        file: &Path,
        transcript: &Transcript,
        on_chunk: ChunkCallback,
    ) -> ExtractionOutcome {
        let defaults = EntryDefaults {
            source_file: file.display().to_string(),
            platform: self
                .config
                .platform
                .clone()
                .or_else(|| crate::parser::detect_platform(file).map(String::from)),
            project: self.config.project.as_ref().map(|p| p.to_lowercase()),
        };

        if self.use_whole_file(transcript) {
            match self.extract_whole_file(transcript, &defaults, &on_chunk).await {
                Ok(outcome) => return outcome,
                Err(warning) => {
                    warn!(file = %file.display(), %warning, "whole-file extraction failed, falling back to chunked");
                    let mut outcome = self
                        .extract_chunked(transcript, &defaults, &on_chunk)
                        .await;
                    outcome.warnings.insert(0, warning);
                    return outcome;
                }
            }
        }

        self.extract_chunked(transcript, &defaults, &on_chunk).await
    }

    fn use_whole_file(&self, transcript: &Transcript) -> bool {
        // Watch mode tails files incrementally and always stays chunked
        if self.config.watch_mode {
            return false;
        }
        match self.config.whole_file {
            WholeFileMode::Force => true,
            WholeFileMode::Never => false,
            WholeFileMode::Auto => {
                !transcript.messages.is_empty()
                    && transcript.rendered_chars() <= WHOLE_FILE_CHAR_BUDGET
            }
        }
    }

    /// Whole-file mode: one call over the full message stream. Pre-fetch
    /// and post-extraction dedup are skipped (the model saw full context).
    ///
    /// Returns `Err(warning)` when the response is unusable so the caller
    /// can fall back to chunked mode.
    async fn extract_whole_file(
        &self,
        transcript: &Transcript,
        defaults: &EntryDefaults,
        on_chunk: &ChunkCallback,
    ) -> std::result::Result<ExtractionOutcome, String> {
        let started = Instant::now();
        let rendered: Vec<String> = transcript.messages.iter().map(crate::core::Message::render).collect();
        let user = prompt::build_whole_file_prompt(&rendered.join("\n"));

        let mut request =
            ChatRequest::new(&self.config.model, prompt::EXTRACTION_SYSTEM_PROMPT, &user);
        request.tools.push(prompt::record_entries_tool());

        let response = self
            .chat_with_retries(&request)
            .await
            .map_err(|e| format!("whole-file call failed: {e}"))?;

        let parsed = parse::parse_response(&response, defaults, chrono::Utc::now());
        if parsed.entries.is_empty() && response.tool_calls.is_empty() {
            return Err("whole-file response carried no parseable entries".to_string());
        }

        let entries_extracted = parsed.entries.len();
        let completion = ChunkCompletion {
            chunk_index: 0,
            total_chunks: 1,
            entries: parsed.entries,
            warnings: parsed.warnings.clone(),
            entries_extracted,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        on_chunk(completion).await;

        Ok(ExtractionOutcome {
            successful_chunks: 1,
            failed_chunks: 0,
            skipped_chunks: 0,
            entries_extracted,
            warnings: parsed.warnings,
            aborted: false,
            whole_file_used: true,
        })
    }

    /// Chunked mode: bounded fan-out, completions in any order.
    async fn extract_chunked(
        &self,
        transcript: &Transcript,
        defaults: &EntryDefaults,
        on_chunk: &ChunkCallback,
    ) -> ExtractionOutcome {
        let total_chunks = transcript.chunks.len();
        let semaphore = Arc::new(Semaphore::new(self.config.llm_concurrency.max(1)));
        let mut handles = Vec::with_capacity(total_chunks);
        let mut outcome = ExtractionOutcome::default();

        for (i, chunk) in transcript.chunks.iter().enumerate() {
            if self.shutdown.load(Ordering::SeqCst) {
                outcome.aborted = true;
                outcome.skipped_chunks = total_chunks - i;
                break;
            }

            if i > 0 {
                self.inter_chunk_sleep().await;
            }

            let sem = Arc::clone(&semaphore);
            let chunk = chunk.clone();
            let defaults = defaults.clone();
            let on_chunk = Arc::clone(on_chunk);
            let this = self.clone_handle();

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return Err(format!("chunk {i}: semaphore closed"));
                };
                let started = Instant::now();
                match this.process_chunk(&chunk, &defaults, total_chunks).await {
                    Ok(mut completion) => {
                        completion.duration_ms = started.elapsed().as_millis() as u64;
                        let extracted = completion.entries_extracted;
                        on_chunk(completion).await;
                        Ok(extracted)
                    }
                    Err(e) => Err(format!("chunk {i}: {e}")),
                }
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Ok(extracted)) => {
                    outcome.successful_chunks += 1;
                    outcome.entries_extracted += extracted;
                }
                Ok(Err(warning)) => {
                    outcome.failed_chunks += 1;
                    outcome.warnings.push(warning);
                }
                Err(e) => {
                    outcome.failed_chunks += 1;
                    outcome.warnings.push(format!("chunk task join failed: {e}"));
                }
            }
        }

        outcome
    }

    /// Cheap clone for moving into chunk tasks; all fields are shared.
    fn clone_handle(&self) -> Arc<ExtractorInner> {
        Arc::new(ExtractorInner {
            client: Arc::clone(&self.client),
            prefetch: self.prefetch.clone(),
            config: self.config.clone(),
            retry_delay: Arc::clone(&self.retry_delay),
            inter_chunk_delay_ms: Arc::clone(&self.inter_chunk_delay_ms),
        })
    }

    /// Sleeps the adaptive inter-chunk delay, with a small jitter when
    /// workers run concurrently.
    async fn inter_chunk_sleep(&self) {
        let mut delay = self.inter_chunk_delay_ms.load(Ordering::Relaxed);
        if self.config.llm_concurrency > 1 {
            delay += rand::rng().random_range(0..50);
        }
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    async fn chat_with_retries(&self, request: &ChatRequest) -> Result<ChatResponse> {
        ExtractorInner {
            client: Arc::clone(&self.client),
            prefetch: self.prefetch.clone(),
            config: self.config.clone(),
            retry_delay: Arc::clone(&self.retry_delay),
            inter_chunk_delay_ms: Arc::clone(&self.inter_chunk_delay_ms),
        }
        .chat_with_retries(request)
        .await
    }
}

/// Shared worker state moved into chunk tasks.
struct ExtractorInner {
    client: Arc<dyn LlmClient>,
    prefetch: Option<Arc<PrefetchContext>>,
    config: ExtractorConfig,
    retry_delay: RetryDelayFn,
    inter_chunk_delay_ms: Arc<AtomicU64>,
}

impl ExtractorInner {
    async fn process_chunk(
        &self,
        chunk: &crate::core::TranscriptChunk,
        defaults: &EntryDefaults,
        total_chunks: usize,
    ) -> Result<ChunkCompletion> {
        let related = if self.config.no_prefetch {
            Vec::new()
        } else {
            self.prefetch_related(&chunk.text).await
        };

        let user = prompt::build_chunk_prompt(chunk, &related);
        let mut request =
            ChatRequest::new(&self.config.model, prompt::EXTRACTION_SYSTEM_PROMPT, &user);
        request.tools.push(prompt::record_entries_tool());

        let response = self.chat_with_retries(&request).await?;
        let parsed = parse::parse_response(&response, defaults, chrono::Utc::now());
        let mut warnings = parsed.warnings;
        let entries_extracted = parsed.entries.len();

        let entries = if parsed.entries.len() >= 2 && !self.config.no_dedup {
            self.dedup_entries(parsed.entries, defaults, &mut warnings)
                .await
        } else {
            parsed.entries
        };

        Ok(ChunkCompletion {
            chunk_index: chunk.chunk_index,
            total_chunks,
            entries,
            warnings,
            entries_extracted,
            duration_ms: 0,
        })
    }

    /// Best-effort related-memory lookup; never fails the chunk.
    async fn prefetch_related(&self, chunk_text: &str) -> Vec<Entry> {
        let Some(ctx) = self.prefetch.as_ref() else {
            return Vec::new();
        };

        let lookup = async {
            {
                let storage = ctx.storage.lock().ok()?;
                if storage.active_entry_count().ok()? < PREFETCH_MIN_ENTRIES {
                    return Some(Vec::new());
                }
            }

            let embedding = {
                let mut cache = ctx.cache.lock().await;
                cache.get(chunk_text)
            };
            let embedding = match embedding {
                Some(v) => v,
                None => {
                    let v = ctx.embedder.embed(chunk_text).await.ok()?;
                    ctx.cache.lock().await.insert(chunk_text, v.clone());
                    v
                }
            };

            let candidates = {
                let storage = ctx.storage.lock().ok()?;
                storage.candidates(&CandidateFilter::default()).ok()?
            };
            let mut scored: Vec<(Entry, f32)> = candidates
                .into_iter()
                .filter(|e| !e.embedding.is_empty())
                .map(|e| {
                    let sim = cosine_similarity(&embedding, &e.embedding);
                    (e, sim)
                })
                .filter(|(_, sim)| *sim >= PREFETCH_SIMILARITY)
                .collect();
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(MAX_PREFETCH_RESULTS);
            Some(scored.into_iter().map(|(e, _)| e).collect())
        };

        match tokio::time::timeout(Duration::from_millis(PREFETCH_TIMEOUT_MS), lookup).await {
            Ok(Some(related)) => related,
            Ok(None) => {
                debug!("pre-fetch degraded to empty set");
                Vec::new()
            }
            Err(_) => {
                debug!("pre-fetch timed out");
                Vec::new()
            }
        }
    }

    /// Second LLM pass merging near-duplicates within one chunk. Keeps
    /// the originals when the pass fails or produces nothing.
    async fn dedup_entries(
        &self,
        entries: Vec<Entry>,
        defaults: &EntryDefaults,
        warnings: &mut Vec<String>,
    ) -> Vec<Entry> {
        let user = prompt::build_dedup_prompt(&entries);
        let request = ChatRequest::new(&self.config.model, prompt::DEDUP_SYSTEM_PROMPT, &user);

        match self.client.chat(&request).await {
            Ok(response) => {
                let parsed = parse::parse_dedup_response(&response, defaults, chrono::Utc::now());
                if parsed.entries.is_empty() {
                    warnings.push("dedup pass returned nothing usable, keeping originals".to_string());
                    entries
                } else {
                    warnings.extend(parsed.warnings);
                    parsed.entries
                }
            }
            Err(e) => {
                warnings.push(format!("dedup pass failed, keeping originals: {e}"));
                entries
            }
        }
    }

    async fn chat_with_retries(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.client.chat(request).await {
                Ok(response) => {
                    self.decay_delay();
                    return Ok(response);
                }
                Err(e) if e.is_transient() && attempt < MAX_CHUNK_ATTEMPTS => {
                    if e.is_rate_limit() {
                        self.bump_delay();
                    }
                    let sleep = (self.retry_delay)(attempt);
                    debug!(attempt, delay_ms = sleep.as_millis() as u64, "retrying chunk call");
                    tokio::time::sleep(sleep).await;
                }
                Err(e) => return Err(Error::Llm(e)),
            }
        }
    }

    /// Doubles the inter-chunk delay on observed rate limiting.
    fn bump_delay(&self) {
        let current = self.inter_chunk_delay_ms.load(Ordering::Relaxed);
        self.inter_chunk_delay_ms
            .store((current.saturating_mul(2)).min(MAX_CHUNK_DELAY_MS), Ordering::Relaxed);
    }

    /// Decays the delay toward base after a success.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn decay_delay(&self) {
        let current = self.inter_chunk_delay_ms.load(Ordering::Relaxed);
        let decayed = ((current as f64) * 0.9) as u64;
        self.inter_chunk_delay_ms
            .store(decayed.max(BASE_CHUNK_DELAY_MS), Ordering::Relaxed);
    }
}

/// Convenience adapter turning a plain closure into a [`ChunkCallback`].
#[must_use]
pub fn chunk_callback<F, Fut>(f: F) -> ChunkCallback
where
    F: Fn(ChunkCompletion) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move |completion| f(completion).boxed())
}
