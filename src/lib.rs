//! # agenr
//!
//! Personal agent memory store.
//!
//! agenr ingests chat-transcript files produced by LLM coding and
//! assistant platforms, extracts durable knowledge entries from them via
//! an LLM, persists them with embeddings in a local `SQLite` database,
//! and answers recall queries ranked by a hybrid memory-strength score.
//!
//! ## Pipeline
//!
//! - **Parse**: transcripts become canonical messages and budgeted chunks
//! - **Extract**: a bounded worker pool drives chunk-level LLM calls with
//!   retries and related-memory pre-fetch
//! - **Store**: a serialized write queue reconciles near-duplicates
//!   (exact hash, canonical key, embedding band, LLM arbitration)
//! - **Recall**: candidates are filtered and scored by recency,
//!   importance, recall strength, freshness, quality, and more

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod cli;
pub mod config;
pub mod core;
pub mod dedup;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod parser;
pub mod queue;
pub mod recall;
pub mod storage;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

// Re-export core domain types
pub use core::{EMBEDDING_DIMENSIONS, Entry, EntrySource, EntryType, Expiry, Scope};

// Re-export storage types
pub use storage::{CandidateFilter, SqliteStorage, StoreStats};

// Re-export pipeline types
pub use dedup::{BatchOutcome, DedupConfig, StorePipeline};
pub use extract::{Extractor, ExtractorConfig, WholeFileMode};
pub use queue::{QueueConfig, WriteQueue};
pub use recall::{RecallEngine, RecallQuery, ScoredEntry};

// Re-export embedding types
pub use embedding::{Embedder, EmbeddingCache, FallbackEmbedder, cosine_similarity};

// Re-export LLM transport types
pub use llm::{ChatRequest, ChatResponse, LlmClient, StreamEvent};

// Re-export CLI types
pub use cli::{Cli, Commands, OutputFormat};
