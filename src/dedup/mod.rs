//! Store-time near-duplicate reconciliation.
//!
//! Every entry entering the store passes through three tiers, in order:
//! an exact normalized-content-hash match (reinforce), a canonical-key
//! match (supersede), and an embedding band over same-subject neighbors
//! where the high band reinforces, the low band inserts, and the middle
//! band is arbitrated by an LLM when one is configured.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::{Entry, hash_normalized};
use crate::embedding::{Embedder, EmbeddingCache};
use crate::error::Result;
use crate::extract::parse::find_json;
use crate::extract::prompt::{ONLINE_DEDUP_SYSTEM_PROMPT, build_arbitration_prompt};
use crate::llm::{ChatRequest, LlmClient};
use crate::storage::SqliteStorage;

/// Cosine similarity at or above which a neighbor is a duplicate.
pub const DEDUP_HIGH: f32 = 0.92;

/// Cosine similarity below which a neighbor is unrelated.
pub const DEDUP_LOW: f32 = 0.72;

/// Neighbors examined per entry.
const NEIGHBOR_K: usize = 5;

/// Attempts per embedding call (first try included).
const MAX_EMBED_ATTEMPTS: u32 = 5;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Chat model for arbitration calls.
    pub model: String,
    /// Treat the middle band as INSERT without calling the LLM.
    pub skip_llm_dedup: bool,
    /// `--force` re-ingest: prior file-owned rows are already deleted,
    /// so the LLM band is skipped entirely.
    pub force: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            model: crate::llm::openai::DEFAULT_CHAT_MODEL.to_string(),
            skip_llm_dedup: false,
            force: false,
        }
    }
}

/// What happened to one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreAction {
    /// Inserted as a new row.
    Added,
    /// Duplicated an existing entry; confirmations bumped.
    Reinforced {
        /// Id of the reinforced entry.
        target: String,
    },
    /// Replaced an older entry.
    Superseded {
        /// Id of the replaced entry.
        old: String,
        /// Id of the inserted replacement.
        new: String,
    },
    /// Folded into an existing entry's content.
    Merged {
        /// Id of the merged-into entry.
        target: String,
    },
    /// Dropped: added nothing over what is stored.
    Skipped,
}

/// Outcome of storing one entry.
#[derive(Debug, Clone)]
pub struct StoreOutcome {
    /// The action taken.
    pub action: StoreAction,
    /// Whether an arbitration LLM call was made.
    pub llm_called: bool,
}

/// Aggregated outcome counters for a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BatchOutcome {
    /// Entries inserted as new rows.
    pub added: usize,
    /// Entries folded into existing rows (merge).
    pub updated: usize,
    /// Entries dropped as duplicates.
    pub skipped: usize,
    /// Entries that replaced an older row.
    pub superseded: usize,
    /// Entries that bumped an existing row's confirmations.
    pub reinforced: usize,
    /// Arbitration LLM calls made.
    pub llm_dedup_calls: usize,
}

impl BatchOutcome {
    /// Folds one store outcome into the counters.
    pub fn absorb(&mut self, outcome: &StoreOutcome) {
        match outcome.action {
            StoreAction::Added => self.added += 1,
            StoreAction::Reinforced { .. } => self.reinforced += 1,
            StoreAction::Superseded { .. } => self.superseded += 1,
            StoreAction::Merged { .. } => self.updated += 1,
            StoreAction::Skipped => self.skipped += 1,
        }
        if outcome.llm_called {
            self.llm_dedup_calls += 1;
        }
    }
}

/// The reconciliation pipeline: embedder + cache + optional arbitration LLM.
pub struct StorePipeline {
    embedder: Arc<dyn Embedder>,
    cache: Arc<tokio::sync::Mutex<EmbeddingCache>>,
    llm: Option<Arc<dyn LlmClient>>,
    config: DedupConfig,
}

impl StorePipeline {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        cache: Arc<tokio::sync::Mutex<EmbeddingCache>>,
        llm: Option<Arc<dyn LlmClient>>,
        config: DedupConfig,
    ) -> Self {
        Self {
            embedder,
            cache,
            llm,
            config,
        }
    }

    /// Stores one entry, reconciling against what is already present.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or when the entry cannot be
    /// embedded; arbitration failures degrade to INSERT.
    pub async fn store_entry(
        &self,
        storage: &mut SqliteStorage,
        mut entry: Entry,
        now: DateTime<Utc>,
    ) -> Result<(StoreOutcome, String)> {
        // Tier 1: exact normalized-content hash, same subject
        if let Some(existing) = storage.find_exact(&entry.subject, &entry.content_hash())? {
            storage.reinforce_entry(&existing.id, &entry.source.file, now)?;
            if !entry.tags.is_empty() {
                storage.merge_tags(&existing.id, &entry.tags, now)?;
            }
            return Ok((
                StoreOutcome {
                    action: StoreAction::Reinforced {
                        target: existing.id.clone(),
                    },
                    llm_called: false,
                },
                existing.id,
            ));
        }

        // Tier 2: canonical key, same subject - the newer content wins
        if let Some(ref key) = entry.canonical_key {
            if let Some(older) = storage.find_canonical(&entry.subject, key)? {
                self.ensure_embedding(&mut entry).await?;
                storage.insert_entry(&entry)?;
                storage.supersede_entry(&older.id, &entry.id, now)?;
                return Ok((
                    StoreOutcome {
                        action: StoreAction::Superseded {
                            old: older.id,
                            new: entry.id.clone(),
                        },
                        llm_called: false,
                    },
                    entry.id,
                ));
            }
        }

        // Tier 3: embedding band over same-subject neighbors
        self.ensure_embedding(&mut entry).await?;
        let neighbors =
            storage.nearest_same_subject(&entry.subject, &entry.embedding, NEIGHBOR_K)?;

        for (neighbor, similarity) in neighbors {
            if similarity >= DEDUP_HIGH {
                storage.reinforce_entry(&neighbor.id, &entry.source.file, now)?;
                if !entry.tags.is_empty() {
                    storage.merge_tags(&neighbor.id, &entry.tags, now)?;
                }
                return Ok((
                    StoreOutcome {
                        action: StoreAction::Reinforced {
                            target: neighbor.id.clone(),
                        },
                        llm_called: false,
                    },
                    neighbor.id,
                ));
            }

            if similarity >= DEDUP_LOW {
                if self.config.force || self.config.skip_llm_dedup {
                    // Middle band degrades to INSERT
                    break;
                }
                let Some(llm) = self.llm.as_ref() else {
                    break;
                };
                let verdict = self
                    .arbitrate(llm.as_ref(), &entry, &neighbor, similarity)
                    .await;
                match verdict {
                    Verdict::Skip => {
                        return Ok((
                            StoreOutcome {
                                action: StoreAction::Skipped,
                                llm_called: true,
                            },
                            neighbor.id,
                        ));
                    }
                    Verdict::Supersede(target) => {
                        storage.insert_entry(&entry)?;
                        storage.supersede_entry(&target, &entry.id, now)?;
                        return Ok((
                            StoreOutcome {
                                action: StoreAction::Superseded {
                                    old: target,
                                    new: entry.id.clone(),
                                },
                                llm_called: true,
                            },
                            entry.id,
                        ));
                    }
                    Verdict::Merge(target, merged_content) => {
                        let hash = hash_normalized(&merged_content);
                        let merged_embedding = self.embed_cached(&merged_content).await.ok();
                        storage.merge_entry(
                            &target,
                            &merged_content,
                            &hash,
                            merged_embedding.as_deref(),
                            now,
                        )?;
                        return Ok((
                            StoreOutcome {
                                action: StoreAction::Merged {
                                    target: target.clone(),
                                },
                                llm_called: true,
                            },
                            target,
                        ));
                    }
                    Verdict::Insert { llm_called } => {
                        storage.insert_entry(&entry)?;
                        return Ok((
                            StoreOutcome {
                                action: StoreAction::Added,
                                llm_called,
                            },
                            entry.id,
                        ));
                    }
                }
            }

            // Below the low band: unrelated, keep scanning
        }

        // Tier 4: genuinely new
        storage.insert_entry(&entry)?;
        Ok((
            StoreOutcome {
                action: StoreAction::Added,
                llm_called: false,
            },
            entry.id,
        ))
    }

    async fn ensure_embedding(&self, entry: &mut Entry) -> Result<()> {
        if !entry.embedding.is_empty() {
            return Ok(());
        }
        entry.embedding = self.embed_cached(&entry.content).await?;
        Ok(())
    }

    async fn embed_cached(&self, text: &str) -> Result<Vec<f32>> {
        {
            let mut cache = self.cache.lock().await;
            if let Some(hit) = cache.get(text) {
                return Ok(hit);
            }
        }

        // Transient provider failures are retried in place per write attempt
        let mut attempt = 0u32;
        let embedding = loop {
            attempt += 1;
            match self.embedder.embed(text).await {
                Ok(v) => break v,
                Err(e) if e.is_transient() && attempt < MAX_EMBED_ATTEMPTS => {
                    tokio::time::sleep(std::time::Duration::from_millis(
                        50 * u64::from(attempt),
                    ))
                    .await;
                }
                Err(e) => return Err(e),
            }
        };
        self.cache.lock().await.insert(text, embedding.clone());
        Ok(embedding)
    }

    /// Asks the arbitration LLM to resolve a middle-band pair. Failures
    /// degrade to INSERT so ambiguous knowledge is kept, not lost.
    async fn arbitrate(
        &self,
        llm: &dyn LlmClient,
        entry: &Entry,
        neighbor: &Entry,
        similarity: f32,
    ) -> Verdict {
        let user = build_arbitration_prompt(entry, neighbor, similarity);
        let request = ChatRequest::new(&self.config.model, ONLINE_DEDUP_SYSTEM_PROMPT, &user);

        match llm.chat(&request).await {
            Ok(response) => parse_verdict(&response.content, &neighbor.id),
            Err(e) => {
                warn!(error = %e, "dedup arbitration failed, inserting");
                Verdict::Insert { llm_called: true }
            }
        }
    }
}

/// Arbitration verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Skip,
    Supersede(String),
    Merge(String, String),
    Insert { llm_called: bool },
}

/// Parses an arbitration response: JSON object first, bare keywords as a
/// fallback. Anything unintelligible becomes INSERT.
fn parse_verdict(content: &str, default_target: &str) -> Verdict {
    if let Some(value) = find_json(content) {
        let action = value
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        let target = value
            .get("target_id")
            .and_then(Value::as_str)
            .unwrap_or(default_target)
            .to_string();
        match action.as_str() {
            "skip" => return Verdict::Skip,
            "supersede" => return Verdict::Supersede(target),
            "merge" => {
                if let Some(merged) = value.get("merged_content").and_then(Value::as_str) {
                    return Verdict::Merge(target, merged.to_string());
                }
                debug!("merge verdict without merged_content, inserting");
                return Verdict::Insert { llm_called: true };
            }
            "insert" => return Verdict::Insert { llm_called: true },
            _ => {}
        }
    }

    let upper = content.trim().to_uppercase();
    if upper.starts_with("SKIP") {
        return Verdict::Skip;
    }
    if upper.starts_with("SUPERSEDE") {
        return Verdict::Supersede(default_target.to_string());
    }
    Verdict::Insert { llm_called: true }
}
