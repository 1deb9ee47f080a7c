//! Recall engine: candidate selection, scoring, and post-recall updates.
//!
//! Three execution paths share one filter set: browse (no embedding,
//! importance-first), semantic (query embedding + score composition),
//! and context-only (full composition with a neutral vector term).

pub mod score;
pub mod time;

pub use score::{DEFAULT_AROUND_RADIUS_DAYS, ScoreBreakdown, ScoreContext};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::core::{Entry, EntryType, Scope};
use crate::embedding::{Embedder, EmbeddingCache, cosine_similarity};
use crate::error::{ConfigError, Result};
use crate::storage::{CandidateFilter, SqliteStorage};

/// Default result cap.
pub const DEFAULT_RECALL_LIMIT: usize = 10;

/// Recall counts at which importance auto-strengthens (mirrors storage).
const STRENGTHEN_MILESTONES: [u32; 3] = [3, 10, 25];

/// A recall query.
#[derive(Debug, Clone, Default)]
pub struct RecallQuery {
    /// Semantic query text; empty selects the context-only path.
    pub text: String,
    /// Requesting context (e.g. "session-start"); suppressed entries for
    /// this context are excluded.
    pub context: Option<String>,
    /// Browse mode: no embedding, importance-first ordering.
    pub browse: bool,
    /// Result cap; defaults to [`DEFAULT_RECALL_LIMIT`].
    pub limit: Option<usize>,
    /// Restrict to these entry kinds.
    pub types: Vec<EntryType>,
    /// Restrict to entries carrying at least one of these tags.
    pub tags: Vec<String>,
    /// Restrict to one scope.
    pub scope: Option<Scope>,
    /// Restrict to a project (plus project-less entries unless strict).
    pub project: Option<String>,
    /// Require an exact project match.
    pub project_strict: bool,
    /// Exclude a project.
    pub exclude_project: Option<String>,
    /// Restrict to a platform.
    pub platform: Option<String>,
    /// Minimum importance.
    pub min_importance: Option<u8>,
    /// Created-at floor (ISO or relative).
    pub since: Option<String>,
    /// Created-at ceiling (ISO or relative).
    pub until: Option<String>,
    /// Gaussian temporal target (ISO or relative).
    pub around: Option<String>,
    /// Gaussian radius in days.
    pub around_radius: Option<f64>,
    /// Score by raw cosine only.
    pub no_boost: bool,
    /// Skip post-recall metadata updates.
    pub no_update: bool,
}

/// One ranked recall result.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredEntry {
    /// The entry, reflecting post-recall updates.
    pub entry: Entry,
    /// Final composed score.
    pub score: f64,
    /// Per-term breakdown.
    pub scores: ScoreBreakdown,
}

/// Recall engine over a storage handle and an optional embedder.
pub struct RecallEngine {
    storage: SqliteStorage,
    embedder: Option<Arc<dyn Embedder>>,
    cache: EmbeddingCache,
}

impl RecallEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(storage: SqliteStorage, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self {
            storage,
            embedder,
            cache: EmbeddingCache::default(),
        }
    }

    /// Returns the underlying storage (used by admin commands).
    pub fn storage_mut(&mut self) -> &mut SqliteStorage {
        &mut self.storage
    }

    /// Executes a recall query.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid filters (bad dates, `since > until`,
    /// `no_boost` in browse mode), missing embedder on the semantic path,
    /// or storage failure.
    pub async fn recall(&mut self, query: &RecallQuery, now: DateTime<Utc>) -> Result<Vec<ScoredEntry>> {
        let since = query
            .since
            .as_deref()
            .map(|raw| time::parse_when("since", raw, now))
            .transpose()?;
        let until = query
            .until
            .as_deref()
            .map(|raw| time::parse_when("until", raw, now))
            .transpose()?;
        let around = query
            .around
            .as_deref()
            .map(|raw| time::parse_when("around", raw, now))
            .transpose()?;

        if let (Some(s), Some(u)) = (since, until) {
            if s > u {
                return Err(ConfigError::Invalid {
                    name: "since".to_string(),
                    reason: "since is after until".to_string(),
                }
                .into());
            }
        }
        if query.browse && query.no_boost {
            return Err(ConfigError::Invalid {
                name: "no_boost".to_string(),
                reason: "inapplicable in browse mode".to_string(),
            }
            .into());
        }

        let filter = CandidateFilter {
            kinds: query.types.clone(),
            tags: query.tags.clone(),
            scope: query.scope,
            project: query.project.clone(),
            project_strict: query.project_strict,
            exclude_project: query.exclude_project.clone(),
            platform: query.platform.clone(),
            min_importance: query.min_importance,
            since,
            until,
            context: query.context.clone(),
        };

        let limit = query.limit.unwrap_or(DEFAULT_RECALL_LIMIT).max(1);

        if query.browse {
            return self.browse(&filter, limit, now);
        }

        let effective_now = around.or(until).unwrap_or(now);
        let ctx = ScoreContext {
            now,
            effective_now,
            around,
            around_radius_days: query.around_radius.unwrap_or(DEFAULT_AROUND_RADIUS_DAYS),
            no_boost: query.no_boost,
        };

        let mut results = if query.text.trim().is_empty() {
            self.context_only(&filter, &ctx)?
        } else {
            self.semantic(&query.text, &filter, &ctx).await?
        };

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);

        if !query.no_update {
            self.apply_recall_updates(&mut results, now)?;
        }

        Ok(results)
    }

    /// Path A: browse. Importance-first, creation-time tiebreak, no
    /// embedding, no metadata update.
    fn browse(
        &mut self,
        filter: &CandidateFilter,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScoredEntry>> {
        let mut candidates = self.storage.candidates(filter)?;
        candidates.sort_by(|a, b| {
            b.importance
                .cmp(&a.importance)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        candidates.truncate(limit);

        Ok(candidates
            .into_iter()
            .map(|entry| {
                let score = score::score_browse(&entry, now);
                let (_, scores) = score::score_entry(
                    &entry,
                    1.0,
                    0.0,
                    &ScoreContext {
                        now,
                        effective_now: now,
                        around: None,
                        around_radius_days: DEFAULT_AROUND_RADIUS_DAYS,
                        no_boost: false,
                    },
                );
                ScoredEntry {
                    entry,
                    score,
                    scores,
                }
            })
            .collect())
    }

    /// Path B: semantic recall over the query embedding.
    async fn semantic(
        &mut self,
        text: &str,
        filter: &CandidateFilter,
        ctx: &ScoreContext,
    ) -> Result<Vec<ScoredEntry>> {
        let embedder = self.embedder.as_ref().ok_or_else(|| {
            crate::error::Error::from(ConfigError::Missing {
                name: "embedding provider".to_string(),
            })
        })?;

        let query_embedding = match self.cache.get(text) {
            Some(hit) => hit,
            None => {
                let v = embedder.embed(text).await?;
                self.cache.insert(text, v.clone());
                v
            }
        };

        let fts = self.fts_scores(text)?;
        let candidates = self.storage.candidates(filter)?;
        debug!(candidates = candidates.len(), "semantic recall candidate set");

        Ok(candidates
            .into_iter()
            .map(|entry| {
                let cosine = if entry.embedding.is_empty() {
                    0.0
                } else {
                    f64::from(cosine_similarity(&query_embedding, &entry.embedding))
                };
                let fts_norm = fts.get(&entry.id).copied().unwrap_or(0.0);
                let (score, scores) = score::score_entry(&entry, cosine, fts_norm, ctx);
                ScoredEntry {
                    entry,
                    score,
                    scores,
                }
            })
            .collect())
    }

    /// Path C: context-only recall with a neutral vector term.
    fn context_only(
        &mut self,
        filter: &CandidateFilter,
        ctx: &ScoreContext,
    ) -> Result<Vec<ScoredEntry>> {
        let candidates = self.storage.candidates(filter)?;
        Ok(candidates
            .into_iter()
            .map(|entry| {
                let (score, scores) = score::score_entry(&entry, 1.0, 0.0, ctx);
                ScoredEntry {
                    entry,
                    score,
                    scores,
                }
            })
            .collect())
    }

    fn fts_scores(&self, text: &str) -> Result<HashMap<String, f64>> {
        let hits = self.storage.search_fts(text, 200)?;
        Ok(hits
            .into_iter()
            .map(|(id, raw)| (id, score::normalize_fts(raw)))
            .collect())
    }

    /// Applies post-recall bookkeeping and mirrors it onto the returned
    /// entries: recall counters, interval log, and auto-strengthen.
    fn apply_recall_updates(
        &mut self,
        results: &mut [ScoredEntry],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let ids: Vec<String> = results.iter().map(|r| r.entry.id.clone()).collect();
        self.storage.record_recall(&ids, now)?;

        for result in results {
            let entry = &mut result.entry;
            entry.recall_count += 1;
            if STRENGTHEN_MILESTONES.contains(&entry.recall_count) && entry.importance < 9 {
                entry.importance += 1;
            }
            entry.last_recalled_at = Some(now);
            entry.recall_intervals.push(now.timestamp());
            entry.updated_at = now;
        }
        Ok(())
    }
}
