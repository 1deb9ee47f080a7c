//! `SQLite` storage implementation.
//!
//! Provides persistent storage for knowledge entries using `SQLite` with
//! transaction management, migration support, FTS5 full-text search, and
//! embedding vectors stored as f32 blobs.

// SQLite stores all integers as i64. These casts are intentional and safe
// because we only store non-negative values that fit in the target types.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};

use crate::core::{Entry, EntrySource, EntryType, Expiry, Scope};
use crate::embedding::cosine_similarity;
use crate::error::{Result, StorageError};
use crate::storage::schema::{
    CHECK_SCHEMA_SQL, CURRENT_SCHEMA_VERSION, GET_VERSION_SQL, SCHEMA_SQL, SET_VERSION_SQL,
};
use crate::storage::{CandidateFilter, StoreStats};

/// Recall counts at which an entry's importance is bumped by one.
const STRENGTHEN_MILESTONES: [u32; 3] = [3, 10, 25];

/// Importance cap applied by auto-strengthen.
const STRENGTHEN_CAP: u8 = 9;

/// EMA step for quality feedback.
const QUALITY_ALPHA: f64 = 0.3;

/// Hop bound when walking supersede chains. Chains are expected to be
/// short; the bound only guards against corrupt data.
const MAX_SUPERSEDE_HOPS: usize = 10_000;

const ENTRY_COLUMNS: &str = "id, kind, subject, content, canonical_key, importance, expiry, \
     scope, platform, project, tags, source_file, source_context, content_hash, \
     embedding, embedding_dims, recall_count, last_recalled_at, recall_intervals, \
     confirmations, contradictions, quality_score, superseded_by, retired, retired_at, \
     retired_reason, suppressed_contexts, created_at, updated_at";

/// SQLite-based storage for the agent memory store.
///
/// All mutating ingest-path access is expected to be serialized by the
/// write queue; the recall path opens its own WAL connection.
pub struct SqliteStorage {
    /// `SQLite` connection.
    conn: Connection,
    /// Path to the database file (None for in-memory).
    path: Option<PathBuf>,
}

fn epoch(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_epoch(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn json_vec(value: &str) -> Vec<String> {
    serde_json::from_str(value).unwrap_or_default()
}

fn json_i64_vec(value: &str) -> Vec<i64> {
    serde_json::from_str(value).unwrap_or_default()
}

impl SqliteStorage {
    /// Opens or creates a `SQLite` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or configured.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Database(e.to_string()))?;
            }
        }

        let conn = Connection::open(&path).map_err(StorageError::from)?;

        conn.execute("PRAGMA foreign_keys = ON;", [])
            .map_err(StorageError::from)?;

        // WAL mode so the recall path can read while the queue writes
        let _: String = conn
            .query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))
            .map_err(StorageError::from)?;

        Ok(Self {
            conn,
            path: Some(path),
        })
    }

    /// Creates an in-memory `SQLite` database.
    ///
    /// Useful for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StorageError::from)?;
        conn.execute("PRAGMA foreign_keys = ON;", [])
            .map_err(StorageError::from)?;

        Ok(Self { conn, path: None })
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Initializes the schema, running migrations when needed.
    ///
    /// # Errors
    ///
    /// Returns an error if schema creation or migration fails.
    pub fn init(&mut self) -> Result<()> {
        let is_init: i64 = self
            .conn
            .query_row(CHECK_SCHEMA_SQL, [], |row| row.get(0))
            .map_err(StorageError::from)?;

        if is_init == 0 {
            self.conn
                .execute_batch(SCHEMA_SQL)
                .map_err(StorageError::from)?;
            self.set_schema_version(CURRENT_SCHEMA_VERSION)?;
        } else if let Some(current) = self.schema_version()? {
            if current < CURRENT_SCHEMA_VERSION {
                let migrations = crate::storage::schema::get_migrations_from(current);
                for migration in migrations {
                    self.conn
                        .execute_batch(migration.sql)
                        .map_err(|e| StorageError::Migration(e.to_string()))?;
                }
                self.set_schema_version(CURRENT_SCHEMA_VERSION)?;
            }
        }

        Ok(())
    }

    /// Returns true when the schema has been created.
    ///
    /// # Errors
    ///
    /// Returns an error if the check query fails.
    pub fn is_initialized(&self) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(CHECK_SCHEMA_SQL, [], |row| row.get(0))
            .map_err(StorageError::from)?;
        Ok(count > 0)
    }

    /// Gets the current schema version.
    ///
    /// # Errors
    ///
    /// Returns an error if the version query fails.
    pub fn schema_version(&self) -> Result<Option<u32>> {
        let version: Option<String> = self
            .conn
            .query_row(GET_VERSION_SQL, [], |row| row.get(0))
            .optional()
            .map_err(StorageError::from)?;

        Ok(version.and_then(|v| v.parse().ok()))
    }

    fn set_schema_version(&self, version: u32) -> Result<()> {
        self.conn
            .execute(SET_VERSION_SQL, params![version.to_string()])
            .map_err(StorageError::from)?;
        Ok(())
    }

    // ==================== Entry Operations ====================

    /// Inserts a new entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails or the embedding width is wrong.
    pub fn insert_entry(&mut self, entry: &Entry) -> Result<()> {
        let embedding_blob = if entry.embedding.is_empty() {
            None
        } else {
            if entry.embedding.len() != crate::core::EMBEDDING_DIMENSIONS {
                return Err(StorageError::DimensionMismatch {
                    expected: crate::core::EMBEDDING_DIMENSIONS,
                    actual: entry.embedding.len(),
                }
                .into());
            }
            Some(encode_embedding(&entry.embedding))
        };

        let tags = serde_json::to_string(&entry.tags).map_err(StorageError::from)?;
        let suppressed =
            serde_json::to_string(&entry.suppressed_contexts).map_err(StorageError::from)?;
        let intervals =
            serde_json::to_string(&entry.recall_intervals).map_err(StorageError::from)?;

        self.conn
            .execute(
                r"
            INSERT INTO entries (
                id, kind, subject, content, canonical_key, importance, expiry,
                scope, platform, project, tags, source_file, source_context,
                content_hash, embedding, embedding_dims, recall_count,
                last_recalled_at, recall_intervals, confirmations, contradictions,
                quality_score, superseded_by, retired, retired_at, retired_reason,
                suppressed_contexts, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ",
                params![
                    entry.id,
                    entry.kind.as_str(),
                    entry.subject,
                    entry.content,
                    entry.canonical_key,
                    i64::from(entry.importance),
                    entry.expiry.as_str(),
                    entry.scope.as_str(),
                    entry.platform,
                    entry.project,
                    tags,
                    entry.source.file,
                    entry.source.context,
                    entry.content_hash(),
                    embedding_blob,
                    embedding_blob.as_ref().map(|_| entry.embedding.len() as i64),
                    i64::from(entry.recall_count),
                    entry.last_recalled_at.map(epoch),
                    intervals,
                    i64::from(entry.confirmations),
                    i64::from(entry.contradictions),
                    entry.quality_score,
                    entry.superseded_by,
                    i64::from(entry.retired),
                    entry.retired_at.map(epoch),
                    entry.retired_reason,
                    suppressed,
                    epoch(entry.created_at),
                    epoch(entry.updated_at),
                ],
            )
            .map_err(StorageError::from)?;

        Ok(())
    }

    fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entry> {
        let kind: String = row.get(1)?;
        let expiry: String = row.get(6)?;
        let scope: String = row.get(7)?;
        let tags: String = row.get(10)?;
        let intervals: String = row.get(18)?;
        let suppressed: String = row.get(26)?;
        let embedding: Option<Vec<u8>> = row.get(14)?;

        Ok(Entry {
            id: row.get(0)?,
            kind: EntryType::parse(&kind).unwrap_or(EntryType::Fact),
            subject: row.get(2)?,
            content: row.get(3)?,
            canonical_key: row.get(4)?,
            importance: row.get::<_, i64>(5)? as u8,
            expiry: Expiry::parse(&expiry).unwrap_or(Expiry::Permanent),
            scope: Scope::parse(&scope).unwrap_or(Scope::Private),
            platform: row.get(8)?,
            project: row.get(9)?,
            tags: json_vec(&tags),
            source: EntrySource {
                file: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
                context: row.get(12)?,
            },
            embedding: embedding.as_deref().map(decode_embedding).unwrap_or_default(),
            recall_count: row.get::<_, i64>(16)? as u32,
            last_recalled_at: row.get::<_, Option<i64>>(17)?.map(from_epoch),
            recall_intervals: json_i64_vec(&intervals),
            confirmations: row.get::<_, i64>(19)? as u32,
            contradictions: row.get::<_, i64>(20)? as u32,
            quality_score: row.get(21)?,
            superseded_by: row.get(22)?,
            retired: row.get::<_, i64>(23)? != 0,
            retired_at: row.get::<_, Option<i64>>(24)?.map(from_epoch),
            retired_reason: row.get(25)?,
            suppressed_contexts: json_vec(&suppressed),
            created_at: from_epoch(row.get(27)?),
            updated_at: from_epoch(row.get(28)?),
        })
    }

    /// Retrieves an entry by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_entry(&self, id: &str) -> Result<Option<Entry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?");
        let result = self
            .conn
            .query_row(&sql, params![id], Self::row_to_entry)
            .optional()
            .map_err(StorageError::from)?;
        Ok(result)
    }

    /// Counts all entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the count fails.
    pub fn entry_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))
            .map_err(StorageError::from)?;
        Ok(count as usize)
    }

    /// Counts active (non-retired, non-superseded) entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the count fails.
    pub fn active_entry_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM entries WHERE retired = 0 AND superseded_by IS NULL",
                [],
                |row| row.get(0),
            )
            .map_err(StorageError::from)?;
        Ok(count as usize)
    }

    /// Ids of all entries owned by a source file (primary source only).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn entry_ids_for_file(&self, file_path: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM entries WHERE source_file = ?")
            .map_err(StorageError::from)?;
        let ids = stmt
            .query_map(params![file_path], |row| row.get(0))
            .map_err(StorageError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StorageError::from)?;
        Ok(ids)
    }

    /// Counts rows that a `--force` re-ingest of this file would delete.
    ///
    /// # Errors
    ///
    /// Returns an error if the count fails.
    pub fn count_rows_for_file(&self, file_path: &str) -> Result<usize> {
        let entries: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM entries WHERE source_file = ?",
                params![file_path],
                |row| row.get(0),
            )
            .map_err(StorageError::from)?;
        let sources: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM entry_sources WHERE file_path = ?",
                params![file_path],
                |row| row.get(0),
            )
            .map_err(StorageError::from)?;
        let log: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM ingest_log WHERE file_path = ?",
                params![file_path],
                |row| row.get(0),
            )
            .map_err(StorageError::from)?;
        Ok((entries + sources + log) as usize)
    }

    /// Deletes all rows owned by a source file: entries, their reinforcement
    /// links, and the ingest-log row. Used by `--force` re-ingest.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete transaction fails.
    pub fn delete_rows_for_file(&mut self, file_path: &str) -> Result<usize> {
        let tx = self.conn.savepoint().map_err(StorageError::from)?;
        let mut deleted = 0usize;
        // entry_sources rows for owned entries cascade with the entry delete;
        // reinforcement links from this file to other entries go explicitly.
        deleted += tx
            .execute(
                "DELETE FROM entry_sources WHERE file_path = ?",
                params![file_path],
            )
            .map_err(StorageError::from)?;
        deleted += tx
            .execute(
                "DELETE FROM entries WHERE source_file = ?",
                params![file_path],
            )
            .map_err(StorageError::from)?;
        deleted += tx
            .execute(
                "DELETE FROM ingest_log WHERE file_path = ?",
                params![file_path],
            )
            .map_err(StorageError::from)?;
        tx.commit().map_err(StorageError::from)?;
        Ok(deleted)
    }

    // ==================== Dedup Lookups ====================

    /// Finds an active entry with the same subject and normalized-content hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn find_exact(&self, subject: &str, content_hash: &str) -> Result<Option<Entry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries \
             WHERE subject = ? AND content_hash = ? AND retired = 0 AND superseded_by IS NULL \
             LIMIT 1"
        );
        let result = self
            .conn
            .query_row(&sql, params![subject, content_hash], Self::row_to_entry)
            .optional()
            .map_err(StorageError::from)?;
        Ok(result)
    }

    /// Finds an active entry with the same `(subject, canonical_key)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn find_canonical(&self, subject: &str, canonical_key: &str) -> Result<Option<Entry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries \
             WHERE subject = ? AND canonical_key = ? AND retired = 0 AND superseded_by IS NULL \
             LIMIT 1"
        );
        let result = self
            .conn
            .query_row(&sql, params![subject, canonical_key], Self::row_to_entry)
            .optional()
            .map_err(StorageError::from)?;
        Ok(result)
    }

    /// Top-k nearest active neighbors restricted to the same subject,
    /// by cosine similarity over stored embeddings.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan fails.
    pub fn nearest_same_subject(
        &self,
        subject: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<(Entry, f32)>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries \
             WHERE subject = ? AND embedding IS NOT NULL \
               AND retired = 0 AND superseded_by IS NULL"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(StorageError::from)?;
        let rows = stmt
            .query_map(params![subject], Self::row_to_entry)
            .map_err(StorageError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StorageError::from)?;

        let mut scored: Vec<(Entry, f32)> = rows
            .into_iter()
            .map(|entry| {
                let sim = cosine_similarity(embedding, &entry.embedding);
                (entry, sim)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    // ==================== Dedup Mutations ====================

    /// Records a reinforcement: increments confirmations and links the
    /// reinforcing source file, leaving content untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn reinforce_entry(
        &mut self,
        id: &str,
        source_file: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let tx = self.conn.savepoint().map_err(StorageError::from)?;
        let changed = tx
            .execute(
                "UPDATE entries SET confirmations = confirmations + 1, updated_at = ? WHERE id = ?",
                params![epoch(now), id],
            )
            .map_err(StorageError::from)?;
        if changed == 0 {
            return Err(StorageError::EntryNotFound { id: id.to_string() }.into());
        }
        tx.execute(
            "INSERT OR IGNORE INTO entry_sources (entry_id, file_path, added_at) VALUES (?, ?, ?)",
            params![id, source_file, epoch(now)],
        )
        .map_err(StorageError::from)?;
        tx.commit().map_err(StorageError::from)?;
        Ok(())
    }

    /// Marks `old_id` as superseded by `new_id`.
    ///
    /// Refuses links that would close a supersede cycle and bumps the
    /// contradiction counter on the replaced entry.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::SupersedeCycle`] on a cycle-closing link,
    /// or an error if the update fails.
    pub fn supersede_entry(
        &mut self,
        old_id: &str,
        new_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if old_id == new_id {
            return Err(StorageError::SupersedeCycle {
                from: old_id.to_string(),
                to: new_id.to_string(),
            }
            .into());
        }

        // Walk forward from the proposed replacement; reaching old_id
        // means the link would close a cycle.
        let mut cursor = new_id.to_string();
        for _ in 0..MAX_SUPERSEDE_HOPS {
            let next: Option<Option<String>> = self
                .conn
                .query_row(
                    "SELECT superseded_by FROM entries WHERE id = ?",
                    params![cursor],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StorageError::from)?;
            match next.flatten() {
                Some(n) if n == old_id => {
                    return Err(StorageError::SupersedeCycle {
                        from: old_id.to_string(),
                        to: new_id.to_string(),
                    }
                    .into());
                }
                Some(n) => cursor = n,
                None => break,
            }
        }

        let changed = self
            .conn
            .execute(
                "UPDATE entries SET superseded_by = ?, \
                 contradictions = contradictions + 1, updated_at = ? WHERE id = ?",
                params![new_id, epoch(now), old_id],
            )
            .map_err(StorageError::from)?;
        if changed == 0 {
            return Err(StorageError::EntryNotFound {
                id: old_id.to_string(),
            }
            .into());
        }

        debug_assert!(self.supersede_chain_acyclic(old_id).unwrap_or(false));
        Ok(())
    }

    /// Verifies that the supersede chain starting at `id` terminates.
    ///
    /// # Errors
    ///
    /// Returns an error if the walk query fails.
    pub fn supersede_chain_acyclic(&self, id: &str) -> Result<bool> {
        let mut cursor = id.to_string();
        for _ in 0..MAX_SUPERSEDE_HOPS {
            let next: Option<Option<String>> = self
                .conn
                .query_row(
                    "SELECT superseded_by FROM entries WHERE id = ?",
                    params![cursor],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StorageError::from)?;
            match next.flatten() {
                Some(n) if n == id => return Ok(false),
                Some(n) => cursor = n,
                None => return Ok(true),
            }
        }
        Ok(false)
    }

    /// Applies an online-dedup MERGE: replaces the target's content with
    /// the merged sentence, bumps confirmations, and re-embeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn merge_entry(
        &mut self,
        target_id: &str,
        merged_content: &str,
        content_hash: &str,
        embedding: Option<&[f32]>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let blob = embedding.map(encode_embedding);
        let dims = embedding.map(|e| e.len() as i64);
        let changed = self
            .conn
            .execute(
                "UPDATE entries SET content = ?, content_hash = ?, \
                 embedding = COALESCE(?, embedding), \
                 embedding_dims = COALESCE(?, embedding_dims), \
                 confirmations = confirmations + 1, updated_at = ? WHERE id = ?",
                params![merged_content, content_hash, blob, dims, epoch(now), target_id],
            )
            .map_err(StorageError::from)?;
        if changed == 0 {
            return Err(StorageError::EntryNotFound {
                id: target_id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Merges tags into an entry (union, order-preserving).
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn merge_tags(&mut self, id: &str, extra: &[String], now: DateTime<Utc>) -> Result<()> {
        let Some(entry) = self.get_entry(id)? else {
            return Err(StorageError::EntryNotFound { id: id.to_string() }.into());
        };
        let mut tags = entry.tags;
        for tag in extra {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
        let tags_json = serde_json::to_string(&tags).map_err(StorageError::from)?;
        self.conn
            .execute(
                "UPDATE entries SET tags = ?, updated_at = ? WHERE id = ?",
                params![tags_json, epoch(now), id],
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    // ==================== Recall Support ====================

    /// Returns the active candidate set under the given filters.
    ///
    /// Tag matching and context suppression are applied in Rust because
    /// both live in JSON columns.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan fails.
    pub fn candidates(&self, filter: &CandidateFilter) -> Result<Vec<Entry>> {
        let mut sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries \
             WHERE retired = 0 AND superseded_by IS NULL"
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !filter.kinds.is_empty() {
            let placeholders = vec!["?"; filter.kinds.len()].join(", ");
            sql.push_str(&format!(" AND kind IN ({placeholders})"));
            for kind in &filter.kinds {
                args.push(Box::new(kind.as_str().to_string()));
            }
        }
        if let Some(scope) = filter.scope {
            sql.push_str(" AND scope = ?");
            args.push(Box::new(scope.as_str().to_string()));
        }
        if let Some(ref project) = filter.project {
            if filter.project_strict {
                sql.push_str(" AND project = ?");
            } else {
                sql.push_str(" AND (project = ? OR project IS NULL)");
            }
            args.push(Box::new(project.to_lowercase()));
        }
        if let Some(ref excluded) = filter.exclude_project {
            sql.push_str(" AND (project IS NULL OR project != ?)");
            args.push(Box::new(excluded.to_lowercase()));
        }
        if let Some(ref platform) = filter.platform {
            sql.push_str(" AND platform = ?");
            args.push(Box::new(platform.clone()));
        }
        if let Some(min) = filter.min_importance {
            sql.push_str(" AND importance >= ?");
            args.push(Box::new(i64::from(min)));
        }
        if let Some(since) = filter.since {
            sql.push_str(" AND created_at >= ?");
            args.push(Box::new(epoch(since)));
        }
        if let Some(until) = filter.until {
            sql.push_str(" AND created_at <= ?");
            args.push(Box::new(epoch(until)));
        }

        let mut stmt = self.conn.prepare(&sql).map_err(StorageError::from)?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|arg| &**arg)),
                Self::row_to_entry,
            )
            .map_err(StorageError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StorageError::from)?;

        let filtered = rows
            .into_iter()
            .filter(|entry| {
                if !filter.tags.is_empty()
                    && !filter.tags.iter().any(|t| entry.tags.contains(t))
                {
                    return false;
                }
                if let Some(ref ctx) = filter.context {
                    if entry.suppressed_contexts.iter().any(|c| c == ctx) {
                        return false;
                    }
                }
                true
            })
            .collect();

        Ok(filtered)
    }

    /// Performs FTS5 BM25 full-text search over entries.
    ///
    /// Returns entry ids and positive scores (higher is a better match).
    ///
    /// # Errors
    ///
    /// Returns an error if the search fails.
    pub fn search_fts(&self, query: &str, limit: usize) -> Result<Vec<(String, f64)>> {
        // OR-join the terms for forgiving matching, quoting each one so
        // FTS5 operator characters stay literal. Embedded quotes double.
        let mut match_expr = String::new();
        for term in query.split_whitespace() {
            if !match_expr.is_empty() {
                match_expr.push_str(" OR ");
            }
            match_expr.push('"');
            for c in term.chars() {
                if c == '"' {
                    match_expr.push('"');
                }
                match_expr.push(c);
            }
            match_expr.push('"');
        }
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }

        let mut stmt = self
            .conn
            .prepare(
                r"
                SELECT e.id, -bm25(entries_fts) AS score
                FROM entries_fts
                JOIN entries e ON e.rowid = entries_fts.rowid
                WHERE entries_fts MATCH ?
                ORDER BY score DESC
                LIMIT ?
            ",
            )
            .map_err(StorageError::from)?;

        let results = stmt
            .query_map(params![match_expr, limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })
            .map_err(StorageError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StorageError::from)?;

        Ok(results)
    }

    /// Records an active recall of the given entries: bumps `recall_count`,
    /// sets `last_recalled_at`, appends `now` to the interval log, and
    /// applies auto-strengthen at the 3/10/25 milestones (importance +1,
    /// capped at 9, only when the previous importance was below 9).
    ///
    /// # Errors
    ///
    /// Returns an error if the update transaction fails.
    pub fn record_recall(&mut self, ids: &[String], now: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let tx = self.conn.savepoint().map_err(StorageError::from)?;
        {
            let sql = "SELECT recall_count, importance, recall_intervals FROM entries WHERE id = ?";
            for id in ids {
                let row: Option<(i64, i64, String)> = tx
                    .query_row(sql, params![id], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })
                    .optional()
                    .map_err(StorageError::from)?;
                let Some((count, importance, intervals)) = row else {
                    continue;
                };
                let new_count = (count as u32) + 1;
                let mut new_importance = importance as u8;
                if STRENGTHEN_MILESTONES.contains(&new_count) && new_importance < STRENGTHEN_CAP {
                    new_importance += 1;
                }
                let mut log = json_i64_vec(&intervals);
                log.push(epoch(now));
                let log_json = serde_json::to_string(&log).map_err(StorageError::from)?;
                tx.execute(
                    "UPDATE entries SET recall_count = ?, importance = ?, \
                     last_recalled_at = ?, recall_intervals = ?, updated_at = ? WHERE id = ?",
                    params![
                        i64::from(new_count),
                        i64::from(new_importance),
                        epoch(now),
                        log_json,
                        epoch(now),
                        id
                    ],
                )
                .map_err(StorageError::from)?;
            }
        }
        tx.commit().map_err(StorageError::from)?;
        Ok(())
    }

    /// Applies a quality feedback signal as an EMA step.
    ///
    /// Positive signals pull toward 1.0; negative signals pull toward 0.0
    /// but never below the per-type floor.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry is missing or the update fails.
    pub fn record_feedback(&mut self, id: &str, positive: bool, now: DateTime<Utc>) -> Result<f64> {
        let Some(entry) = self.get_entry(id)? else {
            return Err(StorageError::EntryNotFound { id: id.to_string() }.into());
        };
        let current = entry.effective_quality();
        let target = if positive { 1.0 } else { 0.0 };
        let mut updated = (1.0 - QUALITY_ALPHA).mul_add(current, QUALITY_ALPHA * target);
        updated = updated.clamp(0.0, 1.0);
        if !positive {
            updated = updated.max(entry.kind.quality_floor());
        }
        self.conn
            .execute(
                "UPDATE entries SET quality_score = ?, updated_at = ? WHERE id = ?",
                params![updated, epoch(now), id],
            )
            .map_err(StorageError::from)?;
        Ok(updated)
    }

    /// Hard-hides an entry with an audit reason.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn retire_entry(&mut self, id: &str, reason: &str, now: DateTime<Utc>) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE entries SET retired = 1, retired_at = ?, retired_reason = ?, \
                 updated_at = ? WHERE id = ?",
                params![epoch(now), reason, epoch(now), id],
            )
            .map_err(StorageError::from)?;
        if changed == 0 {
            return Err(StorageError::EntryNotFound { id: id.to_string() }.into());
        }
        Ok(())
    }

    /// Adds a context to an entry's suppressed set.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn suppress_context(&mut self, id: &str, context: &str, now: DateTime<Utc>) -> Result<()> {
        let Some(entry) = self.get_entry(id)? else {
            return Err(StorageError::EntryNotFound { id: id.to_string() }.into());
        };
        let mut contexts = entry.suppressed_contexts;
        if !contexts.iter().any(|c| c == context) {
            contexts.push(context.to_string());
        }
        let json = serde_json::to_string(&contexts).map_err(StorageError::from)?;
        self.conn
            .execute(
                "UPDATE entries SET suppressed_contexts = ?, updated_at = ? WHERE id = ?",
                params![json, epoch(now), id],
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    // ==================== Ingest Bookkeeping ====================

    /// True when the file at this content hash has been fully ingested.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub fn is_ingested(&self, file_path: &str, content_hash: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM ingest_log WHERE file_path = ? AND content_hash = ?",
                params![file_path, content_hash],
                |row| row.get(0),
            )
            .map_err(StorageError::from)?;
        Ok(count > 0)
    }

    /// Records a fully ingested file. Replaces any stale hash for the path.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn record_ingested(
        &mut self,
        file_path: &str,
        content_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO ingest_log (file_path, content_hash, ingested_at) \
                 VALUES (?, ?, ?)",
                params![file_path, content_hash, epoch(now)],
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Counts ingest-log rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the count fails.
    pub fn ingested_file_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM ingest_log", [], |row| row.get(0))
            .map_err(StorageError::from)?;
        Ok(count as usize)
    }

    /// Creates or increments undirected co-extraction edges.
    ///
    /// Pairs are normalized so `entry_a < entry_b`.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert transaction fails.
    pub fn upsert_co_recall_edges(&mut self, pairs: &[(String, String)]) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let tx = self.conn.savepoint().map_err(StorageError::from)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO co_recall_edges (entry_a, entry_b, count) VALUES (?, ?, 1) \
                     ON CONFLICT(entry_a, entry_b) DO UPDATE SET count = count + 1",
                )
                .map_err(StorageError::from)?;
            for (a, b) in pairs {
                if a == b {
                    continue;
                }
                let (lo, hi) = if a < b { (a, b) } else { (b, a) };
                stmt.execute(params![lo, hi]).map_err(StorageError::from)?;
            }
        }
        tx.commit().map_err(StorageError::from)?;
        Ok(())
    }

    /// Counts co-recall edges.
    ///
    /// # Errors
    ///
    /// Returns an error if the count fails.
    pub fn co_recall_edge_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM co_recall_edges", [], |row| row.get(0))
            .map_err(StorageError::from)?;
        Ok(count as usize)
    }

    // ==================== Savepoints ====================
    //
    // Named savepoints give the write queue per-push-group atomicity.
    // They nest with the savepoint-based mutators above.

    /// Opens a named savepoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub fn begin_savepoint(&self, name: &str) -> Result<()> {
        self.conn
            .execute_batch(&format!("SAVEPOINT {name};"))
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Releases (commits) a named savepoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub fn release_savepoint(&self, name: &str) -> Result<()> {
        self.conn
            .execute_batch(&format!("RELEASE {name};"))
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Rolls back to and releases a named savepoint, undoing its writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub fn rollback_savepoint(&self, name: &str) -> Result<()> {
        self.conn
            .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name};"))
            .map_err(StorageError::from)?;
        Ok(())
    }

    // ==================== Health ====================

    /// Aggregate statistics for the health report.
    ///
    /// # Errors
    ///
    /// Returns an error if any count fails.
    pub fn stats(&self) -> Result<StoreStats> {
        let total = self.entry_count()?;
        let active = self.active_entry_count()?;
        let retired: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries WHERE retired = 1", [], |row| {
                row.get(0)
            })
            .map_err(StorageError::from)?;
        let superseded: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM entries WHERE superseded_by IS NOT NULL",
                [],
                |row| row.get(0),
            )
            .map_err(StorageError::from)?;

        let mut by_kind = Vec::new();
        let mut stmt = self
            .conn
            .prepare(
                "SELECT kind, COUNT(*) FROM entries \
                 WHERE retired = 0 AND superseded_by IS NULL GROUP BY kind ORDER BY kind",
            )
            .map_err(StorageError::from)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(StorageError::from)?;
        for row in rows {
            let (kind, count) = row.map_err(StorageError::from)?;
            by_kind.push((kind, count as usize));
        }

        let db_size = self
            .path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok().map(|m| m.len()));

        Ok(StoreStats {
            total_entries: total,
            active_entries: active,
            retired_entries: retired as usize,
            superseded_entries: superseded as usize,
            entries_by_kind: by_kind,
            ingested_files: self.ingested_file_count()?,
            co_recall_edges: self.co_recall_edge_count()?,
            schema_version: self.schema_version()?.unwrap_or(0),
            db_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EntryType;

    fn setup() -> SqliteStorage {
        let mut storage = SqliteStorage::in_memory().unwrap();
        storage.init().unwrap();
        storage
    }

    fn entry(subject: &str, content: &str) -> Entry {
        Entry::new(
            EntryType::Fact,
            subject,
            content,
            6,
            Expiry::Permanent,
            Utc::now(),
        )
    }

    fn embedded(subject: &str, content: &str, seed: f32) -> Entry {
        let mut e = entry(subject, content);
        let mut vec = vec![0.0f32; crate::core::EMBEDDING_DIMENSIONS];
        vec[0] = seed;
        vec[1] = 1.0 - seed;
        e.embedding = vec;
        e
    }

    #[test]
    fn test_init_idempotent() {
        let mut storage = SqliteStorage::in_memory().unwrap();
        assert!(storage.init().is_ok());
        assert!(storage.init().is_ok());
        assert!(storage.is_initialized().unwrap());
        assert_eq!(
            storage.schema_version().unwrap(),
            Some(CURRENT_SCHEMA_VERSION)
        );
    }

    #[test]
    fn test_entry_round_trip() {
        let mut storage = setup();
        let mut e = entry("editor", "Uses helix with a custom keymap for all editing");
        e.tags = vec!["tools".to_string(), "editor".to_string()];
        e.canonical_key = Some("editor-choice".to_string());
        e.platform = Some("claude-code".to_string());
        e.project = Some("dotfiles".to_string());
        e.source = EntrySource {
            file: "/tmp/a.jsonl".to_string(),
            context: Some("editor setup".to_string()),
        };
        storage.insert_entry(&e).unwrap();

        let loaded = storage.get_entry(&e.id).unwrap().unwrap();
        assert_eq!(loaded.subject, "editor");
        assert_eq!(loaded.tags, e.tags);
        assert_eq!(loaded.canonical_key, e.canonical_key);
        assert_eq!(loaded.platform, e.platform);
        assert_eq!(loaded.source.file, "/tmp/a.jsonl");
        assert_eq!(loaded.kind, EntryType::Fact);
        assert!(loaded.is_active());
    }

    #[test]
    fn test_insert_rejects_wrong_dimension() {
        let mut storage = setup();
        let mut e = entry("x", "some long enough content for a valid entry");
        e.embedding = vec![1.0, 2.0, 3.0];
        let err = storage.insert_entry(&e).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Storage(StorageError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_embedding_round_trip() {
        let mut storage = setup();
        let e = embedded("x", "embedding survives a round trip through the blob", 0.25);
        storage.insert_entry(&e).unwrap();
        let loaded = storage.get_entry(&e.id).unwrap().unwrap();
        assert_eq!(loaded.embedding.len(), crate::core::EMBEDDING_DIMENSIONS);
        assert!((loaded.embedding[0] - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn test_find_exact_ignores_inactive() {
        let mut storage = setup();
        let e = entry("deploys", "Prefers blue-green deploys for the api service");
        storage.insert_entry(&e).unwrap();

        let found = storage
            .find_exact("deploys", &e.content_hash())
            .unwrap()
            .unwrap();
        assert_eq!(found.id, e.id);

        storage.retire_entry(&e.id, "stale", Utc::now()).unwrap();
        assert!(
            storage
                .find_exact("deploys", &e.content_hash())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_canonical_lookup() {
        let mut storage = setup();
        let mut e = entry("editor", "Uses helix as the daily driver editor");
        e.canonical_key = Some("editor-choice".to_string());
        storage.insert_entry(&e).unwrap();

        assert!(
            storage
                .find_canonical("editor", "editor-choice")
                .unwrap()
                .is_some()
        );
        assert!(storage.find_canonical("editor", "other").unwrap().is_none());
    }

    #[test]
    fn test_nearest_same_subject_orders_by_similarity() {
        let mut storage = setup();
        let a = embedded("work", "Ships the billing service at work every sprint", 1.0);
        let b = embedded("work", "Works on the billing service most days", 0.9);
        let c = embedded("home", "Renovating the kitchen at home this spring", 1.0);
        storage.insert_entry(&a).unwrap();
        storage.insert_entry(&b).unwrap();
        storage.insert_entry(&c).unwrap();

        let mut probe = vec![0.0f32; crate::core::EMBEDDING_DIMENSIONS];
        probe[0] = 1.0;
        let neighbors = storage.nearest_same_subject("work", &probe, 10).unwrap();
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].0.id, a.id);
        assert!(neighbors[0].1 > neighbors[1].1);
    }

    #[test]
    fn test_reinforce() {
        let mut storage = setup();
        let e = entry("deploys", "Prefers blue-green deploys for the api service");
        storage.insert_entry(&e).unwrap();
        storage
            .reinforce_entry(&e.id, "/tmp/b.jsonl", Utc::now())
            .unwrap();
        storage
            .reinforce_entry(&e.id, "/tmp/b.jsonl", Utc::now())
            .unwrap();

        let loaded = storage.get_entry(&e.id).unwrap().unwrap();
        assert_eq!(loaded.confirmations, 2);
    }

    #[test]
    fn test_supersede_and_cycle_refusal() {
        let mut storage = setup();
        let old = entry("editor", "Uses vim with a heavy plugin setup daily");
        let new = entry("editor", "Switched from vim to helix as the daily editor");
        storage.insert_entry(&old).unwrap();
        storage.insert_entry(&new).unwrap();

        storage
            .supersede_entry(&old.id, &new.id, Utc::now())
            .unwrap();
        let loaded = storage.get_entry(&old.id).unwrap().unwrap();
        assert_eq!(loaded.superseded_by, Some(new.id.clone()));
        assert_eq!(loaded.contradictions, 1);
        assert!(!loaded.is_active());

        // Closing the cycle must be refused
        let err = storage
            .supersede_entry(&new.id, &old.id, Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Storage(StorageError::SupersedeCycle { .. })
        ));
        assert!(storage.supersede_chain_acyclic(&old.id).unwrap());
    }

    #[test]
    fn test_supersede_self_refused() {
        let mut storage = setup();
        let e = entry("x", "an entry cannot replace itself in the chain");
        storage.insert_entry(&e).unwrap();
        assert!(storage.supersede_entry(&e.id, &e.id, Utc::now()).is_err());
    }

    #[test]
    fn test_merge_entry_updates_content() {
        let mut storage = setup();
        let e = entry("deploys", "Prefers blue-green deploys for the api service");
        storage.insert_entry(&e).unwrap();

        let merged = "Prefers blue-green deploys for api and worker services";
        let hash = crate::core::hash_normalized(merged);
        storage
            .merge_entry(&e.id, merged, &hash, None, Utc::now())
            .unwrap();

        let loaded = storage.get_entry(&e.id).unwrap().unwrap();
        assert_eq!(loaded.content, merged);
        assert_eq!(loaded.confirmations, 1);
    }

    #[test]
    fn test_candidates_filters() {
        let mut storage = setup();
        let mut a = entry("work", "Ships the billing service at work every sprint");
        a.importance = 8;
        a.project = Some("billing".to_string());
        let mut b = entry("home", "Renovating the kitchen at home this spring");
        b.importance = 5;
        b.scope = Scope::Personal;
        let mut c = entry("work", "Old fact that has since been superseded twice");
        c.superseded_by = Some("gone".to_string());
        storage.insert_entry(&a).unwrap();
        storage.insert_entry(&b).unwrap();
        storage.insert_entry(&c).unwrap();

        let all = storage.candidates(&CandidateFilter::default()).unwrap();
        assert_eq!(all.len(), 2); // superseded excluded

        let important = storage
            .candidates(&CandidateFilter {
                min_importance: Some(6),
                ..CandidateFilter::default()
            })
            .unwrap();
        assert_eq!(important.len(), 1);
        assert_eq!(important[0].id, a.id);

        let strict = storage
            .candidates(&CandidateFilter {
                project: Some("billing".to_string()),
                project_strict: true,
                ..CandidateFilter::default()
            })
            .unwrap();
        assert_eq!(strict.len(), 1);

        // Non-strict project also includes project-less entries
        let loose = storage
            .candidates(&CandidateFilter {
                project: Some("billing".to_string()),
                ..CandidateFilter::default()
            })
            .unwrap();
        assert_eq!(loose.len(), 2);

        let personal = storage
            .candidates(&CandidateFilter {
                scope: Some(Scope::Personal),
                ..CandidateFilter::default()
            })
            .unwrap();
        assert_eq!(personal.len(), 1);
        assert_eq!(personal[0].id, b.id);
    }

    #[test]
    fn test_candidates_context_suppression() {
        let mut storage = setup();
        let mut a = entry("x", "Suppressed for session start but otherwise fine");
        a.suppressed_contexts = vec!["session-start".to_string()];
        let b = entry("y", "Visible everywhere including session start hooks");
        storage.insert_entry(&a).unwrap();
        storage.insert_entry(&b).unwrap();

        let visible = storage
            .candidates(&CandidateFilter {
                context: Some("session-start".to_string()),
                ..CandidateFilter::default()
            })
            .unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, b.id);
    }

    #[test]
    fn test_fts_search() {
        let mut storage = setup();
        let a = entry("financing", "Prefers NFM financing for large purchases");
        let b = entry("editor", "Uses helix as the daily driver editor");
        storage.insert_entry(&a).unwrap();
        storage.insert_entry(&b).unwrap();

        let hits = storage.search_fts("financing", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, a.id);

        let none = storage.search_fts("zzzmissing", 10).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_record_recall_and_auto_strengthen() {
        let mut storage = setup();
        let mut e = entry("work", "Ships the billing service at work every sprint");
        e.importance = 7;
        storage.insert_entry(&e).unwrap();
        let ids = vec![e.id.clone()];

        storage.record_recall(&ids, Utc::now()).unwrap();
        storage.record_recall(&ids, Utc::now()).unwrap();
        let loaded = storage.get_entry(&e.id).unwrap().unwrap();
        assert_eq!(loaded.recall_count, 2);
        assert_eq!(loaded.importance, 7);
        assert_eq!(loaded.recall_intervals.len(), 2);

        // 2 -> 3 milestone bumps importance
        storage.record_recall(&ids, Utc::now()).unwrap();
        let loaded = storage.get_entry(&e.id).unwrap().unwrap();
        assert_eq!(loaded.recall_count, 3);
        assert_eq!(loaded.importance, 8);
        assert!(loaded.last_recalled_at.is_some());

        // 4..=9 do not bump; 10 does, reaching the cap
        for _ in 4..=9 {
            storage.record_recall(&ids, Utc::now()).unwrap();
        }
        assert_eq!(storage.get_entry(&e.id).unwrap().unwrap().importance, 8);
        storage.record_recall(&ids, Utc::now()).unwrap();
        let loaded = storage.get_entry(&e.id).unwrap().unwrap();
        assert_eq!(loaded.recall_count, 10);
        assert_eq!(loaded.importance, 9);

        // 25 milestone with importance already 9 stays capped
        for _ in 11..=25 {
            storage.record_recall(&ids, Utc::now()).unwrap();
        }
        assert_eq!(storage.get_entry(&e.id).unwrap().unwrap().importance, 9);
    }

    #[test]
    fn test_feedback_ema_and_floors() {
        let mut storage = setup();
        let e = entry("x", "A fact whose quality gets judged repeatedly");
        storage.insert_entry(&e).unwrap();

        let q = storage.record_feedback(&e.id, true, Utc::now()).unwrap();
        assert!(q > 0.5 && q <= 1.0);

        // Repeated negative signals approach but never cross the fact floor
        let mut last = q;
        for _ in 0..20 {
            last = storage.record_feedback(&e.id, false, Utc::now()).unwrap();
        }
        assert!((last - 0.35).abs() < 1e-9);

        let lesson = Entry::new(
            EntryType::Lesson,
            "ci",
            "Lesson learned about flaky integration tests in ci",
            6,
            Expiry::Permanent,
            Utc::now(),
        );
        storage.insert_entry(&lesson).unwrap();
        let mut last = 0.5;
        for _ in 0..30 {
            last = storage
                .record_feedback(&lesson.id, false, Utc::now())
                .unwrap();
        }
        assert!((last - 0.10).abs() < 1e-9);
    }

    #[test]
    fn test_ingest_log_round_trip() {
        let mut storage = setup();
        assert!(!storage.is_ingested("/tmp/a.jsonl", "h1").unwrap());
        storage
            .record_ingested("/tmp/a.jsonl", "h1", Utc::now())
            .unwrap();
        assert!(storage.is_ingested("/tmp/a.jsonl", "h1").unwrap());
        // Same path, new hash: old row replaced
        storage
            .record_ingested("/tmp/a.jsonl", "h2", Utc::now())
            .unwrap();
        assert!(!storage.is_ingested("/tmp/a.jsonl", "h1").unwrap());
        assert!(storage.is_ingested("/tmp/a.jsonl", "h2").unwrap());
        assert_eq!(storage.ingested_file_count().unwrap(), 1);
    }

    #[test]
    fn test_force_cleanup_deletes_owned_rows() {
        let mut storage = setup();
        let mut a = entry("x", "An entry owned by the force-cleaned source file");
        a.source.file = "/tmp/a.jsonl".to_string();
        let mut b = entry("y", "An entry owned by an unrelated transcript file");
        b.source.file = "/tmp/b.jsonl".to_string();
        storage.insert_entry(&a).unwrap();
        storage.insert_entry(&b).unwrap();
        storage
            .reinforce_entry(&b.id, "/tmp/a.jsonl", Utc::now())
            .unwrap();
        storage
            .record_ingested("/tmp/a.jsonl", "h1", Utc::now())
            .unwrap();

        let would_delete = storage.count_rows_for_file("/tmp/a.jsonl").unwrap();
        assert_eq!(would_delete, 3); // entry + reinforcement link + log row

        let deleted = storage.delete_rows_for_file("/tmp/a.jsonl").unwrap();
        assert_eq!(deleted, 3);
        assert!(storage.get_entry(&a.id).unwrap().is_none());
        assert!(storage.get_entry(&b.id).unwrap().is_some());
        assert!(!storage.is_ingested("/tmp/a.jsonl", "h1").unwrap());
    }

    #[test]
    fn test_co_recall_edges_normalized() {
        let mut storage = setup();
        storage
            .upsert_co_recall_edges(&[
                ("b".to_string(), "a".to_string()),
                ("a".to_string(), "b".to_string()),
                ("a".to_string(), "a".to_string()),
            ])
            .unwrap();
        assert_eq!(storage.co_recall_edge_count().unwrap(), 1);
    }

    #[test]
    fn test_stats() {
        let mut storage = setup();
        let a = entry("x", "An active fact counted in health statistics");
        let mut b = entry("y", "A retired fact excluded from the active count");
        b.retired = true;
        storage.insert_entry(&a).unwrap();
        storage.insert_entry(&b).unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.active_entries, 1);
        assert_eq!(stats.retired_entries, 1);
        assert_eq!(stats.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(stats.entries_by_kind, vec![("fact".to_string(), 1)]);
    }
}
