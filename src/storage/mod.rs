//! Storage layer: schema, migrations, and the `SQLite` store.

pub mod schema;
mod sqlite;

pub use sqlite::SqliteStorage;

use serde::Serialize;

use crate::core::{EntryType, Scope};
use chrono::{DateTime, Utc};

/// Default database file name under `$AGENR_HOME`.
pub const DEFAULT_DB_FILE: &str = "agenr.db";

/// Filters applied when selecting the recall candidate set.
///
/// Retired and superseded entries are always excluded; these fields narrow
/// the remaining active set.
#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    /// Restrict to these entry kinds (empty = all).
    pub kinds: Vec<EntryType>,
    /// Keep entries carrying at least one of these tags (empty = all).
    pub tags: Vec<String>,
    /// Restrict to one visibility scope.
    pub scope: Option<Scope>,
    /// Restrict to a project; without `project_strict`, project-less
    /// entries also match.
    pub project: Option<String>,
    /// Require an exact project match.
    pub project_strict: bool,
    /// Exclude entries belonging to this project.
    pub exclude_project: Option<String>,
    /// Restrict to a source platform.
    pub platform: Option<String>,
    /// Minimum importance, inclusive.
    pub min_importance: Option<u8>,
    /// Keep entries created at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Keep entries created at or before this instant.
    pub until: Option<DateTime<Utc>>,
    /// Exclude entries whose `suppressed_contexts` contains this context.
    pub context: Option<String>,
}

/// Aggregate store statistics for the health report.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    /// All rows in the entries table.
    pub total_entries: usize,
    /// Active (non-retired, non-superseded) entries.
    pub active_entries: usize,
    /// Retired entries.
    pub retired_entries: usize,
    /// Superseded entries.
    pub superseded_entries: usize,
    /// Active entry counts grouped by kind.
    pub entries_by_kind: Vec<(String, usize)>,
    /// Files recorded in the ingest log.
    pub ingested_files: usize,
    /// Co-recall edge count.
    pub co_recall_edges: usize,
    /// Current schema version.
    pub schema_version: u32,
    /// Database file size in bytes (None for in-memory).
    pub db_size: Option<u64>,
}
