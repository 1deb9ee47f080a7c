//! Database schema definitions.
//!
//! Contains SQL schema and migration logic for the agenr `SQLite` database.

/// Current schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// SQL schema for initial database setup.
pub const SCHEMA_SQL: &str = r"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_info (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Knowledge entries
CREATE TABLE IF NOT EXISTS entries (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    subject TEXT NOT NULL,
    content TEXT NOT NULL,
    canonical_key TEXT,
    importance INTEGER NOT NULL,
    expiry TEXT NOT NULL,
    scope TEXT NOT NULL DEFAULT 'private',
    platform TEXT,
    project TEXT,
    tags TEXT NOT NULL DEFAULT '[]',          -- JSON array
    source_file TEXT,
    source_context TEXT,
    content_hash TEXT NOT NULL,
    embedding BLOB,                           -- f32 array serialized as bytes
    embedding_dims INTEGER,
    recall_count INTEGER NOT NULL DEFAULT 0,
    last_recalled_at INTEGER,
    recall_intervals TEXT NOT NULL DEFAULT '[]',  -- JSON array of epoch seconds
    confirmations INTEGER NOT NULL DEFAULT 0,
    contradictions INTEGER NOT NULL DEFAULT 0,
    quality_score REAL,
    superseded_by TEXT,
    retired INTEGER NOT NULL DEFAULT 0,
    retired_at INTEGER,
    retired_reason TEXT,
    suppressed_contexts TEXT NOT NULL DEFAULT '[]',  -- JSON array
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Dedup lookups
CREATE INDEX IF NOT EXISTS idx_entries_subject ON entries(subject);
CREATE INDEX IF NOT EXISTS idx_entries_hash ON entries(content_hash);
CREATE INDEX IF NOT EXISTS idx_entries_canonical ON entries(subject, canonical_key)
    WHERE canonical_key IS NOT NULL;

-- Candidate-set scans (active = not retired, not superseded)
CREATE INDEX IF NOT EXISTS idx_entries_active ON entries(retired, superseded_by);

-- Force-cleanup by source file
CREATE INDEX IF NOT EXISTS idx_entries_source ON entries(source_file);

-- Ingest bookkeeping: present iff the file at that content hash is fully stored
CREATE TABLE IF NOT EXISTS ingest_log (
    file_path TEXT PRIMARY KEY,
    content_hash TEXT NOT NULL,
    ingested_at INTEGER NOT NULL
);

-- Additional source files that reinforced an entry
CREATE TABLE IF NOT EXISTS entry_sources (
    entry_id TEXT NOT NULL,
    file_path TEXT NOT NULL,
    added_at INTEGER NOT NULL,
    PRIMARY KEY (entry_id, file_path),
    FOREIGN KEY (entry_id) REFERENCES entries(id) ON DELETE CASCADE
);

-- Undirected co-extraction pairs, normalized entry_a < entry_b
CREATE TABLE IF NOT EXISTS co_recall_edges (
    entry_a TEXT NOT NULL,
    entry_b TEXT NOT NULL,
    count INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (entry_a, entry_b)
);

-- FTS5 virtual table for BM25 full-text search over entries (v2)
CREATE VIRTUAL TABLE IF NOT EXISTS entries_fts USING fts5(
    subject,
    content,
    content='entries',
    content_rowid='rowid',
    tokenize='porter unicode61'
);

-- Triggers to keep FTS5 index in sync with the entries table (v2)
CREATE TRIGGER IF NOT EXISTS entries_ai AFTER INSERT ON entries BEGIN
    INSERT INTO entries_fts(rowid, subject, content)
    VALUES (new.rowid, new.subject, new.content);
END;

CREATE TRIGGER IF NOT EXISTS entries_ad AFTER DELETE ON entries BEGIN
    INSERT INTO entries_fts(entries_fts, rowid, subject, content)
    VALUES ('delete', old.rowid, old.subject, old.content);
END;

CREATE TRIGGER IF NOT EXISTS entries_au AFTER UPDATE ON entries BEGIN
    INSERT INTO entries_fts(entries_fts, rowid, subject, content)
    VALUES ('delete', old.rowid, old.subject, old.content);
    INSERT INTO entries_fts(rowid, subject, content)
    VALUES (new.rowid, new.subject, new.content);
END;
";

/// SQL to check if schema is initialized.
pub const CHECK_SCHEMA_SQL: &str = r"
SELECT COUNT(*) FROM sqlite_master
WHERE type='table' AND name='schema_info';
";

/// SQL to get schema version.
pub const GET_VERSION_SQL: &str = r"
SELECT value FROM schema_info WHERE key = 'version';
";

/// SQL to set schema version.
pub const SET_VERSION_SQL: &str = r"
INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?);
";

/// Migrations from older schema versions.
pub struct Migration {
    /// Version this migration upgrades from.
    pub from_version: u32,
    /// Version this migration upgrades to.
    pub to_version: u32,
    /// SQL statements to execute.
    pub sql: &'static str,
}

/// SQL for v1 to v2 migration (adds FTS5 over entries).
const MIGRATION_V1_TO_V2: &str = r"
CREATE VIRTUAL TABLE IF NOT EXISTS entries_fts USING fts5(
    subject,
    content,
    content='entries',
    content_rowid='rowid',
    tokenize='porter unicode61'
);

CREATE TRIGGER IF NOT EXISTS entries_ai AFTER INSERT ON entries BEGIN
    INSERT INTO entries_fts(rowid, subject, content)
    VALUES (new.rowid, new.subject, new.content);
END;

CREATE TRIGGER IF NOT EXISTS entries_ad AFTER DELETE ON entries BEGIN
    INSERT INTO entries_fts(entries_fts, rowid, subject, content)
    VALUES ('delete', old.rowid, old.subject, old.content);
END;

CREATE TRIGGER IF NOT EXISTS entries_au AFTER UPDATE ON entries BEGIN
    INSERT INTO entries_fts(entries_fts, rowid, subject, content)
    VALUES ('delete', old.rowid, old.subject, old.content);
    INSERT INTO entries_fts(rowid, subject, content)
    VALUES (new.rowid, new.subject, new.content);
END;

-- Populate FTS5 index from existing entries
INSERT INTO entries_fts(rowid, subject, content)
SELECT rowid, subject, content FROM entries;
";

/// Available migrations.
pub const MIGRATIONS: &[Migration] = &[Migration {
    from_version: 1,
    to_version: 2,
    sql: MIGRATION_V1_TO_V2,
}];

/// Gets migrations needed to upgrade from a version.
#[must_use]
pub fn get_migrations_from(current_version: u32) -> Vec<&'static Migration> {
    MIGRATIONS
        .iter()
        .filter(|m| m.from_version >= current_version && m.to_version <= CURRENT_SCHEMA_VERSION)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_version() {
        const _: () = assert!(CURRENT_SCHEMA_VERSION >= 1);
    }

    #[test]
    fn test_schema_sql_not_empty() {
        assert!(!SCHEMA_SQL.is_empty());
        assert!(SCHEMA_SQL.contains("CREATE TABLE"));
        assert!(SCHEMA_SQL.contains("entries_fts"));
        assert!(SCHEMA_SQL.contains("co_recall_edges"));
    }

    #[test]
    fn test_migrations_ordered() {
        for migration in MIGRATIONS {
            assert!(migration.to_version > migration.from_version);
        }
    }

    #[test]
    fn test_get_migrations_from() {
        let migrations = get_migrations_from(1);
        assert_eq!(migrations.len(), 1);
        let migrations = get_migrations_from(CURRENT_SCHEMA_VERSION);
        assert!(migrations.is_empty());
    }
}
