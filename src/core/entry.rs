//! Durable knowledge entry: the central domain type.
//!
//! An [`Entry`] is one durable sentence of knowledge extracted from a
//! transcript, together with the metadata that drives dedup strictness,
//! recall scoring, and lifecycle (supersede / retire / suppress).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Fixed embedding width for all stored vectors.
pub const EMBEDDING_DIMENSIONS: usize = 1024;

/// Knowledge entry kind. Controls dedup strictness and scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// A stable statement about the world or the user's setup.
    Fact,
    /// A stated preference in the user's voice.
    Preference,
    /// A decision that was made, with its subject.
    Decision,
    /// Something that happened at a point in time.
    Event,
    /// An open action item.
    Todo,
    /// A lesson learned, usually from a failure.
    Lesson,
}

impl EntryType {
    /// All entry types, in canonical order.
    pub const ALL: [Self; 6] = [
        Self::Fact,
        Self::Preference,
        Self::Decision,
        Self::Event,
        Self::Todo,
        Self::Lesson,
    ];

    /// Database/CLI representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Preference => "preference",
            Self::Decision => "decision",
            Self::Event => "event",
            Self::Todo => "todo",
            Self::Lesson => "lesson",
        }
    }

    /// Parses the database/CLI representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fact" => Some(Self::Fact),
            "preference" => Some(Self::Preference),
            "decision" => Some(Self::Decision),
            "event" => Some(Self::Event),
            "todo" => Some(Self::Todo),
            "lesson" => Some(Self::Lesson),
            _ => None,
        }
    }

    /// Lowest quality score a negative feedback signal may leave behind.
    ///
    /// Facts and preferences keep a higher floor: a single bad signal
    /// must not bury settled knowledge.
    #[must_use]
    pub const fn quality_floor(self) -> f64 {
        match self {
            Self::Fact | Self::Preference => 0.35,
            Self::Decision | Self::Event | Self::Todo => 0.25,
            Self::Lesson => 0.10,
        }
    }
}

/// Expiry class. Controls recency decay and the recall-strength ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Expiry {
    /// Never decays; identity-level knowledge.
    Core,
    /// Long half-life (90 days).
    Permanent,
    /// Short half-life (30 days).
    Temporary,
    /// Very short half-life (3 days).
    SessionOnly,
}

impl Expiry {
    /// Database/CLI representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Permanent => "permanent",
            Self::Temporary => "temporary",
            Self::SessionOnly => "session-only",
        }
    }

    /// Parses the database/CLI representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "core" => Some(Self::Core),
            "permanent" => Some(Self::Permanent),
            "temporary" => Some(Self::Temporary),
            "session-only" | "session_only" => Some(Self::SessionOnly),
            _ => None,
        }
    }

    /// Recency half-life in days. `None` for core entries, which never decay.
    #[must_use]
    pub const fn half_life_days(self) -> Option<f64> {
        match self {
            Self::Core => None,
            Self::Permanent => Some(90.0),
            Self::Temporary => Some(30.0),
            Self::SessionOnly => Some(3.0),
        }
    }

    /// Recall-strength ceiling: the recall count at which strength saturates.
    #[must_use]
    pub const fn recall_ceiling(self) -> u32 {
        match self {
            Self::Core => 64,
            Self::Permanent => 32,
            Self::Temporary => 16,
            Self::SessionOnly => 8,
        }
    }
}

/// Visibility scope of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Default: visible only to the owner's tooling.
    Private,
    /// Safe to surface in shared contexts.
    Public,
    /// Personal-life knowledge, kept out of work contexts.
    Personal,
}

impl Scope {
    /// Database/CLI representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Public => "public",
            Self::Personal => "personal",
        }
    }

    /// Parses the database/CLI representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "private" => Some(Self::Private),
            "public" => Some(Self::Public),
            "personal" => Some(Self::Personal),
            _ => None,
        }
    }
}

/// Where an entry came from: the transcript file and an in-chunk locator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySource {
    /// Absolute path of the origin transcript.
    pub file: String,
    /// Short locator inside the chunk (e.g. the nearest user line).
    pub context: Option<String>,
}

/// A durable knowledge entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Opaque unique identifier, stable across updates.
    pub id: String,
    /// Entry kind.
    #[serde(rename = "type")]
    pub kind: EntryType,
    /// Short noun phrase; the "about whom/what".
    pub subject: String,
    /// One durable sentence in the user's voice.
    pub content: String,
    /// Optional normalized key for exact-match dedup of the same kind of thing.
    pub canonical_key: Option<String>,
    /// Importance 1-10; scoring multiplier.
    pub importance: u8,
    /// Expiry class.
    pub expiry: Expiry,
    /// Visibility scope.
    pub scope: Scope,
    /// Source platform tag (e.g. codex, claude-code).
    pub platform: Option<String>,
    /// Lowercased project name.
    pub project: Option<String>,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Origin transcript and locator.
    pub source: EntrySource,
    /// Embedding vector (empty until computed). Never serialized; the
    /// vector lives in its own storage column.
    #[serde(skip)]
    pub embedding: Vec<f32>,
    /// Number of recalls that returned this entry.
    pub recall_count: u32,
    /// Last recall timestamp.
    pub last_recalled_at: Option<DateTime<Utc>>,
    /// Epoch seconds of each active recall, appended per recall.
    pub recall_intervals: Vec<i64>,
    /// Times a new extraction reinforced this entry.
    pub confirmations: u32,
    /// Times a new extraction conflicted with this entry.
    pub contradictions: u32,
    /// EMA quality score in [0,1]; `None` means never judged (treated as 0.5).
    pub quality_score: Option<f64>,
    /// Replacement entry id, if superseded.
    pub superseded_by: Option<String>,
    /// Hard-hide flag.
    pub retired: bool,
    /// When the entry was retired.
    pub retired_at: Option<DateTime<Utc>>,
    /// Why the entry was retired.
    pub retired_reason: Option<String>,
    /// Contexts (e.g. "session-start") for which the entry is hidden.
    pub suppressed_contexts: Vec<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Entry {
    /// Creates a new entry with a fresh id and the given core attributes.
    ///
    /// All bookkeeping fields start at their zero values; `created_at`
    /// and `updated_at` are set to `now`.
    #[must_use]
    pub fn new(
        kind: EntryType,
        subject: impl Into<String>,
        content: impl Into<String>,
        importance: u8,
        expiry: Expiry,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            subject: subject.into(),
            content: content.into(),
            canonical_key: None,
            importance: importance.clamp(1, 10),
            expiry,
            scope: Scope::Private,
            platform: None,
            project: None,
            tags: Vec::new(),
            source: EntrySource::default(),
            embedding: Vec::new(),
            recall_count: 0,
            last_recalled_at: None,
            recall_intervals: Vec::new(),
            confirmations: 0,
            contradictions: 0,
            quality_score: None,
            superseded_by: None,
            retired: false,
            retired_at: None,
            retired_reason: None,
            suppressed_contexts: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// True when the entry participates in the recall candidate set.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.retired && self.superseded_by.is_none()
    }

    /// Hash of the normalized content, used for exact-match dedup.
    ///
    /// Normalization lowercases, collapses internal whitespace, and strips
    /// trailing sentence punctuation so cosmetic differences hash equal.
    #[must_use]
    pub fn content_hash(&self) -> String {
        hash_normalized(&self.content)
    }

    /// Effective quality score, defaulting to the neutral 0.5.
    #[must_use]
    pub fn effective_quality(&self) -> f64 {
        self.quality_score.unwrap_or(0.5)
    }
}

/// Normalizes text and returns its SHA-256 hex digest.
#[must_use]
pub fn hash_normalized(text: &str) -> String {
    let normalized: String = text
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let normalized = normalized.trim_end_matches(['.', '!', '?']);

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// SHA-256 hex digest of raw bytes, used for file content hashes.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(now: DateTime<Utc>) -> Entry {
        Entry::new(
            EntryType::Preference,
            "deployment",
            "Prefers blue-green deploys over rolling restarts for the api service",
            7,
            Expiry::Permanent,
            now,
        )
    }

    #[test]
    fn test_new_entry_defaults() {
        let now = Utc::now();
        let entry = sample(now);
        assert!(entry.is_active());
        assert_eq!(entry.recall_count, 0);
        assert_eq!(entry.confirmations, 0);
        assert_eq!(entry.scope, Scope::Private);
        assert!(entry.quality_score.is_none());
        assert!((entry.effective_quality() - 0.5).abs() < f64::EPSILON);
        assert_eq!(entry.created_at, now);
    }

    #[test]
    fn test_importance_clamped() {
        let entry = Entry::new(
            EntryType::Fact,
            "s",
            "content long enough to matter here",
            14,
            Expiry::Core,
            Utc::now(),
        );
        assert_eq!(entry.importance, 10);
    }

    #[test]
    fn test_active_excludes_retired_and_superseded() {
        let now = Utc::now();
        let mut entry = sample(now);
        entry.retired = true;
        assert!(!entry.is_active());

        let mut entry = sample(now);
        entry.superseded_by = Some("other-id".to_string());
        assert!(!entry.is_active());
    }

    #[test]
    fn test_content_hash_normalizes() {
        let now = Utc::now();
        let mut a = sample(now);
        let mut b = sample(now);
        a.content = "Prefers  blue-green deploys.".to_string();
        b.content = "prefers blue-green deploys".to_string();
        assert_eq!(a.content_hash(), b.content_hash());

        b.content = "prefers canary deploys".to_string();
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_type_round_trip() {
        for kind in EntryType::ALL {
            assert_eq!(EntryType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntryType::parse("nonsense"), None);
    }

    #[test]
    fn test_expiry_round_trip_and_tables() {
        for expiry in [
            Expiry::Core,
            Expiry::Permanent,
            Expiry::Temporary,
            Expiry::SessionOnly,
        ] {
            assert_eq!(Expiry::parse(expiry.as_str()), Some(expiry));
        }
        assert_eq!(Expiry::parse("session_only"), Some(Expiry::SessionOnly));

        assert!(Expiry::Core.half_life_days().is_none());
        assert!((Expiry::Permanent.half_life_days().unwrap_or(0.0) - 90.0).abs() < f64::EPSILON);
        assert_eq!(Expiry::Core.recall_ceiling(), 64);
        assert_eq!(Expiry::SessionOnly.recall_ceiling(), 8);
    }

    #[test]
    fn test_quality_floors_by_type() {
        assert!((EntryType::Fact.quality_floor() - 0.35).abs() < f64::EPSILON);
        assert!((EntryType::Preference.quality_floor() - 0.35).abs() < f64::EPSILON);
        assert!((EntryType::Lesson.quality_floor() - 0.10).abs() < f64::EPSILON);
        assert!((EntryType::Todo.quality_floor() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unique_ids() {
        let now = Utc::now();
        assert_ne!(sample(now).id, sample(now).id);
    }

    #[test]
    fn test_hash_bytes_stable() {
        assert_eq!(hash_bytes(b"hello"), hash_bytes(b"hello"));
        assert_ne!(hash_bytes(b"hello"), hash_bytes(b"hello "));
    }
}
