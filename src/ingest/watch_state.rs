//! Incremental-read bookkeeping for JSONL transcripts.
//!
//! `watch.json` maps absolute file paths to the byte offset just past the
//! last fully ingested record. Offsets only move forward unless a
//! `--force` re-ingest resets them. Writes go through a temp file plus
//! rename so a crash never leaves a torn state file.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// State file format version.
const WATCH_STATE_VERSION: u32 = 1;

/// File name under `$AGENR_HOME`.
pub const WATCH_STATE_FILE: &str = "watch.json";

/// Per-file tail-read state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileWatch {
    /// Offset just past the last fully ingested record.
    pub byte_offset: u64,
    /// File size observed at the last sync.
    pub last_size: u64,
    /// Epoch seconds of the last successful ingest.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_ingested_at: Option<i64>,
}

/// The whole watch-state file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchState {
    /// Format version.
    pub version: u32,
    /// Per-file state keyed by absolute path.
    pub files: HashMap<String, FileWatch>,
}

impl Default for WatchState {
    fn default() -> Self {
        Self {
            version: WATCH_STATE_VERSION,
            files: HashMap::new(),
        }
    }
}

impl WatchState {
    /// Loads the state file; a missing file is an empty state.
    ///
    /// # Errors
    ///
    /// Returns an error on unreadable or unparseable content.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| Error::Io(format!("corrupt watch state: {e}")))
    }

    /// Writes the state atomically (temp file + rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the write or rename fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Io(format!("serialize watch state: {e}")))?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Current offset for a file (0 when unknown).
    #[must_use]
    pub fn offset_for(&self, file: &str) -> u64 {
        self.files.get(file).map_or(0, |w| w.byte_offset)
    }

    /// Advances a file's offset. The offset never decreases unless
    /// `force` resets it.
    pub fn advance(
        &mut self,
        file: &str,
        byte_offset: u64,
        size: u64,
        now: DateTime<Utc>,
        force: bool,
    ) {
        let slot = self.files.entry(file.to_string()).or_default();
        if force {
            slot.byte_offset = byte_offset;
        } else {
            slot.byte_offset = slot.byte_offset.max(byte_offset);
        }
        slot.last_size = size;
        slot.last_ingested_at = Some(now.timestamp());
    }
}
