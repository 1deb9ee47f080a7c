//! Error types for agenr operations.
//!
//! This module provides the error hierarchy using `thiserror` for all
//! pipeline stages: storage, transcript parsing, LLM calls, embeddings,
//! the write queue, and configuration.

use thiserror::Error;

/// Result type alias for agenr operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for agenr operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Storage-related errors (database operations).
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Transcript parsing errors.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// LLM call errors.
    #[error("llm error: {0}")]
    Llm(#[from] LlmError),

    /// Embedding call errors.
    #[error("embedding error: {0}")]
    Embed(#[from] EmbedError),

    /// Write queue errors.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Configuration and credential errors.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors (file operations).
    #[error("I/O error: {0}")]
    Io(String),

    /// Online-dedup arbitration failed.
    #[error("dedup arbitration failed: {message}")]
    DedupLlm {
        /// Description of the arbitration failure.
        message: String,
    },

    /// Operation aborted by shutdown request.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid state errors.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the invalid state.
        message: String,
    },
}

impl Error {
    /// Returns true when retrying the failed operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Llm(e) => e.is_transient(),
            Self::Embed(e) => e.is_transient(),
            Self::Queue(QueueError::Backpressure { .. }) => true,
            _ => false,
        }
    }
}

/// Storage-specific errors for database operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database connection or query error.
    #[error("database error: {0}")]
    Database(String),

    /// Store not initialized (setup command not run).
    #[error("memory store not initialized. Run: agenr setup")]
    NotInitialized,

    /// Entry not found by id.
    #[error("entry not found: {id}")]
    EntryNotFound {
        /// Entry id that was not found.
        id: String,
    },

    /// Schema migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An embedding blob has the wrong width.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured dimension.
        expected: usize,
        /// Dimension found in the row.
        actual: usize,
    },

    /// Linking `superseded_by` would close a cycle.
    #[error("supersede would create a cycle: {from} -> {to}")]
    SupersedeCycle {
        /// Entry being superseded.
        from: String,
        /// Proposed replacement entry.
        to: String,
    },
}

/// Transcript parsing errors.
#[derive(Error, Debug)]
pub enum ParseError {
    /// File not found.
    #[error("file not found: {path}")]
    FileNotFound {
        /// Path to the file that was not found.
        path: String,
    },

    /// Failed to read file.
    #[error("failed to read file: {path}: {reason}")]
    ReadFailed {
        /// Path to the file.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// The file produced no parseable messages.
    #[error("no messages parsed from: {path}")]
    Empty {
        /// Path to the file.
        path: String,
    },

    /// LLM output could not be parsed into entries.
    #[error("unparseable extraction output: {reason}")]
    BadExtraction {
        /// Reason parsing failed.
        reason: String,
    },
}

/// LLM call errors, split by retryability.
#[derive(Error, Debug)]
pub enum LlmError {
    /// Rate-limit response (HTTP 429 class).
    #[error("rate limited: {message}")]
    RateLimited {
        /// Provider message.
        message: String,
    },

    /// Server-side failure (HTTP 5xx class).
    #[error("server error: {message}")]
    Server {
        /// Provider message.
        message: String,
    },

    /// Request timed out.
    #[error("request timed out after {seconds}s")]
    Timeout {
        /// Configured timeout in seconds.
        seconds: u64,
    },

    /// Client-side API failure (HTTP 4xx class, schema errors).
    #[error("api error: {message}")]
    Api {
        /// Provider message.
        message: String,
        /// HTTP status if known.
        status: Option<u16>,
    },

    /// Streaming connection failure.
    #[error("stream error: {message}")]
    Stream {
        /// Description of the stream failure.
        message: String,
    },

    /// The response content did not match the expected shape.
    #[error("invalid response: {message}")]
    InvalidResponse {
        /// Description of the mismatch.
        message: String,
    },
}

impl LlmError {
    /// Returns true for rate-limit / server / timeout class errors.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Server { .. } | Self::Timeout { .. }
        )
    }

    /// Returns true specifically for rate-limit responses, which drive
    /// the adaptive inter-chunk delay.
    #[must_use]
    pub const fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Embedding call errors, split by retryability.
#[derive(Error, Debug)]
pub enum EmbedError {
    /// Rate-limit or server-side failure.
    #[error("transient embedding failure: {message}")]
    Transient {
        /// Provider message.
        message: String,
    },

    /// Client-side failure (bad request, auth, schema).
    #[error("permanent embedding failure: {message}")]
    Permanent {
        /// Provider message.
        message: String,
    },

    /// The provider returned a vector of unexpected width.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured dimension.
        expected: usize,
        /// Dimension returned by the provider.
        actual: usize,
    },
}

impl EmbedError {
    /// Returns true when retrying may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Write queue errors.
#[derive(Error, Debug)]
pub enum QueueError {
    /// The queue stayed at its high watermark past the push timeout.
    #[error("write queue backpressure: {pending} entries pending after {timeout_ms}ms")]
    Backpressure {
        /// Pending entry count at timeout.
        pending: usize,
        /// Configured push timeout.
        timeout_ms: u64,
    },

    /// The queue no longer accepts work.
    #[error("write queue is shut down")]
    Shutdown,

    /// Queued entries for this file were dropped by `cancel`.
    #[error("queued entries cancelled for: {source_file}")]
    Cancelled {
        /// Source file whose entries were dropped.
        source_file: String,
    },
}

/// Configuration and credential errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required setting is missing.
    #[error("missing configuration: {name}")]
    Missing {
        /// Setting name.
        name: String,
    },

    /// A setting has an unusable value.
    #[error("invalid configuration: {name}: {reason}")]
    Invalid {
        /// Setting name.
        name: String,
        /// Why the value is unusable.
        reason: String,
    },

    /// No API credential discovered for the selected provider.
    #[error("no API key found for provider '{provider}'. Set {env_hint}")]
    AuthMissing {
        /// Provider name.
        provider: String,
        /// Environment variable the user should set.
        env_hint: String,
    },
}

// Implement From traits for standard library and driver errors

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Database(err.to_string()))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidState {
            message: "test error".to_string(),
        };
        assert_eq!(err.to_string(), "invalid state: test error");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::NotInitialized;
        assert_eq!(
            err.to_string(),
            "memory store not initialized. Run: agenr setup"
        );

        let err = StorageError::SupersedeCycle {
            from: "a".to_string(),
            to: "b".to_string(),
        };
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_llm_transient_classification() {
        assert!(
            LlmError::RateLimited {
                message: "429".to_string()
            }
            .is_transient()
        );
        assert!(
            LlmError::Server {
                message: "500".to_string()
            }
            .is_transient()
        );
        assert!(LlmError::Timeout { seconds: 120 }.is_transient());
        assert!(
            !LlmError::Api {
                message: "bad request".to_string(),
                status: Some(400)
            }
            .is_transient()
        );
        assert!(
            !LlmError::InvalidResponse {
                message: "not json".to_string()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_embed_transient_classification() {
        assert!(
            EmbedError::Transient {
                message: "503".to_string()
            }
            .is_transient()
        );
        assert!(
            !EmbedError::Permanent {
                message: "401".to_string()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_top_level_transient() {
        let err: Error = LlmError::RateLimited {
            message: "slow down".to_string(),
        }
        .into();
        assert!(err.is_transient());

        let err: Error = QueueError::Backpressure {
            pending: 2000,
            timeout_ms: 30_000,
        }
        .into();
        assert!(err.is_transient());

        assert!(!Error::Cancelled.is_transient());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_rusqlite() {
        let err: Error = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, Error::Storage(StorageError::Database(_))));
    }

    #[test]
    fn test_queue_error_display() {
        let err = QueueError::Backpressure {
            pending: 11,
            timeout_ms: 500,
        };
        assert!(err.to_string().contains("11"));
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn test_config_auth_missing_hint() {
        let err = ConfigError::AuthMissing {
            provider: "openai".to_string(),
            env_hint: "OPENAI_API_KEY".to_string(),
        };
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }
}
