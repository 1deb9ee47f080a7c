//! Configuration with environment variable support.
//!
//! Resolution order: explicit values, then environment variables, then
//! defaults. The store lives under `$AGENR_HOME` (default `~/.agenr`).

use std::path::PathBuf;

use serde::Serialize;

use crate::error::{ConfigError, Result};
use crate::storage::DEFAULT_DB_FILE;

/// Default chat provider.
pub const DEFAULT_PROVIDER: &str = "openai";

/// Configuration for one agenr process.
#[derive(Debug, Clone, Serialize)]
pub struct AgenrConfig {
    /// State directory.
    pub home: PathBuf,
    /// Database file path.
    pub db_path: PathBuf,
    /// Chat provider name.
    pub provider: String,
    /// Chat model.
    pub model: String,
    /// Embedding model.
    pub embed_model: String,
    /// API key for the provider.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Base URL override for OpenAI-compatible proxies.
    pub base_url: Option<String>,
}

impl AgenrConfig {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> AgenrConfigBuilder {
        AgenrConfigBuilder::default()
    }

    /// Resolves configuration from the environment with defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::builder().from_env().build()
    }

    /// Path of the watch-state file.
    #[must_use]
    pub fn watch_state_path(&self) -> PathBuf {
        self.home.join(crate::ingest::watch_state::WATCH_STATE_FILE)
    }

    /// Path of the watcher PID file.
    #[must_use]
    pub fn pid_path(&self) -> PathBuf {
        self.home.join(crate::ingest::pidfile::PID_FILE)
    }

    /// Returns the API key or the auth error naming the variable to set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AuthMissing`] when no credential was found.
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            ConfigError::AuthMissing {
                provider: self.provider.clone(),
                env_hint: "OPENAI_API_KEY (or ANTHROPIC_API_KEY / ANTHROPIC_OAUTH_TOKEN)"
                    .to_string(),
            }
            .into()
        })
    }
}

/// Builder for [`AgenrConfig`].
#[derive(Debug, Clone, Default)]
pub struct AgenrConfigBuilder {
    home: Option<PathBuf>,
    db_path: Option<PathBuf>,
    provider: Option<String>,
    model: Option<String>,
    embed_model: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
}

impl AgenrConfigBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if self.home.is_none() {
            self.home = std::env::var_os("AGENR_HOME").map(PathBuf::from);
        }
        if self.db_path.is_none() {
            self.db_path = std::env::var_os("AGENR_DB_PATH").map(PathBuf::from);
        }
        if self.provider.is_none() {
            self.provider = std::env::var("AGENR_PROVIDER").ok();
        }
        if self.model.is_none() {
            self.model = std::env::var("AGENR_MODEL").ok();
        }
        if self.embed_model.is_none() {
            self.embed_model = std::env::var("AGENR_EMBED_MODEL").ok();
        }
        if self.api_key.is_none() {
            self.api_key = discovered_api_key();
        }
        if self.base_url.is_none() {
            self.base_url = std::env::var("OPENAI_BASE_URL").ok();
        }
        self
    }

    /// Overrides the state directory.
    #[must_use]
    pub fn home(mut self, home: PathBuf) -> Self {
        self.home = Some(home);
        self
    }

    /// Overrides the database path.
    #[must_use]
    pub fn db_path(mut self, db_path: PathBuf) -> Self {
        self.db_path = Some(db_path);
        self
    }

    /// Overrides the chat model.
    #[must_use]
    pub fn model(mut self, model: String) -> Self {
        self.model = Some(model);
        self
    }

    /// Overrides the provider.
    #[must_use]
    pub fn provider(mut self, provider: String) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Resolves remaining fields to defaults.
    #[must_use]
    pub fn build(self) -> AgenrConfig {
        let home = self.home.unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".agenr")
        });
        let db_path = self.db_path.unwrap_or_else(|| home.join(DEFAULT_DB_FILE));
        AgenrConfig {
            home,
            db_path,
            provider: self.provider.unwrap_or_else(|| DEFAULT_PROVIDER.to_string()),
            model: self
                .model
                .unwrap_or_else(|| crate::llm::openai::DEFAULT_CHAT_MODEL.to_string()),
            embed_model: self
                .embed_model
                .unwrap_or_else(|| crate::embedding::openai::DEFAULT_EMBED_MODEL.to_string()),
            api_key: self.api_key,
            base_url: self.base_url,
        }
    }
}

/// Environment variables checked for credentials, in discovery order.
pub const CREDENTIAL_ENV_VARS: [&str; 3] =
    ["OPENAI_API_KEY", "ANTHROPIC_API_KEY", "ANTHROPIC_OAUTH_TOKEN"];

fn discovered_api_key() -> Option<String> {
    CREDENTIAL_ENV_VARS
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
}

/// One line of the `auth` report.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    /// Environment variable name.
    pub env_var: String,
    /// Whether a non-empty value is present.
    pub found: bool,
}

/// Reports which credentials are discoverable right now.
#[must_use]
pub fn credential_report() -> Vec<CredentialStatus> {
    CREDENTIAL_ENV_VARS
        .iter()
        .map(|var| CredentialStatus {
            env_var: (*var).to_string(),
            found: std::env::var(var).is_ok_and(|v| !v.trim().is_empty()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgenrConfig::builder()
            .home(PathBuf::from("/tmp/agenr-test"))
            .build();
        assert_eq!(config.db_path, PathBuf::from("/tmp/agenr-test/agenr.db"));
        assert_eq!(config.provider, DEFAULT_PROVIDER);
        assert!(config.watch_state_path().ends_with("watch.json"));
        assert!(config.pid_path().ends_with("watcher.pid"));
    }

    #[test]
    fn test_explicit_db_path_wins() {
        let config = AgenrConfig::builder()
            .home(PathBuf::from("/tmp/agenr-test"))
            .db_path(PathBuf::from("/elsewhere/x.db"))
            .build();
        assert_eq!(config.db_path, PathBuf::from("/elsewhere/x.db"));
    }

    #[test]
    fn test_require_api_key_error_names_vars() {
        let mut config = AgenrConfig::builder()
            .home(PathBuf::from("/tmp/agenr-test"))
            .build();
        config.api_key = None;
        let err = config.require_api_key().unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));

        config.api_key = Some("sk-test".to_string());
        assert_eq!(config.require_api_key().unwrap(), "sk-test");
    }

    #[test]
    fn test_credential_report_covers_known_vars() {
        let report = credential_report();
        assert_eq!(report.len(), CREDENTIAL_ENV_VARS.len());
    }
}
