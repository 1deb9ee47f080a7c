//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// agenr: personal agent memory store.
///
/// Ingests chat transcripts, extracts durable knowledge via an LLM, and
/// recalls it ranked by memory strength.
#[derive(Parser, Debug)]
#[command(name = "agenr")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the memory database file.
    ///
    /// Defaults to `$AGENR_HOME/agenr.db`.
    #[arg(long, env = "AGENR_DB_PATH", global = true)]
    pub db: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit structured JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest transcript files into the memory store.
    #[command(after_help = r#"Examples:
  agenr ingest ~/.codex/sessions                   # Ingest a directory
  agenr ingest a.jsonl b.md --platform codex       # Tag the source platform
  agenr ingest --glob '~/chats/**/*.jsonl'         # Glob expansion
  agenr ingest big.jsonl --concurrency 8           # More chunks in flight
  agenr ingest a.jsonl --force                     # Re-ingest from scratch
  agenr ingest a.jsonl --force --dry-run           # Show what force would delete
  agenr --json ingest a.jsonl | jq '.files'
"#)]
    Ingest {
        /// Files and directories to ingest.
        paths: Vec<PathBuf>,

        /// Glob pattern adding more files.
        #[arg(long)]
        glob: Option<String>,

        /// Chat model for extraction and dedup calls.
        #[arg(long, env = "AGENR_MODEL")]
        model: Option<String>,

        /// LLM provider.
        #[arg(long, env = "AGENR_PROVIDER")]
        provider: Option<String>,

        /// Source platform tag (codex, claude-code, openclaw, plaud).
        #[arg(long)]
        platform: Option<String>,

        /// Project name stamped onto extracted entries.
        #[arg(long)]
        project: Option<String>,

        /// Report without extracting or writing.
        #[arg(long)]
        dry_run: bool,

        /// Maximum chunks in flight per file.
        #[arg(long, default_value = "4")]
        concurrency: usize,

        /// Files processed in parallel (capped at the file count).
        #[arg(long, default_value = "1")]
        workers: usize,

        /// Pending-entry high watermark of the write queue.
        #[arg(long, default_value = "2000")]
        queue_high_watermark: usize,

        /// How long a blocked push waits before failing, in milliseconds.
        #[arg(long, default_value = "30000")]
        queue_backpressure_timeout_ms: u64,

        /// Skip files already recorded in the ingest log (default
        /// behavior; kept for script compatibility).
        #[arg(long)]
        skip_ingested: bool,

        /// Bulk mode: larger write batches, no per-chunk dedup LLM call.
        #[arg(long)]
        bulk: bool,

        /// Retry failed files in rounds (default).
        #[arg(long, overrides_with = "no_retry")]
        retry: bool,

        /// Disable retry rounds.
        #[arg(long)]
        no_retry: bool,

        /// Retry rounds over failed files.
        #[arg(long, default_value = "3")]
        max_retries: u32,

        /// Delete all rows owned by each file before re-ingesting.
        #[arg(long)]
        force: bool,

        /// Force whole-file extraction.
        #[arg(long, conflicts_with = "chunk")]
        whole_file: bool,

        /// Force chunked extraction.
        #[arg(long)]
        chunk: bool,
    },

    /// Recall stored knowledge ranked by memory strength.
    #[command(after_help = r#"Examples:
  agenr recall "postgres migration"                # Semantic recall
  agenr recall --browse --min-importance 7         # Browse important entries
  agenr recall "deploys" --type preference --limit 5
  agenr recall --context session-start             # Context-only recall
  agenr recall "launch" --around 2026-02-15 --around-radius 7
  agenr --json recall "billing" | jq '.[].entry.content'
"#)]
    Recall {
        /// Semantic query text; omit for browse or context-only recall.
        text: Option<String>,

        /// Requesting context (e.g. session-start).
        #[arg(long)]
        context: Option<String>,

        /// Browse mode: no embedding, importance-first ordering.
        #[arg(long)]
        browse: bool,

        /// Maximum results.
        #[arg(short, long)]
        limit: Option<usize>,

        /// Restrict to entry types (fact, preference, decision, event,
        /// todo, lesson). Repeatable.
        #[arg(long = "type")]
        types: Vec<String>,

        /// Restrict to entries carrying at least one of these tags.
        #[arg(long)]
        tags: Vec<String>,

        /// Restrict to one scope (private, public, personal).
        #[arg(long)]
        scope: Option<String>,

        /// Restrict to a project (plus project-less entries).
        #[arg(long)]
        project: Option<String>,

        /// Require an exact project match.
        #[arg(long)]
        project_strict: bool,

        /// Exclude a project.
        #[arg(long)]
        exclude_project: Option<String>,

        /// Restrict to a source platform.
        #[arg(long)]
        platform: Option<String>,

        /// Minimum importance (1-10).
        #[arg(long)]
        min_importance: Option<u8>,

        /// Created-at floor (RFC3339, YYYY-MM-DD, or relative like 7d).
        #[arg(long)]
        since: Option<String>,

        /// Created-at ceiling.
        #[arg(long)]
        until: Option<String>,

        /// Gaussian temporal target date.
        #[arg(long)]
        around: Option<String>,

        /// Gaussian radius in days (default 14).
        #[arg(long)]
        around_radius: Option<f64>,

        /// Score by raw cosine similarity only.
        #[arg(long)]
        no_boost: bool,

        /// Skip post-recall metadata updates.
        #[arg(long)]
        no_update: bool,
    },

    /// Report store health: entry counts, ingest log, schema version.
    Health,

    /// Watch transcript files and ingest new content periodically.
    #[command(after_help = r#"Examples:
  agenr watch ~/.codex/sessions                    # Poll every 30s
  agenr watch --glob '~/chats/**/*.jsonl' --interval-secs 60
"#)]
    Watch {
        /// Files and directories to watch.
        paths: Vec<PathBuf>,

        /// Glob pattern adding more files.
        #[arg(long)]
        glob: Option<String>,

        /// Poll interval in seconds.
        #[arg(long, default_value = "30")]
        interval_secs: u64,
    },

    /// Show the resolved configuration.
    Config,

    /// Report discovered provider credentials.
    Auth,

    /// Create the state directory and initialize the database.
    Setup,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parse() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_ingest_flags() {
        let cli = Cli::parse_from([
            "agenr",
            "ingest",
            "a.jsonl",
            "--force",
            "--workers",
            "2",
            "--no-retry",
        ]);
        match cli.command {
            Commands::Ingest {
                paths,
                force,
                workers,
                no_retry,
                ..
            } => {
                assert_eq!(paths, vec![PathBuf::from("a.jsonl")]);
                assert!(force);
                assert!(no_retry);
                assert_eq!(workers, 2);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_whole_file_conflicts_with_chunk() {
        assert!(
            Cli::try_parse_from(["agenr", "ingest", "a.jsonl", "--whole-file", "--chunk"])
                .is_err()
        );
    }

    #[test]
    fn test_recall_flags() {
        let cli = Cli::parse_from([
            "agenr",
            "recall",
            "billing",
            "--type",
            "preference",
            "--type",
            "fact",
            "--since",
            "7d",
        ]);
        match cli.command {
            Commands::Recall {
                text, types, since, ..
            } => {
                assert_eq!(text.as_deref(), Some("billing"));
                assert_eq!(types, vec!["preference", "fact"]);
                assert_eq!(since.as_deref(), Some("7d"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
