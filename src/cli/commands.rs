//! Command execution: wires configuration, storage, providers, and the
//! pipeline together per subcommand.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tracing::info;

use crate::cli::output::{self, OutputFormat};
use crate::cli::parser::{Cli, Commands};
use crate::config::{self, AgenrConfig};
use crate::core::{EntryType, Scope};
use crate::dedup::{DedupConfig, StorePipeline};
use crate::embedding::{Embedder, EmbeddingCache, OpenAiEmbedder};
use crate::error::{ConfigError, Result};
use crate::extract::{Extractor, ExtractorConfig, PrefetchContext, WholeFileMode};
use crate::ingest::pidfile::PidFileGuard;
use crate::ingest::{IngestDriver, IngestOptions};
use crate::llm::OpenAiClient;
use crate::queue::{QueueConfig, WriteQueue};
use crate::recall::{RecallEngine, RecallQuery};
use crate::storage::SqliteStorage;

/// Batch size used by `--bulk` ingest.
const BULK_BATCH_SIZE: usize = 200;

/// What a command produced: text for stdout plus the process exit code.
#[derive(Debug)]
pub struct CommandOutput {
    /// Rendered output.
    pub text: String,
    /// Process exit code.
    pub exit_code: u8,
}

impl CommandOutput {
    fn ok(text: String) -> Self {
        Self { text, exit_code: 0 }
    }
}

/// Executes the parsed CLI command.
///
/// # Errors
///
/// Returns an error for configuration, credential, and storage failures;
/// per-file ingest failures are reported through the output instead.
pub async fn execute(cli: Cli, shutdown: Arc<AtomicBool>) -> Result<CommandOutput> {
    let format = OutputFormat::from_json_flag(cli.json);
    let mut config = AgenrConfig::from_env();
    if let Some(db) = cli.db.clone() {
        config.db_path = db;
    }

    match cli.command {
        Commands::Setup => setup(&config, format),
        Commands::Config => Ok(CommandOutput::ok(render_config(&config, format))),
        Commands::Auth => Ok(CommandOutput::ok(output::format_credentials(
            &config::credential_report(),
            format,
        ))),
        Commands::Health => health(&config, format),
        Commands::Recall {
            text,
            context,
            browse,
            limit,
            types,
            tags,
            scope,
            project,
            project_strict,
            exclude_project,
            platform,
            min_importance,
            since,
            until,
            around,
            around_radius,
            no_boost,
            no_update,
        } => {
            let query = RecallQuery {
                text: text.unwrap_or_default(),
                context,
                browse,
                limit,
                types: parse_types(&types)?,
                tags,
                scope: parse_scope(scope.as_deref())?,
                project,
                project_strict,
                exclude_project,
                platform,
                min_importance,
                since,
                until,
                around,
                around_radius,
                no_boost,
                no_update,
            };
            recall(&config, &query, format).await
        }
        Commands::Ingest {
            paths,
            glob,
            model,
            provider,
            platform,
            project,
            dry_run,
            concurrency,
            workers,
            queue_high_watermark,
            queue_backpressure_timeout_ms,
            skip_ingested: _,
            bulk,
            retry: _,
            no_retry,
            max_retries,
            force,
            whole_file,
            chunk,
        } => {
            if let Some(model) = model {
                config.model = model;
            }
            if let Some(provider) = provider {
                config.provider = provider;
            }
            let whole_file_mode = if whole_file {
                WholeFileMode::Force
            } else if chunk {
                WholeFileMode::Never
            } else {
                WholeFileMode::Auto
            };
            let setup = IngestSetup {
                platform,
                project,
                concurrency,
                bulk,
                whole_file_mode,
                queue_high_watermark,
                queue_backpressure_timeout_ms,
                watch_mode: false,
            };
            let opts = IngestOptions {
                paths,
                glob,
                force,
                dry_run,
                no_retry,
                max_retries,
                workers,
                watch_mode: false,
                ..IngestOptions::default()
            };
            ingest(&config, &setup, &opts, format, shutdown).await
        }
        Commands::Watch {
            paths,
            glob,
            interval_secs,
        } => watch(&config, paths, glob, interval_secs, format, shutdown).await,
    }
}

fn setup(config: &AgenrConfig, format: OutputFormat) -> Result<CommandOutput> {
    std::fs::create_dir_all(&config.home)?;
    let mut storage = SqliteStorage::open(&config.db_path)?;
    storage.init()?;
    let text = match format {
        OutputFormat::Json => serde_json::json!({
            "home": config.home,
            "db": config.db_path,
            "initialized": true,
        })
        .to_string(),
        OutputFormat::Text => format!(
            "initialized memory store at {}\n",
            config.db_path.display()
        ),
    };
    Ok(CommandOutput::ok(text))
}

fn render_config(config: &AgenrConfig, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(config)
            .unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}")),
        OutputFormat::Text => format!(
            "home: {}\ndb: {}\nprovider: {}\nmodel: {}\nembed model: {}\napi key: {}\n",
            config.home.display(),
            config.db_path.display(),
            config.provider,
            config.model,
            config.embed_model,
            if config.api_key.is_some() {
                "configured"
            } else {
                "missing"
            },
        ),
    }
}

fn health(config: &AgenrConfig, format: OutputFormat) -> Result<CommandOutput> {
    let mut storage = SqliteStorage::open(&config.db_path)?;
    storage.init()?;
    let stats = storage.stats()?;
    let watched = crate::ingest::watch_state::WatchState::load(&config.watch_state_path())
        .map(|s| s.files.len())
        .unwrap_or(0);
    let mut text = output::format_health(&stats, format);
    if format == OutputFormat::Text {
        text.push_str(&format!("watched files: {watched}\n"));
    }
    Ok(CommandOutput::ok(text))
}

async fn recall(
    config: &AgenrConfig,
    query: &RecallQuery,
    format: OutputFormat,
) -> Result<CommandOutput> {
    let mut storage = SqliteStorage::open(&config.db_path)?;
    storage.init()?;

    let embedder: Option<Arc<dyn Embedder>> = config.api_key.as_deref().map(|key| {
        Arc::new(OpenAiEmbedder::new(
            key,
            config.base_url.as_deref(),
            Some(&config.embed_model),
        )) as Arc<dyn Embedder>
    });

    let mut engine = RecallEngine::new(storage, embedder);
    let results = engine.recall(query, Utc::now()).await?;
    Ok(CommandOutput::ok(output::format_recall_results(
        &results, format,
    )))
}

/// Run-level knobs shared by `ingest` and `watch`.
struct IngestSetup {
    platform: Option<String>,
    project: Option<String>,
    concurrency: usize,
    bulk: bool,
    whole_file_mode: WholeFileMode,
    queue_high_watermark: usize,
    queue_backpressure_timeout_ms: u64,
    watch_mode: bool,
}

async fn ingest(
    config: &AgenrConfig,
    setup: &IngestSetup,
    opts: &IngestOptions,
    format: OutputFormat,
    shutdown: Arc<AtomicBool>,
) -> Result<CommandOutput> {
    let api_key = config.require_api_key()?.to_string();
    let llm: Arc<dyn crate::llm::LlmClient> =
        Arc::new(OpenAiClient::new(&api_key, config.base_url.as_deref()));
    let embedder: Arc<dyn Embedder> = Arc::new(OpenAiEmbedder::new(
        &api_key,
        config.base_url.as_deref(),
        Some(&config.embed_model),
    ));
    let cache = Arc::new(tokio::sync::Mutex::new(EmbeddingCache::default()));

    std::fs::create_dir_all(&config.home)?;
    let mut write_storage = SqliteStorage::open(&config.db_path)?;
    write_storage.init()?;
    let mut read_storage = SqliteStorage::open(&config.db_path)?;
    read_storage.init()?;

    let pipeline = StorePipeline::new(
        Arc::clone(&embedder),
        Arc::clone(&cache),
        Some(Arc::clone(&llm)),
        DedupConfig {
            model: config.model.clone(),
            skip_llm_dedup: setup.bulk,
            force: opts.force,
        },
    );
    let queue = WriteQueue::spawn(
        write_storage,
        pipeline,
        QueueConfig {
            batch_size: if setup.bulk {
                BULK_BATCH_SIZE
            } else {
                crate::queue::DEFAULT_BATCH_SIZE
            },
            high_watermark: setup.queue_high_watermark,
            backpressure_timeout: Duration::from_millis(setup.queue_backpressure_timeout_ms),
        },
        Arc::clone(&shutdown),
    );

    let prefetch = Arc::new(PrefetchContext {
        storage: Arc::new(std::sync::Mutex::new(read_storage)),
        embedder: Arc::clone(&embedder),
        cache: Arc::clone(&cache),
    });
    let extractor = Arc::new(Extractor::new(
        llm,
        Some(prefetch),
        ExtractorConfig {
            model: config.model.clone(),
            whole_file: setup.whole_file_mode,
            no_prefetch: false,
            no_dedup: setup.bulk,
            llm_concurrency: setup.concurrency,
            watch_mode: setup.watch_mode,
            platform: setup.platform.clone(),
            project: setup.project.clone(),
        },
        Arc::clone(&shutdown),
    ));

    let driver = IngestDriver {
        queue: Arc::clone(&queue),
        extractor,
        home: config.home.clone(),
        shutdown,
    };

    let report = driver.run(opts).await;
    queue.drain().await.ok();
    queue.destroy().await;
    let report = report?;

    Ok(CommandOutput {
        text: output::format_ingest_report(&report, format),
        exit_code: report.exit_code(),
    })
}

async fn watch(
    config: &AgenrConfig,
    paths: Vec<PathBuf>,
    glob: Option<String>,
    interval_secs: u64,
    format: OutputFormat,
    shutdown: Arc<AtomicBool>,
) -> Result<CommandOutput> {
    let _guard = PidFileGuard::acquire(&config.pid_path())?;
    let setup = IngestSetup {
        platform: None,
        project: None,
        concurrency: 2,
        bulk: false,
        whole_file_mode: WholeFileMode::Never,
        queue_high_watermark: crate::queue::DEFAULT_HIGH_WATERMARK,
        queue_backpressure_timeout_ms: crate::queue::DEFAULT_BACKPRESSURE_TIMEOUT_MS,
        watch_mode: true,
    };
    let opts = IngestOptions {
        paths,
        glob,
        no_retry: true,
        workers: 1,
        watch_mode: true,
        ..IngestOptions::default()
    };

    let mut passes = 0u64;
    while !shutdown.load(Ordering::SeqCst) {
        let result = ingest(config, &setup, &opts, format, Arc::clone(&shutdown)).await?;
        passes += 1;
        info!(passes, exit_code = result.exit_code, "watch pass complete");

        let mut waited = 0u64;
        while waited < interval_secs && !shutdown.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(1)).await;
            waited += 1;
        }
    }

    Ok(CommandOutput {
        text: format!("watch stopped after {passes} passes\n"),
        exit_code: 130,
    })
}

fn parse_types(raw: &[String]) -> Result<Vec<EntryType>> {
    raw.iter()
        .map(|s| {
            EntryType::parse(s).ok_or_else(|| {
                ConfigError::Invalid {
                    name: "type".to_string(),
                    reason: format!("unknown entry type '{s}'"),
                }
                .into()
            })
        })
        .collect()
}

fn parse_scope(raw: Option<&str>) -> Result<Option<Scope>> {
    raw.map(|s| {
        Scope::parse(s).ok_or_else(|| {
            ConfigError::Invalid {
                name: "scope".to_string(),
                reason: format!("unknown scope '{s}'"),
            }
            .into()
        })
    })
    .transpose()
}
