//! Ingest driver: orchestrates the full pipeline for a set of files.
//!
//! Expansion and scheduling, per-file extraction with queue pushes,
//! ingest-log bookkeeping, co-recall edges, watch-state offset sync, and
//! retry rounds over failed files.

pub mod pidfile;
pub mod watch_state;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use serde::Serialize;
use tracing::{info, warn};

use crate::core::hash_bytes;
use crate::dedup::BatchOutcome;
use crate::error::{Error, Result};
use crate::extract::{ChunkCompletion, Extractor, chunk_callback, dedup_exact};
use crate::parser;
use crate::queue::WriteQueue;

use watch_state::WatchState;

/// Default retry rounds over failed files.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Sleeps between retry rounds; the last value repeats.
pub const RETRY_ROUND_SLEEPS: [Duration; 3] = [
    Duration::from_secs(10),
    Duration::from_secs(30),
    Duration::from_secs(60),
];

/// Transcript extensions picked up when expanding directories.
const TRANSCRIPT_EXTENSIONS: [&str; 4] = ["jsonl", "md", "markdown", "txt"];

/// Options for one ingest run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Files and directories to ingest.
    pub paths: Vec<PathBuf>,
    /// Additional glob pattern.
    pub glob: Option<String>,
    /// Delete file-owned rows and re-ingest.
    pub force: bool,
    /// Report without extracting or writing.
    pub dry_run: bool,
    /// Disable retry rounds.
    pub no_retry: bool,
    /// Retry rounds over failed files.
    pub max_retries: u32,
    /// Files processed in parallel.
    pub workers: usize,
    /// Tail-read JSONL files from the stored offset.
    pub watch_mode: bool,
    /// Chunk character budget.
    pub chunk_budget: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            glob: None,
            force: false,
            dry_run: false,
            no_retry: false,
            max_retries: DEFAULT_MAX_RETRIES,
            workers: 1,
            watch_mode: false,
            chunk_budget: parser::DEFAULT_CHUNK_BUDGET,
        }
    }
}

/// Per-file result line.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    /// File path.
    pub path: String,
    /// Skipped: already ingested at this content hash.
    pub skipped: bool,
    /// Failure reason, when the file failed.
    pub failed: Option<String>,
    /// Validated entries extracted (pre store dedup).
    pub entries_extracted: usize,
    /// Store outcome counters.
    pub outcome: BatchOutcome,
    /// Rows a `--force --dry-run` would delete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub would_delete: Option<usize>,
}

impl FileReport {
    fn new(path: &Path) -> Self {
        Self {
            path: path.display().to_string(),
            skipped: false,
            failed: None,
            entries_extracted: 0,
            outcome: BatchOutcome::default(),
            would_delete: None,
        }
    }
}

/// Aggregate result of an ingest run.
#[derive(Debug, Default, Serialize)]
pub struct IngestReport {
    /// Final per-file reports.
    pub files: Vec<FileReport>,
    /// Retry rounds executed (0 = first pass only).
    pub rounds: u32,
    /// Shutdown interrupted the run.
    pub aborted: bool,
}

impl IngestReport {
    /// Files that ended in failure.
    #[must_use]
    pub fn failed_files(&self) -> Vec<&FileReport> {
        self.files.iter().filter(|f| f.failed.is_some()).collect()
    }

    /// Files skipped as already ingested.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.files.iter().filter(|f| f.skipped).count()
    }

    /// Sum of validated entries extracted.
    #[must_use]
    pub fn total_extracted(&self) -> usize {
        self.files.iter().map(|f| f.entries_extracted).sum()
    }

    /// Sum of store outcomes across files.
    #[must_use]
    pub fn totals(&self) -> BatchOutcome {
        let mut total = BatchOutcome::default();
        for file in &self.files {
            total.added += file.outcome.added;
            total.updated += file.outcome.updated;
            total.skipped += file.outcome.skipped;
            total.superseded += file.outcome.superseded;
            total.reinforced += file.outcome.reinforced;
            total.llm_dedup_calls += file.outcome.llm_dedup_calls;
        }
        total
    }

    /// Process exit code: 0 success, 1 partial, 2 nothing processed,
    /// 130 aborted by signal.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        if self.aborted {
            return 130;
        }
        if self.files.is_empty() {
            return 2;
        }
        let failed = self.failed_files().len();
        if failed == self.files.len() {
            2
        } else if failed > 0 {
            1
        } else {
            0
        }
    }
}

/// State shared with the per-chunk queue callback.
#[derive(Default)]
struct FileProgress {
    outcome: BatchOutcome,
    stored_ids: Vec<String>,
    extracted: usize,
    push_error: Option<String>,
}

/// The ingest driver.
pub struct IngestDriver {
    /// Serialized writer.
    pub queue: Arc<WriteQueue>,
    /// Extraction engine.
    pub extractor: Arc<Extractor>,
    /// `$AGENR_HOME` for `watch.json` and `watcher.pid`.
    pub home: PathBuf,
    /// Process-wide shutdown flag.
    pub shutdown: Arc<AtomicBool>,
}

impl IngestDriver {
    /// Runs the full ingest over the expanded input set.
    ///
    /// # Errors
    ///
    /// Returns an error when another watcher owns the write lock or the
    /// watch state cannot be read; per-file failures are reported, not
    /// returned.
    pub async fn run(&self, opts: &IngestOptions) -> Result<IngestReport> {
        if !opts.watch_mode {
            let pid_path = self.home.join(pidfile::PID_FILE);
            if let Some(pid) = pidfile::live_watcher(&pid_path) {
                return Err(Error::InvalidState {
                    message: format!(
                        "a watcher (pid {pid}) owns the store; stop it before ingesting"
                    ),
                });
            }
        }

        let mut files = expand_inputs(&opts.paths, opts.glob.as_deref())?;
        // Smallest first so errors surface quickly
        files.sort_by_key(|f| std::fs::metadata(f).map(|m| m.len()).unwrap_or(0));

        let watch_path = self.home.join(watch_state::WATCH_STATE_FILE);
        let watch = Arc::new(std::sync::Mutex::new(WatchState::load(&watch_path)?));

        let mut report = IngestReport::default();
        let mut pending: Vec<PathBuf> = files;
        let mut round = 0u32;

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                report.aborted = true;
                break;
            }

            let results = self.run_round(&pending, opts, &watch, &watch_path).await;
            let mut next_round = Vec::new();
            for (path, file_report) in results {
                if file_report.failed.is_some() {
                    next_round.push(path);
                }
                upsert_report(&mut report.files, file_report);
            }
            if self.shutdown.load(Ordering::SeqCst) {
                report.aborted = true;
                break;
            }

            if next_round.is_empty() || opts.no_retry || round >= opts.max_retries {
                break;
            }
            let sleep = RETRY_ROUND_SLEEPS
                .get(round as usize)
                .copied()
                .unwrap_or(RETRY_ROUND_SLEEPS[RETRY_ROUND_SLEEPS.len() - 1]);
            info!(
                failed = next_round.len(),
                round = round + 1,
                sleep_secs = sleep.as_secs(),
                "retrying failed files"
            );
            tokio::time::sleep(sleep).await;
            round += 1;
            report.rounds = round;
            pending = next_round;
        }

        if let Ok(state) = watch.lock() {
            if let Err(e) = state.save(&watch_path) {
                warn!(error = %e, "failed to save watch state");
            }
        }
        Ok(report)
    }

    /// Processes one round of files with bounded file-level parallelism.
    async fn run_round(
        &self,
        files: &[PathBuf],
        opts: &IngestOptions,
        watch: &Arc<std::sync::Mutex<WatchState>>,
        watch_path: &Path,
    ) -> Vec<(PathBuf, FileReport)> {
        let workers = opts.workers.clamp(1, files.len().max(1));
        futures_util::stream::iter(files.iter().cloned())
            .map(|path| {
                let watch = Arc::clone(watch);
                let watch_path = watch_path.to_path_buf();
                async move {
                    if self.shutdown.load(Ordering::SeqCst) {
                        let mut r = FileReport::new(&path);
                        r.failed = Some("aborted before processing".to_string());
                        return (path, r);
                    }
                    let report = self
                        .process_file(&path, opts, &watch, &watch_path)
                        .await
                        .unwrap_or_else(|e| {
                            let mut r = FileReport::new(&path);
                            r.failed = Some(e.to_string());
                            r
                        });
                    (path, report)
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await
    }

    #[allow(clippy::too_many_lines)]
    async fn process_file(
        &self,
        path: &Path,
        opts: &IngestOptions,
        watch: &Arc<std::sync::Mutex<WatchState>>,
        watch_path: &Path,
    ) -> Result<FileReport> {
        let mut report = FileReport::new(path);
        let path_str = path.display().to_string();
        let bytes = std::fs::read(path)?;
        let content_hash = hash_bytes(&bytes);
        drop(bytes);

        // Already ingested at this hash: skip, but backfill co-recall edges
        let already = {
            let hash = content_hash.clone();
            let p = path_str.clone();
            self.queue
                .run_exclusive(move |storage| storage.is_ingested(&p, &hash))
                .await?
        };
        if already && !opts.force {
            report.skipped = true;
            let p = path_str.clone();
            self.queue
                .run_exclusive(move |storage| {
                    let ids = storage.entry_ids_for_file(&p)?;
                    let mut set = crate::queue::StoredIdSet::default();
                    set.record(&p, &ids);
                    storage.upsert_co_recall_edges(&set.pairs_for(&p))
                })
                .await?;
            return Ok(report);
        }

        if opts.force {
            let p = path_str.clone();
            if opts.dry_run {
                let count = self
                    .queue
                    .run_exclusive(move |storage| storage.count_rows_for_file(&p))
                    .await?;
                report.would_delete = Some(count);
                report.skipped = true;
                return Ok(report);
            }
            let deleted = self
                .queue
                .run_exclusive(move |storage| storage.delete_rows_for_file(&p))
                .await?;
            if deleted > 0 {
                info!(file = %path_str, deleted, "force cleanup removed prior rows");
            }
        }

        let base_offset = if opts.watch_mode && parser::is_jsonl(path) && !opts.force {
            watch.lock().map(|s| s.offset_for(&path_str)).unwrap_or(0)
        } else {
            0
        };

        let transcript = parser::parse_file(path, base_offset, opts.chunk_budget)?;
        if transcript.is_empty() {
            // Nothing to extract; log the hash so the file is not re-read
            let p = path_str.clone();
            let hash = content_hash.clone();
            self.queue
                .run_exclusive(move |storage| storage.record_ingested(&p, &hash, Utc::now()))
                .await?;
            return Ok(report);
        }

        if opts.dry_run {
            report.entries_extracted = 0;
            report.skipped = true;
            return Ok(report);
        }

        // Per-chunk: exact-dedup in process, then push as one batch
        let progress = Arc::new(std::sync::Mutex::new(FileProgress::default()));
        let queue = Arc::clone(&self.queue);
        let cb_progress = Arc::clone(&progress);
        let cb_path = path_str.clone();
        let cb_hash = content_hash.clone();
        let on_chunk = chunk_callback(move |completion: ChunkCompletion| {
            let queue = Arc::clone(&queue);
            let progress = Arc::clone(&cb_progress);
            let path = cb_path.clone();
            let hash = cb_hash.clone();
            async move {
                let extracted = completion.entries_extracted;
                let entries = dedup_exact(completion.entries);
                match queue.push(entries, &path, &hash).await {
                    Ok(result) => {
                        if let Ok(mut p) = progress.lock() {
                            p.extracted += extracted;
                            p.outcome.added += result.outcome.added;
                            p.outcome.updated += result.outcome.updated;
                            p.outcome.skipped += result.outcome.skipped;
                            p.outcome.superseded += result.outcome.superseded;
                            p.outcome.reinforced += result.outcome.reinforced;
                            p.outcome.llm_dedup_calls += result.outcome.llm_dedup_calls;
                            for id in result.stored_ids {
                                if !p.stored_ids.contains(&id) {
                                    p.stored_ids.push(id);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        if let Ok(mut p) = progress.lock() {
                            if p.push_error.is_none() {
                                p.push_error = Some(e.to_string());
                            }
                        }
                    }
                }
            }
        });

        let extraction = self.extractor.extract_file(path, &transcript, on_chunk).await;

        let (outcome, stored_ids, extracted, push_error) = {
            let p = progress.lock().map_err(|_| Error::InvalidState {
                message: "file progress lock poisoned".to_string(),
            })?;
            (
                p.outcome,
                p.stored_ids.clone(),
                p.extracted,
                p.push_error.clone(),
            )
        };
        report.entries_extracted = extracted;
        report.outcome = outcome;

        let total_chunks = if extraction.whole_file_used {
            1
        } else {
            transcript.chunks.len()
        };

        if let Some(push_error) = push_error {
            self.queue.cancel(&path_str);
            report.failed = Some(format!("write failed: {push_error}"));
            return Ok(report);
        }
        if extraction.successful_chunks == 0 && total_chunks > 0 {
            self.queue.cancel(&path_str);
            let reason = extraction
                .warnings
                .first()
                .cloned()
                .unwrap_or_else(|| "no chunk succeeded".to_string());
            report.failed = Some(reason);
            return Ok(report);
        }
        if extraction.aborted && extraction.skipped_chunks > 0 {
            report.failed = Some("aborted before all chunks were extracted".to_string());
            return Ok(report);
        }
        if extraction.failed_chunks > 0 {
            // Partial extraction: some knowledge is missing, keep the file
            // eligible for a retry round
            report.failed = Some(format!(
                "{} of {total_chunks} chunks failed",
                extraction.failed_chunks
            ));
            return Ok(report);
        }

        // Every extracted entry is stored: log the file and link the
        // co-extracted pairs
        let p = path_str.clone();
        let hash = content_hash;
        let ids = stored_ids;
        self.queue
            .run_exclusive(move |storage| {
                storage.record_ingested(&p, &hash, Utc::now())?;
                let mut set = crate::queue::StoredIdSet::default();
                set.record(&p, &ids);
                storage.upsert_co_recall_edges(&set.pairs_for(&p))
            })
            .await?;

        if parser::is_jsonl(path) {
            if let Some(byte_end) = transcript.last_byte_end() {
                let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(byte_end);
                if let Ok(mut state) = watch.lock() {
                    state.advance(&path_str, byte_end, size, Utc::now(), opts.force);
                    if let Err(e) = state.save(watch_path) {
                        warn!(error = %e, "failed to sync watch state");
                    }
                }
            }
        }

        Ok(report)
    }
}

fn upsert_report(reports: &mut Vec<FileReport>, incoming: FileReport) {
    if let Some(existing) = reports.iter_mut().find(|r| r.path == incoming.path) {
        *existing = incoming;
    } else {
        reports.push(incoming);
    }
}

/// Expands input paths and an optional glob into a flat file list.
///
/// Directories are walked recursively for transcript extensions;
/// duplicates are removed.
///
/// # Errors
///
/// Returns an error for an invalid glob pattern or unreadable directory.
pub fn expand_inputs(paths: &[PathBuf], pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut out: Vec<PathBuf> = Vec::new();

    for path in paths {
        if path.is_dir() {
            collect_dir(path, &mut out)?;
        } else if path.is_file() {
            out.push(path.clone());
        }
    }

    if let Some(pattern) = pattern {
        let matches = glob::glob(pattern).map_err(|e| Error::InvalidState {
            message: format!("invalid glob '{pattern}': {e}"),
        })?;
        for item in matches {
            match item {
                Ok(path) if path.is_file() => out.push(path),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "glob entry unreadable"),
            }
        }
    }

    out.sort();
    out.dedup();
    Ok(out)
}

fn collect_dir(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_dir(&path, out)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| {
                TRANSCRIPT_EXTENSIONS
                    .iter()
                    .any(|known| e.eq_ignore_ascii_case(known))
            })
        {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_inputs_walks_dirs_and_dedupes() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jsonl");
        let b = dir.path().join("sub").join("b.md");
        std::fs::create_dir_all(b.parent().unwrap()).unwrap();
        std::fs::write(&a, "{}\n").unwrap();
        std::fs::write(&b, "# notes\n").unwrap();
        std::fs::write(dir.path().join("ignored.log"), "x").unwrap();

        let expanded =
            expand_inputs(&[dir.path().to_path_buf(), a.clone()], None).unwrap();
        assert_eq!(expanded.len(), 2);
        assert!(expanded.contains(&a));
        assert!(expanded.contains(&b));
    }

    #[test]
    fn test_expand_inputs_glob() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jsonl");
        std::fs::write(&a, "{}\n").unwrap();
        let pattern = format!("{}/*.jsonl", dir.path().display());
        let expanded = expand_inputs(&[], Some(&pattern)).unwrap();
        assert_eq!(expanded, vec![a]);
    }

    #[test]
    fn test_invalid_glob_rejected() {
        assert!(expand_inputs(&[], Some("[")).is_err());
    }

    #[test]
    fn test_exit_codes() {
        let mut report = IngestReport::default();
        assert_eq!(report.exit_code(), 2); // nothing matched

        report.files.push(FileReport {
            path: "/a".to_string(),
            skipped: false,
            failed: None,
            entries_extracted: 2,
            outcome: BatchOutcome::default(),
            would_delete: None,
        });
        assert_eq!(report.exit_code(), 0);

        report.files.push(FileReport {
            path: "/b".to_string(),
            skipped: false,
            failed: Some("boom".to_string()),
            entries_extracted: 0,
            outcome: BatchOutcome::default(),
            would_delete: None,
        });
        assert_eq!(report.exit_code(), 1);

        report.files.remove(0);
        assert_eq!(report.exit_code(), 2); // all failed

        report.aborted = true;
        assert_eq!(report.exit_code(), 130);
    }

    #[test]
    fn test_upsert_report_replaces_by_path() {
        let mut reports = Vec::new();
        let mut first = FileReport::new(Path::new("/a"));
        first.failed = Some("transient".to_string());
        upsert_report(&mut reports, first);
        assert_eq!(reports.len(), 1);

        let second = FileReport::new(Path::new("/a"));
        upsert_report(&mut reports, second);
        assert_eq!(reports.len(), 1);
        assert!(reports[0].failed.is_none());
    }
}
