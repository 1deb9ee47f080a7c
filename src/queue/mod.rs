//! Serialized, batched write queue with backpressure.
//!
//! All ingest-path database writes flow through a single actor task that
//! owns the storage handle and the dedup pipeline. Pushes are admitted
//! through a semaphore sized to the high watermark, grouped into flushes
//! by batch size or an idle tick, and each push group applies atomically
//! under its own savepoint. `run_exclusive` ships a closure to the actor,
//! making exclusive sections mutually exclusive with batches by
//! construction.

#![allow(clippy::cast_possible_truncation)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tracing::{debug, warn};

use crate::core::Entry;
use crate::dedup::{BatchOutcome, StorePipeline};
use crate::error::{Error, QueueError, Result, StorageError};
use crate::storage::SqliteStorage;

/// Default pending-entry high watermark.
pub const DEFAULT_HIGH_WATERMARK: usize = 2_000;

/// Default backpressure push timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT_MS: u64 = 30_000;

/// Default flush batch size in entries.
pub const DEFAULT_BATCH_SIZE: usize = 40;

/// Idle interval after which a partial batch flushes anyway.
const IDLE_FLUSH_MS: u64 = 50;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Entries per flush.
    pub batch_size: usize,
    /// Maximum pending entries before pushes block.
    pub high_watermark: usize,
    /// How long a blocked push waits before failing with backpressure.
    pub backpressure_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            high_watermark: DEFAULT_HIGH_WATERMARK,
            backpressure_timeout: Duration::from_millis(DEFAULT_BACKPRESSURE_TIMEOUT_MS),
        }
    }
}

/// Result of one push after its group has been stored.
#[derive(Debug, Clone, Default)]
pub struct BatchWriteResult {
    /// Outcome counters for this push's entries.
    pub outcome: BatchOutcome,
    /// Ids now carrying this push's knowledge (inserted or reinforced),
    /// used for co-recall edges.
    pub stored_ids: Vec<String>,
}

struct PushGroup {
    entries: Vec<Entry>,
    source_file: String,
    permits: u32,
    done: oneshot::Sender<Result<BatchWriteResult>>,
}

type ExclusiveJob = Box<dyn FnOnce(&mut SqliteStorage) + Send>;

enum Command {
    Push(PushGroup),
    Cancel {
        source_file: String,
    },
    Exclusive(ExclusiveJob),
    Drain(oneshot::Sender<()>),
    Destroy(oneshot::Sender<()>),
}

/// Handle to the serialized write queue.
pub struct WriteQueue {
    tx: mpsc::UnboundedSender<Command>,
    permits: Arc<Semaphore>,
    config: QueueConfig,
    shutdown: Arc<AtomicBool>,
    closed: AtomicBool,
    handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WriteQueue {
    /// Spawns the writer actor over the given storage and pipeline.
    #[must_use]
    pub fn spawn(
        storage: SqliteStorage,
        pipeline: StorePipeline,
        config: QueueConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let permits = Arc::new(Semaphore::new(config.high_watermark.max(1)));

        let actor = Actor {
            storage,
            pipeline,
            rx,
            permits: Arc::clone(&permits),
            batch_size: config.batch_size.max(1),
            pending: Vec::new(),
            group_seq: 0,
        };
        let handle = tokio::spawn(actor.run());

        Arc::new(Self {
            tx,
            permits,
            config,
            shutdown,
            closed: AtomicBool::new(false),
            handle: std::sync::Mutex::new(Some(handle)),
        })
    }

    /// Enqueues one chunk's entries; resolves after the flush containing
    /// them has been stored.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Backpressure`] when the queue stays full past
    /// the timeout, [`QueueError::Shutdown`] after shutdown or destroy,
    /// [`QueueError::Cancelled`] if `cancel` dropped the group, and any
    /// storage/embedding error raised while storing the group.
    pub async fn push(
        &self,
        entries: Vec<Entry>,
        source_file: &str,
        _content_hash: &str,
    ) -> Result<BatchWriteResult> {
        if entries.is_empty() {
            return Ok(BatchWriteResult::default());
        }
        if self.closed.load(Ordering::SeqCst) || self.shutdown.load(Ordering::SeqCst) {
            return Err(QueueError::Shutdown.into());
        }

        // Admission control: one permit per entry, capped at the watermark
        // so oversized pushes cannot deadlock.
        #[allow(clippy::cast_possible_truncation)]
        let want = entries.len().min(self.config.high_watermark) as u32;
        let acquired = tokio::time::timeout(
            self.config.backpressure_timeout,
            Arc::clone(&self.permits).acquire_many_owned(want),
        )
        .await;

        let permit = match acquired {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(QueueError::Shutdown.into()),
            Err(_) => {
                return Err(QueueError::Backpressure {
                    pending: entries.len(),
                    timeout_ms: self.config.backpressure_timeout.as_millis() as u64,
                }
                .into());
            }
        };
        // The actor returns these permits after the group is written.
        permit.forget();

        let (done_tx, done_rx) = oneshot::channel();
        let group = PushGroup {
            entries,
            source_file: source_file.to_string(),
            permits: want,
            done: done_tx,
        };
        self.tx
            .send(Command::Push(group))
            .map_err(|_| Error::from(QueueError::Shutdown))?;

        done_rx.await.map_err(|_| Error::from(QueueError::Shutdown))?
    }

    /// Drops all queued-but-not-yet-written entries for a source file.
    pub fn cancel(&self, source_file: &str) {
        let _ = self.tx.send(Command::Cancel {
            source_file: source_file.to_string(),
        });
    }

    /// Runs a closure with sole database access, mutually exclusive with
    /// batches and other exclusive sections.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Shutdown`] when the actor is gone, or
    /// whatever the closure returns.
    pub async fn run_exclusive<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteStorage) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: ExclusiveJob = Box::new(move |storage| {
            let _ = tx.send(f(storage));
        });
        self.tx
            .send(Command::Exclusive(job))
            .map_err(|_| Error::from(QueueError::Shutdown))?;
        rx.await.map_err(|_| Error::from(QueueError::Shutdown))?
    }

    /// Awaits queue empty: all pending groups flushed.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Shutdown`] when the actor is gone.
    pub async fn drain(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::Drain(tx))
            .map_err(|_| Error::from(QueueError::Shutdown))?;
        rx.await.map_err(|_| Error::from(QueueError::Shutdown))
    }

    /// Stops accepting new work, flushes what is pending, and joins the
    /// actor.
    pub async fn destroy(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Destroy(tx)).is_ok() {
            let _ = rx.await;
        }
        let handle = self.handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// The writer actor: owns storage and applies flushes sequentially.
struct Actor {
    storage: SqliteStorage,
    pipeline: StorePipeline,
    rx: mpsc::UnboundedReceiver<Command>,
    permits: Arc<Semaphore>,
    batch_size: usize,
    pending: Vec<PushGroup>,
    group_seq: u64,
}

impl Actor {
    async fn run(mut self) {
        loop {
            let has_pending = !self.pending.is_empty();
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(Command::Push(group)) => {
                        self.pending.push(group);
                        if self.pending_entries() >= self.batch_size {
                            self.flush().await;
                        }
                    }
                    Some(Command::Cancel { source_file }) => {
                        let mut kept = Vec::new();
                        let mut cancelled = Vec::new();
                        for group in self.pending.drain(..) {
                            if group.source_file == source_file {
                                cancelled.push(group);
                            } else {
                                kept.push(group);
                            }
                        }
                        self.pending = kept;
                        for group in cancelled {
                            self.permits.add_permits(group.permits as usize);
                            let _ = group.done.send(Err(QueueError::Cancelled {
                                source_file: source_file.clone(),
                            }
                            .into()));
                        }
                    }
                    Some(Command::Exclusive(job)) => {
                        job(&mut self.storage);
                    }
                    Some(Command::Drain(ack)) => {
                        self.flush().await;
                        let _ = ack.send(());
                    }
                    Some(Command::Destroy(ack)) => {
                        self.flush().await;
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.flush().await;
                        break;
                    }
                },
                () = tokio::time::sleep(Duration::from_millis(IDLE_FLUSH_MS)), if has_pending => {
                    self.flush().await;
                }
            }
        }
    }

    fn pending_entries(&self) -> usize {
        self.pending.iter().map(|g| g.entries.len()).sum()
    }

    /// Applies all pending groups. Each group is atomic under its own
    /// savepoint; a failing group rolls back alone and other groups in
    /// the same flush proceed.
    async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let groups: Vec<PushGroup> = self.pending.drain(..).collect();
        debug!(groups = groups.len(), "flushing write queue");

        for group in groups {
            self.group_seq += 1;
            let name = format!("grp_{}", self.group_seq);
            let result = self.apply_group(&name, &group).await;
            self.permits.add_permits(group.permits as usize);
            let _ = group.done.send(result);
        }
    }

    async fn apply_group(&mut self, savepoint: &str, group: &PushGroup) -> Result<BatchWriteResult> {
        self.storage.begin_savepoint(savepoint)?;

        let mut result = BatchWriteResult::default();
        let now = Utc::now();
        for entry in group.entries.iter().cloned() {
            match self.pipeline.store_entry(&mut self.storage, entry, now).await {
                Ok((outcome, id)) => {
                    result.outcome.absorb(&outcome);
                    if !result.stored_ids.contains(&id) {
                        result.stored_ids.push(id);
                    }
                }
                Err(e) => {
                    warn!(source = %group.source_file, error = %e, "batch write failed, rolling back group");
                    if let Err(rollback_err) = self.storage.rollback_savepoint(savepoint) {
                        return Err(StorageError::Database(format!(
                            "rollback failed after {e}: {rollback_err}"
                        ))
                        .into());
                    }
                    return Err(e);
                }
            }
        }

        self.storage.release_savepoint(savepoint)?;
        Ok(result)
    }
}

/// Per-file accumulation of stored ids, used by the ingest driver to
/// build co-recall edges after extraction finishes.
#[derive(Debug, Default)]
pub struct StoredIdSet {
    ids_by_file: HashMap<String, Vec<String>>,
}

impl StoredIdSet {
    /// Records ids stored for a file.
    pub fn record(&mut self, file: &str, ids: &[String]) {
        let slot = self.ids_by_file.entry(file.to_string()).or_default();
        for id in ids {
            if !slot.contains(id) {
                slot.push(id.clone());
            }
        }
    }

    /// All unordered pairs of ids stored for a file.
    #[must_use]
    pub fn pairs_for(&self, file: &str) -> Vec<(String, String)> {
        let Some(ids) = self.ids_by_file.get(file) else {
            return Vec::new();
        };
        let mut pairs = Vec::new();
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                pairs.push((ids[i].clone(), ids[j].clone()));
            }
        }
        pairs
    }

    /// Ids recorded for a file.
    #[must_use]
    pub fn ids_for(&self, file: &str) -> &[String] {
        self.ids_by_file
            .get(file)
            .map_or(&[], std::vec::Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EntryType, Expiry};
    use crate::dedup::DedupConfig;
    use crate::embedding::{EmbeddingCache, FallbackEmbedder};

    fn make_queue(config: QueueConfig) -> Arc<WriteQueue> {
        let mut storage = SqliteStorage::in_memory().unwrap();
        storage.init().unwrap();
        let pipeline = StorePipeline::new(
            Arc::new(FallbackEmbedder::new()),
            Arc::new(tokio::sync::Mutex::new(EmbeddingCache::default())),
            None,
            DedupConfig::default(),
        );
        WriteQueue::spawn(storage, pipeline, config, Arc::new(AtomicBool::new(false)))
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

    #[tokio::test]
    async fn test_push_stores_entries() {
        let queue = make_queue(QueueConfig::default());
        let result = queue
            .push(
                vec![
                    entry("a", "First durable fact pushed through the queue"),
                    entry("b", "Second durable fact pushed through the queue"),
                ],
                "/tmp/a.jsonl",
                "hash",
            )
            .await
            .unwrap();

        assert_eq!(result.outcome.added, 2);
        assert_eq!(result.stored_ids.len(), 2);

        let count = queue
            .run_exclusive(|storage| storage.active_entry_count())
            .await
            .unwrap();
        assert_eq!(count, 2);
        queue.destroy().await;
    }

    #[tokio::test]
    async fn test_empty_push_is_noop() {
        let queue = make_queue(QueueConfig::default());
        let result = queue.push(Vec::new(), "/tmp/a.jsonl", "hash").await.unwrap();
        assert_eq!(result.outcome, BatchOutcome::default());
        queue.destroy().await;
    }

    #[tokio::test]
    async fn test_run_exclusive_round_trips() {
        let queue = make_queue(QueueConfig::default());
        let answer = queue.run_exclusive(|_| Ok(41 + 1)).await.unwrap();
        assert_eq!(answer, 42);
        queue.destroy().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_backpressure_timeout() {
        let queue = make_queue(QueueConfig {
            batch_size: 100,
            high_watermark: 10,
            backpressure_timeout: Duration::from_millis(100),
        });

        // Saturate the watermark with an exclusive section holding the
        // actor, so pushed groups stay pending.
        let (hold_tx, hold_rx) = std::sync::mpsc::channel::<()>();
        let blocker = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let _ = queue
                    .run_exclusive(move |_| {
                        let _ = hold_rx.recv();
                        Ok(())
                    })
                    .await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // 10 entries fill the watermark while the consumer is blocked
        let first: Vec<Entry> = (0..10)
            .map(|i| entry("s", &format!("A durable filler fact number {i} for the test")))
            .collect();
        let queue2 = Arc::clone(&queue);
        let first_push =
            tokio::spawn(async move { queue2.push(first, "/tmp/a.jsonl", "h").await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The 11th entry cannot acquire a permit and times out
        let err = queue
            .push(
                vec![entry("s", "The eleventh entry that must hit backpressure")],
                "/tmp/b.jsonl",
                "h",
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Queue(QueueError::Backpressure { .. })
        ));

        // Unblock the consumer: the first push completes
        let _ = hold_tx.send(());
        let result = first_push.await.unwrap().unwrap();
        assert_eq!(result.outcome.added, 10);
        blocker.await.unwrap();
        queue.destroy().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_drops_pending_groups() {
        let queue = make_queue(QueueConfig {
            batch_size: 1_000, // keep groups pending
            ..QueueConfig::default()
        });

        // Hold the actor in an exclusive section so the push stays queued
        let (hold_tx, hold_rx) = std::sync::mpsc::channel::<()>();
        let blocker = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let _ = queue
                    .run_exclusive(move |_| {
                        let _ = hold_rx.recv();
                        Ok(())
                    })
                    .await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let queue2 = Arc::clone(&queue);
        let push = tokio::spawn(async move {
            queue2
                .push(
                    vec![entry("s", "An entry that will be cancelled before writing")],
                    "/tmp/cancel.jsonl",
                    "h",
                )
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.cancel("/tmp/cancel.jsonl");
        let _ = hold_tx.send(());

        let err = push.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Queue(QueueError::Cancelled { .. })));
        blocker.await.unwrap();

        let count = queue
            .run_exclusive(|storage| storage.active_entry_count())
            .await
            .unwrap();
        assert_eq!(count, 0);
        queue.destroy().await;
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_work() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut storage = SqliteStorage::in_memory().unwrap();
        storage.init().unwrap();
        let pipeline = StorePipeline::new(
            Arc::new(FallbackEmbedder::new()),
            Arc::new(tokio::sync::Mutex::new(EmbeddingCache::default())),
            None,
            DedupConfig::default(),
        );
        let queue = WriteQueue::spawn(
            storage,
            pipeline,
            QueueConfig::default(),
            Arc::clone(&shutdown),
        );

        shutdown.store(true, Ordering::SeqCst);
        let err = queue
            .push(
                vec![entry("s", "Arrives after shutdown and must be refused")],
                "/tmp/a.jsonl",
                "h",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Queue(QueueError::Shutdown)));
        queue.destroy().await;
    }

    #[tokio::test]
    async fn test_destroy_flushes_then_refuses() {
        let queue = make_queue(QueueConfig::default());
        queue
            .push(
                vec![entry("s", "Stored before destroy closes the queue down")],
                "/tmp/a.jsonl",
                "h",
            )
            .await
            .unwrap();
        queue.destroy().await;

        let err = queue
            .push(
                vec![entry("s", "Pushed after destroy and must be refused")],
                "/tmp/a.jsonl",
                "h",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Queue(QueueError::Shutdown)));
    }

    #[tokio::test]
    async fn test_drain_waits_for_pending() {
        let queue = make_queue(QueueConfig {
            batch_size: 1_000,
            ..QueueConfig::default()
        });
        let queue2 = Arc::clone(&queue);
        let push = tokio::spawn(async move {
            queue2
                .push(
                    vec![entry("s", "A pending entry the drain must flush out")],
                    "/tmp/a.jsonl",
                    "h",
                )
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.drain().await.unwrap();
        let result = push.await.unwrap().unwrap();
        assert_eq!(result.outcome.added, 1);
        queue.destroy().await;
    }

    #[test]
    fn test_stored_id_set_pairs() {
        let mut set = StoredIdSet::default();
        set.record("/f", &["a".to_string(), "b".to_string()]);
        set.record("/f", &["b".to_string(), "c".to_string()]);
        let pairs = set.pairs_for("/f");
        assert_eq!(pairs.len(), 3);
        assert!(set.pairs_for("/other").is_empty());
        assert_eq!(set.ids_for("/f").len(), 3);
    }
}
