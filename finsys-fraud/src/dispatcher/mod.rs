//! Scoring dispatcher
//!
//! Transactions are scored off the write path: callers enqueue a persisted
//! record and return immediately, and a fixed pool of workers drains the
//! bounded queue. Each job asks the remote classifier for a verdict under a
//! deadline, falls back to the heuristic on any failure, and writes only
//! the verdict columns back to the relational store.
//!
//! Two dispatches for the same transaction are not serialized against each
//! other; whichever verdict write lands last wins. Business fields are never
//! touched by a verdict write, so a concurrent update cannot be clobbered.

pub mod retry;

pub use retry::RetryPolicy;

use crate::classifier::{Classifier, ClassifierError};
use crate::db::TransactionRepository;
use crate::error::{FraudError, FraudResult};
use crate::heuristic;
use crate::verdict::{FraudVerdict, VerdictSource};
use finsys_common::config::TomlConfig;
use finsys_common::db::TransactionRecord;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause before the single retry of a failed verdict write
const VERDICT_RETRY_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Bound on each remote classification attempt
    pub deadline: Duration,
    pub retry: RetryPolicy,
}

impl DispatcherConfig {
    pub fn from_config(config: &TomlConfig) -> Self {
        Self {
            workers: config.scoring.workers.max(1),
            queue_capacity: config.scoring.queue_capacity.max(1),
            deadline: config.classifier.deadline(),
            retry: RetryPolicy::from_config(&config.scoring.retry),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from_config(&TomlConfig::default())
    }
}

/// Counters readable while the dispatcher runs
#[derive(Debug, Default)]
pub struct ScoringStats {
    remote_verdicts: AtomicU64,
    heuristic_verdicts: AtomicU64,
    remote_failures: AtomicU64,
    persist_failures: AtomicU64,
    skipped_deleted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoringStatsSnapshot {
    pub remote_verdicts: u64,
    pub heuristic_verdicts: u64,
    /// Failed remote attempts, including ones later retried
    pub remote_failures: u64,
    pub persist_failures: u64,
    pub skipped_deleted: u64,
}

impl ScoringStats {
    pub fn snapshot(&self) -> ScoringStatsSnapshot {
        ScoringStatsSnapshot {
            remote_verdicts: self.remote_verdicts.load(Ordering::Relaxed),
            heuristic_verdicts: self.heuristic_verdicts.load(Ordering::Relaxed),
            remote_failures: self.remote_failures.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            skipped_deleted: self.skipped_deleted.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Result of scoring one transaction
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoringOutcome {
    Scored(FraudVerdict),
    /// Transaction was soft-deleted before the verdict could be written
    SkippedDeleted,
}

/// One scoring pass: classify, fall back, persist
///
/// Workers run this; it is public so a caller can score synchronously.
#[derive(Clone)]
pub struct ScoringPipeline {
    transactions: TransactionRepository,
    classifier: Arc<dyn Classifier>,
    deadline: Duration,
    retry: RetryPolicy,
    stats: Arc<ScoringStats>,
    cancel: CancellationToken,
}

impl ScoringPipeline {
    pub fn new(
        transactions: TransactionRepository,
        classifier: Arc<dyn Classifier>,
        deadline: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transactions,
            classifier,
            deadline,
            retry,
            stats: Arc::new(ScoringStats::default()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn stats(&self) -> ScoringStatsSnapshot {
        self.stats.snapshot()
    }

    /// Score and persist; a classifier failure is never an error here
    ///
    /// A verdict that cannot be written returns the row to `unscored`
    /// rather than leaving it in `scoring`.
    pub async fn score(&self, transaction: &TransactionRecord) -> FraudResult<ScoringOutcome> {
        let id = transaction.id;
        if !self.transactions.mark_scoring(id).await? {
            debug!(transaction_id = id, "Transaction deleted before scoring, skipping");
            ScoringStats::bump(&self.stats.skipped_deleted);
            return Ok(ScoringOutcome::SkippedDeleted);
        }

        let verdict = self.classify(transaction).await;

        if !self.persist_verdict(id, &verdict).await? {
            info!(
                transaction_id = id,
                "Transaction deleted while scoring, verdict discarded"
            );
            ScoringStats::bump(&self.stats.skipped_deleted);
            return Ok(ScoringOutcome::SkippedDeleted);
        }

        match verdict.source {
            VerdictSource::Remote => ScoringStats::bump(&self.stats.remote_verdicts),
            VerdictSource::Heuristic => ScoringStats::bump(&self.stats.heuristic_verdicts),
        }
        debug!(
            transaction_id = id,
            is_fraud = verdict.is_fraud,
            fraud_probability = verdict.fraud_probability,
            source = ?verdict.source,
            "Verdict persisted"
        );
        Ok(ScoringOutcome::Scored(verdict))
    }

    /// Write the verdict, retrying once before giving up on it
    async fn persist_verdict(&self, id: i64, verdict: &FraudVerdict) -> FraudResult<bool> {
        let first = match self.transactions.apply_verdict(id, verdict).await {
            Ok(applied) => return Ok(applied),
            Err(e) => e,
        };
        warn!(transaction_id = id, error = %first, "Verdict write failed, retrying once");
        tokio::time::sleep(VERDICT_RETRY_PAUSE).await;

        let err = match self.transactions.apply_verdict(id, verdict).await {
            Ok(applied) => return Ok(applied),
            Err(e) => e,
        };
        match self.transactions.reset_scoring(id).await {
            Ok(()) => warn!(transaction_id = id, "Verdict dropped, transaction left unscored"),
            Err(reset_err) => error!(
                transaction_id = id,
                error = %reset_err,
                "Could not reset scoring state after failed verdict write"
            ),
        }
        Err(err)
    }

    /// Remote verdict, or the heuristic once the retry policy gives up
    async fn classify(&self, transaction: &TransactionRecord) -> FraudVerdict {
        let mut retry = 0u32;
        loop {
            let attempt = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = self.attempt(transaction) => Some(result),
            };

            let err = match attempt {
                Some(Ok(verdict)) => return verdict,
                Some(Err(err)) => err,
                None => {
                    warn!(
                        transaction_id = transaction.id,
                        "Scoring cancelled, using heuristic verdict"
                    );
                    return heuristic::score(transaction);
                }
            };
            ScoringStats::bump(&self.stats.remote_failures);

            retry += 1;
            match self.retry.backoff(retry) {
                Some(pause) => {
                    debug!(
                        transaction_id = transaction.id,
                        retry,
                        backoff_ms = pause.as_millis() as u64,
                        error = %err,
                        "Remote classification failed, retrying"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => {}
                        _ = tokio::time::sleep(pause) => continue,
                    }
                    warn!(
                        transaction_id = transaction.id,
                        "Scoring cancelled during backoff, using heuristic verdict"
                    );
                    return heuristic::score(transaction);
                }
                None => {
                    warn!(
                        transaction_id = transaction.id,
                        classifier = self.classifier.name(),
                        attempts = retry,
                        error = %err,
                        "Remote classifier unavailable, degrading to heuristic verdict"
                    );
                    return heuristic::score(transaction);
                }
            }
        }
    }

    /// One remote call, bounded here as well as by the classifier itself
    async fn attempt(
        &self,
        transaction: &TransactionRecord,
    ) -> Result<FraudVerdict, ClassifierError> {
        match tokio::time::timeout(
            self.deadline,
            self.classifier.classify(transaction, self.deadline),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ClassifierError::DeadlineExceeded(self.deadline)),
        }
    }
}

struct ScoringJob {
    transaction: TransactionRecord,
}

/// Bounded queue plus worker pool around a [`ScoringPipeline`]
pub struct ScoringDispatcher {
    sender: RwLock<Option<mpsc::Sender<ScoringJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pipeline: ScoringPipeline,
}

impl ScoringDispatcher {
    /// Spawn workers; must be called inside a tokio runtime
    pub fn start(
        transactions: TransactionRepository,
        classifier: Arc<dyn Classifier>,
        config: DispatcherConfig,
    ) -> Self {
        let pipeline =
            ScoringPipeline::new(transactions, classifier, config.deadline, config.retry);
        Self::with_pipeline(pipeline, config.workers, config.queue_capacity)
    }

    pub fn with_pipeline(pipeline: ScoringPipeline, workers: usize, queue_capacity: usize) -> Self {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::channel::<ScoringJob>(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let receiver = Arc::clone(&receiver);
            let pipeline = pipeline.clone();
            handles.push(tokio::spawn(async move {
                scoring_worker(worker_id, receiver, pipeline).await;
            }));
        }

        info!(
            workers,
            queue_capacity,
            classifier = pipeline.classifier.name(),
            "Scoring dispatcher started"
        );

        Self {
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(handles),
            pipeline,
        }
    }

    async fn sender(&self) -> FraudResult<mpsc::Sender<ScoringJob>> {
        self.sender
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or(FraudError::QueueClosed)
    }

    /// Enqueue, waiting for capacity when the queue is full
    pub async fn dispatch(&self, transaction: TransactionRecord) -> FraudResult<()> {
        let sender = self.sender().await?;
        sender
            .send(ScoringJob { transaction })
            .await
            .map_err(|_| FraudError::QueueClosed)
    }

    /// Enqueue without waiting
    pub async fn try_dispatch(&self, transaction: TransactionRecord) -> FraudResult<()> {
        let sender = self.sender().await?;
        match sender.try_send(ScoringJob { transaction }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => {
                warn!(
                    transaction_id = job.transaction.id,
                    "Scoring queue full, dispatch rejected"
                );
                Err(FraudError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(FraudError::QueueClosed),
        }
    }

    pub fn stats(&self) -> ScoringStatsSnapshot {
        self.pipeline.stats()
    }

    pub fn pipeline(&self) -> &ScoringPipeline {
        &self.pipeline
    }

    /// Close the queue, drain queued jobs and join the workers
    pub async fn shutdown(&self) {
        // Dropping the last sender lets workers see end-of-queue once drained
        let sender = self.sender.write().await.take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Scoring worker terminated abnormally");
            }
        }

        let stats = self.stats();
        info!(
            remote = stats.remote_verdicts,
            heuristic = stats.heuristic_verdicts,
            persist_failures = stats.persist_failures,
            skipped_deleted = stats.skipped_deleted,
            "Scoring dispatcher stopped"
        );
    }

    /// Cancel in-flight remote waits, then shut down
    ///
    /// Jobs still queued are scored with the heuristic.
    pub async fn abort(&self) {
        self.pipeline.cancel.cancel();
        self.shutdown().await;
    }
}

async fn scoring_worker(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<ScoringJob>>>,
    pipeline: ScoringPipeline,
) {
    debug!(worker_id, "Scoring worker started");

    loop {
        let job = {
            let mut rx = receiver.lock().await;
            rx.recv().await
        };

        let Some(job) = job else {
            debug!(worker_id, "Scoring worker shutting down");
            break;
        };

        if let Err(e) = pipeline.score(&job.transaction).await {
            ScoringStats::bump(&pipeline.stats.persist_failures);
            error!(
                worker_id,
                transaction_id = job.transaction.id,
                error = %e,
                "Failed to persist verdict"
            );
        }
    }
}
