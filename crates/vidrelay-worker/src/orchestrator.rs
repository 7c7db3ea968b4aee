//! Job orchestrator
//!
//! Drives one claimed job through a transfer attempt and records the outcome:
//!
//! - success: `Running -> Completed`, then the completion hook runs in the
//!   background and sets `webhook_fired` once it succeeds
//! - transient failure: `Running -> Queued` with backoff while retries remain,
//!   otherwise `Failed`
//! - terminal failure: `Running -> Failed`
//! - cancellation: `Running -> Aborted`, the hook never runs
//!
//! Every state change goes through the ledger's compare-and-swap update, fenced
//! on the claim's `started_at`. If a write finds the job no longer ours, the
//! attempt stops without recording. A cancel request recorded while the attempt
//! ran wins over whatever error ended it.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use uuid::Uuid;

use vidrelay_core::models::{Job, JobMutation, JobState, TransferStrategy};
use vidrelay_core::{
    compute_retry_backoff, select_strategy, CompletionHook, Config, ErrorClass, SourceClient,
    StrategyThresholds, TransferError, SINK_MIN_PART_SIZE,
};
use vidrelay_db::{JobLedger, LedgerError};
use vidrelay_storage::{ChunkWriter, MultipartWriter, ObjectSink, SingleShotWriter};

use crate::bridge::{ProgressObserver, RelayOutcome, StreamBridge};

/// Knobs for a transfer attempt.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub chunk_size: usize,
    pub thresholds: StrategyThresholds,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub min_part_size: u64,
    pub retry_backoff_base_ms: u64,
    pub retry_backoff_max_secs: u64,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.transfer().chunk_size_bytes,
            thresholds: config.transfer().thresholds(),
            read_timeout: Duration::from_secs(config.source().read_timeout_secs),
            write_timeout: Duration::from_secs(config.sink().write_timeout_secs),
            min_part_size: SINK_MIN_PART_SIZE,
            retry_backoff_base_ms: config.worker().retry_backoff_base_ms,
            retry_backoff_max_secs: config.worker().retry_backoff_max_secs,
        }
    }
}

/// Why an attempt ended without a result.
enum AttemptError {
    Transfer(TransferError),
    /// The ledger refused a write for this job; its state is no longer ours to change.
    Ledger(LedgerError),
}

impl From<TransferError> for AttemptError {
    fn from(err: TransferError) -> Self {
        AttemptError::Transfer(err)
    }
}

impl From<LedgerError> for AttemptError {
    fn from(err: LedgerError) -> Self {
        AttemptError::Ledger(err)
    }
}

#[derive(Clone)]
pub struct JobOrchestrator {
    ledger: Arc<dyn JobLedger>,
    source: Arc<dyn SourceClient>,
    sink: Arc<dyn ObjectSink>,
    hook: Arc<dyn CompletionHook>,
    settings: OrchestratorSettings,
}

impl JobOrchestrator {
    pub fn new(
        ledger: Arc<dyn JobLedger>,
        source: Arc<dyn SourceClient>,
        sink: Arc<dyn ObjectSink>,
        hook: Arc<dyn CompletionHook>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            ledger,
            source,
            sink,
            hook,
            settings,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn JobLedger> {
        &self.ledger
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn sink(&self) -> &Arc<dyn ObjectSink> {
        &self.sink
    }

    /// Run one attempt for a job already claimed into `Running`.
    ///
    /// Returns the job as last recorded by this attempt.
    #[tracing::instrument(skip(self, job), fields(job.id = %job.id, retry_count = job.retry_count))]
    pub async fn run(&self, job: Job) -> Result<Job, LedgerError> {
        let start = Instant::now();
        tracing::info!(
            source_ref = %job.source_ref,
            key = %job.destination_key,
            "Transfer started"
        );

        match self.attempt(&job).await {
            Ok(outcome) => self.record_success(&job, outcome, start).await,
            Err(AttemptError::Transfer(err)) => {
                let err = self.settle_error(&job, err).await;
                self.record_failure(&job, err).await
            }
            Err(AttemptError::Ledger(err)) => {
                tracing::warn!(
                    error = %err,
                    "Job no longer owned by this attempt, leaving it as recorded"
                );
                Err(err)
            }
        }
    }

    /// Turn `err` into a cancellation if one was requested during the attempt.
    async fn settle_error(&self, job: &Job, err: TransferError) -> TransferError {
        if err.class() == ErrorClass::Cancelled {
            return err;
        }
        match self.ledger.get(job.id).await {
            Ok(current) if current.cancel_requested => {
                tracing::info!(error = %err, "Attempt failed after cancellation was requested");
                TransferError::Cancelled
            }
            Ok(_) => err,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to re-read job before recording failure");
                err
            }
        }
    }

    async fn attempt(&self, job: &Job) -> Result<RelayOutcome, AttemptError> {
        if job.cancel_requested {
            return Err(TransferError::Cancelled.into());
        }

        let open = self.source.open(&job.source_ref);
        let object = tokio::time::timeout(self.settings.read_timeout, open)
            .await
            .map_err(|_| TransferError::Timeout {
                operation: "source open",
                after_secs: self.settings.read_timeout.as_secs(),
            })??;

        let declared = job.declared_size_bytes();
        if let (Some(declared), Some(reported)) = (declared, object.size) {
            if declared != reported {
                return Err(TransferError::SizeMismatch {
                    declared,
                    actual: reported,
                }
                .into());
            }
        }
        let effective_size = declared.or(object.size);

        let strategy = select_strategy(effective_size, self.settings.thresholds, false);
        let recorded = self
            .ledger
            .update(
                job.id,
                JobState::Running,
                JobMutation::default()
                    .with_strategy(strategy)
                    .with_claim(job.started_at),
            )
            .await?;
        if recorded.cancel_requested {
            return Err(TransferError::Cancelled.into());
        }

        tracing::info!(
            strategy = %strategy,
            size_bytes = ?effective_size,
            "Upload strategy selected"
        );

        let content_type = job.content_type.clone().or(object.content_type);
        let mut writer: Box<dyn ChunkWriter> = match (strategy, effective_size) {
            (TransferStrategy::SingleShot, Some(size)) => Box::new(SingleShotWriter::start(
                self.sink.clone(),
                &job.destination_key,
                size,
                content_type,
                self.settings.write_timeout,
            )),
            _ => {
                let mut multipart = MultipartWriter::begin(
                    self.sink.clone(),
                    &job.destination_key,
                    content_type.as_deref(),
                    self.settings.min_part_size,
                    self.settings.write_timeout,
                )
                .await?;
                self.record_upload_id(job, &mut multipart).await?;
                Box::new(multipart)
            }
        };

        let observer = LedgerProgress::new(self.ledger.clone(), &recorded);
        let bridge = StreamBridge::new(self.settings.chunk_size, self.settings.read_timeout);
        let result = bridge
            .relay(object.stream, effective_size, writer.as_mut(), &observer)
            .await;

        match (result, observer.take_lost_claim()) {
            (_, Some(err)) => Err(AttemptError::Ledger(err)),
            (Ok(outcome), None) => Ok(outcome),
            (Err(err), None) => Err(err.into()),
        }
    }

    /// Store the session's upload id so the recovery sweep can abort it if this
    /// worker dies mid-transfer.
    async fn record_upload_id(
        &self,
        job: &Job,
        writer: &mut MultipartWriter,
    ) -> Result<(), AttemptError> {
        let upload_id = writer.coordinator().session().upload_id.clone();
        let result = self
            .ledger
            .update(
                job.id,
                JobState::Running,
                JobMutation::default()
                    .with_upload_id(upload_id.as_str())
                    .with_claim(job.started_at),
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(LedgerError::Backend(e)) => {
                tracing::warn!(error = %e, upload_id = %upload_id, "Failed to record upload id");
                Ok(())
            }
            Err(err) => {
                writer.abort().await;
                Err(AttemptError::Ledger(err))
            }
        }
    }

    async fn record_success(
        &self,
        job: &Job,
        outcome: RelayOutcome,
        start: Instant,
    ) -> Result<Job, LedgerError> {
        let completed = self
            .ledger
            .update(
                job.id,
                JobState::Running,
                JobMutation::transition(JobState::Completed)
                    .with_bytes(outcome.bytes_transferred as i64)
                    .with_result(outcome.location)
                    .with_claim(job.started_at),
            )
            .await
            .inspect_err(|e| {
                tracing::warn!(error = %e, "Failed to record completed transfer");
            })?;

        tracing::info!(
            bytes_transferred = outcome.bytes_transferred,
            chunks = outcome.chunks,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Transfer completed"
        );

        self.spawn_completion_hook(completed.clone());
        Ok(completed)
    }

    async fn record_failure(&self, job: &Job, err: TransferError) -> Result<Job, LedgerError> {
        let detail = err.detail();
        let mutation = match err.class() {
            ErrorClass::Cancelled => {
                tracing::info!("Transfer cancelled");
                JobMutation::transition(JobState::Aborted).with_error(detail)
            }
            ErrorClass::Transient if job.can_retry() => {
                let backoff = compute_retry_backoff(
                    job.retry_count,
                    self.settings.retry_backoff_base_ms,
                    self.settings.retry_backoff_max_secs,
                );
                let next_attempt_at = Utc::now()
                    + chrono::Duration::from_std(backoff)
                        .unwrap_or_else(|_| chrono::Duration::seconds(0));
                tracing::warn!(
                    error = %err,
                    retry_count = job.retry_count + 1,
                    max_retries = job.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Transfer failed, scheduling retry"
                );
                JobMutation::transition(JobState::Queued)
                    .with_error(detail)
                    .with_retry_at(next_attempt_at)
            }
            ErrorClass::Transient => {
                tracing::error!(
                    error = %err,
                    retry_count = job.retry_count,
                    "Transfer failed after maximum retries"
                );
                JobMutation::transition(JobState::Failed).with_error(detail)
            }
            ErrorClass::Terminal => {
                tracing::error!(error = %err, kind = ?detail.kind, "Transfer failed");
                JobMutation::transition(JobState::Failed).with_error(detail)
            }
        };

        self.ledger
            .update(job.id, JobState::Running, mutation.with_claim(job.started_at))
            .await
            .inspect_err(|e| {
                tracing::warn!(error = %e, "Failed to record transfer failure");
            })
    }

    /// Run the completion hook in the background.
    pub fn spawn_completion_hook(&self, job: Job) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.fire_completion_hook(&job).await })
    }

    /// Deliver the completion hook for `job` and set the fired marker on success.
    /// Failures leave the marker unset so the recovery sweep replays it.
    #[tracing::instrument(skip(self, job), fields(job.id = %job.id))]
    pub async fn fire_completion_hook(&self, job: &Job) {
        if let Err(e) = self.hook.job_completed(job).await {
            tracing::warn!(error = %e, "Downstream trigger failed");
            return;
        }

        if let Err(e) = self
            .ledger
            .update(job.id, JobState::Completed, JobMutation::webhook_fired())
            .await
        {
            tracing::warn!(error = %e, "Failed to record downstream trigger");
        }
    }

    pub async fn cancel(&self, id: Uuid) -> Result<Job, LedgerError> {
        cancel_job(self.ledger.as_ref(), id).await
    }
}

/// Request cancellation of a job.
///
/// Queued jobs are aborted directly. Running jobs get `cancel_requested`, which
/// the worker sees at its next chunk. Terminal jobs are rejected.
#[tracing::instrument(skip(ledger))]
pub async fn cancel_job(ledger: &dyn JobLedger, id: Uuid) -> Result<Job, LedgerError> {
    // A queued job can be claimed between the read and the write; retry once it settles.
    let mut last_conflict = None;
    for _ in 0..3 {
        let job = ledger.get(id).await?;
        let result = match job.state {
            JobState::Queued => {
                ledger
                    .update(
                        id,
                        JobState::Queued,
                        JobMutation::transition(JobState::Aborted)
                            .with_error(TransferError::Cancelled.detail()),
                    )
                    .await
            }
            JobState::Running => {
                ledger
                    .update(id, JobState::Running, JobMutation::cancel_requested())
                    .await
            }
            state => return Err(LedgerError::Immutable { id, state }),
        };

        match result {
            Ok(job) => {
                tracing::info!(state = %job.state, "Cancellation recorded");
                return Ok(job);
            }
            Err(err @ LedgerError::Conflict { .. }) => last_conflict = Some(err),
            Err(err) => return Err(err),
        }
    }

    Err(last_conflict.unwrap_or(LedgerError::NotFound(id)))
}

/// Writes per-chunk progress and watches for cancellation.
struct LedgerProgress {
    ledger: Arc<dyn JobLedger>,
    job_id: Uuid,
    claimed_at: Option<chrono::DateTime<Utc>>,
    lost_claim: Mutex<Option<LedgerError>>,
}

impl LedgerProgress {
    fn new(ledger: Arc<dyn JobLedger>, job: &Job) -> Self {
        Self {
            ledger,
            job_id: job.id,
            claimed_at: job.started_at,
            lost_claim: Mutex::new(None),
        }
    }

    fn mark_lost(&self, err: LedgerError) {
        let mut slot = self
            .lost_claim
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(err);
    }

    fn take_lost_claim(&self) -> Option<LedgerError> {
        self.lost_claim
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

#[async_trait]
impl ProgressObserver for LedgerProgress {
    async fn on_chunk(&self, bytes_transferred: u64) -> Result<(), TransferError> {
        let result = self
            .ledger
            .update(
                self.job_id,
                JobState::Running,
                JobMutation::progress(bytes_transferred as i64).with_claim(self.claimed_at),
            )
            .await;

        match result {
            Ok(job) if job.cancel_requested => Err(TransferError::Cancelled),
            Ok(_) => Ok(()),
            // Requeued by the recovery sweep, finished or claimed again elsewhere.
            Err(err @ LedgerError::Conflict { .. })
            | Err(err @ LedgerError::NotFound(_))
            | Err(err @ LedgerError::ClaimLost { .. }) => {
                self.mark_lost(err);
                Err(TransferError::Cancelled)
            }
            Err(err) => {
                tracing::warn!(error = %err, bytes_transferred, "Failed to record progress");
                Ok(())
            }
        }
    }
}
