use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use vidrelay_core::models::{Job, JobFilter, JobMutation, JobState, NewJob};
use vidrelay_core::AppError;

/// LISTEN/NOTIFY channel signalled whenever a queued job is inserted.
pub const NEW_JOB_CHANNEL: &str = "vidrelay_new_job";

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    /// The compare-and-swap lost: the job is no longer in the expected state.
    #[error("Job {id} is {actual}, expected {expected}")]
    Conflict {
        id: Uuid,
        expected: JobState,
        actual: JobState,
    },

    /// The job was claimed again by another attempt since the fenced claim.
    #[error("Job {id} is owned by a newer attempt")]
    ClaimLost { id: Uuid },

    #[error("Idempotency key '{key}' already used by job {existing}")]
    DuplicateRequest { key: String, existing: Uuid },

    #[error("Invalid job transition {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },

    /// Terminal jobs only accept the webhook-fired marker.
    #[error("Job {id} is {state} and can no longer change")]
    Immutable { id: Uuid, state: JobState },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(id) => AppError::NotFound(format!("Job {} not found", id)),
            LedgerError::DuplicateRequest { key, existing } => AppError::Conflict(format!(
                "Idempotency key '{}' already used by job {}",
                key, existing
            )),
            LedgerError::Conflict { .. }
            | LedgerError::ClaimLost { .. }
            | LedgerError::InvalidTransition { .. }
            | LedgerError::Immutable { .. } => AppError::Conflict(err.to_string()),
            LedgerError::Backend(source) => AppError::Database(source),
        }
    }
}

/// Checks a mutation against the state machine before it is applied to a job
/// currently in `expected`.
pub fn validate_mutation(
    id: Uuid,
    expected: JobState,
    mutation: &JobMutation,
) -> Result<(), LedgerError> {
    if expected.is_terminal() {
        if mutation.only_marks_webhook() {
            return Ok(());
        }
        return Err(LedgerError::Immutable {
            id,
            state: expected,
        });
    }

    if let Some(next) = mutation.state {
        if !expected.can_transition_to(next) {
            return Err(LedgerError::InvalidTransition {
                from: expected,
                to: next,
            });
        }
    }

    Ok(())
}

/// Durable store of job records.
#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Insert a job. Only `Queued` and `Completed` are valid initial states.
    async fn create(&self, job: NewJob) -> Result<Job, LedgerError>;

    async fn get(&self, id: Uuid) -> Result<Job, LedgerError>;

    /// Apply `mutation` atomically if the job is currently in `expected`.
    ///
    /// Fails with [`LedgerError::Conflict`] when another writer changed the
    /// state first, and with [`LedgerError::ClaimLost`] when the mutation is
    /// fenced to a claim the job no longer holds. Every successful write bumps
    /// `updated_at`. A state change clears `multipart_upload_id`.
    async fn update(
        &self,
        id: Uuid,
        expected: JobState,
        mutation: JobMutation,
    ) -> Result<Job, LedgerError>;

    /// Most recent jobs first.
    async fn list_by(&self, filter: &JobFilter) -> Result<Vec<Job>, LedgerError>;

    /// Atomically move the oldest runnable `Queued` job to `Running`.
    async fn claim_next(&self) -> Result<Option<Job>, LedgerError>;

    /// `Running` jobs with no ledger write since `updated_before`.
    async fn find_stale_running(
        &self,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Job>, LedgerError>;

    /// `Completed` jobs whose downstream trigger has not been recorded as fired.
    async fn find_unfired_completed(
        &self,
        completed_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Job>, LedgerError>;

    /// Delete terminal jobs finished before `cutoff`. Returns the number removed.
    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64, LedgerError>;
}

pub(crate) fn validate_initial_state(job: &NewJob) -> Result<(), LedgerError> {
    match job.state {
        JobState::Queued | JobState::Completed => Ok(()),
        other => Err(LedgerError::Backend(anyhow::anyhow!(
            "Jobs cannot be created in state {}",
            other
        ))),
    }
}
