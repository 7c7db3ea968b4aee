use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle state of a transfer job.
///
/// `Completed`, `Failed` and `Aborted` are terminal: once recorded, the only
/// permitted write is the webhook-fired marker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "job_state", rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Aborted
        )
    }

    /// Whether `self -> next` is an edge of the job state machine.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Running)
                | (JobState::Queued, JobState::Aborted)
                | (JobState::Running, JobState::Queued)
                | (JobState::Running, JobState::Completed)
                | (JobState::Running, JobState::Failed)
                | (JobState::Running, JobState::Aborted)
        )
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::Aborted => write!(f, "aborted"),
        }
    }
}

impl FromStr for JobState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "running" => Ok(JobState::Running),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "aborted" => Ok(JobState::Aborted),
            _ => Err(anyhow::anyhow!("Invalid job state: {}", s)),
        }
    }
}

/// Upload path chosen for one transfer attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransferStrategy {
    SingleShot,
    Multipart,
    ClientDirect,
}

impl Display for TransferStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TransferStrategy::SingleShot => write!(f, "single_shot"),
            TransferStrategy::Multipart => write!(f, "multipart"),
            TransferStrategy::ClientDirect => write!(f, "client_direct"),
        }
    }
}

impl FromStr for TransferStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single_shot" => Ok(TransferStrategy::SingleShot),
            "multipart" => Ok(TransferStrategy::Multipart),
            "client_direct" => Ok(TransferStrategy::ClientDirect),
            _ => Err(anyhow::anyhow!("Invalid transfer strategy: {}", s)),
        }
    }
}

/// Classification recorded with a failed or aborted attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceUnavailable,
    SinkRejected,
    SizeMismatch,
    IncompleteParts,
    Timeout,
    Cancelled,
    /// Worker stopped writing progress; set by the recovery sweep.
    Stale,
}

/// Most specific error detail recorded for a job, stored as JSON in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct JobErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl JobErrorDetail {
    pub fn new(kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub source_ref: String,
    pub declared_size: Option<i64>,
    pub content_type: Option<String>,
    pub destination_key: String,
    pub state: JobState,
    pub strategy: Option<TransferStrategy>,
    pub bytes_transferred: i64,
    pub result_ref: Option<String>,
    pub error: Option<JobErrorDetail>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub idempotency_key: Option<String>,
    /// Originating context forwarded verbatim to the downstream trigger.
    pub context: Option<serde_json::Value>,
    pub cancel_requested: bool,
    pub webhook_fired: bool,
    /// Sink session opened by the running attempt, cleared when the job leaves `Running`.
    pub multipart_upload_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set on every claim; identifies the attempt that owns a `Running` job.
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Job {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let strategy = row
            .get::<Option<String>, _>("strategy")
            .map(|s| s.parse::<TransferStrategy>())
            .transpose()
            .map_err(|e| sqlx::Error::Decode(format!("Failed to parse strategy: {}", e).into()))?;
        let error = row
            .get::<Option<serde_json::Value>, _>("error")
            .map(serde_json::from_value::<JobErrorDetail>)
            .transpose()
            .map_err(|e| sqlx::Error::Decode(format!("Failed to parse error detail: {}", e).into()))?;

        Ok(Job {
            id: row.get("id"),
            source_ref: row.get("source_ref"),
            declared_size: row.get("declared_size"),
            content_type: row.get("content_type"),
            destination_key: row.get("destination_key"),
            state: row.get("state"),
            strategy,
            bytes_transferred: row.get("bytes_transferred"),
            result_ref: row.get("result_ref"),
            error,
            retry_count: row.get("retry_count"),
            max_retries: row.get("max_retries"),
            next_attempt_at: row.get("next_attempt_at"),
            idempotency_key: row.get("idempotency_key"),
            context: row.get("context"),
            cancel_requested: row.get("cancel_requested"),
            webhook_fired: row.get("webhook_fired"),
            multipart_upload_id: row.get("multipart_upload_id"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

impl Job {
    pub fn is_ready_to_run(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Queued && self.next_attempt_at <= now
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Declared size as an unsigned byte count. Negative values are treated as unknown.
    pub fn declared_size_bytes(&self) -> Option<u64> {
        self.declared_size.and_then(|s| u64::try_from(s).ok())
    }
}

/// Insert payload for the ledger.
///
/// Jobs enter the ledger either `Queued` (server-mediated transfers) or
/// `Completed` (client-direct uploads recorded after the fact).
#[derive(Debug, Clone)]
pub struct NewJob {
    pub source_ref: String,
    pub declared_size: Option<i64>,
    pub content_type: Option<String>,
    pub destination_key: String,
    pub idempotency_key: Option<String>,
    pub context: Option<serde_json::Value>,
    pub max_retries: i32,
    pub state: JobState,
    pub strategy: Option<TransferStrategy>,
    pub bytes_transferred: i64,
    pub result_ref: Option<String>,
}

impl NewJob {
    pub fn queued(
        source_ref: impl Into<String>,
        destination_key: impl Into<String>,
        max_retries: i32,
    ) -> Self {
        Self {
            source_ref: source_ref.into(),
            declared_size: None,
            content_type: None,
            destination_key: destination_key.into(),
            idempotency_key: None,
            context: None,
            max_retries,
            state: JobState::Queued,
            strategy: None,
            bytes_transferred: 0,
            result_ref: None,
        }
    }

    /// Record of an upload the client already performed against a presigned grant.
    pub fn client_direct_completed(
        destination_key: impl Into<String>,
        size: Option<i64>,
        result_ref: impl Into<String>,
    ) -> Self {
        let destination_key = destination_key.into();
        Self {
            source_ref: format!("client-direct:{}", destination_key),
            declared_size: size,
            content_type: None,
            destination_key,
            idempotency_key: None,
            context: None,
            max_retries: 0,
            state: JobState::Completed,
            strategy: Some(TransferStrategy::ClientDirect),
            bytes_transferred: size.unwrap_or(0),
            result_ref: Some(result_ref.into()),
        }
    }

    pub fn with_declared_size(mut self, size: Option<i64>) -> Self {
        self.declared_size = size;
        self
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }

    pub fn with_context(mut self, context: Option<serde_json::Value>) -> Self {
        self.context = context;
        self
    }
}

/// Atomic change applied by `JobLedger::update`. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobMutation {
    pub state: Option<JobState>,
    pub strategy: Option<TransferStrategy>,
    pub bytes_transferred: Option<i64>,
    pub result_ref: Option<String>,
    pub error: Option<JobErrorDetail>,
    pub increment_retry: bool,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub cancel_requested: Option<bool>,
    pub webhook_fired: Option<bool>,
    /// Recorded until the next state transition, which clears it.
    pub multipart_upload_id: Option<String>,
    /// Apply only while the job's `started_at` still equals this claim time.
    pub claimed_at: Option<DateTime<Utc>>,
}

impl JobMutation {
    pub fn transition(to: JobState) -> Self {
        Self {
            state: Some(to),
            ..Default::default()
        }
    }

    pub fn progress(bytes_transferred: i64) -> Self {
        Self {
            bytes_transferred: Some(bytes_transferred),
            ..Default::default()
        }
    }

    pub fn webhook_fired() -> Self {
        Self {
            webhook_fired: Some(true),
            ..Default::default()
        }
    }

    pub fn cancel_requested() -> Self {
        Self {
            cancel_requested: Some(true),
            ..Default::default()
        }
    }

    pub fn with_strategy(mut self, strategy: TransferStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_bytes(mut self, bytes_transferred: i64) -> Self {
        self.bytes_transferred = Some(bytes_transferred);
        self
    }

    pub fn with_result(mut self, result_ref: impl Into<String>) -> Self {
        self.result_ref = Some(result_ref.into());
        self
    }

    pub fn with_error(mut self, error: JobErrorDetail) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_upload_id(mut self, upload_id: impl Into<String>) -> Self {
        self.multipart_upload_id = Some(upload_id.into());
        self
    }

    /// Fence the write to the attempt that claimed the job at `started_at`.
    pub fn with_claim(mut self, started_at: Option<DateTime<Utc>>) -> Self {
        self.claimed_at = started_at;
        self
    }

    /// Whether a job claimed at `started_at` may take this write.
    pub fn holds_claim(&self, started_at: Option<DateTime<Utc>>) -> bool {
        self.claimed_at.is_none() || self.claimed_at == started_at
    }

    /// Bump the retry counter and defer the next claim until `next_attempt_at`.
    pub fn with_retry_at(mut self, next_attempt_at: DateTime<Utc>) -> Self {
        self.increment_retry = true;
        self.next_attempt_at = Some(next_attempt_at);
        self
    }

    /// True when the mutation writes nothing but the webhook-fired marker,
    /// the only change allowed on a terminal job.
    pub fn only_marks_webhook(&self) -> bool {
        self.webhook_fired.is_some()
            && *self
                == Self {
                    webhook_fired: self.webhook_fired,
                    ..Default::default()
                }
    }
}

/// Filter for `JobLedger::list_by`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl JobFilter {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 1000;

    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_edges() {
        assert!(JobState::Queued.can_transition_to(JobState::Running));
        assert!(JobState::Queued.can_transition_to(JobState::Aborted));
        assert!(JobState::Running.can_transition_to(JobState::Queued));
        assert!(JobState::Running.can_transition_to(JobState::Completed));
        assert!(JobState::Running.can_transition_to(JobState::Failed));
        assert!(JobState::Running.can_transition_to(JobState::Aborted));

        assert!(!JobState::Queued.can_transition_to(JobState::Completed));
        assert!(!JobState::Queued.can_transition_to(JobState::Failed));
        for terminal in [JobState::Completed, JobState::Failed, JobState::Aborted] {
            assert!(terminal.is_terminal());
            for next in [
                JobState::Queued,
                JobState::Running,
                JobState::Completed,
                JobState::Failed,
                JobState::Aborted,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn state_display_matches_from_str() {
        for state in [
            JobState::Queued,
            JobState::Running,
            JobState::Completed,
            JobState::Failed,
            JobState::Aborted,
        ] {
            assert_eq!(state.to_string().parse::<JobState>().unwrap(), state);
        }
        assert!("paused".parse::<JobState>().is_err());
    }

    #[test]
    fn strategy_serializes_snake_case() {
        let json = serde_json::to_string(&TransferStrategy::SingleShot).unwrap();
        assert_eq!(json, "\"single_shot\"");
        assert_eq!(
            "client_direct".parse::<TransferStrategy>().unwrap(),
            TransferStrategy::ClientDirect
        );
    }

    #[test]
    fn webhook_marker_mutation_is_isolated() {
        assert!(JobMutation::webhook_fired().only_marks_webhook());
        assert!(!JobMutation::transition(JobState::Failed).only_marks_webhook());
        assert!(!JobMutation::webhook_fired().with_bytes(10).only_marks_webhook());
    }

    #[test]
    fn claim_fence_matches_only_the_claiming_attempt() {
        let claimed = Utc::now();
        let later = claimed + chrono::Duration::seconds(1);
        let fenced = JobMutation::progress(8).with_claim(Some(claimed));
        assert!(fenced.holds_claim(Some(claimed)));
        assert!(!fenced.holds_claim(Some(later)));
        assert!(!fenced.holds_claim(None));
        assert!(JobMutation::progress(8).holds_claim(Some(later)));
    }

    #[test]
    fn filter_limit_is_clamped() {
        let filter = JobFilter {
            limit: Some(5000),
            ..Default::default()
        };
        assert_eq!(filter.effective_limit(), JobFilter::MAX_LIMIT);
        assert_eq!(JobFilter::default().effective_limit(), 50);
        let negative = JobFilter {
            offset: Some(-3),
            ..Default::default()
        };
        assert_eq!(negative.effective_offset(), 0);
    }
}
