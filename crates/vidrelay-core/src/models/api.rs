use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::job::{Job, JobErrorDetail, JobState, TransferStrategy};

/// Request to relay one object from the source into the sink
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateJobRequest {
    /// Opaque file reference on the source, or an absolute file URL
    #[validate(length(
        min = 1,
        max = 2048,
        message = "source_ref must be between 1 and 2048 characters"
    ))]
    pub source_ref: String,
    /// Declared object size in bytes, if known
    #[validate(range(min = 0, message = "declared_size cannot be negative"))]
    pub declared_size: Option<i64>,
    /// MIME type of the object
    #[validate(length(max = 255, message = "content_type is too long"))]
    pub content_type: Option<String>,
    /// Destination key; generated when absent
    #[validate(length(
        min = 1,
        max = 1024,
        message = "destination_key must be between 1 and 1024 characters"
    ))]
    pub destination_key: Option<String>,
    /// Client-supplied key to deduplicate submissions
    #[validate(length(
        min = 1,
        max = 255,
        message = "idempotency_key must be between 1 and 255 characters"
    ))]
    pub idempotency_key: Option<String>,
    /// Originating context forwarded to the downstream processing trigger
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

/// Job status as answered from the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct JobStatusResponse {
    pub id: Uuid,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<TransferStrategy>,
    pub bytes_transferred: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared_size: Option<i64>,
    pub destination_key: String,
    /// Sink URL, present once the job is completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobErrorDetail>,
    pub retry_count: i32,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        let result_ref = if job.state == JobState::Completed {
            job.result_ref
        } else {
            None
        };
        Self {
            id: job.id,
            state: job.state,
            strategy: job.strategy,
            bytes_transferred: job.bytes_transferred,
            declared_size: job.declared_size,
            destination_key: job.destination_key,
            result_ref,
            error: job.error,
            retry_count: job.retry_count,
            cancel_requested: job.cancel_requested,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobListResponse {
    pub jobs: Vec<JobStatusResponse>,
    pub count: usize,
}

/// Request for a presigned direct-upload grant
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct PresignedGrantRequest {
    /// Original filename; its extension is kept on the destination key
    #[validate(length(
        min = 1,
        max = 255,
        message = "Filename must be between 1 and 255 characters"
    ))]
    pub filename: String,
    /// Content type (MIME type)
    #[validate(length(
        min = 1,
        max = 255,
        message = "Content type must be between 1 and 255 characters"
    ))]
    pub content_type: String,
    /// Requested lifetime in seconds; clamped to the configured maximum
    pub expires_in_secs: Option<u64>,
}

/// Report from a client that finished a presigned upload
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ClientUploadCompleteRequest {
    #[validate(length(
        min = 1,
        max = 1024,
        message = "destination_key must be between 1 and 1024 characters"
    ))]
    pub destination_key: String,
    #[validate(range(min = 0, message = "size cannot be negative"))]
    pub size: Option<i64>,
    pub content_type: Option<String>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

/// Body of the legacy `/upload` route
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct LegacyUploadRequest {
    #[validate(url(message = "file_url must be an absolute URL"))]
    pub file_url: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LegacyUploadResponse {
    pub status: String,
    pub job_id: Uuid,
    /// Public link the object will be reachable at once the job completes
    pub file: String,
}
