use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;
use uuid::Uuid;
use validator::Validate;

use vidrelay_core::models::{
    CreateJobRequest, JobFilter, JobListResponse, JobState, JobStatusResponse, NewJob,
};
use vidrelay_storage::{destination_key_for, validate_key};
use vidrelay_worker::cancel_job as cancel_in_ledger;

use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::state::AppState;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListJobsQuery {
    /// Only jobs in this state
    pub state: Option<JobState>,
    /// Page size (default 50, max 1000)
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl From<ListJobsQuery> for JobFilter {
    fn from(query: ListJobsQuery) -> Self {
        JobFilter {
            state: query.state,
            limit: query.limit,
            offset: query.offset,
        }
    }
}

/// Submit a server-mediated transfer
#[utoipa::path(
    post,
    path = "/api/v0/jobs",
    tag = "jobs",
    request_body = CreateJobRequest,
    responses(
        (status = 202, description = "Job queued", body = JobStatusResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 409, description = "Idempotency key already used", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[tracing::instrument(
    skip(state, request),
    fields(source_ref = %request.source_ref, operation = "create_job")
)]
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<CreateJobRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    request.validate()?;

    let destination_key = match request.destination_key {
        Some(key) => {
            validate_key(&key)?;
            key
        }
        None => destination_key_for(state.destination_prefix(), request.content_type.as_deref()),
    };

    let new_job = NewJob::queued(request.source_ref, destination_key, state.max_retries())
        .with_declared_size(request.declared_size)
        .with_content_type(request.content_type)
        .with_idempotency_key(request.idempotency_key)
        .with_context(request.context);

    let job = state.ledger.create(new_job).await?;

    tracing::info!(
        job.id = %job.id,
        destination_key = %job.destination_key,
        declared_size = ?job.declared_size,
        "Transfer job queued"
    );

    Ok((StatusCode::ACCEPTED, Json(JobStatusResponse::from(job))))
}

/// Current status of a job, answered from the ledger
#[utoipa::path(
    get,
    path = "/api/v0/jobs/{id}",
    tag = "jobs",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job found", body = JobStatusResponse),
        (status = 404, description = "Job not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(job.id = %id, operation = "get_job"))]
pub async fn get_job(
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, HttpAppError> {
    let job = state.ledger.get(id).await?;
    Ok(Json(JobStatusResponse::from(job)))
}

/// Most recent jobs first
#[utoipa::path(
    get,
    path = "/api/v0/jobs",
    tag = "jobs",
    params(ListJobsQuery),
    responses(
        (status = 200, description = "Jobs", body = JobListResponse),
        (status = 400, description = "Invalid query", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, query), fields(operation = "list_jobs"))]
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, HttpAppError> {
    let filter = JobFilter::from(query);
    let jobs: Vec<JobStatusResponse> = state
        .ledger
        .list_by(&filter)
        .await?
        .into_iter()
        .map(JobStatusResponse::from)
        .collect();

    Ok(Json(JobListResponse {
        count: jobs.len(),
        jobs,
    }))
}

/// Cancel a queued or running job
///
/// A queued job is aborted at once. A running job is flagged and its worker
/// aborts the transfer after the chunk in flight.
#[utoipa::path(
    post,
    path = "/api/v0/jobs/{id}/cancel",
    tag = "jobs",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Cancellation recorded", body = JobStatusResponse),
        (status = 404, description = "Job not found", body = ErrorResponse),
        (status = 409, description = "Job already finished", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(job.id = %id, operation = "cancel_job"))]
pub async fn cancel_job(
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, HttpAppError> {
    let job = cancel_in_ledger(state.ledger.as_ref(), id).await?;
    Ok(Json(JobStatusResponse::from(job)))
}
