use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use validator::Validate;

use vidrelay_core::models::{LegacyUploadRequest, LegacyUploadResponse, NewJob};
use vidrelay_storage::destination_key_for;

use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::state::AppState;

/// Enqueue a transfer of an absolute file URL
///
/// Kept for callers of the original single-route service. `file` is the
/// public link the object will be reachable at once the job completes.
#[utoipa::path(
    post,
    path = "/upload",
    tag = "legacy",
    request_body = LegacyUploadRequest,
    responses(
        (status = 202, description = "Transfer accepted", body = LegacyUploadResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, request), fields(operation = "legacy_upload"))]
pub async fn legacy_upload(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<LegacyUploadRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    request.validate()?;

    let destination_key = destination_key_for(state.destination_prefix(), None);
    let file = state.sink.object_url(&destination_key);
    let job = state
        .ledger
        .create(NewJob::queued(
            request.file_url,
            destination_key,
            state.max_retries(),
        ))
        .await?;

    tracing::info!(job.id = %job.id, file = %file, "Legacy upload accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(LegacyUploadResponse {
            status: "accepted".to_string(),
            job_id: job.id,
            file,
        }),
    ))
}
