use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

use vidrelay_core::models::{
    ClientUploadCompleteRequest, JobStatusResponse, NewJob, PresignedGrant, PresignedGrantRequest,
};
use vidrelay_storage::{destination_key_for_filename, validate_key};

use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::state::AppState;

/// Requested grant lifetime clamped to `[1, max]`, falling back to `default`.
pub(crate) fn grant_lifetime_secs(requested: Option<u64>, default: u64, max: u64) -> u64 {
    requested.unwrap_or(default).clamp(1, max.max(1))
}

/// Issue a presigned URL for a direct client upload
///
/// No job is created; the client reports the finished upload through
/// `/api/v0/uploads/complete`.
#[utoipa::path(
    post,
    path = "/api/v0/uploads/presigned",
    tag = "uploads",
    request_body = PresignedGrantRequest,
    responses(
        (status = 200, description = "Presigned URL generated", body = PresignedGrant),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 502, description = "Sink refused to sign", body = ErrorResponse)
    )
)]
#[tracing::instrument(
    skip(state, request),
    fields(content_type = %request.content_type, operation = "issue_presigned_grant")
)]
pub async fn issue_presigned_grant(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<PresignedGrantRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    request.validate()?;

    let sink_config = state.config.sink();
    let expires_in_secs = grant_lifetime_secs(
        request.expires_in_secs,
        sink_config.presign_default_expiry_secs,
        sink_config.presign_max_expiry_secs,
    );
    let destination_key = destination_key_for_filename(
        &sink_config.destination_prefix,
        &request.filename,
        &request.content_type,
    );

    let issued_at = Utc::now();
    let upload_url = state
        .sink
        .presign_put(
            &destination_key,
            &request.content_type,
            Duration::from_secs(expires_in_secs),
        )
        .await?;
    let expires_at = issued_at + chrono::Duration::seconds(expires_in_secs as i64);

    tracing::info!(
        destination_key = %destination_key,
        expires_in_secs,
        "Issued presigned upload grant"
    );

    Ok(Json(PresignedGrant {
        upload_url,
        destination_key,
        content_type: request.content_type,
        expires_at,
    }))
}

/// Record a finished client-direct upload and notify downstream
#[utoipa::path(
    post,
    path = "/api/v0/uploads/complete",
    tag = "uploads",
    request_body = ClientUploadCompleteRequest,
    responses(
        (status = 201, description = "Completed job recorded", body = JobStatusResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[tracing::instrument(
    skip(state, request),
    fields(destination_key = %request.destination_key, operation = "complete_client_upload")
)]
pub async fn complete_client_upload(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<ClientUploadCompleteRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    request.validate()?;
    validate_key(&request.destination_key)?;

    let result_ref = state.sink.object_url(&request.destination_key);
    let job = state
        .ledger
        .create(
            NewJob::client_direct_completed(request.destination_key, request.size, result_ref)
                .with_content_type(request.content_type)
                .with_context(request.context),
        )
        .await?;

    tracing::info!(job.id = %job.id, "Recorded client-direct upload");

    // The ledger already says Completed; the trigger runs in the background.
    state.orchestrator.spawn_completion_hook(job.clone());

    Ok((StatusCode::CREATED, Json(JobStatusResponse::from(job))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifetime_defaults_and_clamps() {
        assert_eq!(grant_lifetime_secs(None, 900, 3600), 900);
        assert_eq!(grant_lifetime_secs(Some(60), 900, 3600), 60);
        assert_eq!(grant_lifetime_secs(Some(0), 900, 3600), 1);
        assert_eq!(grant_lifetime_secs(Some(86_400), 900, 3600), 3600);
    }
}
