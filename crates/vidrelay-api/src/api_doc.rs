//! OpenAPI documentation, served at `/api-docs/openapi.json`.

use utoipa::OpenApi;

use crate::error;
use crate::handlers;
use vidrelay_core::models;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "vidrelay API",
        version = "0.1.0",
        description = "Relays videos from a file API into S3-compatible storage as tracked background jobs. Versioned endpoints live under /api/v0/."
    ),
    paths(
        // Jobs
        handlers::jobs::create_job,
        handlers::jobs::get_job,
        handlers::jobs::list_jobs,
        handlers::jobs::cancel_job,
        // Client-direct uploads
        handlers::uploads::issue_presigned_grant,
        handlers::uploads::complete_client_upload,
        // Legacy
        handlers::legacy::legacy_upload,
        // Health
        handlers::health::health_check,
    ),
    components(
        schemas(
            models::CreateJobRequest,
            models::JobStatusResponse,
            models::JobListResponse,
            models::JobState,
            models::TransferStrategy,
            models::JobErrorDetail,
            models::ErrorKind,
            models::PresignedGrantRequest,
            models::PresignedGrant,
            models::ClientUploadCompleteRequest,
            models::LegacyUploadRequest,
            models::LegacyUploadResponse,
            handlers::health::HealthResponse,
            error::ErrorResponse,
        )
    ),
    tags(
        (name = "jobs", description = "Server-mediated transfer jobs"),
        (name = "uploads", description = "Presigned grants for direct client uploads"),
        (name = "legacy", description = "Original single-route upload endpoint"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/v0/jobs",
            "/api/v0/jobs/{id}",
            "/api/v0/jobs/{id}/cancel",
            "/api/v0/uploads/presigned",
            "/api/v0/uploads/complete",
            "/upload",
            "/health",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
