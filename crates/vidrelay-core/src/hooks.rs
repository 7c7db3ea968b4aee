//! Downstream trigger seam
//!
//! The orchestrator calls [`CompletionHook::job_completed`] after a job has been
//! recorded as `Completed`. Implementations own their retry policy; an `Ok`
//! result lets the caller set the ledger's webhook-fired marker.

use async_trait::async_trait;

use crate::models::Job;

#[async_trait]
pub trait CompletionHook: Send + Sync {
    /// Deliver the completion notification for `job`.
    async fn job_completed(&self, job: &Job) -> anyhow::Result<()>;
}

/// Used when no downstream endpoint is configured. Always succeeds.
pub struct NoOpCompletionHook;

#[async_trait]
impl CompletionHook for NoOpCompletionHook {
    async fn job_completed(&self, _job: &Job) -> anyhow::Result<()> {
        Ok(())
    }
}
