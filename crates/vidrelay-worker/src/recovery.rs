//! Recovery sweep
//!
//! Run periodically by the worker pool. Puts stale `Running` jobs back in the
//! queue, or fails them once the retry budget is spent. Multipart sessions the
//! dead attempt left open are aborted first. The sweep also replays the
//! completion hook for `Completed` jobs that never recorded it and deletes
//! terminal jobs past the retention window.

use chrono::{Duration, Utc};

use vidrelay_core::compute_retry_backoff;
use vidrelay_core::models::{
    ErrorKind, Job, JobErrorDetail, JobMutation, JobState, MultipartSession,
};
use vidrelay_db::LedgerError;

use crate::orchestrator::JobOrchestrator;

const SWEEP_BATCH: i64 = 100;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub failed: usize,
    pub sessions_aborted: usize,
    pub hooks_replayed: usize,
    pub deleted: u64,
}

impl JobOrchestrator {
    /// One pass of the sweep. `retention` of `None` keeps terminal jobs forever.
    #[tracing::instrument(skip(self))]
    pub async fn recovery_sweep(
        &self,
        grace_period: Duration,
        retention: Option<Duration>,
    ) -> Result<SweepReport, LedgerError> {
        let now = Utc::now();
        let mut report = SweepReport::default();

        let stale = self
            .ledger()
            .find_stale_running(now - grace_period, SWEEP_BATCH)
            .await?;
        for job in stale {
            if self.abort_orphaned_session(&job).await {
                report.sessions_aborted += 1;
            }

            let message = format!(
                "no progress recorded for {}s",
                (now - job.updated_at).num_seconds()
            );
            let mutation = if job.can_retry() {
                let backoff = compute_retry_backoff(
                    job.retry_count,
                    self.settings().retry_backoff_base_ms,
                    self.settings().retry_backoff_max_secs,
                );
                let next_attempt_at =
                    now + Duration::from_std(backoff).unwrap_or_else(|_| Duration::zero());
                JobMutation::transition(JobState::Queued)
                    .with_error(JobErrorDetail::new(ErrorKind::Stale, message, true))
                    .with_retry_at(next_attempt_at)
            } else {
                JobMutation::transition(JobState::Failed)
                    .with_error(JobErrorDetail::new(ErrorKind::Stale, message, false))
            };

            let mutation = mutation.with_claim(job.started_at);
            match self.ledger().update(job.id, JobState::Running, mutation).await {
                Ok(updated) if updated.state == JobState::Queued => {
                    tracing::warn!(
                        job.id = %job.id,
                        retry_count = updated.retry_count,
                        "Requeued stale running job"
                    );
                    report.requeued += 1;
                }
                Ok(_) => {
                    tracing::error!(
                        job.id = %job.id,
                        retry_count = job.retry_count,
                        "Stale running job exhausted its retries"
                    );
                    report.failed += 1;
                }
                // The worker finished it or it was claimed again in the meantime.
                Err(LedgerError::Conflict { .. }) | Err(LedgerError::ClaimLost { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        let unfired = self
            .ledger()
            .find_unfired_completed(now - grace_period, SWEEP_BATCH)
            .await?;
        for job in unfired {
            tracing::info!(job.id = %job.id, "Replaying downstream trigger");
            self.fire_completion_hook(&job).await;
            report.hooks_replayed += 1;
        }

        if let Some(retention) = retention {
            report.deleted = self.ledger().delete_finished_before(now - retention).await?;
            if report.deleted > 0 {
                tracing::info!(deleted = report.deleted, "Deleted expired jobs");
            }
        }

        Ok(report)
    }

    /// Abort the multipart session recorded on a stale job, if any.
    async fn abort_orphaned_session(&self, job: &Job) -> bool {
        let Some(upload_id) = job.multipart_upload_id.clone() else {
            return false;
        };
        let session = MultipartSession {
            key: job.destination_key.clone(),
            upload_id,
        };
        match self.sink().abort_multipart(&session).await {
            Ok(()) => {
                tracing::info!(
                    job.id = %job.id,
                    upload_id = %session.upload_id,
                    "Aborted orphaned multipart session"
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    job.id = %job.id,
                    upload_id = %session.upload_id,
                    error = %e,
                    "Failed to abort orphaned multipart session"
                );
                false
            }
        }
    }
}
