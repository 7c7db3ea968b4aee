use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use vidrelay_core::models::{Job, JobFilter, JobMutation, JobState, NewJob};

use super::ledger::{
    validate_initial_state, validate_mutation, JobLedger, LedgerError, NEW_JOB_CHANNEL,
};

const JOB_COLUMNS: &str = r#"
    id,
    source_ref,
    declared_size,
    content_type,
    destination_key,
    state,
    strategy,
    bytes_transferred,
    result_ref,
    error,
    retry_count,
    max_retries,
    next_attempt_at,
    idempotency_key,
    context,
    cancel_requested,
    webhook_fired,
    multipart_upload_id,
    created_at,
    updated_at,
    started_at,
    completed_at
"#;

/// PostgreSQL-backed ledger.
#[derive(Clone)]
pub struct PgJobLedger {
    pool: PgPool,
}

impl PgJobLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find_by_idempotency_key(&self, key: &str) -> anyhow::Result<Option<Uuid>> {
        let id: Option<Uuid> =
            sqlx::query_scalar::<Postgres, Uuid>("SELECT id FROM jobs WHERE idempotency_key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to look up idempotency key")?;
        Ok(id)
    }

    async fn current_state(&self, id: Uuid) -> anyhow::Result<Option<JobState>> {
        let state: Option<JobState> =
            sqlx::query_scalar::<Postgres, JobState>("SELECT state FROM jobs WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to fetch job state")?;
        Ok(state)
    }
}

#[async_trait]
impl JobLedger for PgJobLedger {
    #[tracing::instrument(skip(self, job), fields(source_ref = %job.source_ref))]
    async fn create(&self, job: NewJob) -> Result<Job, LedgerError> {
        validate_initial_state(&job)?;

        let error: Option<serde_json::Value> = None;
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for job creation")?;

        let sql = format!(
            r#"
            INSERT INTO jobs (
                id, source_ref, declared_size, content_type, destination_key, state,
                strategy, bytes_transferred, result_ref, error, max_retries,
                idempotency_key, context, completed_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                CASE WHEN $6::job_state = 'completed' THEN NOW() ELSE NULL END
            )
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING {}
            "#,
            JOB_COLUMNS
        );

        let inserted: Option<Job> = sqlx::query_as::<Postgres, Job>(&sql)
            .bind(Uuid::new_v4())
            .bind(&job.source_ref)
            .bind(job.declared_size)
            .bind(&job.content_type)
            .bind(&job.destination_key)
            .bind(job.state)
            .bind(job.strategy.map(|s| s.to_string()))
            .bind(job.bytes_transferred)
            .bind(&job.result_ref)
            .bind(error)
            .bind(job.max_retries)
            .bind(&job.idempotency_key)
            .bind(&job.context)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to insert job into ledger");
                anyhow::anyhow!("Failed to insert job into ledger: {}", e)
            })?;

        let Some(created) = inserted else {
            tx.rollback().await.ok();
            let key = job.idempotency_key.unwrap_or_default();
            let existing = self
                .find_by_idempotency_key(&key)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Insert conflicted but no job holds key '{}'", key))?;
            return Err(LedgerError::DuplicateRequest { key, existing });
        };

        if created.state == JobState::Queued {
            // Workers still discover the job by polling if the notification fails.
            if let Err(e) = sqlx::query("SELECT pg_notify($1, '')")
                .bind(NEW_JOB_CHANNEL)
                .execute(&mut *tx)
                .await
            {
                tracing::warn!(
                    error = %e,
                    job.id = %created.id,
                    "Failed to send pg_notify for new job, workers will discover it via polling"
                );
            }
        }

        tx.commit()
            .await
            .context("Failed to commit job creation")?;

        tracing::info!(
            job.id = %created.id,
            state = %created.state,
            destination_key = %created.destination_key,
            "Job created"
        );

        Ok(created)
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, id: Uuid) -> Result<Job, LedgerError> {
        let sql = format!("SELECT {} FROM jobs WHERE id = $1", JOB_COLUMNS);
        let job: Option<Job> = sqlx::query_as::<Postgres, Job>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch job")?;

        job.ok_or(LedgerError::NotFound(id))
    }

    #[tracing::instrument(skip(self, mutation))]
    async fn update(
        &self,
        id: Uuid,
        expected: JobState,
        mutation: JobMutation,
    ) -> Result<Job, LedgerError> {
        validate_mutation(id, expected, &mutation)?;

        let error = mutation
            .error
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .context("Failed to serialize job error detail")?;

        let sql = format!(
            r#"
            UPDATE jobs
            SET state = COALESCE($3::job_state, state),
                strategy = COALESCE($4, strategy),
                bytes_transferred = COALESCE($5, bytes_transferred),
                result_ref = COALESCE($6, result_ref),
                error = CASE
                    WHEN $3::job_state = 'completed' THEN NULL
                    ELSE COALESCE($7, error)
                END,
                retry_count = retry_count + $8,
                next_attempt_at = COALESCE($9, next_attempt_at),
                cancel_requested = COALESCE($10, cancel_requested),
                webhook_fired = COALESCE($11, webhook_fired),
                multipart_upload_id = CASE
                    WHEN $3::job_state IS NOT NULL THEN NULL
                    ELSE COALESCE($12, multipart_upload_id)
                END,
                completed_at = CASE
                    WHEN $3::job_state IN ('completed', 'failed', 'aborted') THEN NOW()
                    ELSE completed_at
                END,
                updated_at = NOW()
            WHERE id = $1
                AND state = $2
                AND ($13::timestamptz IS NULL OR started_at = $13)
            RETURNING {}
            "#,
            JOB_COLUMNS
        );

        let updated: Option<Job> = sqlx::query_as::<Postgres, Job>(&sql)
            .bind(id)
            .bind(expected)
            .bind(mutation.state)
            .bind(mutation.strategy.map(|s| s.to_string()))
            .bind(mutation.bytes_transferred)
            .bind(&mutation.result_ref)
            .bind(error)
            .bind(if mutation.increment_retry { 1_i32 } else { 0_i32 })
            .bind(mutation.next_attempt_at)
            .bind(mutation.cancel_requested)
            .bind(mutation.webhook_fired)
            .bind(&mutation.multipart_upload_id)
            .bind(mutation.claimed_at)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to update job")?;

        match updated {
            Some(job) => {
                if let Some(next) = mutation.state {
                    tracing::info!(
                        job.id = %id,
                        from = %expected,
                        to = %next,
                        retry_count = job.retry_count,
                        "Job transitioned"
                    );
                }
                Ok(job)
            }
            None => match self.current_state(id).await? {
                None => Err(LedgerError::NotFound(id)),
                Some(actual) if actual == expected && mutation.claimed_at.is_some() => {
                    Err(LedgerError::ClaimLost { id })
                }
                Some(actual) => Err(LedgerError::Conflict {
                    id,
                    expected,
                    actual,
                }),
            },
        }
    }

    #[tracing::instrument(skip(self))]
    async fn list_by(&self, filter: &JobFilter) -> Result<Vec<Job>, LedgerError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM jobs
            WHERE ($1::job_state IS NULL OR state = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            JOB_COLUMNS
        );

        let jobs = sqlx::query_as::<Postgres, Job>(&sql)
            .bind(filter.state)
            .bind(filter.effective_limit())
            .bind(filter.effective_offset())
            .fetch_all(&self.pool)
            .await
            .context("Failed to list jobs")?;

        Ok(jobs)
    }

    #[tracing::instrument(skip(self))]
    async fn claim_next(&self) -> Result<Option<Job>, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let candidate: Option<Uuid> = sqlx::query_scalar::<Postgres, Uuid>(
            r#"
            SELECT id
            FROM jobs
            WHERE state = 'queued'
                AND next_attempt_at <= NOW()
            ORDER BY next_attempt_at ASC, created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to fetch next job")?;

        let Some(id) = candidate else {
            tx.rollback().await.ok();
            return Ok(None);
        };

        let sql = format!(
            r#"
            UPDATE jobs
            SET state = 'running',
                bytes_transferred = 0,
                started_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND state = 'queued'
            RETURNING {}
            "#,
            JOB_COLUMNS
        );

        let claimed: Job = sqlx::query_as::<Postgres, Job>(&sql)
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to claim job")?;

        tx.commit().await.context("Failed to commit job claim")?;

        tracing::debug!(
            job.id = %claimed.id,
            retry_count = claimed.retry_count,
            "Job claimed"
        );

        Ok(Some(claimed))
    }

    #[tracing::instrument(skip(self))]
    async fn find_stale_running(
        &self,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Job>, LedgerError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM jobs
            WHERE state = 'running' AND updated_at < $1
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
            JOB_COLUMNS
        );

        let jobs = sqlx::query_as::<Postgres, Job>(&sql)
            .bind(updated_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to find stale running jobs")?;

        Ok(jobs)
    }

    #[tracing::instrument(skip(self))]
    async fn find_unfired_completed(
        &self,
        completed_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Job>, LedgerError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM jobs
            WHERE state = 'completed'
                AND webhook_fired = FALSE
                AND completed_at < $1
            ORDER BY completed_at ASC
            LIMIT $2
            "#,
            JOB_COLUMNS
        );

        let jobs = sqlx::query_as::<Postgres, Job>(&sql)
            .bind(completed_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to find completed jobs awaiting webhook")?;

        Ok(jobs)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64, LedgerError> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE state IN ('completed', 'failed', 'aborted')
                AND COALESCE(completed_at, updated_at) < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .context("Failed to delete finished jobs")?;

        Ok(result.rows_affected())
    }
}
