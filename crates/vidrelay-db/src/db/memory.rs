use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use vidrelay_core::models::{Job, JobFilter, JobMutation, JobState, NewJob};

use super::ledger::{validate_initial_state, validate_mutation, JobLedger, LedgerError};

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<Uuid, Job>,
    /// Insertion order, used to break `created_at` ties.
    order: Vec<Uuid>,
    transitions: HashMap<Uuid, Vec<JobState>>,
}

/// Process-local ledger. Nothing survives a restart.
///
/// Every state a job passes through is kept in order and exposed by
/// [`MemoryJobLedger::transitions`].
#[derive(Clone, Default)]
pub struct MemoryJobLedger {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryJobLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// States recorded for `id`, starting with its initial state.
    pub fn transitions(&self, id: Uuid) -> Vec<JobState> {
        self.lock().transitions.get(&id).cloned().unwrap_or_default()
    }

    /// Shift a job's timestamps into the past, as if it had been idle for `by`.
    pub fn backdate(&self, id: Uuid, by: Duration) {
        let mut state = self.lock();
        if let Some(job) = state.jobs.get_mut(&id) {
            job.updated_at -= by;
            job.created_at -= by;
            job.next_attempt_at -= by;
            if let Some(started) = job.started_at.as_mut() {
                *started -= by;
            }
            if let Some(completed) = job.completed_at.as_mut() {
                *completed -= by;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn apply(job: &mut Job, mutation: JobMutation, now: DateTime<Utc>) {
    if let Some(strategy) = mutation.strategy {
        job.strategy = Some(strategy);
    }
    if let Some(bytes) = mutation.bytes_transferred {
        job.bytes_transferred = bytes;
    }
    if let Some(result_ref) = mutation.result_ref {
        job.result_ref = Some(result_ref);
    }
    if let Some(error) = mutation.error {
        job.error = Some(error);
    }
    if mutation.increment_retry {
        job.retry_count += 1;
    }
    if let Some(next_attempt_at) = mutation.next_attempt_at {
        job.next_attempt_at = next_attempt_at;
    }
    if let Some(cancel_requested) = mutation.cancel_requested {
        job.cancel_requested = cancel_requested;
    }
    if let Some(webhook_fired) = mutation.webhook_fired {
        job.webhook_fired = webhook_fired;
    }
    if let Some(upload_id) = mutation.multipart_upload_id {
        job.multipart_upload_id = Some(upload_id);
    }
    if let Some(next) = mutation.state {
        job.state = next;
        job.multipart_upload_id = None;
        if next == JobState::Completed {
            job.error = None;
        }
        if next.is_terminal() {
            job.completed_at = Some(now);
        }
    }
    job.updated_at = now;
}

#[async_trait]
impl JobLedger for MemoryJobLedger {
    async fn create(&self, new: NewJob) -> Result<Job, LedgerError> {
        validate_initial_state(&new)?;

        let mut state = self.lock();
        if let Some(key) = new.idempotency_key.as_deref() {
            if let Some(existing) = state
                .jobs
                .values()
                .find(|j| j.idempotency_key.as_deref() == Some(key))
            {
                return Err(LedgerError::DuplicateRequest {
                    key: key.to_string(),
                    existing: existing.id,
                });
            }
        }

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            source_ref: new.source_ref,
            declared_size: new.declared_size,
            content_type: new.content_type,
            destination_key: new.destination_key,
            state: new.state,
            strategy: new.strategy,
            bytes_transferred: new.bytes_transferred,
            result_ref: new.result_ref,
            error: None,
            retry_count: 0,
            max_retries: new.max_retries,
            next_attempt_at: now,
            idempotency_key: new.idempotency_key,
            context: new.context,
            cancel_requested: false,
            webhook_fired: false,
            multipart_upload_id: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: (new.state == JobState::Completed).then_some(now),
        };

        state.order.push(job.id);
        state.transitions.insert(job.id, vec![job.state]);
        state.jobs.insert(job.id, job.clone());

        tracing::debug!(job.id = %job.id, state = %job.state, "Job created");
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Job, LedgerError> {
        self.lock()
            .jobs
            .get(&id)
            .cloned()
            .ok_or(LedgerError::NotFound(id))
    }

    async fn update(
        &self,
        id: Uuid,
        expected: JobState,
        mutation: JobMutation,
    ) -> Result<Job, LedgerError> {
        validate_mutation(id, expected, &mutation)?;

        let mut state = self.lock();
        let job = state.jobs.get_mut(&id).ok_or(LedgerError::NotFound(id))?;
        if job.state != expected {
            return Err(LedgerError::Conflict {
                id,
                expected,
                actual: job.state,
            });
        }
        if !mutation.holds_claim(job.started_at) {
            return Err(LedgerError::ClaimLost { id });
        }

        let next = mutation.state;
        apply(job, mutation, Utc::now());
        let updated = job.clone();

        if let Some(next) = next {
            state.transitions.entry(id).or_default().push(next);
            tracing::debug!(job.id = %id, from = %expected, to = %next, "Job transitioned");
        }

        Ok(updated)
    }

    async fn list_by(&self, filter: &JobFilter) -> Result<Vec<Job>, LedgerError> {
        let state = self.lock();
        let jobs = state
            .order
            .iter()
            .rev()
            .filter_map(|id| state.jobs.get(id))
            .filter(|job| filter.state.is_none_or(|s| job.state == s))
            .skip(filter.effective_offset() as usize)
            .take(filter.effective_limit() as usize)
            .cloned()
            .collect();
        Ok(jobs)
    }

    async fn claim_next(&self) -> Result<Option<Job>, LedgerError> {
        let now = Utc::now();
        let mut state = self.lock();

        let candidate = state
            .order
            .iter()
            .filter_map(|id| state.jobs.get(id))
            .filter(|job| job.is_ready_to_run(now))
            .min_by_key(|job| job.next_attempt_at)
            .map(|job| job.id);

        let Some(id) = candidate else {
            return Ok(None);
        };

        let claimed = match state.jobs.get_mut(&id) {
            Some(job) => {
                job.state = JobState::Running;
                job.bytes_transferred = 0;
                job.started_at = Some(now);
                job.updated_at = now;
                job.clone()
            }
            None => return Ok(None),
        };
        state
            .transitions
            .entry(id)
            .or_default()
            .push(JobState::Running);

        Ok(Some(claimed))
    }

    async fn find_stale_running(
        &self,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Job>, LedgerError> {
        let state = self.lock();
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| job.state == JobState::Running && job.updated_at < updated_before)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.updated_at);
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn find_unfired_completed(
        &self,
        completed_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Job>, LedgerError> {
        let state = self.lock();
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| {
                job.state == JobState::Completed
                    && !job.webhook_fired
                    && job.completed_at.is_some_and(|at| at < completed_before)
            })
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.completed_at);
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64, LedgerError> {
        let mut state = self.lock();
        let expired: Vec<Uuid> = state
            .jobs
            .values()
            .filter(|job| {
                job.state.is_terminal() && job.completed_at.unwrap_or(job.updated_at) < cutoff
            })
            .map(|job| job.id)
            .collect();

        for id in &expired {
            state.jobs.remove(id);
            state.transitions.remove(id);
        }
        state.order.retain(|id| !expired.contains(id));

        Ok(expired.len() as u64)
    }
}
