//! Job queue: worker pool, LISTEN/NOTIFY or polling, and the recovery sweep.
//!
//! Shutdown: [`JobQueue::shutdown`] signals the pool to stop claiming; it does not
//! wait for in-flight transfers. A transfer interrupted by process exit stays
//! `Running` and is picked up by the recovery sweep after the grace period.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;

use vidrelay_core::WorkerConfig;
use vidrelay_db::NEW_JOB_CHANNEL;

use crate::orchestrator::JobOrchestrator;

#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    /// Seconds between recovery sweeps. `0` disables the sweep.
    pub stale_job_reap_interval_secs: u64,
    pub stale_job_grace_period_secs: i64,
    /// `0` keeps terminal jobs forever.
    pub job_retention_days: i32,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for JobQueueConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_workers: config.max_workers.max(1),
            poll_interval_ms: config.poll_interval_ms,
            stale_job_reap_interval_secs: config.stale_job_reap_interval_secs,
            stale_job_grace_period_secs: config.stale_job_grace_period_secs,
            job_retention_days: config.job_retention_days,
        }
    }
}

#[derive(Clone)]
pub struct JobQueue {
    config: JobQueueConfig,
    shutdown_tx: mpsc::Sender<()>,
}

impl JobQueue {
    /// Start the worker pool.
    ///
    /// If `pool` is `Some`, workers also wake on `LISTEN vidrelay_new_job`
    /// in addition to polling every `poll_interval_ms`.
    pub fn start(
        orchestrator: JobOrchestrator,
        config: JobQueueConfig,
        pool: Option<sqlx::PgPool>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let config_clone = config.clone();
        tokio::spawn(async move {
            Self::worker_pool(orchestrator, config_clone, shutdown_rx, pool).await;
        });

        Self {
            config,
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &JobQueueConfig {
        &self.config
    }

    async fn worker_pool(
        orchestrator: JobOrchestrator,
        config: JobQueueConfig,
        mut shutdown_rx: mpsc::Receiver<()>,
        pool: Option<sqlx::PgPool>,
    ) {
        let use_listen = pool.is_some();
        tracing::info!(
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval_ms,
            listen_notify = use_listen,
            "Job queue worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers));
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(16);
        if let Some(pool) = pool {
            let tx = notify_tx.clone();
            tokio::spawn(async move {
                loop {
                    match sqlx::postgres::PgListener::connect_with(&pool).await {
                        Ok(mut listener) => {
                            if let Err(e) = listener.listen(NEW_JOB_CHANNEL).await {
                                tracing::warn!(error = %e, "LISTEN failed, will retry");
                                tokio::time::sleep(Duration::from_secs(5)).await;
                                continue;
                            }
                            while listener.recv().await.is_ok() {
                                let _ = tx.send(()).await;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "PgListener connect failed, will retry");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            });
        }

        let (sweep_shutdown_tx, sweep_shutdown_rx) = mpsc::channel::<()>(1);
        if config.stale_job_reap_interval_secs > 0 {
            tokio::spawn(Self::sweep_loop(
                orchestrator.clone(),
                config.clone(),
                sweep_shutdown_rx,
            ));
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Job queue worker pool shutting down");
                    let _ = sweep_shutdown_tx.send(()).await;
                    break;
                }
                _ = notify_rx.recv() => {
                    Self::claim_and_dispatch(&orchestrator, &semaphore).await;
                }
                _ = sleep(poll_interval) => {
                    Self::claim_and_dispatch(&orchestrator, &semaphore).await;
                }
            }
        }

        tracing::info!("Job queue worker pool stopped");
    }

    async fn sweep_loop(
        orchestrator: JobOrchestrator,
        config: JobQueueConfig,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let grace_period = chrono::Duration::seconds(config.stale_job_grace_period_secs);
        let retention = (config.job_retention_days > 0)
            .then(|| chrono::Duration::days(i64::from(config.job_retention_days)));

        let mut interval =
            tokio::time::interval(Duration::from_secs(config.stale_job_reap_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match orchestrator.recovery_sweep(grace_period, retention).await {
                        Ok(report) => tracing::debug!(?report, "Recovery sweep finished"),
                        Err(e) => tracing::error!(error = %e, "Recovery sweep failed"),
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    /// Claim ready jobs while workers are free.
    async fn claim_and_dispatch(orchestrator: &JobOrchestrator, semaphore: &Arc<Semaphore>) {
        loop {
            let permit = match semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::trace!("No workers available, skipping claim");
                    return;
                }
            };

            match orchestrator.ledger().claim_next().await {
                Ok(Some(job)) => {
                    let orchestrator = orchestrator.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        let job_id = job.id;
                        if let Err(e) = orchestrator.run(job).await {
                            tracing::error!(
                                job.id = %job_id,
                                error = %e,
                                "Job attempt ended without recording"
                            );
                        }
                    });
                }
                Ok(None) => {
                    tracing::trace!("No jobs ready in queue");
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim job from ledger");
                    return;
                }
            }
        }
    }

    /// Signals the worker pool to stop claiming jobs and exit the main loop.
    ///
    /// Returns immediately; already-running transfers continue until they finish.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating job queue shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}
