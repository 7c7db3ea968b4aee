//! Ledger, sink, source, downstream trigger and worker pool wiring

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;

use vidrelay_core::{CompletionHook, Config, LedgerBackend, NoOpCompletionHook, SourceClient};
use vidrelay_db::{JobLedger, MemoryJobLedger, PgJobLedger};
use vidrelay_infra::{ClipWebhookConfig, ClipWebhookService, HttpSource};
use vidrelay_storage::create_sink;
use vidrelay_worker::{JobOrchestrator, JobQueue, JobQueueConfig, OrchestratorSettings};

use crate::setup::database;
use crate::state::AppState;

async fn setup_ledger(config: &Config) -> Result<(Arc<dyn JobLedger>, Option<PgPool>)> {
    match config.ledger_backend() {
        LedgerBackend::Postgres => {
            let pool = database::setup_database(config).await?;
            Ok((Arc::new(PgJobLedger::new(pool.clone())), Some(pool)))
        }
        LedgerBackend::Memory => {
            tracing::warn!("Using in-memory job ledger; jobs are lost on restart");
            Ok((Arc::new(MemoryJobLedger::new()), None))
        }
    }
}

fn setup_completion_hook(config: &Config) -> Result<Arc<dyn CompletionHook>> {
    match ClipWebhookConfig::from_config(config.webhook()) {
        Some(webhook_config) => {
            tracing::info!(
                url = %webhook_config.url,
                signed = webhook_config.secret.is_some(),
                max_attempts = webhook_config.max_attempts,
                "Clip-processing webhook enabled"
            );
            Ok(Arc::new(ClipWebhookService::new(webhook_config)?))
        }
        None => {
            tracing::info!("CLIP_WEBHOOK_URL not set; downstream trigger disabled");
            Ok(Arc::new(NoOpCompletionHook))
        }
    }
}

/// Build every service and start the worker pool
pub async fn initialize_services(config: &Config) -> Result<Arc<AppState>> {
    let (ledger, pool) = setup_ledger(config).await?;

    let sink = create_sink(config).context("Failed to initialize sink")?;

    let source: Arc<dyn SourceClient> =
        Arc::new(HttpSource::new(config.source()).context("Failed to initialize source client")?);

    let hook = setup_completion_hook(config)?;

    let orchestrator = JobOrchestrator::new(
        ledger.clone(),
        source,
        sink.clone(),
        hook,
        OrchestratorSettings::from_config(config),
    );

    let queue = JobQueue::start(
        orchestrator.clone(),
        JobQueueConfig::from(config.worker()),
        pool,
    );

    let state = AppState::new(config.clone(), ledger, sink, orchestrator).with_queue(queue);

    Ok(Arc::new(state))
}
