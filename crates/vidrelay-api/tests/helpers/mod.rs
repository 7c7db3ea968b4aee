//! Test helpers: build an AppState on the in-memory ledger and sink, and a
//! `TestServer` around the real router.

#![allow(dead_code)]

use async_trait::async_trait;
use axum_test::TestServer;
use bytes::Bytes;
use futures::stream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use vidrelay_api::setup::routes;
use vidrelay_api::state::AppState;
use vidrelay_core::models::Job;
use vidrelay_core::{
    BaseConfig, CompletionHook, Config, LedgerBackend, RelayConfig, SinkConfig, SourceConfig,
    SourceClient, SourceObject, TransferConfig, TransferError, WebhookConfig, WorkerConfig,
};
use vidrelay_db::MemoryJobLedger;
use vidrelay_storage::MemorySink;
use vidrelay_worker::{JobOrchestrator, JobQueue, JobQueueConfig, OrchestratorSettings};

/// Every object the test source serves.
pub const OBJECT_BYTES: &[u8] = b"not really a video, but long enough to relay";

pub fn test_config() -> Config {
    Config(Box::new(RelayConfig {
        base: BaseConfig {
            server_port: 0,
            cors_origins: vec!["*".to_string()],
            environment: "test".to_string(),
            db_max_connections: 1,
            db_timeout_seconds: 1,
        },
        ledger_backend: LedgerBackend::Memory,
        database_url: None,
        sink: SinkConfig {
            bucket: "bucket".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            public_base_url: None,
            destination_prefix: "videos".to_string(),
            write_timeout_secs: 5,
            presign_default_expiry_secs: 900,
            presign_max_expiry_secs: 3600,
        },
        source: SourceConfig {
            base_url: Some("https://files.test".to_string()),
            token: None,
            read_timeout_secs: 5,
        },
        transfer: TransferConfig::default(),
        worker: WorkerConfig {
            retry_backoff_base_ms: 0,
            retry_backoff_max_secs: 0,
            ..WorkerConfig::default()
        },
        webhook: WebhookConfig::default(),
    }))
}

/// Serves [`OBJECT_BYTES`] for any reference.
#[derive(Default)]
pub struct StaticSource {
    opens: AtomicUsize,
}

#[async_trait]
impl SourceClient for StaticSource {
    async fn open(&self, _source_ref: &str) -> Result<SourceObject, TransferError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(SourceObject {
            stream: Box::pin(stream::iter(
                OBJECT_BYTES
                    .chunks(7)
                    .map(|c| Ok(Bytes::from_static(c)))
                    .collect::<Vec<_>>(),
            )),
            size: Some(OBJECT_BYTES.len() as u64),
            content_type: Some("video/mp4".to_string()),
        })
    }
}

#[derive(Default)]
pub struct RecordingHook {
    calls: AtomicUsize,
}

impl RecordingHook {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionHook for RecordingHook {
    async fn job_completed(&self, _job: &Job) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct TestApp {
    pub server: TestServer,
    pub ledger: MemoryJobLedger,
    pub sink: Arc<MemorySink>,
    pub hook: Arc<RecordingHook>,
    pub queue: Option<JobQueue>,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }
}

fn build(with_workers: bool) -> TestApp {
    let config = test_config();
    let ledger = MemoryJobLedger::new();
    let sink = Arc::new(MemorySink::new());
    let hook = Arc::new(RecordingHook::default());

    let orchestrator = JobOrchestrator::new(
        Arc::new(ledger.clone()),
        Arc::new(StaticSource::default()),
        sink.clone(),
        hook.clone(),
        OrchestratorSettings::from_config(&config),
    );

    let mut state = AppState::new(
        config.clone(),
        Arc::new(ledger.clone()),
        sink.clone(),
        orchestrator.clone(),
    );
    let queue = with_workers.then(|| {
        JobQueue::start(
            orchestrator,
            JobQueueConfig {
                max_workers: 2,
                poll_interval_ms: 10,
                stale_job_reap_interval_secs: 0,
                ..Default::default()
            },
            None,
        )
    });
    if let Some(queue) = queue.clone() {
        state = state.with_queue(queue);
    }

    let router = routes::setup_routes(&config, Arc::new(state)).unwrap();
    TestApp {
        server: TestServer::new(router).unwrap(),
        ledger,
        sink,
        hook,
        queue,
    }
}

/// App without workers: submitted jobs stay queued.
pub fn setup_test_app() -> TestApp {
    build(false)
}

/// App with a running worker pool.
pub fn setup_test_app_with_workers() -> TestApp {
    build(true)
}
