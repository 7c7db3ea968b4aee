#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vidrelay_core::models::{Job, NewJob};
use vidrelay_core::{
    ByteStream, CompletionHook, SourceClient, SourceObject, StrategyThresholds, TransferError,
};
use vidrelay_db::{JobLedger, MemoryJobLedger};
use vidrelay_storage::MemorySink;
use vidrelay_worker::{JobOrchestrator, OrchestratorSettings};

pub const MB: u64 = 1024 * 1024;

static ZEROS: [u8; 1024 * 1024] = [0; 1024 * 1024];

/// `total` zero bytes in frames of at most `frame` bytes, without allocating.
pub fn zero_stream(total: u64, frame: usize) -> ByteStream {
    let frame = frame.clamp(1, ZEROS.len());
    Box::pin(stream::unfold(total, move |remaining| async move {
        if remaining == 0 {
            return None;
        }
        let len = remaining.min(frame as u64) as usize;
        Some((Ok(Bytes::from_static(&ZEROS[..len])), remaining - len as u64))
    }))
}

/// Zero bytes up to `fail_after`, then `error`.
pub fn failing_stream(fail_after: u64, frame: usize, error: TransferError) -> ByteStream {
    let head = zero_stream(fail_after, frame);
    Box::pin(futures::StreamExt::chain(
        head,
        stream::once(async move { Err(error) }),
    ))
}

pub enum Script {
    Open {
        stream: ByteStream,
        size: Option<u64>,
        content_type: Option<String>,
    },
    Fail(TransferError),
}

impl Script {
    pub fn zeros(total: u64, reported: Option<u64>) -> Self {
        Script::Open {
            stream: zero_stream(total, 256 * 1024),
            size: reported,
            content_type: Some("video/mp4".to_string()),
        }
    }

    pub fn stream(stream: ByteStream, reported: Option<u64>) -> Self {
        Script::Open {
            stream,
            size: reported,
            content_type: None,
        }
    }
}

/// Source whose responses are queued per reference, one per `open`.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    opens: AtomicUsize,
}

impl ScriptedSource {
    pub fn push(&self, source_ref: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .entry(source_ref.to_string())
            .or_default()
            .push_back(script);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceClient for ScriptedSource {
    async fn open(&self, source_ref: &str) -> Result<SourceObject, TransferError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(source_ref)
            .and_then(VecDeque::pop_front);
        match script {
            Some(Script::Open {
                stream,
                size,
                content_type,
            }) => Ok(SourceObject {
                stream,
                size,
                content_type,
            }),
            Some(Script::Fail(err)) => Err(err),
            None => Err(TransferError::source_permanent(format!(
                "no script for {}",
                source_ref
            ))),
        }
    }
}

/// Counts completion notifications; fails while `failing` is set.
#[derive(Default)]
pub struct CountingHook {
    calls: AtomicUsize,
    failing: std::sync::atomic::AtomicBool,
    seen: Mutex<Vec<uuid::Uuid>>,
}

impl CountingHook {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn seen(&self) -> Vec<uuid::Uuid> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionHook for CountingHook {
    async fn job_completed(&self, job: &Job) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(job.id);
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("downstream unavailable");
        }
        Ok(())
    }
}

pub fn settings(chunk_size: u64, min_part_size: u64) -> OrchestratorSettings {
    OrchestratorSettings {
        chunk_size: chunk_size as usize,
        thresholds: StrategyThresholds {
            direct_upload_threshold: 50 * MB,
            multipart_threshold: 100 * MB,
        },
        read_timeout: Duration::from_secs(5),
        write_timeout: Duration::from_secs(5),
        min_part_size,
        retry_backoff_base_ms: 0,
        retry_backoff_max_secs: 0,
    }
}

pub struct Harness {
    pub ledger: MemoryJobLedger,
    pub sink: Arc<MemorySink>,
    pub source: Arc<ScriptedSource>,
    pub hook: Arc<CountingHook>,
    pub orchestrator: JobOrchestrator,
}

impl Harness {
    pub fn new(settings: OrchestratorSettings) -> Self {
        let ledger = MemoryJobLedger::new();
        let sink = Arc::new(MemorySink::new());
        let source = Arc::new(ScriptedSource::default());
        let hook = Arc::new(CountingHook::default());
        let orchestrator = JobOrchestrator::new(
            Arc::new(ledger.clone()),
            source.clone(),
            sink.clone(),
            hook.clone(),
            settings,
        );
        Self {
            ledger,
            sink,
            source,
            hook,
            orchestrator,
        }
    }

    pub async fn submit(&self, source_ref: &str, declared: Option<u64>) -> Job {
        self.ledger
            .create(
                NewJob::queued(source_ref, format!("videos/{}.mp4", source_ref), 3)
                    .with_declared_size(declared.map(|s| s as i64)),
            )
            .await
            .unwrap()
    }

    /// Claim the next ready job and run one attempt.
    pub async fn claim_and_run(&self) -> Job {
        let job = self
            .ledger
            .claim_next()
            .await
            .unwrap()
            .expect("a job ready to run");
        self.orchestrator.run(job).await.unwrap()
    }

    /// Wait for the background completion hook to record itself.
    pub async fn wait_for_webhook(&self, id: uuid::Uuid) -> Job {
        for _ in 0..200 {
            let job = self.ledger.get(id).await.unwrap();
            if job.webhook_fired {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("webhook marker never set for job {}", id);
    }
}
