//! Application state shared by every handler.

use std::sync::Arc;

use vidrelay_core::Config;
use vidrelay_db::JobLedger;
use vidrelay_storage::ObjectSink;
use vidrelay_worker::{JobOrchestrator, JobQueue};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Source of truth for job status; handlers never touch a live transfer.
    pub ledger: Arc<dyn JobLedger>,
    pub sink: Arc<dyn ObjectSink>,
    pub orchestrator: JobOrchestrator,
    /// `None` when workers run elsewhere (and in tests).
    pub queue: Option<JobQueue>,
}

impl AppState {
    pub fn new(
        config: Config,
        ledger: Arc<dyn JobLedger>,
        sink: Arc<dyn ObjectSink>,
        orchestrator: JobOrchestrator,
    ) -> Self {
        Self {
            config,
            ledger,
            sink,
            orchestrator,
            queue: None,
        }
    }

    pub fn with_queue(mut self, queue: JobQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn max_retries(&self) -> i32 {
        self.config.worker().max_retries
    }

    pub fn destination_prefix(&self) -> &str {
        &self.config.sink().destination_prefix
    }
}
