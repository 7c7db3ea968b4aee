//! vidrelay worker
//!
//! Background execution of transfer jobs: the [`StreamBridge`] that relays
//! bytes in bounded chunks, the [`JobOrchestrator`] that drives a claimed job
//! through its state machine, and the [`JobQueue`] worker pool with its
//! recovery sweep.

pub mod bridge;
pub mod orchestrator;
pub mod queue;
pub mod recovery;

pub use bridge::{NoProgress, ProgressObserver, RelayOutcome, StreamBridge};
pub use orchestrator::{cancel_job, JobOrchestrator, OrchestratorSettings};
pub use queue::{JobQueue, JobQueueConfig};
pub use recovery::SweepReport;
