//! vidrelay core library
//!
//! Domain models, the transfer error taxonomy, configuration and the upload
//! strategy selector shared by every vidrelay crate.

pub mod config;
pub mod error;
pub mod hooks;
pub mod models;
pub mod retry;
pub mod source;
pub mod strategy;
pub mod transfer_error;

// Re-export commonly used types
pub use config::{
    BaseConfig, Config, LedgerBackend, RelayConfig, SinkConfig, SourceConfig, TransferConfig,
    WebhookConfig, WorkerConfig, SINK_MIN_PART_SIZE,
};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use hooks::{CompletionHook, NoOpCompletionHook};
pub use retry::compute_retry_backoff;
pub use source::{ByteStream, SourceClient, SourceObject};
pub use strategy::{select_strategy, StrategyThresholds};
pub use transfer_error::{ErrorClass, TransferError};
