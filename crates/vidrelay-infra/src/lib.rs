//! vidrelay infrastructure library
//!
//! Outbound integrations shared by the API and worker:
//! - HTTP file source (bearer-token file API)
//! - Downstream clip-processing webhook
//! - Telemetry initialization

#[cfg(feature = "source-http")]
pub mod source;

#[cfg(feature = "observability-basic")]
pub mod telemetry;

#[cfg(feature = "webhook")]
pub mod webhook;

// Re-export commonly used types
#[cfg(feature = "source-http")]
pub use source::HttpSource;

#[cfg(feature = "observability-basic")]
pub use telemetry::init_telemetry;

#[cfg(feature = "webhook")]
pub use webhook::{ClipWebhookConfig, ClipWebhookPayload, ClipWebhookService};
