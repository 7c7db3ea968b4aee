//! Sink abstraction trait
//!
//! This module defines the [`ObjectSink`] trait implemented by every sink
//! backend, and the [`SinkError`] it reports.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

use vidrelay_core::models::{MultipartSession, PartRecord};
use vidrelay_core::{AppError, ByteStream, TransferError};

/// Sink operation errors
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    #[error("Sink rejected {operation}: {detail}")]
    Rejected {
        operation: &'static str,
        detail: String,
        retryable: bool,
    },

    #[error("Invalid destination key: {0}")]
    InvalidKey(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

impl SinkError {
    /// Rate limiting, 5xx and network failures.
    pub fn transient(operation: &'static str, detail: impl Into<String>) -> Self {
        SinkError::Rejected {
            operation,
            detail: detail.into(),
            retryable: true,
        }
    }

    /// Authentication failures and other permanent 4xx responses.
    pub fn permanent(operation: &'static str, detail: impl Into<String>) -> Self {
        SinkError::Rejected {
            operation,
            detail: detail.into(),
            retryable: false,
        }
    }

    /// Classify an HTTP status returned by the sink.
    pub fn from_status(operation: &'static str, status: u16, body: &str) -> Self {
        let detail = if body.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, body)
        };
        match status {
            408 | 429 | 500..=599 => SinkError::transient(operation, detail),
            _ => SinkError::permanent(operation, detail),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Rejected { retryable: true, .. })
    }
}

impl From<SinkError> for TransferError {
    fn from(err: SinkError) -> Self {
        let retryable = err.is_retryable();
        TransferError::SinkRejected {
            detail: err.to_string(),
            retryable,
        }
    }
}

impl From<SinkError> for AppError {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::InvalidKey(msg) => AppError::InvalidInput(msg),
            other => AppError::Storage(other.to_string()),
        }
    }
}

/// S3-compatible object store used as the transfer destination.
///
/// Multipart part numbers are 1-based, as in the S3 protocol.
#[async_trait]
pub trait ObjectSink: Send + Sync {
    /// Open a multipart session for `key`.
    async fn begin_multipart(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> SinkResult<MultipartSession>;

    /// Upload one part and return the ETag the sink assigned to it.
    async fn upload_part(
        &self,
        session: &MultipartSession,
        part_number: u32,
        data: Bytes,
    ) -> SinkResult<String>;

    /// Assemble the uploaded parts into the final object and return its URL.
    async fn complete_multipart(
        &self,
        session: &MultipartSession,
        parts: &[PartRecord],
    ) -> SinkResult<String>;

    /// Release every fragment of an unfinished session.
    async fn abort_multipart(&self, session: &MultipartSession) -> SinkResult<()>;

    /// Single PUT of exactly `content_length` bytes, streamed from `body`.
    ///
    /// Returns the object URL.
    async fn put_stream(
        &self,
        key: &str,
        content_length: u64,
        content_type: Option<&str>,
        body: ByteStream,
    ) -> SinkResult<String>;

    /// Presigned URL allowing a client to PUT `key` directly until `expires_in` elapses.
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> SinkResult<String>;

    /// Public link for a stored object.
    fn object_url(&self, key: &str) -> String;
}
