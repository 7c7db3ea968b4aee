//! Source abstraction
//!
//! The worker reads objects through [`SourceClient`]; the HTTP file API
//! implementation lives in `vidrelay-infra`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

use crate::transfer_error::TransferError;

/// Stream of byte frames read from the source. Frame sizes are arbitrary.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransferError>> + Send>>;

/// An opened source object.
pub struct SourceObject {
    pub stream: ByteStream,
    /// Size reported by the source, if any
    pub size: Option<u64>,
    pub content_type: Option<String>,
}

impl std::fmt::Debug for SourceObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceObject")
            .field("size", &self.size)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Open a streaming read of `source_ref`.
    ///
    /// Missing files fail with a non-retryable `SourceUnavailable`; auth and
    /// network failures are retryable.
    async fn open(&self, source_ref: &str) -> Result<SourceObject, TransferError>;
}
