//! Stream bridge
//!
//! Moves bytes from a source stream into a [`ChunkWriter`] in fixed-size chunks.
//! Frames from the source are re-cut to `chunk_size`; at most one chunk is
//! held by the bridge at a time and chunk N is accepted by the sink before
//! chunk N+1 is read, so memory does not grow with the object.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::time::Duration;

use vidrelay_core::{ByteStream, TransferError};
use vidrelay_storage::ChunkWriter;

/// Receives the running byte count after each chunk is written.
///
/// Returning an error stops the relay; the session is aborted before the
/// error reaches the caller.
#[async_trait]
pub trait ProgressObserver: Send + Sync {
    async fn on_chunk(&self, bytes_transferred: u64) -> Result<(), TransferError>;
}

pub struct NoProgress;

#[async_trait]
impl ProgressObserver for NoProgress {
    async fn on_chunk(&self, _bytes_transferred: u64) -> Result<(), TransferError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    pub bytes_transferred: u64,
    pub chunks: u64,
    /// Location returned by the sink when the upload was finalized.
    pub location: String,
    /// Largest chunk handed to the writer.
    pub largest_chunk: usize,
}

#[derive(Debug, Clone)]
pub struct StreamBridge {
    chunk_size: usize,
    read_timeout: Duration,
}

impl StreamBridge {
    pub fn new(chunk_size: usize, read_timeout: Duration) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            read_timeout,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Relay `source` into `writer` and finalize the upload.
    ///
    /// With a `declared` size, over-delivery fails as soon as it is seen and
    /// under-delivery fails after the last chunk, both with `SizeMismatch`.
    /// The writer is aborted on every error path.
    #[tracing::instrument(skip_all, fields(chunk_size = self.chunk_size, declared = ?declared))]
    pub async fn relay(
        &self,
        source: ByteStream,
        declared: Option<u64>,
        writer: &mut dyn ChunkWriter,
        progress: &dyn ProgressObserver,
    ) -> Result<RelayOutcome, TransferError> {
        match self.pump(source, declared, writer, progress).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                tracing::debug!(error = %err, "Relay failed, aborting upload");
                writer.abort().await;
                Err(err)
            }
        }
    }

    async fn pump(
        &self,
        mut source: ByteStream,
        declared: Option<u64>,
        writer: &mut dyn ChunkWriter,
        progress: &dyn ProgressObserver,
    ) -> Result<RelayOutcome, TransferError> {
        let start = std::time::Instant::now();
        let mut carry = BytesMut::new();
        let mut bytes_read: u64 = 0;
        let mut tally = Tally::default();

        loop {
            let next = tokio::time::timeout(self.read_timeout, source.next())
                .await
                .map_err(|_| TransferError::Timeout {
                    operation: "source read",
                    after_secs: self.read_timeout.as_secs(),
                })?;

            let mut frame = match next {
                None => break,
                Some(frame) => frame?,
            };

            bytes_read += frame.len() as u64;
            if let Some(declared) = declared {
                if bytes_read > declared {
                    return Err(TransferError::SizeMismatch {
                        declared,
                        actual: bytes_read,
                    });
                }
            }

            while !frame.is_empty() {
                if carry.is_empty() && frame.len() >= self.chunk_size {
                    let chunk = frame.split_to(self.chunk_size);
                    tally.emit(chunk, writer, progress).await?;
                    continue;
                }

                if carry.is_empty() {
                    carry.reserve(self.chunk_size);
                }
                let take = (self.chunk_size - carry.len()).min(frame.len());
                carry.extend_from_slice(&frame.split_to(take));
                if carry.len() == self.chunk_size {
                    tally.emit(carry.split().freeze(), writer, progress).await?;
                }
            }
        }

        if !carry.is_empty() {
            tally.emit(carry.split().freeze(), writer, progress).await?;
        }

        if let Some(declared) = declared {
            if tally.bytes != declared {
                return Err(TransferError::SizeMismatch {
                    declared,
                    actual: tally.bytes,
                });
            }
        }

        let location = writer.finish().await?;

        tracing::info!(
            bytes_transferred = tally.bytes,
            chunks = tally.chunks,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Relay finished"
        );

        Ok(RelayOutcome {
            bytes_transferred: tally.bytes,
            chunks: tally.chunks,
            location,
            largest_chunk: tally.largest_chunk,
        })
    }
}

#[derive(Default)]
struct Tally {
    bytes: u64,
    chunks: u64,
    largest_chunk: usize,
}

impl Tally {
    async fn emit(
        &mut self,
        chunk: Bytes,
        writer: &mut dyn ChunkWriter,
        progress: &dyn ProgressObserver,
    ) -> Result<(), TransferError> {
        let len = chunk.len();
        writer.write_chunk(chunk).await?;
        self.bytes += len as u64;
        self.chunks += 1;
        self.largest_chunk = self.largest_chunk.max(len);
        tracing::trace!(chunk = self.chunks, bytes_transferred = self.bytes, "Chunk written");
        progress.on_chunk(self.bytes).await
    }
}
