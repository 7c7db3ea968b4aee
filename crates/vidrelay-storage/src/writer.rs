//! Chunk writers
//!
//! The stream bridge pushes bounded chunks into a [`ChunkWriter`] and never
//! sees which upload protocol sits behind it. Every sink call is bounded by the
//! writer's write timeout.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use vidrelay_core::{ByteStream, TransferError};

use crate::coordinator::MultipartCoordinator;
use crate::traits::ObjectSink;

#[async_trait]
pub trait ChunkWriter: Send {
    /// Write one chunk. Returns once the sink has accepted it.
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), TransferError>;

    /// Finalize the upload and return the object URL.
    async fn finish(&mut self) -> Result<String, TransferError>;

    /// Release any half-open sink state. Safe to call more than once and
    /// after a failed `finish`.
    async fn abort(&mut self);
}

async fn with_deadline<T, F>(
    operation: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T, TransferError>
where
    F: Future<Output = Result<T, TransferError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| TransferError::Timeout {
            operation,
            after_secs: timeout.as_secs(),
        })?
}

/// Single PUT with a declared length. Chunks travel through a one-slot
/// channel into the request body, so at most one chunk waits ahead of the
/// network write.
pub struct SingleShotWriter {
    key: String,
    tx: Option<mpsc::Sender<Result<Bytes, TransferError>>>,
    upload: Option<JoinHandle<Result<String, TransferError>>>,
    write_timeout: Duration,
}

impl SingleShotWriter {
    /// Start the PUT for `key`. The request is in flight once this returns.
    pub fn start(
        sink: Arc<dyn ObjectSink>,
        key: &str,
        content_length: u64,
        content_type: Option<String>,
        write_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<Result<Bytes, TransferError>>(1);
        let body: ByteStream = Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }));

        let upload_key = key.to_string();
        let upload = tokio::spawn(async move {
            sink.put_stream(&upload_key, content_length, content_type.as_deref(), body)
                .await
                .map_err(TransferError::from)
        });

        Self {
            key: key.to_string(),
            tx: Some(tx),
            upload: Some(upload),
            write_timeout,
        }
    }

    /// Outcome of the upload task once it has stopped.
    async fn join_upload(&mut self) -> Result<String, TransferError> {
        let Some(upload) = self.upload.take() else {
            return Err(TransferError::sink_transient(
                "single-shot upload already finished",
            ));
        };
        match tokio::time::timeout(self.write_timeout, upload).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(TransferError::sink_transient(format!(
                "upload task failed: {}",
                join_err
            ))),
            Err(_) => Err(TransferError::Timeout {
                operation: "sink write",
                after_secs: self.write_timeout.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl ChunkWriter for SingleShotWriter {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), TransferError> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(TransferError::sink_transient(
                "single-shot upload is closed",
            ));
        };

        match tokio::time::timeout(self.write_timeout, tx.send(Ok(chunk))).await {
            Ok(Ok(())) => Ok(()),
            // The request ended before consuming the body; its result says why.
            Ok(Err(_)) => {
                self.tx = None;
                match self.join_upload().await {
                    Err(err) => Err(err),
                    Ok(_) => Err(TransferError::sink_transient(
                        "single-shot upload finished before the body was sent",
                    )),
                }
            }
            Err(_) => Err(TransferError::Timeout {
                operation: "sink write",
                after_secs: self.write_timeout.as_secs(),
            }),
        }
    }

    async fn finish(&mut self) -> Result<String, TransferError> {
        // Closing the channel ends the request body.
        self.tx = None;
        let location = self.join_upload().await?;
        tracing::debug!(key = %self.key, "Single-shot upload finished");
        Ok(location)
    }

    async fn abort(&mut self) {
        self.tx = None;
        if let Some(upload) = self.upload.take() {
            upload.abort();
            tracing::debug!(key = %self.key, "Single-shot upload aborted");
        }
    }
}

/// Multipart upload driven by a [`MultipartCoordinator`]; one chunk becomes one part.
pub struct MultipartWriter {
    coordinator: MultipartCoordinator,
    write_timeout: Duration,
    closed: bool,
}

impl MultipartWriter {
    /// Open the multipart session.
    pub async fn begin(
        sink: Arc<dyn ObjectSink>,
        key: &str,
        content_type: Option<&str>,
        min_part_size: u64,
        write_timeout: Duration,
    ) -> Result<Self, TransferError> {
        let coordinator = with_deadline(
            "sink write",
            write_timeout,
            MultipartCoordinator::begin(sink, key, content_type, min_part_size),
        )
        .await?;
        Ok(Self {
            coordinator,
            write_timeout,
            closed: false,
        })
    }

    pub fn coordinator(&self) -> &MultipartCoordinator {
        &self.coordinator
    }
}

#[async_trait]
impl ChunkWriter for MultipartWriter {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), TransferError> {
        with_deadline(
            "sink write",
            self.write_timeout,
            self.coordinator.upload_next(chunk),
        )
        .await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<String, TransferError> {
        // A session needs at least one part, even for an empty object.
        if self.coordinator.parts().is_empty() {
            with_deadline(
                "sink write",
                self.write_timeout,
                self.coordinator.upload_next(Bytes::new()),
            )
            .await?;
        }
        let location = with_deadline(
            "sink write",
            self.write_timeout,
            self.coordinator.complete(),
        )
        .await?;
        self.closed = true;
        Ok(location)
    }

    async fn abort(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let result = with_deadline("sink write", self.write_timeout, self.coordinator.abort()).await;
        if let Err(e) = result {
            tracing::error!(
                error = %e,
                key = %self.coordinator.session().key,
                upload_id = %self.coordinator.session().upload_id,
                "Failed to abort multipart session"
            );
        }
    }
}
