//! In-memory sink
//!
//! Keeps every session, part and object it sees so callers can assert on them,
//! and fails specific operations on demand. Object bytes are only retained
//! when built with [`MemorySink::retaining_bytes`].

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use vidrelay_core::models::{MultipartSession, PartRecord};
use vidrelay_core::ByteStream;

use crate::keys::validate_key;
use crate::traits::{ObjectSink, SinkError, SinkResult};

/// Sink operation a fault can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkOp {
    BeginMultipart,
    UploadPart,
    CompleteMultipart,
    AbortMultipart,
    PutStream,
    Presign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionStatus {
    Open,
    Completed,
    Aborted,
}

struct StoredPart {
    e_tag: String,
    length: u64,
    data: Option<Bytes>,
}

struct SessionRecord {
    session: MultipartSession,
    status: SessionStatus,
    parts: BTreeMap<u32, StoredPart>,
}

/// Object visible in the sink after a successful PUT or multipart completion.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub size: u64,
    pub content_type: Option<String>,
    /// Present only when the sink retains bytes
    pub data: Option<Bytes>,
    /// Number of parts, or `None` for a single PUT
    pub parts: Option<usize>,
}

struct Fault {
    error: SinkError,
    remaining: Option<usize>,
}

#[derive(Default)]
struct MemorySinkState {
    sessions: Vec<SessionRecord>,
    objects: HashMap<String, StoredObject>,
    faults: HashMap<SinkOp, Fault>,
    complete_calls: usize,
    abort_calls: usize,
}

#[derive(Clone)]
pub struct MemorySink {
    state: Arc<Mutex<MemorySinkState>>,
    base_url: String,
    retain_bytes: bool,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemorySinkState::default())),
            base_url: "https://sink.test/bucket".to_string(),
            retain_bytes: false,
        }
    }

    /// Keep uploaded bytes so tests can compare object contents.
    pub fn retaining_bytes() -> Self {
        Self {
            retain_bytes: true,
            ..Self::new()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemorySinkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail the next call to `op` with `error`.
    pub fn fail_next(&self, op: SinkOp, error: SinkError) {
        self.lock().faults.insert(
            op,
            Fault {
                error,
                remaining: Some(1),
            },
        );
    }

    /// Fail every call to `op` with `error` until [`MemorySink::clear_faults`].
    pub fn fail_always(&self, op: SinkOp, error: SinkError) {
        self.lock().faults.insert(
            op,
            Fault {
                error,
                remaining: None,
            },
        );
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    fn check_fault(&self, op: SinkOp) -> SinkResult<()> {
        let mut state = self.lock();
        let Some(fault) = state.faults.get_mut(&op) else {
            return Ok(());
        };
        let error = fault.error.clone();
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                state.faults.remove(&op);
            }
        }
        Err(error)
    }

    fn sessions_with(&self, status: SessionStatus) -> Vec<MultipartSession> {
        self.lock()
            .sessions
            .iter()
            .filter(|s| s.status == status)
            .map(|s| s.session.clone())
            .collect()
    }

    /// Every session ever opened, in order.
    pub fn begun_sessions(&self) -> Vec<MultipartSession> {
        self.lock()
            .sessions
            .iter()
            .map(|s| s.session.clone())
            .collect()
    }

    pub fn open_sessions(&self) -> Vec<MultipartSession> {
        self.sessions_with(SessionStatus::Open)
    }

    pub fn aborted_sessions(&self) -> Vec<MultipartSession> {
        self.sessions_with(SessionStatus::Aborted)
    }

    pub fn completed_sessions(&self) -> Vec<MultipartSession> {
        self.sessions_with(SessionStatus::Completed)
    }

    pub fn complete_calls(&self) -> usize {
        self.lock().complete_calls
    }

    pub fn abort_calls(&self) -> usize {
        self.lock().abort_calls
    }

    /// Part numbers uploaded to a session, ascending.
    pub fn part_numbers(&self, upload_id: &str) -> Vec<u32> {
        self.lock()
            .sessions
            .iter()
            .find(|s| s.session.upload_id == upload_id)
            .map(|s| s.parts.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Part sizes of a session, in part-number order.
    pub fn part_sizes(&self, upload_id: &str) -> Vec<u64> {
        self.lock()
            .sessions
            .iter()
            .find(|s| s.session.upload_id == upload_id)
            .map(|s| s.parts.values().map(|p| p.length).collect())
            .unwrap_or_default()
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.lock().objects.get(key).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }
}

#[async_trait]
impl ObjectSink for MemorySink {
    async fn begin_multipart(
        &self,
        key: &str,
        _content_type: Option<&str>,
    ) -> SinkResult<MultipartSession> {
        validate_key(key)?;
        self.check_fault(SinkOp::BeginMultipart)?;

        let session = MultipartSession {
            key: key.to_string(),
            upload_id: Uuid::new_v4().simple().to_string(),
        };
        self.lock().sessions.push(SessionRecord {
            session: session.clone(),
            status: SessionStatus::Open,
            parts: BTreeMap::new(),
        });
        Ok(session)
    }

    async fn upload_part(
        &self,
        session: &MultipartSession,
        part_number: u32,
        data: Bytes,
    ) -> SinkResult<String> {
        self.check_fault(SinkOp::UploadPart)?;
        if part_number == 0 || part_number > 10_000 {
            return Err(SinkError::permanent(
                "upload_part",
                format!("InvalidArgument: part number {}", part_number),
            ));
        }

        let retain = self.retain_bytes;
        let mut state = self.lock();
        let record = state
            .sessions
            .iter_mut()
            .find(|s| s.session.upload_id == session.upload_id)
            .ok_or_else(|| SinkError::permanent("upload_part", "NoSuchUpload"))?;
        if record.status != SessionStatus::Open {
            return Err(SinkError::permanent("upload_part", "NoSuchUpload"));
        }

        let e_tag = format!("\"{}-{:08x}\"", part_number, data.len());
        record.parts.insert(
            part_number,
            StoredPart {
                e_tag: e_tag.clone(),
                length: data.len() as u64,
                data: retain.then_some(data),
            },
        );
        Ok(e_tag)
    }

    async fn complete_multipart(
        &self,
        session: &MultipartSession,
        parts: &[PartRecord],
    ) -> SinkResult<String> {
        self.lock().complete_calls += 1;
        self.check_fault(SinkOp::CompleteMultipart)?;

        let retain = self.retain_bytes;
        let mut state = self.lock();
        let record = state
            .sessions
            .iter_mut()
            .find(|s| s.session.upload_id == session.upload_id)
            .ok_or_else(|| SinkError::permanent("complete_multipart", "NoSuchUpload"))?;
        if record.status != SessionStatus::Open {
            return Err(SinkError::permanent("complete_multipart", "NoSuchUpload"));
        }
        if parts.is_empty() {
            return Err(SinkError::permanent("complete_multipart", "MalformedXML"));
        }

        let mut size = 0;
        let mut data = retain.then(BytesMut::new);
        for part in parts {
            let stored = record.parts.get(&part.part_number).ok_or_else(|| {
                SinkError::permanent(
                    "complete_multipart",
                    format!("InvalidPart: part {} was never uploaded", part.part_number),
                )
            })?;
            if stored.e_tag != part.e_tag {
                return Err(SinkError::permanent(
                    "complete_multipart",
                    format!("InvalidPart: ETag mismatch for part {}", part.part_number),
                ));
            }
            size += stored.length;
            if let (Some(buf), Some(bytes)) = (data.as_mut(), stored.data.as_ref()) {
                buf.extend_from_slice(bytes);
            }
        }

        record.status = SessionStatus::Completed;
        let key = record.session.key.clone();
        state.objects.insert(
            key.clone(),
            StoredObject {
                size,
                content_type: None,
                data: data.map(BytesMut::freeze),
                parts: Some(parts.len()),
            },
        );

        Ok(self.object_url(&key))
    }

    async fn abort_multipart(&self, session: &MultipartSession) -> SinkResult<()> {
        self.lock().abort_calls += 1;
        self.check_fault(SinkOp::AbortMultipart)?;

        let mut state = self.lock();
        if let Some(record) = state
            .sessions
            .iter_mut()
            .find(|s| s.session.upload_id == session.upload_id)
        {
            if record.status == SessionStatus::Open {
                record.status = SessionStatus::Aborted;
                record.parts.clear();
            }
        }
        Ok(())
    }

    async fn put_stream(
        &self,
        key: &str,
        content_length: u64,
        content_type: Option<&str>,
        mut body: ByteStream,
    ) -> SinkResult<String> {
        validate_key(key)?;
        self.check_fault(SinkOp::PutStream)?;

        let mut received = 0_u64;
        let mut data = self.retain_bytes.then(BytesMut::new);
        while let Some(frame) = body.next().await {
            let frame = frame.map_err(|e| SinkError::transient("put", e.to_string()))?;
            received += frame.len() as u64;
            if received > content_length {
                return Err(SinkError::permanent(
                    "put",
                    "IncompleteBody: body exceeds Content-Length",
                ));
            }
            if let Some(buf) = data.as_mut() {
                buf.extend_from_slice(&frame);
            }
        }
        if received != content_length {
            return Err(SinkError::permanent(
                "put",
                format!(
                    "IncompleteBody: received {} of {} bytes",
                    received, content_length
                ),
            ));
        }

        self.lock().objects.insert(
            key.to_string(),
            StoredObject {
                size: received,
                content_type: content_type.map(String::from),
                data: data.map(BytesMut::freeze),
                parts: None,
            },
        );
        Ok(self.object_url(key))
    }

    async fn presign_put(
        &self,
        key: &str,
        _content_type: &str,
        expires_in: Duration,
    ) -> SinkResult<String> {
        validate_key(key)?;
        self.check_fault(SinkOp::Presign)?;
        Ok(format!(
            "{}/{}?X-Amz-Expires={}&X-Amz-Signature=test",
            self.base_url,
            key,
            expires_in.as_secs()
        ))
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn multipart_round_trip_assembles_object() {
        let sink = MemorySink::retaining_bytes();
        let session = sink.begin_multipart("videos/a.mp4", None).await.unwrap();
        let e1 = sink
            .upload_part(&session, 1, Bytes::from_static(b"hello "))
            .await
            .unwrap();
        let e2 = sink
            .upload_part(&session, 2, Bytes::from_static(b"world"))
            .await
            .unwrap();

        let parts = vec![
            PartRecord {
                part_number: 1,
                offset: 0,
                length: 6,
                e_tag: e1,
            },
            PartRecord {
                part_number: 2,
                offset: 6,
                length: 5,
                e_tag: e2,
            },
        ];
        let url = sink.complete_multipart(&session, &parts).await.unwrap();
        assert_eq!(url, "https://sink.test/bucket/videos/a.mp4");

        let object = sink.object("videos/a.mp4").unwrap();
        assert_eq!(object.size, 11);
        assert_eq!(object.data.unwrap(), Bytes::from_static(b"hello world"));
        assert_eq!(sink.completed_sessions(), vec![session]);
    }

    #[tokio::test]
    async fn injected_fault_fires_once() {
        let sink = MemorySink::new();
        sink.fail_next(
            SinkOp::BeginMultipart,
            SinkError::transient("create_multipart", "SlowDown"),
        );
        assert!(sink.begin_multipart("videos/a.mp4", None).await.is_err());
        assert!(sink.begin_multipart("videos/a.mp4", None).await.is_ok());
    }

    #[tokio::test]
    async fn aborted_session_rejects_parts() {
        let sink = MemorySink::new();
        let session = sink.begin_multipart("videos/a.mp4", None).await.unwrap();
        sink.abort_multipart(&session).await.unwrap();
        assert_eq!(sink.aborted_sessions().len(), 1);
        assert!(sink
            .upload_part(&session, 1, Bytes::from_static(b"x"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn put_stream_requires_exact_length() {
        let sink = MemorySink::new();
        let body: ByteStream = Box::pin(stream::iter(vec![Ok(Bytes::from_static(b"abc"))]));
        let err = sink
            .put_stream("videos/a.mp4", 4, None, body)
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(sink.object("videos/a.mp4").is_none());

        let body: ByteStream = Box::pin(stream::iter(vec![Ok(Bytes::from_static(b"abcd"))]));
        sink.put_stream("videos/a.mp4", 4, Some("video/mp4"), body)
            .await
            .unwrap();
        assert_eq!(sink.object("videos/a.mp4").unwrap().size, 4);
    }
}
