//! Multipart upload coordinator
//!
//! Turns the bridge's sequential chunk stream into sink parts. Part numbers are
//! assigned in ascending order starting at 1 as chunks arrive; parts are never
//! uploaded concurrently.

use bytes::Bytes;
use std::sync::Arc;

use vidrelay_core::models::{MultipartSession, PartRecord};
use vidrelay_core::TransferError;

use crate::traits::ObjectSink;

/// Checks that `parts` can be assembled into one object: numbered `1..=N`
/// without gaps, covering contiguous byte ranges, and with every part but the
/// last at least `min_part_size` bytes.
pub fn validate_part_sequence(
    parts: &[PartRecord],
    min_part_size: u64,
) -> Result<(), TransferError> {
    let fail = |detail: String| {
        let numbers: Vec<u32> = parts.iter().map(|p| p.part_number).collect();
        tracing::error!(
            parts = ?numbers,
            detail = %detail,
            "Multipart part sequence is invalid"
        );
        Err(TransferError::IncompleteParts { detail })
    };

    if parts.is_empty() {
        return fail("session has no parts".to_string());
    }

    let mut expected_offset = 0;
    for (idx, part) in parts.iter().enumerate() {
        let expected_number = idx as u32 + 1;
        if part.part_number != expected_number {
            return fail(format!(
                "expected part {} but found part {}",
                expected_number, part.part_number
            ));
        }
        if part.offset != expected_offset {
            return fail(format!(
                "part {} starts at byte {} but previous part ended at {}",
                part.part_number, part.offset, expected_offset
            ));
        }
        let is_last = idx + 1 == parts.len();
        if !is_last && part.length < min_part_size {
            return fail(format!(
                "part {} is {} bytes, below the {} byte minimum",
                part.part_number, part.length, min_part_size
            ));
        }
        expected_offset = part.end();
    }

    Ok(())
}

/// One multipart session for one transfer attempt.
pub struct MultipartCoordinator {
    sink: Arc<dyn ObjectSink>,
    session: MultipartSession,
    parts: Vec<PartRecord>,
    min_part_size: u64,
}

impl MultipartCoordinator {
    /// Open a session for `key` on the sink.
    pub async fn begin(
        sink: Arc<dyn ObjectSink>,
        key: &str,
        content_type: Option<&str>,
        min_part_size: u64,
    ) -> Result<Self, TransferError> {
        let session = sink.begin_multipart(key, content_type).await?;
        tracing::debug!(
            key = %key,
            upload_id = %session.upload_id,
            "Multipart session opened"
        );
        Ok(Self {
            sink,
            session,
            parts: Vec::new(),
            min_part_size,
        })
    }

    pub fn session(&self) -> &MultipartSession {
        &self.session
    }

    pub fn parts(&self) -> &[PartRecord] {
        &self.parts
    }

    /// Bytes covered by the parts uploaded so far.
    pub fn bytes_uploaded(&self) -> u64 {
        self.parts.last().map(PartRecord::end).unwrap_or(0)
    }

    /// Upload `data` as part `part_number`.
    ///
    /// The record is kept only when `part_number` is the next number in
    /// sequence; anything else is rejected before reaching the sink.
    pub async fn upload_part(
        &mut self,
        part_number: u32,
        data: Bytes,
    ) -> Result<PartRecord, TransferError> {
        let expected = self.parts.len() as u32 + 1;
        if part_number != expected {
            tracing::error!(
                key = %self.session.key,
                expected = expected,
                part_number = part_number,
                "Part uploaded out of sequence"
            );
            return Err(TransferError::IncompleteParts {
                detail: format!("expected part {} but got {}", expected, part_number),
            });
        }
        // An undersized part can only be the last one.
        if self
            .parts
            .last()
            .is_some_and(|previous| previous.length < self.min_part_size)
        {
            validate_part_sequence(&self.parts_with_next(&data), self.min_part_size)?;
        }

        let length = data.len() as u64;
        let offset = self.bytes_uploaded();
        let e_tag = self
            .sink
            .upload_part(&self.session, part_number, data)
            .await?;

        let record = PartRecord {
            part_number,
            offset,
            length,
            e_tag,
        };
        tracing::trace!(
            key = %self.session.key,
            part_number = part_number,
            offset = offset,
            size_bytes = length,
            "Part recorded"
        );
        self.parts.push(record.clone());
        Ok(record)
    }

    fn parts_with_next(&self, data: &Bytes) -> Vec<PartRecord> {
        let mut parts = self.parts.clone();
        parts.push(PartRecord {
            part_number: parts.len() as u32 + 1,
            offset: self.bytes_uploaded(),
            length: data.len() as u64,
            e_tag: String::new(),
        });
        parts
    }

    /// Upload `data` under the next part number.
    pub async fn upload_next(&mut self, data: Bytes) -> Result<PartRecord, TransferError> {
        let next = self.parts.len() as u32 + 1;
        self.upload_part(next, data).await
    }

    /// Complete the session with the parts recorded by this coordinator.
    pub async fn complete(&self) -> Result<String, TransferError> {
        self.complete_session(&self.parts).await
    }

    /// Complete the session with an explicit part list.
    ///
    /// Fails with `IncompleteParts` without contacting the sink when the list
    /// is not a valid sequence.
    pub async fn complete_session(&self, parts: &[PartRecord]) -> Result<String, TransferError> {
        validate_part_sequence(parts, self.min_part_size)?;
        let location = self.sink.complete_multipart(&self.session, parts).await?;
        tracing::info!(
            key = %self.session.key,
            parts = parts.len(),
            size_bytes = parts.last().map(PartRecord::end).unwrap_or(0),
            "Multipart session completed"
        );
        Ok(location)
    }

    /// Abort the session, releasing every uploaded part on the sink.
    pub async fn abort(&self) -> Result<(), TransferError> {
        self.sink.abort_multipart(&self.session).await?;
        tracing::info!(
            key = %self.session.key,
            upload_id = %self.session.upload_id,
            parts = self.parts.len(),
            "Multipart session aborted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemorySink, SinkOp};
    use crate::traits::SinkError;
    use vidrelay_core::ErrorClass;

    const MIN: u64 = 5;

    fn part(number: u32, offset: u64, length: u64) -> PartRecord {
        PartRecord {
            part_number: number,
            offset,
            length,
            e_tag: format!("etag-{}", number),
        }
    }

    #[test]
    fn valid_sequences_pass() {
        assert!(validate_part_sequence(&[part(1, 0, 3)], MIN).is_ok());
        assert!(validate_part_sequence(&[part(1, 0, 5), part(2, 5, 5), part(3, 10, 1)], MIN).is_ok());
    }

    #[test]
    fn gaps_and_bad_ranges_are_incomplete() {
        let gap = [part(1, 0, 5), part(3, 5, 5)];
        assert!(matches!(
            validate_part_sequence(&gap, MIN),
            Err(TransferError::IncompleteParts { .. })
        ));

        let not_from_one = [part(2, 0, 5)];
        assert!(validate_part_sequence(&not_from_one, MIN).is_err());

        let overlap = [part(1, 0, 5), part(2, 4, 5)];
        assert!(validate_part_sequence(&overlap, MIN).is_err());

        let undersized = [part(1, 0, 4), part(2, 4, 5)];
        assert!(validate_part_sequence(&undersized, MIN).is_err());

        assert!(validate_part_sequence(&[], MIN).is_err());
    }

    #[tokio::test]
    async fn numbers_parts_contiguously_and_completes_once() {
        let sink = Arc::new(MemorySink::retaining_bytes());
        let mut coordinator = MultipartCoordinator::begin(sink.clone(), "videos/a.mp4", None, MIN)
            .await
            .unwrap();

        for chunk in [&b"aaaaa"[..], b"bbbbb", b"cc"] {
            coordinator
                .upload_next(Bytes::copy_from_slice(chunk))
                .await
                .unwrap();
        }
        let numbers: Vec<u32> = coordinator.parts().iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(coordinator.bytes_uploaded(), 12);

        coordinator.complete().await.unwrap();
        assert_eq!(sink.complete_calls(), 1);
        assert_eq!(
            sink.object("videos/a.mp4").unwrap().data.unwrap(),
            Bytes::from_static(b"aaaaabbbbbcc")
        );
    }

    #[tokio::test]
    async fn injected_gap_fails_before_reaching_sink() {
        let sink = Arc::new(MemorySink::new());
        let mut coordinator = MultipartCoordinator::begin(sink.clone(), "videos/a.mp4", None, MIN)
            .await
            .unwrap();
        for _ in 0..3 {
            coordinator
                .upload_next(Bytes::from_static(b"12345"))
                .await
                .unwrap();
        }

        let mut parts = coordinator.parts().to_vec();
        parts.remove(1);
        let err = coordinator.complete_session(&parts).await.unwrap_err();
        assert!(matches!(err, TransferError::IncompleteParts { .. }));
        assert_eq!(err.class(), ErrorClass::Terminal);
        assert_eq!(sink.complete_calls(), 0);

        coordinator.abort().await.unwrap();
        assert_eq!(sink.aborted_sessions().len(), 1);
    }

    #[tokio::test]
    async fn out_of_order_part_number_is_rejected() {
        let sink = Arc::new(MemorySink::new());
        let mut coordinator = MultipartCoordinator::begin(sink.clone(), "videos/a.mp4", None, MIN)
            .await
            .unwrap();
        let err = coordinator
            .upload_part(2, Bytes::from_static(b"12345"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::IncompleteParts { .. }));
        assert!(coordinator.parts().is_empty());
    }

    #[tokio::test]
    async fn undersized_part_must_be_last() {
        let sink = Arc::new(MemorySink::new());
        let mut coordinator = MultipartCoordinator::begin(sink.clone(), "videos/a.mp4", None, MIN)
            .await
            .unwrap();
        coordinator
            .upload_next(Bytes::from_static(b"12"))
            .await
            .unwrap();
        let err = coordinator
            .upload_next(Bytes::from_static(b"12345"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::IncompleteParts { .. }));
        assert_eq!(sink.part_numbers(&coordinator.session().upload_id), vec![1]);
    }

    #[tokio::test]
    async fn sink_rejection_surfaces_as_sink_rejected() {
        let sink = Arc::new(MemorySink::new());
        sink.fail_next(
            SinkOp::UploadPart,
            SinkError::permanent("upload_part", "AccessDenied"),
        );
        let mut coordinator = MultipartCoordinator::begin(sink.clone(), "videos/a.mp4", None, MIN)
            .await
            .unwrap();
        let err = coordinator
            .upload_next(Bytes::from_static(b"12345"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::SinkRejected {
                retryable: false,
                ..
            }
        ));
        assert!(coordinator.parts().is_empty());
    }
}
