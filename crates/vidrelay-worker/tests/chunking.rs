use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use std::sync::Arc;
use std::time::Duration;

use vidrelay_core::{ByteStream, TransferError};
use vidrelay_storage::{validate_part_sequence, ChunkWriter, MemorySink, MultipartCoordinator};
use vidrelay_worker::{NoProgress, StreamBridge};

/// Keeps only the byte range of each chunk it receives.
#[derive(Default)]
struct RangeWriter {
    ranges: Vec<(u64, u64)>,
}

#[async_trait]
impl ChunkWriter for RangeWriter {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), TransferError> {
        let start = self.ranges.last().map(|r| r.1).unwrap_or(0);
        self.ranges.push((start, start + chunk.len() as u64));
        Ok(())
    }

    async fn finish(&mut self) -> Result<String, TransferError> {
        Ok("memory://ranges".to_string())
    }

    async fn abort(&mut self) {}
}

/// Deterministic frame sizes in `1..=max`.
fn ragged_stream(total: u64, max: u64, seed: u64) -> ByteStream {
    let mut state = seed;
    let mut remaining = total;
    let mut frames = Vec::new();
    while remaining > 0 {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let len = ((state >> 33) % max + 1).min(remaining);
        frames.push(Ok(Bytes::from(vec![0x5a; len as usize])));
        remaining -= len;
    }
    Box::pin(stream::iter(frames))
}

#[tokio::test]
async fn chunks_partition_the_object() {
    let cases: &[(u64, usize)] = &[
        (1, 1),
        (7, 1),
        (10, 3),
        (64, 8),
        (65, 8),
        (1000, 999),
        (1000, 1000),
        (4097, 512),
    ];

    for (seed, &(size, chunk)) in cases.iter().enumerate() {
        for max_frame in [1, 3, chunk as u64, chunk as u64 * 3 + 1] {
            let source = ragged_stream(size, max_frame, seed as u64 + max_frame);
            let mut writer = RangeWriter::default();
            let outcome = StreamBridge::new(chunk, Duration::from_secs(5))
                .relay(source, Some(size), &mut writer, &NoProgress)
                .await
                .unwrap();

            let expected_chunks = size.div_ceil(chunk as u64);
            assert_eq!(outcome.chunks, expected_chunks, "size {size} chunk {chunk}");
            assert_eq!(writer.ranges.len() as u64, expected_chunks);
            assert_eq!(writer.ranges.first().map(|r| r.0), Some(0));
            assert_eq!(writer.ranges.last().map(|r| r.1), Some(size));
            for pair in writer.ranges.windows(2) {
                assert_eq!(pair[0].1, pair[1].0, "gap or overlap at {:?}", pair);
            }
            let (last, full) = writer.ranges.split_last().unwrap();
            assert!(full.iter().all(|(s, e)| e - s == chunk as u64));
            assert!(last.1 - last.0 <= chunk as u64);
        }
    }
}

#[tokio::test]
async fn completed_session_parts_are_numbered_from_one() {
    let sink = Arc::new(MemorySink::new());
    let mut coordinator = MultipartCoordinator::begin(sink.clone(), "videos/p.mp4", None, 4)
        .await
        .unwrap();
    for _ in 0..5 {
        coordinator
            .upload_next(Bytes::from_static(b"1234"))
            .await
            .unwrap();
    }
    coordinator.complete().await.unwrap();

    let session = &sink.completed_sessions()[0];
    assert_eq!(sink.part_numbers(&session.upload_id), vec![1, 2, 3, 4, 5]);
    assert!(validate_part_sequence(coordinator.parts(), 4).is_ok());
}

#[tokio::test]
async fn gap_in_part_numbers_fails_completion() {
    let sink = Arc::new(MemorySink::new());
    let mut coordinator = MultipartCoordinator::begin(sink.clone(), "videos/g.mp4", None, 4)
        .await
        .unwrap();
    for _ in 0..3 {
        coordinator
            .upload_next(Bytes::from_static(b"1234"))
            .await
            .unwrap();
    }

    let mut parts = coordinator.parts().to_vec();
    parts.remove(1);
    let err = coordinator.complete_session(&parts).await.unwrap_err();

    assert!(matches!(err, TransferError::IncompleteParts { .. }));
    assert_eq!(sink.complete_calls(), 0);

    // The session is still open and must be released.
    coordinator.abort().await.unwrap();
    assert_eq!(sink.aborted_sessions().len(), 1);
}
