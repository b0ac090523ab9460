// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;

use super::{supervise, ChunkQueue, FirstChunkGate, SuperviseOptions};
use crate::capture::StreamDiag;

fn opts(gate: FirstChunkGate) -> SuperviseOptions {
    SuperviseOptions {
        settle: Duration::from_millis(100),
        first_chunk_timeout: Duration::from_millis(1500),
        gate,
        stderr_lines: 20,
        read_chunk: 4096,
        queue_size: 1,
        exit_tag: "test_exited",
    }
}

#[tokio::test]
async fn queue_drops_oldest_when_full() {
    let queue = ChunkQueue::new(1);
    queue.push(Bytes::from_static(b"one"));
    queue.push(Bytes::from_static(b"two"));
    queue.push(Bytes::from_static(b"three"));
    assert_eq!(queue.pop().await, Some(Bytes::from_static(b"three")));
    queue.close();
    assert_eq!(queue.pop().await, None);
}

#[tokio::test]
async fn queue_drains_before_reporting_closed() {
    let queue = ChunkQueue::new(4);
    queue.push(Bytes::from_static(b"a"));
    queue.push(Bytes::from_static(b"b"));
    queue.close();
    assert_eq!(queue.pop().await, Some(Bytes::from_static(b"a")));
    assert_eq!(queue.pop().await, Some(Bytes::from_static(b"b")));
    assert_eq!(queue.pop().await, None);
}

#[tokio::test]
async fn queue_wakes_blocked_consumer() {
    let queue = Arc::new(ChunkQueue::new(1));
    let waiter = Arc::clone(&queue);
    let handle = tokio::spawn(async move { waiter.pop().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    queue.push(Bytes::from_static(b"late"));
    let got = handle.await.unwrap_or(None);
    assert_eq!(got, Some(Bytes::from_static(b"late")));
}

#[cfg(unix)]
mod process {
    use super::*;

    #[tokio::test]
    async fn accepts_any_bytes_from_live_process() {
        let diag = Arc::new(StreamDiag::new());
        let cmd: Vec<String> =
            ["sh", "-c", "printf streaming-bytes; sleep 2"].iter().map(|s| (*s).to_owned()).collect();
        let stream = supervise(&cmd, &opts(FirstChunkGate::AnyBytes), &diag).await;
        let stream = stream.expect("stream should start");
        assert_eq!(&stream.first_chunk[..], b"streaming-bytes");
    }

    #[tokio::test]
    async fn early_exit_reports_next_candidate() {
        let diag = Arc::new(StreamDiag::new());
        let cmd: Vec<String> = ["false"].iter().map(|s| (*s).to_owned()).collect();
        let stream = supervise(&cmd, &opts(FirstChunkGate::AnyBytes), &diag).await;
        assert!(stream.is_none());
        assert!(diag.last_error().is_some());
    }

    #[tokio::test]
    async fn spawn_failure_is_not_fatal() {
        let diag = Arc::new(StreamDiag::new());
        let cmd: Vec<String> =
            ["/nonexistent/encoder-binary"].iter().map(|s| (*s).to_owned()).collect();
        let stream = supervise(&cmd, &opts(FirstChunkGate::AnyBytes), &diag).await;
        assert!(stream.is_none());
        assert!(diag.last_error().is_some_and(|e| e.starts_with("spawn_failed")));
    }

    #[tokio::test]
    async fn silent_process_times_out() {
        let diag = Arc::new(StreamDiag::new());
        let cmd: Vec<String> = ["sleep", "10"].iter().map(|s| (*s).to_owned()).collect();
        let mut options = opts(FirstChunkGate::AnyBytes);
        options.first_chunk_timeout = Duration::from_millis(400);
        let stream = supervise(&cmd, &options, &diag).await;
        assert!(stream.is_none());
        assert!(diag.last_error().is_some_and(|e| e.contains("no_output_timeout")));
    }

    #[tokio::test]
    async fn jpeg_gate_requires_visible_frame() -> anyhow::Result<()> {
        // A visible gray JPEG passes the gate; the multipart prefix is
        // preserved in the first chunk.
        let img = image::RgbImage::from_pixel(32, 32, image::Rgb([128, 128, 128]));
        let jpeg = crate::stream::jpeg::encode_jpeg(&img, 80).expect("encode");
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("frame.jpg");
        std::fs::write(&path, &jpeg)?;

        let diag = Arc::new(StreamDiag::new());
        let cmd: Vec<String> = [
            "sh",
            "-c",
            &format!("printf 'PREFIX'; cat {}; sleep 2", path.to_string_lossy()),
        ]
        .iter()
        .map(|s| (*s).to_owned())
        .collect();
        let stream = supervise(&cmd, &opts(FirstChunkGate::JpegFrame), &diag).await;
        let stream = stream.expect("stream should start");
        assert!(stream.first_chunk.starts_with(b"PREFIX"));
        let frame = crate::stream::jpeg::extract_first_jpeg(&stream.first_chunk).expect("frame");
        assert!(crate::stream::jpeg::jpeg_has_visible_content(&frame));
        Ok(())
    }

    #[tokio::test]
    async fn jpeg_gate_rejects_black_frames() -> anyhow::Result<()> {
        let img = image::RgbImage::from_pixel(32, 32, image::Rgb([0, 0, 0]));
        let jpeg = crate::stream::jpeg::encode_jpeg(&img, 80).expect("encode");
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("black.jpg");
        std::fs::write(&path, &jpeg)?;

        let diag = Arc::new(StreamDiag::new());
        let cmd: Vec<String> =
            ["sh", "-c", &format!("cat {}; sleep 2", path.to_string_lossy())]
                .iter()
                .map(|s| (*s).to_owned())
                .collect();
        let mut options = opts(FirstChunkGate::JpegFrame);
        options.first_chunk_timeout = Duration::from_millis(600);
        let stream = supervise(&cmd, &options, &diag).await;
        assert!(stream.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn body_streams_first_chunk_then_queue() {
        let diag = Arc::new(StreamDiag::new());
        let cmd: Vec<String> =
            ["sh", "-c", "printf first; sleep 0.4; printf second; sleep 2"]
                .iter()
                .map(|s| (*s).to_owned())
                .collect();
        let stream = supervise(&cmd, &opts(FirstChunkGate::AnyBytes), &diag).await;
        let stream = stream.expect("stream should start");
        let body = stream.into_body();
        let mut data = body.into_data_stream();
        let first = data.next().await.and_then(|r| r.ok());
        assert_eq!(first, Some(Bytes::from_static(b"first")));
        let second = tokio::time::timeout(Duration::from_secs(2), data.next())
            .await
            .ok()
            .flatten()
            .and_then(|r| r.ok());
        assert_eq!(second, Some(Bytes::from_static(b"second")));
    }
}
