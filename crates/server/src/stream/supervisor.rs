// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess stream supervision: spawn an encoder process, verify its
//! first usable chunk, and expose stdout as a bounded drop-oldest stream
//! that terminates the child when the client goes away.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::capture::StreamDiag;
use crate::stream::jpeg::{extract_first_jpeg, jpeg_has_visible_content};

/// How the first chunk is validated before the stream is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstChunkGate {
    /// Buffer until a complete JPEG frame with visible content appears.
    JpegFrame,
    /// Any non-empty chunk is acceptable (MPEG-TS).
    AnyBytes,
}

/// Supervision knobs for one spawn attempt.
#[derive(Debug, Clone)]
pub struct SuperviseOptions {
    pub settle: Duration,
    pub first_chunk_timeout: Duration,
    pub gate: FirstChunkGate,
    pub stderr_lines: usize,
    pub read_chunk: usize,
    pub queue_size: usize,
    /// Tag used in diagnostics when the process exits early.
    pub exit_tag: &'static str,
}

struct QueueInner {
    buf: VecDeque<Bytes>,
    closed: bool,
}

/// Bounded chunk queue with drop-oldest semantics: a full queue discards
/// the oldest buffered chunk so the consumer always sees fresh data.
pub struct ChunkQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
}

impl ChunkQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner { buf: VecDeque::new(), closed: false }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Push a chunk, discarding the oldest buffered chunk when full.
    pub fn push(&self, chunk: Bytes) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            if inner.buf.len() >= self.capacity {
                inner.buf.pop_front();
            }
            inner.buf.push_back(chunk);
        }
        self.notify.notify_one();
    }

    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_one();
    }

    /// Pop the next chunk; `None` means the producer closed and the queue
    /// drained.
    pub async fn pop(&self) -> Option<Bytes> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(chunk) = inner.buf.pop_front() {
                    return Some(chunk);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }
}

/// Owns the child process; dropping it terminates the child (SIGTERM,
/// then SIGKILL after a short grace).
pub struct ChildGuard {
    child: Option<Child>,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self { child: Some(child) }
    }

    fn try_wait(&mut self) -> Option<std::process::ExitStatus> {
        self.child.as_mut().and_then(|c| c.try_wait().ok().flatten())
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else { return };
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid as i32),
                nix::sys::signal::Signal::SIGTERM,
            );
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                });
            }
            Err(_) => {
                let _ = child.start_kill();
            }
        }
    }
}

/// A verified, running subprocess stream.
pub struct SupervisedStream {
    pub first_chunk: Bytes,
    queue: Arc<ChunkQueue>,
    guard: ChildGuard,
}

impl SupervisedStream {
    /// Turn the stream into an HTTP response body. Dropping the body
    /// (client disconnect) drops the guard and terminates the child.
    pub fn into_body(self) -> axum::body::Body {
        let state = (Some(self.first_chunk), self.queue, self.guard);
        let stream = futures_util::stream::unfold(state, |(first, queue, guard)| async move {
            if let Some(chunk) = first {
                return Some((Ok::<Bytes, std::io::Error>(chunk), (None, queue, guard)));
            }
            match queue.pop().await {
                Some(chunk) => Some((Ok(chunk), (None, queue, guard))),
                None => None,
            }
        });
        axum::body::Body::from_stream(stream)
    }
}

/// Spawn `cmd`, verify liveness and the first usable chunk, and hand back
/// the wrapped stream. `None` means the caller should try the next
/// candidate command.
pub async fn supervise(
    cmd: &[String],
    opts: &SuperviseOptions,
    diag: &Arc<StreamDiag>,
) -> Option<SupervisedStream> {
    let (program, args) = cmd.split_first()?;
    diag.record(Some(cmd), None);
    debug!(cmd = %cmd.join(" "), "stream process start");

    let spawned = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            diag.record(Some(cmd), Some(&format!("spawn_failed: {e}")));
            warn!(err = %e, "stream process spawn failed");
            return None;
        }
    };

    // Bounded stderr tail for diagnostics.
    if let Some(stderr) = child.stderr.take() {
        let diag = Arc::clone(diag);
        let cmd_copy = cmd.to_vec();
        let max_lines = opts.stderr_lines.max(1);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut last: Option<String> = None;
            for _ in 0..max_lines {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_owned();
                        if !line.is_empty() {
                            last = Some(line);
                        }
                    }
                    _ => break,
                }
            }
            if let Some(last) = last {
                diag.record(Some(&cmd_copy), Some(&last));
            }
        });
    }

    // Stdout pump into the bounded queue.
    let queue = Arc::new(ChunkQueue::new(opts.queue_size));
    if let Some(mut stdout) = child.stdout.take() {
        let queue = Arc::clone(&queue);
        let read_chunk = opts.read_chunk.max(4096);
        tokio::spawn(async move {
            let mut buf = vec![0u8; read_chunk];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => queue.push(Bytes::copy_from_slice(&buf[..n])),
                }
            }
            queue.close();
        });
    } else {
        diag.record(Some(cmd), Some("no_stdout"));
        return None;
    }

    let mut guard = ChildGuard::new(child);

    // Settle, then confirm the process survived its argument parsing.
    tokio::time::sleep(opts.settle.max(Duration::from_millis(50))).await;
    if let Some(status) = guard.try_wait() {
        let detail = diag
            .last_error()
            .unwrap_or_else(|| format!("{}:{}", opts.exit_tag, status.code().unwrap_or(-1)));
        diag.record(Some(cmd), Some(&detail));
        warn!(tag = opts.exit_tag, code = status.code(), "stream process exited early");
        return None;
    }

    // First-chunk gate.
    let deadline = tokio::time::Instant::now() + opts.first_chunk_timeout.max(Duration::from_millis(300));
    let mut first_buf: Vec<u8> = Vec::new();
    let first_chunk: Option<Bytes> = loop {
        if tokio::time::Instant::now() >= deadline {
            break None;
        }
        if let Some(status) = guard.try_wait() {
            let detail = diag
                .last_error()
                .unwrap_or_else(|| format!("{}:{}", opts.exit_tag, status.code().unwrap_or(-1)));
            diag.record(Some(cmd), Some(&detail));
            warn!(tag = opts.exit_tag, "stream process exited before first chunk");
            return None;
        }
        let item = match tokio::time::timeout(Duration::from_millis(100), queue.pop()).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                let detail =
                    diag.last_error().unwrap_or_else(|| format!("{}:eof_before_output", opts.exit_tag));
                diag.record(Some(cmd), Some(&detail));
                warn!(tag = opts.exit_tag, "stream process eof before output");
                return None;
            }
            Err(_) => continue,
        };
        match opts.gate {
            FirstChunkGate::AnyBytes => {
                if !item.is_empty() {
                    break Some(item);
                }
            }
            FirstChunkGate::JpegFrame => {
                first_buf.extend_from_slice(&item);
                // Bound the buffer while hunting for the first SOI..EOI.
                if first_buf.len() > 512 * 1024 {
                    let keep = first_buf.len() - 128 * 1024;
                    first_buf.drain(..keep);
                }
                let Some(frame) = extract_first_jpeg(&first_buf) else { continue };
                if !jpeg_has_visible_content(&frame) {
                    continue;
                }
                break Some(Bytes::from(std::mem::take(&mut first_buf)));
            }
        }
    };

    let Some(first_chunk) = first_chunk else {
        diag.record(Some(cmd), Some(&format!("{}:no_output_timeout", opts.exit_tag)));
        warn!(
            tag = opts.exit_tag,
            timeout_s = opts.first_chunk_timeout.as_secs_f64(),
            "stream process produced no output before timeout"
        );
        return None;
    };

    info!(first_chunk = first_chunk.len(), "stream process ready");
    Some(SupervisedStream { first_chunk, queue, guard })
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
