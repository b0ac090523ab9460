// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket hub: owns the per-token outbound channels and close signals for
//! live input sockets. The session store never holds socket handles;
//! revocation paths enqueue a close here and then mutate the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::transport::ws_msg::ServerEvent;

struct SocketHandle {
    id: u64,
    tx: mpsc::UnboundedSender<ServerEvent>,
    cancel: CancellationToken,
}

/// Handed to a freshly registered socket connection.
pub struct SocketRegistration {
    pub id: u64,
    pub rx: mpsc::UnboundedReceiver<ServerEvent>,
    pub cancel: CancellationToken,
}

/// Registry of live input sockets keyed by session token.
#[derive(Default)]
pub struct SocketHub {
    inner: Mutex<HashMap<String, SocketHandle>>,
    next_id: AtomicU64,
}

impl SocketHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh outbound channel for `token`. An existing socket
    /// for the same token is cancelled first, so the newer bind wins
    /// deterministically.
    pub fn register(&self, token: &str) -> SocketRegistration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = SocketHandle { id, tx, cancel: cancel.clone() };
        let previous = self.inner.lock().insert(token.to_owned(), handle);
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        SocketRegistration { id, rx, cancel }
    }

    /// Detach a socket. Idempotent; a stale id (already replaced by a
    /// newer bind) leaves the newer registration untouched.
    pub fn unregister(&self, token: &str, id: u64) -> bool {
        let mut inner = self.inner.lock();
        match inner.get(token) {
            Some(handle) if handle.id == id => {
                inner.remove(token);
                true
            }
            _ => false,
        }
    }

    /// Queue an event for the socket bound to `token`. Returns whether a
    /// live socket accepted it.
    pub fn send(&self, token: &str, event: ServerEvent) -> bool {
        let inner = self.inner.lock();
        match inner.get(token) {
            Some(handle) => handle.tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Best-effort delivery of a final event, then cancel and remove the
    /// socket for `token`.
    pub fn close(&self, token: &str, final_event: Option<ServerEvent>) -> bool {
        let handle = self.inner.lock().remove(token);
        let Some(handle) = handle else { return false };
        if let Some(event) = final_event {
            let _ = handle.tx.send(event);
        }
        handle.cancel.cancel();
        true
    }

    /// Queue an event on every live socket.
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        let inner = self.inner.lock();
        inner.values().filter(|handle| handle.tx.send(event.clone()).is_ok()).count()
    }

    pub fn is_online(&self, token: &str) -> bool {
        self.inner.lock().contains_key(token)
    }

    pub fn online_count(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
