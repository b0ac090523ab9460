// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide remote-input lock state.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::protocol::epoch_s;

/// Snapshot of the remote-input lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputLockSnapshot {
    pub locked: bool,
    pub reason: String,
    pub actor: String,
    pub updated_ts: f64,
}

/// Remote-input lock consulted by the input socket and the local API.
///
/// When locked, pointer/keyboard/text events are dropped; heartbeat and
/// permission changes keep flowing.
pub struct InputGuard {
    inner: Mutex<InputLockSnapshot>,
}

impl Default for InputGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl InputGuard {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(InputLockSnapshot {
                locked: false,
                reason: String::new(),
                actor: "system".to_owned(),
                updated_ts: epoch_s(),
            }),
        }
    }

    /// Set the lock state and return the new snapshot.
    pub fn set_locked(&self, locked: bool, reason: &str, actor: &str) -> InputLockSnapshot {
        let mut inner = self.inner.lock();
        inner.locked = locked;
        inner.reason = reason.trim().to_owned();
        let actor = actor.trim();
        inner.actor = if actor.is_empty() { "system".to_owned() } else { actor.to_owned() };
        inner.updated_ts = epoch_s();
        inner.clone()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.lock().locked
    }

    pub fn snapshot(&self) -> InputLockSnapshot {
        self.inner.lock().clone()
    }
}

#[cfg(test)]
#[path = "guard_tests.rs"]
mod tests;
