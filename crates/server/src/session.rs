// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authoritative map of tokens to device sessions, with persistence and
//! TTL/idle/max-sessions eviction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::pairing::random_token;

/// Throttle for persisting pure activity updates (`touch`).
const TOUCH_PERSIST_MIN_S: f64 = 30.0;

/// Eviction policy knobs (0 = unlimited).
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionPolicy {
    pub ttl_s: u64,
    pub idle_ttl_s: u64,
    pub max_sessions: usize,
}

/// Server-side state for one authorized (or pending) device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub device_id: String,
    pub device_name: String,
    pub ip: String,
    pub created_ts: f64,
    pub last_seen_ts: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<f64>,
    pub approved: bool,
    #[serde(default)]
    pub settings: Map<String, Value>,
}

/// Result of [`SessionStore::authorize`].
#[derive(Debug, Clone)]
pub struct AuthorizeOutcome {
    pub token: String,
    /// Tokens evicted to honor the max-sessions cap; the caller closes
    /// their sockets.
    pub evicted: Vec<String>,
}

/// Persisted store shape: `{version, tokens: {token -> session}}`.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStore {
    version: u32,
    tokens: HashMap<String, Session>,
}

#[derive(Default)]
struct Inner {
    active: HashMap<String, Session>,
    pending: HashMap<String, Session>,
    last_persist: f64,
}

/// Session store: single writer mutex; persistence I/O happens outside
/// the lock on a snapshot of the approved set.
pub struct SessionStore {
    inner: Mutex<Inner>,
    file: Option<PathBuf>,
    policy: SessionPolicy,
}

impl SessionStore {
    pub fn new(file: Option<PathBuf>, policy: SessionPolicy) -> Self {
        Self { inner: Mutex::new(Inner::default()), file, policy }
    }

    /// Load the approved set from disk, discarding entries past their TTL.
    pub fn load(&self, now: f64) -> usize {
        let Some(ref file) = self.file else { return 0 };
        let raw = match std::fs::read_to_string(file) {
            Ok(raw) => raw,
            Err(_) => return 0,
        };
        let parsed: PersistedStore = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(file = %file.display(), err = %e, "session store unreadable, starting empty");
                return 0;
            }
        };
        let mut loaded = 0;
        let mut inner = self.inner.lock();
        for (token, mut session) in parsed.tokens {
            if !session.approved || self.expired(&session, now) {
                continue;
            }
            session.token = token.clone();
            inner.active.insert(token, session);
            loaded += 1;
        }
        loaded
    }

    fn expired(&self, session: &Session, now: f64) -> bool {
        if self.policy.ttl_s > 0 && now - session.created_ts > self.policy.ttl_s as f64 {
            return true;
        }
        if self.policy.idle_ttl_s > 0 && now - session.last_seen_ts > self.policy.idle_ttl_s as f64 {
            return true;
        }
        false
    }

    fn sweep_locked(&self, inner: &mut Inner, now: f64) -> Vec<String> {
        let mut removed = Vec::new();
        for set in [&mut inner.active, &mut inner.pending] {
            let dead: Vec<String> = set
                .iter()
                .filter(|(_, s)| {
                    (self.policy.ttl_s > 0 && now - s.created_ts > self.policy.ttl_s as f64)
                        || (self.policy.idle_ttl_s > 0
                            && now - s.last_seen_ts > self.policy.idle_ttl_s as f64)
                })
                .map(|(t, _)| t.clone())
                .collect();
            for token in dead {
                set.remove(&token);
                removed.push(token);
            }
        }
        removed
    }

    fn snapshot_locked(inner: &Inner) -> Vec<Session> {
        inner.active.values().cloned().collect()
    }

    fn persist(&self, snapshot: Vec<Session>) {
        let Some(ref file) = self.file else { return };
        if let Err(e) = write_store_atomic(file, snapshot) {
            warn!(file = %file.display(), err = %e, "session store persist failed");
        }
    }

    /// Issue a token for a device, coalescing onto an existing session
    /// with the same `device_id` (settings and `created_ts` survive, the
    /// old token stops resolving).
    pub fn authorize(
        &self,
        device_id: &str,
        device_name: &str,
        ip: &str,
        approved: bool,
        now: f64,
    ) -> AuthorizeOutcome {
        let token = random_token();
        let mut evicted = Vec::new();
        let snapshot = {
            let mut inner = self.inner.lock();
            self.sweep_locked(&mut inner, now);

            let previous = Self::take_by_device_id(&mut inner, device_id);
            let (created_ts, settings) = match previous {
                Some(prev) => (prev.created_ts, prev.settings),
                None => (now, Map::new()),
            };

            if approved && self.policy.max_sessions > 0 {
                while inner.active.len() >= self.policy.max_sessions {
                    let oldest = inner
                        .active
                        .values()
                        .min_by(|a, b| a.last_seen_ts.total_cmp(&b.last_seen_ts))
                        .map(|s| s.token.clone());
                    match oldest {
                        Some(victim) => {
                            inner.active.remove(&victim);
                            evicted.push(victim);
                        }
                        None => break,
                    }
                }
            }

            let session = Session {
                token: token.clone(),
                device_id: device_id.to_owned(),
                device_name: device_name.to_owned(),
                ip: ip.to_owned(),
                created_ts,
                last_seen_ts: now,
                expires_at: (self.policy.ttl_s > 0).then(|| created_ts + self.policy.ttl_s as f64),
                approved,
                settings,
            };
            if approved {
                inner.active.insert(token.clone(), session);
            } else {
                inner.pending.insert(token.clone(), session);
            }
            inner.last_persist = now;
            Self::snapshot_locked(&inner)
        };
        self.persist(snapshot);
        AuthorizeOutcome { token, evicted }
    }

    fn take_by_device_id(inner: &mut Inner, device_id: &str) -> Option<Session> {
        for set in [&mut inner.active, &mut inner.pending] {
            if let Some(token) = set
                .values()
                .find(|s| s.device_id == device_id)
                .map(|s| s.token.clone())
            {
                return set.remove(&token);
            }
        }
        None
    }

    pub fn get_session(&self, token: &str, include_pending: bool) -> Option<Session> {
        let inner = self.inner.lock();
        inner
            .active
            .get(token)
            .or_else(|| if include_pending { inner.pending.get(token) } else { None })
            .cloned()
    }

    /// Refresh `last_seen_ts`; disk writes are throttled.
    pub fn touch(&self, token: &str, now: f64) -> bool {
        let snapshot = {
            let mut inner = self.inner.lock();
            let session = if inner.active.contains_key(token) {
                inner.active.get_mut(token)
            } else {
                inner.pending.get_mut(token)
            };
            let Some(session) = session else { return false };
            session.last_seen_ts = now;
            if now - inner.last_persist < TOUCH_PERSIST_MIN_S {
                return true;
            }
            inner.last_persist = now;
            Self::snapshot_locked(&inner)
        };
        self.persist(snapshot);
        true
    }

    pub fn get_all_devices(&self) -> Vec<Session> {
        let inner = self.inner.lock();
        let mut rows: Vec<Session> = inner.active.values().cloned().collect();
        rows.sort_by(|a, b| b.last_seen_ts.total_cmp(&a.last_seen_ts));
        rows
    }

    pub fn get_pending_devices(&self) -> Vec<Session> {
        let inner = self.inner.lock();
        let mut rows: Vec<Session> = inner.pending.values().cloned().collect();
        rows.sort_by(|a, b| b.created_ts.total_cmp(&a.created_ts));
        rows
    }

    pub fn list_tokens(&self, include_pending: bool) -> Vec<String> {
        let inner = self.inner.lock();
        let mut tokens: Vec<String> = inner.active.keys().cloned().collect();
        if include_pending {
            tokens.extend(inner.pending.keys().cloned());
        }
        tokens
    }

    pub fn find_token_by_device_id(&self, device_id: &str, include_pending: bool) -> Option<String> {
        let inner = self.inner.lock();
        inner
            .active
            .values()
            .find(|s| s.device_id == device_id)
            .or_else(|| {
                if include_pending {
                    inner.pending.values().find(|s| s.device_id == device_id)
                } else {
                    None
                }
            })
            .map(|s| s.token.clone())
    }

    /// Shallow-merge `patch` into the session settings; `null` values
    /// delete keys. Returns true iff the session exists.
    pub fn update_settings(&self, token: &str, patch: Map<String, Value>) -> bool {
        let snapshot = {
            let mut inner = self.inner.lock();
            let session = if inner.active.contains_key(token) {
                inner.active.get_mut(token)
            } else {
                inner.pending.get_mut(token)
            };
            let Some(session) = session else { return false };
            for (key, value) in patch {
                if value.is_null() {
                    session.settings.remove(&key);
                } else {
                    session.settings.insert(key, value);
                }
            }
            Self::snapshot_locked(&inner)
        };
        self.persist(snapshot);
        true
    }

    /// Move a session between the pending and active sets.
    pub fn set_approved(&self, token: &str, approved: bool) -> bool {
        let snapshot = {
            let mut inner = self.inner.lock();
            let session = inner.active.remove(token).or_else(|| inner.pending.remove(token));
            let Some(mut session) = session else { return false };
            session.approved = approved;
            if approved {
                inner.active.insert(token.to_owned(), session);
            } else {
                inner.pending.insert(token.to_owned(), session);
            }
            Self::snapshot_locked(&inner)
        };
        self.persist(snapshot);
        true
    }

    /// Remove a session from both sets. The caller closes any bound socket.
    pub fn delete_session(&self, token: &str) -> bool {
        let snapshot = {
            let mut inner = self.inner.lock();
            let removed =
                inner.active.remove(token).is_some() | inner.pending.remove(token).is_some();
            if !removed {
                return false;
            }
            Self::snapshot_locked(&inner)
        };
        self.persist(snapshot);
        true
    }

    /// Evict expired sessions and return their tokens.
    pub fn sweep(&self, now: f64) -> Vec<String> {
        let (removed, snapshot) = {
            let mut inner = self.inner.lock();
            let removed = self.sweep_locked(&mut inner, now);
            if removed.is_empty() {
                return removed;
            }
            (removed, Self::snapshot_locked(&inner))
        };
        self.persist(snapshot);
        removed
    }

    pub fn counts(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.active.len(), inner.pending.len())
    }
}

/// Write the approved set atomically: temp file beside the target, then
/// rename over it.
fn write_store_atomic(file: &Path, snapshot: Vec<Session>) -> std::io::Result<()> {
    let tokens: HashMap<String, Session> =
        snapshot.into_iter().map(|s| (s.token.clone(), s)).collect();
    let store = PersistedStore { version: 1, tokens };
    let body = serde_json::to_vec_pretty(&store)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    if let Some(parent) = file.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = file.with_extension(format!("tmp-{}", std::process::id()));
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, file)?;
    Ok(())
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
