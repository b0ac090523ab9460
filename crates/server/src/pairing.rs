// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pairing code lifecycle and the one-shot QR token store.

use std::collections::HashMap;

use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

/// Generate a fresh 4-digit pairing code.
pub fn random_pairing_code() -> String {
    let n: u16 = rand::rng().random_range(0..10_000);
    format!("{n:04}")
}

/// Generate an opaque 128-bit URL-safe token.
pub fn random_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Normalized pairing metadata payload.
#[derive(Debug, Clone, Serialize)]
pub struct PairingMeta {
    pub pairing_code: String,
    pub pairing_expires_at: Option<f64>,
    pub pairing_expires_in_s: Option<u64>,
    pub pairing_ttl_s: u64,
    pub pairing_single_use: bool,
}

#[derive(Debug, Clone)]
struct PairingInner {
    code: String,
    expires_at: Option<f64>,
}

/// Current pairing code with TTL and single-use policy.
pub struct PairingState {
    inner: Mutex<PairingInner>,
    ttl_s: u64,
    single_use: bool,
}

impl PairingState {
    /// Install the configured code (random when empty) and arm the TTL.
    pub fn new(initial_code: &str, ttl_s: u64, single_use: bool, now: f64) -> Self {
        let code = {
            let trimmed = initial_code.trim();
            if trimmed.is_empty() { random_pairing_code() } else { trimmed.to_owned() }
        };
        let expires_at = (ttl_s > 0).then(|| now + ttl_s as f64);
        Self { inner: Mutex::new(PairingInner { code, expires_at }), ttl_s, single_use }
    }

    /// Atomically replace the code and refresh the expiry from the TTL.
    pub fn rotate(&self, now: f64) -> String {
        let code = random_pairing_code();
        let mut inner = self.inner.lock();
        inner.code = code.clone();
        inner.expires_at = (self.ttl_s > 0).then(|| now + self.ttl_s as f64);
        code
    }

    pub fn code(&self) -> String {
        self.inner.lock().code.clone()
    }

    pub fn single_use(&self) -> bool {
        self.single_use
    }

    /// True when a TTL is configured and has elapsed.
    pub fn is_expired(&self, now: f64) -> bool {
        self.inner.lock().expires_at.is_some_and(|exp| now > exp)
    }

    pub fn meta(&self, now: f64) -> PairingMeta {
        let inner = self.inner.lock();
        PairingMeta {
            pairing_code: inner.code.clone(),
            pairing_expires_at: inner.expires_at,
            pairing_expires_in_s: inner.expires_at.map(|exp| (exp - now).max(0.0) as u64),
            pairing_ttl_s: self.ttl_s,
            pairing_single_use: self.single_use,
        }
    }
}

/// One-shot QR token store with exactly-once consumption.
///
/// Expired tokens are lazily purged on every access; concurrent consumers
/// of the same token are serialized and exactly one wins.
pub struct QrTokenStore {
    ttl_s: u64,
    by_token: Mutex<HashMap<String, f64>>,
}

impl QrTokenStore {
    pub fn new(ttl_s: u64) -> Self {
        Self { ttl_s: ttl_s.max(1), by_token: Mutex::new(HashMap::new()) }
    }

    fn purge(by_token: &mut HashMap<String, f64>, now: f64) {
        by_token.retain(|_, expires_at| *expires_at > now);
    }

    /// Issue a fresh token valid for the configured TTL.
    pub fn issue(&self, now: f64) -> String {
        let token = random_token();
        let mut by_token = self.by_token.lock();
        Self::purge(&mut by_token, now);
        by_token.insert(token.clone(), now + self.ttl_s as f64);
        token
    }

    /// Consume `token`, returning true exactly once for a live token.
    pub fn consume(&self, token: &str, now: f64) -> bool {
        let mut by_token = self.by_token.lock();
        Self::purge(&mut by_token, now);
        by_token.remove(token).is_some()
    }

    pub fn pending(&self, now: f64) -> usize {
        let mut by_token = self.by_token.lock();
        Self::purge(&mut by_token, now);
        by_token.len()
    }
}

#[cfg(test)]
#[path = "pairing_tests.rs"]
mod tests;
