// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-IP sliding-window limiter for pairing-PIN brute-force attempts.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::ServerConfig;
use crate::protocol::epoch_s;

/// Effective limiter knobs with sane floors applied.
#[derive(Debug, Clone, Copy)]
pub struct PinLimits {
    pub window_s: f64,
    pub max_fails: u32,
    pub block_s: f64,
    pub stale_s: f64,
    pub max_ips: usize,
}

impl PinLimits {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            window_s: (config.pin_window_s.max(1)) as f64,
            max_fails: config.pin_max_fails.max(1),
            block_s: (config.pin_block_s.max(1)) as f64,
            stale_s: (config.pin_state_stale_s.max(10)) as f64,
            max_ips: config.pin_state_max_ips.max(1),
        }
    }
}

#[derive(Debug, Clone)]
struct PinState {
    window_start: f64,
    fails: u32,
    blocked_until: f64,
    last_touch: f64,
}

/// Counters snapshot surfaced by the management API.
#[derive(Debug, Clone, Serialize)]
pub struct PinStats {
    pub tracked_ips: usize,
    pub blocked_ips: usize,
}

/// Thread-safe per-IP failure counter with block escalation.
///
/// Housekeeping runs on every operation: stale entries (no active block,
/// untouched past `stale_s`) are evicted and the table is capped at
/// `max_ips` by LRU on `last_touch`.
#[derive(Default)]
pub struct PinLimiter {
    by_ip: Mutex<HashMap<String, PinState>>,
}

impl PinLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn cleanup(by_ip: &mut HashMap<String, PinState>, now: f64, limits: &PinLimits, force_compact: bool) {
        by_ip.retain(|_, st| {
            let age = now - if st.last_touch > 0.0 { st.last_touch } else { st.window_start };
            age <= limits.stale_s || now < st.blocked_until
        });
        if by_ip.len() <= limits.max_ips && !force_compact {
            return;
        }
        if by_ip.len() <= limits.max_ips {
            return;
        }
        let mut keys: Vec<(String, f64)> = by_ip
            .iter()
            .map(|(ip, st)| (ip.clone(), if st.last_touch > 0.0 { st.last_touch } else { st.window_start }))
            .collect();
        keys.sort_by(|a, b| a.1.total_cmp(&b.1));
        let excess = keys.len().saturating_sub(limits.max_ips);
        for (ip, _) in keys.into_iter().take(excess) {
            by_ip.remove(&ip);
        }
    }

    /// Returns `(allowed, retry_after_s)` for a handshake attempt from `ip`.
    pub fn check(&self, ip: &str, now: f64, limits: &PinLimits) -> (bool, u64) {
        let mut by_ip = self.by_ip.lock();
        Self::cleanup(&mut by_ip, now, limits, false);
        let st = by_ip
            .entry(ip.to_owned())
            .or_insert(PinState { window_start: now, fails: 0, blocked_until: 0.0, last_touch: now });
        st.last_touch = now;
        if st.blocked_until > now {
            return (false, (st.blocked_until - now).ceil().max(1.0) as u64);
        }
        if now - st.window_start > limits.window_s {
            st.window_start = now;
            st.fails = 0;
            st.blocked_until = 0.0;
        }
        if st.fails >= limits.max_fails {
            st.blocked_until = now + limits.block_s;
            return (false, limits.block_s.ceil() as u64);
        }
        (true, 0)
    }

    /// Record a failed code comparison from `ip`.
    pub fn record_failure(&self, ip: &str, now: f64, limits: &PinLimits) {
        let mut by_ip = self.by_ip.lock();
        Self::cleanup(&mut by_ip, now, limits, false);
        let st = by_ip
            .entry(ip.to_owned())
            .or_insert(PinState { window_start: now, fails: 0, blocked_until: 0.0, last_touch: now });
        if now - st.window_start > limits.window_s {
            st.window_start = now;
            st.fails = 0;
            st.blocked_until = 0.0;
        }
        st.fails += 1;
        if st.fails >= limits.max_fails {
            st.blocked_until = now + limits.block_s;
        }
        st.last_touch = now;
        Self::cleanup(&mut by_ip, now, limits, true);
    }

    /// Drop the counter for `ip` after a successful handshake.
    pub fn record_success(&self, ip: &str) {
        self.by_ip.lock().remove(ip);
    }

    /// Clear all counters (pairing rotation, tests).
    pub fn reset(&self) {
        self.by_ip.lock().clear();
    }

    pub fn stats(&self) -> PinStats {
        let now = epoch_s();
        let by_ip = self.by_ip.lock();
        PinStats {
            tracked_ips: by_ip.len(),
            blocked_ips: by_ip.values().filter(|st| st.blocked_until > now).count(),
        }
    }
}

#[cfg(test)]
#[path = "pin_limiter_tests.rs"]
mod tests;
