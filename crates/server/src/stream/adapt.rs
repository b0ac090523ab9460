// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session width stabilization: snap measured widths onto a ladder
//! and damp oscillation with hysteresis plus a switch cooldown.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Ladder used when configuration provides nothing usable.
pub const DEFAULT_WIDTH_LADDER: [u32; 11] =
    [1920, 1600, 1440, 1366, 1280, 1152, 1024, 960, 854, 768, 640];

/// Parse a comma-separated width ladder, descending and deduplicated.
/// Falls back to `default` when nothing parses.
pub fn parse_width_ladder(raw: &str, default: &[u32]) -> Vec<u32> {
    let mut out: Vec<u32> = raw
        .split(',')
        .filter_map(|part| part.trim().parse::<u32>().ok())
        .filter(|v| *v > 0)
        .collect();
    if out.is_empty() {
        out = default.to_vec();
    }
    out.sort_unstable_by(|a, b| b.cmp(a));
    out.dedup();
    out
}

/// Stabilizer policy knobs.
#[derive(Debug, Clone)]
pub struct StabilizerPolicy {
    pub ladder: Vec<u32>,
    pub min_switch_s: f64,
    pub hysteresis_ratio: f64,
    pub min_floor: u32,
    pub enabled: bool,
}

impl Default for StabilizerPolicy {
    fn default() -> Self {
        Self {
            ladder: DEFAULT_WIDTH_LADDER.to_vec(),
            min_switch_s: 8.0,
            hysteresis_ratio: 0.18,
            min_floor: 0,
            enabled: true,
        }
    }
}

/// Per-token damping of requested stream widths.
pub struct WidthStabilizer {
    policy: StabilizerPolicy,
    state: Mutex<HashMap<String, (u32, f64)>>,
}

impl WidthStabilizer {
    pub fn new(mut policy: StabilizerPolicy) -> Self {
        policy.ladder.retain(|v| *v > 0);
        policy.ladder.sort_unstable_by(|a, b| b.cmp(a));
        policy.ladder.dedup();
        if policy.ladder.is_empty() {
            policy.ladder = vec![1280, 960, 768, 640];
        }
        policy.min_switch_s = policy.min_switch_s.max(0.0);
        policy.hysteresis_ratio = policy.hysteresis_ratio.clamp(0.0, 0.9);
        Self { policy, state: Mutex::new(HashMap::new()) }
    }

    pub fn ladder(&self) -> &[u32] {
        &self.policy.ladder
    }

    /// Snap a measured width to the nearest ladder rung not above it.
    fn snap(&self, requested: u32) -> u32 {
        let req = requested.max(1);
        let mut chosen = *self.policy.ladder.last().unwrap_or(&640);
        for rung in &self.policy.ladder {
            if req >= *rung {
                chosen = *rung;
                break;
            }
        }
        if self.policy.min_floor > 0 {
            chosen = chosen.max(self.policy.min_floor);
        }
        chosen
    }

    /// Choose the effective width for `token` given a new measurement.
    pub fn decide(&self, token: &str, requested: u32, now: f64) -> u32 {
        let snapped = self.snap(requested);
        if !self.policy.enabled || token.is_empty() {
            return snapped;
        }

        let mut state = self.state.lock();
        let Some(&(prev_w, prev_ts)) = state.get(token) else {
            state.insert(token.to_owned(), (snapped, now));
            return snapped;
        };

        if snapped == prev_w {
            state.insert(token.to_owned(), (prev_w, now));
            return prev_w;
        }

        // Ignore micro-jitter around the current width.
        let hysteresis_px = ((prev_w as f64 * self.policy.hysteresis_ratio).round() as u32).max(1);
        if snapped.abs_diff(prev_w) <= hysteresis_px {
            return prev_w;
        }

        // Cooldown between switches; only major jumps may break through.
        let dt = (now - prev_ts).max(0.0);
        if dt < self.policy.min_switch_s {
            let ratio = self.policy.hysteresis_ratio * 1.8;
            let major_drop = (snapped as f64) < prev_w as f64 * (1.0 - ratio);
            let major_rise = (snapped as f64) > prev_w as f64 * (1.0 + ratio);
            if !(major_drop || major_rise) {
                return prev_w;
            }
        }

        state.insert(token.to_owned(), (snapped, now));
        snapped
    }

    /// Drop the remembered width for a session token.
    pub fn forget(&self, token: &str) {
        self.state.lock().remove(token);
    }
}

#[cfg(test)]
#[path = "adapt_tests.rs"]
mod tests;
