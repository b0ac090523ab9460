// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test fixtures: fresh application contexts with temp dirs and a
//! recording input backend.

use std::sync::Arc;

use clap::Parser;
use parking_lot::Mutex;

use crate::capture::native::NativeStreamer;
use crate::config::ServerConfig;
use crate::input::{InputBackend, MediaKey, MouseButton};
use crate::transport::AppState;

/// Input backend that records every delivered event as a string.
#[derive(Default)]
pub struct RecordingInputBackend {
    pub events: Mutex<Vec<String>>,
}

impl RecordingInputBackend {
    pub fn taken(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn record(&self, event: String) -> bool {
        self.events.lock().push(event);
        true
    }
}

impl InputBackend for RecordingInputBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn can_pointer(&self) -> bool {
        true
    }

    fn can_keyboard(&self) -> bool {
        true
    }

    fn pointer_position(&self) -> Option<(i32, i32)> {
        Some((100, 100))
    }

    fn move_relative(&self, dx: i32, dy: i32) -> bool {
        self.record(format!("move:{dx},{dy}"))
    }

    fn click(&self, button: MouseButton, double: bool) -> bool {
        self.record(format!("click:{button:?}:{double}"))
    }

    fn button_down(&self, button: MouseButton) -> bool {
        self.record(format!("down:{button:?}"))
    }

    fn button_up(&self, button: MouseButton) -> bool {
        self.record(format!("up:{button:?}"))
    }

    fn scroll(&self, dy: i32) -> bool {
        self.record(format!("scroll:{dy}"))
    }

    fn key_press(&self, key: &str) -> bool {
        self.record(format!("key:{key}"))
    }

    fn hotkey(&self, keys: &[String]) -> bool {
        self.record(format!("hotkey:{}", keys.join("+")))
    }

    fn type_text(&self, text: &str) -> bool {
        self.record(format!("text:{text}"))
    }

    fn media_key(&self, key: MediaKey) -> bool {
        self.record(format!("media:{key:?}"))
    }
}

/// A built test context. The temp dir owns the session store and upload
/// directory for the lifetime of the test.
pub struct TestCtx {
    pub state: Arc<AppState>,
    pub input: Arc<RecordingInputBackend>,
    pub dir: tempfile::TempDir,
}

/// Builder for per-test application contexts.
pub struct StateBuilder {
    config: ServerConfig,
}

impl Default for StateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StateBuilder {
    pub fn new() -> Self {
        // Clap defaults, plus explicit overrides below for every knob a
        // test relies on (ambient env vars can shadow generic names).
        let mut config = ServerConfig::parse_from(["cyberdeck"]);
        config.pairing_code = "1234".to_owned();
        config.device_approval_required = false;
        config.pairing_single_use = false;
        config.pairing_ttl_s = 0;
        config.allow_query_token = false;
        config.upload_max_bytes = 0;
        config.upload_allowed_ext = String::new();
        config.max_sessions = 0;
        config.session_ttl_s = 0;
        config.session_idle_ttl_s = 0;
        Self { config }
    }

    pub fn pairing_code(mut self, code: &str) -> Self {
        self.config.pairing_code = code.to_owned();
        self
    }

    pub fn pairing_ttl_s(mut self, ttl: u64) -> Self {
        self.config.pairing_ttl_s = ttl;
        self
    }

    pub fn pairing_single_use(mut self, single_use: bool) -> Self {
        self.config.pairing_single_use = single_use;
        self
    }

    pub fn approval_required(mut self, required: bool) -> Self {
        self.config.device_approval_required = required;
        self
    }

    pub fn pin(mut self, max_fails: u32, window_s: u64, block_s: u64) -> Self {
        self.config.pin_max_fails = max_fails;
        self.config.pin_window_s = window_s;
        self.config.pin_block_s = block_s;
        self
    }

    pub fn allow_query_token(mut self, allow: bool) -> Self {
        self.config.allow_query_token = allow;
        self
    }

    pub fn upload_allowed_ext(mut self, ext: &str) -> Self {
        self.config.upload_allowed_ext = ext.to_owned();
        self
    }

    pub fn upload_max_bytes(mut self, max: u64) -> Self {
        self.config.upload_max_bytes = max;
        self
    }

    pub fn max_sessions(mut self, max: usize) -> Self {
        self.config.max_sessions = max;
        self
    }

    pub fn heartbeat(mut self, interval_s: u64, timeout_s: u64) -> Self {
        self.config.ws_heartbeat_interval_s = interval_s;
        self.config.ws_heartbeat_timeout_s = timeout_s;
        self
    }

    pub fn build(self) -> TestCtx {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let mut config = self.config;
        config.session_file = dir.path().join("sessions.json");
        config.files_dir = dir.path().join("uploads");
        let input = Arc::new(RecordingInputBackend::default());
        let native = NativeStreamer::disabled(&config.stream, "test");
        let state = AppState::new(config, input.clone(), native);
        TestCtx { state, input, dir }
    }
}

/// Authorize an approved session directly in the store and return its
/// token.
pub fn seed_session(ctx: &TestCtx, device_id: &str, device_name: &str) -> String {
    ctx.state
        .sessions
        .authorize(device_id, device_name, "127.0.0.1", true, crate::protocol::epoch_s())
        .token
}
