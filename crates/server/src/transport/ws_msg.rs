// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Input-socket message types and conversions. Frames are JSON text with
//! an internally tagged `type` field in both directions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::guard::InputLockSnapshot;
use crate::input::MouseButton;

/// Server-to-client events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Hello {
        protocol_version: u32,
        min_supported_protocol_version: u32,
        server_version: String,
        features: Value,
        heartbeat_interval_ms: u64,
        heartbeat_timeout_ms: u64,
    },
    Pong {
        ts: f64,
    },
    FileTransfer {
        filename: String,
        url: String,
        size: u64,
        sha256: String,
    },
    InputLockChanged {
        security: InputLockSnapshot,
    },
    SessionRevoked {
        reason: String,
    },
    Error {
        code: String,
        detail: String,
    },
}

/// Client-to-server events (text input is handled separately; see
/// [`is_text_event_type`]).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    MouseMove {
        #[serde(default)]
        dx: f64,
        #[serde(default)]
        dy: f64,
    },
    MouseClick {
        #[serde(default)]
        button: Option<String>,
        #[serde(default)]
        double: bool,
    },
    MouseDown {
        #[serde(default)]
        button: Option<String>,
    },
    MouseUp {
        #[serde(default)]
        button: Option<String>,
    },
    Scroll {
        #[serde(default)]
        dy: f64,
    },
    KeyPress {
        key: String,
    },
    Hotkey {
        #[serde(default)]
        keys: Vec<String>,
    },
    Ping {},
    Stats {
        #[serde(default)]
        rtt_ms: Option<f64>,
        #[serde(default)]
        fps: Option<f64>,
        #[serde(default)]
        dropped: Option<u64>,
    },
}

/// Aliases accepted for text-injection events.
pub fn is_text_event_type(kind: &str) -> bool {
    matches!(kind, "text" | "input_text" | "insert_text" | "keyboard_text")
}

/// Pull the text payload out of a text-injection frame. The string may
/// live under any of several keys; non-string payloads yield empty.
pub fn extract_text_payload(payload: &Map<String, Value>) -> String {
    for key in ["text", "value", "message", "payload", "data"] {
        if let Some(Value::String(text)) = payload.get(key) {
            return text.clone();
        }
    }
    String::new()
}

/// Map a client button name onto the injection backend's button type.
pub fn parse_button(raw: Option<&str>) -> MouseButton {
    match raw.unwrap_or("left").trim().to_ascii_lowercase().as_str() {
        "right" => MouseButton::Right,
        "middle" | "wheel" => MouseButton::Middle,
        _ => MouseButton::Left,
    }
}

#[cfg(test)]
#[path = "ws_msg_tests.rs"]
mod tests;
