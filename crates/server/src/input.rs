// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Input injection capability. Host OS drivers are external collaborators;
//! the server core only talks to this trait.

use serde::{Deserialize, Serialize};

/// Pointer buttons understood by the input socket grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Media keys emitted by the volume endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKey {
    VolumeUp,
    VolumeDown,
    VolumeMute,
}

/// Capability surface for pointer/keyboard injection.
///
/// Every operation returns whether the backend delivered the event; a
/// `false` from an unavailable backend is not an error for the socket
/// path, but the volume endpoints surface it as 501.
pub trait InputBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn can_pointer(&self) -> bool;
    fn can_keyboard(&self) -> bool;

    /// Current pointer position in virtual-desktop coordinates.
    fn pointer_position(&self) -> Option<(i32, i32)> {
        None
    }

    fn move_relative(&self, dx: i32, dy: i32) -> bool;
    fn click(&self, button: MouseButton, double: bool) -> bool;
    fn button_down(&self, button: MouseButton) -> bool;
    fn button_up(&self, button: MouseButton) -> bool;
    fn scroll(&self, dy: i32) -> bool;
    fn key_press(&self, key: &str) -> bool;
    fn hotkey(&self, keys: &[String]) -> bool;
    fn type_text(&self, text: &str) -> bool;
    fn media_key(&self, key: MediaKey) -> bool;
}

/// Backend used when no host driver is wired in.
#[derive(Debug, Default)]
pub struct NullInputBackend;

impl InputBackend for NullInputBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn can_pointer(&self) -> bool {
        false
    }

    fn can_keyboard(&self) -> bool {
        false
    }

    fn move_relative(&self, _dx: i32, _dy: i32) -> bool {
        false
    }

    fn click(&self, _button: MouseButton, _double: bool) -> bool {
        false
    }

    fn button_down(&self, _button: MouseButton) -> bool {
        false
    }

    fn button_up(&self, _button: MouseButton) -> bool {
        false
    }

    fn scroll(&self, _dy: i32) -> bool {
        false
    }

    fn key_press(&self, _key: &str) -> bool {
        false
    }

    fn hotkey(&self, _keys: &[String]) -> bool {
        false
    }

    fn type_text(&self, _text: &str) -> bool {
        false
    }

    fn media_key(&self, _key: MediaKey) -> bool {
        false
    }
}
