// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::{json, Map, Value};

use super::{extract_text_payload, is_text_event_type, parse_button, ClientEvent, ServerEvent};
use crate::input::MouseButton;

fn map(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[test]
fn text_event_aliases_supported() {
    assert!(is_text_event_type("text"));
    assert!(is_text_event_type("input_text"));
    assert!(is_text_event_type("insert_text"));
    assert!(is_text_event_type("keyboard_text"));
    assert!(!is_text_event_type("mouse_move"));
    assert!(!is_text_event_type(""));
}

#[test]
fn extract_text_payload_uses_supported_fields() {
    assert_eq!(extract_text_payload(&map(json!({"text": "hello"}))), "hello");
    assert_eq!(extract_text_payload(&map(json!({"value": "world"}))), "world");
    assert_eq!(extract_text_payload(&map(json!({"message": "ok"}))), "ok");
    assert_eq!(extract_text_payload(&map(json!({"payload": "v"}))), "v");
    assert_eq!(extract_text_payload(&map(json!({"data": "x"}))), "x");
    assert_eq!(extract_text_payload(&map(json!({"text": ""}))), "");
    assert_eq!(extract_text_payload(&map(json!({"text": null}))), "");
    assert_eq!(extract_text_payload(&map(json!({"text": {"nested": "bad"}}))), "");
    assert_eq!(extract_text_payload(&map(json!({"other": "ignored"}))), "");
}

#[test]
fn text_lookup_prefers_text_key() {
    let payload = map(json!({"data": "second", "text": "first"}));
    assert_eq!(extract_text_payload(&payload), "first");
}

#[test]
fn button_names_map_with_left_default() {
    assert_eq!(parse_button(Some("right")), MouseButton::Right);
    assert_eq!(parse_button(Some("MIDDLE")), MouseButton::Middle);
    assert_eq!(parse_button(Some("wheel")), MouseButton::Middle);
    assert_eq!(parse_button(Some("left")), MouseButton::Left);
    assert_eq!(parse_button(Some("bogus")), MouseButton::Left);
    assert_eq!(parse_button(None), MouseButton::Left);
}

#[test]
fn client_events_parse_from_wire_json() {
    let event: ClientEvent =
        serde_json::from_value(json!({"type": "mouse_move", "dx": 4.5, "dy": -2})).expect("parse");
    assert!(matches!(event, ClientEvent::MouseMove { dx, dy } if dx == 4.5 && dy == -2.0));

    let event: ClientEvent =
        serde_json::from_value(json!({"type": "mouse_click", "button": "right", "double": true}))
            .expect("parse");
    assert!(matches!(event, ClientEvent::MouseClick { ref button, double: true } if button.as_deref() == Some("right")));

    let event: ClientEvent = serde_json::from_value(json!({"type": "ping"})).expect("parse");
    assert!(matches!(event, ClientEvent::Ping {}));

    let event: ClientEvent =
        serde_json::from_value(json!({"type": "hotkey", "keys": ["ctrl", "c"]})).expect("parse");
    assert!(matches!(event, ClientEvent::Hotkey { ref keys } if keys.len() == 2));

    let event: ClientEvent =
        serde_json::from_value(json!({"type": "stats", "rtt_ms": 120.5})).expect("parse");
    assert!(matches!(event, ClientEvent::Stats { rtt_ms: Some(v), .. } if v == 120.5));

    assert!(serde_json::from_value::<ClientEvent>(json!({"type": "unknown_thing"})).is_err());
}

#[test]
fn server_events_serialize_with_type_tag() {
    let hello = ServerEvent::Hello {
        protocol_version: 3,
        min_supported_protocol_version: 1,
        server_version: "0.4.2".to_owned(),
        features: json!({"inputLock": true}),
        heartbeat_interval_ms: 6000,
        heartbeat_timeout_ms: 24000,
    };
    let value = serde_json::to_value(&hello).expect("serialize");
    assert_eq!(value["type"], "hello");
    assert_eq!(value["heartbeat_interval_ms"], 6000);
    assert_eq!(value["heartbeat_timeout_ms"], 24000);
    assert!(value["features"]["inputLock"].as_bool().unwrap_or(false));

    let pong = serde_json::to_value(ServerEvent::Pong { ts: 12.5 }).expect("serialize");
    assert_eq!(pong["type"], "pong");

    let transfer = serde_json::to_value(ServerEvent::FileTransfer {
        filename: "a.bin".to_owned(),
        url: "http://h/a.bin?t=x".to_owned(),
        size: 9,
        sha256: "ff".to_owned(),
    })
    .expect("serialize");
    assert_eq!(transfer["type"], "file_transfer");
    assert_eq!(transfer["size"], 9);

    let revoked = serde_json::to_value(ServerEvent::SessionRevoked { reason: "panic".to_owned() })
        .expect("serialize");
    assert_eq!(revoked["type"], "session_revoked");
}
