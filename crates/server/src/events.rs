// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded in-memory stream of management events, polled by the launcher.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::epoch_s;

/// Ring-buffer capacity; older events are dropped past this.
const MAX_EVENTS: usize = 512;

/// One launcher-visible event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalEvent {
    pub id: u64,
    pub ts: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    pub payload: Map<String, Value>,
}

/// Page returned by [`LocalEventBus::list_after`].
#[derive(Debug, Clone, Serialize)]
pub struct EventPage {
    pub events: Vec<LocalEvent>,
    pub latest_id: u64,
}

struct EventsInner {
    next_id: u64,
    events: VecDeque<LocalEvent>,
}

/// Thread-safe local event stream with monotonically increasing ids.
pub struct LocalEventBus {
    inner: Mutex<EventsInner>,
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self { inner: Mutex::new(EventsInner { next_id: 1, events: VecDeque::new() }) }
    }

    /// Append an event and return its assigned id.
    pub fn emit(&self, kind: &str, title: &str, message: &str, payload: Value) -> u64 {
        let kind = kind.trim();
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_owned(), other);
                map
            }
        };
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.events.push_back(LocalEvent {
            id,
            ts: epoch_s() as u64,
            kind: if kind.is_empty() { "event".to_owned() } else { kind.to_owned() },
            title: title.trim().to_owned(),
            message: message.trim().to_owned(),
            payload,
        });
        while inner.events.len() > MAX_EVENTS {
            inner.events.pop_front();
        }
        id
    }

    /// Return events with id strictly greater than `last_id`, up to
    /// `limit` (clamped to 1..500), plus the latest assigned id.
    pub fn list_after(&self, last_id: u64, limit: usize) -> EventPage {
        let take = limit.clamp(1, 500);
        let inner = self.inner.lock();
        let latest_id = inner.events.back().map(|e| e.id).unwrap_or(last_id);
        let events = inner.events.iter().filter(|e| e.id > last_id).take(take).cloned().collect();
        EventPage { events, latest_id }
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
