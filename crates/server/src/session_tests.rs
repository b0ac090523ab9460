// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::{json, Map, Value};

use super::{SessionPolicy, SessionStore};

fn store() -> SessionStore {
    SessionStore::new(None, SessionPolicy::default())
}

fn patch(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
}

#[test]
fn authorize_creates_resolvable_session() {
    let store = store();
    let out = store.authorize("d-1", "Phone", "192.168.1.20", true, 100.0);
    assert!(out.evicted.is_empty());
    let session = store.get_session(&out.token, false).map(|s| (s.device_id, s.approved));
    assert_eq!(session, Some(("d-1".to_owned(), true)));
}

#[test]
fn pending_sessions_are_invisible_to_active_lookup() {
    let store = store();
    let out = store.authorize("d-1", "Phone", "ip", false, 100.0);
    assert!(store.get_session(&out.token, false).is_none());
    assert!(store.get_session(&out.token, true).is_some());
    assert!(store.get_all_devices().is_empty());
    assert_eq!(store.get_pending_devices().len(), 1);
}

#[test]
fn reauthorize_reissues_token_and_keeps_settings() {
    let store = store();
    let first = store.authorize("d-1", "Phone", "ip", true, 100.0);
    assert!(store.update_settings(&first.token, patch(&[("alias", json!("couch"))])));

    let second = store.authorize("d-1", "Phone 2", "ip2", true, 200.0);
    assert_ne!(first.token, second.token);
    // Old token stops resolving; settings and created_ts survive.
    assert!(store.get_session(&first.token, true).is_none());
    let session = store.get_session(&second.token, false).expect("session");
    assert_eq!(session.settings.get("alias"), Some(&json!("couch")));
    assert_eq!(session.created_ts, 100.0);
    assert_eq!(session.device_name, "Phone 2");
    let (active, pending) = store.counts();
    assert_eq!((active, pending), (1, 0));
}

#[test]
fn update_settings_null_deletes_keys() {
    let store = store();
    let out = store.authorize("d-1", "Phone", "ip", true, 100.0);
    store.update_settings(&out.token, patch(&[("alias", json!("a")), ("note", json!("n"))]));
    store.update_settings(&out.token, patch(&[("alias", Value::Null)]));
    let settings = store.get_session(&out.token, false).map(|s| s.settings).unwrap_or_default();
    assert!(!settings.contains_key("alias"));
    assert_eq!(settings.get("note"), Some(&json!("n")));
}

#[test]
fn update_settings_unknown_token_is_false() {
    let store = store();
    assert!(!store.update_settings("nope", patch(&[("alias", json!("a"))])));
}

#[test]
fn set_approved_moves_between_sets() {
    let store = store();
    let out = store.authorize("d-1", "Phone", "ip", false, 100.0);
    assert!(store.set_approved(&out.token, true));
    assert_eq!(store.counts(), (1, 0));
    assert!(store.get_session(&out.token, false).is_some_and(|s| s.approved));
    assert!(store.set_approved(&out.token, false));
    assert_eq!(store.counts(), (0, 1));
}

#[test]
fn delete_removes_from_both_sets() {
    let store = store();
    let active = store.authorize("d-1", "Phone", "ip", true, 100.0);
    let pending = store.authorize("d-2", "Tablet", "ip", false, 100.0);
    assert!(store.delete_session(&active.token));
    assert!(store.delete_session(&pending.token));
    assert!(!store.delete_session(&pending.token));
    assert_eq!(store.counts(), (0, 0));
}

#[test]
fn find_token_by_device_id_respects_pending_flag() {
    let store = store();
    let out = store.authorize("d-1", "Phone", "ip", false, 100.0);
    assert_eq!(store.find_token_by_device_id("d-1", false), None);
    assert_eq!(store.find_token_by_device_id("d-1", true), Some(out.token));
}

#[test]
fn max_sessions_evicts_oldest_idle() {
    let store = SessionStore::new(
        None,
        SessionPolicy { ttl_s: 0, idle_ttl_s: 0, max_sessions: 2 },
    );
    let a = store.authorize("d-a", "A", "ip", true, 100.0);
    let b = store.authorize("d-b", "B", "ip", true, 200.0);
    // Refresh A so B becomes the idlest.
    assert!(store.touch(&a.token, 300.0));
    let c = store.authorize("d-c", "C", "ip", true, 400.0);
    assert_eq!(c.evicted, vec![b.token.clone()]);
    assert!(store.get_session(&b.token, true).is_none());
    assert_eq!(store.counts(), (2, 0));
}

#[test]
fn ttl_sweep_evicts_expired_sessions() {
    let store = SessionStore::new(
        None,
        SessionPolicy { ttl_s: 50, idle_ttl_s: 0, max_sessions: 0 },
    );
    let old = store.authorize("d-old", "Old", "ip", true, 100.0);
    let fresh = store.authorize("d-new", "New", "ip", true, 140.0);
    let removed = store.sweep(160.0);
    assert_eq!(removed, vec![old.token.clone()]);
    assert!(store.get_session(&old.token, true).is_none());
    assert!(store.get_session(&fresh.token, false).is_some());
}

#[test]
fn idle_sweep_uses_last_seen() {
    let store = SessionStore::new(
        None,
        SessionPolicy { ttl_s: 0, idle_ttl_s: 30, max_sessions: 0 },
    );
    let out = store.authorize("d-1", "Phone", "ip", true, 100.0);
    store.touch(&out.token, 150.0);
    assert!(store.sweep(170.0).is_empty());
    assert_eq!(store.sweep(181.0), vec![out.token]);
}

#[test]
fn tokens_are_never_reused() {
    let store = store();
    let mut seen = std::collections::HashSet::new();
    for i in 0..32 {
        let out = store.authorize(&format!("d-{i}"), "X", "ip", true, 100.0);
        assert!(seen.insert(out.token));
    }
}

#[test]
fn persistence_round_trip_keeps_approved_only() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("sessions.json");
    let policy = SessionPolicy::default();

    let store = SessionStore::new(Some(file.clone()), policy);
    let approved = store.authorize("d-1", "Phone", "192.168.1.20", true, 100.0);
    store.authorize("d-2", "Tablet", "ip", false, 100.0);
    store.update_settings(&approved.token, patch(&[("perm_power", json!(true))]));

    let reloaded = SessionStore::new(Some(file), policy);
    assert_eq!(reloaded.load(200.0), 1);
    let session = reloaded.get_session(&approved.token, false).expect("session");
    assert_eq!(session.device_name, "Phone");
    assert_eq!(session.settings.get("perm_power"), Some(&json!(true)));
    assert_eq!(reloaded.counts(), (1, 0));
    Ok(())
}

#[test]
fn load_discards_sessions_past_ttl() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("sessions.json");
    let policy = SessionPolicy { ttl_s: 100, idle_ttl_s: 0, max_sessions: 0 };

    let store = SessionStore::new(Some(file.clone()), policy);
    store.authorize("d-1", "Phone", "ip", true, 100.0);

    let reloaded = SessionStore::new(Some(file), policy);
    assert_eq!(reloaded.load(250.0), 0);
    Ok(())
}
