// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::HeaderMap;
use serde_json::{json, Map};

use super::{bearer_token, coerce_flag, get_perm, query_token, require_perm, resolve_token};
use crate::test_support::{seed_session, StateBuilder};

fn headers_with_bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "authorization",
        format!("Bearer {token}").parse().unwrap_or_else(|_| panic!("header")),
    );
    headers
}

#[test]
fn bearer_header_parsing() {
    assert_eq!(bearer_token(&headers_with_bearer("abc")), Some("abc".to_owned()));
    assert_eq!(bearer_token(&HeaderMap::new()), None);
    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer ".parse().unwrap_or_else(|_| panic!("header")));
    assert_eq!(bearer_token(&headers), None);
}

#[test]
fn query_token_parsing() {
    assert_eq!(query_token(Some("token=abc&x=1")), Some("abc".to_owned()));
    assert_eq!(query_token(Some("x=1&token=abc")), Some("abc".to_owned()));
    assert_eq!(query_token(Some("x=1")), None);
    assert_eq!(query_token(None), None);
}

#[test]
fn resolve_prefers_header_and_requires_approval() {
    let ctx = StateBuilder::new().build();
    let token = seed_session(&ctx, "d-1", "Phone");

    let resolved = resolve_token(&ctx.state, &headers_with_bearer(&token), None);
    assert_eq!(resolved.ok(), Some(token.clone()));

    // Pending sessions never resolve.
    let pending = ctx
        .state
        .sessions
        .authorize("d-2", "Tablet", "ip", false, 0.0)
        .token;
    assert!(resolve_token(&ctx.state, &headers_with_bearer(&pending), None).is_err());
}

#[test]
fn query_tokens_gated_by_config() {
    let ctx = StateBuilder::new().build();
    let token = seed_session(&ctx, "d-1", "Phone");
    let query = format!("token={token}");

    // Off by default.
    assert!(resolve_token(&ctx.state, &HeaderMap::new(), Some(&query)).is_err());

    let ctx = StateBuilder::new().allow_query_token(true).build();
    let token = seed_session(&ctx, "d-1", "Phone");
    let query = format!("token={token}");
    assert!(resolve_token(&ctx.state, &HeaderMap::new(), Some(&query)).is_ok());
}

#[test]
fn coercion_truthy_falsy_rules() {
    for value in [json!(true), json!(1), json!("1"), json!("yes"), json!("On"), json!("weird")] {
        assert!(coerce_flag(&value, false), "{value}");
    }
    for value in [json!(false), json!(0), json!("0"), json!("no"), json!("OFF"), json!("f")] {
        assert!(!coerce_flag(&value, true), "{value}");
    }
    // Null/empty fall back to the default.
    assert!(coerce_flag(&json!(null), true));
    assert!(!coerce_flag(&json!(null), false));
    assert!(coerce_flag(&json!(""), true));
    assert!(!coerce_flag(&json!(""), false));
}

#[test]
fn permission_defaults_and_overrides() {
    let ctx = StateBuilder::new().build();
    let token = seed_session(&ctx, "d-1", "Phone");

    assert!(get_perm(&ctx.state, &token, "perm_mouse"));
    assert!(get_perm(&ctx.state, &token, "perm_keyboard"));
    assert!(get_perm(&ctx.state, &token, "perm_upload"));
    assert!(get_perm(&ctx.state, &token, "perm_file_send"));
    assert!(get_perm(&ctx.state, &token, "perm_stream"));
    assert!(!get_perm(&ctx.state, &token, "perm_power"));
    assert!(!get_perm(&ctx.state, &token, "perm_unknown"));
    assert!(!get_perm(&ctx.state, "missing-token", "perm_mouse"));

    let mut patch = Map::new();
    patch.insert("perm_mouse".to_owned(), json!("off"));
    patch.insert("perm_power".to_owned(), json!("1"));
    ctx.state.sessions.update_settings(&token, patch);
    assert!(!get_perm(&ctx.state, &token, "perm_mouse"));
    assert!(get_perm(&ctx.state, &token, "perm_power"));
}

#[test]
fn require_perm_reports_key_in_detail() {
    let ctx = StateBuilder::new().build();
    let token = seed_session(&ctx, "d-1", "Phone");
    let err = require_perm(&ctx.state, &token, "perm_power").err().expect("denied");
    assert_eq!(err.code.http_status(), 403);
    assert_eq!(err.message, "permission_denied:perm_power");
    assert!(require_perm(&ctx.state, &token, "perm_stream").is_ok());
}
