// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{random_pairing_code, PairingState, QrTokenStore};

#[test]
fn random_code_is_four_digits() {
    for _ in 0..64 {
        let code = random_pairing_code();
        assert_eq!(code.len(), 4);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }
}

#[test]
fn initial_code_is_kept_when_configured() {
    let pairing = PairingState::new("1234", 0, false, 100.0);
    assert_eq!(pairing.code(), "1234");
    assert!(!pairing.is_expired(1e12));
}

#[test]
fn empty_initial_code_generates_one() {
    let pairing = PairingState::new("", 0, false, 100.0);
    assert_eq!(pairing.code().len(), 4);
}

#[test]
fn rotate_replaces_code_and_refreshes_expiry() {
    let pairing = PairingState::new("1234", 60, true, 100.0);
    let code = pairing.rotate(200.0);
    let meta = pairing.meta(200.0);
    assert_eq!(meta.pairing_code, code);
    assert_eq!(meta.pairing_expires_at, Some(260.0));
    assert_eq!(meta.pairing_expires_in_s, Some(60));
    assert_eq!(meta.pairing_ttl_s, 60);
    assert!(meta.pairing_single_use);
}

#[test]
fn zero_ttl_means_no_expiry() {
    let pairing = PairingState::new("1234", 0, false, 100.0);
    let meta = pairing.meta(100.0);
    assert_eq!(meta.pairing_expires_at, None);
    assert_eq!(meta.pairing_expires_in_s, None);
    pairing.rotate(100.0);
    assert_eq!(pairing.meta(100.0).pairing_expires_at, None);
}

#[test]
fn ttl_expiry_is_observed() {
    let pairing = PairingState::new("1234", 30, false, 100.0);
    assert!(!pairing.is_expired(129.0));
    assert!(pairing.is_expired(131.0));
}

#[test]
fn qr_token_consumes_exactly_once() {
    let store = QrTokenStore::new(180);
    let token = store.issue(100.0);
    assert!(store.consume(&token, 101.0));
    assert!(!store.consume(&token, 101.0));
}

#[test]
fn qr_token_expires() {
    let store = QrTokenStore::new(180);
    let token = store.issue(100.0);
    assert!(!store.consume(&token, 100.0 + 181.0));
}

#[test]
fn qr_tokens_are_independent() {
    let store = QrTokenStore::new(180);
    let a = store.issue(100.0);
    let b = store.issue(100.0);
    assert_ne!(a, b);
    assert!(store.consume(&a, 101.0));
    assert!(store.consume(&b, 101.0));
    assert_eq!(store.pending(101.0), 0);
}
