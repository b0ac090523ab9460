// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{find_free_port, get_local_ip, is_loopback_host};

#[test]
fn local_ip_parses_as_ipv4() {
    let ip = get_local_ip();
    assert!(ip.parse::<std::net::Ipv4Addr>().is_ok(), "unexpected ip {ip}");
}

#[test]
fn free_port_is_bindable() -> anyhow::Result<()> {
    let port = find_free_port()?;
    assert!(port > 0);
    Ok(())
}

#[test]
fn loopback_detection() {
    assert!(is_loopback_host("localhost"));
    assert!(is_loopback_host("LOCALHOST"));
    assert!(is_loopback_host("127.0.0.1"));
    assert!(is_loopback_host("127.8.8.8"));
    assert!(is_loopback_host("::1"));
    assert!(is_loopback_host("::ffff:127.0.0.1"));
    assert!(!is_loopback_host("192.168.1.10"));
    assert!(!is_loopback_host("example.com"));
    assert!(!is_loopback_host(""));
    assert!(!is_loopback_host("::ffff:10.0.0.1"));
}
