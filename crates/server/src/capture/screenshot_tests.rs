// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::{decode_out_path, extract_out_path, percent_decode, wait_existing};

#[test]
fn decode_handles_file_urls_and_quotes() {
    assert_eq!(decode_out_path("'file:///tmp/shot.png'"), "/tmp/shot.png");
    assert_eq!(decode_out_path("\"/tmp/shot.png\""), "/tmp/shot.png");
    assert_eq!(decode_out_path("file:///tmp/with%20space.png"), "/tmp/with space.png");
    assert_eq!(decode_out_path("  "), "");
}

#[test]
fn percent_decode_passes_through_invalid_sequences() {
    assert_eq!(percent_decode("a%20b"), "a b");
    assert_eq!(percent_decode("a%2Gb"), "a%2Gb");
    assert_eq!(percent_decode("trailing%2"), "trailing%2");
}

#[test]
fn extract_prefers_existing_paths() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let real = dir.path().join("shot.png");
    std::fs::write(&real, b"png")?;
    let real_str = real.to_string_lossy();
    let text = format!("(uint32 1, '/nonexistent/a.png')\n(uint32 1, '{real_str}')");
    assert_eq!(extract_out_path(&text), real_str);
    Ok(())
}

#[test]
fn extract_falls_back_to_first_candidate() {
    let text = "('file:///not/there/shot.png',)";
    assert_eq!(extract_out_path(text), "/not/there/shot.png");
    assert_eq!(extract_out_path("no paths here"), "");
}

#[tokio::test]
async fn wait_existing_finds_file_and_times_out() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("out.png");
    std::fs::write(&file, b"data")?;
    let found = wait_existing(
        &[String::new(), file.to_string_lossy().into_owned()],
        Duration::from_millis(200),
    )
    .await;
    assert_eq!(found, Some(file));

    let missing = dir.path().join("missing.png");
    let found = wait_existing(
        &[missing.to_string_lossy().into_owned()],
        Duration::from_millis(120),
    )
    .await;
    assert_eq!(found, None);
    Ok(())
}
