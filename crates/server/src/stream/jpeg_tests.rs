// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use image::RgbImage;

use super::{encode_jpeg, extract_first_jpeg, jpeg_has_visible_content, resize_to_width};

fn solid_jpeg(width: u32, height: u32, value: u8) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, image::Rgb([value, value, value]));
    encode_jpeg(&img, 80).expect("encode")
}

#[test]
fn extracts_frame_between_soi_and_eoi() {
    let jpeg = solid_jpeg(16, 16, 120);
    let mut buf = b"multipart-noise".to_vec();
    buf.extend_from_slice(&jpeg);
    buf.extend_from_slice(b"trailing");
    let frame = extract_first_jpeg(&buf).expect("frame");
    assert_eq!(frame.first().copied(), Some(0xFF));
    assert_eq!(frame.get(1).copied(), Some(0xD8));
    assert_eq!(&frame[frame.len() - 2..], &[0xFF, 0xD9]);
    assert!(image::load_from_memory(&frame).is_ok());
}

#[test]
fn extract_requires_both_markers() {
    assert!(extract_first_jpeg(b"").is_none());
    assert!(extract_first_jpeg(&[0xFF, 0xD8, 0x01, 0x02]).is_none());
    assert!(extract_first_jpeg(&[0x01, 0xFF, 0xD9]).is_none());
}

#[test]
fn black_frames_are_rejected() {
    let black = solid_jpeg(32, 32, 0);
    assert!(!jpeg_has_visible_content(&black));
}

#[test]
fn lit_frames_pass_the_heuristic() {
    let gray = solid_jpeg(32, 32, 128);
    assert!(jpeg_has_visible_content(&gray));
}

#[test]
fn undecodable_input_counts_as_visible() {
    assert!(jpeg_has_visible_content(b"not a jpeg at all"));
}

#[test]
fn resize_preserves_aspect_and_skips_small_frames() {
    let img = image::DynamicImage::ImageRgb8(RgbImage::new(200, 100));
    let resized = resize_to_width(img, 100, true);
    assert_eq!((resized.width(), resized.height()), (100, 50));

    let img = image::DynamicImage::ImageRgb8(RgbImage::new(50, 30));
    let untouched = resize_to_width(img, 100, false);
    assert_eq!((untouched.width(), untouched.height()), (50, 30));
}
