// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JPEG frame helpers shared by the capture backends and the subprocess
//! first-chunk gate.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ExtendedColorType, GenericImageView};

/// Extract the first complete JPEG frame (`SOI..EOI`) from a raw buffer.
pub fn extract_first_jpeg(raw: &[u8]) -> Option<Vec<u8>> {
    let soi = find_marker(raw, &[0xFF, 0xD8], 0)?;
    let eoi = find_marker(raw, &[0xFF, 0xD9], soi + 2)?;
    Some(raw[soi..eoi + 2].to_vec())
}

fn find_marker(raw: &[u8], marker: &[u8; 2], from: usize) -> Option<usize> {
    if raw.len() < from + 2 {
        return None;
    }
    raw[from..].windows(2).position(|w| w == marker).map(|pos| pos + from)
}

/// Reject near-black or near-constant frames as broken capture output.
///
/// A frame counts as visible when its luminance mean is at least 3 or its
/// luminance range at least 4. Undecodable input is treated as visible so
/// a decoder gap never blocks a stream.
pub fn jpeg_has_visible_content(raw: &[u8]) -> bool {
    let Ok(img) = image::load_from_memory(raw) else {
        return true;
    };
    let luma = img.to_luma8();
    if luma.is_empty() {
        return true;
    }
    let mut min = u8::MAX;
    let mut max = u8::MIN;
    let mut sum: u64 = 0;
    for pixel in luma.pixels() {
        let v = pixel.0[0];
        min = min.min(v);
        max = max.max(v);
        sum += u64::from(v);
    }
    let mean = sum as f64 / luma.len() as f64;
    mean >= 3.0 || (max - min) >= 4
}

/// Encode an RGB image as JPEG at the given quality (clamped to 10..95).
pub fn encode_jpeg(img: &image::RgbImage, quality: u8) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(10, 95));
    encoder
        .encode(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)
        .ok()?;
    Some(out)
}

/// Downscale `img` to at most `max_w` wide, preserving aspect ratio.
/// `fast` selects a cheaper resample filter for high frame rates.
pub fn resize_to_width(img: DynamicImage, max_w: u32, fast: bool) -> DynamicImage {
    let (w, h) = img.dimensions();
    if max_w == 0 || w <= max_w {
        return img;
    }
    let new_h = ((h as u64 * max_w as u64) / w as u64).max(1) as u32;
    let filter =
        if fast { image::imageops::FilterType::Triangle } else { image::imageops::FilterType::Lanczos3 };
    img.resize_exact(max_w, new_h, filter)
}

#[cfg(test)]
#[path = "jpeg_tests.rs"]
mod tests;
