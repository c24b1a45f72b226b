//! Pure bitrate/size estimation.
//!
//! The constants here come from a tuned empirical model; the estimate is
//! advisory only, so failures are reported as None rather than errors.

use crate::engine::probe::VideoMetadata;

/// Audio bitrate assumed by the size model (kbps).
const AUDIO_BITRATE_KBPS: f64 = 128.0;

/// Container overhead applied to the raw stream size.
const CONTAINER_OVERHEAD: f64 = 1.02;

/// Video bitrate needed to hit a target file size, after reserving audio
/// bandwidth. Returns None when the duration is unknown or non-positive.
/// Floor of 100 kbps is always enforced.
pub fn target_bitrate_kbps(
    target_size_mb: f64,
    duration_s: f64,
    audio_bitrate_kbps: u32,
) -> Option<u32> {
    if duration_s <= 0.0 {
        return None;
    }

    let target_size_bits = target_size_mb * 8.0 * 1024.0 * 1024.0;
    let total_kbps = (target_size_bits / duration_s) / 1000.0;
    let video_kbps = total_kbps - f64::from(audio_bitrate_kbps);

    Some((video_kbps.trunc() as i64).max(100) as u32)
}

/// Predicted CRF-encode output.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeEstimate {
    pub bitrate_kbps: u32,
    pub size_mb: f64,
    pub new_width: u32,
    pub new_height: u32,
    pub pixel_ratio: f64,
    pub quality_factor: f64,
}

/// Quality factor for a CRF value, piecewise-linear with a 0.05 floor.
fn quality_factor(crf: u32) -> f64 {
    let crf = crf as f64;
    let factor = if crf <= 18.0 {
        0.65 - (crf - 15.0) * 0.03
    } else if crf <= 23.0 {
        0.65 - (crf - 18.0) * 0.05
    } else if crf <= 28.0 {
        0.40 - (crf - 23.0) * 0.035
    } else if crf <= 35.0 {
        0.225 - (crf - 28.0) * 0.02
    } else {
        0.085 - (crf - 35.0) * 0.008
    };
    factor.max(0.05)
}

/// Resolution-tiered base rate (kbps per million pixels per second) when
/// the source bitrate is unknown.
fn bitrate_per_mpps(pixels: u32) -> f64 {
    if pixels <= 720 * 480 {
        0.8
    } else if pixels <= 1280 * 720 {
        0.6
    } else if pixels <= 1920 * 1080 {
        0.5
    } else {
        0.4
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Estimate the output bitrate and file size of a CRF encode.
///
/// Deterministic: identical inputs always produce identical outputs. The
/// correction steps are applied in a fixed order and must not be
/// reordered; the final numbers are calibrated against real encodes.
pub fn estimate_output_size(
    meta: &VideoMetadata,
    crf: u32,
    scale_factor: f64,
) -> Option<SizeEstimate> {
    let (width, height) = (meta.width, meta.height);
    let fps = meta.fps;
    let duration = meta.duration_s;

    if width == 0 || height == 0 || fps == 0.0 || duration == 0.0 {
        return None;
    }

    let new_width = (f64::from(width) * scale_factor) as u32;
    let new_height = (f64::from(height) * scale_factor) as u32;
    let pixel_ratio =
        f64::from(new_width * new_height) / f64::from(width) / f64::from(height);

    let quality = quality_factor(crf);

    // Source bitrate anchors the estimate when known; otherwise fall back
    // to a resolution/framerate model.
    let mut base_bitrate = match meta.bitrate_kbps {
        Some(orig) if orig > 0 => f64::from(orig) * quality * pixel_ratio,
        _ => {
            let pixels_per_second = f64::from(new_width * new_height) * fps;
            (pixels_per_second / 1_000_000.0)
                * bitrate_per_mpps(new_width * new_height)
                * 1000.0
                * quality
        }
    };

    // Framerate correction, 30 fps baseline.
    let fps_factor = (fps / 30.0).clamp(0.7, 1.5);
    base_bitrate *= fps_factor;

    // Short clips compress less efficiently.
    let duration_factor = if duration < 30.0 {
        1.15
    } else if duration < 120.0 {
        1.08
    } else {
        1.0
    };
    base_bitrate *= duration_factor;

    // Upscaling costs extra bits.
    if scale_factor > 1.0 {
        base_bitrate *= 1.0 + (scale_factor - 1.0) * 0.1;
    }

    let mut estimated_bitrate = base_bitrate.max(100.0);

    let total_bitrate = estimated_bitrate + AUDIO_BITRATE_KBPS;
    let mut estimated_size = (total_bitrate * duration * CONTAINER_OVERHEAD) / (8.0 * 1024.0);

    // Sanity clamp against the source size. The outer 15x range decides
    // whether to clamp; the clamped value uses the tighter 8x / 0.15x
    // factors. Both thresholds are deliberate; do not merge them.
    if meta.file_size_mb > 0.0 {
        let size_ratio = estimated_size / meta.file_size_mb;
        if size_ratio > 15.0 {
            estimated_size = meta.file_size_mb * 8.0;
            estimated_bitrate = (estimated_size * 8.0 * 1024.0) / duration - AUDIO_BITRATE_KBPS;
        } else if size_ratio < 1.0 / 15.0 {
            estimated_size = meta.file_size_mb * 0.15;
            estimated_bitrate = (estimated_size * 8.0 * 1024.0) / duration - AUDIO_BITRATE_KBPS;
        }
    }

    Some(SizeEstimate {
        bitrate_kbps: estimated_bitrate.max(150.0).round() as u32,
        size_mb: round1(estimated_size.max(0.1)),
        new_width,
        new_height,
        pixel_ratio: round2(pixel_ratio),
        quality_factor: round2(quality),
    })
}
