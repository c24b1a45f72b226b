/// Property-based tests for the bitrate/size estimator.
///
/// The estimator is advisory but must be deterministic and respect its
/// documented floors and clamp windows for any plausible input.
use clipshrink::engine::probe::VideoMetadata;
use clipshrink::engine::{estimate_output_size, target_bitrate_kbps};
use proptest::prelude::*;

fn metadata_strategy() -> impl Strategy<Value = VideoMetadata> {
    (
        16u32..=3840,
        16u32..=2160,
        10.0f64..=120.0,
        1.0f64..=7200.0,
        prop::option::of(100u32..=100_000),
        1.0f64..=10_000.0,
    )
        .prop_map(|(width, height, fps, duration_s, bitrate_kbps, file_size_mb)| {
            VideoMetadata {
                width,
                height,
                fps,
                duration_s,
                bitrate_kbps,
                file_size_mb,
                codec: "h264".to_string(),
            }
        })
}

proptest! {
    #[test]
    fn target_bitrate_has_floor(
        size in 0.1f64..=2000.0,
        duration in 0.1f64..=100_000.0,
    ) {
        let kbps = target_bitrate_kbps(size, duration, 128).unwrap();
        prop_assert!(kbps >= 100);
    }

    #[test]
    fn target_bitrate_monotonic_in_size(
        smaller in 0.1f64..=1000.0,
        delta in 0.0f64..=1000.0,
        duration in 0.1f64..=10_000.0,
    ) {
        let lo = target_bitrate_kbps(smaller, duration, 128).unwrap();
        let hi = target_bitrate_kbps(smaller + delta, duration, 128).unwrap();
        prop_assert!(hi >= lo);
    }

    #[test]
    fn target_bitrate_antitonic_in_duration(
        size in 0.1f64..=1000.0,
        shorter in 0.1f64..=10_000.0,
        delta in 0.0f64..=10_000.0,
    ) {
        let fast = target_bitrate_kbps(size, shorter, 128).unwrap();
        let slow = target_bitrate_kbps(size, shorter + delta, 128).unwrap();
        prop_assert!(slow <= fast);
    }

    #[test]
    fn estimate_is_deterministic(
        meta in metadata_strategy(),
        crf in 1u32..=50,
        scale in 0.1f64..=2.0,
    ) {
        let a = estimate_output_size(&meta, crf, scale);
        let b = estimate_output_size(&meta, crf, scale);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn estimate_respects_floors(
        meta in metadata_strategy(),
        crf in 1u32..=50,
        scale in 0.1f64..=2.0,
    ) {
        let est = estimate_output_size(&meta, crf, scale).unwrap();
        prop_assert!(est.bitrate_kbps >= 150);
        prop_assert!(est.size_mb >= 0.1);
    }

    #[test]
    fn estimate_stays_within_clamp_window(
        meta in metadata_strategy(),
        crf in 1u32..=50,
        scale in 0.1f64..=2.0,
    ) {
        let est = estimate_output_size(&meta, crf, scale).unwrap();
        // After the sanity clamp the prediction can never stray beyond
        // 15x of the source in either direction (0.06 covers the final
        // one-decimal rounding)
        prop_assert!(est.size_mb <= meta.file_size_mb * 15.0 + 0.06);
        prop_assert!(est.size_mb + 0.06 >= meta.file_size_mb / 15.0);
    }
}

#[test]
fn end_to_end_reference_scenario() {
    // 120 s / 4000 kbps / 60 MB source shrunk to a 10 MB target:
    // (10*8*1024*1024/120)/1000 - 128 = 571 kbps, well above the floor
    let kbps = target_bitrate_kbps(10.0, 120.0, 128).unwrap();
    assert_eq!(kbps, 571);
    assert!(kbps >= 100);
}

#[test]
fn reference_clip_estimate_before_and_after_clamp() {
    let meta = VideoMetadata {
        width: 1920,
        height: 1080,
        fps: 30.0,
        duration_s: 60.0,
        bitrate_kbps: Some(6000),
        file_size_mb: 45.0,
        codec: "h264".to_string(),
    };
    let est = estimate_output_size(&meta, 28, 0.8).unwrap();

    // Inside the loose pre-clamp window...
    assert!(est.size_mb > 45.0 / 15.0 && est.size_mb < 45.0 * 15.0);
    // ...and inside the tight post-clamp window
    assert!(est.size_mb >= 45.0 * 0.15 && est.size_mb <= 45.0 * 8.0);
}
