//! FFmpeg command construction.
//!
//! Argument order matters: the encoder locates its two-pass statistics via
//! the `-pass`/`-passlogfile` pair, and the output path must come last.

use super::types::{Codec, EncoderSettings, EncodingMode};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::process::Command;
use uuid::Uuid;

/// Basename of the pass-log files inside a cache directory. FFmpeg appends
/// its own suffixes (-0.log, -0.log.mbtree).
pub const PASS_LOG_BASENAME: &str = "ffmpeg2pass";

fn null_output_target() -> &'static str {
    if cfg!(windows) { "NUL" } else { "/dev/null" }
}

/// Apply additional user-provided FFmpeg arguments to the command.
/// Uses shell-style parsing so quoted strings with spaces are preserved.
fn apply_extra_args(cmd: &mut Command, extra_args: &str) {
    if extra_args.is_empty() {
        return;
    }

    if let Some(args) = shlex::split(extra_args) {
        for arg in args {
            cmd.arg(arg);
        }
    } else {
        // Unbalanced quotes; fall back to whitespace splitting
        for arg in extra_args.split_whitespace() {
            cmd.arg(arg);
        }
    }
}

/// Directory holding one generation of first-pass statistics. A fresh id is
/// used per analysis run so stale logs can be discarded wholesale.
pub fn pass_log_dir(id: Uuid) -> PathBuf {
    std::env::temp_dir()
        .join("clipshrink_2pass")
        .join(id.to_string())
}

/// Derive the terminal output path from the source filename, a timestamp,
/// the mode, and the codec. Timestamped names cannot collide across
/// repeated runs in one session.
pub fn derive_output_path(
    input: &Path,
    mode: EncodingMode,
    codec: Codec,
    at: &DateTime<Local>,
) -> PathBuf {
    let dir = input.parent().unwrap_or_else(|| Path::new("."));
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");

    dir.join(format!(
        "{}.{}.{}-{}.mp4",
        stem,
        at.format("%Y%m%d-%H%M%S"),
        mode.label(),
        codec.label(),
    ))
}

/// Analysis pass: collects statistics, writes no playable output.
pub fn build_analysis_cmd(
    settings: &EncoderSettings,
    input: &Path,
    bitrate_kbps: u32,
    codec: Codec,
    passlog_prefix: &Path,
) -> Command {
    let mut cmd = Command::new(&settings.ffmpeg_path);

    cmd.arg("-y");
    cmd.arg("-i").arg(input);
    cmd.arg("-c:v").arg(codec.encoder_name());
    cmd.arg("-b:v").arg(format!("{}k", bitrate_kbps));
    cmd.arg("-pass").arg("1");
    cmd.arg("-passlogfile").arg(passlog_prefix);
    apply_extra_args(&mut cmd, &settings.extra_args);
    cmd.arg("-f").arg("null");
    cmd.arg(null_output_target());

    cmd
}

/// Terminal two-pass invocation: consumes the pass log and writes the
/// final output with transcoded audio.
pub fn build_second_pass_cmd(
    settings: &EncoderSettings,
    input: &Path,
    bitrate_kbps: u32,
    codec: Codec,
    passlog_prefix: &Path,
    output: &Path,
) -> Command {
    let mut cmd = Command::new(&settings.ffmpeg_path);

    cmd.arg("-y");
    cmd.arg("-i").arg(input);
    cmd.arg("-c:v").arg(codec.encoder_name());
    cmd.arg("-b:v").arg(format!("{}k", bitrate_kbps));
    cmd.arg("-pass").arg("2");
    cmd.arg("-passlogfile").arg(passlog_prefix);
    cmd.arg("-c:a").arg("aac");
    cmd.arg("-b:a")
        .arg(format!("{}k", settings.audio_bitrate_kbps));
    apply_extra_args(&mut cmd, &settings.extra_args);
    cmd.arg(output);

    cmd
}

/// Single CRF pass: quality-targeted, audio copied through. The scale
/// filter truncates to even dimensions as the encoders require.
pub fn build_crf_cmd(
    settings: &EncoderSettings,
    input: &Path,
    crf: u32,
    scale: f64,
    codec: Codec,
    output: &Path,
) -> Command {
    let mut cmd = Command::new(&settings.ffmpeg_path);

    cmd.arg("-i").arg(input);
    cmd.arg("-c:v").arg(codec.encoder_name());
    cmd.arg("-crf").arg(crf.to_string());
    cmd.arg("-vf")
        .arg(format!("scale=trunc(iw*{scale}/2)*2:trunc(ih*{scale}/2)*2"));
    cmd.arg("-c:a").arg("copy");
    apply_extra_args(&mut cmd, &settings.extra_args);
    cmd.arg(output);

    cmd
}

/// Format a command as a shell-ish string for display and debug logs.
pub fn format_cmd(cmd: &Command) -> String {
    format!(
        "{} {}",
        cmd.get_program().to_string_lossy(),
        cmd.get_args()
            .map(|arg| {
                let s = arg.to_string_lossy();
                if s.contains(' ') {
                    format!("\"{}\"", s)
                } else {
                    s.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn settings() -> EncoderSettings {
        EncoderSettings::default()
    }

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn output_path_embeds_stem_timestamp_mode_codec() {
        let path = derive_output_path(
            Path::new("/videos/clip one.mov"),
            EncodingMode::TwoPass,
            Codec::H264,
            &fixed_time(),
        );
        assert_eq!(
            path,
            PathBuf::from("/videos/clip one.20250314-092653.2pass-h264.mp4")
        );

        let crf = derive_output_path(
            Path::new("/videos/clip one.mov"),
            EncodingMode::Crf,
            Codec::H265,
            &fixed_time(),
        );
        assert_eq!(
            crf,
            PathBuf::from("/videos/clip one.20250314-092653.crf-h265.mp4")
        );
    }

    #[test]
    fn output_paths_differ_per_timestamp() {
        let a = derive_output_path(
            Path::new("v.mp4"),
            EncodingMode::Crf,
            Codec::H264,
            &fixed_time(),
        );
        let later = Local.with_ymd_and_hms(2025, 3, 14, 9, 26, 54).unwrap();
        let b = derive_output_path(Path::new("v.mp4"), EncodingMode::Crf, Codec::H264, &later);
        assert_ne!(a, b);
    }

    #[test]
    fn analysis_cmd_shape() {
        let cmd = build_analysis_cmd(
            &settings(),
            Path::new("in.mp4"),
            1000,
            Codec::H264,
            Path::new("/tmp/prefix/ffmpeg2pass"),
        );
        let full = format_cmd(&cmd);

        assert!(full.starts_with("ffmpeg -y -i in.mp4 -c:v libx264 -b:v 1000k -pass 1"));
        assert!(full.contains("-passlogfile /tmp/prefix/ffmpeg2pass"));
        assert!(full.ends_with(&format!("-f null {}", null_output_target())));
        // Analysis never writes a playable output
        assert!(!full.contains("-c:a"));
    }

    #[test]
    fn second_pass_cmd_shape() {
        let cmd = build_second_pass_cmd(
            &settings(),
            Path::new("in.mp4"),
            571,
            Codec::H265,
            Path::new("/tmp/prefix/ffmpeg2pass"),
            Path::new("out.mp4"),
        );
        let full = format_cmd(&cmd);

        assert!(full.starts_with("ffmpeg -y -i in.mp4 -c:v libx265 -b:v 571k -pass 2"));
        assert!(full.contains("-c:a aac -b:a 128k"));
        assert!(full.ends_with("out.mp4"));
    }

    #[test]
    fn crf_cmd_shape() {
        let cmd = build_crf_cmd(
            &settings(),
            Path::new("in.mp4"),
            28,
            0.8,
            Codec::H264,
            Path::new("out.mp4"),
        );
        let full = format_cmd(&cmd);

        // No -y here: timestamped outputs never collide
        assert!(full.starts_with("ffmpeg -i in.mp4 -c:v libx264 -crf 28"));
        assert!(full.contains("-vf scale=trunc(iw*0.8/2)*2:trunc(ih*0.8/2)*2"));
        assert!(full.contains("-c:a copy"));
        assert!(full.ends_with("out.mp4"));
    }

    #[test]
    fn extra_args_are_appended_before_output() {
        let mut settings = settings();
        settings.extra_args = "-preset fast -metadata title=\"my clip\"".to_string();

        let cmd = build_crf_cmd(
            &settings,
            Path::new("in.mp4"),
            28,
            1.0,
            Codec::H264,
            Path::new("out.mp4"),
        );
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();

        let preset = args.iter().position(|a| a == "-preset").expect("-preset");
        assert_eq!(args[preset + 1], "fast");
        assert!(args.contains(&"title=my clip".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }
}
