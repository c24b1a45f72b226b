// Source inspection via ffprobe

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;

/// Everything the engine needs to know about a source video. Probed once
/// per selected file and replaced wholesale on reselection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    /// Frames per second, rounded to 2 decimals
    pub fps: f64,
    /// Container duration in seconds; 0 when the probe could not tell
    pub duration_s: f64,
    /// Overall bitrate in kbps when the container reports one
    pub bitrate_kbps: Option<u32>,
    /// File size in megabytes, 2 decimals
    pub file_size_mb: f64,
    /// Source video codec name as reported by the probe
    pub codec: String,
}

/// Probe a file with ffprobe and normalize the result.
pub fn probe_metadata(ffprobe_path: &str, input: &Path) -> Result<VideoMetadata> {
    let output = Command::new(ffprobe_path)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(input)
        .output()
        .with_context(|| format!("failed to run {ffprobe_path}"))?;

    if !output.status.success() {
        anyhow::bail!(
            "ffprobe failed for {}: {}",
            input.display(),
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let json: serde_json::Value = serde_json::from_slice(&output.stdout)
        .context("failed to parse ffprobe JSON output")?;

    parse_probe_json(&json)
}

/// Extract metadata from ffprobe's JSON document.
pub fn parse_probe_json(json: &serde_json::Value) -> Result<VideoMetadata> {
    let streams = json["streams"]
        .as_array()
        .context("no streams in ffprobe output")?;
    let video = streams
        .iter()
        .find(|s| s["codec_type"] == "video")
        .context("no video stream found")?;

    let width = video["width"].as_u64().context("missing video width")? as u32;
    let height = video["height"].as_u64().context("missing video height")? as u32;

    let fps_str = video["r_frame_rate"].as_str().unwrap_or("0/1");
    let fps = parse_fraction(fps_str)
        .map(|f| (f * 100.0).round() / 100.0)
        .with_context(|| format!("could not parse framerate {fps_str:?}"))?;

    let format = &json["format"];
    let duration_s = format["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .map(|d| (d * 100.0).round() / 100.0)
        .unwrap_or(0.0);

    let file_size_mb = format["size"]
        .as_str()
        .and_then(|s| s.parse::<u64>().ok())
        .map(|bytes| (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0)
        .unwrap_or(0.0);

    let bitrate_kbps = format["bit_rate"]
        .as_str()
        .and_then(|s| s.parse::<u64>().ok())
        .map(|bps| (bps as f64 / 1000.0).round() as u32);

    let codec = video["codec_name"].as_str().unwrap_or("unknown").to_string();

    Ok(VideoMetadata {
        width,
        height,
        fps,
        duration_s,
        bitrate_kbps,
        file_size_mb,
        codec,
    })
}

/// Parse a fraction string like "30000/1001" to f64.
fn parse_fraction(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let numerator: f64 = num.parse().ok()?;
    let denominator: f64 = den.parse().ok()?;
    if denominator == 0.0 {
        return None;
    }
    Some(numerator / denominator)
}

fn version_first_line(binary: &str) -> Result<String> {
    let output = Command::new(binary)
        .arg("-version")
        .output()
        .with_context(|| format!("failed to run {binary}"))?;
    if !output.status.success() {
        anyhow::bail!("{binary} -version exited with status {}", output.status);
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or("").to_string())
}

/// First line of `ffmpeg -version`, as a health check.
pub fn ffmpeg_version(ffmpeg_path: &str) -> Result<String> {
    version_first_line(ffmpeg_path)
}

/// First line of `ffprobe -version`, as a health check.
pub fn ffprobe_version(ffprobe_path: &str) -> Result<String> {
    version_first_line(ffprobe_path)
}
