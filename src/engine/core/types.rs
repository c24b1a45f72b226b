use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Encoding strategy selected by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EncodingMode {
    /// Two-pass size-targeted encoding (analysis pass + terminal pass)
    TwoPass,
    /// Single-pass quality-targeted encoding
    Crf,
}

impl Default for EncodingMode {
    fn default() -> Self {
        Self::TwoPass
    }
}

impl EncodingMode {
    /// Short label used in output filenames and log lines
    pub fn label(&self) -> &'static str {
        match self {
            Self::TwoPass => "2pass",
            Self::Crf => "crf",
        }
    }
}

/// Video codec selected independently of the encoding mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    H264,
    H265,
}

impl Default for Codec {
    fn default() -> Self {
        Self::H264
    }
}

impl Codec {
    /// FFmpeg encoder name passed to -c:v
    pub fn encoder_name(&self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::H265 => "libx265",
        }
    }

    /// Short label used in output filenames and log lines
    pub fn label(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::H265 => "h265",
        }
    }
}

/// Job state machine. Terminal states (Completed, Failed) do not block the
/// next job; the first-pass cache survives them per the cache invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Idle,
    Pass1Running,
    Pass1Done,
    Pass2Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Pass1Running | Self::Pass2Running)
    }
}

/// User-adjustable encode parameters. The controller reads the fields
/// relevant to the current mode (target size for two-pass, crf/scale for
/// CRF).
#[derive(Debug, Clone, Copy)]
pub struct JobParams {
    pub target_size_mb: u32,
    pub crf: u32,
    pub scale: f64,
}

/// Encoder invocation settings shared by all command builders.
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub ffmpeg_path: String,
    pub audio_bitrate_kbps: u32,
    /// Provisional bitrate for the priming analysis pass
    pub analysis_bitrate_kbps: u32,
    /// Extra FFmpeg arguments appended before the output, shell-style
    pub extra_args: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            audio_bitrate_kbps: 128,
            analysis_bitrate_kbps: 1000,
            extra_args: String::new(),
        }
    }
}

/// Fatal errors from one encoder pass.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The subprocess could not be started at all
    #[error("failed to launch encoder: {0}")]
    Launch(#[source] std::io::Error),

    /// The encoder ran but exited non-zero; aborts the whole job
    #[error("encoder exited with code {code}: {detail}")]
    Exit { code: i32, detail: String },

    /// I/O failure while supervising a running encoder
    #[error("error supervising encoder: {0}")]
    Supervise(#[source] std::io::Error),
}

/// Non-fatal reasons a job cannot start. The caller reselects or retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StartError {
    #[error("a job is already running")]
    Busy,
    #[error("no source file selected")]
    NoSource,
    #[error("metadata unavailable: {0}")]
    MetadataUnavailable(&'static str),
}

/// Events surfaced to the UI/CLI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Log(String),
    Progress { overall_pct: f64 },
    /// First-pass analysis finished; the terminal pass can start instantly
    FirstPassDone,
    Completed { output: std::path::PathBuf },
    Failed { message: String },
    /// Job stopped at the user's request; neutral, not an error
    Stopped,
    /// First-pass data was discarded after a source/mode/codec change
    CacheInvalidated,
}

/// Parser for the encoder's textual status stream.
///
/// FFmpeg reports position as `time=HH:MM:SS.CC` tokens on its status
/// lines; elapsed seconds are derived from the most recent token.
#[derive(Debug, Default, Clone)]
pub struct ProgressParser {
    pub elapsed_s: f64,
}

fn digit(b: u8) -> Option<u64> {
    b.is_ascii_digit().then(|| u64::from(b - b'0'))
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a single status line. Returns the elapsed seconds when the
    /// line carries a well-formed `time=` token, None otherwise (including
    /// `time=N/A` before the first frame).
    pub fn parse_line(&mut self, line: &str) -> Option<f64> {
        let start = line.find("time=")? + "time=".len();
        let rest = line.get(start..)?.as_bytes();
        if rest.len() < 11 || rest[2] != b':' || rest[5] != b':' || rest[8] != b'.' {
            return None;
        }
        let hours = digit(rest[0])? * 10 + digit(rest[1])?;
        let minutes = digit(rest[3])? * 10 + digit(rest[4])?;
        let seconds = digit(rest[6])? * 10 + digit(rest[7])?;
        let centis = digit(rest[9])? * 10 + digit(rest[10])?;

        let elapsed = (hours * 3600 + minutes * 60 + seconds) as f64 + centis as f64 / 100.0;
        self.elapsed_s = elapsed;
        Some(elapsed)
    }

    /// Percent of the pass completed, capped at 100. None when the total
    /// duration is unknown.
    pub fn percent(&self, duration_s: f64) -> Option<f64> {
        if duration_s > 0.0 {
            Some((self.elapsed_s / duration_s * 100.0).min(100.0))
        } else {
            None
        }
    }
}
