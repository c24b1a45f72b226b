use clap::{Parser, Subcommand};
use clipshrink::engine::{Codec, EncodingMode};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "clipshrink")]
#[command(about = "Shrink video clips with FFmpeg: CRF or size-targeted two-pass", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that ffmpeg and ffprobe are installed and runnable
    CheckFfmpeg,

    /// Probe a video file and print its metadata
    Probe {
        /// Path to the video file
        file: PathBuf,
    },

    /// Predict output bitrate/size without encoding anything
    Estimate {
        /// Path to the video file
        file: PathBuf,

        /// CRF value for the size prediction
        #[arg(long)]
        crf: Option<u32>,

        /// Resolution scale factor (0.1 - 1.0 typical)
        #[arg(long)]
        scale: Option<f64>,

        /// Target size in MB for the bitrate prediction
        #[arg(long)]
        target_size: Option<u32>,
    },

    /// Encode a clip and stream progress to the terminal
    Encode {
        /// Path to the video file
        file: PathBuf,

        /// Encoding strategy
        #[arg(long, value_enum, default_value_t = EncodingMode::TwoPass)]
        mode: EncodingMode,

        /// Video codec
        #[arg(long, value_enum, default_value_t = Codec::H264)]
        codec: Codec,

        /// Target size in MB (two-pass mode)
        #[arg(long)]
        target_size: Option<u32>,

        /// CRF value (crf mode)
        #[arg(long)]
        crf: Option<u32>,

        /// Resolution scale factor (crf mode)
        #[arg(long)]
        scale: Option<f64>,
    },

    /// Write a default config file if none exists
    InitConfig,
}
