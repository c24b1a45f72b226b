// Global configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub defaults: DefaultsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// FFmpeg binary; resolved via PATH when not absolute
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// FFprobe binary; resolved via PATH when not absolute
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default target size for two-pass jobs (MB)
    #[serde(default = "default_target_size_mb")]
    pub target_size_mb: u32,

    /// Default CRF value for quality-targeted jobs
    #[serde(default = "default_crf")]
    pub crf: u32,

    /// Default resolution scale factor for CRF jobs
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Audio bitrate used by the terminal pass and the size math (kbps)
    #[serde(default = "default_audio_bitrate_kbps")]
    pub audio_bitrate_kbps: u32,

    /// Provisional video bitrate for the priming analysis pass (kbps)
    #[serde(default = "default_analysis_bitrate_kbps")]
    pub analysis_bitrate_kbps: u32,

    /// Start the first pass automatically when a source is selected in
    /// two-pass mode
    #[serde(default = "default_true_config")]
    pub auto_analyze: bool,

    /// Extra FFmpeg arguments appended to every encode command
    #[serde(default)]
    pub extra_args: String,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_target_size_mb() -> u32 {
    9
}

fn default_crf() -> u32 {
    28
}

fn default_scale() -> f64 {
    0.8
}

fn default_audio_bitrate_kbps() -> u32 {
    128
}

fn default_analysis_bitrate_kbps() -> u32 {
    1000
}

fn default_true_config() -> bool {
    true
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            target_size_mb: default_target_size_mb(),
            crf: default_crf(),
            scale: default_scale(),
            audio_bitrate_kbps: default_audio_bitrate_kbps(),
            analysis_bitrate_kbps: default_analysis_bitrate_kbps(),
            auto_analyze: true,
            extra_args: String::new(),
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "macos") {
            dirs::home_dir()
                .context("Could not determine home directory")?
                .join(".config")
                .join("clipshrink")
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("clipshrink")
        };

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from disk, or fall back to defaults if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let contents = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;

            let config: Config = toml::from_str(&contents).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?;

            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Check if config file exists
    pub fn exists() -> bool {
        Self::config_path().map(|p| p.exists()).unwrap_or(false)
    }

    /// Create a default config file if it doesn't exist
    pub fn ensure_default() -> Result<()> {
        if !Self::exists() {
            let config = Config::default();
            config.save()?;
        }
        Ok(())
    }
}
