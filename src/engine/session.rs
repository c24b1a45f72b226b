//! Session facade: the surface the UI/CLI layer talks to.
//!
//! Wires the probe, the estimator, and the job controller together and
//! keeps session-only statistics. Nothing here is persisted.

use crate::config::Config;
use crate::engine::core::{
    Codec, EncodingMode, EngineEvent, EncoderSettings, JobController, JobParams, JobState,
    SizeEstimate, StartError, estimate_output_size, target_bitrate_kbps,
};
use crate::engine::probe::{self, VideoMetadata};
use anyhow::Result;
use std::fs;
use std::path::Path;

/// Counters for the current session only; discarded on exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub input_mb: f64,
    pub output_mb: f64,
}

impl SessionStats {
    pub fn space_saved_mb(&self) -> f64 {
        self.input_mb - self.output_mb
    }
}

pub struct Session {
    config: Config,
    controller: JobController,
    stats: SessionStats,
}

impl Session {
    pub fn new(config: Config) -> Self {
        let settings = EncoderSettings {
            ffmpeg_path: config.tools.ffmpeg_path.clone(),
            audio_bitrate_kbps: config.defaults.audio_bitrate_kbps,
            analysis_bitrate_kbps: config.defaults.analysis_bitrate_kbps,
            extra_args: config.defaults.extra_args.clone(),
        };
        Self {
            controller: JobController::new(settings),
            config,
            stats: SessionStats::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> JobState {
        self.controller.state()
    }

    pub fn mode(&self) -> EncodingMode {
        self.controller.mode()
    }

    pub fn codec(&self) -> Codec {
        self.controller.codec()
    }

    pub fn overall_pct(&self) -> f64 {
        self.controller.overall_pct()
    }

    pub fn metadata(&self) -> Option<&VideoMetadata> {
        self.controller.metadata()
    }

    pub fn first_pass_ready(&self) -> bool {
        self.controller.cache().completed()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Probe a file and make it the current source. In two-pass mode the
    /// priming analysis pass starts immediately when configured to.
    pub fn select_source(&mut self, input: &Path) -> Result<Vec<EngineEvent>> {
        let meta = probe::probe_metadata(&self.config.tools.ffprobe_path, input)?;
        let mut events = Vec::new();
        events.push(EngineEvent::Log(format!(
            "selected {}: {}x{} {}fps {:.2}s {} MB",
            input.display(),
            meta.width,
            meta.height,
            meta.fps,
            meta.duration_s,
            meta.file_size_mb,
        )));
        self.controller.set_source(input.to_path_buf(), meta, &mut events);

        if self.controller.mode() == EncodingMode::TwoPass && self.config.defaults.auto_analyze {
            match self.controller.start_analysis() {
                Ok(()) => {}
                Err(e) => events.push(EngineEvent::Log(format!("analysis not started: {e}"))),
            }
        }
        Ok(events)
    }

    /// Start an encode job. Mode and codec are applied first (a no-op when
    /// unchanged); the request is rejected outright while a job is active.
    pub fn start_job(
        &mut self,
        mode: EncodingMode,
        codec: Codec,
        params: JobParams,
    ) -> Result<Vec<EngineEvent>, StartError> {
        if self.controller.is_active() {
            return Err(StartError::Busy);
        }
        let mut events = Vec::new();
        self.controller.set_mode(mode, &mut events);
        self.controller.set_codec(codec, &mut events);
        self.controller.start_job(params)?;
        Ok(events)
    }

    /// Stop whatever is running; safe to call at any time.
    pub fn stop_all(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        self.controller.stop_all(&mut events);
        events
    }

    /// Switch the encoding mode. Stops active work and discards first-pass
    /// data; in two-pass mode the priming analysis restarts automatically
    /// when a source is present.
    pub fn set_mode(&mut self, mode: EncodingMode) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        self.controller.set_mode(mode, &mut events);

        if mode == EncodingMode::TwoPass
            && self.config.defaults.auto_analyze
            && self.controller.metadata().is_some()
        {
            match self.controller.start_analysis() {
                Ok(()) => {}
                Err(e) => events.push(EngineEvent::Log(format!("analysis not started: {e}"))),
            }
        }
        events
    }

    /// Switch the codec. Stops active work and discards first-pass data.
    pub fn set_codec(&mut self, codec: Codec) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        self.controller.set_codec(codec, &mut events);
        events
    }

    /// Drain pending engine events, folding completions into the session
    /// statistics.
    pub fn poll(&mut self) -> Vec<EngineEvent> {
        let events = self.controller.pump();
        for event in &events {
            match event {
                EngineEvent::Completed { output } => {
                    self.stats.jobs_completed += 1;
                    if let Some(meta) = self.controller.metadata() {
                        self.stats.input_mb += meta.file_size_mb;
                    }
                    if let Ok(out_meta) = fs::metadata(output) {
                        self.stats.output_mb +=
                            (out_meta.len() as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0;
                    }
                }
                EngineEvent::Failed { .. } => {
                    self.stats.jobs_failed += 1;
                }
                _ => {}
            }
        }
        events
    }

    /// Advisory size prediction for a CRF encode of the current source.
    pub fn estimate_size(&self, crf: u32, scale: f64) -> Option<SizeEstimate> {
        self.metadata()
            .and_then(|meta| estimate_output_size(meta, crf, scale))
    }

    /// Advisory bitrate needed to hit a target size for the current source.
    pub fn estimate_bitrate(&self, target_size_mb: u32) -> Option<u32> {
        self.metadata().and_then(|meta| {
            target_bitrate_kbps(
                f64::from(target_size_mb),
                meta.duration_s,
                self.config.defaults.audio_bitrate_kbps,
            )
        })
    }
}
