//! Encode job controller: owns the job state machine and the first-pass
//! cache, composes pass runners into CRF or two-pass jobs, and rescales
//! per-pass progress into one overall percentage.
//!
//! `JobState` and `FirstPassCache` are mutated only here, in response to
//! validated transitions; everything else sees them read-only.

use super::command::{
    PASS_LOG_BASENAME, build_analysis_cmd, build_crf_cmd, build_second_pass_cmd,
    derive_output_path, format_cmd, pass_log_dir,
};
use super::estimate::target_bitrate_kbps;
use super::runner::{CancelFlag, PassRequest};
use super::types::{
    Codec, EncoderSettings, EncodingMode, EngineEvent, JobParams, JobState, StartError,
};
use crate::engine::probe::VideoMetadata;
use crate::engine::worker::{JobResult, WorkerMessage, spawn_job};
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Budget for the whole stop sequence: 1 s graceful + 3 s after the hard
/// kill; past this the controller detaches and resets anyway.
const STOP_WAIT: Duration = Duration::from_secs(4);

/// Validity record for two-pass analysis data. `completed` may only be
/// true for the exact (source, codec) pair the pass log was produced
/// with; any change discards the on-disk artifacts.
#[derive(Debug, Default)]
pub struct FirstPassCache {
    source: Option<PathBuf>,
    codec: Option<Codec>,
    completed: bool,
    log_dir: Option<PathBuf>,
}

impl FirstPassCache {
    pub fn completed(&self) -> bool {
        self.completed
    }

    /// Pass-log prefix usable for a terminal pass, if the cached analysis
    /// matches the given source and codec.
    pub fn valid_prefix(&self, source: &Path, codec: Codec) -> Option<PathBuf> {
        if self.completed
            && self.source.as_deref() == Some(source)
            && self.codec == Some(codec)
        {
            self.log_dir.as_ref().map(|d| d.join(PASS_LOG_BASENAME))
        } else {
            None
        }
    }

    /// Begin a new analysis generation: discard the previous artifacts and
    /// return a fresh pass-log prefix bound to (source, codec).
    fn begin(&mut self, source: &Path, codec: Codec) -> PathBuf {
        self.invalidate();
        let dir = pass_log_dir(uuid::Uuid::new_v4());
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!("could not create pass-log directory {}: {e}", dir.display());
        }
        self.source = Some(source.to_path_buf());
        self.codec = Some(codec);
        self.log_dir = Some(dir.clone());
        dir.join(PASS_LOG_BASENAME)
    }

    fn mark_completed(&mut self, source: &Path, codec: Codec) {
        if self.source.as_deref() == Some(source) && self.codec == Some(codec) {
            self.completed = true;
        }
    }

    /// Drop validity and delete the pass-log artifacts on disk.
    fn invalidate(&mut self) {
        if let Some(dir) = self.log_dir.take() {
            if let Err(e) = fs::remove_dir_all(&dir) {
                debug!("pass-log cleanup of {} failed: {e}", dir.display());
            }
        }
        self.source = None;
        self.codec = None;
        self.completed = false;
    }
}

impl Drop for FirstPassCache {
    fn drop(&mut self) {
        self.invalidate();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
    /// Priming first pass started on file selection; no output file
    Analysis,
    TwoPass { second_only: bool },
    Crf,
}

#[derive(Debug, Clone)]
struct SourceFile {
    path: PathBuf,
    meta: VideoMetadata,
}

pub struct JobController {
    settings: EncoderSettings,
    mode: EncodingMode,
    codec: Codec,
    source: Option<SourceFile>,

    state: JobState,
    cache: FirstPassCache,
    kind: JobKind,
    overall_pct: f64,

    cancel: CancelFlag,
    rx: Option<Receiver<WorkerMessage>>,
    worker: Option<JoinHandle<()>>,
}

impl JobController {
    pub fn new(settings: EncoderSettings) -> Self {
        Self {
            settings,
            mode: EncodingMode::default(),
            codec: Codec::default(),
            source: None,
            state: JobState::Idle,
            cache: FirstPassCache::default(),
            kind: JobKind::Crf,
            overall_pct: 0.0,
            cancel: Arc::new(AtomicBool::new(false)),
            rx: None,
            worker: None,
        }
    }

    pub fn mode(&self) -> EncodingMode {
        self.mode
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn overall_pct(&self) -> f64 {
        self.overall_pct
    }

    pub fn cache(&self) -> &FirstPassCache {
        &self.cache
    }

    pub fn metadata(&self) -> Option<&VideoMetadata> {
        self.source.as_ref().map(|s| &s.meta)
    }

    /// True while a worker thread exists, even if its terminal message has
    /// not been pumped yet.
    pub fn is_active(&self) -> bool {
        self.worker.is_some() || self.state.is_running()
    }

    /// Replace the selected source. Stops any active job first; a *new*
    /// path additionally discards the first-pass cache.
    pub fn set_source(
        &mut self,
        path: PathBuf,
        meta: VideoMetadata,
        events: &mut Vec<EngineEvent>,
    ) {
        self.stop_all(events);
        if self.source.as_ref().is_none_or(|s| s.path != path) {
            self.invalidate_cache(events);
        }
        self.source = Some(SourceFile { path, meta });
        self.state = JobState::Idle;
    }

    /// Change the encoding mode. Active work is stopped before the change
    /// and the first-pass cache is discarded afterwards.
    pub fn set_mode(&mut self, mode: EncodingMode, events: &mut Vec<EngineEvent>) {
        if self.mode == mode {
            return;
        }
        self.stop_all(events);
        self.mode = mode;
        self.invalidate_cache(events);
        self.state = JobState::Idle;
        events.push(EngineEvent::Log(format!(
            "encoding mode set to {}",
            mode.label()
        )));
    }

    /// Change the codec. Same stop-then-invalidate sequence as a mode
    /// change; pass-1 statistics are codec-specific.
    pub fn set_codec(&mut self, codec: Codec, events: &mut Vec<EngineEvent>) {
        if self.codec == codec {
            return;
        }
        self.stop_all(events);
        self.codec = codec;
        self.invalidate_cache(events);
        self.state = JobState::Idle;
        events.push(EngineEvent::Log(format!("codec set to {}", codec.label())));
    }

    fn invalidate_cache(&mut self, events: &mut Vec<EngineEvent>) {
        if self.cache.completed() {
            debug!("discarding stale first-pass data");
            events.push(EngineEvent::CacheInvalidated);
        }
        self.cache.invalidate();
    }

    fn guard_idle(&self) -> Result<&SourceFile, StartError> {
        if self.is_active() {
            warn!(state = ?self.state, "start rejected: a job is already active");
            return Err(StartError::Busy);
        }
        self.source.as_ref().ok_or(StartError::NoSource)
    }

    /// Start the priming analysis pass (two-pass mode only). A no-op when
    /// the cache is already valid for the current source and codec.
    pub fn start_analysis(&mut self) -> Result<(), StartError> {
        let source = self.guard_idle()?;
        if self.mode != EncodingMode::TwoPass {
            debug!("analysis skipped: CRF mode needs no first pass");
            return Ok(());
        }
        if source.meta.duration_s <= 0.0 {
            return Err(StartError::MetadataUnavailable("duration unknown"));
        }
        if self
            .cache
            .valid_prefix(&source.path, self.codec)
            .is_some()
        {
            debug!("analysis skipped: first pass already completed");
            return Ok(());
        }

        let path = source.path.clone();
        let duration = source.meta.duration_s;
        let prefix = self.cache.begin(&path, self.codec);
        let cmd = build_analysis_cmd(
            &self.settings,
            &path,
            self.settings.analysis_bitrate_kbps,
            self.codec,
            &prefix,
        );
        debug!("analysis command: {}", format_cmd(&cmd));

        self.spawn(
            vec![PassRequest {
                ordinal: 1,
                terminal: false,
                cmd,
                log_step: 20.0,
            }],
            duration,
            JobKind::Analysis,
            None,
        );
        self.state = JobState::Pass1Running;
        self.overall_pct = 0.0;
        Ok(())
    }

    /// Start an encode job in the current mode. Two-pass jobs reuse a
    /// valid first-pass cache and otherwise run both passes back to back.
    pub fn start_job(&mut self, params: JobParams) -> Result<(), StartError> {
        let source = self.guard_idle()?;
        let path = source.path.clone();
        let meta = source.meta.clone();
        let now = Local::now();
        let output = derive_output_path(&path, self.mode, self.codec, &now);

        match self.mode {
            EncodingMode::Crf => {
                let cmd = build_crf_cmd(
                    &self.settings,
                    &path,
                    params.crf,
                    params.scale,
                    self.codec,
                    &output,
                );
                debug!("crf command: {}", format_cmd(&cmd));
                self.spawn(
                    vec![PassRequest {
                        ordinal: 1,
                        terminal: true,
                        cmd,
                        log_step: 10.0,
                    }],
                    meta.duration_s,
                    JobKind::Crf,
                    Some(output),
                );
                self.state = JobState::Pass2Running;
                self.overall_pct = 0.0;
            }
            EncodingMode::TwoPass => {
                if meta.duration_s <= 0.0 {
                    return Err(StartError::MetadataUnavailable("duration unknown"));
                }
                let target = target_bitrate_kbps(
                    f64::from(params.target_size_mb),
                    meta.duration_s,
                    self.settings.audio_bitrate_kbps,
                )
                .ok_or(StartError::MetadataUnavailable("duration unknown"))?;

                if let Some(prefix) = self.cache.valid_prefix(&path, self.codec) {
                    let cmd = build_second_pass_cmd(
                        &self.settings,
                        &path,
                        target,
                        self.codec,
                        &prefix,
                        &output,
                    );
                    debug!("second pass command: {}", format_cmd(&cmd));
                    self.spawn(
                        vec![PassRequest {
                            ordinal: 2,
                            terminal: true,
                            cmd,
                            log_step: 20.0,
                        }],
                        meta.duration_s,
                        JobKind::TwoPass { second_only: true },
                        Some(output),
                    );
                    self.state = JobState::Pass2Running;
                    self.overall_pct = 50.0;
                } else {
                    let prefix = self.cache.begin(&path, self.codec);
                    let pass1 =
                        build_analysis_cmd(&self.settings, &path, target, self.codec, &prefix);
                    let pass2 = build_second_pass_cmd(
                        &self.settings,
                        &path,
                        target,
                        self.codec,
                        &prefix,
                        &output,
                    );
                    debug!(
                        "two-pass commands: {} && {}",
                        format_cmd(&pass1),
                        format_cmd(&pass2)
                    );
                    self.spawn(
                        vec![
                            PassRequest {
                                ordinal: 1,
                                terminal: false,
                                cmd: pass1,
                                log_step: 20.0,
                            },
                            PassRequest {
                                ordinal: 2,
                                terminal: true,
                                cmd: pass2,
                                log_step: 20.0,
                            },
                        ],
                        meta.duration_s,
                        JobKind::TwoPass { second_only: false },
                        Some(output),
                    );
                    self.state = JobState::Pass1Running;
                    self.overall_pct = 0.0;
                }
            }
        }
        Ok(())
    }

    fn spawn(
        &mut self,
        passes: Vec<PassRequest>,
        duration_s: f64,
        kind: JobKind,
        output: Option<PathBuf>,
    ) {
        let (tx, rx) = std::sync::mpsc::channel();
        let cancel: CancelFlag = Arc::new(AtomicBool::new(false));
        let job_id = uuid::Uuid::new_v4();

        let handle = spawn_job(job_id, passes, duration_s, output, cancel.clone(), tx);

        self.cancel = cancel;
        self.rx = Some(rx);
        self.worker = Some(handle);
        self.kind = kind;
    }

    /// Drain pending worker messages and apply state transitions. Call
    /// this from the orchestrating thread; it never blocks.
    pub fn pump(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        loop {
            let received = match self.rx.as_ref() {
                Some(rx) => rx.try_recv(),
                None => break,
            };
            match received {
                Ok(msg) => self.handle_message(msg, &mut events),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.finish_job(
                        JobResult::Failed {
                            message: "encode worker exited unexpectedly".to_string(),
                        },
                        &mut events,
                    );
                    break;
                }
            }
        }
        events
    }

    /// Stop whatever is running. Idempotent; stopping with nothing active
    /// is a no-op. Cancellation reaches the pass runner first; if the job
    /// does not wind down within [`STOP_WAIT`] the controller detaches
    /// and resets so the caller stays responsive.
    pub fn stop_all(&mut self, events: &mut Vec<EngineEvent>) {
        if self.worker.is_none() {
            return;
        }
        debug!("stop requested; cancelling active job");
        self.cancel.store(true, Ordering::SeqCst);

        let deadline = Instant::now() + STOP_WAIT;
        let mut finished = false;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let received = match self.rx.as_ref() {
                Some(rx) => rx.recv_timeout(remaining),
                None => {
                    finished = true;
                    break;
                }
            };
            match received {
                Ok(msg) => {
                    let terminal = matches!(msg, WorkerMessage::JobFinished { .. });
                    self.handle_message(msg, events);
                    if terminal {
                        finished = true;
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if !finished {
            warn!("job did not stop within {STOP_WAIT:?}; detaching");
            self.rx = None;
            self.worker = None;
            self.state = JobState::Idle;
            self.overall_pct = 0.0;
            events.push(EngineEvent::Stopped);
        }
    }

    /// Raise the overall percentage, never letting it regress within a job.
    fn raise_overall(&mut self, pct: f64, events: &mut Vec<EngineEvent>) {
        if pct > self.overall_pct {
            self.overall_pct = pct;
            events.push(EngineEvent::Progress {
                overall_pct: self.overall_pct,
            });
        }
    }

    fn handle_message(&mut self, msg: WorkerMessage, events: &mut Vec<EngineEvent>) {
        match msg {
            WorkerMessage::PassStarted { pass, total, .. } => {
                if pass == 2 {
                    self.state = JobState::Pass2Running;
                    // Pin the boundary: pass 2 starts from exactly 50
                    self.raise_overall(50.0, events);
                }
                let line = match self.kind {
                    JobKind::TwoPass { second_only: true } => {
                        "terminal pass started (reusing first-pass analysis)".to_string()
                    }
                    _ => format!("pass {pass}/{total} started"),
                };
                events.push(EngineEvent::Log(line));
            }
            WorkerMessage::Progress { pass, pass_pct, .. } => {
                let overall = match self.kind {
                    JobKind::TwoPass { .. } => {
                        if pass == 1 {
                            pass_pct * 0.5
                        } else {
                            50.0 + pass_pct * 0.5
                        }
                    }
                    JobKind::Analysis | JobKind::Crf => pass_pct,
                };
                self.raise_overall(overall, events);
            }
            WorkerMessage::Log { line, .. } => events.push(EngineEvent::Log(line)),
            WorkerMessage::PassFinished { pass, .. } => {
                if pass == 1 && self.kind != JobKind::Crf {
                    self.state = JobState::Pass1Done;
                    if let Some(source) = self.source.as_ref() {
                        self.cache.mark_completed(&source.path, self.codec);
                    }
                    events.push(EngineEvent::FirstPassDone);
                }
            }
            WorkerMessage::JobFinished { result, .. } => self.finish_job(result, events),
        }
    }

    fn finish_job(&mut self, result: JobResult, events: &mut Vec<EngineEvent>) {
        self.rx = None;
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }

        match result {
            JobResult::Completed { output } => match output {
                Some(output) => {
                    self.state = JobState::Completed;
                    events.push(EngineEvent::Completed { output });
                }
                None => {
                    // Analysis-only job; Pass1Done was already entered and
                    // the cache marked when the pass finished
                    events.push(EngineEvent::Log(
                        "first pass analysis complete; ready for the terminal pass".to_string(),
                    ));
                }
            },
            JobResult::Cancelled => {
                self.state = JobState::Idle;
                self.overall_pct = 0.0;
                events.push(EngineEvent::Stopped);
            }
            JobResult::Failed { message } => {
                self.state = JobState::Failed;
                self.overall_pct = 0.0;
                events.push(EngineEvent::Failed { message });
            }
        }
    }
}
