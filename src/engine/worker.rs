// One background thread per active encode job

use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;
use uuid::Uuid;

use super::{CancelFlag, PassEvent, PassOutcome, PassRequest, run_pass};

/// Message from the job thread to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    /// A pass began executing
    PassStarted { job_id: Uuid, pass: u8, total: u8 },

    /// Progress within the current pass, 0..=100
    Progress {
        job_id: Uuid,
        pass: u8,
        pass_pct: f64,
    },

    /// Human-readable encoder output worth surfacing
    Log { job_id: Uuid, line: String },

    /// A pass ran to successful completion
    PassFinished { job_id: Uuid, pass: u8 },

    /// The job is over, one way or another; always the final message
    JobFinished { job_id: Uuid, result: JobResult },
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    /// All passes succeeded. `output` is None for analysis-only jobs.
    Completed { output: Option<PathBuf> },
    Cancelled,
    Failed { message: String },
}

/// Spawn the job thread. Passes run strictly in order; a failure or
/// cancellation short-circuits the rest. The controller enforces that at
/// most one worker exists at a time.
pub fn spawn_job(
    job_id: Uuid,
    passes: Vec<PassRequest>,
    duration_s: f64,
    output: Option<PathBuf>,
    cancel: CancelFlag,
    tx: Sender<WorkerMessage>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let total = passes.len() as u8;

        for req in passes {
            let pass = req.ordinal;
            let _ = tx.send(WorkerMessage::PassStarted {
                job_id,
                pass,
                total,
            });

            let events_tx = tx.clone();
            let result = run_pass(req, duration_s, &cancel, |event| {
                let _ = match event {
                    PassEvent::Progress(pass_pct) => events_tx.send(WorkerMessage::Progress {
                        job_id,
                        pass,
                        pass_pct,
                    }),
                    PassEvent::Log(line) => events_tx.send(WorkerMessage::Log { job_id, line }),
                };
            });

            match result {
                Ok(PassOutcome::Completed) => {
                    let _ = tx.send(WorkerMessage::PassFinished { job_id, pass });
                }
                Ok(PassOutcome::Cancelled) => {
                    let _ = tx.send(WorkerMessage::JobFinished {
                        job_id,
                        result: JobResult::Cancelled,
                    });
                    return;
                }
                Err(e) => {
                    let _ = tx.send(WorkerMessage::JobFinished {
                        job_id,
                        result: JobResult::Failed {
                            message: e.to_string(),
                        },
                    });
                    return;
                }
            }
        }

        let _ = tx.send(WorkerMessage::JobFinished {
            job_id,
            result: JobResult::Completed { output },
        });
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;

    fn pass(cmd: Command, ordinal: u8, terminal: bool) -> PassRequest {
        PassRequest {
            ordinal,
            terminal,
            cmd,
            log_step: 20.0,
        }
    }

    #[cfg(unix)]
    #[test]
    fn sequential_passes_then_completion() {
        let (tx, rx) = mpsc::channel();
        let job_id = Uuid::new_v4();

        let mut first = Command::new("sh");
        first
            .arg("-c")
            .arg("printf 'frame=1 time=00:00:05.00\\n'");
        let mut second = Command::new("sh");
        second
            .arg("-c")
            .arg("printf 'frame=2 time=00:00:10.00\\n'");

        let handle = spawn_job(
            job_id,
            vec![pass(first, 1, false), pass(second, 2, true)],
            10.0,
            Some(PathBuf::from("out.mp4")),
            Arc::new(AtomicBool::new(false)),
            tx,
        );
        handle.join().unwrap();

        let messages: Vec<WorkerMessage> = rx.iter().collect();
        let starts: Vec<u8> = messages
            .iter()
            .filter_map(|m| match m {
                WorkerMessage::PassStarted { pass, .. } => Some(*pass),
                _ => None,
            })
            .collect();
        assert_eq!(starts, vec![1, 2], "passes must run in order");

        match messages.last() {
            Some(WorkerMessage::JobFinished {
                result: JobResult::Completed { output },
                ..
            }) => assert_eq!(output.as_deref(), Some(std::path::Path::new("out.mp4"))),
            other => panic!("expected terminal JobFinished, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn pass_failure_short_circuits_remaining_passes() {
        let (tx, rx) = mpsc::channel();

        let mut failing = Command::new("sh");
        failing.arg("-c").arg("exit 2");
        let mut never_runs = Command::new("sh");
        never_runs.arg("-c").arg("printf 'frame=1 time=00:00:01.00\\n'");

        let handle = spawn_job(
            Uuid::new_v4(),
            vec![pass(failing, 1, false), pass(never_runs, 2, true)],
            10.0,
            Some(PathBuf::from("out.mp4")),
            Arc::new(AtomicBool::new(false)),
            tx,
        );
        handle.join().unwrap();

        let messages: Vec<WorkerMessage> = rx.iter().collect();
        assert!(
            !messages
                .iter()
                .any(|m| matches!(m, WorkerMessage::PassStarted { pass: 2, .. })),
            "pass 2 must not start after pass 1 fails"
        );
        match messages.last() {
            Some(WorkerMessage::JobFinished {
                result: JobResult::Failed { message },
                ..
            }) => assert!(message.contains("code 2")),
            other => panic!("expected JobFinished(Failed), got {other:?}"),
        }
    }
}
