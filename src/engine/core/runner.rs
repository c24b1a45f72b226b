//! Pass runner: supervises exactly one encoder invocation.
//!
//! The encoder writes its status stream to stderr, delimited by carriage
//! returns, so the reader splits on both `\r` and `\n`. Cancellation is
//! cooperative: the flag is checked each loop iteration, and termination
//! escalates from SIGTERM to a hard kill. A runner never retries; that
//! decision belongs to the caller.

use super::types::{EncodeError, ProgressParser};
use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Shared cancellation flag, set by the controller and polled by the runner.
pub type CancelFlag = Arc<AtomicBool>;

/// Grace period after a termination request before escalating to kill.
const GRACEFUL_WAIT: Duration = Duration::from_secs(1);

/// Upper bound on waiting after a hard kill; past this we give up and
/// report anyway so the caller stays responsive.
const KILL_WAIT: Duration = Duration::from_secs(3);

/// Stderr lines retained for failure reporting.
const STDERR_TAIL_LINES: usize = 12;

/// One encoder invocation, ready to run.
#[derive(Debug)]
pub struct PassRequest {
    /// 1 for the analysis pass or a single-pass encode, 2 for the terminal
    /// two-pass invocation
    pub ordinal: u8,
    /// Whether this pass produces the final output file
    pub terminal: bool,
    pub cmd: Command,
    /// Coarseness of periodic progress log lines, in percent
    pub log_step: f64,
}

/// Events published while a pass runs.
#[derive(Debug, Clone, PartialEq)]
pub enum PassEvent {
    Progress(f64),
    Log(String),
}

/// How a pass ended, short of a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Completed,
    /// User-initiated stop; distinct from success and from failure
    Cancelled,
}

/// Read one status line, treating both `\r` and `\n` as terminators.
/// Returns 0 only at end of stream with nothing buffered.
fn read_status_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<usize> {
    buf.clear();
    loop {
        let (advance, done) = {
            let available = match reader.fill_buf() {
                Ok(available) => available,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if available.is_empty() {
                return Ok(buf.len());
            }
            match available.iter().position(|&b| b == b'\r' || b == b'\n') {
                Some(pos) => {
                    buf.extend_from_slice(&available[..pos]);
                    (pos + 1, true)
                }
                None => {
                    buf.extend_from_slice(available);
                    (available.len(), false)
                }
            }
        };
        reader.consume(advance);
        if done {
            // +1 so empty lines are distinguishable from end of stream
            return Ok(buf.len() + 1);
        }
    }
}

#[cfg(unix)]
fn request_graceful_stop(child: &mut Child) {
    // SAFETY: signalling a pid we spawned and still own
    let _ = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
}

#[cfg(not(unix))]
fn request_graceful_stop(child: &mut Child) {
    // No graceful signal available; the kill below is the stop
    let _ = child.kill();
}

/// Poll for exit up to `timeout`; None if the process is still alive.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {}
            Err(_) => return None,
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Graceful termination, escalating to a hard kill after [`GRACEFUL_WAIT`].
fn terminate(child: &mut Child) {
    request_graceful_stop(child);

    if wait_with_timeout(child, GRACEFUL_WAIT).is_none() {
        warn!(pid = child.id(), "encoder ignored termination; killing");
        let _ = child.kill();
        if wait_with_timeout(child, KILL_WAIT).is_none() {
            warn!(pid = child.id(), "encoder still alive after kill; giving up");
        }
    }
}

/// FFmpeg catches SIGINT/SIGQUIT/SIGTERM and exits on its own; when the
/// process does die by one of those signals, classify it as cancellation
/// rather than failure.
#[cfg(unix)]
fn exited_by_user_signal(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    matches!(status.signal(), Some(2 | 3 | 15))
}

#[cfg(not(unix))]
fn exited_by_user_signal(_status: &ExitStatus) -> bool {
    false
}

fn push_tail(tail: &mut VecDeque<String>, line: &str) {
    if tail.len() == STDERR_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line.to_string());
}

/// Run one encoder pass to completion, cancellation, or failure.
///
/// `duration_s` of 0 means unknown; progress events are then suppressed
/// and only the completion event fires.
pub fn run_pass<F>(
    mut req: PassRequest,
    duration_s: f64,
    cancel: &CancelFlag,
    mut on_event: F,
) -> Result<PassOutcome, EncodeError>
where
    F: FnMut(PassEvent),
{
    req.cmd.stdin(Stdio::null());
    req.cmd.stdout(Stdio::null());
    req.cmd.stderr(Stdio::piped());

    let mut child = req.cmd.spawn().map_err(EncodeError::Launch)?;
    debug!(pass = req.ordinal, pid = child.id(), "encoder pass spawned");

    let Some(stderr) = child.stderr.take() else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(EncodeError::Launch(io::Error::other(
            "failed to capture encoder output",
        )));
    };

    let mut reader = BufReader::new(stderr);
    let mut parser = ProgressParser::new();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut buf = Vec::new();
    let mut next_log_pct = req.log_step;
    let mut cancelled = false;

    loop {
        if cancel.load(Ordering::SeqCst) {
            cancelled = true;
            break;
        }
        let n = match read_status_line(&mut reader, &mut buf) {
            Ok(n) => n,
            // Treat a broken pipe like end of stream and classify below
            Err(_) => 0,
        };
        if n == 0 {
            break;
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        push_tail(&mut tail, line);

        if parser.parse_line(line).is_some() {
            if let Some(pct) = parser.percent(duration_s) {
                on_event(PassEvent::Progress(pct));
                if pct >= next_log_pct {
                    on_event(PassEvent::Log(format!(
                        "pass {}: {:.1}% done",
                        req.ordinal, pct
                    )));
                    while next_log_pct <= pct {
                        next_log_pct += req.log_step;
                    }
                }
            }
        } else {
            let lower = line.to_ascii_lowercase();
            if lower.contains("error") || lower.contains("warning") {
                on_event(PassEvent::Log(line.to_string()));
            }
        }
    }

    if cancelled {
        debug!(pass = req.ordinal, "cancel requested; terminating encoder");
        terminate(&mut child);
        return Ok(PassOutcome::Cancelled);
    }

    let status = child.wait().map_err(EncodeError::Supervise)?;

    if cancel.load(Ordering::SeqCst) || exited_by_user_signal(&status) {
        return Ok(PassOutcome::Cancelled);
    }

    if status.success() {
        on_event(PassEvent::Progress(100.0));
        return Ok(PassOutcome::Completed);
    }

    let code = status.code().unwrap_or(-1);
    Err(EncodeError::Exit {
        code,
        detail: tail.iter().cloned().collect::<Vec<_>>().join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn flag() -> CancelFlag {
        Arc::new(AtomicBool::new(false))
    }

    fn request(cmd: Command) -> PassRequest {
        PassRequest {
            ordinal: 1,
            terminal: true,
            cmd,
            log_step: 20.0,
        }
    }

    #[test]
    fn read_status_line_splits_on_cr_and_lf() {
        let data: &[u8] = b"frame=1 time=00:00:01.00\rframe=2 time=00:00:02.00\nlast";
        let mut reader = BufReader::new(data);
        let mut buf = Vec::new();

        assert!(read_status_line(&mut reader, &mut buf).unwrap() > 0);
        assert_eq!(buf, b"frame=1 time=00:00:01.00");
        assert!(read_status_line(&mut reader, &mut buf).unwrap() > 0);
        assert_eq!(buf, b"frame=2 time=00:00:02.00");
        assert!(read_status_line(&mut reader, &mut buf).unwrap() > 0);
        assert_eq!(buf, b"last");
        assert_eq!(read_status_line(&mut reader, &mut buf).unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn pass_succeeds_and_reports_progress() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(
            "printf 'frame=10 time=00:00:05.00 bitrate=x\\r' >&2; \
             printf 'frame=20 time=00:00:10.00 bitrate=x\\n' >&2",
        );

        let mut events = Vec::new();
        let outcome = run_pass(request(cmd), 10.0, &flag(), |e| events.push(e)).unwrap();

        assert_eq!(outcome, PassOutcome::Completed);
        let progress: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                PassEvent::Progress(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![50.0, 100.0, 100.0]);
    }

    #[cfg(unix)]
    #[test]
    fn pass_caps_progress_at_100() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("printf 'frame=1 time=00:01:00.00 bitrate=x\\n'");

        let mut max_pct: f64 = 0.0;
        run_pass(request(cmd), 10.0, &flag(), |e| {
            if let PassEvent::Progress(p) = e {
                max_pct = max_pct.max(p);
            }
        })
        .unwrap();
        assert_eq!(max_pct, 100.0);
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_a_pass_failure_with_code() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo 'Error opening input' >&2; exit 3");

        let err = run_pass(request(cmd), 0.0, &flag(), |_| {}).unwrap_err();
        match err {
            EncodeError::Exit { code, detail } => {
                assert_eq!(code, 3);
                assert!(detail.contains("Error opening input"));
            }
            other => panic!("expected Exit, got {other:?}"),
        }
    }

    #[test]
    fn missing_binary_is_a_launch_error() {
        let cmd = Command::new("definitely-not-an-encoder-binary");
        let err = run_pass(request(cmd), 0.0, &flag(), |_| {}).unwrap_err();
        assert!(matches!(err, EncodeError::Launch(_)));
    }

    #[cfg(unix)]
    #[test]
    fn cancellation_reports_cancelled_not_failure() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");

        let cancel = flag();
        cancel.store(true, Ordering::SeqCst);

        let started = Instant::now();
        let outcome = run_pass(request(cmd), 0.0, &cancel, |_| {}).unwrap();
        assert_eq!(outcome, PassOutcome::Cancelled);
        // Graceful termination, not a 5 second wait for the sleep
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
