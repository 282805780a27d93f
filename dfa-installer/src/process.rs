//! Child processes with streamed output and an optional deadline.

use std::io::{self, BufRead, BufReader, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::deploy::OutputStream;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long output may keep arriving once the child has exited.
///
/// Anything the child left running in the background inherits its pipes and
/// can keep them open indefinitely.
pub(crate) const DRAIN_GRACE: Duration = Duration::from_secs(2);

enum Message {
    Line(OutputStream, String),
    Closed,
}

/// Run `command`, forwarding each output line to `on_line` as it arrives.
///
/// Returns `None` when `timeout` expired and the child was killed. Readers
/// still blocked on inherited pipes after [`DRAIN_GRACE`] are left behind.
pub(crate) fn run_streaming(
    command: &mut Command,
    timeout: Option<Duration>,
    on_line: &mut dyn FnMut(OutputStream, &str),
) -> io::Result<Option<ExitStatus>> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let (tx, rx) = mpsc::channel();
    let mut open = 0;
    if let Some(out) = child.stdout.take() {
        spawn_reader(out, OutputStream::Stdout, tx.clone());
        open += 1;
    }
    if let Some(err) = child.stderr.take() {
        spawn_reader(err, OutputStream::Stderr, tx.clone());
        open += 1;
    }
    drop(tx);

    let started = Instant::now();
    let mut exited: Option<(Option<ExitStatus>, Instant)> = None;
    loop {
        if exited.is_none() {
            if let Some(status) = child.try_wait()? {
                exited = Some((Some(status), Instant::now()));
            } else if timeout.is_some_and(|limit| started.elapsed() >= limit) {
                debug!(pid = child.id(), "Deadline passed, killing child");
                if let Err(e) = child.kill() {
                    warn!(pid = child.id(), error = %e, "Cannot kill child");
                }
                child.wait()?;
                exited = Some((None, Instant::now()));
            }
        }

        let wait = match exited {
            Some((status, _)) if open == 0 => return Ok(status),
            Some((status, at)) => {
                let left = DRAIN_GRACE.saturating_sub(at.elapsed());
                if left.is_zero() {
                    warn!(open, "Output still held open after exit, not waiting for it");
                    return Ok(status);
                }
                left.min(POLL_INTERVAL)
            }
            None => POLL_INTERVAL,
        };

        if open == 0 {
            thread::sleep(wait);
            continue;
        }
        match rx.recv_timeout(wait) {
            Ok(Message::Line(kind, line)) => on_line(kind, &line),
            Ok(Message::Closed) => open -= 1,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => open = 0,
        }
    }
}

fn spawn_reader(stream: impl Read + Send + 'static, kind: OutputStream, tx: Sender<Message>) {
    thread::spawn(move || {
        for line in BufReader::new(stream).split(b'\n') {
            match line {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    let line = text.trim_end_matches('\r').to_string();
                    if tx.send(Message::Line(kind, line)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!(stream = ?kind, error = %e, "Stopped reading child output");
                    break;
                }
            }
        }
        let _ = tx.send(Message::Closed);
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[test]
    fn test_collects_both_streams() {
        let mut lines = Vec::new();
        let status = run_streaming(
            &mut sh("echo out; echo err >&2; printf 'crlf\\r\\n'"),
            None,
            &mut |kind, line| lines.push((kind, line.to_string())),
        )
        .unwrap();

        assert!(status.unwrap().success());
        assert!(lines.contains(&(OutputStream::Stdout, "out".to_string())));
        assert!(lines.contains(&(OutputStream::Stderr, "err".to_string())));
        assert!(lines.contains(&(OutputStream::Stdout, "crlf".to_string())));
    }

    #[test]
    fn test_deadline_kills_child() {
        let started = Instant::now();
        let status = run_streaming(
            &mut sh("sleep 8"),
            Some(Duration::from_millis(300)),
            &mut |_, _| {},
        )
        .unwrap();

        assert!(status.is_none());
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[test]
    fn test_background_child_does_not_hold_return() {
        let started = Instant::now();
        let status = run_streaming(&mut sh("sleep 6 & echo done"), None, &mut |_, _| {}).unwrap();

        assert!(status.unwrap().success());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
