//! Interactive PTY execution.
//!
//! Attaches the child to a pseudo-terminal and proxies bytes between the
//! host terminal and the PTY, so full-screen and prompting programs work.
//! stderr is merged into stdout by the PTY itself.  A bounded copy of the
//! output is kept for the tool result.  Terminal attributes are restored on
//! every exit path via a drop guard.

use std::io::{IsTerminal, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use portable_pty::{native_pty_system, CommandBuilder, PtySize};

use super::executor::{sanitized_env, ExecFailureKind, ExecRequest, ExecResult, TRUNCATION_SENTINEL};
use super::limits::ExecutionLimits;

/// Poll interval for child status and resize checks.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Restores the host terminal attributes when dropped.
struct RawModeGuard {
    saved: Option<nix::sys::termios::Termios>,
}

impl RawModeGuard {
    fn enter() -> Self {
        if !std::io::stdin().is_terminal() {
            return Self { saved: None };
        }
        use nix::sys::termios::{cfmakeraw, tcgetattr, tcsetattr, SetArg};
        let stdin = std::io::stdin();
        match tcgetattr(&stdin) {
            Ok(saved) => {
                let mut raw = saved.clone();
                cfmakeraw(&mut raw);
                if tcsetattr(&stdin, SetArg::TCSADRAIN, &raw).is_err() {
                    return Self { saved: None };
                }
                Self { saved: Some(saved) }
            }
            Err(_) => Self { saved: None },
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Some(saved) = &self.saved {
            use nix::sys::termios::{tcsetattr, SetArg};
            let _ = tcsetattr(&std::io::stdin(), SetArg::TCSADRAIN, saved);
        }
    }
}

/// Current host terminal size, when stdin is a terminal.
fn host_winsize() -> Option<PtySize> {
    if !std::io::stdin().is_terminal() {
        return None;
    }
    let mut ws = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // TIOCGWINSZ on the controlling terminal.
    let rc = unsafe { libc::ioctl(libc::STDIN_FILENO, libc::TIOCGWINSZ, &mut ws) };
    if rc == 0 && ws.ws_row > 0 && ws.ws_col > 0 {
        Some(PtySize {
            rows: ws.ws_row,
            cols: ws.ws_col,
            pixel_width: ws.ws_xpixel,
            pixel_height: ws.ws_ypixel,
        })
    } else {
        None
    }
}

/// Run a command attached to a PTY, proxying the host terminal.
pub(crate) async fn run_interactive(request: &ExecRequest, limits: &ExecutionLimits) -> ExecResult {
    let started = Instant::now();
    let timeout = Duration::from_secs(limits.effective_timeout(request.timeout));

    let size = host_winsize().unwrap_or(PtySize {
        rows: 24,
        cols: 80,
        pixel_width: 0,
        pixel_height: 0,
    });

    let pty = native_pty_system();
    let pair = match pty.openpty(size) {
        Ok(pair) => pair,
        Err(e) => {
            return fail(
                ExecFailureKind::OsError,
                format!("failed to open pty: {e}"),
                started,
            )
        }
    };

    let mut builder = CommandBuilder::new("sh");
    builder.arg("-c");
    builder.arg(&request.command);
    builder.env_clear();
    for (k, v) in sanitized_env(&request.env) {
        builder.env(k, v);
    }
    if let Some(cwd) = &request.cwd {
        builder.cwd(cwd);
    }

    let mut child = match pair.slave.spawn_command(builder) {
        Ok(child) => child,
        Err(e) => {
            return fail(
                ExecFailureKind::OsError,
                format!("failed to spawn pty child: {e}"),
                started,
            )
        }
    };
    // The slave side lives in the child now.
    drop(pair.slave);

    let reader = match pair.master.try_clone_reader() {
        Ok(r) => r,
        Err(e) => {
            let _ = child.kill();
            return fail(
                ExecFailureKind::Unexpected,
                format!("failed to clone pty reader: {e}"),
                started,
            )
        }
    };
    let writer = pair.master.take_writer().ok();

    let raw_guard = RawModeGuard::enter();

    // Output pump: PTY → host stdout, with a bounded capture copy.  It
    // exits on EOF, which arrives once the master side is dropped.
    let cap = limits.max_output_bytes;
    let done = Arc::new(AtomicBool::new(false));
    let pump = tokio::task::spawn_blocking(move || pump_output(reader, cap));

    // Input pump: host stdin → PTY, only when attached to a real terminal.
    if std::io::stdin().is_terminal() {
        if let Some(mut writer) = writer {
            let input_done = done.clone();
            std::thread::spawn(move || {
                let mut stdin = std::io::stdin();
                let mut buf = [0u8; 1024];
                while !input_done.load(Ordering::SeqCst) {
                    match stdin.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if writer.write_all(&buf[..n]).is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    }

    // Poll loop: child status, timeout, window-size propagation.
    let mut last_size = size;
    let (exit_code, timed_out) = loop {
        match child.try_wait() {
            Ok(Some(status)) => break (Some(status.exit_code() as i32), false),
            Ok(None) => {}
            Err(_) => break (None, false),
        }
        if started.elapsed() > timeout {
            let _ = child.kill();
            let _ = child.wait();
            break (None, true);
        }
        if let Some(current) = host_winsize() {
            if current.rows != last_size.rows || current.cols != last_size.cols {
                let _ = pair.master.resize(current);
                last_size = current;
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    done.store(true, Ordering::SeqCst);
    // Dropping the master closes the PTY and unblocks the output pump.
    drop(pair.master);
    let (captured, truncated) = pump.await.unwrap_or_default();
    drop(raw_guard);

    let elapsed = started.elapsed().as_secs_f64();
    if timed_out {
        return ExecResult {
            success: false,
            exit_code: None,
            stdout: captured,
            stderr: String::new(),
            elapsed_seconds: elapsed,
            truncated,
            failure: Some(ExecFailureKind::Timeout),
            error_message: Some("interactive command timed out".into()),
        };
    }

    let success = exit_code == Some(0);
    ExecResult {
        success,
        exit_code,
        stdout: captured,
        stderr: String::new(),
        elapsed_seconds: elapsed,
        truncated,
        failure: if success {
            None
        } else {
            Some(ExecFailureKind::NonZeroExit)
        },
        error_message: if success {
            None
        } else {
            Some(format!("exit code {}", exit_code.unwrap_or(-1)))
        },
    }
}

/// Copy PTY output to the host terminal while keeping a capped capture.
fn pump_output(mut reader: Box<dyn Read + Send>, cap: usize) -> (String, bool) {
    let interactive_host = std::io::stdout().is_terminal();
    let mut captured: Vec<u8> = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 65536];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if interactive_host {
                    let mut stdout = std::io::stdout();
                    let _ = stdout.write_all(&buf[..n]);
                    let _ = stdout.flush();
                }
                if captured.len() < cap {
                    let take = n.min(cap - captured.len());
                    captured.extend_from_slice(&buf[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }
    let mut text = String::from_utf8_lossy(&captured).into_owned();
    if truncated {
        text.push_str(TRUNCATION_SENTINEL);
    }
    (text, truncated)
}

fn fail(kind: ExecFailureKind, message: String, started: Instant) -> ExecResult {
    ExecResult {
        success: false,
        exit_code: None,
        stdout: String::new(),
        stderr: String::new(),
        elapsed_seconds: started.elapsed().as_secs_f64(),
        truncated: false,
        failure: Some(kind),
        error_message: Some(message),
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ExecutionLimits {
        ExecutionLimits::default()
    }

    #[tokio::test]
    async fn interactive_echo_captures_output() {
        let mut req = ExecRequest::new("printf interactive-ok");
        req.interactive = true;
        let r = run_interactive(&req, &limits()).await;
        assert!(r.success, "failure: {:?}", r.error_message);
        assert!(r.stdout.contains("interactive-ok"));
        // PTY merges stderr into stdout.
        assert!(r.stderr.is_empty());
    }

    #[tokio::test]
    async fn interactive_merges_stderr() {
        let mut req = ExecRequest::new("printf err-text 1>&2");
        req.interactive = true;
        let r = run_interactive(&req, &limits()).await;
        assert!(r.stdout.contains("err-text"));
    }

    #[tokio::test]
    async fn interactive_nonzero_exit() {
        let mut req = ExecRequest::new("exit 7");
        req.interactive = true;
        let r = run_interactive(&req, &limits()).await;
        assert!(!r.success);
        assert_eq!(r.exit_code, Some(7));
    }

    #[tokio::test]
    async fn interactive_timeout() {
        let mut req = ExecRequest::new("sleep 10");
        req.interactive = true;
        req.timeout = Some(1);
        let started = Instant::now();
        let r = run_interactive(&req, &limits()).await;
        assert_eq!(r.failure, Some(ExecFailureKind::Timeout));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
