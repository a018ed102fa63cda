//! Resource-limited execution of already-validated shell commands.
//!
//! The executor trusts its caller to have run the command through the
//! validator; it still classifies its own failures defensively.  The child
//! runs `sh -c <command>` in its own session with RLIMITs applied before
//! `exec`, a sanitized environment, bounded output capture, and a
//! wall-clock timeout enforced from the parent (SIGTERM, then SIGKILL
//! after a 5 s grace period).

use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

use super::limits::ExecutionLimits;

/// Appended when a stream hits its capture ceiling.
pub const TRUNCATION_SENTINEL: &str = "\n\n[OUTPUT TRUNCATED]";

/// Seconds between SIGTERM and SIGKILL on timeout.
const KILL_GRACE_SECS: u64 = 5;

/// Environment variables never forwarded to the child.
const BLOCKED_ENV: &[&str] = &["LD_PRELOAD", "LD_LIBRARY_PATH", "BASH_ENV"];

/// Why an execution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecFailureKind {
    Timeout,
    NonZeroExit,
    MemoryExceeded,
    OsError,
    ValidationFailed,
    Unexpected,
}

/// Outcome of one sandboxed execution.  Failures never unwind; every path
/// produces a result with whatever output was collected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed_seconds: f64,
    pub truncated: bool,
    pub failure: Option<ExecFailureKind>,
    pub error_message: Option<String>,
}

impl ExecResult {
    fn failure(kind: ExecFailureKind, message: impl Into<String>, elapsed: f64) -> Self {
        Self {
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            elapsed_seconds: elapsed,
            truncated: false,
            failure: Some(kind),
            error_message: Some(message.into()),
        }
    }
}

/// A request to run one command.
#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    pub command: String,
    pub cwd: Option<String>,
    /// Caller-supplied environment, merged over the sanitized base.
    pub env: HashMap<String, String>,
    /// Requested timeout; clamped to the limit set.
    pub timeout: Option<u64>,
    /// Run attached to a PTY, proxying the host terminal.
    pub interactive: bool,
}

impl ExecRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }
}

/// Runs validated commands under [`ExecutionLimits`].
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    limits: ExecutionLimits,
}

impl SandboxExecutor {
    pub fn new(limits: ExecutionLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    /// Execute a command.  Interactive requests are handed to the PTY path.
    #[tracing::instrument(name = "sandbox.execute", skip_all, fields(interactive = request.interactive))]
    pub async fn execute(&self, request: &ExecRequest) -> ExecResult {
        if request.command.trim().is_empty() {
            return ExecResult::failure(ExecFailureKind::ValidationFailed, "empty command", 0.0);
        }

        if let Some(cwd) = &request.cwd {
            let path = std::path::Path::new(cwd);
            if !path.is_dir() {
                return ExecResult::failure(
                    ExecFailureKind::OsError,
                    format!("working directory does not exist: {cwd}"),
                    0.0,
                );
            }
        }

        #[cfg(unix)]
        if request.interactive {
            return super::pty::run_interactive(request, &self.limits).await;
        }

        self.execute_piped(request).await
    }

    async fn execute_piped(&self, request: &ExecRequest) -> ExecResult {
        let started = Instant::now();
        let timeout_secs = self.limits.effective_timeout(request.timeout);
        let env = sanitized_env(&request.env);

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&request.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .envs(&env)
            .kill_on_drop(true);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }

        #[cfg(unix)]
        apply_child_limits(&mut cmd, &self.limits, timeout_secs);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let kind = if e.kind() == std::io::ErrorKind::OutOfMemory {
                    ExecFailureKind::MemoryExceeded
                } else {
                    ExecFailureKind::OsError
                };
                return ExecResult::failure(
                    kind,
                    format!("failed to spawn process: {e}"),
                    started.elapsed().as_secs_f64(),
                );
            }
        };

        let cap = self.limits.max_output_bytes;
        let stdout_task = child.stdout.take().map(|r| tokio::spawn(read_capped(r, cap)));
        let stderr_task = child.stderr.take().map(|r| tokio::spawn(read_capped(r, cap)));

        let wait = tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait()).await;

        let (status, timed_out) = match wait {
            Ok(Ok(status)) => (Some(status), false),
            Ok(Err(e)) => {
                return ExecResult::failure(
                    ExecFailureKind::OsError,
                    format!("wait failed: {e}"),
                    started.elapsed().as_secs_f64(),
                );
            }
            Err(_) => {
                terminate(&mut child).await;
                (None, true)
            }
        };

        let (stdout, out_truncated) = join_capture(stdout_task).await;
        let (stderr, err_truncated) = join_capture(stderr_task).await;
        let elapsed = started.elapsed().as_secs_f64();
        let truncated = out_truncated || err_truncated;

        if timed_out {
            tracing::warn!("command timed out after {timeout_secs}s");
            return ExecResult {
                success: false,
                exit_code: None,
                stdout,
                stderr,
                elapsed_seconds: elapsed,
                truncated,
                failure: Some(ExecFailureKind::Timeout),
                error_message: Some(format!("command timed out after {timeout_secs}s")),
            };
        }

        let (exit_code, success) = match status {
            Some(status) => (status.code(), status.success()),
            None => (None, false),
        };
        tracing::debug!(
            exit = ?exit_code,
            elapsed_s = elapsed,
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            "command complete"
        );

        ExecResult {
            success,
            exit_code,
            stdout,
            stderr,
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
}

/// Build the sanitized child environment: current env with a restricted
/// PATH, blanked shell-startup hooks, loader injection stripped, then the
/// caller's variables merged through the same filter.
pub(crate) fn sanitized_env(extra: &HashMap<String, String>) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();
    for blocked in BLOCKED_ENV {
        env.remove(*blocked);
    }
    env.insert("PATH".into(), "/usr/local/bin:/usr/bin:/bin".into());
    env.insert("BASH_ENV".into(), String::new());
    env.insert("ENV".into(), String::new());
    for (k, v) in extra {
        if BLOCKED_ENV.contains(&k.as_str()) || k == "LD_LIBRARY_PATH" {
            tracing::warn!("dropping blocked env var '{k}'");
            continue;
        }
        env.insert(k.clone(), v.clone());
    }
    env
}

/// Apply RLIMITs and session isolation in the child before `exec`.
#[cfg(unix)]
fn apply_child_limits(cmd: &mut Command, limits: &ExecutionLimits, timeout_secs: u64) {
    use nix::sys::resource::{setrlimit, Resource};

    let max_memory = limits.max_memory_mb * 1024 * 1024;
    let max_files = limits.max_open_files;
    unsafe {
        cmd.pre_exec(move || {
            nix::unistd::setsid().map_err(std::io::Error::from)?;
            setrlimit(Resource::RLIMIT_CPU, timeout_secs, timeout_secs + 5)
                .map_err(std::io::Error::from)?;
            setrlimit(Resource::RLIMIT_AS, max_memory, max_memory)
                .map_err(std::io::Error::from)?;
            setrlimit(Resource::RLIMIT_NOFILE, max_files, max_files)
                .map_err(std::io::Error::from)?;
            setrlimit(Resource::RLIMIT_CORE, 0, 0).map_err(std::io::Error::from)?;
            libc::nice(10);
            Ok(())
        });
    }
}

/// SIGTERM the child's process group, then SIGKILL after the grace period.
#[cfg(unix)]
async fn terminate(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        let pgid = Pid::from_raw(pid as i32);
        let _ = killpg(pgid, Signal::SIGTERM);
        let grace = tokio::time::timeout(Duration::from_secs(KILL_GRACE_SECS), child.wait()).await;
        if grace.is_err() {
            let _ = killpg(pgid, Signal::SIGKILL);
            let _ = child.wait().await;
        }
    } else {
        let _ = child.kill().await;
    }
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child) {
    let _ = child.kill().await;
}

/// Read a stream up to `cap` bytes, then keep draining (so the child never
/// blocks on a full pipe) while discarding the excess.
async fn read_capped<R>(mut reader: R, cap: usize) -> (String, bool)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut captured: Vec<u8> = Vec::new();
    let mut buf = [0u8; 8192];
    let mut truncated = false;
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
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

async fn join_capture(
    task: Option<tokio::task::JoinHandle<(String, bool)>>,
) -> (String, bool) {
    match task {
        Some(handle) => handle.await.unwrap_or_default(),
        None => (String::new(), false),
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> SandboxExecutor {
        SandboxExecutor::new(ExecutionLimits::default())
    }

    #[tokio::test]
    async fn echo_succeeds() {
        let r = executor().execute(&ExecRequest::new("echo hello")).await;
        assert!(r.success);
        assert_eq!(r.exit_code, Some(0));
        assert!(r.stdout.contains("hello"));
        assert!(r.failure.is_none());
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure() {
        let r = executor().execute(&ExecRequest::new("exit 3")).await;
        assert!(!r.success);
        assert_eq!(r.exit_code, Some(3));
        assert_eq!(r.failure, Some(ExecFailureKind::NonZeroExit));
    }

    #[tokio::test]
    async fn stderr_is_captured() {
        let r = executor()
            .execute(&ExecRequest::new("echo oops 1>&2"))
            .await;
        assert!(r.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn empty_command_is_validation_failure() {
        let r = executor().execute(&ExecRequest::new("   ")).await;
        assert_eq!(r.failure, Some(ExecFailureKind::ValidationFailed));
    }

    #[tokio::test]
    async fn missing_cwd_is_os_error() {
        let mut req = ExecRequest::new("echo hi");
        req.cwd = Some("/definitely/not/a/dir".into());
        let r = executor().execute(&req).await;
        assert_eq!(r.failure, Some(ExecFailureKind::OsError));
    }

    #[tokio::test]
    async fn timeout_kills_within_grace() {
        let limits = ExecutionLimits {
            timeout_seconds: 1,
            ..Default::default()
        };
        let executor = SandboxExecutor::new(limits);
        let started = Instant::now();
        let r = executor.execute(&ExecRequest::new("sleep 5")).await;
        assert_eq!(r.failure, Some(ExecFailureKind::Timeout));
        assert!(!r.success);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn output_is_truncated_at_cap() {
        let limits = ExecutionLimits {
            max_output_bytes: 1000,
            ..Default::default()
        };
        let executor = SandboxExecutor::new(limits);
        let r = executor
            .execute(&ExecRequest::new("yes | head -c 1001"))
            .await;
        assert!(r.success, "truncation is not a failure");
        assert!(r.truncated);
        assert!(r.stdout.ends_with(TRUNCATION_SENTINEL));
        let body = r.stdout.trim_end_matches(TRUNCATION_SENTINEL);
        assert_eq!(body.len(), 1000);
    }

    #[tokio::test]
    async fn elapsed_is_reported() {
        let r = executor().execute(&ExecRequest::new("echo x")).await;
        assert!(r.elapsed_seconds >= 0.0);
        assert!(r.elapsed_seconds < 5.0);
    }

    #[test]
    fn env_sanitization_forces_path_and_strips_loader_vars() {
        let mut extra = HashMap::new();
        extra.insert("LD_PRELOAD".to_string(), "/evil.so".to_string());
        extra.insert("MY_VAR".to_string(), "1".to_string());
        let env = sanitized_env(&extra);
        assert_eq!(env.get("PATH").map(String::as_str), Some("/usr/local/bin:/usr/bin:/bin"));
        assert_eq!(env.get("BASH_ENV").map(String::as_str), Some(""));
        assert!(!env.contains_key("LD_PRELOAD"));
        assert_eq!(env.get("MY_VAR").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn caller_env_reaches_child() {
        let mut req = ExecRequest::new("printenv QUARRY_TEST_VAR");
        req.env.insert("QUARRY_TEST_VAR".into(), "present".into());
        let r = executor().execute(&req).await;
        assert!(r.stdout.contains("present"));
    }
}
