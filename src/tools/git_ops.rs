//! Read-side git tools, routed through the validator and the sandbox.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::sandbox::{ExecRequest, SandboxExecutor};
use crate::security::{CommandValidator, CommandVerdict};

use super::traits::{ParamKind, ParamSpec, Tool, ToolCategory, ToolResult};

/// Shared plumbing for the git tools: validate, execute, shape the result.
struct GitRunner {
    validator: Arc<CommandValidator>,
    executor: Arc<SandboxExecutor>,
}

impl GitRunner {
    async fn run(&self, command: String, cwd: Option<String>) -> Result<ToolResult, String> {
        match self.validator.validate(&command) {
            CommandVerdict::Denied(reason) => {
                return Err(format!("command validation failed: {reason}"));
            }
            CommandVerdict::AllowedWithWarning(reason) => {
                tracing::warn!("git command warned: {reason}");
            }
            CommandVerdict::Allowed => {}
        }

        let request = ExecRequest {
            command,
            cwd,
            ..Default::default()
        };
        let result = self.executor.execute(&request).await;

        let output = if result.stderr.is_empty() {
            result.stdout.clone()
        } else {
            format!("{}\nSTDERR: {}", result.stdout, result.stderr)
        };
        let metadata = json!({
            "exit_code": result.exit_code,
            "elapsed_seconds": result.elapsed_seconds,
        });
        if result.success {
            Ok(ToolResult::ok(output).with_metadata(metadata))
        } else {
            Ok(ToolResult::err(output).with_metadata(metadata))
        }
    }
}

fn cwd_param() -> (&'static str, ParamSpec) {
    (
        "cwd",
        ParamSpec::optional(ParamKind::String, "Repository directory (default: current)."),
    )
}

fn cwd_arg(args: &Value) -> Option<String> {
    args.get("cwd").and_then(Value::as_str).map(str::to_owned)
}

// ─── GitStatusTool ────────────────────────────────────────────────────────────

pub struct GitStatusTool {
    runner: GitRunner,
}

impl GitStatusTool {
    pub fn new(validator: Arc<CommandValidator>, executor: Arc<SandboxExecutor>) -> Self {
        Self {
            runner: GitRunner {
                validator,
                executor,
            },
        }
    }
}

#[async_trait]
impl Tool for GitStatusTool {
    fn name(&self) -> &str {
        "git_status"
    }

    fn description(&self) -> &str {
        "Show the git working-tree status of a repository."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::GitRead
    }

    fn parameters(&self) -> Vec<(&'static str, ParamSpec)> {
        vec![cwd_param()]
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        self.runner
            .run("git status".to_string(), cwd_arg(&args))
            .await
    }
}

// ─── GitDiffTool ──────────────────────────────────────────────────────────────

pub struct GitDiffTool {
    runner: GitRunner,
}

impl GitDiffTool {
    pub fn new(validator: Arc<CommandValidator>, executor: Arc<SandboxExecutor>) -> Self {
        Self {
            runner: GitRunner {
                validator,
                executor,
            },
        }
    }
}

#[async_trait]
impl Tool for GitDiffTool {
    fn name(&self) -> &str {
        "git_diff"
    }

    fn description(&self) -> &str {
        "Show uncommitted changes, optionally limited to one path."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::GitRead
    }

    fn parameters(&self) -> Vec<(&'static str, ParamSpec)> {
        vec![
            cwd_param(),
            (
                "path",
                ParamSpec::optional(ParamKind::String, "Limit the diff to this path."),
            ),
        ]
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let command = match args.get("path").and_then(Value::as_str) {
            Some(path) => {
                let quoted = shlex::try_quote(path)
                    .map_err(|_| "path contains unquotable characters".to_string())?;
                format!("git diff -- {quoted}")
            }
            None => "git diff".to_string(),
        };
        self.runner.run(command, cwd_arg(&args)).await
    }
}

// ─── GitLogTool ───────────────────────────────────────────────────────────────

pub struct GitLogTool {
    runner: GitRunner,
}

impl GitLogTool {
    pub fn new(validator: Arc<CommandValidator>, executor: Arc<SandboxExecutor>) -> Self {
        Self {
            runner: GitRunner {
                validator,
                executor,
            },
        }
    }
}

#[async_trait]
impl Tool for GitLogTool {
    fn name(&self) -> &str {
        "git_log"
    }

    fn description(&self) -> &str {
        "Show recent commit history (one line per commit)."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::GitRead
    }

    fn parameters(&self) -> Vec<(&'static str, ParamSpec)> {
        vec![
            cwd_param(),
            (
                "max_count",
                ParamSpec::optional(ParamKind::Integer, "Number of commits (default 20).")
                    .with_default(json!(20)),
            ),
        ]
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let count = args.get("max_count").and_then(Value::as_u64).unwrap_or(20);
        let command = format!("git log --oneline -n {count}");
        self.runner.run(command, cwd_arg(&args)).await
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ExecutionLimits;
    use crate::security::CommandAllowList;
    use tempfile::TempDir;

    fn parts() -> (Arc<CommandValidator>, Arc<SandboxExecutor>) {
        (
            Arc::new(CommandValidator::new(
                true,
                Arc::new(CommandAllowList::new(&[])),
            )),
            Arc::new(SandboxExecutor::new(ExecutionLimits::default())),
        )
    }

    #[tokio::test]
    async fn status_outside_repo_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let (validator, executor) = parts();
        let tool = GitStatusTool::new(validator, executor);
        let r = tool
            .execute(json!({"cwd": dir.path().display().to_string()}))
            .await
            .unwrap();
        // Not a repo: non-zero exit, but the failure is a ToolResult, not Err.
        assert!(!r.success);
    }

    #[tokio::test]
    async fn log_builds_bounded_command() {
        let dir = TempDir::new().unwrap();
        let (validator, executor) = parts();
        let tool = GitLogTool::new(validator, executor);
        let r = tool
            .execute(json!({"cwd": dir.path().display().to_string(), "max_count": 3}))
            .await
            .unwrap();
        assert!(!r.success); // not a repo, command still well-formed
    }

    #[tokio::test]
    async fn diff_quotes_path() {
        let dir = TempDir::new().unwrap();
        let (validator, executor) = parts();
        let tool = GitDiffTool::new(validator, executor);
        let r = tool
            .execute(json!({
                "cwd": dir.path().display().to_string(),
                "path": "src/main.rs"
            }))
            .await;
        assert!(r.is_ok());
    }
}
