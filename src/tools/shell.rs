//! The `bash_command` tool: validator-gated, sandboxed shell execution.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::sandbox::{ExecFailureKind, ExecRequest, SandboxExecutor};
use crate::security::{CommandValidator, CommandVerdict};

use super::traits::{ParamKind, ParamSpec, Tool, ToolCategory, ToolResult};

/// Executes shell commands through the sandbox, subject to the active
/// [`CommandValidator`].  Denied commands never reach the executor.
pub struct BashCommandTool {
    validator: Arc<CommandValidator>,
    executor: Arc<SandboxExecutor>,
    /// Treat `AllowedWithWarning` verdicts as requiring explicit approval
    /// instead of proceeding with a logged warning.
    warn_requires_approval: bool,
}

impl BashCommandTool {
    pub fn new(validator: Arc<CommandValidator>, executor: Arc<SandboxExecutor>) -> Self {
        Self {
            validator,
            executor,
            warn_requires_approval: false,
        }
    }

    pub fn with_warn_approval(mut self, warn_requires_approval: bool) -> Self {
        self.warn_requires_approval = warn_requires_approval;
        self
    }
}

#[async_trait]
impl Tool for BashCommandTool {
    fn name(&self) -> &str {
        "bash_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command with hardened validation and resource limits. \
         Returns stdout, stderr and the exit code."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Execution
    }

    fn parameters(&self) -> Vec<(&'static str, ParamSpec)> {
        vec![
            (
                "command",
                ParamSpec::required(ParamKind::String, "Shell command to execute."),
            ),
            (
                "cwd",
                ParamSpec::optional(ParamKind::String, "Working directory (must exist)."),
            ),
            (
                "timeout",
                ParamSpec::optional(ParamKind::Integer, "Timeout in seconds (clamped to the limit)."),
            ),
            (
                "env",
                ParamSpec::optional(ParamKind::Object, "Extra environment variables."),
            ),
            (
                "interactive",
                ParamSpec::optional(ParamKind::Boolean, "Run attached to a PTY.")
                    .with_default(json!(false)),
            ),
        ]
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let command = args
            .get("command")
            .and_then(Value::as_str)
            .ok_or("missing required argument 'command'")?
            .to_string();

        let mut warning = None;
        match self.validator.validate(&command) {
            CommandVerdict::Allowed => {}
            CommandVerdict::AllowedWithWarning(reason) => {
                if self.warn_requires_approval {
                    return Err(format!("command requires explicit approval: {reason}"));
                }
                tracing::warn!("proceeding with warned command: {reason}");
                warning = Some(reason);
            }
            CommandVerdict::Denied(reason) => {
                return Err(format!("command validation failed: {reason}"));
            }
        }

        let env: HashMap<String, String> = args
            .get("env")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let request = ExecRequest {
            command,
            cwd: args.get("cwd").and_then(Value::as_str).map(str::to_owned),
            env,
            timeout: args.get("timeout").and_then(Value::as_u64),
            interactive: args
                .get("interactive")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        };

        let result = self.executor.execute(&request).await;

        let mut output = if result.stderr.is_empty() {
            result.stdout.clone()
        } else if result.stdout.is_empty() {
            format!("STDERR: {}", result.stderr)
        } else {
            format!("{}\nSTDERR: {}", result.stdout, result.stderr)
        };
        if let Some(kind) = result.failure {
            if kind != ExecFailureKind::NonZeroExit {
                let message = result.error_message.clone().unwrap_or_default();
                if output.is_empty() {
                    output = message;
                } else {
                    output = format!("{message}\n{output}");
                }
            } else if let Some(code) = result.exit_code {
                output = format!("{output}\nexit code {code}");
            }
        }

        let metadata = json!({
            "exit_code": result.exit_code,
            "elapsed_seconds": result.elapsed_seconds,
            "truncated": result.truncated,
            "failure": result.failure,
            "warning": warning,
        });

        if result.success {
            Ok(ToolResult::ok(output).with_metadata(metadata))
        } else {
            Ok(ToolResult::err(output).with_metadata(metadata))
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ExecutionLimits;
    use crate::security::CommandAllowList;

    fn tool(strict: bool) -> BashCommandTool {
        let validator = Arc::new(CommandValidator::new(
            strict,
            Arc::new(CommandAllowList::new(&[])),
        ));
        let executor = Arc::new(SandboxExecutor::new(ExecutionLimits::default()));
        BashCommandTool::new(validator, executor)
    }

    #[tokio::test]
    async fn echo_succeeds() {
        let r = tool(true)
            .execute(json!({"command": "echo hello"}))
            .await
            .unwrap();
        assert!(r.success);
        assert!(r.output.contains("hello"));
    }

    #[tokio::test]
    async fn denied_command_never_executes() {
        let r = tool(true).execute(json!({"command": "terraform apply"})).await;
        let err = r.unwrap_err();
        assert!(err.contains("validation"));
    }

    #[tokio::test]
    async fn missing_command_errors() {
        let r = tool(true).execute(json!({})).await;
        assert!(r.is_err());
    }

    #[tokio::test]
    async fn nonzero_exit_reports_failure_with_code() {
        let r = tool(false)
            .execute(json!({"command": "false"}))
            .await
            .unwrap();
        assert!(!r.success);
        let meta = r.metadata.unwrap();
        assert_eq!(meta["exit_code"], 1);
    }

    #[tokio::test]
    async fn timeout_surfaces_as_failed_result() {
        let r = tool(true)
            .execute(json!({"command": "sleep 10", "timeout": 1}))
            .await
            .unwrap();
        assert!(!r.success);
        assert!(r.output.contains("timed out"));
    }

    #[tokio::test]
    async fn warned_command_carries_warning_metadata() {
        let r = tool(false)
            .execute(json!({"command": "sudo ls"}))
            .await
            .unwrap();
        let meta = r.metadata.unwrap();
        assert!(meta["warning"].is_string());
    }

    #[tokio::test]
    async fn warn_approval_mode_blocks_warned_commands() {
        let validator = Arc::new(CommandValidator::new(
            false,
            Arc::new(CommandAllowList::new(&[])),
        ));
        let executor = Arc::new(SandboxExecutor::new(ExecutionLimits::default()));
        let t = BashCommandTool::new(validator, executor).with_warn_approval(true);
        let r = t.execute(json!({"command": "sudo ls"})).await;
        assert!(r.unwrap_err().contains("approval"));
    }
}
