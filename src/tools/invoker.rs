//! Execution of a single tool call: circuit breaker, argument validation,
//! timeout, statistics, and result shaping.
//!
//! Every failure mode is captured as a [`ToolOutcome::Failure`]; nothing
//! unwinds to the agent loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::{CircuitBreakerConfig, ToolsConfig};
use crate::history::masking::mask_tool_output;

use super::breaker::{Admission, CircuitBreaker, CircuitState};
use super::registry::ToolRegistry;
use super::traits::validate_args;

/// One tool call, as parsed from the model stream.  `call_id` is monotonic
/// within a batch and defines the presentation order of results.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
    pub call_id: usize,
}

/// Failure classification fed back to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidArguments,
    UnknownTool,
    Timeout,
    CircuitOpen,
    ExecutionError,
    Cancelled,
}

/// Outcome of one invocation.  A `Success` never carries an error; a
/// `Failure` never carries payload data.
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Success {
        data: Value,
        metadata: Value,
    },
    Failure {
        error: String,
        kind: FailureKind,
        metadata: Value,
    },
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success { .. })
    }

    /// Short feedback line for the model.
    pub fn feedback(&self, tool_name: &str) -> String {
        match self {
            ToolOutcome::Success { data, .. } => {
                let text = data
                    .as_str()
                    .map(str::to_owned)
                    .unwrap_or_else(|| data.to_string());
                format!("Tool {tool_name} succeeded: {text}")
            }
            ToolOutcome::Failure { error, kind, .. } => {
                format!("Tool {tool_name} failed ({kind:?}): {error}")
            }
        }
    }
}

/// Finalized record of one tool execution.  Immutable once constructed.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub call_id: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: ToolOutcome,
    /// Compressed representation for context insertion.
    pub masked_content: String,
    pub compression_ratio: f64,
}

/// Rolling per-tool counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ToolStats {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_duration_s: f64,
}

/// Read-only health snapshot: per-tool stats plus breaker state.
#[derive(Debug, Clone, Serialize)]
pub struct ToolHealth {
    pub breaker: CircuitState,
    pub stats: HashMap<String, ToolStats>,
}

/// Executes individual tool calls with resilience features.
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    breaker: CircuitBreaker,
    stats: Mutex<HashMap<String, ToolStats>>,
    tools_config: ToolsConfig,
}

impl ToolInvoker {
    pub fn new(
        registry: Arc<ToolRegistry>,
        breaker_config: CircuitBreakerConfig,
        tools_config: ToolsConfig,
    ) -> Self {
        Self {
            registry,
            breaker: CircuitBreaker::new(breaker_config),
            stats: Mutex::new(HashMap::new()),
            tools_config,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute one call end to end.
    #[tracing::instrument(name = "tool.invoke", skip_all, fields(tool = %call.name, call_id = call.call_id))]
    pub async fn invoke(&self, call: &ToolCall) -> ToolInvocation {
        let started_at = Utc::now();
        let started = Instant::now();

        match self.breaker.admit() {
            Admission::Permitted => {}
            Admission::ShortCircuit { retry_after } => {
                let secs = retry_after.as_secs();
                return self.finalize(
                    call,
                    started_at,
                    started,
                    ToolOutcome::Failure {
                        error: format!("tools temporarily unavailable; retry after {secs}s"),
                        kind: FailureKind::CircuitOpen,
                        metadata: json!({ "retry_after": secs }),
                    },
                    false,
                );
            }
        }

        let Some(tool) = self.registry.get(&call.name) else {
            // A hallucinated name is the model's mistake, not tool
            // distress; it does not feed the breaker.
            let outcome = ToolOutcome::Failure {
                error: format!("tool '{}' is not registered", call.name),
                kind: FailureKind::UnknownTool,
                metadata: json!({ "available": self.registry.names() }),
            };
            return self.finalize(call, started_at, started, outcome, true);
        };

        if let Err(reason) = validate_args(&tool.parameters(), &call.arguments) {
            let outcome = ToolOutcome::Failure {
                error: reason,
                kind: FailureKind::InvalidArguments,
                metadata: Value::Null,
            };
            // Argument mistakes are the model's fault, not tool distress;
            // they do not feed the breaker.
            return self.finalize(call, started_at, started, outcome, true);
        }

        let timeout = if tool.category().long_running() {
            Duration::from_secs(self.tools_config.long_timeout_s)
        } else {
            Duration::from_secs(self.tools_config.default_timeout_s)
        };

        let executed = tokio::time::timeout(timeout, tool.execute(call.arguments.clone())).await;

        let outcome = match executed {
            Err(_) => {
                self.breaker
                    .record_failure(&format!("tool '{}' timed out", call.name));
                ToolOutcome::Failure {
                    error: format!("tool '{}' timed out after {}s", call.name, timeout.as_secs()),
                    kind: FailureKind::Timeout,
                    metadata: json!({ "timeout_s": timeout.as_secs() }),
                }
            }
            Ok(Err(message)) => {
                self.breaker.record_failure(&message);
                ToolOutcome::Failure {
                    error: message,
                    kind: FailureKind::ExecutionError,
                    metadata: Value::Null,
                }
            }
            Ok(Ok(result)) => {
                let metadata = result.metadata.clone().unwrap_or(Value::Null);
                if result.success {
                    self.breaker.record_success();
                    ToolOutcome::Success {
                        data: Value::String(result.output),
                        metadata,
                    }
                } else {
                    self.breaker.record_failure(&result.output);
                    ToolOutcome::Failure {
                        error: result.output,
                        kind: FailureKind::ExecutionError,
                        metadata,
                    }
                }
            }
        };

        self.finalize(call, started_at, started, outcome, true)
    }

    fn finalize(
        &self,
        call: &ToolCall,
        started_at: DateTime<Utc>,
        started: Instant,
        outcome: ToolOutcome,
        count_stats: bool,
    ) -> ToolInvocation {
        let elapsed = started.elapsed().as_secs_f64();
        if count_stats {
            self.record_stats(&call.name, outcome.is_success(), elapsed);
        }

        let raw = match &outcome {
            ToolOutcome::Success { data, .. } => data
                .as_str()
                .map(str::to_owned)
                .unwrap_or_else(|| data.to_string()),
            ToolOutcome::Failure { error, .. } => format!("error: {error}"),
        };
        let masked = mask_tool_output(&raw, &call.name);

        ToolInvocation {
            tool_name: call.name.clone(),
            call_id: call.call_id,
            started_at,
            finished_at: Utc::now(),
            outcome,
            masked_content: masked.content,
            compression_ratio: masked.compression_ratio,
        }
    }

    fn record_stats(&self, tool: &str, success: bool, duration_s: f64) {
        let mut stats = match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = stats.entry(tool.to_owned()).or_default();
        entry.calls += 1;
        entry.total_duration_s += duration_s;
        if success {
            entry.successes += 1;
        } else {
            entry.failures += 1;
        }
    }

    /// Health telemetry snapshot (`/metrics`).
    pub fn health(&self) -> ToolHealth {
        let stats = match self.stats.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        ToolHealth {
            breaker: self.breaker.state(),
            stats,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::traits::{ParamKind, ParamSpec, Tool, ToolCategory, ToolResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn category(&self) -> ToolCategory {
            ToolCategory::ReadOnly
        }
        fn parameters(&self) -> Vec<(&'static str, ParamSpec)> {
            vec![(
                "message",
                ParamSpec::required(ParamKind::String, "text to echo"),
            )]
        }
        async fn execute(&self, args: Value) -> Result<ToolResult, String> {
            let msg = args.get("message").and_then(Value::as_str).unwrap_or("");
            Ok(ToolResult::ok(msg))
        }
    }

    struct FlakyTool {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> &str {
            "flaky"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn category(&self) -> ToolCategory {
            ToolCategory::ReadOnly
        }
        fn parameters(&self) -> Vec<(&'static str, ParamSpec)> {
            vec![]
        }
        async fn execute(&self, _args: Value) -> Result<ToolResult, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err("flaky failure".into())
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        fn category(&self) -> ToolCategory {
            ToolCategory::ReadOnly
        }
        fn parameters(&self) -> Vec<(&'static str, ParamSpec)> {
            vec![]
        }
        async fn execute(&self, _args: Value) -> Result<ToolResult, String> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(ToolResult::ok("done"))
        }
    }

    fn invoker_with(tools: Vec<Arc<dyn Tool>>, tools_config: ToolsConfig) -> ToolInvoker {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool);
        }
        ToolInvoker::new(
            Arc::new(registry),
            CircuitBreakerConfig::default(),
            tools_config,
        )
    }

    fn call(name: &str, args: Value, id: usize) -> ToolCall {
        ToolCall {
            name: name.into(),
            arguments: args,
            call_id: id,
        }
    }

    #[tokio::test]
    async fn successful_invocation() {
        let inv = invoker_with(vec![Arc::new(EchoTool)], ToolsConfig::default());
        let record = inv.invoke(&call("echo", json!({"message": "hi"}), 0)).await;
        assert!(record.outcome.is_success());
        assert_eq!(record.masked_content, "hi");
        assert!(record.finished_at >= record.started_at);
    }

    #[tokio::test]
    async fn unknown_tool_lists_available() {
        let inv = invoker_with(vec![Arc::new(EchoTool)], ToolsConfig::default());
        let record = inv.invoke(&call("nope", json!({}), 0)).await;
        match &record.outcome {
            ToolOutcome::Failure { kind, metadata, .. } => {
                assert_eq!(*kind, FailureKind::UnknownTool);
                assert_eq!(metadata["available"][0], "echo");
            }
            _ => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn invalid_arguments_rejected_without_execution() {
        let inv = invoker_with(vec![Arc::new(EchoTool)], ToolsConfig::default());
        let record = inv.invoke(&call("echo", json!({}), 0)).await;
        match &record.outcome {
            ToolOutcome::Failure { kind, .. } => assert_eq!(*kind, FailureKind::InvalidArguments),
            _ => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn timeout_produces_timeout_failure() {
        let cfg = ToolsConfig {
            default_timeout_s: 1,
            ..Default::default()
        };
        let inv = invoker_with(vec![Arc::new(SlowTool)], cfg);
        let started = Instant::now();
        let record = inv.invoke(&call("slow", json!({}), 0)).await;
        match &record.outcome {
            ToolOutcome::Failure { kind, .. } => assert_eq!(*kind, FailureKind::Timeout),
            _ => panic!("expected timeout"),
        }
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn breaker_opens_after_consecutive_failures() {
        let inv = invoker_with(
            vec![Arc::new(FlakyTool {
                calls: AtomicU32::new(0),
            })],
            ToolsConfig::default(),
        );
        for _ in 0..3 {
            let record = inv.invoke(&call("flaky", json!({}), 0)).await;
            assert!(!record.outcome.is_success());
        }
        // Fourth call short-circuits with retry_after.
        let record = inv.invoke(&call("flaky", json!({}), 0)).await;
        match &record.outcome {
            ToolOutcome::Failure { kind, metadata, .. } => {
                assert_eq!(*kind, FailureKind::CircuitOpen);
                assert!(metadata["retry_after"].as_u64().is_some());
            }
            _ => panic!("expected circuit-open failure"),
        }
        assert_eq!(inv.health().breaker, CircuitState::Open);
    }

    #[tokio::test]
    async fn stats_accumulate() {
        let inv = invoker_with(vec![Arc::new(EchoTool)], ToolsConfig::default());
        inv.invoke(&call("echo", json!({"message": "a"}), 0)).await;
        inv.invoke(&call("echo", json!({"message": "b"}), 1)).await;
        inv.invoke(&call("echo", json!({}), 2)).await; // invalid args
        let health = inv.health();
        let stats = health.stats.get("echo").copied().unwrap_or_default();
        assert_eq!(stats.calls, 3);
        assert_eq!(stats.successes, 2);
        assert_eq!(stats.failures, 1);
    }
}
