//! Dependency-aware parallel execution of tool-call batches.
//!
//! Calls are grouped into *waves* by a conservative static dependency
//! analysis; each wave runs concurrently (bounded), waves run in sequence.
//! Results are always surfaced in submission order, never completion order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::agent::CancelToken;

use super::invoker::{FailureKind, ToolCall, ToolInvocation, ToolInvoker, ToolOutcome};
use super::registry::ToolRegistry;
use super::traits::ToolCategory;

/// Summary of one batch execution.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BatchSummary {
    pub wave_count: usize,
    /// `total_calls / wave_count`; 1.0 means fully serialized.
    pub parallelism_factor: f64,
    pub execution_time_ms: u128,
}

/// Result of one batch: invocations in submission order plus the summary.
#[derive(Debug)]
pub struct BatchResult {
    pub invocations: Vec<ToolInvocation>,
    pub summary: BatchSummary,
    pub cancelled: bool,
}

/// How a call touches shared state, for dependency analysis.
#[derive(Debug, Clone, PartialEq)]
enum Access {
    Read(String),
    Write(String),
    /// Depends on every earlier call in the batch.
    Destructive,
    /// No filesystem interaction.
    Independent,
}

/// Groups tool calls into dependency-respecting waves and runs them.
pub struct ToolScheduler {
    invoker: Arc<ToolInvoker>,
    max_parallel: usize,
}

impl ToolScheduler {
    pub fn new(invoker: Arc<ToolInvoker>, max_parallel: usize) -> Self {
        Self {
            invoker,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Execute a batch.  Cancellation stops in-flight and queued calls;
    /// finished calls are reported as-is.
    #[tracing::instrument(name = "tools.batch", skip_all, fields(calls = calls.len()))]
    pub async fn execute_batch(&self, calls: Vec<ToolCall>, cancel: &CancelToken) -> BatchResult {
        let started = Instant::now();
        if calls.is_empty() {
            return BatchResult {
                invocations: Vec::new(),
                summary: BatchSummary {
                    wave_count: 0,
                    parallelism_factor: 0.0,
                    execution_time_ms: 0,
                },
                cancelled: false,
            };
        }

        let waves = plan_waves(&calls, self.invoker.registry());
        let wave_count = waves.iter().max().map(|w| w + 1).unwrap_or(1);
        let total = calls.len();

        let mut results: HashMap<usize, ToolInvocation> = HashMap::new();
        let mut was_cancelled = false;

        'waves: for wave in 0..wave_count {
            if cancel.is_cancelled() {
                was_cancelled = true;
                break;
            }

            let members: Vec<ToolCall> = calls
                .iter()
                .zip(waves.iter())
                .filter(|(_, w)| **w == wave)
                .map(|(c, _)| c.clone())
                .collect();

            let semaphore = Arc::new(Semaphore::new(self.max_parallel));
            let mut join_set: JoinSet<ToolInvocation> = JoinSet::new();
            for call in members {
                let invoker = Arc::clone(&self.invoker);
                let semaphore = Arc::clone(&semaphore);
                let token = cancel.clone();
                join_set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    if token.is_cancelled() {
                        cancelled_invocation(&call)
                    } else {
                        invoker.invoke(&call).await
                    }
                });
            }

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        join_set.abort_all();
                        while let Some(joined) = join_set.join_next().await {
                            if let Ok(invocation) = joined {
                                results.insert(invocation.call_id, invocation);
                            }
                        }
                        was_cancelled = true;
                        break 'waves;
                    }
                    joined = join_set.join_next() => {
                        match joined {
                            Some(Ok(invocation)) => {
                                results.insert(invocation.call_id, invocation);
                            }
                            Some(Err(e)) => {
                                tracing::error!("tool task panicked: {e}");
                            }
                            None => break,
                        }
                    }
                }
            }
        }

        // Anything without a result was cancelled before it could run.
        let invocations: Vec<ToolInvocation> = calls
            .iter()
            .map(|call| {
                results
                    .remove(&call.call_id)
                    .unwrap_or_else(|| cancelled_invocation(call))
            })
            .collect();

        let summary = BatchSummary {
            wave_count,
            parallelism_factor: total as f64 / wave_count as f64,
            execution_time_ms: started.elapsed().as_millis(),
        };
        tracing::debug!(
            waves = summary.wave_count,
            factor = summary.parallelism_factor,
            "batch complete"
        );

        BatchResult {
            invocations,
            summary,
            cancelled: was_cancelled,
        }
    }
}

fn cancelled_invocation(call: &ToolCall) -> ToolInvocation {
    let now = Utc::now();
    ToolInvocation {
        tool_name: call.name.clone(),
        call_id: call.call_id,
        started_at: now,
        finished_at: now,
        outcome: ToolOutcome::Failure {
            error: "cancelled".into(),
            kind: FailureKind::Cancelled,
            metadata: Value::Null,
        },
        masked_content: "error: cancelled".into(),
        compression_ratio: 1.0,
    }
}

/// Assign a wave index to each call: wave k holds the calls whose
/// dependencies are all satisfied by waves < k (Kahn-style grouping; with
/// dependencies always pointing at earlier submissions a forward pass
/// suffices).
fn plan_waves(calls: &[ToolCall], registry: &Arc<ToolRegistry>) -> Vec<usize> {
    let accesses: Vec<Access> = calls.iter().map(|c| classify(c, registry)).collect();

    let mut waves = vec![0usize; calls.len()];
    for i in 0..calls.len() {
        let mut deps: HashSet<usize> = HashSet::new();
        for j in 0..i {
            if depends_on(&accesses[i], &accesses[j]) {
                deps.insert(j);
            }
        }
        waves[i] = deps.iter().map(|&j| waves[j] + 1).max().unwrap_or(0);
    }
    waves
}

/// Does `later` depend on `earlier`?
fn depends_on(later: &Access, earlier: &Access) -> bool {
    match (later, earlier) {
        (Access::Destructive, _) => true,
        // Writes serialize against any earlier touch of the same path, and
        // against destructive commands whose effect is unknown.
        (Access::Write(p), Access::Read(q) | Access::Write(q)) => p == q,
        (Access::Write(_), Access::Destructive) => true,
        // Reads serialize against earlier writes of the same path.
        (Access::Read(p), Access::Write(q)) => p == q,
        (Access::Read(_), Access::Destructive) => true,
        (Access::Independent, Access::Destructive) => true,
        _ => false,
    }
}

/// Classify one call's shared-state access from its registry category and
/// its `path` argument.  Unknown tools are treated as destructive.
fn classify(call: &ToolCall, registry: &Arc<ToolRegistry>) -> Access {
    let path = call
        .arguments
        .get("path")
        .and_then(Value::as_str)
        .map(str::to_owned);

    let Some(tool) = registry.get(&call.name) else {
        return Access::Destructive;
    };

    match tool.category() {
        ToolCategory::Execution => Access::Destructive,
        ToolCategory::FileWrite | ToolCategory::GitWrite => match path {
            Some(p) => Access::Write(p),
            None => Access::Destructive,
        },
        ToolCategory::ReadOnly | ToolCategory::GitRead => match path {
            Some(p) => Access::Read(p),
            None => Access::Independent,
        },
        // Network traffic is independent of the filesystem unless the call
        // names a path (e.g. a download target).
        ToolCategory::Network => match path {
            Some(p) => Access::Write(p),
            None => Access::Independent,
        },
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
