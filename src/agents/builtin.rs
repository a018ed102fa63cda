//! Built-in agents: reviewer, planner, executor.
//!
//! Each agent is a streaming handler with a capability set declared at
//! construction.  The reviewer and planner are read-only LLM
//! specializations; the executor turns a request into one shell command
//! and runs it through the tool invoker.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::json;

use crate::agent::CancelToken;
use crate::ai::types::{ChatMessage, CompletionRequest};
use crate::ai::StreamingClient;
use crate::tools::{ToolCall, ToolInvoker, ToolOutcome};

use super::chunk::StreamingChunk;
use super::descriptor::{AgentDescriptor, AgentTask, Capability};

/// A lazy sequence of normalized chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamingChunk> + Send>>;

/// A named specialization with a capability set and a streaming handler.
#[async_trait]
pub trait Agent: Send + Sync {
    fn descriptor(&self) -> &AgentDescriptor;

    /// Handle one task, producing a chunk stream.
    async fn stream(&self, task: AgentTask, cancel: CancelToken) -> ChunkStream;
}

impl std::fmt::Debug for dyn Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.descriptor().name)
            .finish()
    }
}

/// Descriptors for the built-in agents, keyed by constructor name.
pub fn builtin_descriptors() -> Vec<AgentDescriptor> {
    vec![
        AgentDescriptor {
            name: "reviewer".into(),
            role: "Code Reviewer".into(),
            description: "Reviews code for correctness, quality and security issues".into(),
            capabilities: caps(&[Capability::ReadOnly, Capability::Design]),
            constructor: "reviewer".into(),
        },
        AgentDescriptor {
            name: "planner".into(),
            role: "Planner".into(),
            description: "Breaks work down into ordered, reviewable steps".into(),
            capabilities: caps(&[Capability::ReadOnly, Capability::Design]),
            constructor: "planner".into(),
        },
        AgentDescriptor {
            name: "executor".into(),
            role: "Command Executor".into(),
            description: "Turns requests into shell commands and runs them".into(),
            capabilities: caps(&[
                Capability::ReadOnly,
                Capability::FileEdit,
                Capability::BashExec,
            ]),
            constructor: "executor".into(),
        },
    ]
}

fn caps(list: &[Capability]) -> HashSet<Capability> {
    list.iter().copied().collect()
}

/// Collect a full (non-streamed) completion from the provider.
async fn collect_text(
    provider: &Arc<dyn StreamingClient>,
    request: CompletionRequest,
    cancel: &CancelToken,
) -> Result<String, String> {
    let mut stream = provider
        .stream(request, cancel.clone())
        .await
        .map_err(|e| e.to_string())?;
    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        text.push_str(&chunk.map_err(|e| e.to_string())?);
    }
    Ok(text)
}

/// Stream an LLM response as `Text` chunks behind a status line.
fn llm_chunk_stream(
    provider: Arc<dyn StreamingClient>,
    request: CompletionRequest,
    status: String,
    cancel: CancelToken,
) -> ChunkStream {
    Box::pin(async_stream::stream! {
        yield StreamingChunk::Status(status);
        match provider.stream(request, cancel).await {
            Err(e) => yield StreamingChunk::Error(e.to_string()),
            Ok(mut inner) => {
                while let Some(item) = inner.next().await {
                    match item {
                        Ok(text) => yield StreamingChunk::Text(text),
                        Err(e) => {
                            yield StreamingChunk::Error(e.to_string());
                            break;
                        }
                    }
                }
            }
        }
    })
}

// ─── ReviewerAgent ────────────────────────────────────────────────────────────

pub struct ReviewerAgent {
    descriptor: AgentDescriptor,
    provider: Arc<dyn StreamingClient>,
    model: String,
}

impl ReviewerAgent {
    pub fn new(
        descriptor: AgentDescriptor,
        provider: Arc<dyn StreamingClient>,
        model: String,
    ) -> Self {
        Self {
            descriptor,
            provider,
            model,
        }
    }
}

const REVIEWER_PROMPT: &str = "You are a senior code reviewer. Analyze the code the user \
points you at: correctness first, then security, then style. Be specific, cite locations, \
and do not propose running commands or editing files.";

#[async_trait]
impl Agent for ReviewerAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn stream(&self, task: AgentTask, cancel: CancelToken) -> ChunkStream {
        let request = CompletionRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::system(REVIEWER_PROMPT),
                ChatMessage::user(task.request),
            ],
        );
        llm_chunk_stream(
            Arc::clone(&self.provider),
            request,
            "Reviewing…".into(),
            cancel,
        )
    }
}

// ─── PlannerAgent ─────────────────────────────────────────────────────────────

pub struct PlannerAgent {
    descriptor: AgentDescriptor,
    provider: Arc<dyn StreamingClient>,
    model: String,
}

impl PlannerAgent {
    pub fn new(
        descriptor: AgentDescriptor,
        provider: Arc<dyn StreamingClient>,
        model: String,
    ) -> Self {
        Self {
            descriptor,
            provider,
            model,
        }
    }

    /// Produce an ordered task list for plan gating.  One numbered or
    /// dashed line per step in the model output becomes one task.
    pub async fn plan(&self, request: &str, cancel: &CancelToken) -> Result<Vec<String>, String> {
        let completion = CompletionRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::system(
                    "Break the request into an ordered list of concrete sub-tasks. \
                     Reply with one numbered line per sub-task, nothing else.",
                ),
                ChatMessage::user(request.to_string()),
            ],
        );
        let text = collect_text(&self.provider, completion, cancel).await?;
        Ok(parse_plan_lines(&text))
    }
}

/// Extract step lines ("1. x", "- x") from planner output.
pub fn parse_plan_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            let body = trimmed
                .strip_prefix('-')
                .or_else(|| trimmed.strip_prefix('*'))
                .map(str::trim)
                .or_else(|| {
                    let (head, tail) = trimmed.split_once(['.', ')'])?;
                    (!head.is_empty() && head.chars().all(|c| c.is_ascii_digit()))
                        .then(|| tail.trim())
                });
            body.filter(|b| !b.is_empty()).map(str::to_owned)
        })
        .collect()
}

const PLANNER_PROMPT: &str = "You are a planning specialist. Decompose the request into \
ordered, concrete steps with clear outcomes. Identify risks. Do not execute anything.";

#[async_trait]
impl Agent for PlannerAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn stream(&self, task: AgentTask, cancel: CancelToken) -> ChunkStream {
        let request = CompletionRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::system(PLANNER_PROMPT),
                ChatMessage::user(task.request),
            ],
        );
        llm_chunk_stream(
            Arc::clone(&self.provider),
            request,
            "Planning…".into(),
            cancel,
        )
    }
}

// ─── ExecutorAgent ────────────────────────────────────────────────────────────

pub struct ExecutorAgent {
    descriptor: AgentDescriptor,
    provider: Arc<dyn StreamingClient>,
    invoker: Arc<ToolInvoker>,
    model: String,
}

impl ExecutorAgent {
    pub fn new(
        descriptor: AgentDescriptor,
        provider: Arc<dyn StreamingClient>,
        invoker: Arc<ToolInvoker>,
        model: String,
    ) -> Self {
        Self {
            descriptor,
            provider,
            invoker,
            model,
        }
    }
}

const EXECUTOR_PROMPT: &str = "Convert the user's request into exactly one safe shell \
command. Reply with only the command, no prose, no code fences.";

#[async_trait]
impl Agent for ExecutorAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn stream(&self, task: AgentTask, cancel: CancelToken) -> ChunkStream {
        let provider = Arc::clone(&self.provider);
        let invoker = Arc::clone(&self.invoker);
        let model = self.model.clone();
        Box::pin(async_stream::stream! {
            let request = CompletionRequest::new(
                model,
                vec![
                    ChatMessage::system(EXECUTOR_PROMPT),
                    ChatMessage::user(task.request.clone()),
                ],
            );
            let command = match collect_text(&provider, request, &cancel).await {
                Ok(text) => strip_fences(&text),
                Err(e) => {
                    yield StreamingChunk::Error(e);
                    return;
                }
            };
            if command.is_empty() {
                yield StreamingChunk::Error("no command produced".into());
                return;
            }

            yield StreamingChunk::Command(command.clone());
            yield StreamingChunk::Executing(command.clone());

            let call = ToolCall {
                name: "bash_command".into(),
                arguments: json!({ "command": command }),
                call_id: 0,
            };
            let invocation = invoker.invoke(&call).await;
            match invocation.outcome {
                ToolOutcome::Success { data, metadata } => {
                    yield StreamingChunk::Result(json!({
                        "command": command,
                        "stdout": data.as_str().unwrap_or_default(),
                        "stderr": "",
                        "metadata": metadata,
                    }));
                }
                ToolOutcome::Failure { error, .. } => {
                    yield StreamingChunk::Error(error);
                }
            }
        })
    }
}

/// Strip surrounding code fences from a one-line command reply.
fn strip_fences(text: &str) -> String {
    let trimmed = text.trim();
    let without = trimmed
        .strip_prefix("```sh")
        .or_else(|| trimmed.strip_prefix("```bash"))
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without.trim_end_matches("```").trim().to_string()
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_declare_capabilities() {
        let descriptors = builtin_descriptors();
        let reviewer = descriptors.iter().find(|d| d.name == "reviewer").unwrap();
        assert!(reviewer.capabilities.contains(&Capability::ReadOnly));
        assert!(!reviewer.capabilities.contains(&Capability::BashExec));

        let executor = descriptors.iter().find(|d| d.name == "executor").unwrap();
        assert!(executor.capabilities.contains(&Capability::BashExec));
    }

    #[test]
    fn plan_lines_parse_numbered_and_dashed() {
        let text = "1. First step\n2) Second step\n- Third step\nnoise line\n";
        let tasks = parse_plan_lines(text);
        assert_eq!(tasks, vec!["First step", "Second step", "Third step"]);
    }

    #[test]
    fn strip_fences_variants() {
        assert_eq!(strip_fences("ls -la"), "ls -la");
        assert_eq!(strip_fences("```bash\nls -la\n```"), "ls -la");
        assert_eq!(strip_fences("```\ngit status\n```"), "git status");
    }
}
