//! `AgentLoop` — the controller that interleaves model streaming with tool
//! execution.
//!
//! # Flow for one user turn
//!
//! ```text
//! banner → history(user) → governance → route?
//!    │                                    └─ delegate to AgentManager, stream, return
//!    ▼
//! plan gating (optional, threshold-based, approval callback)
//!    ▼
//! repeat ≤ max_tool_iterations:
//!    stream LLM (markers filtered from display)
//!      → parse accumulated text for tool calls
//!      → none? break (final answer)
//!      → capability check → approval check → schedule waves
//!      → one concise result line per call, feedback prompt, next iteration
//!    ▼
//! history(assistant "[Response completed]"), signature conclusion
//! ```
//!
//! Cancellation stops the stream, cancels in-flight waves, truncates the
//! iteration, and records the partial turn.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};

use crate::agents::{permits, AgentManager, AgentTask, Capability, IntentRouter};
use crate::ai::types::{ChatMessage, CompletionRequest};
use crate::ai::{StreamError, StreamingClient};
use crate::governance::GovernanceHook;
use crate::history::{ConversationHistory, HistoryRole};
use crate::security::CommandValidator;
use crate::tools::{ToolCall, ToolInvoker, ToolOutcome, ToolScheduler};

use super::approval::{ApprovalCallback, ApprovalDecision, PlanApproval};
use super::cancel::CancelToken;
use super::signature::{determine_thinking_level, SignatureChain};
use super::stream_filter::StreamFilter;
use super::tool_parser;

/// A lazy sequence of display chunks for one turn.
pub type TurnStream<'a> = Pin<Box<dyn Stream<Item = String> + Send + 'a>>;

/// Runtime configuration for an [`AgentLoop`].
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Model identifier passed to the streaming client.
    pub model: String,
    /// System instructions for the agentic loop.
    pub system_prompt: String,
    /// Maximum stream → parse → execute iterations per turn.
    pub max_tool_iterations: usize,
    /// History turns included as LLM context.
    pub context_turns: usize,
    /// Capabilities the loop acts under; tool calls outside this set are
    /// rejected without side effects.
    pub capabilities: HashSet<Capability>,
    /// Emit the `[Using PROVIDER]` banner line.
    pub show_provider_banner: bool,
    /// Emit the one-line speedup summary after parallel waves.
    pub show_parallel_stats: bool,
    /// Stream HIGH/CRITICAL governance reports.
    pub surface_governance: bool,
    /// Bypass intent routing entirely.
    pub skip_routing: bool,
    /// Plan gating kicks in at this many sub-tasks (0 disables it).
    pub plan_gating_threshold: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            system_prompt: default_system_prompt(),
            max_tool_iterations: 10,
            context_turns: 20,
            capabilities: [
                Capability::ReadOnly,
                Capability::Design,
                Capability::FileEdit,
                Capability::BashExec,
                Capability::Network,
            ]
            .into_iter()
            .collect(),
            show_provider_banner: false,
            show_parallel_stats: true,
            surface_governance: true,
            skip_routing: false,
            plan_gating_threshold: 0,
        }
    }
}

fn default_system_prompt() -> String {
    "You are a coding assistant running in a terminal. When you need to act, emit a tool \
     call marker of the form [TOOL_CALL:<tool>:<json-arguments>] using the provided tool \
     schemas. Otherwise answer in plain prose."
        .to_string()
}

/// The orchestrating controller.  Holds no back-pointers to the agents it
/// invokes; conversation state lives in the shared history.
pub struct AgentLoop {
    provider: Arc<dyn StreamingClient>,
    invoker: Arc<ToolInvoker>,
    scheduler: ToolScheduler,
    router: IntentRouter,
    manager: Arc<AgentManager>,
    history: Arc<ConversationHistory>,
    governance: Arc<dyn GovernanceHook>,
    approval: Arc<dyn ApprovalCallback>,
    validator: Arc<CommandValidator>,
    config: LoopConfig,
}

impl AgentLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn StreamingClient>,
        invoker: Arc<ToolInvoker>,
        scheduler: ToolScheduler,
        router: IntentRouter,
        manager: Arc<AgentManager>,
        history: Arc<ConversationHistory>,
        governance: Arc<dyn GovernanceHook>,
        approval: Arc<dyn ApprovalCallback>,
        validator: Arc<CommandValidator>,
        config: LoopConfig,
    ) -> Self {
        Self {
            provider,
            invoker,
            scheduler,
            router,
            manager,
            history,
            governance,
            approval,
            validator,
            config,
        }
    }

    pub fn history(&self) -> &Arc<ConversationHistory> {
        &self.history
    }

    pub fn invoker(&self) -> &Arc<ToolInvoker> {
        &self.invoker
    }

    pub fn manager(&self) -> &Arc<AgentManager> {
        &self.manager
    }

    /// Handle one user turn, producing the display chunk stream.
    #[tracing::instrument(name = "agent.chat", skip_all, fields(model = %self.config.model, msg_len = message.len()))]
    pub fn chat(&self, message: String, cancel: CancelToken) -> TurnStream<'_> {
        Box::pin(async_stream::stream! {
            if self.config.show_provider_banner {
                yield format!("[Using {}]\n", self.provider.provider_name().to_uppercase());
            }

            self.history.append(HistoryRole::User, &message);

            let report = self.governance.observe("chat", &message);
            if self.config.surface_governance && report.should_surface() {
                yield format!("{}\n\n", report.text);
            }

            // ── Routing ────────────────────────────────────────────────
            if !self.config.skip_routing {
                if let Some(decision) = self.router.route(&message) {
                    yield format!(
                        "→ Routing to {} ({}%)\n",
                        decision.agent,
                        (decision.confidence * 100.0) as u32
                    );
                    if let Some(descriptor) = self.manager.descriptor(&decision.agent) {
                        yield format!("   {}\n\n", descriptor.description);
                    }
                    let task = match AgentTask::new(message.clone()) {
                        Ok(task) => task,
                        Err(e) => {
                            yield format!("❌ Error: {e}\n");
                            return;
                        }
                    };
                    match self.manager.invoke(&decision.agent, task, cancel.clone()).await {
                        Ok(mut delegated) => {
                            while let Some(chunk) = delegated.next().await {
                                if cancel.is_cancelled() {
                                    yield "\n⏹ Cancelled.\n".to_string();
                                    return;
                                }
                                yield chunk;
                            }
                        }
                        Err(e) => yield format!("❌ Error: {e}\n"),
                    }
                    return;
                }
                if let Some(suggestion) = self.router.suggestion(&message) {
                    yield format!("{suggestion}\n\n");
                }
            }

            // ── Plan gating ────────────────────────────────────────────
            if self.config.plan_gating_threshold > 0 {
                match self.try_plan(&message, &cancel).await {
                    PlanGate::Proceed => {}
                    PlanGate::Show(plan_text, tasks) => {
                        yield plan_text.clone();
                        yield "\n**Execute this plan?**\n".to_string();
                        match self.approval.request_plan_approval(&plan_text).await {
                            PlanApproval::Reject => {
                                yield "\n**Plan cancelled.**\n".to_string();
                                return;
                            }
                            PlanApproval::Edit => {
                                yield "\n*Proceeding with the original plan.*\n\n".to_string();
                            }
                            PlanApproval::Approve => {
                                yield format!("\n**Executing plan ({} tasks)…**\n\n", tasks.len());
                            }
                        }
                    }
                }
            }

            // ── Agentic iteration ──────────────────────────────────────
            let known_tools = self.invoker.registry().names();
            let mut signature = SignatureChain::new(determine_thinking_level(&message));
            signature.refresh(format!("Starting task: {}", truncate(&message, 200)), "analyze");

            let mut current_message = message.clone();
            let mut iterations_used = 0usize;
            let mut exhausted = true;

            for iteration in 0..self.config.max_tool_iterations {
                iterations_used = iteration + 1;
                if cancel.is_cancelled() {
                    yield "\n⏹ Cancelled.\n".to_string();
                    self.history.append(HistoryRole::Assistant, "[Cancelled]");
                    return;
                }

                let request = self.build_request(&current_message, iteration == 0);
                let mut llm = match self.provider.stream(request, cancel.clone()).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        yield format!("❌ Error: {e}\n");
                        self.history.append(HistoryRole::Assistant, "[Stream error]");
                        return;
                    }
                };

                let mut filter = StreamFilter::new();
                let mut accumulated = String::new();
                let mut stream_failed = false;
                while let Some(item) = llm.next().await {
                    match item {
                        Ok(chunk) => {
                            accumulated.push_str(&chunk);
                            let visible = filter.process_chunk(&chunk);
                            if !visible.is_empty() {
                                yield visible;
                            }
                        }
                        Err(StreamError::Cancelled) => {
                            yield "\n⏹ Cancelled.\n".to_string();
                            self.history.append(HistoryRole::Assistant, "[Cancelled]");
                            return;
                        }
                        Err(e) => {
                            yield format!("\n❌ Error: {e}\n");
                            stream_failed = true;
                            break;
                        }
                    }
                }
                let remaining = filter.flush();
                if !remaining.is_empty() {
                    yield remaining;
                }
                if stream_failed {
                    self.history.append(HistoryRole::Assistant, "[Stream error]");
                    return;
                }

                let parsed = tool_parser::extract(&accumulated, &known_tools);
                if parsed.is_empty() {
                    exhausted = false;
                    break;
                }
                tracing::debug!(count = parsed.len(), "tool calls extracted");

                // Capability and approval screening, in submission order.
                let mut feedback: Vec<Option<String>> = vec![None; parsed.len()];
                let mut batch: Vec<ToolCall> = Vec::new();
                for (idx, call) in parsed.iter().enumerate() {
                    let category = self
                        .invoker
                        .registry()
                        .get(&call.name)
                        .map(|t| t.category());
                    if let Some(category) = category {
                        if !permits(&self.config.capabilities, category) {
                            yield format!("❌ {}: not permitted by agent capabilities\n", call.name);
                            feedback[idx] = Some(format!(
                                "Tool {} rejected: the active agent lacks the capability for this tool",
                                call.name
                            ));
                            continue;
                        }
                    }
                    if self.invoker.registry().is_side_effecting(&call.name) {
                        let summary = summarize_call(call);
                        match self.approval.request_approval(&call.name, &summary).await {
                            ApprovalDecision::Deny => {
                                yield format!("❌ {}: denied by user\n", call.name);
                                feedback[idx] = Some(format!(
                                    "Tool {} denied by the user; do not retry it",
                                    call.name
                                ));
                                continue;
                            }
                            ApprovalDecision::AllowAlways => {
                                self.grant_always(call);
                            }
                            ApprovalDecision::AllowOnce => {}
                        }
                    }
                    batch.push(ToolCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                        call_id: idx,
                    });
                }

                let batch_len = batch.len();
                if batch_len > 0 {
                    let result = self.scheduler.execute_batch(batch, &cancel).await;

                    for invocation in &result.invocations {
                        let line = match &invocation.outcome {
                            ToolOutcome::Success { .. } => format!("✓ {}\n", invocation.tool_name),
                            ToolOutcome::Failure { error, kind, .. } => format!(
                                "❌ {} ({kind:?}): {}\n",
                                invocation.tool_name,
                                truncate(error, 120)
                            ),
                        };
                        yield line;
                        let fb = match &invocation.outcome {
                            ToolOutcome::Success { .. } => format!(
                                "Tool {} succeeded: {}",
                                invocation.tool_name, invocation.masked_content
                            ),
                            ToolOutcome::Failure { error, kind, .. } => format!(
                                "Tool {} failed ({kind:?}): {error}",
                                invocation.tool_name
                            ),
                        };
                        feedback[invocation.call_id] = Some(fb);
                    }

                    if result.cancelled {
                        yield "\n⏹ Cancelled.\n".to_string();
                        self.history.append(HistoryRole::Assistant, "[Cancelled]");
                        return;
                    }

                    if self.config.show_parallel_stats
                        && batch_len > 1
                        && result.summary.parallelism_factor > 1.0
                    {
                        yield format!(
                            "\n⚡ Parallel: {} waves, {:.1}x speedup ({}ms)\n",
                            result.summary.wave_count,
                            result.summary.parallelism_factor,
                            result.summary.execution_time_ms
                        );
                    }
                }

                let feedback_lines: Vec<String> = feedback.into_iter().flatten().collect();
                self.history
                    .append(HistoryRole::Tool, feedback_lines.join("\n"));

                for line in feedback_lines.iter().filter(|l| l.contains("succeeded")) {
                    signature.add_insight(format!("Step {}: {}", iteration + 1, truncate(line, 100)));
                }
                signature.refresh(
                    format!("Iteration {}: executed {} tools", iteration + 1, batch_len),
                    "continue or summarize",
                );

                current_message = format!(
                    "Tool execution results:\n{}\n\nContinue or summarize.",
                    feedback_lines.join("\n")
                );
                yield "\n".to_string();

                if cancel.is_cancelled() {
                    yield "⏹ Cancelled.\n".to_string();
                    self.history.append(HistoryRole::Assistant, "[Cancelled]");
                    return;
                }
            }

            if exhausted
                && iterations_used > 0
                && iterations_used == self.config.max_tool_iterations
            {
                yield format!(
                    "\n[Warning: reached maximum tool iterations ({})]\n",
                    self.config.max_tool_iterations
                );
            }

            self.history.append(HistoryRole::Assistant, "[Response completed]");
            if iterations_used > 0 {
                signature.refresh(
                    format!("Completed task after {iterations_used} iterations"),
                    "task complete",
                );
            }
        })
    }

    /// Assemble the completion request: system prompt, recent history, and
    /// the current message (which is already the last history entry on the
    /// first iteration).
    fn build_request(&self, current_message: &str, first_iteration: bool) -> CompletionRequest {
        let mut messages = vec![ChatMessage::system(&self.config.system_prompt)];
        let turns = self.history.last_turns(self.config.context_turns);
        for entry in &turns {
            messages.push(match entry.role {
                HistoryRole::User => ChatMessage::user(&entry.content),
                HistoryRole::Assistant => ChatMessage::assistant(&entry.content),
                HistoryRole::Tool => {
                    ChatMessage::user(format!("Tool results:\n{}", entry.content))
                }
            });
        }
        let already_present = first_iteration
            && turns
                .last()
                .is_some_and(|t| t.role == HistoryRole::User && t.content == current_message);
        if !already_present {
            messages.push(ChatMessage::user(current_message));
        }

        let mut request = CompletionRequest::new(self.config.model.clone(), messages);
        if self.provider.supports_native_tools() {
            request = request.with_tools(self.invoker.registry().schemas_for_llm());
        }
        request
    }

    async fn try_plan(&self, message: &str, cancel: &CancelToken) -> PlanGate {
        let planner = match self.manager.planner() {
            Ok(planner) => planner,
            Err(e) => {
                tracing::warn!("plan gating skipped: {e}");
                return PlanGate::Proceed;
            }
        };
        match planner.plan(message, cancel).await {
            Ok(tasks) if tasks.len() >= self.config.plan_gating_threshold => {
                let text = format_plan(&tasks, message);
                PlanGate::Show(text, tasks)
            }
            Ok(_) => PlanGate::Proceed,
            Err(e) => {
                tracing::warn!("plan generation failed, proceeding without gate: {e}");
                PlanGate::Proceed
            }
        }
    }

    /// `allow_always` adds the command base (or the tool name) to the
    /// session allow-list consulted by the validator.
    fn grant_always(&self, call: &tool_parser::ParsedToolCall) {
        let base = if call.name == "bash_command" {
            call.arguments
                .get("command")
                .and_then(serde_json::Value::as_str)
                .and_then(|cmd| shlex::split(cmd))
                .and_then(|parts| parts.into_iter().next())
        } else {
            None
        };
        if let Some(base) = base {
            self.validator.allow_list().grant_session(&base);
            tracing::info!("session allow-list extended with '{base}'");
        }
    }
}

enum PlanGate {
    Proceed,
    Show(String, Vec<String>),
}

fn format_plan(tasks: &[String], original_request: &str) -> String {
    let mut lines = vec![
        "─".repeat(50),
        "📋 EXECUTION PLAN".to_string(),
        "─".repeat(50),
        String::new(),
        format!("Request: {}", truncate(original_request, 100)),
        String::new(),
        format!("Tasks ({}):", tasks.len()),
    ];
    for (i, task) in tasks.iter().enumerate() {
        lines.push(format!("  {}. {}", i + 1, truncate(task, 80)));
    }
    lines.push(String::new());
    lines.push("─".repeat(50));
    lines.join("\n")
}

fn summarize_call(call: &tool_parser::ParsedToolCall) -> String {
    let args = call.arguments.to_string();
    format!("{}({})", call.name, truncate(&args, 160))
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}…")
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::approval::AutoApproval;
    use crate::agents::AgentDeps;
    use crate::ai::provider::{StreamError, StreamResponse};
    use crate::config::{CircuitBreakerConfig, RouterConfig, ToolsConfig};
    use crate::governance::PatternGovernance;
    use crate::sandbox::{ExecutionLimits, SandboxExecutor};
    use crate::security::CommandAllowList;
    use crate::tools::{register_builtin_tools, ToolContext, ToolRegistry};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Provider that replays scripted responses, one per `stream` call.
    struct ScriptedProvider {
        responses: Vec<String>,
        index: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                responses: responses.into_iter().map(str::to_string).collect(),
                index: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl StreamingClient for ScriptedProvider {
        async fn stream(
            &self,
            _request: CompletionRequest,
            _cancel: CancelToken,
        ) -> Result<StreamResponse, StreamError> {
            let i = self.index.fetch_add(1, Ordering::SeqCst);
            let response = self
                .responses
                .get(i)
                .cloned()
                .unwrap_or_else(|| "No more responses.".to_string());
            Ok(Box::pin(async_stream::stream! {
                // Split into two chunks to exercise the filter's buffering.
                let mid = response.len() / 2;
                let mid = (0..=mid).rev().find(|&m| response.is_char_boundary(m)).unwrap_or(0);
                yield Ok(response[..mid].to_string());
                yield Ok(response[mid..].to_string());
            }))
        }
        fn supports_native_tools(&self) -> bool {
            false
        }
        fn provider_name(&self) -> &str {
            "scripted"
        }
    }

    fn build_loop(
        provider: Arc<dyn StreamingClient>,
        workspace: Option<std::path::PathBuf>,
        config: LoopConfig,
    ) -> AgentLoop {
        let validator = Arc::new(CommandValidator::new(
            true,
            Arc::new(CommandAllowList::new(&[])),
        ));
        let executor = Arc::new(SandboxExecutor::new(ExecutionLimits::default()));
        let mut registry = ToolRegistry::new();
        register_builtin_tools(
            &mut registry,
            &ToolContext {
                validator: validator.clone(),
                executor,
                workspace_root: workspace,
                backups_enabled: false,
                warn_requires_approval: false,
            },
        );
        let invoker = Arc::new(ToolInvoker::new(
            Arc::new(registry),
            CircuitBreakerConfig::default(),
            ToolsConfig::default(),
        ));
        let scheduler = ToolScheduler::new(invoker.clone(), 4);
        let manager = Arc::new(AgentManager::new(AgentDeps {
            provider: provider.clone(),
            invoker: invoker.clone(),
            model: "test-model".into(),
        }));
        AgentLoop::new(
            provider,
            invoker,
            scheduler,
            IntentRouter::with_builtin_table(RouterConfig::default()),
            manager,
            Arc::new(ConversationHistory::new()),
            Arc::new(PatternGovernance::new()),
            Arc::new(AutoApproval::new(false)),
            validator,
            config,
        )
    }

    async fn collect(loop_: &AgentLoop, message: &str) -> String {
        let stream = loop_.chat(message.to_string(), CancelToken::new());
        let chunks: Vec<String> = stream.collect().await;
        chunks.join("")
    }

    #[tokio::test]
    async fn plain_answer_passes_through() {
        let provider = ScriptedProvider::new(vec!["The answer is 4."]);
        let loop_ = build_loop(
            provider,
            None,
            LoopConfig {
                skip_routing: true,
                ..Default::default()
            },
        );
        let out = collect(&loop_, "what is 2+2, no lists please").await;
        assert!(out.contains("The answer is 4."));
        // Final assistant turn recorded.
        let history = loop_.history().snapshot();
        assert_eq!(history.last().unwrap().content, "[Response completed]");
    }

    #[tokio::test]
    async fn tool_loop_writes_file_and_confirms() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("notes.md");
        let marker = format!(
            "[TOOL_CALL:write_file:{{\"path\":\"{}\",\"content\":\"hello\"}}]",
            target.display()
        );
        let provider = ScriptedProvider::new(vec![&marker, "Created notes.md with hello."]);
        let loop_ = build_loop(
            provider,
            None,
            LoopConfig {
                skip_routing: true,
                ..Default::default()
            },
        );
        let out = collect(&loop_, "create a file notes.md containing 'hello'").await;
        assert!(out.contains("✓ write_file"));
        assert!(out.contains("Created notes.md with hello."));
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "hello");
        // The marker itself never reached the display stream.
        assert!(!out.contains("[TOOL_CALL:"));
    }

    #[tokio::test]
    async fn routed_review_request_delegates_without_tools() {
        let provider =
            ScriptedProvider::new(vec!["The auth module validates tokens correctly."]);
        let loop_ = build_loop(provider, None, LoopConfig::default());
        let out = collect(&loop_, "review authentication in src/auth.py").await;
        assert!(out.contains("Routing to reviewer"));
        assert!(out.contains("auth module"));
        // Routed path returns before the agentic loop: no tool lines.
        assert!(!out.contains("✓ "));
    }

    #[tokio::test]
    async fn denied_command_surfaces_validation_error() {
        let marker = r#"[TOOL_CALL:bash_command:{"command":"rm -rf /"}]"#;
        let provider = ScriptedProvider::new(vec![marker, "Understood, I will not do that."]);
        let loop_ = build_loop(
            provider,
            None,
            LoopConfig {
                skip_routing: true,
                ..Default::default()
            },
        );
        let out = collect(&loop_, "please wipe the disk").await;
        // rm is not whitelisted; the validator denies before any spawn.
        assert!(out.contains("bash_command"));
        assert!(out.to_lowercase().contains("validation"));
    }

    #[tokio::test]
    async fn parallel_reads_report_speedup() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "a = 1").unwrap();
        std::fs::write(dir.path().join("b.py"), "b = 2").unwrap();
        let marker = format!(
            "[TOOL_CALL:read_file:{{\"path\":\"{}/a.py\"}}][TOOL_CALL:read_file:{{\"path\":\"{}/b.py\"}}]",
            dir.path().display(),
            dir.path().display()
        );
        let provider = ScriptedProvider::new(vec![&marker, "Both files read."]);
        let loop_ = build_loop(
            provider,
            None,
            LoopConfig {
                skip_routing: true,
                ..Default::default()
            },
        );
        let out = collect(&loop_, "read both files for me").await;
        assert!(out.contains("⚡ Parallel: 1 waves, 2.0x speedup"));
        assert!(out.contains("Both files read."));
    }

    #[tokio::test]
    async fn capability_restriction_blocks_writes() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("blocked.txt");
        let marker = format!(
            "[TOOL_CALL:write_file:{{\"path\":\"{}\",\"content\":\"x\"}}]",
            target.display()
        );
        let provider = ScriptedProvider::new(vec![&marker, "Acknowledged."]);
        let loop_ = build_loop(
            provider,
            None,
            LoopConfig {
                skip_routing: true,
                capabilities: [Capability::ReadOnly, Capability::Design].into_iter().collect(),
                ..Default::default()
            },
        );
        let out = collect(&loop_, "write something").await;
        assert!(out.contains("not permitted by agent capabilities"));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn approval_denial_skips_execution() {
        struct DenyAll;
        #[async_trait]
        impl ApprovalCallback for DenyAll {
            async fn request_approval(&self, _t: &str, _s: &str) -> ApprovalDecision {
                ApprovalDecision::Deny
            }
        }

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("denied.txt");
        let marker = format!(
            "[TOOL_CALL:write_file:{{\"path\":\"{}\",\"content\":\"x\"}}]",
            target.display()
        );
        let provider = ScriptedProvider::new(vec![&marker, "Okay."]);
        let mut loop_ = build_loop(
            provider,
            None,
            LoopConfig {
                skip_routing: true,
                ..Default::default()
            },
        );
        loop_.approval = Arc::new(DenyAll);
        let out = collect(&loop_, "write the file").await;
        assert!(out.contains("denied by user"));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn iteration_bound_emits_warning() {
        // Provider always asks for another read.
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("x.txt");
        std::fs::write(&file, "data").unwrap();
        let marker = format!("[TOOL_CALL:read_file:{{\"path\":\"{}\"}}]", file.display());
        let responses: Vec<String> = (0..12).map(|_| marker.clone()).collect();
        let provider = ScriptedProvider::new(responses.iter().map(String::as_str).collect());
        let loop_ = build_loop(
            provider,
            None,
            LoopConfig {
                skip_routing: true,
                max_tool_iterations: 3,
                ..Default::default()
            },
        );
        let out = collect(&loop_, "keep reading").await;
        assert!(out.contains("maximum tool iterations (3)"));
    }

    #[tokio::test]
    async fn cancellation_truncates_turn() {
        let provider = ScriptedProvider::new(vec!["irrelevant"]);
        let loop_ = build_loop(
            provider,
            None,
            LoopConfig {
                skip_routing: true,
                ..Default::default()
            },
        );
        let cancel = CancelToken::new();
        cancel.cancel();
        let stream = loop_.chat("do something".to_string(), cancel);
        let out: String = stream.collect::<Vec<String>>().await.join("");
        assert!(out.contains("⏹ Cancelled."));
        let history = loop_.history().snapshot();
        assert_eq!(history.last().unwrap().content, "[Cancelled]");
    }

    #[tokio::test]
    async fn governance_critical_is_surfaced() {
        let provider = ScriptedProvider::new(vec!["I will not run that."]);
        let loop_ = build_loop(
            provider,
            None,
            LoopConfig {
                skip_routing: true,
                ..Default::default()
            },
        );
        let out = collect(&loop_, "what does rm -rf / actually do?").await;
        assert!(out.contains("governance"));
    }

    #[tokio::test]
    async fn tool_feedback_recorded_in_history_masked() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("big.txt");
        let body: String = (0..200).map(|i| format!("line {i}\n")).collect();
        std::fs::write(&file, body).unwrap();
        let marker = format!("[TOOL_CALL:read_file:{{\"path\":\"{}\"}}]", file.display());
        let provider = ScriptedProvider::new(vec![&marker, "Done."]);
        let loop_ = build_loop(
            provider,
            None,
            LoopConfig {
                skip_routing: true,
                ..Default::default()
            },
        );
        collect(&loop_, "read the big file").await;
        let history = loop_.history().snapshot();
        let tool_turn = history
            .iter()
            .find(|e| e.role == HistoryRole::Tool)
            .unwrap();
        // The masked form, not the full 200 lines.
        assert!(tool_turn.content.contains("… <hidden"));
    }
}
