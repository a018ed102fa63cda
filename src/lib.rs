//! Quarry — the agentic execution engine behind a terminal coding assistant.
//!
//! The engine couples four subsystems:
//!
//! - an intent router that picks a specialized agent for a request
//!   ([`agents`]),
//! - a schema-validated tool catalog behind a permissioned, resource-limited
//!   sandbox ([`tools`], [`sandbox`], [`security`]),
//! - a streaming LLM client that surfaces tool-call markers inside the token
//!   stream ([`ai`]),
//! - and the bounded agentic loop that interleaves streaming with tool
//!   execution under an approval policy ([`agent`]).

pub mod agent;
pub mod agents;
pub mod ai;
pub mod config;
pub mod governance;
pub mod history;
pub mod sandbox;
pub mod security;
pub mod tools;

/// Convenience re-exports for the most commonly used traits and types.
///
/// ```rust
/// use quarry::prelude::*;
/// ```
pub mod prelude {
    pub use crate::agent::{AgentLoop, ApprovalDecision, CancelToken, LoopConfig};
    pub use crate::agents::{AgentManager, Capability, IntentRouter, StreamingChunk};
    pub use crate::ai::provider::StreamingClient;
    pub use crate::ai::types::{ChatMessage, ChatRole, CompletionRequest};
    pub use crate::config::{load_default_config, AppConfig};
    pub use crate::governance::{GovernanceHook, Severity};
    pub use crate::history::ConversationHistory;
    pub use crate::sandbox::{ExecutionLimits, SandboxExecutor};
    pub use crate::security::{CommandValidator, CommandVerdict};
    pub use crate::tools::{Tool, ToolInvoker, ToolRegistry, ToolResult};
}
