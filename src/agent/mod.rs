//! The agentic execution loop and its supporting pieces: cancellation,
//! approval policy, tool-call parsing, stream filtering, and thought
//! signatures.

pub mod approval;
pub mod cancel;
pub mod loop_;
pub mod signature;
pub mod stream_filter;
pub mod tool_parser;

pub use approval::{ApprovalCallback, ApprovalDecision, AutoApproval, PlanApproval};
pub use cancel::CancelToken;
pub use loop_::{AgentLoop, LoopConfig, TurnStream};
pub use signature::{determine_thinking_level, SignatureChain, ThinkingLevel, ThoughtSignature};
pub use stream_filter::StreamFilter;
pub use tool_parser::ParsedToolCall;
