//! Streaming LLM clients and their request/response types.

pub mod provider;
pub mod providers;
pub mod types;

pub use provider::{StreamError, StreamResponse, StreamingClient};
pub use types::{ChatMessage, ChatRole, CompletionRequest};
