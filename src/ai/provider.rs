//! The streaming LLM client abstraction.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::agent::CancelToken;

use super::types::CompletionRequest;

/// Errors surfaced by a streaming client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    #[error("stream initialization timed out after {0}s")]
    InitTimeout(u64),
    #[error("stream stalled: no chunk for {0}s")]
    ChunkStall(u64),
    #[error("http error: {0}")]
    Http(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("stream cancelled")]
    Cancelled,
}

/// A lazy sequence of text chunks.  Native function calls are surfaced as
/// synthesized `[TOOL_CALL:...]` marker strings inside the stream, so
/// downstream parsing is uniform.
pub type StreamResponse = Pin<Box<dyn Stream<Item = Result<String, StreamError>> + Send>>;

/// A backend that produces a token stream.
#[async_trait]
pub trait StreamingClient: Send + Sync {
    /// Open a stream for `request`.  Cancelling `cancel` must terminate the
    /// stream promptly at the next chunk boundary.
    async fn stream(
        &self,
        request: CompletionRequest,
        cancel: CancelToken,
    ) -> Result<StreamResponse, StreamError>;

    /// Whether the backend accepts tool schemas natively.  When `false`,
    /// the caller relies on the model emitting markers directly.
    fn supports_native_tools(&self) -> bool;

    /// Provider identifier for the banner line.
    fn provider_name(&self) -> &str;
}
