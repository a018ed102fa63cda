//! Streaming client for OpenAI-compatible chat-completion endpoints.
//!
//! Works against any backend speaking the `/chat/completions` SSE protocol
//! (OpenAI, Gemini's OpenAI surface, OpenRouter, Ollama).  Responsibilities
//! beyond plain proxying:
//!
//! - initialization timeout before the first chunk, stall timeout between
//!   chunks,
//! - temperature forced to 1.0 for model families that require it,
//! - native `tool_calls` deltas accumulated and re-emitted as
//!   `[TOOL_CALL:<name>:<json>]` marker strings,
//! - tolerant SSE parsing (object or single-element array, trailing commas).

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::CancelToken;
use crate::ai::provider::{StreamError, StreamResponse, StreamingClient};
use crate::ai::types::{ChatRole, CompletionRequest};
use crate::config::LlmConfig;

const MAX_RETRIES: u32 = 3;

/// Model families that reject temperatures other than 1.0.
fn requires_unit_temperature(model: &str) -> bool {
    model.starts_with("gemini-3") || model.starts_with("o1") || model.starts_with("gpt-5")
}

// ─── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ApiStreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

// ─── Config ───────────────────────────────────────────────────────────────────

/// Connection settings for one OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub init_timeout: Duration,
    pub chunk_timeout: Duration,
    pub extra_headers: HashMap<String, String>,
}

impl OpenAiCompatibleConfig {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            init_timeout: Duration::from_secs(10),
            chunk_timeout: Duration::from_secs(30),
            extra_headers: HashMap::new(),
        }
    }

    /// Build from the application config, resolving the API key env var.
    pub fn from_llm_config(cfg: &LlmConfig) -> Self {
        let api_key = std::env::var(&cfg.api_key_env).unwrap_or_default();
        let base_url = match cfg.provider.as_str() {
            "openai" => "https://api.openai.com/v1".to_string(),
            "gemini" => {
                "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
            }
            "openrouter" => "https://openrouter.ai/api/v1".to_string(),
            "ollama" => "http://localhost:11434/v1".to_string(),
            other => other.to_string(), // custom base URL
        };
        Self {
            api_key,
            base_url,
            model: cfg.model_name.clone(),
            init_timeout: Duration::from_secs(cfg.init_timeout_s),
            chunk_timeout: Duration::from_secs(cfg.chunk_timeout_s),
            extra_headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }
}

// ─── Client ───────────────────────────────────────────────────────────────────

/// Streaming client for OpenAI-compatible endpoints.
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    config: OpenAiCompatibleConfig,
    provider_name: String,
    default_temperature: f32,
    max_output_tokens: u32,
    top_p: Option<f32>,
}

impl OpenAiCompatibleClient {
    pub fn new(config: OpenAiCompatibleConfig, provider_name: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            provider_name: provider_name.into(),
            default_temperature: 1.0,
            max_output_tokens: 8192,
            top_p: None,
        }
    }

    pub fn with_sampling(mut self, temperature: f32, max_output_tokens: u32, top_p: Option<f32>) -> Self {
        self.default_temperature = temperature;
        self.max_output_tokens = max_output_tokens;
        self.top_p = top_p;
        self
    }

    fn build_request(&self, request: &CompletionRequest) -> ApiRequest {
        let temperature = if requires_unit_temperature(&request.model) {
            Some(1.0)
        } else {
            request.temperature.or(Some(self.default_temperature))
        };
        ApiRequest {
            model: request.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| ApiMessage {
                    role: match m.role {
                        ChatRole::System => "system",
                        ChatRole::User => "user",
                        ChatRole::Assistant => "assistant",
                    },
                    content: m.content.clone(),
                })
                .collect(),
            temperature,
            max_tokens: request.max_tokens.or(Some(self.max_output_tokens)),
            top_p: request.top_p.or(self.top_p),
            tools: request.tools.clone(),
            stream: true,
        }
    }

    async fn send_with_retry(&self, body: &ApiRequest) -> Result<reqwest::Response, StreamError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(2_u64.pow(attempt - 1))).await;
            }
            let mut builder = self
                .client
                .post(&url)
                .header("Content-Type", "application/json");
            if !self.config.api_key.is_empty() {
                builder = builder.header(
                    "Authorization",
                    format!("Bearer {}", self.config.api_key),
                );
            }
            for (key, value) in &self.config.extra_headers {
                builder = builder.header(key, value);
            }
            match builder.json(body).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                        let text = response.text().await.unwrap_or_default();
                        return Err(StreamError::Http(format!("status {status}: {text}")));
                    }
                    last_error = Some(StreamError::Http(format!("status {status}")));
                }
                Err(e) => last_error = Some(StreamError::Http(e.to_string())),
            }
        }
        Err(last_error.unwrap_or_else(|| StreamError::Http("request failed".into())))
    }
}

#[async_trait]
impl StreamingClient for OpenAiCompatibleClient {
    async fn stream(
        &self,
        request: CompletionRequest,
        cancel: CancelToken,
    ) -> Result<StreamResponse, StreamError> {
        let body = self.build_request(&request);
        tracing::debug!(
            provider = %self.provider_name,
            model = %body.model,
            messages = body.messages.len(),
            tools = body.tools.len(),
            "opening stream"
        );

        let init_timeout = self.config.init_timeout;
        let chunk_timeout = self.config.chunk_timeout;

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(StreamError::Cancelled),
            sent = tokio::time::timeout(init_timeout, self.send_with_retry(&body)) => {
                sent.map_err(|_| StreamError::InitTimeout(init_timeout.as_secs()))??
            }
        };

        let mut events = response.bytes_stream().eventsource();

        // What the next poll of the SSE stream produced.
        enum Step {
            Cancelled,
            TimedOut,
            Closed,
            Failed(String),
            Event(eventsource_stream::Event),
        }

        let stream = async_stream::stream! {
            let mut first = true;
            let mut pending_tools = ToolCallAccumulator::default();
            loop {
                let deadline = if first { init_timeout } else { chunk_timeout };
                let step = tokio::select! {
                    () = cancel.cancelled() => Step::Cancelled,
                    polled = tokio::time::timeout(deadline, events.next()) => match polled {
                        Err(_) => Step::TimedOut,
                        Ok(None) => Step::Closed,
                        Ok(Some(Err(e))) => Step::Failed(e.to_string()),
                        Ok(Some(Ok(event))) => Step::Event(event),
                    },
                };
                let event = match step {
                    Step::Cancelled => {
                        yield Err(StreamError::Cancelled);
                        break;
                    }
                    Step::TimedOut => {
                        yield Err(if first {
                            StreamError::InitTimeout(deadline.as_secs())
                        } else {
                            StreamError::ChunkStall(deadline.as_secs())
                        });
                        break;
                    }
                    Step::Closed => {
                        for marker in pending_tools.take_markers() {
                            yield Ok(marker);
                        }
                        break;
                    }
                    Step::Failed(reason) => {
                        yield Err(StreamError::Protocol(reason));
                        break;
                    }
                    Step::Event(event) => event,
                };
                first = false;

                if event.data == "[DONE]" {
                    for marker in pending_tools.take_markers() {
                        yield Ok(marker);
                    }
                    break;
                }
                match parse_sse_data(&event.data) {
                    Some(parsed) => {
                        for choice in parsed.choices {
                            if !choice.delta.tool_calls.is_empty() {
                                pending_tools.absorb(&choice.delta.tool_calls);
                            }
                            if let Some(text) = choice.delta.content {
                                if !text.is_empty() {
                                    yield Ok(text);
                                }
                            }
                            if choice.finish_reason.is_some() {
                                for marker in pending_tools.take_markers() {
                                    yield Ok(marker);
                                }
                            }
                        }
                    }
                    None => {
                        tracing::debug!("unparseable SSE fragment skipped");
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    fn supports_native_tools(&self) -> bool {
        true
    }

    fn provider_name(&self) -> &str {
        &self.provider_name
    }
}

/// Parse one SSE data payload.  Accepts a JSON object, a single-element
/// array, and tolerates a trailing comma.
fn parse_sse_data(data: &str) -> Option<ApiStreamResponse> {
    let trimmed = data.trim().trim_end_matches(',');
    let value: Value = serde_json::from_str(trimmed).ok()?;
    let value = match value {
        Value::Array(mut items) if !items.is_empty() => items.remove(0),
        other => other,
    };
    serde_json::from_value(value).ok()
}

/// Accumulates incremental native tool-call deltas keyed by index, then
/// renders them as marker strings.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    calls: BTreeMap<u32, (String, String)>,
}

impl ToolCallAccumulator {
    fn absorb(&mut self, deltas: &[ToolCallDelta]) {
        for delta in deltas {
            let entry = self.calls.entry(delta.index).or_default();
            if let Some(function) = &delta.function {
                if let Some(name) = &function.name {
                    entry.0.push_str(name);
                }
                if let Some(args) = &function.arguments {
                    entry.1.push_str(args);
                }
            }
        }
    }

    /// Drain accumulated calls as `[TOOL_CALL:...]` markers.
    fn take_markers(&mut self) -> Vec<String> {
        let calls = std::mem::take(&mut self.calls);
        calls
            .into_values()
            .filter(|(name, _)| !name.is_empty())
            .map(|(name, args)| {
                let args = if args.trim().is_empty() {
                    "{}".to_string()
                } else {
                    args
                };
                format!("[TOOL_CALL:{name}:{args}]")
            })
            .collect()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::types::ChatMessage;

    fn client() -> OpenAiCompatibleClient {
        OpenAiCompatibleClient::new(
            OpenAiCompatibleConfig::new("key", "https://api.test/v1", "gemini-2.5-flash"),
            "test",
        )
    }

    #[test]
    fn request_includes_messages_and_stream_flag() {
        let c = client();
        let req = CompletionRequest::new(
            "gemini-2.5-flash",
            vec![ChatMessage::system("sys"), ChatMessage::user("hi")],
        );
        let body = c.build_request(&req);
        assert!(body.stream);
        assert_eq!(body.messages.len(), 2);
        assert_eq!(body.messages[0].role, "system");
        assert_eq!(body.messages[1].role, "user");
    }

    #[test]
    fn temperature_forced_for_strict_models() {
        let c = client();
        let req = CompletionRequest::new("gemini-3-pro", vec![]).with_temperature(0.2);
        let body = c.build_request(&req);
        assert_eq!(body.temperature, Some(1.0));
    }

    #[test]
    fn temperature_respected_otherwise() {
        let c = client();
        let req = CompletionRequest::new("gemini-2.5-flash", vec![]).with_temperature(0.3);
        let body = c.build_request(&req);
        assert_eq!(body.temperature, Some(0.3));
    }

    #[test]
    fn parse_object_payload() {
        let data = r#"{"choices":[{"delta":{"content":"hi"},"finish_reason":null}]}"#;
        let parsed = parse_sse_data(data).unwrap();
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("hi"));
    }

    #[test]
    fn parse_array_payload_with_trailing_comma() {
        let data = r#"[{"choices":[{"delta":{"content":"x"}}]}],"#;
        let parsed = parse_sse_data(data).unwrap();
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("x"));
    }

    #[test]
    fn parse_garbage_returns_none() {
        assert!(parse_sse_data("not json").is_none());
    }

    #[test]
    fn tool_call_deltas_become_markers() {
        let mut acc = ToolCallAccumulator::default();
        acc.absorb(&[ToolCallDelta {
            index: 0,
            function: Some(FunctionDelta {
                name: Some("write_file".into()),
                arguments: Some("{\"path\":".into()),
            }),
        }]);
        acc.absorb(&[ToolCallDelta {
            index: 0,
            function: Some(FunctionDelta {
                name: None,
                arguments: Some("\"x\"}".into()),
            }),
        }]);
        let markers = acc.take_markers();
        assert_eq!(markers, vec!["[TOOL_CALL:write_file:{\"path\":\"x\"}]"]);
        // Drained.
        assert!(acc.take_markers().is_empty());
    }

    #[test]
    fn empty_arguments_default_to_object() {
        let mut acc = ToolCallAccumulator::default();
        acc.absorb(&[ToolCallDelta {
            index: 0,
            function: Some(FunctionDelta {
                name: Some("git_status".into()),
                arguments: None,
            }),
        }]);
        assert_eq!(acc.take_markers(), vec!["[TOOL_CALL:git_status:{}]"]);
    }

    #[test]
    fn from_llm_config_resolves_provider_urls() {
        let cfg = LlmConfig {
            provider: "openrouter".into(),
            ..Default::default()
        };
        let c = OpenAiCompatibleConfig::from_llm_config(&cfg);
        assert_eq!(c.base_url, "https://openrouter.ai/api/v1");
    }
}
