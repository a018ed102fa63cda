//! The `StreamingChunk` taxonomy and its rendering rules.
//!
//! Every agent, whatever its internal protocol, is normalized to this
//! tagged union at the manager boundary.  Rendering never dumps a raw
//! mapping: structured results are reduced by a fixed priority order.

use serde_json::Value;

/// Normalized streaming chunk emitted by agents.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamingChunk {
    /// Reasoning tokens, streamed raw.
    Thinking(String),
    /// Progress line; rendered with a trailing newline.
    Status(String),
    /// A command about to run; rendered as `\n$ <cmd>\n`.
    Command(String),
    /// Execution notice; rendered as `⚡ Executing: <x>\n`.
    Executing(String),
    /// Structured result payload.
    Result(Value),
    /// Plain prose.
    Text(String),
    /// Error notice; rendered as `❌ Error: <x>\n`.
    Error(String),
}

impl StreamingChunk {
    /// Render to a display string.  Empty output means "nothing to show".
    pub fn render(&self) -> String {
        match self {
            StreamingChunk::Thinking(text) | StreamingChunk::Text(text) => text.clone(),
            StreamingChunk::Status(text) => format!("{text}\n"),
            StreamingChunk::Command(cmd) => format!("\n$ {cmd}\n"),
            StreamingChunk::Executing(what) => format!("⚡ Executing: {what}\n"),
            StreamingChunk::Error(err) => format!("❌ Error: {err}\n"),
            StreamingChunk::Result(value) => render_result(value),
        }
    }
}

/// Reduce a structured result to displayable text.
///
/// Priority: `formatted_markdown` → `markdown` → `response`/`result` →
/// executor triple (`command`, `stdout`, `stderr`) → empty.
fn render_result(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            for key in ["formatted_markdown", "markdown"] {
                if let Some(text) = map.get(key).and_then(Value::as_str) {
                    return text.to_string();
                }
            }
            for key in ["response", "result"] {
                if let Some(inner) = map.get(key) {
                    return match inner {
                        Value::String(s) => s.clone(),
                        other => render_result(other),
                    };
                }
            }
            if map.contains_key("stdout") {
                let mut parts = Vec::new();
                if let Some(cmd) = map.get("command").and_then(Value::as_str) {
                    if !cmd.is_empty() {
                        parts.push(format!("$ {cmd}"));
                    }
                }
                if let Some(stdout) = map.get("stdout").and_then(Value::as_str) {
                    if !stdout.is_empty() {
                        parts.push(stdout.to_string());
                    }
                }
                if let Some(stderr) = map.get("stderr").and_then(Value::as_str) {
                    if !stderr.is_empty() {
                        parts.push(format!("stderr: {stderr}"));
                    }
                }
                return parts.join("\n");
            }
            // Unknown shapes are not dumped.
            String::new()
        }
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
