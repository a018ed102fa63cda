//! Tool-call extraction from LLM response text.
//!
//! Two forms are recognized, in order:
//!
//! 1. **Markers** — `[TOOL_CALL:<name>:<json-object>]` with a strict-JSON
//!    body.  This is also the wire format the streaming client synthesizes
//!    for native function calls, so downstream handling is uniform.
//! 2. **Keyword calls** — `name(key='value', key2=2)` inside fenced code
//!    blocks, restricted to the known-tool list.  Values go through a safe
//!    literal parser with a regex key/value fallback.
//!
//! Parsed calls are deduplicated by `(name, normalized arguments)`.

use regex::Regex;
use serde_json::{Map, Value};

/// A tool invocation extracted from model output.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    pub name: String,
    pub arguments: Value,
}

/// Marker prefix, shared with the stream filter.
pub(crate) const MARKER_PREFIX: &str = "[TOOL_CALL:";

/// Outcome of scanning for the next marker in a text window.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MarkerScan {
    /// No marker prefix (not even a partial one at the end).
    None,
    /// A prefix of `[TOOL_CALL:` (or an unfinished marker) starts at `start`
    /// and runs to the end of the window; more input is needed.
    Partial { start: usize },
    /// A complete marker spans `start..end` (end exclusive, past `]`).
    Complete {
        start: usize,
        end: usize,
        name: String,
        args_json: String,
    },
    /// `[TOOL_CALL:` at `start` turned out not to be a well-formed marker;
    /// treat text up to `resume` as prose and scan on.
    NotMarker { resume: usize },
}

/// Scan `text` for the first marker (complete, partial, or malformed).
pub(crate) fn scan_next_marker(text: &str) -> MarkerScan {
    let bytes = text.as_bytes();
    let Some(start) = find_prefix(text) else {
        return MarkerScan::None;
    };
    let after_prefix = start + MARKER_PREFIX.len();
    if after_prefix > text.len() {
        return MarkerScan::Partial { start };
    }

    // Tool name: [A-Za-z_][A-Za-z0-9_]*
    let mut i = after_prefix;
    while i < bytes.len() {
        let c = bytes[i] as char;
        let valid = if i == after_prefix {
            c.is_ascii_alphabetic() || c == '_'
        } else {
            c.is_ascii_alphanumeric() || c == '_'
        };
        if c == ':' && i > after_prefix {
            break;
        }
        if !valid {
            return MarkerScan::NotMarker { resume: start + 1 };
        }
        i += 1;
    }
    if i >= bytes.len() {
        return MarkerScan::Partial { start };
    }
    let name = text[after_prefix..i].to_string();
    let body_start = i + 1; // past ':'

    match balanced_json_object(&text[body_start..]) {
        BodyScan::Complete(len) => {
            let body_end = body_start + len;
            if bytes.get(body_end) == Some(&b']') {
                MarkerScan::Complete {
                    start,
                    end: body_end + 1,
                    name,
                    args_json: text[body_start..body_end].to_string(),
                }
            } else if body_end >= text.len() {
                MarkerScan::Partial { start }
            } else {
                MarkerScan::NotMarker { resume: start + 1 }
            }
        }
        BodyScan::Incomplete => MarkerScan::Partial { start },
        BodyScan::NotObject => MarkerScan::NotMarker { resume: start + 1 },
    }
}

/// Find a full `[TOOL_CALL:` occurrence, or a partial one at the window end.
fn find_prefix(text: &str) -> Option<usize> {
    if let Some(pos) = text.find(MARKER_PREFIX) {
        return Some(pos);
    }
    // A dangling prefix at the very end still matters for streaming.
    let max_take = MARKER_PREFIX.len().saturating_sub(1).min(text.len());
    for take in (1..=max_take).rev() {
        let start = text.len() - take;
        if text.is_char_boundary(start) && MARKER_PREFIX.starts_with(&text[start..]) {
            return Some(start);
        }
    }
    None
}

enum BodyScan {
    /// A balanced `{…}` of this byte length.
    Complete(usize),
    /// Ran out of input before balance.
    Incomplete,
    /// Does not start with `{`.
    NotObject,
}

/// Measure a brace-balanced JSON object, string-aware.
fn balanced_json_object(text: &str) -> BodyScan {
    let bytes = text.as_bytes();
    if bytes.first() != Some(&b'{') {
        return if bytes.is_empty() {
            BodyScan::Incomplete
        } else {
            BodyScan::NotObject
        };
    }
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return BodyScan::Complete(i + 1);
                }
            }
            _ => {}
        }
    }
    BodyScan::Incomplete
}

/// Extract all tool calls from `text`.  `known_tools` gates the keyword-call
/// form; markers are accepted for any well-formed name.
pub fn extract(text: &str, known_tools: &[String]) -> Vec<ParsedToolCall> {
    let mut results: Vec<ParsedToolCall> = Vec::new();

    // Pass 1: markers, in source order.
    let mut window = text;
    loop {
        match scan_next_marker(window) {
            MarkerScan::Complete {
                end,
                name,
                args_json,
                ..
            } => {
                if let Ok(arguments) = serde_json::from_str::<Value>(&args_json) {
                    if arguments.is_object() {
                        push_dedup(&mut results, ParsedToolCall { name, arguments });
                    }
                }
                window = &window[end..];
            }
            MarkerScan::NotMarker { resume } => {
                window = &window[resume..];
            }
            MarkerScan::Partial { .. } | MarkerScan::None => break,
        }
    }

    // Pass 2: keyword calls inside fenced blocks.
    for call in extract_keyword_calls(text, known_tools) {
        push_dedup(&mut results, call);
    }

    results
}

fn push_dedup(results: &mut Vec<ParsedToolCall>, call: ParsedToolCall) {
    if !results
        .iter()
        .any(|r| r.name == call.name && r.arguments == call.arguments)
    {
        results.push(call);
    }
}

fn extract_keyword_calls(text: &str, known_tools: &[String]) -> Vec<ParsedToolCall> {
    let Ok(fence_re) = Regex::new(r"(?s)```(?:\w+)?\n?(.*?)```") else {
        return Vec::new();
    };
    let Ok(call_re) = Regex::new(r"(?s)(\w+)\s*\(\s*((?:[^()]|\([^()]*\))*)\s*\)") else {
        return Vec::new();
    };

    let mut results = Vec::new();
    for fence in fence_re.captures_iter(text) {
        let block = fence.get(1).map_or("", |m| m.as_str());
        for caps in call_re.captures_iter(block) {
            let name = caps.get(1).map_or("", |m| m.as_str());
            if !known_tools.iter().any(|t| t == name) {
                continue;
            }
            let args_str = caps.get(2).map_or("", |m| m.as_str());
            let arguments = parse_kwargs(args_str);
            if let Some(map) = arguments.as_object() {
                if !map.is_empty() {
                    results.push(ParsedToolCall {
                        name: name.to_string(),
                        arguments,
                    });
                }
            }
        }
    }
    results
}

/// Parse `key='value', key2=2` keyword arguments.  Literal parsing first;
/// a regex key/value extractor as the fallback.
fn parse_kwargs(args_str: &str) -> Value {
    if args_str.trim().is_empty() {
        return Value::Object(Map::new());
    }

    let mut map = Map::new();
    let mut clean = true;
    for part in split_top_level(args_str) {
        let Some((key, raw_value)) = part.split_once('=') else {
            clean = false;
            continue;
        };
        let key = key.trim();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            clean = false;
            continue;
        }
        match parse_literal(raw_value.trim()) {
            Some(value) => {
                map.insert(key.to_string(), value);
            }
            None => clean = false,
        }
    }

    if clean && !map.is_empty() {
        return Value::Object(map);
    }
    regex_kwargs_fallback(args_str)
}

/// Split on commas that are not nested in quotes, brackets, or braces.
fn split_top_level(args_str: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in args_str.chars() {
        if let Some(q) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                current.push(c);
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

/// Parse one literal value: quoted strings, booleans, null, numbers, and
/// bracketed lists/objects (after normalizing single quotes).
fn parse_literal(raw: &str) -> Option<Value> {
    if raw.is_empty() {
        return None;
    }
    if (raw.starts_with('\'') && raw.ends_with('\'') && raw.len() >= 2)
        || (raw.starts_with('"') && raw.ends_with('"') && raw.len() >= 2)
    {
        return Some(Value::String(raw[1..raw.len() - 1].to_string()));
    }
    match raw {
        "true" | "True" => return Some(Value::Bool(true)),
        "false" | "False" => return Some(Value::Bool(false)),
        "None" | "null" => return Some(Value::Null),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Some(Value::from(n));
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Some(Value::from(f));
    }
    if raw.starts_with('[') || raw.starts_with('{') {
        let normalized = raw.replace('\'', "\"");
        return serde_json::from_str(&normalized).ok();
    }
    None
}

fn regex_kwargs_fallback(args_str: &str) -> Value {
    let Ok(kv_re) = Regex::new(r#"(\w+)\s*=\s*(?:'([^']*)'|"([^"]*)"|(\S+))"#) else {
        return Value::Object(Map::new());
    };
    let mut map = Map::new();
    for caps in kv_re.captures_iter(args_str) {
        let key = caps.get(1).map_or("", |m| m.as_str());
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map_or("", |m| m.as_str());
        map.insert(
            key.to_string(),
            Value::String(value.trim_end_matches(',').to_string()),
        );
    }
    Value::Object(map)
}

/// Remove markers and tool-only fenced blocks, for clean display.
pub fn remove(text: &str, known_tools: &[String]) -> String {
    // Strip complete markers.
    let mut cleaned = String::with_capacity(text.len());
    let mut window = text;
    loop {
        match scan_next_marker(window) {
            MarkerScan::Complete { start, end, .. } => {
                cleaned.push_str(&window[..start]);
                window = &window[end..];
            }
            MarkerScan::NotMarker { resume } => {
                cleaned.push_str(&window[..resume]);
                window = &window[resume..];
            }
            MarkerScan::Partial { start } => {
                cleaned.push_str(&window[..start]);
                break;
            }
            MarkerScan::None => {
                cleaned.push_str(window);
                break;
            }
        }
    }

    // Drop fenced blocks whose content is only tool calls.
    let mut out: Vec<String> = Vec::new();
    let mut in_fence = false;
    let mut fence_lines: Vec<String> = Vec::new();
    for line in cleaned.lines() {
        if line.trim_start().starts_with("```") {
            if in_fence {
                let only_tools = !fence_lines.is_empty()
                    && fence_lines.iter().all(|l| {
                        l.trim().is_empty()
                            || known_tools.iter().any(|t| l.contains(t.as_str()))
                    });
                if !only_tools {
                    out.push("```".to_string());
                    out.append(&mut fence_lines);
                    out.push("```".to_string());
                } else {
                    fence_lines.clear();
                }
                in_fence = false;
            } else {
                in_fence = true;
            }
            continue;
        }
        if in_fence {
            fence_lines.push(line.to_string());
        } else {
            out.push(line.to_string());
        }
    }
    if in_fence {
        out.append(&mut fence_lines);
    }
    out.join("\n").trim().to_string()
}

/// Render a tool call as its marker form (the parser's inverse).
pub fn format_marker(name: &str, args: &Value) -> String {
    format!("[TOOL_CALL:{name}:{args}]")
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn known() -> Vec<String> {
        ["write_file", "read_file", "bash_command", "list_directory"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    // ── Markers ─────────────────────────────────────────────────────────

    #[test]
    fn single_marker() {
        let text = r#"I'll create it now.
[TOOL_CALL:write_file:{"path":"notes.md","content":"hello"}]
Done."#;
        let calls = extract(text, &known());
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "write_file");
        assert_eq!(calls[0].arguments["path"], "notes.md");
    }

    #[test]
    fn multiple_markers_in_source_order() {
        let text = r#"[TOOL_CALL:read_file:{"path":"a.py"}][TOOL_CALL:read_file:{"path":"b.py"}]"#;
        let calls = extract(text, &known());
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].arguments["path"], "a.py");
        assert_eq!(calls[1].arguments["path"], "b.py");
    }

    #[test]
    fn nested_json_braces() {
        let text = r#"[TOOL_CALL:write_file:{"path":"x","content":"{\"inner\": {\"deep\": 1}}"}]"#;
        let calls = extract(text, &known());
        assert_eq!(calls.len(), 1);
        assert!(calls[0].arguments["content"]
            .as_str()
            .unwrap()
            .contains("deep"));
    }

    #[test]
    fn bracket_inside_string_body() {
        let text = r#"[TOOL_CALL:bash_command:{"command":"echo ]"}]"#;
        let calls = extract(text, &known());
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["command"], "echo ]");
    }

    #[test]
    fn malformed_json_skipped() {
        let text = r#"[TOOL_CALL:read_file:{not json}] [TOOL_CALL:read_file:{"path":"ok"}]"#;
        let calls = extract(text, &known());
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["path"], "ok");
    }

    #[test]
    fn invalid_name_not_a_marker() {
        let text = r#"[TOOL_CALL:9bad:{"x":1}]"#;
        assert!(extract(text, &known()).is_empty());
    }

    #[test]
    fn duplicate_markers_deduplicated() {
        let text = r#"[TOOL_CALL:read_file:{"path":"a"}][TOOL_CALL:read_file:{"path":"a"}]"#;
        assert_eq!(extract(text, &known()).len(), 1);
    }

    #[test]
    fn plain_text_yields_nothing() {
        assert!(extract("No tools needed here.", &known()).is_empty());
    }

    // ── Keyword calls ───────────────────────────────────────────────────

    #[test]
    fn keyword_call_in_fence() {
        let text = "Let me write that:\n```python\nwrite_file(path='test.txt', content='Hello')\n```";
        let calls = extract(text, &known());
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "write_file");
        assert_eq!(calls[0].arguments["path"], "test.txt");
        assert_eq!(calls[0].arguments["content"], "Hello");
    }

    #[test]
    fn keyword_call_literals() {
        let text = "```\nread_file(path=\"a.md\", max_lines=10)\n```";
        let calls = extract(text, &known());
        assert_eq!(calls[0].arguments["max_lines"], 10);
    }

    #[test]
    fn keyword_call_booleans_and_lists() {
        let text = "```\nlist_directory(path='/tmp', recursive=True)\n```";
        let calls = extract(text, &known());
        assert_eq!(calls[0].arguments["recursive"], true);
    }

    #[test]
    fn unknown_function_ignored() {
        let text = "```\nprint(path='x')\nsome_helper(a=1)\n```";
        assert!(extract(text, &known()).is_empty());
    }

    #[test]
    fn keyword_call_outside_fence_ignored() {
        let text = "call write_file(path='x', content='y') directly";
        assert!(extract(text, &known()).is_empty());
    }

    #[test]
    fn marker_and_keyword_duplicate_collapses() {
        let text = "[TOOL_CALL:write_file:{\"path\":\"x\",\"content\":\"y\"}]\n```\nwrite_file(path='x', content='y')\n```";
        assert_eq!(extract(text, &known()).len(), 1);
    }

    // ── Round trip ──────────────────────────────────────────────────────

    #[test]
    fn format_then_extract_round_trips() {
        let args = json!({"path": "notes.md", "content": "hello", "count": 3, "flag": true});
        let marker = format_marker("write_file", &args);
        let calls = extract(&marker, &known());
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "write_file");
        assert_eq!(calls[0].arguments, args);
    }

    // ── Removal ─────────────────────────────────────────────────────────

    #[test]
    fn remove_strips_markers() {
        let text = "before [TOOL_CALL:read_file:{\"path\":\"a\"}] after";
        assert_eq!(remove(text, &known()), "before  after");
    }

    #[test]
    fn remove_drops_tool_only_fences() {
        let text = "Answer:\n```\nwrite_file(path='x', content='y')\n```\nDone.";
        let cleaned = remove(text, &known());
        assert!(!cleaned.contains("write_file"));
        assert!(cleaned.contains("Answer:"));
        assert!(cleaned.contains("Done."));
    }

    #[test]
    fn remove_keeps_normal_code_fences() {
        let text = "Example:\n```rust\nfn main() {}\n```";
        let cleaned = remove(text, &known());
        assert!(cleaned.contains("fn main"));
    }
}
