//! Observation masking — lossy compression of tool output for long-term
//! context inclusion.
//!
//! Errors survive intact: stderr lines and non-zero exit lines are kept
//! verbatim.  Long stdout blocks collapse to head + tail around a hidden-
//! line marker.  Structured (JSON) output keeps its keys and trims
//! oversized values.

use serde_json::Value;

/// Lines kept at the start of a collapsed block.
const HEAD_LINES: usize = 10;

/// Lines kept at the end of a collapsed block.
const TAIL_LINES: usize = 5;

/// Collapse threshold: blocks at or under this length pass through.
const MAX_PLAIN_LINES: usize = HEAD_LINES + TAIL_LINES + 5;

/// Per-field budget for structured values.
const MAX_FIELD_CHARS: usize = 200;

/// Rough chars-per-token estimate for the savings figure.
const CHARS_PER_TOKEN: usize = 4;

/// A masked tool observation.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedOutput {
    pub content: String,
    /// `masked_bytes / raw_bytes`; 1.0 when nothing was removed.
    pub compression_ratio: f64,
    /// Approximate tokens saved by the masking.
    pub tokens_saved: usize,
}

/// Mask one tool output for history insertion.
pub fn mask_tool_output(output: &str, tool_name: &str) -> MaskedOutput {
    let raw_len = output.len();
    if raw_len == 0 {
        return MaskedOutput {
            content: String::new(),
            compression_ratio: 1.0,
            tokens_saved: 0,
        };
    }

    let masked = match serde_json::from_str::<Value>(output.trim()) {
        Ok(Value::Object(map)) => mask_structured(&map),
        _ => mask_plain(output),
    };

    let ratio = if raw_len == 0 {
        1.0
    } else {
        masked.len() as f64 / raw_len as f64
    };
    let saved_chars = raw_len.saturating_sub(masked.len());

    tracing::debug!(
        tool = tool_name,
        raw_bytes = raw_len,
        masked_bytes = masked.len(),
        "masked tool output"
    );

    MaskedOutput {
        content: masked,
        compression_ratio: ratio,
        tokens_saved: saved_chars / CHARS_PER_TOKEN,
    }
}

/// A line that must never be dropped by masking.
fn is_error_line(line: &str) -> bool {
    let lower = line.trim_start().to_lowercase();
    lower.starts_with("stderr")
        || lower.starts_with("error")
        || lower.starts_with("✗")
        || lower.starts_with("❌")
        || lower.contains("exit code")
        || lower.contains("traceback")
        || lower.starts_with("warning")
}

fn mask_plain(output: &str) -> String {
    let lines: Vec<&str> = output.lines().collect();
    if lines.len() <= MAX_PLAIN_LINES {
        return output.to_string();
    }

    // Error lines in the collapsed middle are promoted into the tail so
    // they survive verbatim.
    let middle = &lines[HEAD_LINES..lines.len() - TAIL_LINES];
    let preserved_errors: Vec<&str> = middle.iter().copied().filter(|l| is_error_line(l)).collect();
    let hidden = middle.len() - preserved_errors.len();

    let mut out: Vec<String> = Vec::new();
    out.extend(lines[..HEAD_LINES].iter().map(|s| s.to_string()));
    out.push(format!("… <hidden {hidden} lines> …"));
    out.extend(preserved_errors.iter().map(|s| s.to_string()));
    out.extend(lines[lines.len() - TAIL_LINES..].iter().map(|s| s.to_string()));
    out.join("\n")
}

fn mask_structured(map: &serde_json::Map<String, Value>) -> String {
    let mut trimmed = serde_json::Map::new();
    for (key, value) in map {
        // stderr / exit-code fields stay verbatim.
        let keep_verbatim = key == "stderr" || key == "exit_code" || key == "error";
        let masked = match value {
            Value::String(s) if key == "stdout" && s.lines().count() > MAX_PLAIN_LINES => {
                Value::String(mask_plain(s))
            }
            Value::String(s) if !keep_verbatim && key != "stdout" && s.len() > MAX_FIELD_CHARS => {
                let mut cut = s.chars().take(MAX_FIELD_CHARS).collect::<String>();
                cut.push('…');
                Value::String(cut)
            }
            other => other.clone(),
        };
        trimmed.insert(key.clone(), masked);
    }
    serde_json::to_string_pretty(&Value::Object(trimmed))
        .unwrap_or_else(|_| "{}".to_string())
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_passes_through() {
        let m = mask_tool_output("line one\nline two", "echo");
        assert_eq!(m.content, "line one\nline two");
        assert!((m.compression_ratio - 1.0).abs() < f64::EPSILON);
        assert_eq!(m.tokens_saved, 0);
    }

    #[test]
    fn long_output_collapses_with_marker() {
        let output: String = (0..100).map(|i| format!("line {i}\n")).collect();
        let m = mask_tool_output(&output, "cat");
        assert!(m.content.contains("… <hidden"));
        assert!(m.content.starts_with("line 0"));
        assert!(m.content.trim_end().ends_with("line 99"));
        assert!(m.compression_ratio < 1.0);
        assert!(m.tokens_saved > 0);
    }

    #[test]
    fn stderr_lines_survive_collapse() {
        let mut lines: Vec<String> = (0..50).map(|i| format!("line {i}")).collect();
        lines[25] = "STDERR: permission denied".to_string();
        lines[26] = "error: exit code 1".to_string();
        let m = mask_tool_output(&lines.join("\n"), "bash_command");
        assert!(m.content.contains("STDERR: permission denied"));
        assert!(m.content.contains("error: exit code 1"));
    }

    #[test]
    fn structured_values_trimmed_keys_kept() {
        let long = "x".repeat(500);
        let json = format!(r#"{{"stdout": "ok", "noise": "{long}"}}"#);
        let m = mask_tool_output(&json, "read_file");
        assert!(m.content.contains("stdout"));
        assert!(m.content.contains("noise"));
        assert!(!m.content.contains(&long));
        assert!(m.content.contains('…'));
    }

    #[test]
    fn structured_stderr_kept_verbatim() {
        let long_err = "E".repeat(400);
        let json = format!(r#"{{"stderr": "{long_err}", "exit_code": 2}}"#);
        let m = mask_tool_output(&json, "bash_command");
        assert!(m.content.contains(&long_err));
        assert!(m.content.contains("\"exit_code\": 2"));
    }

    #[test]
    fn empty_output_is_noop() {
        let m = mask_tool_output("", "x");
        assert_eq!(m.content, "");
        assert_eq!(m.tokens_saved, 0);
    }
}
