//! Regex search across a directory tree.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use crate::security::sanitize_path;

use super::traits::{ParamKind, ParamSpec, Tool, ToolCategory, ToolResult};

/// Default cap on reported matches.
const DEFAULT_MAX_RESULTS: usize = 50;

/// Directories never descended into.
const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules", "__pycache__", ".backups"];

/// Searches file contents under a directory with a regex pattern.
pub struct SearchFilesTool {
    workspace_root: Option<PathBuf>,
}

impl SearchFilesTool {
    pub fn new(workspace_root: Option<PathBuf>) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search file contents under a directory with a regular expression. \
         Returns 'path:line: text' matches, capped at max_results."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::ReadOnly
    }

    fn parameters(&self) -> Vec<(&'static str, ParamSpec)> {
        vec![
            ("path", ParamSpec::required(ParamKind::String, "Directory to search.")),
            (
                "pattern",
                ParamSpec::required(ParamKind::String, "Regular expression to match."),
            ),
            (
                "max_results",
                ParamSpec::optional(ParamKind::Integer, "Result cap (default 50).")
                    .with_default(json!(DEFAULT_MAX_RESULTS)),
            ),
        ]
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let root = args
            .get("path")
            .and_then(Value::as_str)
            .map(|raw| sanitize_path(raw, self.workspace_root.as_deref()))
            .ok_or("missing required argument 'path'")?;
        let pattern = args
            .get("pattern")
            .and_then(Value::as_str)
            .ok_or("missing required argument 'pattern'")?;
        let max_results = args
            .get("max_results")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS);

        let regex = Regex::new(pattern).map_err(|e| format!("invalid pattern: {e}"))?;

        let matches = tokio::task::spawn_blocking(move || {
            let mut matches = Vec::new();
            search_dir(&root, &regex, max_results, &mut matches);
            matches
        })
        .await
        .map_err(|e| format!("search task failed: {e}"))?;

        let truncated = matches.len() >= max_results;
        let count = matches.len();
        let mut output = matches.join("\n");
        if output.is_empty() {
            output = "no matches".to_string();
        }

        Ok(ToolResult::ok(output).with_metadata(json!({
            "count": count,
            "truncated": truncated,
        })))
    }
}

fn search_dir(dir: &Path, regex: &Regex, cap: usize, matches: &mut Vec<String>) {
    if matches.len() >= cap {
        return;
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let mut entries: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    entries.sort();

    for path in entries {
        if matches.len() >= cap {
            return;
        }
        if path.is_dir() {
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
            if name.as_deref().is_some_and(|n| SKIPPED_DIRS.contains(&n)) {
                continue;
            }
            search_dir(&path, regex, cap, matches);
        } else if let Ok(contents) = fs::read_to_string(&path) {
            for (idx, line) in contents.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(format!("{}:{}: {}", path.display(), idx + 1, line.trim()));
                    if matches.len() >= cap {
                        return;
                    }
                }
            }
        }
    }
}
