//! Filesystem tools: read, write, list, delete.
//!
//! Paths go through [`sanitize_path`] so `~` and symlinks resolve before
//! use; workspace escapes are logged by the sanitizer.  Writes optionally
//! keep a timestamped backup of the prior content under `.backups/`.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::security::sanitize_path;

use super::traits::{ParamKind, ParamSpec, Tool, ToolCategory, ToolResult};

/// Shared settings for the filesystem tools.
#[derive(Debug, Clone, Default)]
pub struct FileToolSettings {
    pub workspace_root: Option<PathBuf>,
    /// Keep `.backups/<basename>.<timestamp>.bak` before overwrites.
    pub backups_enabled: bool,
}

impl FileToolSettings {
    fn resolve(&self, raw: &str) -> PathBuf {
        sanitize_path(raw, self.workspace_root.as_deref())
    }
}

fn required_path(settings: &FileToolSettings, args: &Value) -> Result<PathBuf, String> {
    args.get("path")
        .and_then(Value::as_str)
        .map(|raw| settings.resolve(raw))
        .ok_or_else(|| "missing required argument 'path'".to_string())
}

// ─── ReadFileTool ─────────────────────────────────────────────────────────────

pub struct ReadFileTool {
    settings: FileToolSettings,
}

impl ReadFileTool {
    pub fn new(settings: FileToolSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file.  Use max_lines to limit output for large files."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::ReadOnly
    }

    fn parameters(&self) -> Vec<(&'static str, ParamSpec)> {
        vec![
            ("path", ParamSpec::required(ParamKind::String, "Path to the file.")),
            (
                "max_lines",
                ParamSpec::optional(ParamKind::Integer, "Maximum number of lines to return."),
            ),
        ]
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let path = required_path(&self.settings, &args)?;
        let max_lines = args
            .get("max_lines")
            .and_then(Value::as_u64)
            .map(|n| n as usize);

        let path_for_read = path.clone();
        let contents = tokio::task::spawn_blocking(move || fs::read_to_string(&path_for_read))
            .await
            .map_err(|e| format!("blocking task failed: {e}"))?
            .map_err(|e| format!("failed to read '{}': {e}", path.display()))?;

        let output = match max_lines {
            Some(n) => contents.lines().take(n).collect::<Vec<_>>().join("\n"),
            None => contents,
        };

        Ok(ToolResult::ok(output)
            .with_metadata(json!({ "path": path.display().to_string() })))
    }
}

// ─── WriteFileTool ────────────────────────────────────────────────────────────

pub struct WriteFileTool {
    settings: FileToolSettings,
}

impl WriteFileTool {
    pub fn new(settings: FileToolSettings) -> Self {
        Self { settings }
    }

    fn backup(&self, path: &Path) -> Option<PathBuf> {
        if !self.settings.backups_enabled || !path.is_file() {
            return None;
        }
        let parent = path.parent()?;
        let name = path.file_name()?.to_string_lossy();
        let backups = parent.join(".backups");
        fs::create_dir_all(&backups).ok()?;
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
        let target = backups.join(format!("{name}.{stamp}.bak"));
        fs::copy(path, &target).ok()?;
        Some(target)
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it if needed and overwriting it if it exists."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::FileWrite
    }

    fn parameters(&self) -> Vec<(&'static str, ParamSpec)> {
        vec![
            ("path", ParamSpec::required(ParamKind::String, "Path to write.")),
            (
                "content",
                ParamSpec::required(ParamKind::String, "Content to write."),
            ),
        ]
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let path = required_path(&self.settings, &args)?;
        let content = args
            .get("content")
            .and_then(Value::as_str)
            .ok_or("missing required argument 'content'")?
            .to_string();

        let backup = self.backup(&path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| format!("failed to create parent dirs: {e}"))?;
        }
        let bytes = content.len();
        fs::write(&path, &content)
            .map_err(|e| format!("failed to write '{}': {e}", path.display()))?;

        Ok(ToolResult::ok(format!(
            "wrote {bytes} bytes to '{}'",
            path.display()
        ))
        .with_metadata(json!({
            "path": path.display().to_string(),
            "bytes": bytes,
            "backup": backup.map(|b| b.display().to_string()),
        })))
    }
}

// ─── ListDirectoryTool ────────────────────────────────────────────────────────

pub struct ListDirectoryTool {
    settings: FileToolSettings,
}

impl ListDirectoryTool {
    pub fn new(settings: FileToolSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the contents of a directory, optionally recursively."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::ReadOnly
    }

    fn parameters(&self) -> Vec<(&'static str, ParamSpec)> {
        vec![
            ("path", ParamSpec::required(ParamKind::String, "Directory path.")),
            (
                "recursive",
                ParamSpec::optional(ParamKind::Boolean, "List recursively.")
                    .with_default(json!(false)),
            ),
        ]
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let path = required_path(&self.settings, &args)?;
        let recursive = args
            .get("recursive")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let entries = collect_entries(&path, recursive)
            .map_err(|e| format!("failed to list '{}': {e}", path.display()))?;

        Ok(ToolResult::ok(entries.join("\n"))
            .with_metadata(json!({ "count": entries.len() })))
    }
}

// ─── DeleteFileTool ───────────────────────────────────────────────────────────

pub struct DeleteFileTool {
    settings: FileToolSettings,
}

impl DeleteFileTool {
    pub fn new(settings: FileToolSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a single file.  Directories are refused."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::FileWrite
    }

    fn parameters(&self) -> Vec<(&'static str, ParamSpec)> {
        vec![("path", ParamSpec::required(ParamKind::String, "File to delete."))]
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let path = required_path(&self.settings, &args)?;
        if path.is_dir() {
            return Err(format!("'{}' is a directory", path.display()));
        }
        fs::remove_file(&path)
            .map_err(|e| format!("failed to delete '{}': {e}", path.display()))?;
        Ok(ToolResult::ok(format!("deleted '{}'", path.display())))
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn collect_entries(dir: &Path, recursive: bool) -> std::io::Result<Vec<String>> {
    let mut result = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        result.push(path.display().to_string());
        if recursive && path.is_dir() {
            result.extend(collect_entries(&path, true)?);
        }
    }
    result.sort();
    Ok(result)
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings() -> FileToolSettings {
        FileToolSettings::default()
    }

    #[tokio::test]
    async fn read_existing_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("hello.txt");
        fs::write(&file, "hello world").unwrap();

        let tool = ReadFileTool::new(settings());
        let r = tool
            .execute(json!({"path": file.display().to_string()}))
            .await
            .unwrap();
        assert!(r.success);
        assert_eq!(r.output, "hello world");
    }

    #[tokio::test]
    async fn read_respects_max_lines() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("lines.txt");
        fs::write(&file, "a\nb\nc\nd\ne").unwrap();

        let tool = ReadFileTool::new(settings());
        let r = tool
            .execute(json!({"path": file.display().to_string(), "max_lines": 3}))
            .await
            .unwrap();
        assert_eq!(r.output.lines().count(), 3);
    }

    #[tokio::test]
    async fn read_missing_file_errors() {
        let tool = ReadFileTool::new(settings());
        let r = tool
            .execute(json!({"path": "/tmp/__quarry_nonexistent__"}))
            .await;
        assert!(r.is_err());
    }

    #[tokio::test]
    async fn write_creates_file_and_parents() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("nested/out.txt");

        let tool = WriteFileTool::new(settings());
        let r = tool
            .execute(json!({"path": file.display().to_string(), "content": "written"}))
            .await
            .unwrap();
        assert!(r.success);
        assert_eq!(fs::read_to_string(&file).unwrap(), "written");
    }

    #[tokio::test]
    async fn write_backup_keeps_previous_content() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("data.txt");
        fs::write(&file, "old").unwrap();

        let tool = WriteFileTool::new(FileToolSettings {
            workspace_root: None,
            backups_enabled: true,
        });
        let r = tool
            .execute(json!({"path": file.display().to_string(), "content": "new"}))
            .await
            .unwrap();
        let meta = r.metadata.unwrap();
        let backup = meta["backup"].as_str().unwrap();
        assert!(backup.contains(".backups"));
        assert!(backup.ends_with(".bak"));
        assert_eq!(fs::read_to_string(backup).unwrap(), "old");
        assert_eq!(fs::read_to_string(&file).unwrap(), "new");
    }

    #[tokio::test]
    async fn write_missing_content_errors() {
        let tool = WriteFileTool::new(settings());
        let r = tool.execute(json!({"path": "/tmp/x"})).await;
        assert!(r.is_err());
    }

    #[tokio::test]
    async fn list_directory_contents() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "").unwrap();
        fs::write(dir.path().join("b.txt"), "").unwrap();

        let tool = ListDirectoryTool::new(settings());
        let r = tool
            .execute(json!({"path": dir.path().display().to_string()}))
            .await
            .unwrap();
        assert!(r.output.contains("a.txt"));
        assert!(r.output.contains("b.txt"));
    }

    #[tokio::test]
    async fn list_recursive_finds_nested() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("nested.txt"), "").unwrap();

        let tool = ListDirectoryTool::new(settings());
        let r = tool
            .execute(json!({"path": dir.path().display().to_string(), "recursive": true}))
            .await
            .unwrap();
        assert!(r.output.contains("nested.txt"));
    }

    #[tokio::test]
    async fn delete_removes_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("gone.txt");
        fs::write(&file, "x").unwrap();

        let tool = DeleteFileTool::new(settings());
        let r = tool
            .execute(json!({"path": file.display().to_string()}))
            .await
            .unwrap();
        assert!(r.success);
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn delete_refuses_directories() {
        let dir = TempDir::new().unwrap();
        let tool = DeleteFileTool::new(settings());
        let r = tool
            .execute(json!({"path": dir.path().display().to_string()}))
            .await;
        assert!(r.is_err());
    }
}
