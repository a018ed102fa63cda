//! The tool system: catalog, invocation, and scheduling.

pub mod breaker;
pub mod file_ops;
pub mod git_ops;
pub mod invoker;
pub mod registry;
pub mod scheduler;
pub mod search;
pub mod shell;
pub mod traits;
pub mod web;

use std::path::PathBuf;
use std::sync::Arc;

use crate::sandbox::SandboxExecutor;
use crate::security::CommandValidator;

pub use breaker::{Admission, CircuitBreaker, CircuitState};
pub use file_ops::{
    DeleteFileTool, FileToolSettings, ListDirectoryTool, ReadFileTool, WriteFileTool,
};
pub use git_ops::{GitDiffTool, GitLogTool, GitStatusTool};
pub use invoker::{
    FailureKind, ToolCall, ToolHealth, ToolInvocation, ToolInvoker, ToolOutcome, ToolStats,
};
pub use registry::ToolRegistry;
pub use scheduler::{BatchResult, BatchSummary, ToolScheduler};
pub use search::SearchFilesTool;
pub use shell::BashCommandTool;
pub use traits::{ParamKind, ParamSpec, Tool, ToolCategory, ToolInfo, ToolResult};
pub use web::{FetchUrlTool, WebSearchTool};

/// Context needed to register the built-in tools.
pub struct ToolContext {
    pub validator: Arc<CommandValidator>,
    pub executor: Arc<SandboxExecutor>,
    pub workspace_root: Option<PathBuf>,
    pub backups_enabled: bool,
    /// Treat warned commands as requiring explicit approval.
    pub warn_requires_approval: bool,
}

/// Register all built-in tools into `registry`.
pub fn register_builtin_tools(registry: &mut ToolRegistry, ctx: &ToolContext) {
    let file_settings = FileToolSettings {
        workspace_root: ctx.workspace_root.clone(),
        backups_enabled: ctx.backups_enabled,
    };

    registry.register(Arc::new(
        BashCommandTool::new(ctx.validator.clone(), ctx.executor.clone())
            .with_warn_approval(ctx.warn_requires_approval),
    ));
    registry.register(Arc::new(ReadFileTool::new(file_settings.clone())));
    registry.register(Arc::new(WriteFileTool::new(file_settings.clone())));
    registry.register(Arc::new(ListDirectoryTool::new(file_settings.clone())));
    registry.register(Arc::new(DeleteFileTool::new(file_settings)));
    registry.register(Arc::new(SearchFilesTool::new(ctx.workspace_root.clone())));
    registry.register(Arc::new(GitStatusTool::new(
        ctx.validator.clone(),
        ctx.executor.clone(),
    )));
    registry.register(Arc::new(GitDiffTool::new(
        ctx.validator.clone(),
        ctx.executor.clone(),
    )));
    registry.register(Arc::new(GitLogTool::new(
        ctx.validator.clone(),
        ctx.executor.clone(),
    )));
    registry.register(Arc::new(FetchUrlTool::new()));
    registry.register(Arc::new(WebSearchTool::new()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ExecutionLimits;
    use crate::security::CommandAllowList;

    #[test]
    fn builtin_registration_covers_core_tools() {
        let mut registry = ToolRegistry::new();
        let ctx = ToolContext {
            validator: Arc::new(CommandValidator::new(
                true,
                Arc::new(CommandAllowList::new(&[])),
            )),
            executor: Arc::new(SandboxExecutor::new(ExecutionLimits::default())),
            workspace_root: None,
            backups_enabled: false,
            warn_requires_approval: false,
        };
        register_builtin_tools(&mut registry, &ctx);
        for name in [
            "bash_command",
            "read_file",
            "write_file",
            "list_directory",
            "delete_file",
            "search_files",
            "git_status",
            "git_diff",
            "git_log",
            "fetch_url",
            "web_search",
        ] {
            assert!(registry.get(name).is_some(), "missing tool {name}");
        }
        assert!(registry.is_side_effecting("bash_command"));
        assert!(registry.is_side_effecting("write_file"));
        assert!(!registry.is_side_effecting("read_file"));
    }
}
