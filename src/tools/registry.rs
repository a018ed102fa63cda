//! Central registry of available tools.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::traits::{schema_object, Tool, ToolInfo};

/// Insertion-ordered tool catalog.  Registration happens at setup time;
/// afterwards the registry is read-mostly and shared via `Arc<ToolRegistry>`.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a tool.  A duplicate name replaces the prior entry but keeps
    /// its original position in the listing order.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Summaries of all registered tools, in insertion order.
    pub fn list(&self) -> Vec<ToolInfo> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                schema: schema_object(&t.parameters()),
                side_effecting: t.category().side_effecting(),
            })
            .collect()
    }

    /// Schema list for the LLM request.  Names here are exactly what the
    /// tool-call parser accepts.
    pub fn schemas_for_llm(&self) -> Vec<Value> {
        self.list()
            .into_iter()
            .map(|info| {
                serde_json::json!({
                    "name": info.name,
                    "description": info.description,
                    "parameters": info.schema,
                })
            })
            .collect()
    }

    /// Whether `name` refers to a side-effecting tool.  Unknown tools are
    /// treated as side-effecting so the approval policy stays conservative.
    pub fn is_side_effecting(&self, name: &str) -> bool {
        self.tools
            .get(name)
            .map(|t| t.category().side_effecting())
            .unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::traits::{ParamKind, ParamSpec, ToolCategory, ToolResult};
    use async_trait::async_trait;
    use serde_json::json;

    struct DummyTool(&'static str, ToolCategory);

    #[async_trait]
    impl Tool for DummyTool {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "a test tool"
        }
        fn category(&self) -> ToolCategory {
            self.1
        }
        fn parameters(&self) -> Vec<(&'static str, ParamSpec)> {
            vec![("path", ParamSpec::required(ParamKind::String, "path"))]
        }
        async fn execute(&self, _args: serde_json::Value) -> Result<ToolResult, String> {
            Ok(ToolResult::ok("done"))
        }
    }

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(DummyTool("dummy", ToolCategory::ReadOnly)));
        assert!(reg.get("dummy").is_some());
        assert!(reg.get("nonexistent").is_none());
    }

    #[test]
    fn duplicate_name_replaces_keeps_order() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(DummyTool("a", ToolCategory::ReadOnly)));
        reg.register(Arc::new(DummyTool("b", ToolCategory::ReadOnly)));
        reg.register(Arc::new(DummyTool("a", ToolCategory::Execution)));
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.names(), vec!["a".to_string(), "b".to_string()]);
        // Replacement took effect.
        assert!(reg.is_side_effecting("a"));
    }

    #[test]
    fn list_preserves_insertion_order() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(DummyTool("zeta", ToolCategory::ReadOnly)));
        reg.register(Arc::new(DummyTool("alpha", ToolCategory::ReadOnly)));
        let names: Vec<String> = reg.list().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn schemas_match_parser_names() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(DummyTool("read_file", ToolCategory::ReadOnly)));
        let schemas = reg.schemas_for_llm();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0]["name"], "read_file");
        assert_eq!(schemas[0]["parameters"]["type"], "object");
        assert_eq!(schemas[0]["parameters"]["required"][0], json!("path"));
    }

    #[test]
    fn unknown_tool_is_conservatively_side_effecting() {
        let reg = ToolRegistry::new();
        assert!(reg.is_side_effecting("mystery"));
    }
}
