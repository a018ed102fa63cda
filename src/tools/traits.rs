//! The `Tool` trait and the typed parameter schema attached to each tool.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The result of executing a [`Tool`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Human-readable output (stdout, file contents, directory listing, etc.).
    pub output: String,
    /// Whether the tool considered the execution successful.
    pub success: bool,
    /// Optional structured metadata for machine consumption.
    pub metadata: Option<Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
            metadata: None,
        }
    }

    pub fn err(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: false,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Functional grouping of tools.  Side-effecting categories route through
/// the approval policy before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    ReadOnly,
    FileWrite,
    Execution,
    GitRead,
    GitWrite,
    Network,
}

impl ToolCategory {
    /// Categories whose tools mutate state or reach the network.
    pub fn side_effecting(&self) -> bool {
        matches!(
            self,
            ToolCategory::FileWrite
                | ToolCategory::Execution
                | ToolCategory::GitWrite
                | ToolCategory::Network
        )
    }

    /// Tools in the long-running tier get the higher invoker timeout.
    pub fn long_running(&self) -> bool {
        matches!(
            self,
            ToolCategory::Execution | ToolCategory::Network | ToolCategory::GitRead
        )
    }
}

/// Declared type of one tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamKind {
    fn json_name(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Object => "object",
            ParamKind::Array => "array",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Object => value.is_object(),
            ParamKind::Array => value.is_array(),
        }
    }
}

/// Specification of one parameter in a tool's schema.
#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<Value>,
    pub description: &'static str,
    /// Accepted values, when the parameter is an enumeration.
    pub allowed: Option<&'static [&'static str]>,
}

impl ParamSpec {
    pub fn required(kind: ParamKind, description: &'static str) -> Self {
        Self {
            kind,
            required: true,
            default: None,
            description,
            allowed: None,
        }
    }

    pub fn optional(kind: ParamKind, description: &'static str) -> Self {
        Self {
            kind,
            required: false,
            default: None,
            description,
            allowed: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_allowed(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = Some(allowed);
        self
    }
}

/// Validate `args` against an ordered parameter list.  Returns the first
/// violation as an error string.
pub fn validate_args(params: &[(&'static str, ParamSpec)], args: &Value) -> Result<(), String> {
    let Some(map) = args.as_object() else {
        return Err("arguments must be a JSON object".into());
    };

    for (name, spec) in params {
        match map.get(*name) {
            None if spec.required => return Err(format!("missing required argument '{name}'")),
            None => {}
            Some(Value::Null) if !spec.required => {}
            Some(value) => {
                if !spec.kind.matches(value) {
                    return Err(format!(
                        "argument '{name}' must be of type {}",
                        spec.kind.json_name()
                    ));
                }
                if let (Some(allowed), Some(s)) = (spec.allowed, value.as_str()) {
                    if !allowed.contains(&s) {
                        return Err(format!(
                            "argument '{name}' must be one of {allowed:?}, got '{s}'"
                        ));
                    }
                }
            }
        }
    }

    for key in map.keys() {
        if !params.iter().any(|(name, _)| name == key) {
            return Err(format!("unknown argument '{key}'"));
        }
    }

    Ok(())
}

/// Build the JSON-schema object emitted to the LLM for one tool.
pub fn schema_object(params: &[(&'static str, ParamSpec)]) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for (name, spec) in params {
        let mut prop = serde_json::Map::new();
        prop.insert("type".into(), json!(spec.kind.json_name()));
        prop.insert("description".into(), json!(spec.description));
        if let Some(allowed) = spec.allowed {
            prop.insert("enum".into(), json!(allowed));
        }
        if let Some(default) = &spec.default {
            prop.insert("default".into(), default.clone());
        }
        properties.insert((*name).to_owned(), Value::Object(prop));
        if spec.required {
            required.push(*name);
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// A capability the model can invoke by emitting a marker.
///
/// Implementations must be `Send + Sync` so they can be held in a shared
/// `Arc<dyn Tool>` registry.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable machine identifier (snake_case), e.g. `"bash_command"`.
    fn name(&self) -> &str;

    /// Human-readable description used in LLM tool payloads.
    fn description(&self) -> &str;

    /// Functional category; drives timeouts and the approval policy.
    fn category(&self) -> ToolCategory;

    /// Ordered parameter specification.
    fn parameters(&self) -> Vec<(&'static str, ParamSpec)>;

    /// Execute the tool.  Arguments have already been validated against
    /// [`Tool::parameters`] by the invoker.
    async fn execute(&self, args: Value) -> Result<ToolResult, String>;
}

/// Summary of a registered tool, suitable for inclusion in LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub schema: Value,
    pub side_effecting: bool,
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Vec<(&'static str, ParamSpec)> {
        vec![
            ("path", ParamSpec::required(ParamKind::String, "target path")),
            (
                "count",
                ParamSpec::optional(ParamKind::Integer, "how many").with_default(json!(1)),
            ),
            (
                "mode",
                ParamSpec::optional(ParamKind::String, "access mode")
                    .with_allowed(&["read", "write"]),
            ),
        ]
    }

    #[test]
    fn accepts_valid_args() {
        let args = json!({"path": "/tmp/x", "count": 3, "mode": "read"});
        assert!(validate_args(&params(), &args).is_ok());
    }

    #[test]
    fn missing_required_rejected() {
        let args = json!({"count": 3});
        let err = validate_args(&params(), &args).unwrap_err();
        assert!(err.contains("path"));
    }

    #[test]
    fn wrong_type_rejected() {
        let args = json!({"path": 42});
        let err = validate_args(&params(), &args).unwrap_err();
        assert!(err.contains("type string"));
    }

    #[test]
    fn enum_violation_rejected() {
        let args = json!({"path": "/x", "mode": "append"});
        let err = validate_args(&params(), &args).unwrap_err();
        assert!(err.contains("must be one of"));
    }

    #[test]
    fn unknown_argument_rejected() {
        let args = json!({"path": "/x", "bogus": true});
        let err = validate_args(&params(), &args).unwrap_err();
        assert!(err.contains("bogus"));
    }

    #[test]
    fn non_object_args_rejected() {
        assert!(validate_args(&params(), &json!("nope")).is_err());
    }

    #[test]
    fn schema_includes_required_and_enum() {
        let schema = schema_object(&params());
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["path"]["type"], "string");
        assert_eq!(schema["properties"]["mode"]["enum"][0], "read");
        assert_eq!(schema["required"][0], "path");
    }

    #[test]
    fn category_side_effects() {
        assert!(ToolCategory::Execution.side_effecting());
        assert!(ToolCategory::FileWrite.side_effecting());
        assert!(ToolCategory::Network.side_effecting());
        assert!(!ToolCategory::ReadOnly.side_effecting());
        assert!(!ToolCategory::GitRead.side_effecting());
    }
}
