//! Agent descriptors, capabilities, and tasks.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolCategory;

/// Coarse permission attached to an agent at construction.  Capability sets
/// are never widened at runtime; the loop rejects tool requests that
/// violate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ReadOnly,
    Design,
    FileEdit,
    BashExec,
    Network,
}

impl Capability {
    /// The capability a tool category requires.
    pub fn required_for(category: ToolCategory) -> Capability {
        match category {
            ToolCategory::ReadOnly | ToolCategory::GitRead => Capability::ReadOnly,
            ToolCategory::FileWrite => Capability::FileEdit,
            ToolCategory::Execution | ToolCategory::GitWrite => Capability::BashExec,
            ToolCategory::Network => Capability::Network,
        }
    }
}

/// Check whether a capability set permits a tool category.
pub fn permits(capabilities: &HashSet<Capability>, category: ToolCategory) -> bool {
    capabilities.contains(&Capability::required_for(category))
}

/// Static description of one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    pub role: String,
    pub description: String,
    pub capabilities: HashSet<Capability>,
    /// Key into the agent constructor table.
    pub constructor: String,
}

/// One unit of work handed to an agent.
#[derive(Debug, Clone)]
pub struct AgentTask {
    pub request: String,
    pub context: HashMap<String, String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl AgentTask {
    /// Build a task.  The request must be non-empty after trimming.
    pub fn new(request: impl Into<String>) -> Result<Self, String> {
        let request = request.into();
        if request.trim().is_empty() {
            return Err("task request must not be empty".into());
        }
        Ok(Self {
            request,
            context: HashMap::new(),
            metadata: Value::Null,
            created_at: Utc::now(),
        })
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Final outcome of one agent invocation.  Exactly one of `data` / `error`
/// is meaningful.
#[derive(Debug, Clone)]
pub enum AgentResponse {
    Success {
        data: Value,
        reasoning: Option<String>,
    },
    Failure {
        error: String,
        reasoning: Option<String>,
    },
}

impl AgentResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, AgentResponse::Success { .. })
    }
}
