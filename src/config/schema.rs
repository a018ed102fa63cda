//! TOML configuration schema for Quarry.
//!
//! All fields have `#[serde(default)]` so a partially-filled `config.toml`
//! works correctly.  Missing sections fall back to their `Default` impl.
//!
//! Example `~/.quarry/config.toml`:
//! ```toml
//! [llm]
//! provider = "gemini"
//! model_name = "gemini-2.5-flash"
//! chunk_timeout_s = 30
//!
//! [tools]
//! max_parallel = 4
//! max_iterations = 10
//!
//! [security]
//! strict_mode = true
//!
//! [sandbox]
//! max_output_bytes = 1048576
//! ```

use serde::{Deserialize, Serialize};

// ─── LlmConfig ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider identifier (e.g. `"gemini"`, `"openai"`, `"ollama"`).
    pub provider: String,
    /// Model identifier (e.g. `"gemini-2.5-flash"`).
    pub model_name: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Sampling temperature.  Forced to 1.0 for models that require it.
    pub temperature: f32,
    /// Maximum tokens per response.
    pub max_output_tokens: u32,
    /// Top-p sampling parameter.
    pub top_p: Option<f32>,
    /// Top-k sampling parameter.
    pub top_k: Option<u32>,
    /// Seconds allowed before the first stream chunk arrives.
    pub init_timeout_s: u64,
    /// Seconds allowed between consecutive stream chunks.
    pub chunk_timeout_s: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_owned(),
            model_name: "gemini-2.5-flash".to_owned(),
            api_key_env: "LLM_API_KEY".to_owned(),
            temperature: 1.0,
            max_output_tokens: 8192,
            top_p: None,
            top_k: None,
            init_timeout_s: 10,
            chunk_timeout_s: 30,
        }
    }
}

// ─── ToolsConfig ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    /// Default per-tool wall-clock timeout in seconds.
    pub default_timeout_s: u64,
    /// Timeout for tools in the long-running category.
    pub long_timeout_s: u64,
    /// Maximum concurrent tool executions within one wave.
    pub max_parallel: usize,
    /// Maximum stream → parse → execute iterations per turn.
    pub max_iterations: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_timeout_s: 30,
            long_timeout_s: 60,
            max_parallel: 4,
            max_iterations: 10,
        }
    }
}

// ─── CircuitBreakerConfig ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker open.
    pub failure_threshold: u32,
    /// Successes in half-open needed to close again.
    pub success_threshold: u32,
    /// Seconds to hold the breaker open before probing.
    pub open_timeout_s: u64,
    /// Probe calls admitted while half-open.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            open_timeout_s: 20,
            half_open_max_calls: 2,
        }
    }
}

// ─── SandboxConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Output capture ceiling per stream, in bytes.
    pub max_output_bytes: usize,
    /// Address-space limit for child processes, in MB.
    pub max_memory_mb: u64,
    /// Open file descriptor limit for child processes.
    pub max_open_files: u64,
    /// CPU usage ceiling (informational; the hard limit is RLIMIT_CPU).
    pub max_cpu_percent: u8,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_output_bytes: 1_048_576,
            max_memory_mb: 512,
            max_open_files: 100,
            max_cpu_percent: 80,
        }
    }
}

// ─── RouterConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RouterConfig {
    /// Minimum confidence for an automatic route.
    pub min_confidence: f32,
    /// Confidence floor for disambiguation suggestions.
    pub ambiguity_threshold: f32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.70,
            ambiguity_threshold: 0.60,
        }
    }
}

// ─── ApprovalConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Deny side-effecting tools automatically when no callback is wired.
    pub side_effecting_auto_deny: bool,
    /// Persist `allow_always` grants beyond the session.
    pub persist_allow_always: bool,
}

// ─── GovernanceConfig ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Stream HIGH/CRITICAL governance reports to the user.
    pub surface_high_or_critical: bool,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            surface_high_or_critical: true,
        }
    }
}

// ─── SecurityConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    /// Enforce the comprehensive check and the command allow-list.
    pub strict_mode: bool,
    /// Treat `AllowedWithWarning` verdicts as requiring approval.
    pub warn_requires_approval: bool,
    /// Workspace root; escapes are logged by path sanitization.
    pub workspace_root: Option<String>,
    /// Extra allow-listed base commands (merged with `ALLOWED_CMD_*` env vars).
    pub extra_allowed: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            strict_mode: true,
            warn_requires_approval: false,
            workspace_root: None,
            extra_allowed: Vec::new(),
        }
    }
}

// ─── AppConfig ────────────────────────────────────────────────────────────────

/// Root configuration object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub tools: ToolsConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub sandbox: SandboxConfig,
    pub router: RouterConfig,
    pub approval: ApprovalConfig,
    pub governance: GovernanceConfig,
    pub security: SecurityConfig,
}

// ─── Tests ────────────────────────────────────────────────────────────────────
