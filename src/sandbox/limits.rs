//! Hard resource caps applied to sandboxed child processes.

use serde::{Deserialize, Serialize};

use crate::config::SandboxConfig;

/// Resource limits for one command execution.  These are hard caps applied
/// in the child process before `exec`; exceeding them kills the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Wall-clock (and CPU soft-limit) timeout in seconds.
    pub timeout_seconds: u64,
    /// Output capture ceiling per stream, in bytes.
    pub max_output_bytes: usize,
    /// Address-space limit in MB.
    pub max_memory_mb: u64,
    /// CPU usage ceiling (informational; RLIMIT_CPU is the hard stop).
    pub max_cpu_percent: u8,
    /// Open file descriptor cap.
    pub max_open_files: u64,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_output_bytes: 1024 * 1024,
            max_memory_mb: 512,
            max_cpu_percent: 80,
            max_open_files: 100,
        }
    }
}

impl ExecutionLimits {
    pub fn from_config(cfg: &SandboxConfig, timeout_seconds: u64) -> Self {
        Self {
            timeout_seconds,
            max_output_bytes: cfg.max_output_bytes,
            max_memory_mb: cfg.max_memory_mb,
            max_cpu_percent: cfg.max_cpu_percent,
            max_open_files: cfg.max_open_files,
        }
    }

    /// Clamp a caller-requested timeout to this limit set.
    pub fn effective_timeout(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.timeout_seconds)
            .min(self.timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_timeout_clamps() {
        let limits = ExecutionLimits::default();
        assert_eq!(limits.effective_timeout(None), 30);
        assert_eq!(limits.effective_timeout(Some(5)), 5);
        assert_eq!(limits.effective_timeout(Some(500)), 30);
    }
}
