//! Advisory governance observer.
//!
//! The loop reports every request and command here; the hook returns a
//! free-form report and a severity.  It never blocks execution — whether a
//! report is surfaced to the user is the loop's decision, driven by
//! configuration.

use serde::{Deserialize, Serialize};

/// Severity ladder for governance reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// One observation result.
#[derive(Debug, Clone)]
pub struct GovernanceReport {
    pub severity: Severity,
    pub text: String,
}

impl GovernanceReport {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            text: text.into(),
        }
    }

    /// Reports at High or above are surfaced by default.
    pub fn should_surface(&self) -> bool {
        self.severity >= Severity::High
    }
}

/// A passive observer of actions flowing through the loop.
pub trait GovernanceHook: Send + Sync {
    /// Observe one action.  Must not block or fail the caller.
    fn observe(&self, action_kind: &str, payload: &str) -> GovernanceReport;
}

/// Default hook: pattern-flags destructive payloads, otherwise Info.
pub struct PatternGovernance {
    watch: Vec<(&'static str, Severity)>,
}

impl PatternGovernance {
    pub fn new() -> Self {
        Self {
            watch: vec![
                ("rm -rf /", Severity::Critical),
                ("mkfs", Severity::Critical),
                ("force push", Severity::High),
                ("--no-preserve-root", Severity::Critical),
                ("sudo", Severity::High),
                ("drop table", Severity::High),
                ("chmod 777", Severity::Medium),
            ],
        }
    }
}

impl Default for PatternGovernance {
    fn default() -> Self {
        Self::new()
    }
}

impl GovernanceHook for PatternGovernance {
    fn observe(&self, action_kind: &str, payload: &str) -> GovernanceReport {
        let lower = payload.to_lowercase();
        let worst = self
            .watch
            .iter()
            .filter(|(needle, _)| lower.contains(needle))
            .map(|(_, severity)| *severity)
            .max();
        match worst {
            Some(severity) => GovernanceReport {
                severity,
                text: format!("⚠ governance: {action_kind} contains a flagged pattern ({severity:?})"),
            },
            None => GovernanceReport::info(format!("{action_kind}: ok")),
        }
    }
}
