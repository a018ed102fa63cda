//! Approval policy for side-effecting tool calls.

use async_trait::async_trait;

/// Answer from the approval callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Deny,
    AllowOnce,
    /// Allow now and add the command's base to the in-session allow-list.
    AllowAlways,
}

/// Caller-supplied gate consulted before any side-effecting tool runs.
/// May block indefinitely waiting on the user.
#[async_trait]
pub trait ApprovalCallback: Send + Sync {
    async fn request_approval(&self, tool_name: &str, summary: &str) -> ApprovalDecision;

    /// Plan-gating variant: shown the formatted plan, answers yes/no/edit.
    async fn request_plan_approval(&self, plan: &str) -> PlanApproval {
        let _ = plan;
        PlanApproval::Approve
    }
}

/// Answer for plan gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanApproval {
    Approve,
    Reject,
    /// Edit was requested; proceed with the original plan.
    Edit,
}

/// Policy used when no callback is wired: approve everything, or deny all
/// side effects, per configuration.
pub struct AutoApproval {
    deny_side_effects: bool,
}

impl AutoApproval {
    pub fn new(deny_side_effects: bool) -> Self {
        Self { deny_side_effects }
    }
}

#[async_trait]
impl ApprovalCallback for AutoApproval {
    async fn request_approval(&self, tool_name: &str, _summary: &str) -> ApprovalDecision {
        if self.deny_side_effects {
            tracing::info!("auto-denying side-effecting tool '{tool_name}'");
            ApprovalDecision::Deny
        } else {
            ApprovalDecision::AllowOnce
        }
    }
}
