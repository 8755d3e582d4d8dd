//! Tool approval ports consumed by the job scheduler.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::DomainResult;

/// Outcome of a pending approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

/// Policy deciding which tool invocations need a human in the loop.
pub trait ToolApprovalPolicy: Send + Sync {
    fn requires_approval(&self, server_name: &str, tool_name: &str) -> bool;
}

/// Blocking approval channel. `request_approval` resolves when a human (or an
/// upstream policy engine) approves or rejects the invocation.
#[async_trait]
pub trait PendingApprovalStore: Send + Sync {
    async fn request_approval(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: &Value,
        requested_by: &str,
    ) -> DomainResult<ApprovalDecision>;
}

/// Policy that never requires approval.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproveAll;

impl ToolApprovalPolicy for ApproveAll {
    fn requires_approval(&self, _server_name: &str, _tool_name: &str) -> bool {
        false
    }
}
