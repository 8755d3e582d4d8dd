//! Domain errors for the Argus control plane.

use thiserror::Error;
use uuid::Uuid;

/// Stable error codes surfaced at the request boundary and persisted on
/// metric rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    GuardRejected,
    HookRejected,
    OutputGuardRejected,
    OutputTooShort,
    QuotaRejectedRequests,
    QuotaRejectedTokens,
    QuotaRejectedSuspended,
    QuotaRejectedDeactivated,
    McpDisconnected,
    ToolNotFound,
    ApprovalRejected,
    BoundaryViolation,
    AgentFailure,
    CircuitOpen,
    DbError,
    TransportError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GuardRejected => "GUARD_REJECTED",
            Self::HookRejected => "HOOK_REJECTED",
            Self::OutputGuardRejected => "OUTPUT_GUARD_REJECTED",
            Self::OutputTooShort => "OUTPUT_TOO_SHORT",
            Self::QuotaRejectedRequests => "QUOTA_REJECTED_REQUESTS",
            Self::QuotaRejectedTokens => "QUOTA_REJECTED_TOKENS",
            Self::QuotaRejectedSuspended => "QUOTA_REJECTED_SUSPENDED",
            Self::QuotaRejectedDeactivated => "QUOTA_REJECTED_DEACTIVATED",
            Self::McpDisconnected => "MCP_DISCONNECTED",
            Self::ToolNotFound => "TOOL_NOT_FOUND",
            Self::ApprovalRejected => "APPROVAL_REJECTED",
            Self::BoundaryViolation => "BOUNDARY_VIOLATION",
            Self::AgentFailure => "AGENT_FAILURE",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::DbError => "DB_ERROR",
            Self::TransportError => "TRANSPORT_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain-level errors that can occur in the Argus system.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("Alert rule not found: {0}")]
    AlertRuleNotFound(Uuid),

    #[error("Scheduled job not found: {0}")]
    JobNotFound(String),

    #[error("MCP server not found: {0}")]
    McpServerNotFound(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Approval rejected for tool: {0}")]
    ApprovalRejected(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Execution timed out after {0} ms")]
    ExecutionTimeout(u64),

    /// Cooperative cancellation. Always re-raised through hook chains and
    /// never converted into a retry or a drop.
    #[error("Operation cancelled")]
    Cancelled,
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Cancellation must propagate through layers that otherwise swallow
    /// errors (hook chains, the metric collector, job retry loops).
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_screaming_snake() {
        assert_eq!(
            ErrorCode::QuotaRejectedRequests.as_str(),
            "QUOTA_REJECTED_REQUESTS"
        );
        assert_eq!(ErrorCode::CircuitOpen.as_str(), "CIRCUIT_OPEN");
    }

    #[test]
    fn cancellation_is_detected() {
        assert!(DomainError::Cancelled.is_cancellation());
        assert!(!DomainError::ValidationFailed("x".into()).is_cancellation());
    }
}
