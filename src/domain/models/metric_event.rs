//! Metric event model for the ingestion pipeline.
//!
//! Every observable fact about the runtime (agent runs, tool calls, token
//! usage, guard decisions, MCP health, quota actions, eval results) is a
//! [`MetricEvent`]: a timestamped, tenant-scoped envelope around one typed
//! payload. Events flow through the ring buffer and are persisted append-only
//! by the metric store, one table per payload type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tenant used when a request carries no tenant identification.
pub const DEFAULT_TENANT: &str = "default";

/// Maximum stored length for free-form error/reason/failure detail fields.
pub const MAX_MESSAGE_CHARS: usize = 500;

/// Truncate a string to `max` characters (not bytes).
///
/// Applied at the persistence boundary to `error_message`, `reason_detail`
/// and `failure_detail` fields.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// A timestamped, tenant-scoped metric event.
///
/// `time` is `None` until the event is published into the ring buffer, at
/// which point it is stamped exactly once and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEvent {
    /// Stamped on publish; `None` before the event enters the pipeline.
    pub time: Option<DateTime<Utc>>,
    pub tenant_id: String,
    pub payload: MetricPayload,
}

impl MetricEvent {
    /// Create an event for the default tenant.
    pub fn new(payload: MetricPayload) -> Self {
        Self {
            time: None,
            tenant_id: DEFAULT_TENANT.to_string(),
            payload,
        }
    }

    /// Create an event scoped to a tenant.
    pub fn for_tenant(tenant_id: impl Into<String>, payload: MetricPayload) -> Self {
        Self {
            time: None,
            tenant_id: tenant_id.into(),
            payload,
        }
    }

    /// Stamp the publish time if not already set.
    pub fn stamp(&mut self, now: DateTime<Utc>) {
        if self.time.is_none() {
            self.time = Some(now);
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.payload.kind()
    }
}

/// Discriminant of a metric payload. Used to partition drained batches so
/// that each group maps onto exactly one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricKind {
    AgentExecution,
    ToolCall,
    TokenUsage,
    Session,
    Guard,
    McpHealth,
    Quota,
    EvalResult,
}

impl MetricKind {
    pub const ALL: [MetricKind; 8] = [
        Self::AgentExecution,
        Self::ToolCall,
        Self::TokenUsage,
        Self::Session,
        Self::Guard,
        Self::McpHealth,
        Self::Quota,
        Self::EvalResult,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentExecution => "agent_execution",
            Self::ToolCall => "tool_call",
            Self::TokenUsage => "token_usage",
            Self::Session => "session",
            Self::Guard => "guard",
            Self::McpHealth => "mcp_health",
            Self::Quota => "quota",
            Self::EvalResult => "eval_result",
        }
    }

    /// Table each payload type persists into.
    pub fn table(&self) -> &'static str {
        match self {
            Self::AgentExecution => "metric_agent_executions",
            Self::ToolCall => "metric_tool_calls",
            Self::TokenUsage => "metric_token_usage",
            Self::Session => "metric_sessions",
            Self::Guard => "metric_guard_events",
            Self::McpHealth => "metric_mcp_health",
            Self::Quota => "metric_quota_events",
            Self::EvalResult => "metric_eval_results",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed metric payload, one variant per persisted table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricPayload {
    AgentExecution(AgentExecutionEvent),
    ToolCall(ToolCallEvent),
    TokenUsage(TokenUsageEvent),
    Session(SessionEvent),
    Guard(GuardEvent),
    McpHealth(McpHealthEvent),
    Quota(QuotaEvent),
    EvalResult(EvalResultEvent),
}

impl MetricPayload {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::AgentExecution(_) => MetricKind::AgentExecution,
            Self::ToolCall(_) => MetricKind::ToolCall,
            Self::TokenUsage(_) => MetricKind::TokenUsage,
            Self::Session(_) => MetricKind::Session,
            Self::Guard(_) => MetricKind::Guard,
            Self::McpHealth(_) => MetricKind::McpHealth,
            Self::Quota(_) => MetricKind::Quota,
            Self::EvalResult(_) => MetricKind::EvalResult,
        }
    }
}

/// One completed agent run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentExecutionEvent {
    pub run_id: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub channel: Option<String>,
    pub success: bool,
    pub error_code: Option<String>,
    pub duration_ms: i64,
    pub llm_duration_ms: i64,
    pub tool_duration_ms: i64,
    pub guard_duration_ms: i64,
    pub queue_wait_ms: i64,
    pub tool_count: i32,
    pub persona_id: Option<String>,
    pub prompt_template_id: Option<String>,
    pub intent_category: Option<String>,
    pub guard_rejected: bool,
    pub guard_stage: Option<String>,
    pub guard_category: Option<String>,
    pub fallback_used: bool,
    pub retry_count: i32,
}

/// Source of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSource {
    Local,
    Mcp,
}

impl ToolSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Mcp => "mcp",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(Self::Local),
            "mcp" => Some(Self::Mcp),
            _ => None,
        }
    }
}

/// One tool call within an agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallEvent {
    pub run_id: String,
    pub tool_name: String,
    pub tool_source: ToolSource,
    pub mcp_server_name: Option<String>,
    pub call_index: i32,
    pub success: bool,
    pub duration_ms: i64,
    pub error_class: Option<String>,
    pub error_message: Option<String>,
}

/// Token consumption for one LLM step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsageEvent {
    pub run_id: String,
    pub model: String,
    pub provider: String,
    pub step_type: Option<String>,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub reasoning_tokens: i64,
    pub total_tokens: i64,
    pub estimated_cost_usd: f64,
}

/// A completed conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: String,
    pub user_id: Option<String>,
    pub channel: Option<String>,
    pub turn_count: i32,
    pub total_duration_ms: i64,
    pub total_tokens: i64,
    pub total_cost_usd: f64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: Option<String>,
}

/// Disposition of a guard decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardAction {
    Allowed,
    Rejected,
    Modified,
}

impl GuardAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Rejected => "rejected",
            Self::Modified => "modified",
        }
    }
}

/// One guard (input or output filter) decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardEvent {
    pub user_id: Option<String>,
    pub channel: Option<String>,
    pub stage: String,
    pub category: String,
    pub reason_class: Option<String>,
    pub reason_detail: Option<String>,
    pub is_output_guard: bool,
    pub action: GuardAction,
}

/// Connection-level health observation for an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpHealthEvent {
    pub server_name: String,
    /// One of CONNECTED, FAILED, DISCONNECTED.
    pub status: String,
    pub response_time_ms: i64,
    pub error_class: Option<String>,
    pub error_message: Option<String>,
    pub tool_count: i32,
}

/// Quota enforcement outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaAction {
    RejectedRequests,
    RejectedTokens,
    RejectedSuspended,
    RejectedDeactivated,
    Warning,
}

impl QuotaAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RejectedRequests => "rejected_requests",
            Self::RejectedTokens => "rejected_tokens",
            Self::RejectedSuspended => "rejected_suspended",
            Self::RejectedDeactivated => "rejected_deactivated",
            Self::Warning => "warning",
        }
    }
}

/// One quota decision taken on the hot path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaEvent {
    pub action: QuotaAction,
    pub current_usage: i64,
    pub quota_limit: i64,
    pub reason: String,
}

/// One evaluation test-case result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalResultEvent {
    pub eval_run_id: String,
    pub test_case_id: String,
    pub pass: bool,
    pub score: f64,
    pub latency_ms: i64,
    pub token_usage: i64,
    pub cost: f64,
    pub assertion_type: String,
    pub failure_class: Option<String>,
    pub failure_detail: Option<String>,
    pub tags: Vec<String>,
}
