//! Domain models.

pub mod alert;
pub mod config;
pub mod hook;
pub mod job;
pub mod mcp;
pub mod metric_event;
pub mod tenant;

pub use alert::{
    AlertInstance, AlertMetric, AlertRule, AlertRuleType, AlertSeverity, AlertStatus, Baseline,
    BASELINE_MIN_SAMPLES,
};
pub use config::Config;
pub use hook::{
    HookContext, HookKind, HookResult, LifecycleHook, OutputGuardResult, ToolCallResult,
};
pub use job::{
    AgentCommand, JobExecution, JobKind, JobRunStatus, ScheduledJob, DEFAULT_SYSTEM_PROMPT,
    MAX_RESULT_CHARS,
};
pub use mcp::{McpServerDefinition, McpServerStatus, McpTool, McpTransportType};
pub use metric_event::{
    AgentExecutionEvent, EvalResultEvent, GuardAction, GuardEvent, McpHealthEvent, MetricEvent,
    MetricKind, MetricPayload, QuotaAction, QuotaEvent, SessionEvent, TokenUsageEvent,
    ToolCallEvent, ToolSource, DEFAULT_TENANT, MAX_MESSAGE_CHARS,
};
pub use tenant::{Tenant, TenantPlan, TenantQuota, TenantStatus, TenantUsage};
