//! Scheduled job domain model.
//!
//! A job fires on a timezone-aware cron schedule and either invokes an MCP
//! tool or runs an agent prompt. Every firing (including dry runs) leaves a
//! `JobExecution` record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Maximum stored length for a job execution result.
pub const MAX_RESULT_CHARS: usize = 50_000;

/// What a job does when it fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    /// Invoke one tool on a registered MCP server.
    McpTool {
        mcp_server_name: String,
        tool_name: String,
        #[serde(default)]
        tool_arguments: Value,
    },
    /// Run an agent with a fixed prompt.
    Agent {
        agent_prompt: String,
        persona_id: Option<String>,
        agent_system_prompt: Option<String>,
        agent_model: Option<String>,
        agent_max_tool_calls: Option<i32>,
    },
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::McpTool { .. } => "MCP_TOOL",
            Self::Agent { .. } => "AGENT",
        }
    }
}

/// Outcome of the most recent firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobRunStatus {
    Success,
    Failed,
    Running,
    Skipped,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Running => "RUNNING",
            Self::Skipped => "SKIPPED",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            "RUNNING" => Some(Self::Running),
            "SKIPPED" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// A cron-scheduled job. `name` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub name: String,
    pub cron_expression: String,
    /// IANA timezone name, e.g. `Europe/Berlin`.
    pub timezone: String,
    pub kind: JobKind,
    pub retry_on_failure: bool,
    pub max_retry_count: u32,
    pub execution_timeout_ms: Option<u64>,
    pub slack_channel_id: Option<String>,
    pub teams_webhook_url: Option<String>,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<JobRunStatus>,
    pub last_result: Option<String>,
}

impl ScheduledJob {
    pub fn new(name: impl Into<String>, cron_expression: impl Into<String>, kind: JobKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            cron_expression: cron_expression.into(),
            timezone: "UTC".to_string(),
            kind,
            retry_on_failure: false,
            max_retry_count: 0,
            execution_timeout_ms: None,
            slack_channel_id: None,
            teams_webhook_url: None,
            enabled: true,
            last_run_at: None,
            last_status: None,
            last_result: None,
        }
    }
}

/// One recorded firing of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: Uuid,
    pub job_id: Uuid,
    pub job_name: String,
    pub status: JobRunStatus,
    /// Result text, truncated to [`MAX_RESULT_CHARS`].
    pub result: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub dry_run: bool,
}

/// Command handed to the agent executor for AGENT jobs.
#[derive(Debug, Clone)]
pub struct AgentCommand {
    pub prompt: String,
    pub system_prompt: String,
    pub model: Option<String>,
    pub max_tool_calls: Option<i32>,
    pub user_id: String,
    pub channel: String,
    pub metadata: HashMap<String, Value>,
}

/// Fallback system prompt when neither the job nor a persona provides one.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";
