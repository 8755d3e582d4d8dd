//! Cron-driven job dispatch.
//!
//! On startup every enabled job is registered with a timezone-aware cron
//! trigger. The tick loop fires due jobs onto their own tasks; a job whose
//! previous firing is still running is recorded as SKIPPED for that tick.
//! Executions run through an optional wall-clock timeout wrapping a fixed
//! 2-second retry loop, and every firing (dry runs included) persists an
//! execution record.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use dashmap::DashSet;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult, ErrorCode};
use crate::domain::models::hook::{meta_keys, HookContext, HookResult, ToolCallResult};
use crate::domain::models::{
    AgentCommand, JobExecution, JobKind, JobRunStatus, ScheduledJob, DEFAULT_SYSTEM_PROMPT,
    MAX_RESULT_CHARS,
};
use crate::domain::models::metric_event::truncate_chars;
use crate::domain::ports::{
    AgentRunner, ApprovalDecision, JobNotifier, JobStore, PendingApprovalStore, PersonaStore,
    ToolApprovalPolicy,
};
use crate::infrastructure::mcp::McpConnectionManager;
use crate::services::hook_registry::HookRegistry;
use crate::services::job_service::{parse_cron, parse_timezone};

/// Delay between retry attempts.
const RETRY_DELAY: Duration = Duration::from_millis(2000);

/// Identity stamped on scheduler-driven executions.
const SCHEDULER_PRINCIPAL: &str = "scheduler";

struct RegisteredJob {
    job_id: Uuid,
    name: String,
    schedule: cron::Schedule,
    timezone: Tz,
    next_fire: Option<DateTime<Utc>>,
}

impl RegisteredJob {
    fn compute_next(&mut self, now: DateTime<Utc>) {
        self.next_fire = self
            .schedule
            .after(&now.with_timezone(&self.timezone))
            .next()
            .map(|next| next.with_timezone(&Utc));
    }
}

pub struct JobScheduler {
    store: Arc<dyn JobStore>,
    mcp: Arc<McpConnectionManager>,
    agent: Arc<dyn AgentRunner>,
    personas: Arc<dyn PersonaStore>,
    hooks: Arc<HookRegistry>,
    approval_policy: Arc<dyn ToolApprovalPolicy>,
    approvals: Arc<dyn PendingApprovalStore>,
    notifier: Option<Arc<dyn JobNotifier>>,
    tick_interval: Duration,
    registered: RwLock<Vec<RegisteredJob>>,
    in_flight: DashSet<Uuid>,
}

impl JobScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn JobStore>,
        mcp: Arc<McpConnectionManager>,
        agent: Arc<dyn AgentRunner>,
        personas: Arc<dyn PersonaStore>,
        hooks: Arc<HookRegistry>,
        approval_policy: Arc<dyn ToolApprovalPolicy>,
        approvals: Arc<dyn PendingApprovalStore>,
        notifier: Option<Arc<dyn JobNotifier>>,
        tick_interval_ms: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            mcp,
            agent,
            personas,
            hooks,
            approval_policy,
            approvals,
            notifier,
            tick_interval: Duration::from_millis(tick_interval_ms.max(100)),
            registered: RwLock::new(Vec::new()),
            in_flight: DashSet::new(),
        })
    }

    /// Load all enabled jobs and arm their triggers. Jobs with definitions
    /// that no longer validate are skipped with a warning.
    pub async fn load_jobs(&self) -> DomainResult<usize> {
        let jobs = self.store.list_enabled().await?;
        let now = Utc::now();
        let mut registered = Vec::with_capacity(jobs.len());

        for job in jobs {
            match (parse_cron(&job.cron_expression), parse_timezone(&job.timezone)) {
                (Ok(schedule), Ok(timezone)) => {
                    let mut entry = RegisteredJob {
                        job_id: job.id,
                        name: job.name.clone(),
                        schedule,
                        timezone,
                        next_fire: None,
                    };
                    entry.compute_next(now);
                    tracing::info!(
                        job = %job.name,
                        cron = %job.cron_expression,
                        timezone = %job.timezone,
                        next_fire = ?entry.next_fire,
                        "Registered scheduled job"
                    );
                    registered.push(entry);
                }
                (Err(error), _) | (_, Err(error)) => {
                    tracing::warn!(job = %job.name, %error, "Skipping job with invalid schedule");
                }
            }
        }

        let count = registered.len();
        *self.registered.write().await = registered;
        Ok(count)
    }

    /// Start the tick loop.
    pub fn start(self: &Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            tracing::info!(
                tick_ms = scheduler.tick_interval.as_millis() as u64,
                "Job scheduler started"
            );
            loop {
                tokio::select! {
                    () = tokio::time::sleep(scheduler.tick_interval) => {
                        scheduler.tick().await;
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            tracing::info!("Job scheduler stopped");
        })
    }

    async fn tick(self: &Arc<Self>) {
        let now = Utc::now();
        let mut due = Vec::new();
        {
            let mut registered = self.registered.write().await;
            for entry in registered.iter_mut() {
                if let Some(next_fire) = entry.next_fire {
                    if next_fire <= now {
                        due.push((entry.job_id, entry.name.clone()));
                        entry.compute_next(now);
                    }
                }
            }
        }

        for (job_id, name) in due {
            let scheduler = self.clone();
            tokio::spawn(async move {
                if let Err(error) = scheduler.fire(job_id).await {
                    tracing::error!(job = %name, %error, "Scheduled job firing failed");
                }
            });
        }
    }

    /// Fire one job by id, honoring the overlap-skip policy.
    async fn fire(self: &Arc<Self>, job_id: Uuid) -> DomainResult<()> {
        let Some(job) = self.store.find_by_id(job_id).await? else {
            return Ok(()); // deleted since registration
        };
        if !job.enabled {
            return Ok(());
        }

        if !self.in_flight.insert(job_id) {
            tracing::warn!(job = %job.name, "Previous run still in flight; skipping");
            let now = Utc::now();
            let skipped = JobExecution {
                id: Uuid::new_v4(),
                job_id,
                job_name: job.name.clone(),
                status: JobRunStatus::Skipped,
                result: None,
                started_at: now,
                completed_at: now,
                duration_ms: 0,
                dry_run: false,
            };
            if let Err(error) = self.store.record_execution(&skipped).await {
                tracing::warn!(job = %job.name, %error, "Failed to record skipped execution");
            }
            return Ok(());
        }

        let result = self.execute(&job, false).await;
        self.in_flight.remove(&job_id);
        result.map(|_| ())
    }

    /// Run a job immediately (CLI / API path).
    pub async fn run_now(&self, job_id: Uuid, dry_run: bool) -> DomainResult<JobExecution> {
        let job = self
            .store
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| DomainError::JobNotFound(job_id.to_string()))?;
        self.execute(&job, dry_run).await
    }

    /// Dry-run a job: same execution path, but the job's own run state is
    /// never touched. The execution record carries `dry_run = true`.
    pub async fn dry_run(&self, job_id: Uuid) -> DomainResult<JobExecution> {
        self.run_now(job_id, true).await
    }

    async fn execute(&self, job: &ScheduledJob, dry_run: bool) -> DomainResult<JobExecution> {
        let started_at = Utc::now();

        if !dry_run {
            if let Err(error) = self
                .store
                .update_run_state(job.id, JobRunStatus::Running, None, None)
                .await
            {
                tracing::warn!(job = %job.name, %error, "Failed to mark job RUNNING");
            }
        }

        let outcome = match job.execution_timeout_ms {
            Some(timeout_ms) => {
                match tokio::time::timeout(
                    Duration::from_millis(timeout_ms),
                    self.run_with_retries(job),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(DomainError::ExecutionTimeout(timeout_ms)),
                }
            }
            None => self.run_with_retries(job).await,
        };

        let completed_at = Utc::now();
        let (status, result_text) = match outcome {
            Ok(output) => (JobRunStatus::Success, output),
            Err(ref error) => (JobRunStatus::Failed, error.to_string()),
        };
        let result_text = truncate_chars(&result_text, MAX_RESULT_CHARS);

        let execution = JobExecution {
            id: Uuid::new_v4(),
            job_id: job.id,
            job_name: job.name.clone(),
            status,
            result: Some(result_text.clone()),
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds(),
            dry_run,
        };

        if let Err(error) = self.store.record_execution(&execution).await {
            tracing::warn!(job = %job.name, %error, "Failed to record job execution");
        }

        if !dry_run {
            if let Err(error) = self
                .store
                .update_run_state(job.id, status, Some(completed_at), Some(&result_text))
                .await
            {
                tracing::warn!(job = %job.name, %error, "Failed to update job run state");
            }
        }

        if job.slack_channel_id.is_some() || job.teams_webhook_url.is_some() {
            if let Some(notifier) = &self.notifier {
                if let Err(error) = notifier.job_completed(job, &execution).await {
                    tracing::warn!(job = %job.name, %error, "Job notification failed");
                }
            }
        }

        match status {
            JobRunStatus::Success => {
                tracing::info!(job = %job.name, duration_ms = execution.duration_ms, dry_run, "Job succeeded");
            }
            _ => {
                tracing::warn!(job = %job.name, result = %result_text, dry_run, "Job failed");
            }
        }

        Ok(execution)
    }

    /// Retry loop with a fixed delay. Cancellation is never retried.
    async fn run_with_retries(&self, job: &ScheduledJob) -> DomainResult<String> {
        let max_attempts = if job.retry_on_failure {
            1 + job.max_retry_count
        } else {
            1
        };

        let mut attempt = 1;
        loop {
            match self.run_once(job).await {
                Ok(output) => return Ok(output),
                Err(error) if error.is_cancellation() => return Err(error),
                Err(error) => {
                    if attempt >= max_attempts {
                        return Err(error);
                    }
                    tracing::warn!(
                        job = %job.name,
                        attempt,
                        max_attempts,
                        %error,
                        "Job attempt failed; retrying"
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn run_once(&self, job: &ScheduledJob) -> DomainResult<String> {
        match &job.kind {
            JobKind::McpTool {
                mcp_server_name,
                tool_name,
                tool_arguments,
            } => {
                self.run_mcp_tool(job, mcp_server_name, tool_name, tool_arguments.clone())
                    .await
            }
            JobKind::Agent {
                agent_prompt,
                persona_id,
                agent_system_prompt,
                agent_model,
                agent_max_tool_calls,
            } => {
                self.run_agent(
                    job,
                    agent_prompt,
                    persona_id.as_deref(),
                    agent_system_prompt.as_deref(),
                    agent_model.clone(),
                    *agent_max_tool_calls,
                )
                .await
            }
        }
    }

    async fn run_mcp_tool(
        &self,
        job: &ScheduledJob,
        server_name: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> DomainResult<String> {
        if !self.mcp.ensure_connected(server_name).await {
            return Err(DomainError::ExecutionFailed(format!(
                "{}: MCP server '{server_name}' is not connected",
                ErrorCode::McpDisconnected
            )));
        }

        let callback = self.mcp.find_tool(server_name, tool_name).map_err(|error| {
            match error {
                crate::infrastructure::mcp::McpError::ToolNotFound { server, tool } => {
                    DomainError::ToolNotFound(format!("{tool} on {server}"))
                }
                other => DomainError::ExecutionFailed(other.to_string()),
            }
        })?;

        let mut ctx = HookContext::new(Uuid::new_v4().to_string(), String::new())
            .with_user(SCHEDULER_PRINCIPAL)
            .with_channel(SCHEDULER_PRINCIPAL);
        ctx.set_meta(meta_keys::SCHEDULER_JOB_ID, json!(job.id.to_string()));
        ctx.set_meta(meta_keys::SCHEDULER_JOB_NAME, json!(job.name));
        ctx.set_meta(meta_keys::tool_source(tool_name), json!("mcp"));
        ctx.set_meta(meta_keys::mcp_server(tool_name), json!(server_name));

        if let HookResult::Reject { reason } = self.hooks.before_tool_call(&ctx).await? {
            return Err(DomainError::ExecutionFailed(format!(
                "{}: {reason}",
                ErrorCode::HookRejected
            )));
        }

        if self.approval_policy.requires_approval(server_name, tool_name) {
            let decision = self
                .approvals
                .request_approval(server_name, tool_name, &arguments, SCHEDULER_PRINCIPAL)
                .await?;
            if decision == ApprovalDecision::Rejected {
                return Err(DomainError::ApprovalRejected(format!(
                    "{tool_name} on {server_name}"
                )));
            }
        }

        let started = std::time::Instant::now();
        let call_result = callback.call(arguments).await;
        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = started.elapsed().as_millis() as i64;

        let (tool_result, output) = match call_result {
            Ok(output) => (
                ToolCallResult::success(tool_name, 0, duration_ms),
                Ok(output),
            ),
            Err(error) => (
                ToolCallResult::failure(tool_name, 0, duration_ms, error.class(), error.to_string()),
                Err(DomainError::ExecutionFailed(format!(
                    "{}: {error}",
                    ErrorCode::TransportError
                ))),
            ),
        };

        self.hooks.after_tool_call(&ctx, &tool_result).await?;
        output
    }

    async fn run_agent(
        &self,
        job: &ScheduledJob,
        prompt: &str,
        persona_id: Option<&str>,
        system_prompt_override: Option<&str>,
        model: Option<String>,
        max_tool_calls: Option<i32>,
    ) -> DomainResult<String> {
        let system_prompt = match system_prompt_override {
            Some(prompt) => prompt.to_string(),
            None => self.resolve_persona_prompt(persona_id).await,
        };

        let mut metadata = std::collections::HashMap::new();
        metadata.insert(
            meta_keys::SCHEDULER_JOB_ID.to_string(),
            json!(job.id.to_string()),
        );
        metadata.insert(meta_keys::SCHEDULER_JOB_NAME.to_string(), json!(job.name));

        let command = AgentCommand {
            prompt: prompt.to_string(),
            system_prompt,
            model,
            max_tool_calls,
            user_id: SCHEDULER_PRINCIPAL.to_string(),
            channel: SCHEDULER_PRINCIPAL.to_string(),
            metadata,
        };

        self.agent.run(command).await
    }

    /// System prompt fallback chain: persona by id, then the platform default
    /// persona, then the built-in default.
    async fn resolve_persona_prompt(&self, persona_id: Option<&str>) -> String {
        if let Some(persona_id) = persona_id {
            match self.personas.find_by_id(persona_id).await {
                Ok(Some(persona)) => return persona.system_prompt,
                Ok(None) => {
                    tracing::warn!(persona_id, "Persona not found; falling back");
                }
                Err(error) => {
                    tracing::warn!(persona_id, %error, "Persona lookup failed; falling back");
                }
            }
        }
        match self.personas.default_persona().await {
            Ok(Some(persona)) => persona.system_prompt,
            _ => DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}
