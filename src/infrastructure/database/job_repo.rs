//! SQLite scheduled job repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{JobExecution, JobKind, JobRunStatus, ScheduledJob};
use crate::domain::ports::JobStore;

#[derive(Clone)]
pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const JOB_COLUMNS: &str = "id, name, cron_expression, timezone, job_type, mcp_server_name, \
                           tool_name, tool_arguments, agent_prompt, persona_id, \
                           agent_system_prompt, agent_model, agent_max_tool_calls, \
                           retry_on_failure, max_retry_count, execution_timeout_ms, \
                           slack_channel_id, teams_webhook_url, enabled, last_run_at, \
                           last_status, last_result";

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    name: String,
    cron_expression: String,
    timezone: String,
    job_type: String,
    mcp_server_name: Option<String>,
    tool_name: Option<String>,
    tool_arguments: Option<String>,
    agent_prompt: Option<String>,
    persona_id: Option<String>,
    agent_system_prompt: Option<String>,
    agent_model: Option<String>,
    agent_max_tool_calls: Option<i32>,
    retry_on_failure: i64,
    max_retry_count: i64,
    execution_timeout_ms: Option<i64>,
    slack_channel_id: Option<String>,
    teams_webhook_url: Option<String>,
    enabled: i64,
    last_run_at: Option<String>,
    last_status: Option<String>,
    last_result: Option<String>,
}

impl JobRow {
    fn into_job(self) -> DomainResult<ScheduledJob> {
        let kind = match self.job_type.as_str() {
            "MCP_TOOL" => JobKind::McpTool {
                mcp_server_name: self.mcp_server_name.unwrap_or_default(),
                tool_name: self.tool_name.unwrap_or_default(),
                tool_arguments: self
                    .tool_arguments
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()?
                    .unwrap_or(serde_json::Value::Null),
            },
            "AGENT" => JobKind::Agent {
                agent_prompt: self.agent_prompt.unwrap_or_default(),
                persona_id: self.persona_id,
                agent_system_prompt: self.agent_system_prompt,
                agent_model: self.agent_model,
                agent_max_tool_calls: self.agent_max_tool_calls,
            },
            other => {
                return Err(DomainError::ValidationFailed(format!(
                    "bad job type '{other}'"
                )))
            }
        };

        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let max_retry_count = self.max_retry_count.max(0) as u32;
        #[allow(clippy::cast_sign_loss)]
        let execution_timeout_ms = self.execution_timeout_ms.map(|t| t.max(0) as u64);

        Ok(ScheduledJob {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| DomainError::ValidationFailed(format!("bad job id: {e}")))?,
            name: self.name,
            cron_expression: self.cron_expression,
            timezone: self.timezone,
            kind,
            retry_on_failure: self.retry_on_failure != 0,
            max_retry_count,
            execution_timeout_ms,
            slack_channel_id: self.slack_channel_id,
            teams_webhook_url: self.teams_webhook_url,
            enabled: self.enabled != 0,
            last_run_at: self
                .last_run_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            last_status: self.last_status.as_deref().and_then(JobRunStatus::from_str),
            last_result: self.last_result,
        })
    }
}

#[async_trait]
impl JobStore for SqliteJobRepository {
    async fn list_enabled(&self) -> DomainResult<Vec<ScheduledJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE enabled = 1 ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn find_by_id(&self, id: Uuid) -> DomainResult<Option<ScheduledJob>> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE id = ?1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(JobRow::into_job).transpose()
    }

    async fn find_by_name(&self, name: &str) -> DomainResult<Option<ScheduledJob>> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE name = ?1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(JobRow::into_job).transpose()
    }

    async fn save(&self, job: &ScheduledJob) -> DomainResult<()> {
        let (job_type, mcp_server_name, tool_name, tool_arguments) = match &job.kind {
            JobKind::McpTool {
                mcp_server_name,
                tool_name,
                tool_arguments,
            } => (
                "MCP_TOOL",
                Some(mcp_server_name.clone()),
                Some(tool_name.clone()),
                Some(serde_json::to_string(tool_arguments)?),
            ),
            JobKind::Agent { .. } => ("AGENT", None, None, None),
        };
        let (agent_prompt, persona_id, agent_system_prompt, agent_model, agent_max_tool_calls) =
            match &job.kind {
                JobKind::Agent {
                    agent_prompt,
                    persona_id,
                    agent_system_prompt,
                    agent_model,
                    agent_max_tool_calls,
                } => (
                    Some(agent_prompt.clone()),
                    persona_id.clone(),
                    agent_system_prompt.clone(),
                    agent_model.clone(),
                    *agent_max_tool_calls,
                ),
                JobKind::McpTool { .. } => (None, None, None, None, None),
            };

        sqlx::query(
            "INSERT INTO scheduled_jobs (id, name, cron_expression, timezone, job_type,
                 mcp_server_name, tool_name, tool_arguments, agent_prompt, persona_id,
                 agent_system_prompt, agent_model, agent_max_tool_calls, retry_on_failure,
                 max_retry_count, execution_timeout_ms, slack_channel_id, teams_webhook_url,
                 enabled, last_run_at, last_status, last_result)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20, ?21, ?22)
             ON CONFLICT (id) DO UPDATE SET
                 name = excluded.name,
                 cron_expression = excluded.cron_expression,
                 timezone = excluded.timezone,
                 job_type = excluded.job_type,
                 mcp_server_name = excluded.mcp_server_name,
                 tool_name = excluded.tool_name,
                 tool_arguments = excluded.tool_arguments,
                 agent_prompt = excluded.agent_prompt,
                 persona_id = excluded.persona_id,
                 agent_system_prompt = excluded.agent_system_prompt,
                 agent_model = excluded.agent_model,
                 agent_max_tool_calls = excluded.agent_max_tool_calls,
                 retry_on_failure = excluded.retry_on_failure,
                 max_retry_count = excluded.max_retry_count,
                 execution_timeout_ms = excluded.execution_timeout_ms,
                 slack_channel_id = excluded.slack_channel_id,
                 teams_webhook_url = excluded.teams_webhook_url,
                 enabled = excluded.enabled",
        )
        .bind(job.id.to_string())
        .bind(&job.name)
        .bind(&job.cron_expression)
        .bind(&job.timezone)
        .bind(job_type)
        .bind(mcp_server_name)
        .bind(tool_name)
        .bind(tool_arguments)
        .bind(agent_prompt)
        .bind(persona_id)
        .bind(agent_system_prompt)
        .bind(agent_model)
        .bind(agent_max_tool_calls)
        .bind(i64::from(job.retry_on_failure))
        .bind(i64::from(job.max_retry_count))
        .bind(job.execution_timeout_ms.map(|t| t as i64))
        .bind(&job.slack_channel_id)
        .bind(&job.teams_webhook_url)
        .bind(i64::from(job.enabled))
        .bind(job.last_run_at.map(|dt| dt.to_rfc3339()))
        .bind(job.last_status.map(|s| s.as_str()))
        .bind(&job.last_result)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> DomainResult<()> {
        sqlx::query("DELETE FROM scheduled_jobs WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_run_state(
        &self,
        id: Uuid,
        status: JobRunStatus,
        last_run_at: Option<DateTime<Utc>>,
        last_result: Option<&str>,
    ) -> DomainResult<()> {
        sqlx::query(
            "UPDATE scheduled_jobs
             SET last_status = ?1,
                 last_run_at = COALESCE(?2, last_run_at),
                 last_result = COALESCE(?3, last_result)
             WHERE id = ?4",
        )
        .bind(status.as_str())
        .bind(last_run_at.map(|dt| dt.to_rfc3339()))
        .bind(last_result)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_execution(&self, execution: &JobExecution) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO scheduled_job_executions (id, job_id, job_name, status, result,
                 started_at, completed_at, duration_ms, dry_run)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(execution.id.to_string())
        .bind(execution.job_id.to_string())
        .bind(&execution.job_name)
        .bind(execution.status.as_str())
        .bind(&execution.result)
        .bind(execution.started_at.to_rfc3339())
        .bind(execution.completed_at.to_rfc3339())
        .bind(execution.duration_ms)
        .bind(i64::from(execution.dry_run))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_executions(&self, job_id: Uuid, limit: usize) -> DomainResult<Vec<JobExecution>> {
        #[derive(sqlx::FromRow)]
        struct ExecutionRow {
            id: String,
            job_id: String,
            job_name: String,
            status: String,
            result: Option<String>,
            started_at: String,
            completed_at: String,
            duration_ms: i64,
            dry_run: i64,
        }

        let rows: Vec<ExecutionRow> = sqlx::query_as(
            "SELECT id, job_id, job_name, status, result, started_at, completed_at,
                    duration_ms, dry_run
             FROM scheduled_job_executions
             WHERE job_id = ?1
             ORDER BY started_at DESC LIMIT ?2",
        )
        .bind(job_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let parse_time = |s: &str| {
                    DateTime::parse_from_rfc3339(s)
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|e| DomainError::ValidationFailed(format!("bad timestamp: {e}")))
                };
                Ok(JobExecution {
                    id: Uuid::parse_str(&row.id)
                        .map_err(|e| DomainError::ValidationFailed(format!("bad id: {e}")))?,
                    job_id: Uuid::parse_str(&row.job_id)
                        .map_err(|e| DomainError::ValidationFailed(format!("bad job id: {e}")))?,
                    job_name: row.job_name,
                    status: JobRunStatus::from_str(&row.status).ok_or_else(|| {
                        DomainError::ValidationFailed(format!("bad status '{}'", row.status))
                    })?,
                    result: row.result,
                    started_at: parse_time(&row.started_at)?,
                    completed_at: parse_time(&row.completed_at)?,
                    duration_ms: row.duration_ms,
                    dry_run: row.dry_run != 0,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::connection::DatabaseConnection;
    use serde_json::json;

    async fn repo() -> SqliteJobRepository {
        let db = DatabaseConnection::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        SqliteJobRepository::new(db.pool().clone())
    }

    #[tokio::test]
    async fn mcp_job_round_trips() {
        let repo = repo().await;
        let job = ScheduledJob::new(
            "sync-issues",
            "0 */10 * * * *",
            JobKind::McpTool {
                mcp_server_name: "github".into(),
                tool_name: "list_issues".into(),
                tool_arguments: json!({"repo": "argus"}),
            },
        );
        repo.save(&job).await.unwrap();

        let loaded = repo.find_by_name("sync-issues").await.unwrap().unwrap();
        assert_eq!(loaded.id, job.id);
        match loaded.kind {
            JobKind::McpTool {
                mcp_server_name,
                tool_name,
                tool_arguments,
            } => {
                assert_eq!(mcp_server_name, "github");
                assert_eq!(tool_name, "list_issues");
                assert_eq!(tool_arguments["repo"], "argus");
            }
            JobKind::Agent { .. } => panic!("wrong kind"),
        }
    }

    #[tokio::test]
    async fn run_state_updates_only_run_columns() {
        let repo = repo().await;
        let job = ScheduledJob::new(
            "agent-job",
            "0 0 2 * * *",
            JobKind::Agent {
                agent_prompt: "report".into(),
                persona_id: None,
                agent_system_prompt: None,
                agent_model: None,
                agent_max_tool_calls: None,
            },
        );
        repo.save(&job).await.unwrap();

        let now = Utc::now();
        repo.update_run_state(job.id, JobRunStatus::Success, Some(now), Some("done"))
            .await
            .unwrap();

        let loaded = repo.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.last_status, Some(JobRunStatus::Success));
        assert_eq!(loaded.last_result.as_deref(), Some("done"));
        assert!(loaded.last_run_at.is_some());
        assert_eq!(loaded.cron_expression, "0 0 2 * * *");
    }

    #[tokio::test]
    async fn executions_are_listed_newest_first() {
        let repo = repo().await;
        let job = ScheduledJob::new(
            "hist",
            "0 0 2 * * *",
            JobKind::Agent {
                agent_prompt: "x".into(),
                persona_id: None,
                agent_system_prompt: None,
                agent_model: None,
                agent_max_tool_calls: None,
            },
        );
        repo.save(&job).await.unwrap();

        for i in 0..3 {
            let started = Utc::now() + chrono::Duration::seconds(i);
            repo.record_execution(&JobExecution {
                id: Uuid::new_v4(),
                job_id: job.id,
                job_name: job.name.clone(),
                status: JobRunStatus::Success,
                result: Some(format!("run {i}")),
                started_at: started,
                completed_at: started,
                duration_ms: 10,
                dry_run: i == 2,
            })
            .await
            .unwrap();
        }

        let history = repo.list_executions(job.id, 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].result.as_deref(), Some("run 2"));
        assert!(history[0].dry_run);
    }
}
