//! SQLite metric store: grouped multi-row inserts, one statement per event
//! type.
//!
//! This is the truncation boundary: `error_message`, `reason_detail` and
//! `failure_detail` are cut to 500 characters before binding. Rows are
//! append-only and never mutated after insert.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::BTreeMap;

use crate::domain::errors::DomainResult;
use crate::domain::models::metric_event::truncate_chars;
use crate::domain::models::{
    AgentExecutionEvent, EvalResultEvent, GuardEvent, McpHealthEvent, MetricEvent, MetricKind,
    MetricPayload, QuotaEvent, SessionEvent, TokenUsageEvent, ToolCallEvent, MAX_MESSAGE_CHARS,
};
use crate::domain::ports::MetricStore;

#[derive(Clone)]
pub struct SqliteMetricStore {
    pool: SqlitePool,
}

impl SqliteMetricStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn truncated(value: &Option<String>) -> Option<String> {
        value
            .as_ref()
            .map(|text| truncate_chars(text, MAX_MESSAGE_CHARS))
    }

    fn event_time(event: &MetricEvent) -> String {
        event.time.unwrap_or_else(Utc::now).to_rfc3339()
    }

    async fn insert_agent_executions(
        &self,
        rows: Vec<(String, String, AgentExecutionEvent)>,
    ) -> DomainResult<()> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO metric_agent_executions (time, tenant_id, run_id, user_id, session_id, \
             channel, success, error_code, duration_ms, llm_duration_ms, tool_duration_ms, \
             guard_duration_ms, queue_wait_ms, tool_count, persona_id, prompt_template_id, \
             intent_category, guard_rejected, guard_stage, guard_category, fallback_used, \
             retry_count) ",
        );
        builder.push_values(rows, |mut b, (time, tenant_id, e)| {
            b.push_bind(time)
                .push_bind(tenant_id)
                .push_bind(e.run_id)
                .push_bind(e.user_id)
                .push_bind(e.session_id)
                .push_bind(e.channel)
                .push_bind(e.success)
                .push_bind(e.error_code)
                .push_bind(e.duration_ms)
                .push_bind(e.llm_duration_ms)
                .push_bind(e.tool_duration_ms)
                .push_bind(e.guard_duration_ms)
                .push_bind(e.queue_wait_ms)
                .push_bind(e.tool_count)
                .push_bind(e.persona_id)
                .push_bind(e.prompt_template_id)
                .push_bind(e.intent_category)
                .push_bind(e.guard_rejected)
                .push_bind(e.guard_stage)
                .push_bind(e.guard_category)
                .push_bind(e.fallback_used)
                .push_bind(e.retry_count);
        });
        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_tool_calls(
        &self,
        rows: Vec<(String, String, ToolCallEvent)>,
    ) -> DomainResult<()> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO metric_tool_calls (time, tenant_id, run_id, tool_name, tool_source, \
             mcp_server_name, call_index, success, duration_ms, error_class, error_message) ",
        );
        builder.push_values(rows, |mut b, (time, tenant_id, e)| {
            let error_message = Self::truncated(&e.error_message);
            b.push_bind(time)
                .push_bind(tenant_id)
                .push_bind(e.run_id)
                .push_bind(e.tool_name)
                .push_bind(e.tool_source.as_str())
                .push_bind(e.mcp_server_name)
                .push_bind(e.call_index)
                .push_bind(e.success)
                .push_bind(e.duration_ms)
                .push_bind(e.error_class)
                .push_bind(error_message);
        });
        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_token_usage(
        &self,
        rows: Vec<(String, String, TokenUsageEvent)>,
    ) -> DomainResult<()> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO metric_token_usage (time, tenant_id, run_id, model, provider, step_type, \
             prompt_tokens, completion_tokens, reasoning_tokens, total_tokens, estimated_cost_usd) ",
        );
        builder.push_values(rows, |mut b, (time, tenant_id, e)| {
            b.push_bind(time)
                .push_bind(tenant_id)
                .push_bind(e.run_id)
                .push_bind(e.model)
                .push_bind(e.provider)
                .push_bind(e.step_type)
                .push_bind(e.prompt_tokens)
                .push_bind(e.completion_tokens)
                .push_bind(e.reasoning_tokens)
                .push_bind(e.total_tokens)
                .push_bind(e.estimated_cost_usd);
        });
        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_sessions(&self, rows: Vec<(String, String, SessionEvent)>) -> DomainResult<()> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO metric_sessions (time, tenant_id, session_id, user_id, channel, \
             turn_count, total_duration_ms, total_tokens, total_cost_usd, started_at, ended_at, \
             outcome) ",
        );
        builder.push_values(rows, |mut b, (time, tenant_id, e)| {
            b.push_bind(time)
                .push_bind(tenant_id)
                .push_bind(e.session_id)
                .push_bind(e.user_id)
                .push_bind(e.channel)
                .push_bind(e.turn_count)
                .push_bind(e.total_duration_ms)
                .push_bind(e.total_tokens)
                .push_bind(e.total_cost_usd)
                .push_bind(e.started_at.to_rfc3339())
                .push_bind(e.ended_at.to_rfc3339())
                .push_bind(e.outcome);
        });
        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_guard_events(
        &self,
        rows: Vec<(String, String, GuardEvent)>,
    ) -> DomainResult<()> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO metric_guard_events (time, tenant_id, user_id, channel, stage, category, \
             reason_class, reason_detail, is_output_guard, action) ",
        );
        builder.push_values(rows, |mut b, (time, tenant_id, e)| {
            let reason_detail = Self::truncated(&e.reason_detail);
            b.push_bind(time)
                .push_bind(tenant_id)
                .push_bind(e.user_id)
                .push_bind(e.channel)
                .push_bind(e.stage)
                .push_bind(e.category)
                .push_bind(e.reason_class)
                .push_bind(reason_detail)
                .push_bind(e.is_output_guard)
                .push_bind(e.action.as_str());
        });
        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_mcp_health(
        &self,
        rows: Vec<(String, String, McpHealthEvent)>,
    ) -> DomainResult<()> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO metric_mcp_health (time, tenant_id, server_name, status, \
             response_time_ms, error_class, error_message, tool_count) ",
        );
        builder.push_values(rows, |mut b, (time, tenant_id, e)| {
            let error_message = Self::truncated(&e.error_message);
            b.push_bind(time)
                .push_bind(tenant_id)
                .push_bind(e.server_name)
                .push_bind(e.status)
                .push_bind(e.response_time_ms)
                .push_bind(e.error_class)
                .push_bind(error_message)
                .push_bind(e.tool_count);
        });
        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_quota_events(
        &self,
        rows: Vec<(String, String, QuotaEvent)>,
    ) -> DomainResult<()> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO metric_quota_events (time, tenant_id, action, current_usage, \
             quota_limit, reason) ",
        );
        builder.push_values(rows, |mut b, (time, tenant_id, e)| {
            b.push_bind(time)
                .push_bind(tenant_id)
                .push_bind(e.action.as_str())
                .push_bind(e.current_usage)
                .push_bind(e.quota_limit)
                .push_bind(e.reason);
        });
        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_eval_results(
        &self,
        rows: Vec<(String, String, EvalResultEvent)>,
    ) -> DomainResult<()> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO metric_eval_results (time, tenant_id, eval_run_id, test_case_id, pass, \
             score, latency_ms, token_usage, cost, assertion_type, failure_class, failure_detail, \
             tags) ",
        );
        builder.push_values(rows, |mut b, (time, tenant_id, e)| {
            let failure_detail = Self::truncated(&e.failure_detail);
            let tags = serde_json::to_string(&e.tags).unwrap_or_else(|_| "[]".to_string());
            b.push_bind(time)
                .push_bind(tenant_id)
                .push_bind(e.eval_run_id)
                .push_bind(e.test_case_id)
                .push_bind(e.pass)
                .push_bind(e.score)
                .push_bind(e.latency_ms)
                .push_bind(e.token_usage)
                .push_bind(e.cost)
                .push_bind(e.assertion_type)
                .push_bind(e.failure_class)
                .push_bind(failure_detail)
                .push_bind(tags);
        });
        builder.build().execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl MetricStore for SqliteMetricStore {
    async fn batch_insert(&self, events: Vec<MetricEvent>) -> DomainResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        // Partition by type so each group is one multi-row statement.
        let mut groups: BTreeMap<MetricKind, Vec<MetricEvent>> = BTreeMap::new();
        for event in events {
            groups.entry(event.kind()).or_default().push(event);
        }

        for (kind, group) in groups {
            let rows: Vec<(String, String, MetricPayload)> = group
                .into_iter()
                .map(|event| {
                    let time = Self::event_time(&event);
                    (time, event.tenant_id, event.payload)
                })
                .collect();

            match kind {
                MetricKind::AgentExecution => {
                    self.insert_agent_executions(unwrap_rows(rows, |p| match p {
                        MetricPayload::AgentExecution(e) => Some(e),
                        _ => None,
                    }))
                    .await?;
                }
                MetricKind::ToolCall => {
                    self.insert_tool_calls(unwrap_rows(rows, |p| match p {
                        MetricPayload::ToolCall(e) => Some(e),
                        _ => None,
                    }))
                    .await?;
                }
                MetricKind::TokenUsage => {
                    self.insert_token_usage(unwrap_rows(rows, |p| match p {
                        MetricPayload::TokenUsage(e) => Some(e),
                        _ => None,
                    }))
                    .await?;
                }
                MetricKind::Session => {
                    self.insert_sessions(unwrap_rows(rows, |p| match p {
                        MetricPayload::Session(e) => Some(e),
                        _ => None,
                    }))
                    .await?;
                }
                MetricKind::Guard => {
                    self.insert_guard_events(unwrap_rows(rows, |p| match p {
                        MetricPayload::Guard(e) => Some(e),
                        _ => None,
                    }))
                    .await?;
                }
                MetricKind::McpHealth => {
                    self.insert_mcp_health(unwrap_rows(rows, |p| match p {
                        MetricPayload::McpHealth(e) => Some(e),
                        _ => None,
                    }))
                    .await?;
                }
                MetricKind::Quota => {
                    self.insert_quota_events(unwrap_rows(rows, |p| match p {
                        MetricPayload::Quota(e) => Some(e),
                        _ => None,
                    }))
                    .await?;
                }
                MetricKind::EvalResult => {
                    self.insert_eval_results(unwrap_rows(rows, |p| match p {
                        MetricPayload::EvalResult(e) => Some(e),
                        _ => None,
                    }))
                    .await?;
                }
            }
        }
        Ok(())
    }
}

/// Project `(time, tenant, payload)` rows onto a concrete event type. A
/// mismatched payload in a partition would be a programming error upstream;
/// such rows are dropped rather than corrupting the batch.
fn unwrap_rows<T>(
    rows: Vec<(String, String, MetricPayload)>,
    project: impl Fn(MetricPayload) -> Option<T>,
) -> Vec<(String, String, T)> {
    rows.into_iter()
        .filter_map(|(time, tenant, payload)| project(payload).map(|e| (time, tenant, e)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{GuardAction, QuotaAction, ToolSource};
    use crate::infrastructure::database::connection::DatabaseConnection;

    async fn store() -> (SqliteMetricStore, SqlitePool) {
        let db = DatabaseConnection::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        (SqliteMetricStore::new(db.pool().clone()), db.pool().clone())
    }

    fn tool_call(message: Option<String>) -> MetricEvent {
        MetricEvent::for_tenant(
            "t1",
            MetricPayload::ToolCall(ToolCallEvent {
                run_id: "run-1".into(),
                tool_name: "search".into(),
                tool_source: ToolSource::Mcp,
                mcp_server_name: Some("github".into()),
                call_index: 0,
                success: false,
                duration_ms: 42,
                error_class: Some("Timeout".into()),
                error_message: message,
            }),
        )
    }

    #[tokio::test]
    async fn mixed_batch_lands_in_per_type_tables() {
        let (store, pool) = store().await;

        let events = vec![
            tool_call(None),
            MetricEvent::for_tenant(
                "t1",
                MetricPayload::Quota(QuotaEvent {
                    action: QuotaAction::Warning,
                    current_usage: 9,
                    quota_limit: 10,
                    reason: "90% quota used".into(),
                }),
            ),
            MetricEvent::for_tenant(
                "t1",
                MetricPayload::Guard(GuardEvent {
                    user_id: None,
                    channel: None,
                    stage: "all".into(),
                    category: "none".into(),
                    reason_class: None,
                    reason_detail: None,
                    is_output_guard: false,
                    action: GuardAction::Allowed,
                }),
            ),
        ];
        store.batch_insert(events).await.unwrap();

        let tool_calls: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM metric_tool_calls")
            .fetch_one(&pool)
            .await
            .unwrap();
        let quota: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM metric_quota_events")
            .fetch_one(&pool)
            .await
            .unwrap();
        let guards: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM metric_guard_events")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!((tool_calls, quota, guards), (1, 1, 1));
    }

    #[tokio::test]
    async fn long_error_messages_are_truncated_at_the_boundary() {
        let (store, pool) = store().await;
        store
            .batch_insert(vec![tool_call(Some("e".repeat(2000)))])
            .await
            .unwrap();

        let message: String =
            sqlx::query_scalar("SELECT error_message FROM metric_tool_calls LIMIT 1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(message.chars().count(), MAX_MESSAGE_CHARS);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let (store, _) = store().await;
        store.batch_insert(Vec::new()).await.unwrap();
    }

    #[tokio::test]
    async fn batch_of_many_rows_is_one_statement() {
        let (store, pool) = store().await;
        let events: Vec<MetricEvent> = (0..500).map(|_| tool_call(None)).collect();
        store.batch_insert(events).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM metric_tool_calls")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 500);
    }
}
