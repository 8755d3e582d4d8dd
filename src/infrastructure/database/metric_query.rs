//! SQLite aggregate queries over the metric tables.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AlertMetric, TenantUsage};
use crate::domain::ports::metric_query::{BaselineStats, LatencyPercentiles, MetricQueryService};

/// Days of hourly history aggregated for baselines.
const BASELINE_WINDOW_DAYS: i64 = 7;

#[derive(Clone)]
pub struct SqliteMetricQueryService {
    pool: SqlitePool,
}

impl SqliteMetricQueryService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn percentile(
        &self,
        tenant_id: &str,
        from: &str,
        to: &str,
        total: i64,
        fraction: f64,
    ) -> DomainResult<i64> {
        if total == 0 {
            return Ok(0);
        }
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let offset = (((total - 1) as f64) * fraction).round() as i64;
        let value: Option<i64> = sqlx::query_scalar(
            "SELECT duration_ms FROM metric_agent_executions
             WHERE tenant_id = ?1 AND time >= ?2 AND time < ?3
             ORDER BY duration_ms LIMIT 1 OFFSET ?4",
        )
        .bind(tenant_id)
        .bind(from)
        .bind(to)
        .bind(offset)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value.unwrap_or(0))
    }

    /// Hourly sample series for baseline aggregation. Each row is one hour's
    /// value of the metric.
    async fn hourly_samples(
        &self,
        tenant_id: &str,
        metric: AlertMetric,
    ) -> DomainResult<Option<Vec<f64>>> {
        let since = (Utc::now() - chrono::Duration::days(BASELINE_WINDOW_DAYS)).to_rfc3339();

        let samples: Option<Vec<f64>> = match metric {
            AlertMetric::ErrorRate => {
                let rows: Vec<(i64, i64)> = sqlx::query_as(
                    "SELECT COUNT(*), SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END)
                     FROM metric_agent_executions
                     WHERE tenant_id = ?1 AND time >= ?2
                     GROUP BY strftime('%Y-%m-%dT%H', time)",
                )
                .bind(tenant_id)
                .bind(&since)
                .fetch_all(&self.pool)
                .await?;
                #[allow(clippy::cast_precision_loss)]
                let rates: Vec<f64> = rows
                    .into_iter()
                    .filter(|(total, _)| *total > 0)
                    .map(|(total, failed)| failed as f64 / total as f64)
                    .collect();
                Some(rates)
            }
            AlertMetric::LatencyP99 => {
                let rows: Vec<(f64,)> = sqlx::query_as(
                    "SELECT AVG(duration_ms)
                     FROM metric_agent_executions
                     WHERE tenant_id = ?1 AND time >= ?2
                     GROUP BY strftime('%Y-%m-%dT%H', time)",
                )
                .bind(tenant_id)
                .bind(&since)
                .fetch_all(&self.pool)
                .await?;
                Some(rows.into_iter().map(|(avg,)| avg).collect())
            }
            AlertMetric::HourlyCost => {
                let rows: Vec<(f64,)> = sqlx::query_as(
                    "SELECT SUM(estimated_cost_usd)
                     FROM metric_token_usage
                     WHERE tenant_id = ?1 AND time >= ?2
                     GROUP BY strftime('%Y-%m-%dT%H', time)",
                )
                .bind(tenant_id)
                .bind(&since)
                .fetch_all(&self.pool)
                .await?;
                Some(rows.into_iter().map(|(sum,)| sum).collect())
            }
            // Baselines are defined only for the continuous tenant metrics.
            _ => None,
        };
        Ok(samples)
    }

    fn month_start() -> DateTime<Utc> {
        let now = Utc::now();
        Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .single()
            .unwrap_or(now)
    }
}

#[async_trait]
impl MetricQueryService for SqliteMetricQueryService {
    async fn get_success_rate(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<f64> {
        let (total, successful): (i64, Option<i64>) = sqlx::query_as(
            "SELECT COUNT(*), SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END)
             FROM metric_agent_executions
             WHERE tenant_id = ?1 AND time >= ?2 AND time < ?3",
        )
        .bind(tenant_id)
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        if total == 0 {
            return Ok(1.0);
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = successful.unwrap_or(0) as f64 / total as f64;
        Ok(rate)
    }

    async fn get_latency_percentiles(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<LatencyPercentiles> {
        let from = from.to_rfc3339();
        let to = to.to_rfc3339();
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM metric_agent_executions
             WHERE tenant_id = ?1 AND time >= ?2 AND time < ?3",
        )
        .bind(tenant_id)
        .bind(&from)
        .bind(&to)
        .fetch_one(&self.pool)
        .await?;

        Ok(LatencyPercentiles {
            p50: self.percentile(tenant_id, &from, &to, total, 0.50).await?,
            p95: self.percentile(tenant_id, &from, &to, total, 0.95).await?,
            p99: self.percentile(tenant_id, &from, &to, total, 0.99).await?,
        })
    }

    async fn get_current_month_usage(&self, tenant_id: &str) -> DomainResult<TenantUsage> {
        let month_start = Self::month_start().to_rfc3339();

        let requests: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM metric_agent_executions
             WHERE tenant_id = ?1 AND time >= ?2",
        )
        .bind(tenant_id)
        .bind(&month_start)
        .fetch_one(&self.pool)
        .await?;

        let (tokens, cost_usd): (Option<i64>, Option<f64>) = sqlx::query_as(
            "SELECT SUM(total_tokens), SUM(estimated_cost_usd)
             FROM metric_token_usage
             WHERE tenant_id = ?1 AND time >= ?2",
        )
        .bind(tenant_id)
        .bind(&month_start)
        .fetch_one(&self.pool)
        .await?;

        Ok(TenantUsage {
            requests,
            tokens: tokens.unwrap_or(0),
            cost_usd: cost_usd.unwrap_or(0.0),
        })
    }

    async fn get_hourly_cost(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<f64> {
        let total: Option<f64> = sqlx::query_scalar(
            "SELECT SUM(estimated_cost_usd) FROM metric_token_usage
             WHERE tenant_id = ?1 AND time >= ?2 AND time < ?3",
        )
        .bind(tenant_id)
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        let hours = ((to - from).num_minutes() as f64 / 60.0).max(1.0 / 60.0);
        Ok(total.unwrap_or(0.0) / hours)
    }

    async fn get_max_consecutive_mcp_failures(&self, tenant_id: &str) -> DomainResult<i64> {
        let statuses: Vec<(String,)> = sqlx::query_as(
            "SELECT status FROM metric_mcp_health
             WHERE tenant_id = ?1
             ORDER BY time DESC LIMIT 1000",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        let mut max_run: i64 = 0;
        let mut run: i64 = 0;
        for (status,) in statuses {
            if status == "FAILED" {
                run += 1;
                max_run = max_run.max(run);
            } else {
                run = 0;
            }
        }
        Ok(max_run)
    }

    async fn get_request_counts(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<(i64, i64)> {
        let (total, failed): (i64, Option<i64>) = sqlx::query_as(
            "SELECT COUNT(*), SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END)
             FROM metric_agent_executions
             WHERE tenant_id = ?1 AND time >= ?2 AND time < ?3",
        )
        .bind(tenant_id)
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;
        Ok((total, failed.unwrap_or(0)))
    }

    async fn get_baseline_stats(
        &self,
        tenant_id: &str,
        metric: AlertMetric,
    ) -> DomainResult<Option<BaselineStats>> {
        let Some(samples) = self.hourly_samples(tenant_id, metric).await? else {
            return Ok(None);
        };
        if samples.is_empty() {
            return Ok(Some(BaselineStats {
                mean: None,
                std_dev: None,
                sample_count: Some(0),
            }));
        }

        #[allow(clippy::cast_precision_loss)]
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        #[allow(clippy::cast_possible_wrap)]
        let sample_count = samples.len() as i64;

        Ok(Some(BaselineStats {
            mean: Some(mean),
            std_dev: Some(variance.sqrt()),
            sample_count: Some(sample_count),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        AgentExecutionEvent, MetricEvent, MetricPayload, TokenUsageEvent,
    };
    use crate::domain::ports::MetricStore;
    use crate::infrastructure::database::connection::DatabaseConnection;
    use crate::infrastructure::database::metric_store::SqliteMetricStore;

    async fn setup() -> (SqliteMetricQueryService, SqliteMetricStore) {
        let db = DatabaseConnection::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        (
            SqliteMetricQueryService::new(db.pool().clone()),
            SqliteMetricStore::new(db.pool().clone()),
        )
    }

    fn execution(success: bool, duration_ms: i64) -> MetricEvent {
        let mut event = MetricEvent::for_tenant(
            "t1",
            MetricPayload::AgentExecution(AgentExecutionEvent {
                run_id: "r".into(),
                user_id: "u".into(),
                success,
                duration_ms,
                ..AgentExecutionEvent::default()
            }),
        );
        event.stamp(Utc::now());
        event
    }

    fn tokens(total: i64, cost: f64) -> MetricEvent {
        let mut event = MetricEvent::for_tenant(
            "t1",
            MetricPayload::TokenUsage(TokenUsageEvent {
                run_id: "r".into(),
                model: "m".into(),
                provider: "p".into(),
                total_tokens: total,
                estimated_cost_usd: cost,
                ..TokenUsageEvent::default()
            }),
        );
        event.stamp(Utc::now());
        event
    }

    #[tokio::test]
    async fn success_rate_over_window() {
        let (queries, store) = setup().await;
        store
            .batch_insert(vec![
                execution(true, 100),
                execution(true, 200),
                execution(false, 300),
                execution(true, 400),
            ])
            .await
            .unwrap();

        let from = Utc::now() - chrono::Duration::minutes(5);
        let to = Utc::now() + chrono::Duration::minutes(5);
        let rate = queries.get_success_rate("t1", from, to).await.unwrap();
        assert!((rate - 0.75).abs() < 1e-9);

        // Empty windows report full availability.
        let empty = queries
            .get_success_rate("nobody", from, to)
            .await
            .unwrap();
        assert!((empty - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn latency_percentiles_are_ordered() {
        let (queries, store) = setup().await;
        let events: Vec<MetricEvent> = (1..=100).map(|i| execution(true, i * 10)).collect();
        store.batch_insert(events).await.unwrap();

        let from = Utc::now() - chrono::Duration::minutes(5);
        let to = Utc::now() + chrono::Duration::minutes(5);
        let p = queries
            .get_latency_percentiles("t1", from, to)
            .await
            .unwrap();
        assert!(p.p50 <= p.p95 && p.p95 <= p.p99);
        assert_eq!(p.p99, 990);
    }

    #[tokio::test]
    async fn month_usage_sums_requests_and_tokens() {
        let (queries, store) = setup().await;
        store
            .batch_insert(vec![
                execution(true, 100),
                execution(false, 100),
                tokens(1_000, 0.25),
                tokens(2_000, 0.50),
            ])
            .await
            .unwrap();

        let usage = queries.get_current_month_usage("t1").await.unwrap();
        assert_eq!(usage.requests, 2);
        assert_eq!(usage.tokens, 3_000);
        assert!((usage.cost_usd - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn consecutive_mcp_failures() {
        let (queries, store) = setup().await;
        let base = Utc::now();
        let statuses = ["CONNECTED", "FAILED", "FAILED", "FAILED", "CONNECTED", "FAILED"];
        let mut events = Vec::new();
        for (i, status) in statuses.iter().enumerate() {
            let mut event = MetricEvent::for_tenant(
                "t1",
                MetricPayload::McpHealth(crate::domain::models::McpHealthEvent {
                    server_name: "github".into(),
                    status: (*status).into(),
                    response_time_ms: 5,
                    error_class: None,
                    error_message: None,
                    tool_count: 1,
                }),
            );
            event.stamp(base + chrono::Duration::seconds(i as i64));
            events.push(event);
        }
        store.batch_insert(events).await.unwrap();

        let max = queries
            .get_max_consecutive_mcp_failures("t1")
            .await
            .unwrap();
        assert_eq!(max, 3);
    }
}
