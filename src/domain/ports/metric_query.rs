//! Read-side aggregate queries over persisted metrics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{AlertMetric, TenantUsage};

/// Latency distribution snapshot in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyPercentiles {
    pub p50: i64,
    pub p95: i64,
    pub p99: i64,
}

/// Raw baseline aggregates as stored; `None` columns are possible and the
/// baseline calculator coerces them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BaselineStats {
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
    pub sample_count: Option<i64>,
}

/// Aggregate queries consumed by the quota enforcer, SLO calculator, and
/// alert evaluator.
#[async_trait]
pub trait MetricQueryService: Send + Sync {
    /// Fraction of successful agent executions in the window, 0.0..=1.0.
    /// Windows with no requests report 1.0.
    async fn get_success_rate(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<f64>;

    async fn get_latency_percentiles(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<LatencyPercentiles>;

    /// Request/token/cost totals for the current calendar month.
    async fn get_current_month_usage(&self, tenant_id: &str) -> DomainResult<TenantUsage>;

    /// Average cost per hour over the window, in USD.
    async fn get_hourly_cost(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<f64>;

    /// Longest run of consecutive FAILED health observations across the
    /// tenant's MCP servers.
    async fn get_max_consecutive_mcp_failures(&self, tenant_id: &str) -> DomainResult<i64>;

    /// Request counts for error-budget math: (total, failed).
    async fn get_request_counts(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<(i64, i64)>;

    /// Hourly historical aggregates backing baseline-anomaly rules.
    async fn get_baseline_stats(
        &self,
        tenant_id: &str,
        metric: AlertMetric,
    ) -> DomainResult<Option<BaselineStats>>;
}
