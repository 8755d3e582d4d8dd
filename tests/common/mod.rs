//! Shared fixtures for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;

use argus::domain::errors::{DomainError, DomainResult};
use argus::domain::models::{AlertMetric, TenantUsage};
use argus::domain::ports::metric_query::{BaselineStats, LatencyPercentiles};
use argus::domain::ports::MetricQueryService;

/// Scriptable metric query stub. Every field can be swapped at runtime so a
/// test can move the world between evaluation cycles.
pub struct StubMetrics {
    pub success_rate: Mutex<f64>,
    pub usage: Mutex<DomainResult<TenantUsage>>,
    pub percentiles: Mutex<LatencyPercentiles>,
    pub baseline: Mutex<Option<BaselineStats>>,
}

impl StubMetrics {
    pub fn new() -> Self {
        Self {
            success_rate: Mutex::new(1.0),
            usage: Mutex::new(Ok(TenantUsage::default())),
            percentiles: Mutex::new(LatencyPercentiles::default()),
            baseline: Mutex::new(None),
        }
    }

    pub fn with_usage(requests: i64, tokens: i64) -> Self {
        let stub = Self::new();
        *stub.usage.lock().unwrap() = Ok(TenantUsage {
            requests,
            tokens,
            cost_usd: 0.0,
        });
        stub
    }

    pub fn with_failing_usage() -> Self {
        let stub = Self::new();
        *stub.usage.lock().unwrap() = Err(DomainError::DatabaseError("db down".into()));
        stub
    }

    pub fn set_success_rate(&self, rate: f64) {
        *self.success_rate.lock().unwrap() = rate;
    }
}

impl Default for StubMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricQueryService for StubMetrics {
    async fn get_success_rate(
        &self,
        _tenant_id: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> DomainResult<f64> {
        Ok(*self.success_rate.lock().unwrap())
    }

    async fn get_latency_percentiles(
        &self,
        _tenant_id: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> DomainResult<LatencyPercentiles> {
        Ok(*self.percentiles.lock().unwrap())
    }

    async fn get_current_month_usage(&self, _tenant_id: &str) -> DomainResult<TenantUsage> {
        match &*self.usage.lock().unwrap() {
            Ok(usage) => Ok(*usage),
            Err(_) => Err(DomainError::DatabaseError("db down".into())),
        }
    }

    async fn get_hourly_cost(
        &self,
        _tenant_id: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> DomainResult<f64> {
        Ok(0.0)
    }

    async fn get_max_consecutive_mcp_failures(&self, _tenant_id: &str) -> DomainResult<i64> {
        Ok(0)
    }

    async fn get_request_counts(
        &self,
        _tenant_id: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> DomainResult<(i64, i64)> {
        let rate = *self.success_rate.lock().unwrap();
        let total = 1000i64;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let failed = ((1.0 - rate) * 1000.0).round() as i64;
        Ok((total, failed))
    }

    async fn get_baseline_stats(
        &self,
        _tenant_id: &str,
        _metric: AlertMetric,
    ) -> DomainResult<Option<BaselineStats>> {
        Ok(*self.baseline.lock().unwrap())
    }
}
