//! Baseline calculator with per-(tenant, metric) TTL caching.
//!
//! Baseline-anomaly rules compare a current value against the historical
//! distribution of the same metric. The underlying aggregation query is
//! expensive, so results are cached per key for a configurable TTL. A
//! baseline with fewer than 24 samples is treated as unavailable.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AlertMetric, Baseline, BASELINE_MIN_SAMPLES};
use crate::domain::ports::MetricQueryService;

#[derive(Debug, Clone, Copy)]
struct CachedBaseline {
    baseline: Option<Baseline>,
    fetched_at: DateTime<Utc>,
}

pub struct BaselineCalculator {
    metrics: Arc<dyn MetricQueryService>,
    cache: DashMap<(String, AlertMetric), CachedBaseline>,
    ttl: Duration,
}

impl BaselineCalculator {
    pub fn new(metrics: Arc<dyn MetricQueryService>, ttl_seconds: u64) -> Self {
        Self {
            metrics,
            cache: DashMap::new(),
            ttl: Duration::seconds(ttl_seconds.min(i64::MAX as u64) as i64),
        }
    }

    /// The baseline for `(tenant_id, metric)`, or `None` when history is too
    /// thin (`sample_count < 24`). Null columns from the store are coerced:
    /// missing mean/std-dev become 0.0, a missing sample count makes the
    /// baseline unavailable.
    pub async fn get_baseline(
        &self,
        tenant_id: &str,
        metric: AlertMetric,
    ) -> DomainResult<Option<Baseline>> {
        let key = (tenant_id.to_string(), metric);
        if let Some(cached) = self.cache.get(&key) {
            if Utc::now() - cached.fetched_at < self.ttl {
                return Ok(cached.baseline);
            }
        }

        let stats = self.metrics.get_baseline_stats(tenant_id, metric).await?;
        let baseline = stats.and_then(|stats| {
            let sample_count = stats.sample_count?;
            let baseline = Baseline {
                mean: stats.mean.unwrap_or(0.0),
                std_dev: stats.std_dev.unwrap_or(0.0),
                sample_count,
            };
            baseline.is_valid().then_some(baseline)
        });

        self.cache.insert(
            key,
            CachedBaseline {
                baseline,
                fetched_at: Utc::now(),
            },
        );
        Ok(baseline)
    }

    /// Drop all cached entries (used by tests and admin surfaces).
    pub fn invalidate(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::DomainError;
    use crate::domain::models::TenantUsage;
    use crate::domain::ports::metric_query::{BaselineStats, LatencyPercentiles};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingQueries {
        stats: Option<BaselineStats>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MetricQueryService for CountingQueries {
        async fn get_success_rate(
            &self,
            _: &str,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
        ) -> DomainResult<f64> {
            Ok(1.0)
        }
        async fn get_latency_percentiles(
            &self,
            _: &str,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
        ) -> DomainResult<LatencyPercentiles> {
            Ok(LatencyPercentiles::default())
        }
        async fn get_current_month_usage(&self, _: &str) -> DomainResult<TenantUsage> {
            Err(DomainError::DatabaseError("unused".into()))
        }
        async fn get_hourly_cost(
            &self,
            _: &str,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
        ) -> DomainResult<f64> {
            Ok(0.0)
        }
        async fn get_max_consecutive_mcp_failures(&self, _: &str) -> DomainResult<i64> {
            Ok(0)
        }
        async fn get_request_counts(
            &self,
            _: &str,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
        ) -> DomainResult<(i64, i64)> {
            Ok((0, 0))
        }
        async fn get_baseline_stats(
            &self,
            _: &str,
            _: AlertMetric,
        ) -> DomainResult<Option<BaselineStats>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.stats)
        }
    }

    fn calculator(stats: Option<BaselineStats>) -> (BaselineCalculator, Arc<CountingQueries>) {
        let queries = Arc::new(CountingQueries {
            stats,
            calls: AtomicUsize::new(0),
        });
        (BaselineCalculator::new(queries.clone(), 3600), queries)
    }

    #[tokio::test]
    async fn valid_baseline_returned_and_cached() {
        let (calc, queries) = calculator(Some(BaselineStats {
            mean: Some(10.0),
            std_dev: Some(2.0),
            sample_count: Some(48),
        }));

        let first = calc.get_baseline("t1", AlertMetric::ErrorRate).await.unwrap();
        let second = calc.get_baseline("t1", AlertMetric::ErrorRate).await.unwrap();
        assert_eq!(first, second);
        assert!(first.unwrap().is_valid());
        assert_eq!(queries.calls.load(Ordering::SeqCst), 1, "second call cached");
    }

    #[tokio::test]
    async fn thin_history_is_unavailable() {
        let (calc, _) = calculator(Some(BaselineStats {
            mean: Some(10.0),
            std_dev: Some(2.0),
            sample_count: Some(BASELINE_MIN_SAMPLES - 1),
        }));
        assert!(calc
            .get_baseline("t1", AlertMetric::ErrorRate)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn null_sample_count_is_unavailable() {
        let (calc, _) = calculator(Some(BaselineStats {
            mean: Some(10.0),
            std_dev: Some(2.0),
            sample_count: None,
        }));
        assert!(calc
            .get_baseline("t1", AlertMetric::ErrorRate)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn null_moments_coerce_to_zero() {
        let (calc, _) = calculator(Some(BaselineStats {
            mean: None,
            std_dev: None,
            sample_count: Some(100),
        }));
        let baseline = calc
            .get_baseline("t1", AlertMetric::LatencyP99)
            .await
            .unwrap()
            .unwrap();
        assert!((baseline.mean - 0.0).abs() < f64::EPSILON);
        assert!((baseline.std_dev - 0.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn cache_keys_are_per_metric() {
        let (calc, queries) = calculator(Some(BaselineStats {
            mean: Some(1.0),
            std_dev: Some(1.0),
            sample_count: Some(50),
        }));
        calc.get_baseline("t1", AlertMetric::ErrorRate).await.unwrap();
        calc.get_baseline("t1", AlertMetric::LatencyP99).await.unwrap();
        assert_eq!(queries.calls.load(Ordering::SeqCst), 2);
    }
}
