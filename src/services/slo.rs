//! SLO math: success rate, error budgets, burn rate, Apdex.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::ports::MetricQueryService;

/// Apdex latency thresholds in milliseconds.
pub const APDEX_SATISFIED_MS: i64 = 5_000;
pub const APDEX_TOLERATING_MS: i64 = 20_000;

/// Error budget snapshot for one tenant and window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorBudget {
    /// Failures the SLO tolerates in the window: `floor((1 - target) * total)`.
    pub budget_total: i64,
    /// Failures observed.
    pub budget_consumed: i64,
    /// Fraction of the budget left, clamped to `0.0..=1.0`.
    pub budget_remaining: f64,
    pub current_availability: f64,
    /// Observed failure rate divided by tolerated failure rate.
    pub burn_rate: f64,
}

/// Latency bucket counts for an Apdex score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApdexBuckets {
    pub satisfied: i64,
    pub tolerating: i64,
    pub frustrated: i64,
}

impl ApdexBuckets {
    /// Classify one request latency into its bucket.
    pub fn record(&mut self, duration_ms: i64) {
        if duration_ms <= APDEX_SATISFIED_MS {
            self.satisfied += 1;
        } else if duration_ms <= APDEX_TOLERATING_MS {
            self.tolerating += 1;
        } else {
            self.frustrated += 1;
        }
    }

    /// `(satisfied + tolerating/2) / total`; 1.0 with no samples.
    #[allow(clippy::cast_precision_loss)]
    pub fn score(&self) -> f64 {
        let total = self.satisfied + self.tolerating + self.frustrated;
        if total == 0 {
            return 1.0;
        }
        (self.satisfied as f64 + self.tolerating as f64 / 2.0) / total as f64
    }
}

/// SLO calculations over the metric query port.
pub struct SloService {
    metrics: Arc<dyn MetricQueryService>,
}

impl SloService {
    pub fn new(metrics: Arc<dyn MetricQueryService>) -> Self {
        Self { metrics }
    }

    pub async fn get_success_rate(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<f64> {
        self.metrics.get_success_rate(tenant_id, from, to).await
    }

    /// Error budget for a tenant against its availability target.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub async fn calculate_error_budget(
        &self,
        tenant_id: &str,
        slo_target: f64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<ErrorBudget> {
        let (total, failed) = self.metrics.get_request_counts(tenant_id, from, to).await?;
        Ok(Self::error_budget_from_counts(total, failed, slo_target))
    }

    /// Pure budget math, exposed for reuse and tests.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn error_budget_from_counts(total: i64, failed: i64, slo_target: f64) -> ErrorBudget {
        if total == 0 {
            return ErrorBudget {
                budget_total: 0,
                budget_consumed: 0,
                budget_remaining: 1.0,
                current_availability: 1.0,
                burn_rate: 0.0,
            };
        }

        let tolerated_rate = 1.0 - slo_target;
        let budget_total = (tolerated_rate * total as f64).floor() as i64;
        let failure_rate = failed as f64 / total as f64;

        let budget_remaining = if budget_total == 0 {
            if failed == 0 {
                1.0
            } else {
                0.0
            }
        } else {
            (1.0 - failed as f64 / budget_total as f64).max(0.0)
        };

        let burn_rate = if tolerated_rate > 0.0 {
            failure_rate / tolerated_rate
        } else {
            0.0
        };

        ErrorBudget {
            budget_total,
            budget_consumed: failed,
            budget_remaining,
            current_availability: 1.0 - failure_rate,
            burn_rate,
        }
    }
}
