//! Alert rule, alert instance, and baseline domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a rule decides whether it is in breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertRuleType {
    StaticThreshold,
    BaselineAnomaly,
    ErrorBudgetBurnRate,
}

impl AlertRuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StaticThreshold => "STATIC_THRESHOLD",
            Self::BaselineAnomaly => "BASELINE_ANOMALY",
            Self::ErrorBudgetBurnRate => "ERROR_BUDGET_BURN_RATE",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "STATIC_THRESHOLD" => Some(Self::StaticThreshold),
            "BASELINE_ANOMALY" => Some(Self::BaselineAnomaly),
            "ERROR_BUDGET_BURN_RATE" => Some(Self::ErrorBudgetBurnRate),
            _ => None,
        }
    }
}

/// The metric a rule evaluates. The enumeration is closed: rules referencing
/// anything else are rejected at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    ErrorRate,
    LatencyP99,
    HourlyCost,
    BurnRate,
    TokenBudgetUsage,
    McpConsecutiveFailures,
    PipelineBufferUsage,
    AggregateRefreshLagMs,
}

impl AlertMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ErrorRate => "error_rate",
            Self::LatencyP99 => "latency_p99",
            Self::HourlyCost => "hourly_cost",
            Self::BurnRate => "burn_rate",
            Self::TokenBudgetUsage => "token_budget_usage",
            Self::McpConsecutiveFailures => "mcp_consecutive_failures",
            Self::PipelineBufferUsage => "pipeline_buffer_usage",
            Self::AggregateRefreshLagMs => "aggregate_refresh_lag_ms",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "error_rate" => Some(Self::ErrorRate),
            "latency_p99" => Some(Self::LatencyP99),
            "hourly_cost" => Some(Self::HourlyCost),
            "burn_rate" => Some(Self::BurnRate),
            "token_budget_usage" => Some(Self::TokenBudgetUsage),
            "mcp_consecutive_failures" => Some(Self::McpConsecutiveFailures),
            "pipeline_buffer_usage" => Some(Self::PipelineBufferUsage),
            "aggregate_refresh_lag_ms" => Some(Self::AggregateRefreshLagMs),
            _ => None,
        }
    }

    /// Platform-wide metrics have no tenant dimension.
    pub fn is_platform(&self) -> bool {
        matches!(self, Self::PipelineBufferUsage | Self::AggregateRefreshLagMs)
    }
}

impl std::fmt::Display for AlertMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity attached to rules and their fired instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "INFO" => Some(Self::Info),
            "WARNING" => Some(Self::Warning),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// An alert rule. `tenant_id = None` makes it a platform rule evaluated once
/// per cycle instead of once per tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: Uuid,
    pub tenant_id: Option<String>,
    pub name: String,
    pub rule_type: AlertRuleType,
    pub metric: AlertMetric,
    pub threshold: f64,
    pub window_minutes: i64,
    pub severity: AlertSeverity,
    pub enabled: bool,
    pub platform_only: bool,
}

impl AlertRule {
    pub fn new(
        name: impl Into<String>,
        rule_type: AlertRuleType,
        metric: AlertMetric,
        threshold: f64,
        window_minutes: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: None,
            name: name.into(),
            rule_type,
            metric,
            threshold,
            window_minutes,
            severity: AlertSeverity::Warning,
            enabled: true,
            platform_only: metric.is_platform(),
        }
    }

    pub fn for_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = severity;
        self
    }
}

/// Status of a fired alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Active,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Resolved => "RESOLVED",
        }
    }
}

/// One firing of a rule. At most one ACTIVE instance exists per rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertInstance {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub tenant_id: Option<String>,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub message: String,
    pub metric_value: f64,
    pub threshold: f64,
    pub fired_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl AlertInstance {
    /// Fire a new active instance for a rule.
    pub fn fire(rule: &AlertRule, metric_value: f64, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            tenant_id: rule.tenant_id.clone(),
            severity: rule.severity,
            status: AlertStatus::Active,
            message: message.into(),
            metric_value,
            threshold: rule.threshold,
            fired_at: Utc::now(),
            resolved_at: None,
        }
    }
}

/// Minimum hourly samples before a baseline is trusted.
pub const BASELINE_MIN_SAMPLES: i64 = 24;

/// Historical distribution of a metric for one tenant, used by
/// baseline-anomaly rules.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub mean: f64,
    pub std_dev: f64,
    pub sample_count: i64,
}

impl Baseline {
    /// A baseline is usable only with at least [`BASELINE_MIN_SAMPLES`]
    /// samples behind it.
    pub fn is_valid(&self) -> bool {
        self.sample_count >= BASELINE_MIN_SAMPLES
    }

    /// Upper bound for anomaly detection at `sigmas` standard deviations.
    pub fn anomaly_ceiling(&self, sigmas: f64) -> f64 {
        self.mean + sigmas * self.std_dev
    }
}
