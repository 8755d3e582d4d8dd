//! Tenant domain model.

use serde::{Deserialize, Serialize};

/// Subscription plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenantPlan {
    Starter,
    Business,
    Enterprise,
}

impl TenantPlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starter => "STARTER",
            Self::Business => "BUSINESS",
            Self::Enterprise => "ENTERPRISE",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "STARTER" => Some(Self::Starter),
            "BUSINESS" => Some(Self::Business),
            "ENTERPRISE" => Some(Self::Enterprise),
            _ => None,
        }
    }
}

/// Lifecycle status of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenantStatus {
    Active,
    Suspended,
    Deactivated,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Suspended => "SUSPENDED",
            Self::Deactivated => "DEACTIVATED",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(Self::Active),
            "SUSPENDED" => Some(Self::Suspended),
            "DEACTIVATED" => Some(Self::Deactivated),
            _ => None,
        }
    }
}

/// Per-tenant resource ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantQuota {
    pub max_requests_per_month: i64,
    pub max_tokens_per_month: i64,
    pub max_users: i32,
    pub max_agents: i32,
    pub max_mcp_servers: i32,
}

impl Default for TenantQuota {
    fn default() -> Self {
        Self {
            max_requests_per_month: 10_000,
            max_tokens_per_month: 10_000_000,
            max_users: 25,
            max_agents: 5,
            max_mcp_servers: 5,
        }
    }
}

/// A tenant of the platform. Owned by the tenant store; mutated only through
/// `save`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub plan: TenantPlan,
    pub status: TenantStatus,
    pub quota: TenantQuota,
    pub slo_availability: f64,
    pub slo_latency_p99_ms: i64,
}

impl Tenant {
    /// New active tenant on the starter plan with default quotas and SLOs.
    pub fn new(id: impl Into<String>, name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            slug: slug.into(),
            plan: TenantPlan::Starter,
            status: TenantStatus::Active,
            quota: TenantQuota::default(),
            slo_availability: 0.995,
            slo_latency_p99_ms: 10_000,
        }
    }
}

/// Aggregated usage for the current calendar month.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantUsage {
    pub requests: i64,
    pub tokens: i64,
    pub cost_usd: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [
            TenantStatus::Active,
            TenantStatus::Suspended,
            TenantStatus::Deactivated,
        ] {
            assert_eq!(TenantStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(TenantStatus::from_str("unknown"), None);
    }

    #[test]
    fn new_tenant_defaults() {
        let t = Tenant::new("t1", "Acme", "acme");
        assert_eq!(t.status, TenantStatus::Active);
        assert_eq!(t.plan, TenantPlan::Starter);
        assert!((t.slo_availability - 0.995).abs() < f64::EPSILON);
    }
}
