//! Hot-path quota enforcement.
//!
//! Runs as the `BeforeAgentStart` hook at order 5. The fast path is a local
//! per-tenant request counter: until a tenant approaches 90% of its monthly
//! request quota, no database is touched. Past that, monthly usage is fetched
//! through a circuit breaker; infrastructure faults fail open, policy faults
//! (suspension, exhausted quota) fail closed. A 90% warning is emitted at
//! most once per tenant per calendar month.

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::domain::errors::{DomainResult, ErrorCode};
use crate::domain::models::hook::{meta_keys, HookContext, HookKind, HookResult, LifecycleHook};
use crate::domain::models::{
    MetricEvent, MetricPayload, QuotaAction, QuotaEvent, Tenant, TenantStatus, DEFAULT_TENANT,
};
use crate::domain::ports::MetricQueryService;
use crate::domain::ports::TenantStore;
use crate::services::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::services::metric_pipeline::MetricPipeline;

/// Fraction of the monthly request quota at which the slow path engages and
/// the warning fires.
const WARN_FRACTION: f64 = 0.9;

/// Tenants warned in the current calendar month. The set resets when the
/// month key changes.
struct WarnState {
    month_key: i32,
    tenants: HashSet<String>,
}

impl WarnState {
    fn new() -> Self {
        Self {
            month_key: Self::current_month_key(),
            tenants: HashSet::new(),
        }
    }

    fn current_month_key() -> i32 {
        let now = Utc::now();
        now.year() * 12 + now.month() as i32
    }

    /// Returns true if this call marked the tenant for the first time this
    /// month.
    fn mark(&mut self, tenant_id: &str) -> bool {
        let key = Self::current_month_key();
        if key != self.month_key {
            self.month_key = key;
            self.tenants.clear();
        }
        self.tenants.insert(tenant_id.to_string())
    }
}

pub struct QuotaEnforcer {
    tenants: Arc<dyn TenantStore>,
    usage: Arc<dyn MetricQueryService>,
    breaker: Arc<CircuitBreaker>,
    pipeline: Arc<MetricPipeline>,
    local_request_count: DashMap<String, AtomicU64>,
    warned: Mutex<WarnState>,
    order: i32,
}

impl QuotaEnforcer {
    pub fn new(
        tenants: Arc<dyn TenantStore>,
        usage: Arc<dyn MetricQueryService>,
        breaker: Arc<CircuitBreaker>,
        pipeline: Arc<MetricPipeline>,
        order: i32,
    ) -> Self {
        Self {
            tenants,
            usage,
            breaker,
            pipeline,
            local_request_count: DashMap::new(),
            warned: Mutex::new(WarnState::new()),
            order,
        }
    }

    /// Local request count seen for a tenant since process start.
    pub fn local_count(&self, tenant_id: &str) -> u64 {
        self.local_request_count
            .get(tenant_id)
            .map(|counter| counter.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn increment_local(&self, tenant_id: &str) -> u64 {
        self.local_request_count
            .entry(tenant_id.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed)
            + 1
    }

    fn publish_quota_event(
        &self,
        tenant_id: &str,
        action: QuotaAction,
        current_usage: i64,
        quota_limit: i64,
        reason: &str,
    ) {
        let event = MetricEvent::for_tenant(
            tenant_id,
            MetricPayload::Quota(QuotaEvent {
                action,
                current_usage,
                quota_limit,
                reason: reason.to_string(),
            }),
        );
        self.pipeline.publish(event);
    }

    fn reject_for_status(&self, tenant: &Tenant) -> Option<HookResult> {
        match tenant.status {
            TenantStatus::Active => None,
            TenantStatus::Suspended => {
                self.publish_quota_event(
                    &tenant.id,
                    QuotaAction::RejectedSuspended,
                    0,
                    tenant.quota.max_requests_per_month,
                    "tenant suspended",
                );
                Some(HookResult::reject("Tenant SUSPENDED"))
            }
            TenantStatus::Deactivated => {
                self.publish_quota_event(
                    &tenant.id,
                    QuotaAction::RejectedDeactivated,
                    0,
                    tenant.quota.max_requests_per_month,
                    "tenant deactivated",
                );
                Some(HookResult::reject("Tenant DEACTIVATED"))
            }
        }
    }

    /// The full enforcement decision. Infallible: every internal failure
    /// resolves to `Continue`.
    async fn check(&self, ctx: &HookContext) -> HookResult {
        let Some(tenant_id) = ctx.meta_str(meta_keys::TENANT_ID) else {
            return HookResult::Continue;
        };
        if tenant_id == DEFAULT_TENANT {
            return HookResult::Continue;
        }
        let tenant_id = tenant_id.to_string();

        let local_count = self.increment_local(&tenant_id);

        let tenant = match self.tenants.find_by_id(&tenant_id).await {
            Ok(Some(tenant)) => tenant,
            Ok(None) => {
                tracing::warn!(tenant_id = %tenant_id, "Unknown tenant; quota check skipped");
                return HookResult::Continue;
            }
            Err(error) => {
                tracing::warn!(tenant_id = %tenant_id, %error, "Tenant lookup failed; failing open");
                return HookResult::Continue;
            }
        };

        if let Some(reject) = self.reject_for_status(&tenant) {
            return reject;
        }

        #[allow(clippy::cast_precision_loss)]
        let warn_threshold = WARN_FRACTION * tenant.quota.max_requests_per_month as f64;

        // Fast path: while the local counter is comfortably below the warning
        // threshold, the database is never consulted.
        #[allow(clippy::cast_precision_loss)]
        if (local_count as f64) < warn_threshold {
            return HookResult::Continue;
        }

        let usage = match self
            .breaker
            .execute(|| self.usage.get_current_month_usage(&tenant_id))
            .await
        {
            Ok(usage) => usage,
            Err(CircuitBreakerError::Open { retry_after }) => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    %retry_after,
                    error_code = %ErrorCode::CircuitOpen,
                    "Usage lookup short-circuited; failing open"
                );
                return HookResult::Continue;
            }
            Err(CircuitBreakerError::Inner(error)) => {
                tracing::warn!(tenant_id = %tenant_id, %error, "Usage lookup failed; failing open");
                return HookResult::Continue;
            }
        };

        if usage.requests >= tenant.quota.max_requests_per_month {
            self.publish_quota_event(
                &tenant_id,
                QuotaAction::RejectedRequests,
                usage.requests,
                tenant.quota.max_requests_per_month,
                "monthly request quota exceeded",
            );
            return HookResult::reject("Monthly request quota exceeded");
        }

        if usage.tokens >= tenant.quota.max_tokens_per_month {
            self.publish_quota_event(
                &tenant_id,
                QuotaAction::RejectedTokens,
                usage.tokens,
                tenant.quota.max_tokens_per_month,
                "monthly token quota exceeded",
            );
            return HookResult::reject("Monthly token quota exceeded");
        }

        #[allow(clippy::cast_precision_loss)]
        if usage.requests as f64 >= warn_threshold {
            let newly_warned = self
                .warned
                .lock()
                .map(|mut state| state.mark(&tenant_id))
                .unwrap_or(false);
            if newly_warned {
                self.publish_quota_event(
                    &tenant_id,
                    QuotaAction::Warning,
                    usage.requests,
                    tenant.quota.max_requests_per_month,
                    "90% quota used",
                );
            }
        }

        HookResult::Continue
    }
}

#[async_trait]
impl LifecycleHook for QuotaEnforcer {
    fn name(&self) -> &str {
        "quota-enforcer"
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn fail_on_error(&self) -> bool {
        false
    }

    fn kinds(&self) -> &[HookKind] {
        &[HookKind::BeforeAgentStart]
    }

    async fn before_agent_start(&self, ctx: &HookContext) -> DomainResult<HookResult> {
        Ok(self.check(ctx).await)
    }
}
