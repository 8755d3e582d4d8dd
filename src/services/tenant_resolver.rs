//! Per-request tenant identification.
//!
//! Resolution order: explicit request attribute, then the `X-Tenant-Id`
//! header, then the ambient per-task context. The ambient mechanism is a
//! tokio task-local entered for the duration of one request future and gone
//! when it completes; there is no process-wide global.

use std::collections::HashMap;
use std::future::Future;

use crate::domain::models::DEFAULT_TENANT;

/// Request attribute key checked first.
pub const TENANT_ATTRIBUTE: &str = "tenantId";

/// Header checked second.
pub const TENANT_HEADER: &str = "X-Tenant-Id";

tokio::task_local! {
    static AMBIENT_TENANT: String;
}

/// Bounded ambient tenant context for one request task.
pub struct TenantContext;

impl TenantContext {
    /// Run `fut` with `tenant_id` as the ambient tenant. The binding exists
    /// only while the future runs.
    pub async fn scope<F>(tenant_id: String, fut: F) -> F::Output
    where
        F: Future,
    {
        AMBIENT_TENANT.scope(tenant_id, fut).await
    }

    /// The ambient tenant of the current task, if one was entered.
    pub fn current() -> Option<String> {
        AMBIENT_TENANT.try_with(Clone::clone).ok()
    }
}

/// Stateless resolver applying the three-step lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct TenantResolver;

impl TenantResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the tenant for a request. Falls back to `"default"`.
    pub fn resolve(
        &self,
        attributes: &HashMap<String, String>,
        headers: &HashMap<String, String>,
    ) -> String {
        if let Some(tenant) = attributes.get(TENANT_ATTRIBUTE) {
            if !tenant.is_empty() {
                return tenant.clone();
            }
        }

        if let Some(tenant) = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(TENANT_HEADER))
            .map(|(_, value)| value)
        {
            if !tenant.is_empty() {
                return tenant.clone();
            }
        }

        if let Some(tenant) = TenantContext::current() {
            if !tenant.is_empty() {
                return tenant;
            }
        }

        DEFAULT_TENANT.to_string()
    }
}
