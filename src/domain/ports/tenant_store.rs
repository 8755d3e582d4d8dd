//! Tenant persistence port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Tenant;

/// Lookup and mutation of tenant records. Tenants are mutated only through
/// `save`.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> DomainResult<Option<Tenant>>;

    async fn save(&self, tenant: &Tenant) -> DomainResult<Tenant>;

    async fn list(&self) -> DomainResult<Vec<Tenant>>;
}
