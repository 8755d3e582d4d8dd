//! SQLite tenant repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Tenant, TenantPlan, TenantQuota, TenantStatus};
use crate::domain::ports::TenantStore;

#[derive(Clone)]
pub struct SqliteTenantRepository {
    pool: SqlitePool,
}

impl SqliteTenantRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TenantRow {
    id: String,
    name: String,
    slug: String,
    plan: String,
    status: String,
    max_requests_per_month: i64,
    max_tokens_per_month: i64,
    max_users: i32,
    max_agents: i32,
    max_mcp_servers: i32,
    slo_availability: f64,
    slo_latency_p99_ms: i64,
}

impl TenantRow {
    fn into_tenant(self) -> DomainResult<Tenant> {
        Ok(Tenant {
            plan: TenantPlan::from_str(&self.plan)
                .ok_or_else(|| DomainError::ValidationFailed(format!("bad plan '{}'", self.plan)))?,
            status: TenantStatus::from_str(&self.status).ok_or_else(|| {
                DomainError::ValidationFailed(format!("bad status '{}'", self.status))
            })?,
            id: self.id,
            name: self.name,
            slug: self.slug,
            quota: TenantQuota {
                max_requests_per_month: self.max_requests_per_month,
                max_tokens_per_month: self.max_tokens_per_month,
                max_users: self.max_users,
                max_agents: self.max_agents,
                max_mcp_servers: self.max_mcp_servers,
            },
            slo_availability: self.slo_availability,
            slo_latency_p99_ms: self.slo_latency_p99_ms,
        })
    }
}

const COLUMNS: &str = "id, name, slug, plan, status, max_requests_per_month, \
                       max_tokens_per_month, max_users, max_agents, max_mcp_servers, \
                       slo_availability, slo_latency_p99_ms";

#[async_trait]
impl TenantStore for SqliteTenantRepository {
    async fn find_by_id(&self, id: &str) -> DomainResult<Option<Tenant>> {
        let row: Option<TenantRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM tenants WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TenantRow::into_tenant).transpose()
    }

    async fn save(&self, tenant: &Tenant) -> DomainResult<Tenant> {
        sqlx::query(
            "INSERT INTO tenants (id, name, slug, plan, status, max_requests_per_month,
                 max_tokens_per_month, max_users, max_agents, max_mcp_servers,
                 slo_availability, slo_latency_p99_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT (id) DO UPDATE SET
                 name = excluded.name,
                 slug = excluded.slug,
                 plan = excluded.plan,
                 status = excluded.status,
                 max_requests_per_month = excluded.max_requests_per_month,
                 max_tokens_per_month = excluded.max_tokens_per_month,
                 max_users = excluded.max_users,
                 max_agents = excluded.max_agents,
                 max_mcp_servers = excluded.max_mcp_servers,
                 slo_availability = excluded.slo_availability,
                 slo_latency_p99_ms = excluded.slo_latency_p99_ms",
        )
        .bind(&tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.slug)
        .bind(tenant.plan.as_str())
        .bind(tenant.status.as_str())
        .bind(tenant.quota.max_requests_per_month)
        .bind(tenant.quota.max_tokens_per_month)
        .bind(tenant.quota.max_users)
        .bind(tenant.quota.max_agents)
        .bind(tenant.quota.max_mcp_servers)
        .bind(tenant.slo_availability)
        .bind(tenant.slo_latency_p99_ms)
        .execute(&self.pool)
        .await?;
        Ok(tenant.clone())
    }

    async fn list(&self) -> DomainResult<Vec<Tenant>> {
        let rows: Vec<TenantRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM tenants ORDER BY id"))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TenantRow::into_tenant).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::connection::DatabaseConnection;

    #[tokio::test]
    async fn save_and_find_round_trip() {
        let db = DatabaseConnection::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let repo = SqliteTenantRepository::new(db.pool().clone());

        let mut tenant = Tenant::new("t1", "Acme", "acme");
        tenant.quota.max_requests_per_month = 42;
        repo.save(&tenant).await.unwrap();

        let loaded = repo.find_by_id("t1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "Acme");
        assert_eq!(loaded.quota.max_requests_per_month, 42);
        assert_eq!(loaded.status, TenantStatus::Active);

        assert!(repo.find_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_updates_in_place() {
        let db = DatabaseConnection::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let repo = SqliteTenantRepository::new(db.pool().clone());

        let mut tenant = Tenant::new("t1", "Acme", "acme");
        repo.save(&tenant).await.unwrap();
        tenant.status = TenantStatus::Suspended;
        repo.save(&tenant).await.unwrap();

        let loaded = repo.find_by_id("t1").await.unwrap().unwrap();
        assert_eq!(loaded.status, TenantStatus::Suspended);
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }
}
