//! Alert rule and instance persistence port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AlertInstance, AlertRule};

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn list_enabled_rules(&self) -> DomainResult<Vec<AlertRule>>;

    async fn save_rule(&self, rule: &AlertRule) -> DomainResult<()>;

    /// The single ACTIVE instance for a rule, if any.
    async fn find_active_instance(&self, rule_id: Uuid) -> DomainResult<Option<AlertInstance>>;

    async fn insert_instance(&self, instance: &AlertInstance) -> DomainResult<()>;

    /// Transition an ACTIVE instance to RESOLVED.
    async fn resolve_instance(&self, instance_id: Uuid, at: DateTime<Utc>) -> DomainResult<()>;
}
