//! SQLite alert rule and instance repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AlertInstance, AlertMetric, AlertRule, AlertRuleType, AlertSeverity, AlertStatus,
};
use crate::domain::ports::AlertStore;

#[derive(Clone)]
pub struct SqliteAlertRepository {
    pool: SqlitePool,
}

impl SqliteAlertRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    id: String,
    tenant_id: Option<String>,
    name: String,
    rule_type: String,
    metric: String,
    threshold: f64,
    window_minutes: i64,
    severity: String,
    enabled: i64,
    platform_only: i64,
}

impl RuleRow {
    fn into_rule(self) -> DomainResult<AlertRule> {
        Ok(AlertRule {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| DomainError::ValidationFailed(format!("bad rule id: {e}")))?,
            tenant_id: self.tenant_id,
            rule_type: AlertRuleType::from_str(&self.rule_type).ok_or_else(|| {
                DomainError::ValidationFailed(format!("bad rule type '{}'", self.rule_type))
            })?,
            metric: AlertMetric::from_str(&self.metric).ok_or_else(|| {
                DomainError::ValidationFailed(format!("bad metric '{}'", self.metric))
            })?,
            severity: AlertSeverity::from_str(&self.severity).ok_or_else(|| {
                DomainError::ValidationFailed(format!("bad severity '{}'", self.severity))
            })?,
            name: self.name,
            threshold: self.threshold,
            window_minutes: self.window_minutes,
            enabled: self.enabled != 0,
            platform_only: self.platform_only != 0,
        })
    }
}

#[derive(sqlx::FromRow)]
struct InstanceRow {
    id: String,
    rule_id: String,
    tenant_id: Option<String>,
    severity: String,
    status: String,
    message: String,
    metric_value: f64,
    threshold: f64,
    fired_at: String,
    resolved_at: Option<String>,
}

impl InstanceRow {
    fn into_instance(self) -> DomainResult<AlertInstance> {
        let parse_time = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| DomainError::ValidationFailed(format!("bad timestamp: {e}")))
        };
        Ok(AlertInstance {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| DomainError::ValidationFailed(format!("bad instance id: {e}")))?,
            rule_id: Uuid::parse_str(&self.rule_id)
                .map_err(|e| DomainError::ValidationFailed(format!("bad rule id: {e}")))?,
            tenant_id: self.tenant_id,
            severity: AlertSeverity::from_str(&self.severity).ok_or_else(|| {
                DomainError::ValidationFailed(format!("bad severity '{}'", self.severity))
            })?,
            status: match self.status.as_str() {
                "ACTIVE" => AlertStatus::Active,
                "RESOLVED" => AlertStatus::Resolved,
                other => {
                    return Err(DomainError::ValidationFailed(format!(
                        "bad status '{other}'"
                    )))
                }
            },
            message: self.message,
            metric_value: self.metric_value,
            threshold: self.threshold,
            fired_at: parse_time(&self.fired_at)?,
            resolved_at: self.resolved_at.as_deref().map(parse_time).transpose()?,
        })
    }
}

#[async_trait]
impl AlertStore for SqliteAlertRepository {
    async fn list_enabled_rules(&self) -> DomainResult<Vec<AlertRule>> {
        let rows: Vec<RuleRow> = sqlx::query_as(
            "SELECT id, tenant_id, name, rule_type, metric, threshold, window_minutes,
                    severity, enabled, platform_only
             FROM alert_rules WHERE enabled = 1 ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RuleRow::into_rule).collect()
    }

    async fn save_rule(&self, rule: &AlertRule) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO alert_rules (id, tenant_id, name, rule_type, metric, threshold,
                 window_minutes, severity, enabled, platform_only)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT (id) DO UPDATE SET
                 tenant_id = excluded.tenant_id,
                 name = excluded.name,
                 rule_type = excluded.rule_type,
                 metric = excluded.metric,
                 threshold = excluded.threshold,
                 window_minutes = excluded.window_minutes,
                 severity = excluded.severity,
                 enabled = excluded.enabled,
                 platform_only = excluded.platform_only",
        )
        .bind(rule.id.to_string())
        .bind(&rule.tenant_id)
        .bind(&rule.name)
        .bind(rule.rule_type.as_str())
        .bind(rule.metric.as_str())
        .bind(rule.threshold)
        .bind(rule.window_minutes)
        .bind(rule.severity.as_str())
        .bind(i64::from(rule.enabled))
        .bind(i64::from(rule.platform_only))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_active_instance(&self, rule_id: Uuid) -> DomainResult<Option<AlertInstance>> {
        let row: Option<InstanceRow> = sqlx::query_as(
            "SELECT id, rule_id, tenant_id, severity, status, message, metric_value,
                    threshold, fired_at, resolved_at
             FROM alert_instances
             WHERE rule_id = ?1 AND status = 'ACTIVE'
             ORDER BY fired_at DESC LIMIT 1",
        )
        .bind(rule_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(InstanceRow::into_instance).transpose()
    }

    async fn insert_instance(&self, instance: &AlertInstance) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO alert_instances (id, rule_id, tenant_id, severity, status, message,
                 metric_value, threshold, fired_at, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(instance.id.to_string())
        .bind(instance.rule_id.to_string())
        .bind(&instance.tenant_id)
        .bind(instance.severity.as_str())
        .bind(instance.status.as_str())
        .bind(&instance.message)
        .bind(instance.metric_value)
        .bind(instance.threshold)
        .bind(instance.fired_at.to_rfc3339())
        .bind(instance.resolved_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn resolve_instance(&self, instance_id: Uuid, at: DateTime<Utc>) -> DomainResult<()> {
        sqlx::query(
            "UPDATE alert_instances SET status = 'RESOLVED', resolved_at = ?1
             WHERE id = ?2 AND status = 'ACTIVE'",
        )
        .bind(at.to_rfc3339())
        .bind(instance_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::connection::DatabaseConnection;

    async fn repo() -> SqliteAlertRepository {
        let db = DatabaseConnection::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        SqliteAlertRepository::new(db.pool().clone())
    }

    fn rule() -> AlertRule {
        AlertRule::new(
            "High error rate",
            AlertRuleType::StaticThreshold,
            AlertMetric::ErrorRate,
            0.1,
            15,
        )
        .for_tenant("t1")
    }

    #[tokio::test]
    async fn rules_round_trip() {
        let repo = repo().await;
        let rule = rule();
        repo.save_rule(&rule).await.unwrap();

        let loaded = repo.list_enabled_rules().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, rule.id);
        assert_eq!(loaded[0].metric, AlertMetric::ErrorRate);

        let mut disabled = rule;
        disabled.enabled = false;
        repo.save_rule(&disabled).await.unwrap();
        assert!(repo.list_enabled_rules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn active_instance_lifecycle() {
        let repo = repo().await;
        let rule = rule();
        repo.save_rule(&rule).await.unwrap();

        assert!(repo.find_active_instance(rule.id).await.unwrap().is_none());

        let instance = AlertInstance::fire(&rule, 0.2, "error_rate breach");
        repo.insert_instance(&instance).await.unwrap();

        let active = repo.find_active_instance(rule.id).await.unwrap().unwrap();
        assert_eq!(active.id, instance.id);
        assert_eq!(active.status, AlertStatus::Active);

        repo.resolve_instance(instance.id, Utc::now()).await.unwrap();
        assert!(repo.find_active_instance(rule.id).await.unwrap().is_none());
    }
}
