//! Alert rule evaluation.
//!
//! One evaluator instance serves the whole platform. Each cycle walks every
//! enabled rule (tenant rules paired with their tenant, platform rules once),
//! computes the rule's metric over its window, and reconciles the single
//! ACTIVE instance per rule: breach with no active instance fires one and
//! dispatches notifiers; no breach with an active instance resolves it.
//! Every per-rule and per-notifier failure is contained.

use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AlertInstance, AlertMetric, AlertRule, AlertRuleType, Tenant,
};
use crate::domain::ports::{AlertNotifier, AlertStore, MetricQueryService, TenantStore};
use crate::services::baseline::BaselineCalculator;
use crate::services::pipeline_health::PipelineHealth;
use crate::services::slo::SloService;

/// Outcome of evaluating one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationOutcome {
    /// A new instance fired this cycle.
    Fired,
    /// An active instance was resolved this cycle.
    Resolved,
    /// Nothing changed (still firing, still quiet, or metric unavailable).
    Unchanged,
}

pub struct AlertEvaluator {
    metrics: Arc<dyn MetricQueryService>,
    tenants: Arc<dyn TenantStore>,
    alerts: Arc<dyn AlertStore>,
    notifiers: Vec<Arc<dyn AlertNotifier>>,
    slo: SloService,
    baseline: BaselineCalculator,
    health: Arc<PipelineHealth>,
}

impl AlertEvaluator {
    pub fn new(
        metrics: Arc<dyn MetricQueryService>,
        tenants: Arc<dyn TenantStore>,
        alerts: Arc<dyn AlertStore>,
        notifiers: Vec<Arc<dyn AlertNotifier>>,
        slo: SloService,
        baseline: BaselineCalculator,
        health: Arc<PipelineHealth>,
    ) -> Self {
        Self {
            metrics,
            tenants,
            alerts,
            notifiers,
            slo,
            baseline,
            health,
        }
    }

    /// Evaluate every enabled rule. One bad rule cannot poison the cycle.
    pub async fn evaluate_all(&self) -> usize {
        let rules = match self.alerts.list_enabled_rules().await {
            Ok(rules) => rules,
            Err(error) => {
                tracing::error!(%error, "Failed to load alert rules");
                return 0;
            }
        };

        let mut fired = 0;
        for rule in rules {
            let tenant = match &rule.tenant_id {
                Some(tenant_id) => match self.tenants.find_by_id(tenant_id).await {
                    Ok(tenant) => tenant,
                    Err(error) => {
                        tracing::warn!(rule = %rule.name, %error, "Tenant lookup failed");
                        continue;
                    }
                },
                None => None,
            };

            match self.evaluate(&rule, tenant.as_ref()).await {
                Ok(EvaluationOutcome::Fired) => fired += 1,
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(rule = %rule.name, %error, "Alert rule evaluation failed");
                }
            }
        }
        fired
    }

    /// Evaluate one rule and reconcile its instance state.
    pub async fn evaluate(
        &self,
        rule: &AlertRule,
        tenant: Option<&Tenant>,
    ) -> DomainResult<EvaluationOutcome> {
        let Some(value) = self.rule_value(rule, tenant).await? else {
            // Metric unavailable (e.g. thin baseline): neither fire nor resolve.
            return Ok(EvaluationOutcome::Unchanged);
        };

        let Some(breached) = self.breach_decision(rule, tenant, value).await? else {
            // Indeterminate (no trusted baseline yet): neither fire nor resolve.
            return Ok(EvaluationOutcome::Unchanged);
        };
        let active = self.alerts.find_active_instance(rule.id).await?;

        match (breached, active) {
            (true, None) => {
                let message = format!(
                    "{}: {} = {:.4} breached threshold {:.4} over {}m",
                    rule.name,
                    rule.metric.as_str(),
                    value,
                    rule.threshold,
                    rule.window_minutes
                );
                let instance = AlertInstance::fire(rule, value, message);
                self.alerts.insert_instance(&instance).await?;
                self.dispatch(&instance).await;
                tracing::info!(
                    rule = %rule.name,
                    metric = %rule.metric,
                    value,
                    threshold = rule.threshold,
                    "Alert fired"
                );
                Ok(EvaluationOutcome::Fired)
            }
            (false, Some(active)) => {
                self.alerts.resolve_instance(active.id, Utc::now()).await?;
                tracing::info!(rule = %rule.name, "Alert resolved");
                Ok(EvaluationOutcome::Resolved)
            }
            _ => Ok(EvaluationOutcome::Unchanged),
        }
    }

    /// Current value of the rule's metric, or `None` when it cannot be
    /// computed this cycle.
    async fn rule_value(&self, rule: &AlertRule, tenant: Option<&Tenant>) -> DomainResult<Option<f64>> {
        let to = Utc::now();
        let from = to - Duration::minutes(rule.window_minutes);
        let tenant_id = rule.tenant_id.as_deref();

        let value = match rule.metric {
            AlertMetric::ErrorRate => {
                let tenant_id = require_tenant(rule, tenant_id)?;
                Some(1.0 - self.metrics.get_success_rate(tenant_id, from, to).await?)
            }
            AlertMetric::LatencyP99 => {
                let tenant_id = require_tenant(rule, tenant_id)?;
                let percentiles = self
                    .metrics
                    .get_latency_percentiles(tenant_id, from, to)
                    .await?;
                #[allow(clippy::cast_precision_loss)]
                let p99 = percentiles.p99 as f64;
                Some(p99)
            }
            AlertMetric::HourlyCost => {
                let tenant_id = require_tenant(rule, tenant_id)?;
                Some(self.metrics.get_hourly_cost(tenant_id, from, to).await?)
            }
            AlertMetric::TokenBudgetUsage => {
                let tenant_id = require_tenant(rule, tenant_id)?;
                let Some(tenant) = tenant else {
                    return Ok(None);
                };
                let usage = self.metrics.get_current_month_usage(tenant_id).await?;
                if tenant.quota.max_tokens_per_month <= 0 {
                    return Ok(None);
                }
                #[allow(clippy::cast_precision_loss)]
                let ratio = usage.tokens as f64 / tenant.quota.max_tokens_per_month as f64;
                Some(ratio)
            }
            AlertMetric::McpConsecutiveFailures => {
                let tenant_id = require_tenant(rule, tenant_id)?;
                let failures = self.metrics.get_max_consecutive_mcp_failures(tenant_id).await?;
                #[allow(clippy::cast_precision_loss)]
                let failures = failures as f64;
                Some(failures)
            }
            AlertMetric::PipelineBufferUsage => Some(f64::from(self.health.buffer_usage_percent())),
            AlertMetric::AggregateRefreshLagMs => {
                #[allow(clippy::cast_precision_loss)]
                let lag = self.health.aggregate_refresh_lag_ms() as f64;
                Some(lag)
            }
            AlertMetric::BurnRate => {
                let tenant_id = require_tenant(rule, tenant_id)?;
                let slo_target = tenant.map_or(0.995, |t| t.slo_availability);
                Some(
                    self.slo
                        .calculate_error_budget(tenant_id, slo_target, from, to)
                        .await?
                        .burn_rate,
                )
            }
        };
        Ok(value)
    }

    /// Breach decision per rule type; `None` means indeterminate.
    async fn breach_decision(
        &self,
        rule: &AlertRule,
        tenant: Option<&Tenant>,
        value: f64,
    ) -> DomainResult<Option<bool>> {
        match rule.rule_type {
            AlertRuleType::StaticThreshold | AlertRuleType::ErrorBudgetBurnRate => {
                Ok(Some(value > rule.threshold))
            }
            AlertRuleType::BaselineAnomaly => {
                let Some(tenant_id) = rule.tenant_id.as_deref().or(tenant.map(|t| t.id.as_str()))
                else {
                    return Ok(None);
                };
                let Some(baseline) = self.baseline.get_baseline(tenant_id, rule.metric).await?
                else {
                    // No trusted history yet: anomaly rules stay silent.
                    return Ok(None);
                };
                Ok(Some(value > baseline.anomaly_ceiling(rule.threshold)))
            }
        }
    }

    /// Dispatch a fired instance to every notifier, isolating failures.
    async fn dispatch(&self, instance: &AlertInstance) {
        for notifier in &self.notifiers {
            if let Err(error) = notifier.notify(instance).await {
                tracing::warn!(
                    notifier = notifier.name(),
                    alert = %instance.id,
                    %error,
                    "Alert notifier failed"
                );
            }
        }
    }
}

fn require_tenant<'a>(rule: &AlertRule, tenant_id: Option<&'a str>) -> DomainResult<&'a str> {
    tenant_id.ok_or_else(|| {
        DomainError::ValidationFailed(format!(
            "rule '{}' evaluates tenant metric '{}' but has no tenant",
            rule.name, rule.metric
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        AlertSeverity, AlertStatus, TenantUsage,
    };
    use crate::domain::ports::metric_query::{BaselineStats, LatencyPercentiles};
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// In-memory alert store mirroring the one-ACTIVE-per-rule invariant.
    #[derive(Default)]
    struct MemoryAlertStore {
        rules: Mutex<Vec<AlertRule>>,
        instances: Mutex<Vec<AlertInstance>>,
    }

    #[async_trait]
    impl AlertStore for MemoryAlertStore {
        async fn list_enabled_rules(&self) -> DomainResult<Vec<AlertRule>> {
            Ok(self
                .rules
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.enabled)
                .cloned()
                .collect())
        }
        async fn save_rule(&self, rule: &AlertRule) -> DomainResult<()> {
            self.rules.lock().unwrap().push(rule.clone());
            Ok(())
        }
        async fn find_active_instance(&self, rule_id: Uuid) -> DomainResult<Option<AlertInstance>> {
            Ok(self
                .instances
                .lock()
                .unwrap()
                .iter()
                .find(|i| i.rule_id == rule_id && i.status == AlertStatus::Active)
                .cloned())
        }
        async fn insert_instance(&self, instance: &AlertInstance) -> DomainResult<()> {
            self.instances.lock().unwrap().push(instance.clone());
            Ok(())
        }
        async fn resolve_instance(
            &self,
            instance_id: Uuid,
            at: chrono::DateTime<Utc>,
        ) -> DomainResult<()> {
            let mut instances = self.instances.lock().unwrap();
            if let Some(instance) = instances.iter_mut().find(|i| i.id == instance_id) {
                instance.status = AlertStatus::Resolved;
                instance.resolved_at = Some(at);
            }
            Ok(())
        }
    }

    struct StubQueries {
        success_rate: Mutex<f64>,
    }

    #[async_trait]
    impl MetricQueryService for StubQueries {
        async fn get_success_rate(
            &self,
            _: &str,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
        ) -> DomainResult<f64> {
            Ok(*self.success_rate.lock().unwrap())
        }
        async fn get_latency_percentiles(
            &self,
            _: &str,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
        ) -> DomainResult<LatencyPercentiles> {
            Ok(LatencyPercentiles {
                p50: 800,
                p95: 4000,
                p99: 15000,
            })
        }
        async fn get_current_month_usage(&self, _: &str) -> DomainResult<TenantUsage> {
            Ok(TenantUsage {
                requests: 100,
                tokens: 900,
                cost_usd: 1.0,
            })
        }
        async fn get_hourly_cost(
            &self,
            _: &str,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
        ) -> DomainResult<f64> {
            Ok(12.5)
        }
        async fn get_max_consecutive_mcp_failures(&self, _: &str) -> DomainResult<i64> {
            Ok(4)
        }
        async fn get_request_counts(
            &self,
            _: &str,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
        ) -> DomainResult<(i64, i64)> {
            Ok((1000, 200))
        }
        async fn get_baseline_stats(
            &self,
            _: &str,
            _: AlertMetric,
        ) -> DomainResult<Option<BaselineStats>> {
            Ok(Some(BaselineStats {
                mean: Some(0.05),
                std_dev: Some(0.01),
                sample_count: Some(48),
            }))
        }
    }

    struct StubTenants(Tenant);

    #[async_trait]
    impl TenantStore for StubTenants {
        async fn find_by_id(&self, _: &str) -> DomainResult<Option<Tenant>> {
            Ok(Some(self.0.clone()))
        }
        async fn save(&self, tenant: &Tenant) -> DomainResult<Tenant> {
            Ok(tenant.clone())
        }
        async fn list(&self) -> DomainResult<Vec<Tenant>> {
            Ok(vec![self.0.clone()])
        }
    }

    struct CountingNotifier {
        delivered: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl AlertNotifier for CountingNotifier {
        fn name(&self) -> &str {
            "counting"
        }
        async fn notify(&self, alert: &AlertInstance) -> DomainResult<()> {
            if self.fail {
                return Err(DomainError::ExecutionFailed("webhook down".into()));
            }
            self.delivered.lock().unwrap().push(alert.message.clone());
            Ok(())
        }
    }

    fn evaluator(
        queries: Arc<StubQueries>,
        store: Arc<MemoryAlertStore>,
        notifiers: Vec<Arc<dyn AlertNotifier>>,
    ) -> AlertEvaluator {
        let metrics: Arc<dyn MetricQueryService> = queries;
        AlertEvaluator::new(
            metrics.clone(),
            Arc::new(StubTenants(Tenant::new("t1", "Tenant", "t1"))),
            store,
            notifiers,
            SloService::new(metrics.clone()),
            BaselineCalculator::new(metrics, 3600),
            Arc::new(PipelineHealth::new()),
        )
    }

    fn error_rate_rule() -> AlertRule {
        AlertRule::new(
            "High error rate",
            AlertRuleType::StaticThreshold,
            AlertMetric::ErrorRate,
            0.10,
            15,
        )
        .for_tenant("t1")
        .with_severity(AlertSeverity::Critical)
    }

    #[tokio::test]
    async fn fires_once_then_resolves() {
        let queries = Arc::new(StubQueries {
            success_rate: Mutex::new(0.80),
        });
        let store = Arc::new(MemoryAlertStore::default());
        let notifier = Arc::new(CountingNotifier {
            delivered: Mutex::new(Vec::new()),
            fail: false,
        });
        let evaluator = evaluator(queries.clone(), store.clone(), vec![notifier.clone()]);
        let rule = error_rate_rule();
        let tenant = Tenant::new("t1", "Tenant", "t1");

        // Breach: fires exactly one instance with the observed value.
        assert_eq!(
            evaluator.evaluate(&rule, Some(&tenant)).await.unwrap(),
            EvaluationOutcome::Fired
        );
        {
            let instances = store.instances.lock().unwrap();
            assert_eq!(instances.len(), 1);
            assert!((instances[0].metric_value - 0.20).abs() < 1e-9);
            assert!(instances[0].message.contains("error_rate"));
            assert_eq!(instances[0].status, AlertStatus::Active);
        }
        assert_eq!(notifier.delivered.lock().unwrap().len(), 1);

        // Still breaching: no duplicate instance.
        assert_eq!(
            evaluator.evaluate(&rule, Some(&tenant)).await.unwrap(),
            EvaluationOutcome::Unchanged
        );
        assert_eq!(store.instances.lock().unwrap().len(), 1);

        // Breach clears: resolves exactly once.
        *queries.success_rate.lock().unwrap() = 0.99;
        assert_eq!(
            evaluator.evaluate(&rule, Some(&tenant)).await.unwrap(),
            EvaluationOutcome::Resolved
        );
        {
            let instances = store.instances.lock().unwrap();
            assert_eq!(instances[0].status, AlertStatus::Resolved);
            assert!(instances[0].resolved_at.is_some());
        }

        // Quiet rule stays quiet.
        assert_eq!(
            evaluator.evaluate(&rule, Some(&tenant)).await.unwrap(),
            EvaluationOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn notifier_failure_does_not_block_firing() {
        let queries = Arc::new(StubQueries {
            success_rate: Mutex::new(0.5),
        });
        let store = Arc::new(MemoryAlertStore::default());
        let failing = Arc::new(CountingNotifier {
            delivered: Mutex::new(Vec::new()),
            fail: true,
        });
        let working = Arc::new(CountingNotifier {
            delivered: Mutex::new(Vec::new()),
            fail: false,
        });
        let evaluator = evaluator(
            queries,
            store.clone(),
            vec![failing, working.clone()],
        );
        let rule = error_rate_rule();
        let tenant = Tenant::new("t1", "Tenant", "t1");

        evaluator.evaluate(&rule, Some(&tenant)).await.unwrap();
        assert_eq!(store.instances.lock().unwrap().len(), 1);
        assert_eq!(working.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn burn_rate_rule_uses_slo_math() {
        // 20% failure against 0.995 target = burn rate 40.
        let queries = Arc::new(StubQueries {
            success_rate: Mutex::new(0.8),
        });
        let store = Arc::new(MemoryAlertStore::default());
        let evaluator = evaluator(queries, store.clone(), vec![]);
        let rule = AlertRule::new(
            "Budget burn",
            AlertRuleType::ErrorBudgetBurnRate,
            AlertMetric::BurnRate,
            14.4,
            60,
        )
        .for_tenant("t1");
        let tenant = Tenant::new("t1", "Tenant", "t1");

        assert_eq!(
            evaluator.evaluate(&rule, Some(&tenant)).await.unwrap(),
            EvaluationOutcome::Fired
        );
        let instances = store.instances.lock().unwrap();
        assert!((instances[0].metric_value - 40.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn baseline_anomaly_fires_above_sigma_ceiling() {
        // Baseline mean 0.05, std-dev 0.01; threshold 3 sigmas → ceiling 0.08.
        let queries = Arc::new(StubQueries {
            success_rate: Mutex::new(0.80), // error rate 0.20 > 0.08
        });
        let store = Arc::new(MemoryAlertStore::default());
        let evaluator = evaluator(queries, store.clone(), vec![]);
        let rule = AlertRule::new(
            "Error anomaly",
            AlertRuleType::BaselineAnomaly,
            AlertMetric::ErrorRate,
            3.0,
            60,
        )
        .for_tenant("t1");
        let tenant = Tenant::new("t1", "Tenant", "t1");

        assert_eq!(
            evaluator.evaluate(&rule, Some(&tenant)).await.unwrap(),
            EvaluationOutcome::Fired
        );
    }

    #[tokio::test]
    async fn evaluate_all_counts_fired_rules() {
        let queries = Arc::new(StubQueries {
            success_rate: Mutex::new(0.5),
        });
        let store = Arc::new(MemoryAlertStore::default());
        store.save_rule(&error_rate_rule()).await.unwrap();
        let mut disabled = error_rate_rule();
        disabled.enabled = false;
        store.save_rule(&disabled).await.unwrap();

        let evaluator = evaluator(queries, store.clone(), vec![]);
        assert_eq!(evaluator.evaluate_all().await, 1);
    }
}
