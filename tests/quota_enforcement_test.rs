//! Quota enforcement end-to-end: real tenant repository, stubbed usage
//! backend, full hook chain dispatch.

mod common;

use serde_json::json;
use std::sync::Arc;

use argus::domain::models::config::PipelineConfig;
use argus::domain::models::hook::{meta_keys, HookContext, HookResult};
use argus::domain::models::{
    MetricKind, MetricPayload, QuotaAction, QuotaEvent, Tenant, TenantStatus,
};
use argus::domain::ports::TenantStore;
use argus::infrastructure::database::{DatabaseConnection, SqliteTenantRepository};
use argus::services::{
    CircuitBreaker, CircuitBreakerConfig, HookRegistry, MetricPipeline, PipelineHealth,
    QuotaEnforcer,
};
use common::StubMetrics;

struct Setup {
    hooks: HookRegistry,
    pipeline: Arc<MetricPipeline>,
}

async fn setup(tenant: Tenant, metrics: StubMetrics) -> Setup {
    let db = DatabaseConnection::in_memory().await.unwrap();
    db.migrate().await.unwrap();
    let tenants = Arc::new(SqliteTenantRepository::new(db.pool().clone()));
    tenants.save(&tenant).await.unwrap();

    let pipeline = Arc::new(MetricPipeline::new(
        &PipelineConfig::default(),
        Arc::new(PipelineHealth::new()),
    ));
    let enforcer = Arc::new(QuotaEnforcer::new(
        tenants,
        Arc::new(metrics),
        Arc::new(CircuitBreaker::with_defaults()),
        pipeline.clone(),
        5,
    ));

    let mut hooks = HookRegistry::new();
    hooks.register(enforcer);
    Setup { hooks, pipeline }
}

fn request(tenant_id: &str) -> HookContext {
    let mut ctx = HookContext::new(uuid::Uuid::new_v4().to_string(), "hello");
    ctx.set_meta(meta_keys::TENANT_ID, json!(tenant_id));
    ctx
}

fn drain_quota_events(pipeline: &MetricPipeline) -> Vec<QuotaEvent> {
    pipeline
        .buffer()
        .drain(100_000)
        .into_iter()
        .filter(|e| e.kind() == MetricKind::Quota)
        .map(|e| match e.payload {
            MetricPayload::Quota(q) => q,
            _ => unreachable!(),
        })
        .collect()
}

fn tenant(max_requests: i64, max_tokens: i64) -> Tenant {
    let mut t = Tenant::new("t1", "Tenant One", "tenant-one");
    t.quota.max_requests_per_month = max_requests;
    t.quota.max_tokens_per_month = max_tokens;
    t
}

#[tokio::test]
async fn warn_once_scenario() {
    // maxRequests 10: first 8 requests ride the fast path; DB reports 9/10
    // used, so the 9th warns exactly once and the 10th stays silent.
    let setup = setup(tenant(10, 100_000), StubMetrics::with_usage(9, 50)).await;

    for _ in 0..8 {
        let result = setup.hooks.before_agent_start(&request("t1")).await.unwrap();
        assert_eq!(result, HookResult::Continue);
    }
    assert!(drain_quota_events(&setup.pipeline).is_empty());

    let ninth = setup.hooks.before_agent_start(&request("t1")).await.unwrap();
    assert_eq!(ninth, HookResult::Continue);
    let events = drain_quota_events(&setup.pipeline);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, QuotaAction::Warning);
    assert_eq!(events[0].current_usage, 9);
    assert_eq!(events[0].quota_limit, 10);
    assert_eq!(events[0].reason, "90% quota used");

    let tenth = setup.hooks.before_agent_start(&request("t1")).await.unwrap();
    assert_eq!(tenth, HookResult::Continue);
    assert!(drain_quota_events(&setup.pipeline).is_empty());
}

#[tokio::test]
async fn hard_reject_scenario() {
    // Quota 1, reported usage 100: the request is rejected and exactly one
    // rejected_requests event is published.
    let setup = setup(tenant(1, 100_000), StubMetrics::with_usage(100, 0)).await;

    let result = setup.hooks.before_agent_start(&request("t1")).await.unwrap();
    match result {
        HookResult::Reject { reason } => assert!(reason.contains("request quota exceeded")),
        HookResult::Continue => panic!("expected rejection"),
    }

    let events = drain_quota_events(&setup.pipeline);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, QuotaAction::RejectedRequests);
    assert_eq!(events[0].current_usage, 100);
    assert_eq!(events[0].quota_limit, 1);
}

#[tokio::test]
async fn circuit_open_fails_open() {
    let db = DatabaseConnection::in_memory().await.unwrap();
    db.migrate().await.unwrap();
    let tenants = Arc::new(SqliteTenantRepository::new(db.pool().clone()));
    tenants.save(&tenant(1, 1_000)).await.unwrap();

    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
        failure_threshold: 1,
        reset_timeout: chrono::Duration::minutes(5),
        half_open_trials: 1,
    }));
    // Trip the breaker so the usage lookup short-circuits.
    let _ = breaker
        .execute(|| async { Err::<(), _>(std::io::Error::other("down")) })
        .await;

    let pipeline = Arc::new(MetricPipeline::new(
        &PipelineConfig::default(),
        Arc::new(PipelineHealth::new()),
    ));
    let enforcer = Arc::new(QuotaEnforcer::new(
        tenants,
        Arc::new(StubMetrics::with_usage(100, 0)),
        breaker,
        pipeline,
        5,
    ));
    let mut hooks = HookRegistry::new();
    hooks.register(enforcer);

    let result = hooks.before_agent_start(&request("t1")).await.unwrap();
    assert_eq!(result, HookResult::Continue);
}

#[tokio::test]
async fn suspended_tenant_is_rejected_before_any_usage_lookup() {
    let mut t = tenant(10, 100_000);
    t.status = TenantStatus::Suspended;
    let setup = setup(t, StubMetrics::with_failing_usage()).await;

    let result = setup.hooks.before_agent_start(&request("t1")).await.unwrap();
    assert_eq!(result, HookResult::reject("Tenant SUSPENDED"));

    let events = drain_quota_events(&setup.pipeline);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, QuotaAction::RejectedSuspended);
}

#[tokio::test]
async fn infrastructure_failure_on_slow_path_fails_open() {
    let setup = setup(tenant(1, 1_000), StubMetrics::with_failing_usage()).await;
    let result = setup.hooks.before_agent_start(&request("t1")).await.unwrap();
    assert_eq!(result, HookResult::Continue);
}
