//! Metric collector hook.
//!
//! Registered at order 200 (last) with `fail_on_error = false`: it observes
//! every request outcome, builds enriched events from the hook context
//! metadata, and publishes them into the pipeline. Publishing never fails the
//! request; overflow and internal errors become drops. Cancellation is the
//! one error that passes through untouched.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::models::hook::{
    meta_keys, HookContext, HookKind, LifecycleHook, ToolCallResult,
};
use crate::domain::models::{
    AgentExecutionEvent, GuardAction, GuardEvent, McpHealthEvent, MetricEvent, MetricPayload,
    SessionEvent, ToolCallEvent, ToolSource, DEFAULT_TENANT,
};
use crate::services::metric_pipeline::MetricPipeline;

/// Stage recorded for derived guard events when the context carries none.
const GUARD_STAGE_FALLBACK: &str = "all";
/// Category recorded for derived guard events when the context carries none.
const GUARD_CATEGORY_FALLBACK: &str = "none";

pub struct MetricCollector {
    pipeline: Arc<MetricPipeline>,
    order: i32,
}

impl MetricCollector {
    pub fn new(pipeline: Arc<MetricPipeline>, order: i32) -> Self {
        Self { pipeline, order }
    }

    fn tenant_of(ctx: &HookContext) -> String {
        ctx.meta_str(meta_keys::TENANT_ID)
            .unwrap_or(DEFAULT_TENANT)
            .to_string()
    }

    fn publish(&self, event: MetricEvent) {
        // Drop accounting happens inside the pipeline; nothing surfaces here.
        let _ = self.pipeline.publish(event);
    }

    /// Build the enriched agent execution event plus its derived guard and
    /// session events.
    fn collect_agent_completion(&self, ctx: &HookContext, success: bool, duration_ms: i64) {
        let tenant = Self::tenant_of(ctx);

        let guard_duration = ctx.meta_i64(meta_keys::GUARD_DURATION_MS);
        let guard_rejected = ctx.meta_bool(meta_keys::GUARD_REJECTED).unwrap_or(false);
        let session_id = ctx.meta_str(meta_keys::SESSION_ID).map(str::to_string);

        let execution = AgentExecutionEvent {
            run_id: ctx.run_id.clone(),
            user_id: ctx.user_id.clone().unwrap_or_default(),
            session_id: session_id.clone(),
            channel: ctx.channel.clone(),
            success,
            error_code: ctx.meta_str("errorCode").map(str::to_string),
            duration_ms,
            llm_duration_ms: ctx.meta_i64(meta_keys::LLM_DURATION_MS).unwrap_or(0),
            tool_duration_ms: ctx.meta_i64(meta_keys::TOOL_DURATION_MS).unwrap_or(0),
            guard_duration_ms: guard_duration.unwrap_or(0),
            queue_wait_ms: ctx.meta_i64(meta_keys::QUEUE_WAIT_MS).unwrap_or(0),
            tool_count: ctx.meta_i64("toolCount").unwrap_or(0) as i32,
            persona_id: ctx.meta_str(meta_keys::PERSONA_ID).map(str::to_string),
            prompt_template_id: ctx
                .meta_str(meta_keys::PROMPT_TEMPLATE_ID)
                .map(str::to_string),
            intent_category: ctx.meta_str(meta_keys::INTENT_CATEGORY).map(str::to_string),
            guard_rejected,
            guard_stage: ctx.meta_str(meta_keys::GUARD_STAGE).map(str::to_string),
            guard_category: ctx.meta_str(meta_keys::GUARD_CATEGORY).map(str::to_string),
            fallback_used: ctx.meta_bool(meta_keys::FALLBACK_USED).unwrap_or(false),
            retry_count: ctx.meta_i64("retryCount").unwrap_or(0) as i32,
        };
        self.publish(MetricEvent::for_tenant(
            &tenant,
            MetricPayload::AgentExecution(execution),
        ));

        // Derived guard event when the request passed through guards at all.
        if guard_duration.is_some() {
            let guard = GuardEvent {
                user_id: ctx.user_id.clone(),
                channel: ctx.channel.clone(),
                stage: ctx
                    .meta_str(meta_keys::GUARD_STAGE)
                    .unwrap_or(GUARD_STAGE_FALLBACK)
                    .to_string(),
                category: ctx
                    .meta_str(meta_keys::GUARD_CATEGORY)
                    .unwrap_or(GUARD_CATEGORY_FALLBACK)
                    .to_string(),
                reason_class: None,
                reason_detail: None,
                is_output_guard: false,
                action: if guard_rejected {
                    GuardAction::Rejected
                } else {
                    GuardAction::Allowed
                },
            };
            self.publish(MetricEvent::for_tenant(&tenant, MetricPayload::Guard(guard)));
        }

        // Derived session rollup when the request belongs to a session.
        if let Some(session_id) = session_id {
            let now = Utc::now();
            let session = SessionEvent {
                session_id,
                user_id: ctx.user_id.clone(),
                channel: ctx.channel.clone(),
                turn_count: ctx.meta_i64("turnCount").unwrap_or(1) as i32,
                total_duration_ms: duration_ms,
                total_tokens: ctx.meta_i64("totalTokens").unwrap_or(0),
                total_cost_usd: 0.0,
                started_at: now - chrono::Duration::milliseconds(duration_ms.max(0)),
                ended_at: now,
                outcome: ctx.meta_str("sessionOutcome").map(str::to_string),
            };
            self.publish(MetricEvent::for_tenant(
                &tenant,
                MetricPayload::Session(session),
            ));
        }
    }

    fn collect_tool_call(&self, ctx: &HookContext, result: &ToolCallResult) {
        let tenant = Self::tenant_of(ctx);

        let source = ctx
            .meta_str(&meta_keys::tool_source(&result.tool_name))
            .and_then(ToolSource::parse)
            .unwrap_or(ToolSource::Local);
        let mcp_server = ctx
            .meta_str(&meta_keys::mcp_server(&result.tool_name))
            .map(str::to_string);

        let event = ToolCallEvent {
            run_id: ctx.run_id.clone(),
            tool_name: result.tool_name.clone(),
            tool_source: source,
            mcp_server_name: mcp_server.clone(),
            call_index: result.call_index,
            success: result.success,
            duration_ms: result.duration_ms,
            error_class: result.error_class.clone(),
            error_message: result.error_message.clone(),
        };
        self.publish(MetricEvent::for_tenant(
            &tenant,
            MetricPayload::ToolCall(event),
        ));

        // MCP-backed tool calls double as health observations.
        if source == ToolSource::Mcp {
            if let Some(server_name) = mcp_server {
                let health = McpHealthEvent {
                    server_name,
                    status: if result.success { "CONNECTED" } else { "FAILED" }.to_string(),
                    response_time_ms: result.duration_ms,
                    error_class: result.error_class.clone(),
                    error_message: result.error_message.clone(),
                    tool_count: 0,
                };
                self.publish(MetricEvent::for_tenant(
                    &tenant,
                    MetricPayload::McpHealth(health),
                ));
            }
        }
    }
}

#[async_trait]
impl LifecycleHook for MetricCollector {
    fn name(&self) -> &str {
        "metric-collector"
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn fail_on_error(&self) -> bool {
        false
    }

    fn kinds(&self) -> &[HookKind] {
        &[HookKind::AfterAgentComplete, HookKind::AfterToolCall]
    }

    async fn after_agent_complete(&self, ctx: &HookContext, _response: &str) -> DomainResult<()> {
        let success = ctx.meta_bool("success").unwrap_or(true);
        let duration_ms = ctx.meta_i64("durationMs").unwrap_or(0);
        self.collect_agent_completion(ctx, success, duration_ms);
        Ok(())
    }

    async fn after_tool_call(&self, ctx: &HookContext, result: &ToolCallResult) -> DomainResult<()> {
        self.collect_tool_call(ctx, result);
        Ok(())
    }
}
