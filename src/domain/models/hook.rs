//! Request lifecycle hook surface.
//!
//! Hooks are capability records invoked at fixed points of the agent request
//! lifecycle. The quota enforcer and the metric collector are both hooks;
//! external guards and extensions plug into the same surface.

use serde_json::Value;
use std::collections::HashMap;

use crate::domain::errors::DomainResult;

/// Lifecycle points a hook can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    BeforeAgentStart,
    AfterAgentComplete,
    BeforeToolCall,
    AfterToolCall,
}

/// Outcome of a gating hook (`BeforeAgentStart`, `BeforeToolCall`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookResult {
    /// Proceed with the request.
    Continue,
    /// Stop the request with a user-visible reason.
    Reject { reason: String },
}

impl HookResult {
    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Reject {
            reason: reason.into(),
        }
    }

    pub fn is_reject(&self) -> bool {
        matches!(self, Self::Reject { .. })
    }
}

/// Outcome of an output guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputGuardResult {
    Allowed,
    Modified {
        content: String,
        stage: String,
        reason: String,
    },
    Rejected {
        stage: String,
        reason: String,
    },
}

/// Per-request context threaded through the hook chain.
///
/// `metadata` is the extension point: upstream stages record durations, tool
/// provenance and identifiers under well-known keys (see [`meta_keys`]), and
/// the metric collector reads them back to build enriched events.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub run_id: String,
    pub user_id: Option<String>,
    pub channel: Option<String>,
    pub user_prompt: String,
    pub metadata: HashMap<String, Value>,
}

/// Well-known metadata keys.
pub mod meta_keys {
    pub const TENANT_ID: &str = "tenantId";
    pub const SESSION_ID: &str = "sessionId";
    pub const PERSONA_ID: &str = "personaId";
    pub const PROMPT_TEMPLATE_ID: &str = "promptTemplateId";
    pub const INTENT_CATEGORY: &str = "intentCategory";
    pub const LLM_DURATION_MS: &str = "llmDurationMs";
    pub const TOOL_DURATION_MS: &str = "toolDurationMs";
    pub const GUARD_DURATION_MS: &str = "guardDurationMs";
    pub const QUEUE_WAIT_MS: &str = "queueWaitMs";
    pub const FALLBACK_USED: &str = "fallbackUsed";
    pub const GUARD_STAGE: &str = "guardStage";
    pub const GUARD_CATEGORY: &str = "guardCategory";
    pub const GUARD_REJECTED: &str = "guardRejected";
    pub const SCHEDULER_JOB_ID: &str = "schedulerJobId";
    pub const SCHEDULER_JOB_NAME: &str = "schedulerJobName";

    /// Per-tool provenance keys: `toolSource_<toolName>`, `mcpServer_<toolName>`.
    pub fn tool_source(tool_name: &str) -> String {
        format!("toolSource_{tool_name}")
    }

    pub fn mcp_server(tool_name: &str) -> String {
        format!("mcpServer_{tool_name}")
    }
}

impl HookContext {
    pub fn new(run_id: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            user_id: None,
            channel: None,
            user_prompt: user_prompt.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn set_meta(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn meta_i64(&self, key: &str) -> Option<i64> {
        self.metadata.get(key).and_then(Value::as_i64)
    }

    pub fn meta_bool(&self, key: &str) -> Option<bool> {
        self.metadata.get(key).and_then(Value::as_bool)
    }
}

/// Result of a tool invocation, passed to `AfterToolCall`.
#[derive(Debug, Clone)]
pub struct ToolCallResult {
    pub tool_name: String,
    pub call_index: i32,
    pub success: bool,
    pub duration_ms: i64,
    pub error_class: Option<String>,
    pub error_message: Option<String>,
    pub output: Option<Value>,
}

impl ToolCallResult {
    pub fn success(tool_name: impl Into<String>, call_index: i32, duration_ms: i64) -> Self {
        Self {
            tool_name: tool_name.into(),
            call_index,
            success: true,
            duration_ms,
            error_class: None,
            error_message: None,
            output: None,
        }
    }

    pub fn failure(
        tool_name: impl Into<String>,
        call_index: i32,
        duration_ms: i64,
        error_class: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            call_index,
            success: false,
            duration_ms,
            error_class: Some(error_class.into()),
            error_message: Some(error_message.into()),
            output: None,
        }
    }
}

/// A lifecycle hook: ordering metadata plus one callback per kind.
///
/// Hooks run in ascending `order`. A `Reject` from a gating hook
/// short-circuits the chain. Errors from hooks with `fail_on_error = false`
/// are logged and skipped; cancellation always propagates.
#[async_trait::async_trait]
pub trait LifecycleHook: Send + Sync {
    fn name(&self) -> &str;

    fn order(&self) -> i32;

    fn enabled(&self) -> bool {
        true
    }

    fn fail_on_error(&self) -> bool {
        false
    }

    /// Kinds this hook participates in; others are skipped without dispatch.
    fn kinds(&self) -> &[HookKind];

    async fn before_agent_start(&self, _ctx: &HookContext) -> DomainResult<HookResult> {
        Ok(HookResult::Continue)
    }

    async fn after_agent_complete(&self, _ctx: &HookContext, _response: &str) -> DomainResult<()> {
        Ok(())
    }

    async fn before_tool_call(&self, _ctx: &HookContext) -> DomainResult<HookResult> {
        Ok(HookResult::Continue)
    }

    async fn after_tool_call(
        &self,
        _ctx: &HookContext,
        _result: &ToolCallResult,
    ) -> DomainResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_accessors() {
        let mut ctx = HookContext::new("run-1", "hello").with_user("u1");
        ctx.set_meta(meta_keys::TENANT_ID, json!("acme"));
        ctx.set_meta(meta_keys::LLM_DURATION_MS, json!(1234));
        ctx.set_meta(meta_keys::FALLBACK_USED, json!(true));

        assert_eq!(ctx.meta_str(meta_keys::TENANT_ID), Some("acme"));
        assert_eq!(ctx.meta_i64(meta_keys::LLM_DURATION_MS), Some(1234));
        assert_eq!(ctx.meta_bool(meta_keys::FALLBACK_USED), Some(true));
        assert_eq!(ctx.meta_str("missing"), None);
    }

    #[test]
    fn tool_provenance_keys() {
        assert_eq!(meta_keys::tool_source("search"), "toolSource_search");
        assert_eq!(meta_keys::mcp_server("search"), "mcpServer_search");
    }

    #[test]
    fn reject_helper() {
        let result = HookResult::reject("Tenant SUSPENDED");
        assert!(result.is_reject());
        assert!(!HookResult::Continue.is_reject());
    }
}
