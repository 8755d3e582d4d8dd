//! Hook registry and chain dispatch.
//!
//! Hooks run in ascending `order`. Gating kinds (`BeforeAgentStart`,
//! `BeforeToolCall`) short-circuit on the first `Reject`. An error from a
//! hook with `fail_on_error = true` aborts the chain as a rejection; other
//! errors are logged and skipped. Cancellation is always re-raised.

use std::sync::Arc;

use crate::domain::errors::{DomainResult, ErrorCode};
use crate::domain::models::hook::{HookContext, HookKind, HookResult, LifecycleHook, ToolCallResult};

#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Register a hook, keeping the list sorted by `order`.
    pub fn register(&mut self, hook: Arc<dyn LifecycleHook>) {
        let position = self
            .hooks
            .partition_point(|existing| existing.order() <= hook.order());
        self.hooks.insert(position, hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    fn participants(&self, kind: HookKind) -> impl Iterator<Item = &Arc<dyn LifecycleHook>> {
        self.hooks
            .iter()
            .filter(move |hook| hook.enabled() && hook.kinds().contains(&kind))
    }

    /// Run the `BeforeAgentStart` chain. The first `Reject` wins.
    pub async fn before_agent_start(&self, ctx: &HookContext) -> DomainResult<HookResult> {
        for hook in self.participants(HookKind::BeforeAgentStart) {
            match hook.before_agent_start(ctx).await {
                Ok(HookResult::Continue) => {}
                Ok(reject @ HookResult::Reject { .. }) => return Ok(reject),
                Err(error) => {
                    if let Some(result) = Self::handle_error(hook.as_ref(), &error)? {
                        return Ok(result);
                    }
                }
            }
        }
        Ok(HookResult::Continue)
    }

    pub async fn after_agent_complete(&self, ctx: &HookContext, response: &str) -> DomainResult<()> {
        for hook in self.participants(HookKind::AfterAgentComplete) {
            if let Err(error) = hook.after_agent_complete(ctx, response).await {
                Self::handle_error(hook.as_ref(), &error)?;
            }
        }
        Ok(())
    }

    pub async fn before_tool_call(&self, ctx: &HookContext) -> DomainResult<HookResult> {
        for hook in self.participants(HookKind::BeforeToolCall) {
            match hook.before_tool_call(ctx).await {
                Ok(HookResult::Continue) => {}
                Ok(reject @ HookResult::Reject { .. }) => return Ok(reject),
                Err(error) => {
                    if let Some(result) = Self::handle_error(hook.as_ref(), &error)? {
                        return Ok(result);
                    }
                }
            }
        }
        Ok(HookResult::Continue)
    }

    pub async fn after_tool_call(
        &self,
        ctx: &HookContext,
        result: &ToolCallResult,
    ) -> DomainResult<()> {
        for hook in self.participants(HookKind::AfterToolCall) {
            if let Err(error) = hook.after_tool_call(ctx, result).await {
                Self::handle_error(hook.as_ref(), &error)?;
            }
        }
        Ok(())
    }

    /// Shared error policy: re-raise cancellation, convert `fail_on_error`
    /// hooks into a rejection, log and skip everything else.
    fn handle_error(
        hook: &dyn LifecycleHook,
        error: &crate::domain::errors::DomainError,
    ) -> DomainResult<Option<HookResult>> {
        if error.is_cancellation() {
            return Err(crate::domain::errors::DomainError::Cancelled);
        }
        if hook.fail_on_error() {
            tracing::warn!(hook = hook.name(), %error, "Hook failed; rejecting request");
            return Ok(Some(HookResult::reject(format!(
                "{}: hook '{}' failed: {error}",
                ErrorCode::HookRejected,
                hook.name()
            ))));
        }
        tracing::warn!(hook = hook.name(), %error, "Hook failed; continuing");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::DomainError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct TestHook {
        name: String,
        order: i32,
        enabled: bool,
        fail_on_error: bool,
        result: Option<HookResult>,
        error: Option<fn() -> DomainError>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl TestHook {
        fn passing(name: &str, order: i32, calls: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                order,
                enabled: true,
                fail_on_error: false,
                result: Some(HookResult::Continue),
                error: None,
                calls,
            }
        }
    }

    #[async_trait]
    impl LifecycleHook for TestHook {
        fn name(&self) -> &str {
            &self.name
        }

        fn order(&self) -> i32 {
            self.order
        }

        fn enabled(&self) -> bool {
            self.enabled
        }

        fn fail_on_error(&self) -> bool {
            self.fail_on_error
        }

        fn kinds(&self) -> &[HookKind] {
            &[HookKind::BeforeAgentStart]
        }

        async fn before_agent_start(&self, _ctx: &HookContext) -> DomainResult<HookResult> {
            self.calls.lock().unwrap().push(self.name.clone());
            if let Some(make_error) = self.error {
                return Err(make_error());
            }
            Ok(self.result.clone().unwrap_or(HookResult::Continue))
        }
    }

    fn ctx() -> HookContext {
        HookContext::new("run-1", "prompt")
    }

    #[tokio::test]
    async fn hooks_run_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        registry.register(Arc::new(TestHook::passing("late", 200, calls.clone())));
        registry.register(Arc::new(TestHook::passing("early", 5, calls.clone())));
        registry.register(Arc::new(TestHook::passing("middle", 100, calls.clone())));

        let result = registry.before_agent_start(&ctx()).await.unwrap();
        assert_eq!(result, HookResult::Continue);
        assert_eq!(*calls.lock().unwrap(), vec!["early", "middle", "late"]);
    }

    #[tokio::test]
    async fn reject_short_circuits() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        let mut rejecting = TestHook::passing("gate", 5, calls.clone());
        rejecting.result = Some(HookResult::reject("Tenant SUSPENDED"));
        registry.register(Arc::new(rejecting));
        registry.register(Arc::new(TestHook::passing("collector", 200, calls.clone())));

        let result = registry.before_agent_start(&ctx()).await.unwrap();
        assert!(result.is_reject());
        assert_eq!(*calls.lock().unwrap(), vec!["gate"]);
    }

    #[tokio::test]
    async fn disabled_hooks_are_skipped() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        let mut disabled = TestHook::passing("disabled", 1, calls.clone());
        disabled.enabled = false;
        registry.register(Arc::new(disabled));

        registry.before_agent_start(&ctx()).await.unwrap();
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn soft_errors_are_swallowed() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        let mut failing = TestHook::passing("flaky", 1, calls.clone());
        failing.error = Some(|| DomainError::ExecutionFailed("boom".into()));
        registry.register(Arc::new(failing));
        registry.register(Arc::new(TestHook::passing("next", 2, calls.clone())));

        let result = registry.before_agent_start(&ctx()).await.unwrap();
        assert_eq!(result, HookResult::Continue);
        assert_eq!(*calls.lock().unwrap(), vec!["flaky", "next"]);
    }

    #[tokio::test]
    async fn fail_on_error_rejects() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        let mut strict = TestHook::passing("strict", 1, calls.clone());
        strict.error = Some(|| DomainError::ExecutionFailed("boom".into()));
        strict.fail_on_error = true;
        registry.register(Arc::new(strict));

        let result = registry.before_agent_start(&ctx()).await.unwrap();
        match result {
            HookResult::Reject { reason } => assert!(reason.contains("HOOK_REJECTED")),
            HookResult::Continue => panic!("expected rejection"),
        }
    }

    #[tokio::test]
    async fn cancellation_propagates_even_without_fail_on_error() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        let mut cancelled = TestHook::passing("cancelled", 1, calls.clone());
        cancelled.error = Some(|| DomainError::Cancelled);
        registry.register(Arc::new(cancelled));

        let result = registry.before_agent_start(&ctx()).await;
        assert!(matches!(result, Err(DomainError::Cancelled)));
    }

    /// A hook kind the registry must not dispatch to non-participants.
    struct CountingAfterHook(AtomicUsize);

    #[async_trait]
    impl LifecycleHook for CountingAfterHook {
        fn name(&self) -> &str {
            "after-only"
        }
        fn order(&self) -> i32 {
            10
        }
        fn kinds(&self) -> &[HookKind] {
            &[HookKind::AfterAgentComplete]
        }
        async fn after_agent_complete(&self, _: &HookContext, _: &str) -> DomainResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn kinds_filter_dispatch() {
        let hook = Arc::new(CountingAfterHook(AtomicUsize::new(0)));
        let mut registry = HookRegistry::new();
        registry.register(hook.clone());

        registry.before_agent_start(&ctx()).await.unwrap();
        assert_eq!(hook.0.load(Ordering::SeqCst), 0);

        registry.after_agent_complete(&ctx(), "done").await.unwrap();
        assert_eq!(hook.0.load(Ordering::SeqCst), 1);
    }
}
