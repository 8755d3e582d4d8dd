//! Background reconnection with jittered exponential backoff.
//!
//! At most one reconnection task runs per server: scheduling is deduplicated
//! on the in-flight map, and the entry is cleared before the task exits so a
//! later failure can schedule again. Delays follow
//! `min(initial * multiplier^(attempt-1), max_delay)` with ±25% jitter,
//! clamped at zero. Every sleep observes the shutdown signal.

use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::domain::models::config::ReconnectionConfig;
use crate::domain::models::McpServerStatus;
use crate::infrastructure::mcp::manager::McpConnectionManager;

pub struct ReconnectCoordinator {
    config: ReconnectionConfig,
    inflight: DashMap<String, JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ReconnectCoordinator {
    pub fn new(config: ReconnectionConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            inflight: DashMap::new(),
            shutdown_tx,
        }
    }

    /// True while a reconnection task exists for the server.
    pub fn is_scheduled(&self, server_name: &str) -> bool {
        self.inflight.contains_key(server_name)
    }

    /// Schedule background reconnection for a server. No-op when disabled or
    /// when a task is already in flight for this server.
    pub fn schedule(self: &Arc<Self>, manager: Arc<McpConnectionManager>, server_name: String) {
        if !self.config.enabled {
            return;
        }

        match self.inflight.entry(server_name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {}
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let coordinator = self.clone();
                let name = server_name.clone();
                let handle = tokio::spawn(async move {
                    coordinator.run(manager, &name).await;
                    coordinator.inflight.remove(&name);
                });
                slot.insert(handle);
                tracing::debug!(server_name = %server_name, "Scheduled MCP reconnection");
            }
        }
    }

    /// Cancel any pending reconnection for a server.
    pub fn cancel(&self, server_name: &str) {
        if let Some((_, handle)) = self.inflight.remove(server_name) {
            handle.abort();
            tracing::debug!(server_name = %server_name, "Cancelled MCP reconnection");
        }
    }

    /// Stop all reconnection work. Sleeping tasks wake and exit, clearing
    /// their in-flight flags.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let names: Vec<String> = self.inflight.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.cancel(&name);
        }
    }

    /// Backoff delay for a 1-based attempt number.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        let base = (self.config.initial_delay_ms as f64
            * self.config.multiplier.powi(attempt.saturating_sub(1) as i32))
        .min(self.config.max_delay_ms as f64);
        let jitter = base * 0.25 * rand::thread_rng().gen_range(-1.0..=1.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = (base + jitter).max(0.0) as u64;
        Duration::from_millis(millis)
    }

    async fn run(&self, manager: Arc<McpConnectionManager>, server_name: &str) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        for attempt in 1..=self.config.max_attempts {
            let delay = self.delay_for_attempt(attempt);
            tracing::debug!(
                server_name = %server_name,
                attempt,
                max_attempts = self.config.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Waiting before reconnection attempt"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => {
                    tracing::debug!(server_name = %server_name, "Reconnection loop shut down");
                    return;
                }
            }

            // The caller may have resolved the situation while we slept:
            // unregistered, reconnected out of band, or explicitly
            // disconnected.
            if !manager.server_exists(server_name) {
                return;
            }
            match manager.status(server_name) {
                Some(McpServerStatus::Connected | McpServerStatus::Disconnected) | None => return,
                _ => {}
            }

            if manager.connect(server_name).await {
                tracing::info!(server_name = %server_name, attempt, "Reconnection succeeded");
                return;
            }
        }

        tracing::warn!(
            server_name = %server_name,
            max_attempts = self.config.max_attempts,
            "Reconnection attempts exhausted"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> ReconnectionConfig {
        ReconnectionConfig {
            enabled: true,
            max_attempts: 3,
            initial_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 1_000,
        }
    }

    #[test]
    fn delay_respects_bounds_and_jitter() {
        let coordinator = ReconnectCoordinator::new(fast_config());

        for attempt in 1..=5 {
            let base = (100.0_f64 * 2.0_f64.powi(attempt - 1)).min(1_000.0);
            for _ in 0..50 {
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                let delay = coordinator.delay_for_attempt(attempt as u32).as_millis() as f64;
                assert!(delay >= base * 0.75 - 1.0, "delay {delay} below jitter floor");
                assert!(delay <= base * 1.25 + 1.0, "delay {delay} above jitter ceiling");
            }
        }
    }

    #[test]
    fn delay_caps_at_max() {
        let coordinator = ReconnectCoordinator::new(fast_config());
        // Attempt 10 would be 100 * 2^9 = 51_200 without the cap.
        let delay = coordinator.delay_for_attempt(10).as_millis();
        assert!(delay <= 1_250);
    }

    #[tokio::test]
    async fn disabled_config_never_schedules() {
        let mut config = fast_config();
        config.enabled = false;
        let coordinator = Arc::new(ReconnectCoordinator::new(config));

        let manager = McpConnectionManager::new(
            crate::domain::models::config::McpConfig::default(),
            Arc::new(crate::infrastructure::mcp::transport::DefaultTransportFactory),
            crate::infrastructure::mcp::store_sync::StoreSync::disabled(),
        );
        coordinator.schedule(manager, "server".to_string());
        assert!(!coordinator.is_scheduled("server"));
    }
}
