//! Fail-soft wrapper over the persistent MCP server store.
//!
//! The runtime registry in the connection manager is authoritative; the
//! persistent store only survives restarts. Every error from the underlying
//! store is logged and swallowed so a broken database never takes MCP
//! connectivity down with it.

use std::sync::Arc;

use crate::domain::models::McpServerDefinition;
use crate::domain::ports::McpServerStore;

#[derive(Clone, Default)]
pub struct StoreSync {
    inner: Option<Arc<dyn McpServerStore>>,
}

impl StoreSync {
    pub fn new(store: Arc<dyn McpServerStore>) -> Self {
        Self { inner: Some(store) }
    }

    /// No persistence; every call is a no-op. Used by tests and ephemeral
    /// deployments.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// All persisted definitions, or empty when the store is unavailable.
    pub async fn load_all(&self) -> Vec<McpServerDefinition> {
        let Some(store) = &self.inner else {
            return Vec::new();
        };
        match store.load_all().await {
            Ok(definitions) => definitions,
            Err(error) => {
                tracing::warn!(%error, "Failed to load MCP servers from store; using runtime registry only");
                Vec::new()
            }
        }
    }

    /// Persist a definition unless one with the same name exists.
    pub async fn save_if_absent(&self, definition: &McpServerDefinition) {
        let Some(store) = &self.inner else { return };
        if let Err(error) = store.save_if_absent(definition).await {
            tracing::warn!(
                server_name = %definition.name,
                %error,
                "Failed to persist MCP server definition"
            );
        }
    }

    pub async fn delete(&self, name: &str) {
        let Some(store) = &self.inner else { return };
        if let Err(error) = store.delete(name).await {
            tracing::warn!(server_name = %name, %error, "Failed to delete MCP server definition");
        }
    }
}
