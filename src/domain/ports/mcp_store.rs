//! MCP server definition persistence port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::McpServerDefinition;

/// Durable registry of MCP server definitions. The runtime registry in the
/// connection manager is authoritative for the current process; this store
/// only survives restarts, and every call through `StoreSync` is fail-soft.
#[async_trait]
pub trait McpServerStore: Send + Sync {
    async fn load_all(&self) -> DomainResult<Vec<McpServerDefinition>>;

    async fn find_by_name(&self, name: &str) -> DomainResult<Option<McpServerDefinition>>;

    /// Insert the definition unless one with the same name already exists.
    /// Idempotent on `name`.
    async fn save_if_absent(&self, definition: &McpServerDefinition) -> DomainResult<()>;

    async fn delete(&self, name: &str) -> DomainResult<()>;
}
