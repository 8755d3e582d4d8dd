//! MCP connection manager.
//!
//! Keeps one finite state machine per registered server (keyed by name) and
//! serializes connect/disconnect/reconnect per server through a per-server
//! mutex, while different servers proceed independently. Tool callbacks are
//! cached per CONNECTED server; duplicate tool names across servers resolve
//! lexicographically by server name, first one wins.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::domain::models::config::McpConfig;
use crate::domain::models::{McpServerDefinition, McpServerStatus, McpTool};
use crate::infrastructure::mcp::error::{McpError, Result};
use crate::infrastructure::mcp::reconnect::ReconnectCoordinator;
use crate::infrastructure::mcp::store_sync::StoreSync;
use crate::infrastructure::mcp::transport::{
    self, SessionHandle, TransportFactory,
};

/// Callback reported when two servers expose the same tool name:
/// `(tool_name, kept_server, dropped_server)`.
pub type DuplicateToolHandler = Box<dyn Fn(&str, &str, &str) + Send + Sync>;

/// A callable handle to one tool on one connected server.
#[derive(Clone)]
pub struct ToolCallback {
    pub server_name: String,
    pub tool: McpTool,
    session: SessionHandle,
    max_output_chars: usize,
}

impl ToolCallback {
    pub fn name(&self) -> &str {
        &self.tool.name
    }

    /// Invoke the tool. Output is truncated to the configured limit with a
    /// trailing marker.
    pub async fn call(&self, arguments: Value) -> Result<String> {
        let output = transport::call_tool(self.session.as_ref(), &self.tool.name, arguments).await?;
        Ok(transport::truncate_tool_output(&output, self.max_output_chars))
    }
}

struct ServerEntry {
    definition: McpServerDefinition,
    status: McpServerStatus,
    session: Option<SessionHandle>,
    tools: Vec<McpTool>,
}

pub struct McpConnectionManager {
    servers: DashMap<String, ServerEntry>,
    /// One mutex per server; the entry is dropped on unregister.
    locks: DashMap<String, Arc<Mutex<()>>>,
    transports: Arc<dyn TransportFactory>,
    store: StoreSync,
    reconnect: Arc<ReconnectCoordinator>,
    config: McpConfig,
    duplicate_tool_handler: RwLock<Option<DuplicateToolHandler>>,
}

impl McpConnectionManager {
    pub fn new(
        config: McpConfig,
        transports: Arc<dyn TransportFactory>,
        store: StoreSync,
    ) -> Arc<Self> {
        let reconnect = Arc::new(ReconnectCoordinator::new(config.reconnection.clone()));
        Arc::new(Self {
            servers: DashMap::new(),
            locks: DashMap::new(),
            transports,
            store,
            reconnect,
            config,
            duplicate_tool_handler: RwLock::new(None),
        })
    }

    /// Observe duplicate-tool drops (observability hook).
    pub fn set_duplicate_tool_handler(&self, handler: DuplicateToolHandler) {
        if let Ok(mut slot) = self.duplicate_tool_handler.write() {
            *slot = Some(handler);
        }
    }

    pub fn reconnect_coordinator(&self) -> &Arc<ReconnectCoordinator> {
        &self.reconnect
    }

    fn allowlisted(&self, name: &str) -> bool {
        self.config.server_allowlist.is_empty()
            || self.config.server_allowlist.iter().any(|n| n == name)
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.config.connection_timeout_ms)
    }

    fn set_status(&self, name: &str, status: McpServerStatus) {
        if let Some(mut entry) = self.servers.get_mut(name) {
            entry.status = status;
        }
    }

    /// Register (or re-register) a server definition. The server starts in
    /// PENDING; `auto_connect` kicks off a background connect.
    pub async fn register(self: &Arc<Self>, definition: McpServerDefinition) -> Result<()> {
        if !self.allowlisted(&definition.name) {
            return Err(McpError::NameNotAllowed(definition.name));
        }

        let name = definition.name.clone();
        let auto_connect = definition.auto_connect;
        self.store.save_if_absent(&definition).await;
        self.servers.insert(
            name.clone(),
            ServerEntry {
                definition,
                status: McpServerStatus::Pending,
                session: None,
                tools: Vec::new(),
            },
        );
        tracing::info!(server_name = %name, "Registered MCP server");

        if auto_connect {
            let manager = self.clone();
            tokio::spawn(async move {
                manager.connect(&name).await;
            });
        }
        Ok(())
    }

    /// Load persisted definitions into the runtime registry (startup path).
    pub async fn restore_from_store(self: &Arc<Self>) -> usize {
        let definitions = self.store.load_all().await;
        let mut restored = 0;
        for definition in definitions {
            if self.servers.contains_key(&definition.name) {
                continue;
            }
            if self.register(definition).await.is_ok() {
                restored += 1;
            }
        }
        restored
    }

    pub fn server_exists(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    pub fn status(&self, name: &str) -> Option<McpServerStatus> {
        self.servers.get(name).map(|entry| entry.status)
    }

    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Connect one server. Returns `true` on CONNECTED.
    ///
    /// The per-server mutex makes concurrent connects/disconnects for the
    /// same name execute in a total order.
    pub async fn connect(self: &Arc<Self>, name: &str) -> bool {
        let Some(definition) = self.servers.get(name).map(|e| e.definition.clone()) else {
            tracing::warn!(server_name = %name, "Connect requested for unknown server");
            return false;
        };

        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        // Re-check under the lock: a concurrent unregister may have won.
        if !self.servers.contains_key(name) {
            return false;
        }

        self.set_status(name, McpServerStatus::Connecting);
        let started = std::time::Instant::now();

        match self.transports.open(&definition, self.connect_timeout()).await {
            Ok(session) => match transport::list_tools(session.as_ref()).await {
                Ok(tools) => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    tracing::info!(
                        server_name = %name,
                        tool_count = tools.len(),
                        elapsed_ms,
                        "MCP server connected"
                    );
                    if let Some(mut entry) = self.servers.get_mut(name) {
                        entry.session = Some(session);
                        entry.tools = tools;
                        entry.status = McpServerStatus::Connected;
                    }
                    self.reconnect.cancel(name);
                    true
                }
                Err(error) => {
                    tracing::warn!(server_name = %name, %error, "Tool discovery failed");
                    let _ = session.close().await;
                    self.fail_and_schedule(name).await;
                    false
                }
            },
            Err(error) => {
                tracing::warn!(server_name = %name, %error, "MCP connect failed");
                self.fail_and_schedule(name).await;
                false
            }
        }
    }

    async fn fail_and_schedule(self: &Arc<Self>, name: &str) {
        self.set_status(name, McpServerStatus::Failed);
        self.reconnect.schedule(self.clone(), name.to_string());
    }

    /// Disconnect one server: graceful close with hard-close fallback, cached
    /// tools cleared, pending reconnection cancelled.
    pub async fn disconnect(&self, name: &str) -> bool {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        // Take the session out under the registry entry, then close it
        // without holding the entry guard across the await.
        let session = {
            let Some(mut entry) = self.servers.get_mut(name) else {
                return false;
            };
            let session = entry.session.take();
            entry.tools.clear();
            entry.status = McpServerStatus::Disconnected;
            session
        };
        if let Some(session) = session {
            if let Err(error) = session.close().await {
                tracing::warn!(server_name = %name, %error, "Graceful close failed; session dropped");
            }
        }

        self.reconnect.cancel(name);
        tracing::info!(server_name = %name, "MCP server disconnected");
        true
    }

    /// Disconnect, remove from the runtime registry, delete from the
    /// persistent store (fail-soft), and drop per-server state.
    pub async fn unregister(&self, name: &str) -> bool {
        if !self.servers.contains_key(name) {
            return false;
        }
        self.disconnect(name).await;
        self.servers.remove(name);
        self.store.delete(name).await;
        self.locks.remove(name);
        self.reconnect.cancel(name);
        tracing::info!(server_name = %name, "Unregistered MCP server");
        true
    }

    /// Best-effort guarantee of a live connection before a tool call.
    ///
    /// CONNECTED is true; CONNECTING/PENDING are false (an attempt is either
    /// in flight or owned by the caller that registered); FAILED/DISCONNECTED
    /// trigger one synchronous connect when reconnection is enabled.
    pub async fn ensure_connected(self: &Arc<Self>, name: &str) -> bool {
        match self.status(name) {
            Some(McpServerStatus::Connected) => true,
            Some(McpServerStatus::Connecting | McpServerStatus::Pending) => false,
            Some(McpServerStatus::Failed | McpServerStatus::Disconnected) => {
                if self.config.reconnection.enabled {
                    self.connect(name).await
                } else {
                    false
                }
            }
            Some(McpServerStatus::Disabled) | None => false,
        }
    }

    /// Look up one tool on one server.
    pub fn find_tool(&self, server_name: &str, tool_name: &str) -> Result<ToolCallback> {
        let entry = self
            .servers
            .get(server_name)
            .ok_or_else(|| McpError::ServerNotFound(server_name.to_string()))?;
        if entry.status != McpServerStatus::Connected {
            return Err(McpError::Disconnected(server_name.to_string()));
        }
        let session = entry
            .session
            .clone()
            .ok_or_else(|| McpError::Disconnected(server_name.to_string()))?;
        let tool = entry
            .tools
            .iter()
            .find(|tool| tool.name == tool_name)
            .cloned()
            .ok_or_else(|| McpError::ToolNotFound {
                server: server_name.to_string(),
                tool: tool_name.to_string(),
            })?;

        Ok(ToolCallback {
            server_name: server_name.to_string(),
            tool,
            session,
            max_output_chars: self.config.max_tool_output_length,
        })
    }

    /// All tool callbacks across connected servers, in lexicographic server
    /// order. Duplicate tool names keep the first server's tool; drops are
    /// reported through the duplicate-tool handler.
    pub fn get_all_tool_callbacks(&self) -> Vec<ToolCallback> {
        let mut callbacks: Vec<ToolCallback> = Vec::new();
        let mut seen: std::collections::HashMap<String, String> = std::collections::HashMap::new();

        for server_name in self.server_names() {
            let Some(entry) = self.servers.get(&server_name) else {
                continue;
            };
            if entry.status != McpServerStatus::Connected {
                continue;
            }
            let Some(session) = entry.session.clone() else {
                continue;
            };
            for tool in &entry.tools {
                if let Some(kept_server) = seen.get(&tool.name) {
                    if let Ok(handler) = self.duplicate_tool_handler.read() {
                        if let Some(handler) = handler.as_ref() {
                            handler(&tool.name, kept_server, &server_name);
                        }
                    }
                    tracing::debug!(
                        tool_name = %tool.name,
                        kept_server = %kept_server,
                        dropped_server = %server_name,
                        "Duplicate MCP tool name dropped"
                    );
                    continue;
                }
                seen.insert(tool.name.clone(), server_name.clone());
                callbacks.push(ToolCallback {
                    server_name: server_name.clone(),
                    tool: tool.clone(),
                    session: session.clone(),
                    max_output_chars: self.config.max_tool_output_length,
                });
            }
        }
        callbacks
    }

    /// Close every session and stop all reconnection work.
    pub async fn shutdown(&self) {
        self.reconnect.shutdown();
        let names: Vec<String> = self.servers.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.disconnect(&name).await;
        }
    }
}
