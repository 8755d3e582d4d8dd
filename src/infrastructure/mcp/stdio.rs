//! STDIO transport: newline-delimited JSON-RPC over a child process.
//!
//! The server is spawned from `config["command"]` and `config["args"]`.
//! Commands given as paths (containing `/`) must exist on disk before any
//! spawn is attempted. A reader task routes responses to pending requests by
//! id; stderr is drained into the log. Close sends nothing on the wire: the
//! child's stdin is dropped and the process is killed after a grace period.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::domain::models::McpServerDefinition;
use crate::infrastructure::mcp::error::{McpError, Result};
use crate::infrastructure::mcp::transport::{McpSession, SessionHandle};

/// Protocol version sent during the initialize handshake.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Grace period between closing stdin and killing the child.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

pub struct StdioTransport {
    server_name: String,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    pending: Arc<DashMap<i64, oneshot::Sender<Value>>>,
    next_id: AtomicI64,
    request_timeout: Duration,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Spawn the server process and complete the MCP initialize handshake.
    pub async fn open(
        definition: &McpServerDefinition,
        connect_timeout: Duration,
    ) -> Result<SessionHandle> {
        let command = definition
            .config_str("command")
            .ok_or_else(|| {
                McpError::InvalidConfig(format!(
                    "STDIO server '{}' has no 'command'",
                    definition.name
                ))
            })?
            .to_string();

        // Path-like commands must exist; bare names resolve via PATH at spawn.
        if command.contains('/') && !Path::new(&command).exists() {
            return Err(McpError::InvalidConfig(format!(
                "command does not exist: {command}"
            )));
        }

        let args = definition.config_str_array("args");

        let mut child = Command::new(&command)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::Transport(format!("failed to spawn '{command}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("child stdout unavailable".to_string()))?;
        let stderr = child.stderr.take();

        let pending: Arc<DashMap<i64, oneshot::Sender<Value>>> = Arc::new(DashMap::new());

        let reader_pending = pending.clone();
        let reader_name = definition.name.clone();
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(message) = serde_json::from_str::<Value>(&line) else {
                    tracing::debug!(server_name = %reader_name, "Discarding non-JSON line from server");
                    continue;
                };
                if let Some(id) = message.get("id").and_then(Value::as_i64) {
                    if let Some((_, tx)) = reader_pending.remove(&id) {
                        let _ = tx.send(message);
                    }
                }
                // Notifications and unknown ids are ignored.
            }
            tracing::debug!(server_name = %reader_name, "STDIO reader finished");
        });

        if let Some(stderr) = stderr {
            let stderr_name = definition.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server_name = %stderr_name, stderr = %line, "MCP server stderr");
                }
            });
        }

        let transport = Arc::new(Self {
            server_name: definition.name.clone(),
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(Some(stdin)),
            pending,
            next_id: AtomicI64::new(1),
            request_timeout: connect_timeout,
            reader_task: Mutex::new(Some(reader_task)),
        });

        transport.initialize().await?;
        Ok(transport)
    }

    /// MCP handshake: `initialize` request then `notifications/initialized`.
    async fn initialize(&self) -> Result<()> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": { "name": "argus", "version": env!("CARGO_PKG_VERSION") },
            "capabilities": { "tools": {} }
        });
        self.request("initialize", params).await?;
        self.send_notification("notifications/initialized", Value::Object(Default::default()))
            .await
    }

    async fn write_line(&self, payload: &Value) -> Result<()> {
        let mut line = serde_json::to_string(payload)?;
        line.push('\n');

        let mut stdin = self.stdin.lock().await;
        let Some(stdin) = stdin.as_mut() else {
            return Err(McpError::Disconnected(self.server_name.clone()));
        };
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::Transport(format!("stdin write failed: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| McpError::Transport(format!("stdin flush failed: {e}")))
    }

    async fn send_notification(&self, method: &str, params: Value) -> Result<()> {
        self.write_line(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        }))
        .await
    }
}

#[async_trait]
impl McpSession for StdioTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        if let Err(error) = self.write_line(&payload).await {
            self.pending.remove(&id);
            return Err(error);
        }

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(McpError::Disconnected(self.server_name.clone()));
            }
            Err(_) => {
                self.pending.remove(&id);
                return Err(McpError::Timeout(self.request_timeout.as_millis() as u64));
            }
        };

        if let Some(error) = response.get("error") {
            return Err(McpError::JsonRpc(error.to_string()));
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn close(&self) -> Result<()> {
        // Dropping stdin is the graceful signal for a stdio server.
        self.stdin.lock().await.take();

        if let Some(handle) = self.reader_task.lock().await.take() {
            handle.abort();
        }

        let mut child_slot = self.child.lock().await;
        if let Some(mut child) = child_slot.take() {
            match tokio::time::timeout(CLOSE_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(server_name = %self.server_name, %status, "MCP server exited");
                }
                _ => {
                    tracing::warn!(server_name = %self.server_name, "MCP server did not exit; killing");
                    let _ = child.kill().await;
                }
            }
        }
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_command_is_invalid_config() {
        let mut definition = McpServerDefinition::stdio("bad", "x", vec![]);
        definition.config.remove("command");
        let error = StdioTransport::open(&definition, Duration::from_secs(1))
            .await
            .err().expect("expected error");
        assert!(matches!(error, McpError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn nonexistent_path_command_fails_before_spawn() {
        let definition =
            McpServerDefinition::stdio("bad", "/definitely/not/a/real/binary", vec![]);
        let error = StdioTransport::open(&definition, Duration::from_secs(1))
            .await
            .err().expect("expected error");
        assert!(matches!(error, McpError::InvalidConfig(message) if message.contains("does not exist")));
    }
}
