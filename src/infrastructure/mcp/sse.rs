//! SSE transport: JSON-RPC over HTTP with a server-sent event stream.
//!
//! The client GETs `config["url"]` as an event stream. The server's first
//! `endpoint` event names the URL that requests are POSTed to; responses
//! arrive as `message` events on the stream and are routed to pending
//! requests by id.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use reqwest::Url;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::domain::models::McpServerDefinition;
use crate::infrastructure::mcp::error::{McpError, Result};
use crate::infrastructure::mcp::transport::{McpSession, SessionHandle};

const PROTOCOL_VERSION: &str = "2024-11-05";

pub struct SseTransport {
    server_name: String,
    client: reqwest::Client,
    endpoint: Url,
    pending: Arc<DashMap<i64, oneshot::Sender<Value>>>,
    next_id: AtomicI64,
    request_timeout: Duration,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
    /// Connect the event stream, learn the message endpoint, and complete the
    /// initialize handshake. The whole sequence is bounded by
    /// `connect_timeout`.
    pub async fn open(
        definition: &McpServerDefinition,
        connect_timeout: Duration,
    ) -> Result<SessionHandle> {
        let raw_url = definition.config_str("url").ok_or_else(|| {
            McpError::InvalidConfig(format!("SSE server '{}' has no 'url'", definition.name))
        })?;

        let base_url = Url::parse(raw_url)
            .map_err(|e| McpError::InvalidConfig(format!("invalid url '{raw_url}': {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(McpError::InvalidConfig(format!(
                "url must be absolute http/https: {raw_url}"
            )));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| McpError::Transport(format!("failed to build HTTP client: {e}")))?;

        let response = tokio::time::timeout(
            connect_timeout,
            client
                .get(base_url.clone())
                .header("Accept", "text/event-stream")
                .send(),
        )
        .await
        .map_err(|_| McpError::Timeout(connect_timeout.as_millis() as u64))?
        .map_err(|e| McpError::Transport(format!("SSE connect failed: {e}")))?;

        if !response.status().is_success() {
            return Err(McpError::Transport(format!(
                "SSE connect returned HTTP {}",
                response.status()
            )));
        }

        let pending: Arc<DashMap<i64, oneshot::Sender<Value>>> = Arc::new(DashMap::new());
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();

        let reader_pending = pending.clone();
        let reader_name = definition.name.clone();
        let reader_task = tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut event_name = String::new();
            let mut data = String::new();

            while let Some(chunk) = stream.next().await {
                let Ok(chunk) = chunk else { break };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim_end_matches('\r').to_string();
                    buffer.drain(..=newline);

                    if let Some(rest) = line.strip_prefix("event:") {
                        event_name = rest.trim().to_string();
                    } else if let Some(rest) = line.strip_prefix("data:") {
                        if !data.is_empty() {
                            data.push('\n');
                        }
                        data.push_str(rest.trim_start());
                    } else if line.is_empty() && !data.is_empty() {
                        Self::dispatch_event(
                            &reader_name,
                            &reader_pending,
                            &mut endpoint_tx,
                            &event_name,
                            &data,
                        );
                        event_name.clear();
                        data.clear();
                    }
                }
            }
            tracing::debug!(server_name = %reader_name, "SSE stream closed");
        });

        // The endpoint event must arrive before any request can be sent.
        let endpoint_path = tokio::time::timeout(connect_timeout, endpoint_rx)
            .await
            .map_err(|_| McpError::Timeout(connect_timeout.as_millis() as u64))?
            .map_err(|_| McpError::Transport("SSE stream closed before endpoint event".into()))?;

        let endpoint = base_url
            .join(&endpoint_path)
            .map_err(|e| McpError::Transport(format!("invalid endpoint '{endpoint_path}': {e}")))?;

        let transport = Arc::new(Self {
            server_name: definition.name.clone(),
            client,
            endpoint,
            pending,
            next_id: AtomicI64::new(1),
            request_timeout: connect_timeout,
            reader_task: Mutex::new(Some(reader_task)),
        });

        transport.initialize().await?;
        Ok(transport)
    }

    fn dispatch_event(
        server_name: &str,
        pending: &DashMap<i64, oneshot::Sender<Value>>,
        endpoint_tx: &mut Option<oneshot::Sender<String>>,
        event_name: &str,
        data: &str,
    ) {
        match event_name {
            "endpoint" => {
                if let Some(tx) = endpoint_tx.take() {
                    let _ = tx.send(data.to_string());
                }
            }
            // Unnamed events default to messages per the SSE spec.
            "message" | "" => {
                let Ok(message) = serde_json::from_str::<Value>(data) else {
                    tracing::debug!(server_name = %server_name, "Discarding non-JSON SSE data");
                    return;
                };
                if let Some(id) = message.get("id").and_then(Value::as_i64) {
                    if let Some((_, tx)) = pending.remove(&id) {
                        let _ = tx.send(message);
                    }
                }
            }
            other => {
                tracing::debug!(server_name = %server_name, event = %other, "Ignoring SSE event");
            }
        }
    }

    async fn initialize(&self) -> Result<()> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": { "name": "argus", "version": env!("CARGO_PKG_VERSION") },
            "capabilities": { "tools": {} }
        });
        self.request("initialize", params).await?;
        self.post(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
            "params": {}
        }))
        .await
    }

    async fn post(&self, payload: &Value) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| McpError::Transport(format!("POST failed: {e}")))?;
        if !response.status().is_success() {
            return Err(McpError::Transport(format!(
                "POST returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl McpSession for SseTransport {
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
        if let Err(error) = self.post(&payload).await {
            self.pending.remove(&id);
            return Err(error);
        }

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(McpError::Disconnected(self.server_name.clone())),
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
        if let Some(handle) = self.reader_task.lock().await.take() {
            handle.abort();
        }
        self.pending.clear();
        Ok(())
    }
}
