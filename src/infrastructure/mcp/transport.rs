//! Transport abstraction for MCP sessions.
//!
//! A [`Transport`] opens one [`McpSession`] per server from its definition;
//! the connection manager is generic over the factory so tests can inject a
//! scripted one. Production wiring uses [`DefaultTransportFactory`], which
//! dispatches STDIO and SSE and rejects HTTP as unsupported.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::models::{McpServerDefinition, McpTool, McpTransportType};
use crate::infrastructure::mcp::error::{McpError, Result};
use crate::infrastructure::mcp::sse::SseTransport;
use crate::infrastructure::mcp::stdio::StdioTransport;

/// A live JSON-RPC session with one MCP server.
#[async_trait]
pub trait McpSession: Send + Sync {
    /// Issue one request and await its response `result`.
    async fn request(&self, method: &str, params: Value) -> Result<Value>;

    /// Graceful close; implementations fall back to a hard close internally.
    async fn close(&self) -> Result<()>;
}

/// Shared session handle.
pub type SessionHandle = Arc<dyn McpSession>;

/// Opens sessions for server definitions.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(
        &self,
        definition: &McpServerDefinition,
        connect_timeout: Duration,
    ) -> Result<SessionHandle>;
}

/// Production factory: STDIO and SSE, HTTP unsupported.
pub struct DefaultTransportFactory;

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn open(
        &self,
        definition: &McpServerDefinition,
        connect_timeout: Duration,
    ) -> Result<SessionHandle> {
        match definition.transport {
            McpTransportType::Stdio => StdioTransport::open(definition, connect_timeout).await,
            McpTransportType::Sse => SseTransport::open(definition, connect_timeout).await,
            McpTransportType::Http => Err(McpError::UnsupportedTransport(
                "HTTP transport is not supported at this time".to_string(),
            )),
        }
    }
}

/// List the tools exposed by a session (`tools/list`).
pub async fn list_tools(session: &dyn McpSession) -> Result<Vec<McpTool>> {
    let response = session.request("tools/list", Value::Object(Default::default())).await?;
    let tools = response
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| McpError::JsonRpc("tools/list response missing 'tools'".to_string()))?;

    Ok(tools
        .iter()
        .filter_map(|tool| {
            Some(McpTool {
                name: tool.get("name")?.as_str()?.to_string(),
                description: tool
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                input_schema: tool
                    .get("inputSchema")
                    .cloned()
                    .unwrap_or(Value::Object(Default::default())),
            })
        })
        .collect())
}

/// Invoke one tool (`tools/call`) and flatten its content to text.
pub async fn call_tool(session: &dyn McpSession, tool: &str, arguments: Value) -> Result<String> {
    let response = session
        .request(
            "tools/call",
            serde_json::json!({ "name": tool, "arguments": arguments }),
        )
        .await?;

    if response
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return Err(McpError::JsonRpc(render_content(&response)));
    }
    Ok(render_content(&response))
}

/// Concatenate the text blocks of a tool result.
fn render_content(result: &Value) -> String {
    match result.get("content").and_then(Value::as_array) {
        Some(blocks) => blocks
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        None => result.to_string(),
    }
}

/// Truncate tool output with a visible marker.
pub fn truncate_tool_output(output: &str, max_chars: usize) -> String {
    let total = output.chars().count();
    if total <= max_chars {
        return output.to_string();
    }
    let kept: String = output.chars().take(max_chars).collect();
    format!(
        "{kept}[TRUNCATED: output was {total} characters, limit is {max_chars}]"
    )
}
