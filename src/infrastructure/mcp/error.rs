//! MCP error types.

use thiserror::Error;

/// Errors produced by the MCP connection manager and transports.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("MCP server not found: {0}")]
    ServerNotFound(String),

    #[error("MCP server name not allowed: {0}")]
    NameNotAllowed(String),

    #[error("MCP server not connected: {0}")]
    Disconnected(String),

    #[error("Tool not found on server {server}: {tool}")]
    ToolNotFound { server: String, tool: String },

    #[error("Invalid server configuration: {0}")]
    InvalidConfig(String),

    #[error("Transport not supported: {0}")]
    UnsupportedTransport(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("JSON-RPC error: {0}")]
    JsonRpc(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, McpError>;

impl McpError {
    /// Short classification string persisted on health events.
    pub fn class(&self) -> &'static str {
        match self {
            Self::ServerNotFound(_) => "server_not_found",
            Self::NameNotAllowed(_) => "name_not_allowed",
            Self::Disconnected(_) => "disconnected",
            Self::ToolNotFound { .. } => "tool_not_found",
            Self::InvalidConfig(_) => "invalid_config",
            Self::UnsupportedTransport(_) => "unsupported_transport",
            Self::Transport(_) => "transport",
            Self::JsonRpc(_) => "json_rpc",
            Self::Timeout(_) => "timeout",
            Self::Serialization(_) => "serialization",
        }
    }
}
