//! MCP server domain model: definitions, transports, lifecycle states.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Wire transport used to reach an MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum McpTransportType {
    Stdio,
    Sse,
    Http,
}

impl McpTransportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "STDIO",
            Self::Sse => "SSE",
            Self::Http => "HTTP",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "STDIO" => Some(Self::Stdio),
            "SSE" => Some(Self::Sse),
            "HTTP" => Some(Self::Http),
            _ => None,
        }
    }
}

/// Connection lifecycle state of a registered server.
///
/// ```text
/// PENDING --connect--> CONNECTING --success--> CONNECTED
///                                  `-failure-> FAILED --(backoff)--> CONNECTING
/// CONNECTED --disconnect--> DISCONNECTED
/// CONNECTED --transport error--> FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum McpServerStatus {
    Pending,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Disabled,
}

impl McpServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Disconnected => "DISCONNECTED",
            Self::Failed => "FAILED",
            Self::Disabled => "DISABLED",
        }
    }
}

impl std::fmt::Display for McpServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registered definition of an MCP server. `name` is the identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerDefinition {
    pub name: String,
    pub transport: McpTransportType,
    /// Transport-specific settings: `command`/`args` for STDIO, `url` for SSE.
    pub config: HashMap<String, Value>,
    pub version: Option<String>,
    pub auto_connect: bool,
    pub description: Option<String>,
}

impl McpServerDefinition {
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        let mut config = HashMap::new();
        config.insert("command".to_string(), Value::String(command.into()));
        config.insert(
            "args".to_string(),
            Value::Array(args.into_iter().map(Value::String).collect()),
        );
        Self {
            name: name.into(),
            transport: McpTransportType::Stdio,
            config,
            version: None,
            auto_connect: true,
            description: None,
        }
    }

    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        let mut config = HashMap::new();
        config.insert("url".to_string(), Value::String(url.into()));
        Self {
            name: name.into(),
            transport: McpTransportType::Sse,
            config,
            version: None,
            auto_connect: true,
            description: None,
        }
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    pub fn config_str_array(&self, key: &str) -> Vec<String> {
        self.config
            .get(key)
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A tool discovered on a connected server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}
