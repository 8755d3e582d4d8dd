//! Infrastructure layer: configuration, logging, persistence, MCP
//! transports, and outbound notifications.

pub mod config;
pub mod database;
pub mod logging;
pub mod mcp;
pub mod notify;
