//! MCP (Model Context Protocol) connection management.
//!
//! Long-lived sessions to external tool servers over stdio and SSE, with a
//! per-server lifecycle state machine, jittered-backoff auto-reconnection,
//! and a fail-soft persistent registry.

pub mod error;
pub mod manager;
pub mod reconnect;
pub mod sse;
pub mod stdio;
pub mod store_sync;
pub mod transport;

pub use error::McpError;
pub use manager::{DuplicateToolHandler, McpConnectionManager, ToolCallback};
pub use reconnect::ReconnectCoordinator;
pub use store_sync::StoreSync;
pub use transport::{DefaultTransportFactory, McpSession, SessionHandle, TransportFactory};
