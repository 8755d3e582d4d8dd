//! Argus - observability and control plane for AI-agent runtimes
//!
//! Multi-tenant telemetry and control for agent fleets:
//! - Lock-free metric ingestion pipeline with batch persistence and drop
//!   accounting
//! - Hot-path quota enforcement with a circuit-breaker-guarded slow path
//! - MCP (Model Context Protocol) connection management with jittered
//!   auto-reconnection
//! - Cron-scheduled MCP-tool and agent jobs with retries and execution
//!   history
//! - Alert rules over static thresholds, error-budget burn rates, and
//!   baseline anomalies

pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export the types most integrations touch.
pub use domain::errors::{DomainError, DomainResult, ErrorCode};
pub use domain::models::{Config, MetricEvent, MetricPayload};
pub use infrastructure::database::DatabaseConnection;
pub use services::{MetricPipeline, PipelineHealth, PipelineWriter};
