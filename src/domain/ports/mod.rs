//! Ports: the narrow async interfaces the core consumes.
//!
//! Infrastructure adapters (SQLite repositories, webhook senders, the agent
//! executor) implement these; the services layer depends only on the traits.

pub mod agent;
pub mod alert_store;
pub mod approval;
pub mod job_store;
pub mod mcp_store;
pub mod metric_query;
pub mod metric_store;
pub mod notifier;
pub mod tenant_store;

pub use agent::{AgentRunner, Persona, PersonaStore};
pub use alert_store::AlertStore;
pub use approval::{ApprovalDecision, PendingApprovalStore, ToolApprovalPolicy};
pub use job_store::JobStore;
pub use mcp_store::McpServerStore;
pub use metric_query::{BaselineStats, LatencyPercentiles, MetricQueryService};
pub use metric_store::MetricStore;
pub use notifier::{AlertNotifier, JobNotifier};
pub use tenant_store::TenantStore;
