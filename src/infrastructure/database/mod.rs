//! SQLite persistence: connection, migrations, stores and repositories.

pub mod alert_repo;
pub mod connection;
pub mod job_repo;
pub mod mcp_server_repo;
pub mod metric_query;
pub mod metric_store;
pub mod migrations;
pub mod retention;
pub mod tenant_repo;

pub use alert_repo::SqliteAlertRepository;
pub use connection::DatabaseConnection;
pub use job_repo::SqliteJobRepository;
pub use mcp_server_repo::SqliteMcpServerRepository;
pub use metric_query::SqliteMetricQueryService;
pub use metric_store::SqliteMetricStore;
pub use retention::RetentionSweeper;
pub use tenant_repo::SqliteTenantRepository;
