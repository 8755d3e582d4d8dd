//! SQLite MCP server definition repository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{McpServerDefinition, McpTransportType};
use crate::domain::ports::McpServerStore;

#[derive(Clone)]
pub struct SqliteMcpServerRepository {
    pool: SqlitePool,
}

impl SqliteMcpServerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ServerRow {
    name: String,
    transport: String,
    config: String,
    version: Option<String>,
    auto_connect: i64,
    description: Option<String>,
}

impl ServerRow {
    fn into_definition(self) -> DomainResult<McpServerDefinition> {
        let config: HashMap<String, serde_json::Value> = serde_json::from_str(&self.config)?;
        Ok(McpServerDefinition {
            transport: McpTransportType::from_str(&self.transport).ok_or_else(|| {
                DomainError::ValidationFailed(format!("bad transport '{}'", self.transport))
            })?,
            name: self.name,
            config,
            version: self.version,
            auto_connect: self.auto_connect != 0,
            description: self.description,
        })
    }
}

#[async_trait]
impl McpServerStore for SqliteMcpServerRepository {
    async fn load_all(&self) -> DomainResult<Vec<McpServerDefinition>> {
        let rows: Vec<ServerRow> = sqlx::query_as(
            "SELECT name, transport, config, version, auto_connect, description
             FROM mcp_servers ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ServerRow::into_definition).collect()
    }

    async fn find_by_name(&self, name: &str) -> DomainResult<Option<McpServerDefinition>> {
        let row: Option<ServerRow> = sqlx::query_as(
            "SELECT name, transport, config, version, auto_connect, description
             FROM mcp_servers WHERE name = ?1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ServerRow::into_definition).transpose()
    }

    async fn save_if_absent(&self, definition: &McpServerDefinition) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO mcp_servers (name, transport, config, version, auto_connect, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(&definition.name)
        .bind(definition.transport.as_str())
        .bind(serde_json::to_string(&definition.config)?)
        .bind(&definition.version)
        .bind(i64::from(definition.auto_connect))
        .bind(&definition.description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> DomainResult<()> {
        sqlx::query("DELETE FROM mcp_servers WHERE name = ?1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
