//! Embedded, versioned schema migrations.

use sqlx::SqlitePool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Failed to execute migration {version}: {source}")]
    ExecutionError {
        version: i64,
        #[source]
        source: sqlx::Error,
    },
    #[error("Failed to get schema version: {0}")]
    VersionCheckError(#[source] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
}

pub struct Migrator {
    pool: SqlitePool,
}

impl Migrator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply every embedded migration newer than the current schema version.
    /// Returns the number applied.
    pub async fn run_embedded_migrations(&self) -> Result<usize, MigrationError> {
        self.ensure_migrations_table().await?;
        let current_version = self.get_current_version().await?;

        let all_migrations = embedded_migrations();
        let pending: Vec<&Migration> = all_migrations
            .iter()
            .filter(|m| m.version > current_version)
            .collect();

        for migration in &pending {
            self.apply(migration).await?;
        }
        Ok(pending.len())
    }

    async fn ensure_migrations_table(&self) -> Result<(), MigrationError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now')),
                description TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MigrationError::ExecutionError {
            version: 0,
            source: e,
        })?;
        Ok(())
    }

    pub async fn get_current_version(&self) -> Result<i64, MigrationError> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
                .fetch_one(&self.pool)
                .await
                .map_err(MigrationError::VersionCheckError)?;
        Ok(version.unwrap_or(0))
    }

    async fn apply(&self, migration: &Migration) -> Result<(), MigrationError> {
        for statement in migration
            .sql
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| MigrationError::ExecutionError {
                    version: migration.version,
                    source: e,
                })?;
        }

        sqlx::query("INSERT INTO schema_migrations (version, description) VALUES (?1, ?2)")
            .bind(migration.version)
            .bind(migration.description)
            .execute(&self.pool)
            .await
            .map_err(|e| MigrationError::ExecutionError {
                version: migration.version,
                source: e,
            })?;

        tracing::debug!(
            version = migration.version,
            description = migration.description,
            "Applied migration"
        );
        Ok(())
    }
}

/// Full schema, one migration per concern.
pub fn embedded_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "metric tables",
            sql: r"
            CREATE TABLE IF NOT EXISTS metric_agent_executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                time TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                run_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                session_id TEXT,
                channel TEXT,
                success INTEGER NOT NULL,
                error_code TEXT,
                duration_ms INTEGER NOT NULL,
                llm_duration_ms INTEGER NOT NULL,
                tool_duration_ms INTEGER NOT NULL,
                guard_duration_ms INTEGER NOT NULL,
                queue_wait_ms INTEGER NOT NULL,
                tool_count INTEGER NOT NULL,
                persona_id TEXT,
                prompt_template_id TEXT,
                intent_category TEXT,
                guard_rejected INTEGER NOT NULL,
                guard_stage TEXT,
                guard_category TEXT,
                fallback_used INTEGER NOT NULL,
                retry_count INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_agent_exec_tenant_time
                ON metric_agent_executions (tenant_id, time);
            CREATE TABLE IF NOT EXISTS metric_tool_calls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                time TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                run_id TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                tool_source TEXT NOT NULL,
                mcp_server_name TEXT,
                call_index INTEGER NOT NULL,
                success INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                error_class TEXT,
                error_message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_tool_calls_tenant_time
                ON metric_tool_calls (tenant_id, time);
            CREATE TABLE IF NOT EXISTS metric_token_usage (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                time TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                run_id TEXT NOT NULL,
                model TEXT NOT NULL,
                provider TEXT NOT NULL,
                step_type TEXT,
                prompt_tokens INTEGER NOT NULL,
                completion_tokens INTEGER NOT NULL,
                reasoning_tokens INTEGER NOT NULL,
                total_tokens INTEGER NOT NULL,
                estimated_cost_usd REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_token_usage_tenant_time
                ON metric_token_usage (tenant_id, time);
            CREATE TABLE IF NOT EXISTS metric_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                time TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                user_id TEXT,
                channel TEXT,
                turn_count INTEGER NOT NULL,
                total_duration_ms INTEGER NOT NULL,
                total_tokens INTEGER NOT NULL,
                total_cost_usd REAL NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT NOT NULL,
                outcome TEXT
            );
            CREATE TABLE IF NOT EXISTS metric_guard_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                time TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                user_id TEXT,
                channel TEXT,
                stage TEXT NOT NULL,
                category TEXT NOT NULL,
                reason_class TEXT,
                reason_detail TEXT,
                is_output_guard INTEGER NOT NULL,
                action TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS metric_mcp_health (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                time TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                server_name TEXT NOT NULL,
                status TEXT NOT NULL,
                response_time_ms INTEGER NOT NULL,
                error_class TEXT,
                error_message TEXT,
                tool_count INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_mcp_health_tenant_time
                ON metric_mcp_health (tenant_id, time);
            CREATE TABLE IF NOT EXISTS metric_quota_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                time TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                action TEXT NOT NULL,
                current_usage INTEGER NOT NULL,
                quota_limit INTEGER NOT NULL,
                reason TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS metric_eval_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                time TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                eval_run_id TEXT NOT NULL,
                test_case_id TEXT NOT NULL,
                pass INTEGER NOT NULL,
                score REAL NOT NULL,
                latency_ms INTEGER NOT NULL,
                token_usage INTEGER NOT NULL,
                cost REAL NOT NULL,
                assertion_type TEXT NOT NULL,
                failure_class TEXT,
                failure_detail TEXT,
                tags TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS metric_spans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                time TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                run_id TEXT NOT NULL,
                name TEXT NOT NULL,
                start_ms INTEGER NOT NULL,
                end_ms INTEGER NOT NULL,
                attributes TEXT
            )",
        },
        Migration {
            version: 2,
            description: "tenants",
            sql: r"
            CREATE TABLE IF NOT EXISTS tenants (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                plan TEXT NOT NULL,
                status TEXT NOT NULL,
                max_requests_per_month INTEGER NOT NULL,
                max_tokens_per_month INTEGER NOT NULL,
                max_users INTEGER NOT NULL,
                max_agents INTEGER NOT NULL,
                max_mcp_servers INTEGER NOT NULL,
                slo_availability REAL NOT NULL,
                slo_latency_p99_ms INTEGER NOT NULL
            )",
        },
        Migration {
            version: 3,
            description: "alert rules and instances",
            sql: r"
            CREATE TABLE IF NOT EXISTS alert_rules (
                id TEXT PRIMARY KEY,
                tenant_id TEXT,
                name TEXT NOT NULL,
                rule_type TEXT NOT NULL,
                metric TEXT NOT NULL,
                threshold REAL NOT NULL,
                window_minutes INTEGER NOT NULL,
                severity TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                platform_only INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS alert_instances (
                id TEXT PRIMARY KEY,
                rule_id TEXT NOT NULL,
                tenant_id TEXT,
                severity TEXT NOT NULL,
                status TEXT NOT NULL,
                message TEXT NOT NULL,
                metric_value REAL NOT NULL,
                threshold REAL NOT NULL,
                fired_at TEXT NOT NULL,
                resolved_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_alert_instances_rule_status
                ON alert_instances (rule_id, status)",
        },
        Migration {
            version: 4,
            description: "mcp servers",
            sql: r"
            CREATE TABLE IF NOT EXISTS mcp_servers (
                name TEXT PRIMARY KEY,
                transport TEXT NOT NULL,
                config TEXT NOT NULL,
                version TEXT,
                auto_connect INTEGER NOT NULL DEFAULT 1,
                description TEXT
            )",
        },
        Migration {
            version: 5,
            description: "scheduled jobs and executions",
            sql: r"
            CREATE TABLE IF NOT EXISTS scheduled_jobs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                cron_expression TEXT NOT NULL,
                timezone TEXT NOT NULL,
                job_type TEXT NOT NULL,
                mcp_server_name TEXT,
                tool_name TEXT,
                tool_arguments TEXT,
                agent_prompt TEXT,
                persona_id TEXT,
                agent_system_prompt TEXT,
                agent_model TEXT,
                agent_max_tool_calls INTEGER,
                retry_on_failure INTEGER NOT NULL DEFAULT 0,
                max_retry_count INTEGER NOT NULL DEFAULT 0,
                execution_timeout_ms INTEGER,
                slack_channel_id TEXT,
                teams_webhook_url TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                last_run_at TEXT,
                last_status TEXT,
                last_result TEXT
            );
            CREATE TABLE IF NOT EXISTS scheduled_job_executions (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                job_name TEXT NOT NULL,
                status TEXT NOT NULL,
                result TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                dry_run INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_job_executions_job
                ON scheduled_job_executions (job_id, started_at)",
        },
        Migration {
            version: 6,
            description: "tool policy and pending approvals",
            sql: r"
            CREATE TABLE IF NOT EXISTS tool_policy (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                server_name TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                requires_approval INTEGER NOT NULL DEFAULT 0,
                UNIQUE (server_name, tool_name)
            );
            CREATE TABLE IF NOT EXISTS pending_approvals (
                id TEXT PRIMARY KEY,
                server_name TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                arguments TEXT NOT NULL,
                requested_by TEXT NOT NULL,
                status TEXT NOT NULL,
                requested_at TEXT NOT NULL,
                decided_at TEXT
            )",
        },
    ]
}
