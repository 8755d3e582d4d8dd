//! Retention sweeper: deletes raw metric rows past their retention window.
//!
//! Runs once a day. Only the append-only metric tables are swept; alerts,
//! jobs, and approvals are audit data retained on the multi-year policy and
//! never touched here.

use chrono::Utc;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::domain::models::config::RetentionConfig;

const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

const METRIC_TABLES: [&str; 9] = [
    "metric_agent_executions",
    "metric_tool_calls",
    "metric_token_usage",
    "metric_sessions",
    "metric_guard_events",
    "metric_mcp_health",
    "metric_quota_events",
    "metric_eval_results",
    "metric_spans",
];

pub struct RetentionSweeper {
    pool: SqlitePool,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(pool: SqlitePool, config: RetentionConfig) -> Self {
        Self { pool, config }
    }

    pub fn start(self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(SWEEP_INTERVAL) => {
                        self.sweep_once().await;
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }

    /// Delete metric rows older than `raw_days`. Returns rows removed.
    pub async fn sweep_once(&self) -> u64 {
        let cutoff = (Utc::now() - chrono::Duration::days(self.config.raw_days)).to_rfc3339();
        let mut removed = 0u64;

        for table in METRIC_TABLES {
            match sqlx::query(&format!("DELETE FROM {table} WHERE time < ?1"))
                .bind(&cutoff)
                .execute(&self.pool)
                .await
            {
                Ok(result) => removed += result.rows_affected(),
                Err(error) => {
                    tracing::warn!(table, %error, "Retention sweep failed for table");
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed, raw_days = self.config.raw_days, "Retention sweep completed");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::connection::DatabaseConnection;

    #[tokio::test]
    async fn old_rows_are_swept_and_fresh_rows_kept() {
        let db = DatabaseConnection::in_memory().await.unwrap();
        db.migrate().await.unwrap();

        let old = (Utc::now() - chrono::Duration::days(120)).to_rfc3339();
        let fresh = Utc::now().to_rfc3339();
        for time in [&old, &fresh] {
            sqlx::query(
                "INSERT INTO metric_quota_events (time, tenant_id, action, current_usage,
                     quota_limit, reason)
                 VALUES (?1, 't1', 'warning', 9, 10, '90% quota used')",
            )
            .bind(time)
            .execute(db.pool())
            .await
            .unwrap();
        }

        let sweeper = RetentionSweeper::new(db.pool().clone(), RetentionConfig::default());
        let removed = sweeper.sweep_once().await;
        assert_eq!(removed, 1);

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM metric_quota_events")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }
}
