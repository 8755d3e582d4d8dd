//! Scheduled job persistence port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{JobExecution, JobRunStatus, ScheduledJob};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn list_enabled(&self) -> DomainResult<Vec<ScheduledJob>>;

    async fn find_by_id(&self, id: Uuid) -> DomainResult<Option<ScheduledJob>>;

    async fn find_by_name(&self, name: &str) -> DomainResult<Option<ScheduledJob>>;

    /// Insert or update a job definition (unique on `name`).
    async fn save(&self, job: &ScheduledJob) -> DomainResult<()>;

    async fn delete(&self, id: Uuid) -> DomainResult<()>;

    /// Update only the run-state columns of a job.
    async fn update_run_state(
        &self,
        id: Uuid,
        status: JobRunStatus,
        last_run_at: Option<DateTime<Utc>>,
        last_result: Option<&str>,
    ) -> DomainResult<()>;

    async fn record_execution(&self, execution: &JobExecution) -> DomainResult<()>;

    async fn list_executions(&self, job_id: Uuid, limit: usize) -> DomainResult<Vec<JobExecution>>;
}
