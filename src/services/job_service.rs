//! Scheduled job management: validation and CRUD over the job store.
//!
//! Cron expressions accept the classic 5-field form (minute hour day month
//! weekday) or the 6/7-field form with seconds; 5-field expressions are
//! normalized by prefixing a `0` seconds field. Invalid cron expressions and
//! unknown IANA timezones are rejected before anything is persisted.

use chrono_tz::Tz;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{JobExecution, ScheduledJob};
use crate::domain::ports::JobStore;

/// Normalize a cron expression to the seconds-bearing form the parser
/// expects.
pub fn normalize_cron(expression: &str) -> String {
    let fields = expression.split_whitespace().count();
    if fields == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}

/// Parse and validate a cron expression.
pub fn parse_cron(expression: &str) -> DomainResult<cron::Schedule> {
    cron::Schedule::from_str(&normalize_cron(expression)).map_err(|e| {
        DomainError::ValidationFailed(format!("invalid cron expression '{expression}': {e}"))
    })
}

/// Parse and validate an IANA timezone name.
pub fn parse_timezone(timezone: &str) -> DomainResult<Tz> {
    Tz::from_str(timezone)
        .map_err(|_| DomainError::ValidationFailed(format!("invalid timezone '{timezone}'")))
}

pub struct JobService<S: JobStore> {
    store: Arc<S>,
}

impl<S: JobStore> JobService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    fn validate(job: &ScheduledJob) -> DomainResult<()> {
        if job.name.trim().is_empty() {
            return Err(DomainError::ValidationFailed("job name is empty".into()));
        }
        parse_cron(&job.cron_expression)?;
        parse_timezone(&job.timezone)?;
        Ok(())
    }

    pub async fn create(&self, job: ScheduledJob) -> DomainResult<ScheduledJob> {
        Self::validate(&job)?;
        if self.store.find_by_name(&job.name).await?.is_some() {
            return Err(DomainError::ValidationFailed(format!(
                "job '{}' already exists",
                job.name
            )));
        }
        self.store.save(&job).await?;
        Ok(job)
    }

    pub async fn update(&self, job: ScheduledJob) -> DomainResult<ScheduledJob> {
        Self::validate(&job)?;
        if self.store.find_by_id(job.id).await?.is_none() {
            return Err(DomainError::JobNotFound(job.name.clone()));
        }
        self.store.save(&job).await?;
        Ok(job)
    }

    pub async fn delete(&self, id: Uuid) -> DomainResult<()> {
        self.store.delete(id).await
    }

    pub async fn get(&self, id: Uuid) -> DomainResult<Option<ScheduledJob>> {
        self.store.find_by_id(id).await
    }

    pub async fn get_by_name(&self, name: &str) -> DomainResult<Option<ScheduledJob>> {
        self.store.find_by_name(name).await
    }

    pub async fn list_enabled(&self) -> DomainResult<Vec<ScheduledJob>> {
        self.store.list_enabled().await
    }

    pub async fn set_enabled(&self, id: Uuid, enabled: bool) -> DomainResult<ScheduledJob> {
        let mut job = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| DomainError::JobNotFound(id.to_string()))?;
        job.enabled = enabled;
        self.store.save(&job).await?;
        Ok(job)
    }

    pub async fn history(&self, job_id: Uuid, limit: usize) -> DomainResult<Vec<JobExecution>> {
        self.store.list_executions(job_id, limit).await
    }
}
