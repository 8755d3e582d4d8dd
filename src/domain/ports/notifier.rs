//! Notification dispatch ports.
//!
//! Message formatting for Slack/Teams is out of scope; implementations post
//! opaque JSON payloads to configured destinations.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AlertInstance, JobExecution, ScheduledJob};

/// Receives fired alerts. Each notifier is isolated: a failure in one never
/// affects the others or the evaluation cycle.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, alert: &AlertInstance) -> DomainResult<()>;
}

/// Receives job outcomes for jobs with a Slack channel or Teams webhook
/// configured.
#[async_trait]
pub trait JobNotifier: Send + Sync {
    async fn job_completed(&self, job: &ScheduledJob, execution: &JobExecution)
        -> DomainResult<()>;
}
