//! Webhook notifiers for alerts and job outcomes.
//!
//! Payloads are plain JSON envelopes; channel-specific message formatting
//! (Slack blocks, Teams cards) belongs to the receiving integration and is
//! out of scope here.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AlertInstance, JobExecution, ScheduledJob};
use crate::domain::ports::{AlertNotifier, JobNotifier};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

async fn post_json(
    client: &reqwest::Client,
    url: &str,
    payload: &serde_json::Value,
) -> DomainResult<()> {
    let response = client
        .post(url)
        .json(payload)
        .timeout(SEND_TIMEOUT)
        .send()
        .await
        .map_err(|e| DomainError::ExecutionFailed(format!("webhook send failed: {e}")))?;

    if !response.status().is_success() {
        return Err(DomainError::ExecutionFailed(format!(
            "webhook returned HTTP {}",
            response.status()
        )));
    }
    Ok(())
}

/// Posts fired alerts to a fixed URL.
pub struct WebhookAlertNotifier {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl WebhookAlertNotifier {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AlertNotifier for WebhookAlertNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, alert: &AlertInstance) -> DomainResult<()> {
        let payload = json!({
            "kind": "alert",
            "id": alert.id,
            "rule_id": alert.rule_id,
            "tenant_id": alert.tenant_id,
            "severity": alert.severity.as_str(),
            "status": alert.status.as_str(),
            "message": alert.message,
            "metric_value": alert.metric_value,
            "threshold": alert.threshold,
            "fired_at": alert.fired_at.to_rfc3339(),
        });
        post_json(&self.client, &self.url, &payload).await
    }
}

/// Posts job outcomes to the destinations configured on the job: a Slack
/// webhook (channel routed via payload) and/or a Teams webhook URL.
pub struct WebhookJobNotifier {
    slack_webhook_url: Option<String>,
    client: reqwest::Client,
}

impl WebhookJobNotifier {
    pub fn new(slack_webhook_url: Option<String>) -> Self {
        Self {
            slack_webhook_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl JobNotifier for WebhookJobNotifier {
    async fn job_completed(
        &self,
        job: &ScheduledJob,
        execution: &JobExecution,
    ) -> DomainResult<()> {
        let payload = json!({
            "kind": "job_execution",
            "job": job.name,
            "status": execution.status.as_str(),
            "duration_ms": execution.duration_ms,
            "dry_run": execution.dry_run,
            "result": execution.result,
            "channel": job.slack_channel_id,
        });

        if let (Some(url), Some(_)) = (&self.slack_webhook_url, &job.slack_channel_id) {
            post_json(&self.client, url, &payload).await?;
        }
        if let Some(url) = &job.teams_webhook_url {
            post_json(&self.client, url, &payload).await?;
        }
        Ok(())
    }
}
