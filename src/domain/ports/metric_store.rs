//! Write-side metric persistence port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::MetricEvent;

/// Append-only batch persistence of metric events.
///
/// Implementations partition the batch by event type and issue one
/// parameterized multi-row statement per type; there are no per-row round
/// trips. Free-form message fields are truncated to 500 characters at this
/// boundary.
#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn batch_insert(&self, events: Vec<MetricEvent>) -> DomainResult<()>;
}
