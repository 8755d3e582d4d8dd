//! Single-drainer pipeline writer.
//!
//! Periodically empties the ring buffer and persists the events in grouped
//! batches through the metric store. Partitions are persisted independently:
//! one failing table never aborts the others. Once an event has been drained,
//! a failed write is a drop (counted, not retried); events still in the
//! buffer are naturally retried by the next tick.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::domain::models::config::PipelineConfig;
use crate::domain::models::{MetricEvent, MetricKind};
use crate::domain::ports::MetricStore;
use crate::services::metric_pipeline::MetricPipeline;

pub struct PipelineWriter {
    pipeline: Arc<MetricPipeline>,
    store: Arc<dyn MetricStore>,
    config: PipelineConfig,
}

impl PipelineWriter {
    pub fn new(
        pipeline: Arc<MetricPipeline>,
        store: Arc<dyn MetricStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            pipeline,
            store,
            config,
        }
    }

    /// Start the drain loop. Returns a handle that completes after the
    /// shutdown flush.
    pub fn start(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let flush_interval = Duration::from_millis(self.config.flush_interval_ms.max(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(flush_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately; consume it so the loop is purely periodic.
            interval.tick().await;

            tracing::info!(
                flush_interval_ms = self.config.flush_interval_ms,
                batch_size = self.config.batch_size,
                "Pipeline writer started"
            );

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.flush_once().await;
                    }
                    () = self.pipeline.drain_requested() => {
                        self.flush_once().await;
                    }
                    _ = shutdown_rx.recv() => {
                        self.final_flush().await;
                        break;
                    }
                }
            }

            tracing::info!("Pipeline writer stopped");
        })
    }

    /// One drain-and-persist pass.
    async fn flush_once(&self) {
        let events = self.pipeline.buffer().drain(self.config.batch_size);
        if events.is_empty() {
            self.update_usage();
            return;
        }

        let count = events.len();
        self.persist_grouped(events).await;
        self.update_usage();
        self.pipeline.health().mark_aggregate_refresh(chrono::Utc::now());

        tracing::debug!(count, "Flushed metric batch");
    }

    /// Drain until the buffer is empty so shutdown loses nothing that a flush
    /// could still persist.
    async fn final_flush(&self) {
        tracing::info!("Pipeline writer shutting down, flushing remaining events");
        loop {
            let events = self.pipeline.buffer().drain(self.config.batch_size);
            if events.is_empty() {
                break;
            }
            self.persist_grouped(events).await;
        }
        self.update_usage();
    }

    /// Partition by event type and persist each group in one round trip.
    async fn persist_grouped(&self, events: Vec<MetricEvent>) {
        let mut groups: BTreeMap<MetricKind, Vec<MetricEvent>> = BTreeMap::new();
        for event in events {
            groups.entry(event.kind()).or_default().push(event);
        }

        for (kind, group) in groups {
            let group_len = group.len() as u64;
            if let Err(error) = self.store.batch_insert(group).await {
                tracing::warn!(
                    kind = %kind,
                    count = group_len,
                    %error,
                    "Failed to persist metric partition; counting as drops"
                );
                self.pipeline.health().record_drop(group_len);
            }
        }
    }

    fn update_usage(&self) {
        self.pipeline
            .health()
            .update_buffer_usage(self.pipeline.buffer().usage_percent());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::{DomainError, DomainResult};
    use crate::domain::models::{MetricPayload, QuotaAction, QuotaEvent, TokenUsageEvent};
    use crate::services::pipeline_health::PipelineHealth;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Store stub that records batches and fails on request for one kind.
    struct RecordingStore {
        batches: Mutex<Vec<Vec<MetricEvent>>>,
        fail_kind: Option<MetricKind>,
    }

    impl RecordingStore {
        fn new(fail_kind: Option<MetricKind>) -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
                fail_kind,
            }
        }

        fn persisted(&self) -> usize {
            self.batches.lock().unwrap().iter().map(Vec::len).sum()
        }
    }

    #[async_trait]
    impl MetricStore for RecordingStore {
        async fn batch_insert(&self, events: Vec<MetricEvent>) -> DomainResult<()> {
            if let Some(fail) = self.fail_kind {
                if events.iter().any(|e| e.kind() == fail) {
                    return Err(DomainError::DatabaseError("injected".into()));
                }
            }
            self.batches.lock().unwrap().push(events);
            Ok(())
        }
    }

    fn setup(
        fail_kind: Option<MetricKind>,
    ) -> (Arc<MetricPipeline>, Arc<RecordingStore>, Arc<PipelineWriter>) {
        let config = PipelineConfig {
            ring_buffer_size: 64,
            batch_size: 32,
            flush_interval_ms: 10,
            writer_threads: 1,
        };
        let pipeline = Arc::new(MetricPipeline::new(
            &config,
            Arc::new(PipelineHealth::new()),
        ));
        let store = Arc::new(RecordingStore::new(fail_kind));
        let writer = Arc::new(PipelineWriter::new(
            pipeline.clone(),
            store.clone(),
            config,
        ));
        (pipeline, store, writer)
    }

    fn token_event() -> MetricEvent {
        MetricEvent::new(MetricPayload::TokenUsage(TokenUsageEvent::default()))
    }

    fn quota_event() -> MetricEvent {
        MetricEvent::new(MetricPayload::Quota(QuotaEvent {
            action: QuotaAction::Warning,
            current_usage: 1,
            quota_limit: 10,
            reason: "90% quota used".to_string(),
        }))
    }

    #[tokio::test]
    async fn flush_partitions_by_kind() {
        let (pipeline, store, writer) = setup(None);
        for _ in 0..3 {
            pipeline.publish(token_event());
        }
        for _ in 0..2 {
            pipeline.publish(quota_event());
        }

        writer.flush_once().await;

        let batches = store.batches.lock().unwrap();
        assert_eq!(batches.len(), 2, "one batch per event type");
        for batch in batches.iter() {
            let kind = batch[0].kind();
            assert!(batch.iter().all(|e| e.kind() == kind));
        }
    }

    #[tokio::test]
    async fn failed_partition_is_isolated_and_counted() {
        let (pipeline, store, writer) = setup(Some(MetricKind::Quota));
        for _ in 0..3 {
            pipeline.publish(token_event());
        }
        for _ in 0..2 {
            pipeline.publish(quota_event());
        }

        writer.flush_once().await;

        assert_eq!(store.persisted(), 3, "token partition still persisted");
        assert_eq!(pipeline.health().dropped_total(), 2);
    }

    #[tokio::test]
    async fn shutdown_flushes_remaining_events() {
        let (pipeline, store, writer) = setup(None);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = writer.start(shutdown_rx);

        for _ in 0..10 {
            pipeline.publish(token_event());
        }
        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("writer should stop")
            .unwrap();

        assert_eq!(store.persisted(), 10);
        assert!(pipeline.buffer().is_empty());
    }

    #[tokio::test]
    async fn usage_updates_after_flush() {
        let (pipeline, _store, writer) = setup(None);
        for _ in 0..8 {
            pipeline.publish(token_event());
        }
        writer.flush_once().await;
        assert_eq!(pipeline.health().buffer_usage_percent(), 0);
    }
}
