//! Publish-side facade over the ring buffer.
//!
//! Every emitter (metric collector hook, quota enforcer, MCP manager) goes
//! through [`MetricPipeline::publish`], which centralizes overflow accounting
//! and wakes the writer early once a full batch is waiting. Publish is
//! non-blocking and never surfaces failure to the request path.

use std::sync::Arc;
use tokio::sync::Notify;

use crate::domain::models::config::PipelineConfig;
use crate::domain::models::MetricEvent;
use crate::services::pipeline_health::PipelineHealth;
use crate::services::ring_buffer::MetricRingBuffer;

pub struct MetricPipeline {
    buffer: MetricRingBuffer,
    health: Arc<PipelineHealth>,
    /// Signalled when a full batch is buffered so the writer can drain ahead
    /// of its next tick.
    drain_wakeup: Notify,
    batch_size: usize,
}

impl MetricPipeline {
    pub fn new(config: &PipelineConfig, health: Arc<PipelineHealth>) -> Self {
        Self {
            buffer: MetricRingBuffer::new(config.ring_buffer_size),
            health,
            drain_wakeup: Notify::new(),
            batch_size: config.batch_size.max(1),
        }
    }

    /// Publish an event. Returns `false` and records a drop on overflow.
    pub fn publish(&self, event: MetricEvent) -> bool {
        let accepted = self.buffer.publish(event);
        if accepted {
            if self.buffer.size() >= self.batch_size {
                self.drain_wakeup.notify_one();
            }
        } else {
            self.health.record_drop(1);
        }
        accepted
    }

    pub fn buffer(&self) -> &MetricRingBuffer {
        &self.buffer
    }

    pub fn health(&self) -> &Arc<PipelineHealth> {
        &self.health
    }

    /// Await an early-drain signal. Used by the writer's select loop.
    pub async fn drain_requested(&self) {
        self.drain_wakeup.notified().await;
    }
}
