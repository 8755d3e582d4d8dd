//! Lock-free bounded ring buffer for metric events.
//!
//! Backed by a preallocated `crossbeam` `ArrayQueue` (atomic head/tail, one
//! slot sequence word per cell), so `publish` never takes a lock, never
//! blocks, and never touches I/O. Overflow is signalled by a `false` return;
//! the caller accounts the drop. The pipeline writer is the single drainer.

use chrono::Utc;
use crossbeam::queue::ArrayQueue;

use crate::domain::models::MetricEvent;

/// Bounded MPMC queue of [`MetricEvent`]s with a power-of-two capacity.
pub struct MetricRingBuffer {
    queue: ArrayQueue<MetricEvent>,
    capacity: usize,
}

impl MetricRingBuffer {
    /// Create a buffer holding at least `capacity` events, rounded up to the
    /// next power of two (minimum 2).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        Self {
            queue: ArrayQueue::new(capacity),
            capacity,
        }
    }

    /// Enqueue an event, stamping its publish time if unset.
    ///
    /// Non-blocking; returns `false` when the buffer is full. Safe under any
    /// number of concurrent producers.
    pub fn publish(&self, mut event: MetricEvent) -> bool {
        event.stamp(Utc::now());
        self.queue.push(event).is_ok()
    }

    /// Dequeue up to `max_count` events in FIFO order.
    ///
    /// Intended for a single consumer; correctness does not require more.
    pub fn drain(&self, max_count: usize) -> Vec<MetricEvent> {
        let mut events = Vec::with_capacity(max_count.min(self.queue.len()));
        while events.len() < max_count {
            match self.queue.pop() {
                Some(event) => events.push(event),
                None => break,
            }
        }
        events
    }

    pub fn size(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Current fill level as an integer percentage.
    pub fn usage_percent(&self) -> u8 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let pct = (self.queue.len() as f64 / self.capacity as f64 * 100.0).round() as u8;
        pct.min(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{MetricPayload, TokenUsageEvent};
    use std::sync::Arc;

    fn event() -> MetricEvent {
        MetricEvent::new(MetricPayload::TokenUsage(TokenUsageEvent::default()))
    }

    #[test]
    fn capacity_rounds_to_power_of_two() {
        assert_eq!(MetricRingBuffer::new(1000).capacity(), 1024);
        assert_eq!(MetricRingBuffer::new(8192).capacity(), 8192);
        assert_eq!(MetricRingBuffer::new(0).capacity(), 2);
    }

    #[test]
    fn publish_stamps_time() {
        let buffer = MetricRingBuffer::new(4);
        assert!(buffer.publish(event()));
        let drained = buffer.drain(1);
        assert!(drained[0].time.is_some());
    }

    #[test]
    fn publish_returns_false_when_full() {
        let buffer = MetricRingBuffer::new(4);
        for _ in 0..4 {
            assert!(buffer.publish(event()));
        }
        assert!(!buffer.publish(event()));
        assert_eq!(buffer.size(), 4);
    }

    #[test]
    fn drain_is_fifo_and_bounded() {
        let buffer = MetricRingBuffer::new(8);
        for i in 0..6 {
            let mut e = event();
            if let MetricPayload::TokenUsage(ref mut usage) = e.payload {
                usage.total_tokens = i;
            }
            buffer.publish(e);
        }

        let first = buffer.drain(4);
        assert_eq!(first.len(), 4);
        let rest = buffer.drain(100);
        assert_eq!(rest.len(), 2);

        let tokens: Vec<i64> = first
            .iter()
            .chain(rest.iter())
            .map(|e| match &e.payload {
                MetricPayload::TokenUsage(u) => u.total_tokens,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(tokens, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn concurrent_publishes_conserve_events() {
        let buffer = Arc::new(MetricRingBuffer::new(64));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let buffer = buffer.clone();
            handles.push(std::thread::spawn(move || {
                let mut accepted = 0u64;
                for _ in 0..100 {
                    if buffer.publish(event()) {
                        accepted += 1;
                    }
                }
                accepted
            }));
        }
        let accepted: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

        let mut drained = 0u64;
        loop {
            let batch = buffer.drain(32);
            if batch.is_empty() {
                break;
            }
            drained += batch.len() as u64;
        }
        assert_eq!(accepted, drained);
        assert!(accepted >= 64);
    }
}
