//! Property tests for the ring buffer's conservation guarantee: across any
//! concurrent publish workload, accepted + rejected == attempted, and every
//! accepted event is drained exactly once.

use proptest::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use argus::domain::models::{MetricEvent, MetricPayload, TokenUsageEvent};
use argus::services::MetricRingBuffer;

fn event(producer: u64, sequence: u64) -> MetricEvent {
    MetricEvent::new(MetricPayload::TokenUsage(TokenUsageEvent {
        run_id: format!("{producer}:{sequence}"),
        ..TokenUsageEvent::default()
    }))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn publishes_are_conserved(
        capacity in 1usize..512,
        producers in 1u64..8,
        per_producer in 1u64..200,
    ) {
        let buffer = Arc::new(MetricRingBuffer::new(capacity));
        let accepted = Arc::new(AtomicU64::new(0));
        let rejected = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for producer in 0..producers {
            let buffer = buffer.clone();
            let accepted = accepted.clone();
            let rejected = rejected.clone();
            handles.push(std::thread::spawn(move || {
                for sequence in 0..per_producer {
                    if buffer.publish(event(producer, sequence)) {
                        accepted.fetch_add(1, Ordering::SeqCst);
                    } else {
                        rejected.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let accepted = accepted.load(Ordering::SeqCst);
        let rejected = rejected.load(Ordering::SeqCst);
        prop_assert_eq!(accepted + rejected, producers * per_producer);

        // Single consumer drains every accepted event exactly once.
        let mut seen = std::collections::HashSet::new();
        let mut drained = 0u64;
        loop {
            let batch = buffer.drain(64);
            if batch.is_empty() {
                break;
            }
            for event in batch {
                drained += 1;
                if let MetricPayload::TokenUsage(usage) = event.payload {
                    prop_assert!(seen.insert(usage.run_id), "event delivered twice");
                }
            }
        }
        prop_assert_eq!(drained, accepted);
        prop_assert_eq!(buffer.size(), 0);
    }

    #[test]
    fn per_producer_fifo_is_preserved(per_producer in 1u64..100) {
        // A single producer's events drain in the order they were accepted.
        let buffer = MetricRingBuffer::new(1024);
        for sequence in 0..per_producer {
            buffer.publish(event(0, sequence));
        }

        let mut last = None;
        for event in buffer.drain(usize::MAX) {
            if let MetricPayload::TokenUsage(usage) = event.payload {
                let sequence: u64 = usage.run_id.split(':').nth(1).unwrap().parse().unwrap();
                if let Some(last) = last {
                    prop_assert!(sequence > last, "FIFO order violated");
                }
                last = Some(sequence);
            }
        }
    }
}
