//! Ring buffer publish/drain throughput.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use std::sync::Arc;

use argus::domain::models::{MetricEvent, MetricPayload, TokenUsageEvent};
use argus::services::MetricRingBuffer;

fn event() -> MetricEvent {
    MetricEvent::new(MetricPayload::TokenUsage(TokenUsageEvent {
        run_id: "bench".to_string(),
        model: "model".to_string(),
        provider: "provider".to_string(),
        total_tokens: 1024,
        ..TokenUsageEvent::default()
    }))
}

fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer");
    group.throughput(Throughput::Elements(1));

    group.bench_function("publish_uncontended", |b| {
        let buffer = MetricRingBuffer::new(8192);
        b.iter_batched(
            event,
            |e| {
                if !buffer.publish(e) {
                    buffer.drain(4096);
                }
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("publish_contended_4_threads", |b| {
        b.iter_custom(|iterations| {
            let buffer = Arc::new(MetricRingBuffer::new(8192));
            let start = std::time::Instant::now();
            let mut handles = Vec::new();
            for _ in 0..4 {
                let buffer = buffer.clone();
                handles.push(std::thread::spawn(move || {
                    for _ in 0..(iterations / 4) {
                        if !buffer.publish(event()) {
                            buffer.drain(4096);
                        }
                    }
                }));
            }
            for handle in handles {
                handle.join().unwrap();
            }
            start.elapsed()
        });
    });

    group.bench_function("drain_1000", |b| {
        let buffer = MetricRingBuffer::new(8192);
        b.iter_batched(
            || {
                for _ in 0..1000 {
                    buffer.publish(event());
                }
            },
            |()| buffer.drain(1000),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_publish);
criterion_main!(benches);
