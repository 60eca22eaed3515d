//! Benchmarks for the hot paths of event ingestion and serialization.
//!
//! `send_event` runs on caller threads, so ingestion cost is what callers
//! pay per event. Serialization runs once per flush on the timer task.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use std::{hint::black_box, sync::Arc};

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use tally_core::TestClock;
use tally_events::{EventBuffer, EventsConfig, PayloadSerializer, PipelineState, QueuedEvent};
use tally_testing::fixtures::{self, FeatureEventBuilder};

const NOW: u64 = 1_700_000_000_000;

fn state(capacity: usize) -> PipelineState {
    let config = EventsConfig { capacity, ..EventsConfig::new("sdk-key") };
    PipelineState::new(&config, Arc::new(TestClock::at_unix_millis(NOW)))
}

/// Benchmarks raw buffer appends, including the drop path once full.
fn bench_buffer_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer");
    group.throughput(Throughput::Elements(1));

    group.bench_function("enqueue", |b| {
        let event = QueuedEvent::inline(fixtures::identify("user-1"));
        b.iter_batched_ref(
            || EventBuffer::new(10_000),
            |buffer| buffer.enqueue(black_box(event.clone())),
            BatchSize::SmallInput,
        );
    });

    group.bench_function("enqueue_full", |b| {
        let mut buffer = EventBuffer::new(1);
        buffer.enqueue(QueuedEvent::inline(fixtures::identify("user-0")));
        let event = QueuedEvent::inline(fixtures::identify("user-1"));
        b.iter(|| buffer.enqueue(black_box(event.clone())));
    });

    group.finish();
}

/// Benchmarks full ingestion: dedup, summarization and buffering.
fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");
    group.throughput(Throughput::Elements(1));

    for distinct_contexts in [1usize, 100, 10_000] {
        group.bench_with_input(
            BenchmarkId::new("feature_untracked", distinct_contexts),
            &distinct_contexts,
            |b, &contexts| {
                let events: Vec<_> = (0..contexts)
                    .map(|n| FeatureEventBuilder::new("flag", &format!("user-{n}")).build())
                    .collect();
                let mut state = state(10_000);
                let mut n = 0;
                b.iter(|| {
                    state.ingest(black_box(events[n % events.len()].clone()), NOW);
                    n += 1;
                    if state.buffer.len() == state.buffer.capacity() {
                        state.drain();
                    }
                });
            },
        );
    }

    group.bench_function("custom", |b| {
        let event = fixtures::custom("user-1", "checkout");
        let mut state = state(10_000);
        b.iter(|| {
            state.ingest(black_box(event.clone()), NOW);
            if state.buffer.len() == state.buffer.capacity() {
                state.drain();
            }
        });
    });

    group.finish();
}

/// Benchmarks serialization of a full analytics payload.
fn bench_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialize");
    let serializer = PayloadSerializer::new(&EventsConfig::new("sdk-key"));

    for batch in [10usize, 1_000, 10_000] {
        let mut state = state(batch);
        for n in 0..batch {
            let event = FeatureEventBuilder::new(&format!("flag-{}", n % 20), &format!("u-{n}"))
                .tracked()
                .build();
            state.ingest(event, NOW);
        }
        let (events, summary) = state.drain();

        group.throughput(Throughput::Elements(events.len() as u64));
        group.bench_with_input(BenchmarkId::new("analytics", batch), &batch, |b, _| {
            b.iter(|| serializer.serialize_analytics(black_box(&events), black_box(&summary)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_buffer_enqueue, bench_ingest, bench_serialize);
criterion_main!(benches);
