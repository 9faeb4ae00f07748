//! Fan-out benchmarks for Tether.
//!
//! These benchmarks measure room broadcast cost as membership grows.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tether_bench::{drain, populate_room, runtime};
use tether_core::{Frame, Hub};
use tether_protocol::ServerEvent;

/// Benchmark encoding plus delivery to every member.
fn bench_broadcast(c: &mut Criterion) {
    let Ok(rt) = runtime() else { return };
    let mut group = c.benchmark_group("broadcast");

    for size in [10, 100, 1000] {
        let hub = Hub::new();
        let mut receivers = rt.block_on(populate_room(&hub, "bench", size));
        let event = ServerEvent::error("x".repeat(64));

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let report = rt.block_on(hub.engine().broadcast("bench", black_box(&event), None));
                drain(&mut receivers);
                report
            });
        });
    }

    group.finish();
}

/// Benchmark delivery of a pre-encoded frame, isolating the send path.
fn bench_broadcast_frame(c: &mut Criterion) {
    let Ok(rt) = runtime() else { return };
    let mut group = c.benchmark_group("broadcast_frame");

    for size in [10, 100, 1000] {
        let hub = Hub::new();
        let mut receivers = rt.block_on(populate_room(&hub, "bench", size));
        let frame: Frame = Arc::from(r#"{"type":"ping","timestamp":"2024-01-01T00:00:00Z"}"#);

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let report = rt.block_on(hub.engine().broadcast_frame(
                    "bench",
                    Arc::clone(&frame),
                    None,
                ));
                drain(&mut receivers);
                report
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_broadcast, bench_broadcast_frame);
criterion_main!(benches);
