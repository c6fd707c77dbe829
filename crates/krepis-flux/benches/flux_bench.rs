//! Flux Benchmark Suite
//!
//! # Scenarios
//!
//! 1. **Synchronous pipeline**: range -> map -> filter -> buffer
//!    - Pure operator overhead, no thread hops
//!
//! 2. **Merge fan-in**: N synchronous ranges merged
//!    - Cost of the serializer under a single producer thread
//!
//! 3. **publish_on**: range hopped onto a pooled worker
//!    - Per-value queueing cost of a pinned worker
//!
//! 4. **Virtual time**: hour-long interval verified without waiting
//!    - Clock queue and verifier overhead

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use krepis_flux::{Flux, Scheduler, StepVerifier};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_sync_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_pipeline");

    for n in [1_000_u64, 10_000] {
        group.bench_with_input(BenchmarkId::new("map_filter_buffer", n), &n, |b, &n| {
            let flux = Flux::range(0, n)
                .map(|v| v * 3)
                .filter(|v| v % 2 == 0)
                .buffer(64);
            b.iter(|| black_box(flux.block_collect(WAIT)));
        });
    }

    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    for sources in [2_i64, 8] {
        group.bench_with_input(BenchmarkId::new("ranges", sources), &sources, |b, &sources| {
            let flux = Flux::merge((0..sources).map(|i| Flux::range(i * 1_000, 1_000)));
            b.iter(|| black_box(flux.block_collect(WAIT)));
        });
    }

    group.finish();
}

fn bench_publish_on(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_on");
    let pool = Scheduler::pooled("bench", 4);

    group.bench_function("range_10k", |b| {
        let flux = Flux::range(0, 10_000).publish_on(&pool);
        b.iter(|| black_box(flux.block_collect(WAIT)));
    });

    group.finish();
    pool.dispose();
}

fn bench_virtual_time(c: &mut Criterion) {
    let mut group = c.benchmark_group("virtual_time");

    group.bench_function("hourly_interval_day", |b| {
        b.iter(|| {
            let result = StepVerifier::with_virtual_time(|| {
                Flux::interval(Duration::from_secs(3_600)).take(24)
            })
            .then_await(Duration::from_secs(24 * 3_600))
            .expect_next_count(24)
            .verify_complete();
            black_box(result)
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_sync_pipeline,
    bench_merge,
    bench_publish_on,
    bench_virtual_time
);
criterion_main!(benches);
