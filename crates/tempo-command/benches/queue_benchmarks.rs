//! Command queue throughput.
//!
//! Measures enqueue + full drain for typical band mixes, and the cost of a
//! diagnostics snapshot on a large backlog.
//!
//! Run with: `cargo bench --bench queue_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use tempo_command::prelude::*;

const BANDS: [Priority; 5] = [
    Priority::CRITICAL,
    Priority::HIGH,
    Priority::NORMAL,
    Priority::LOW,
    Priority::BACKGROUND,
];

fn fill(queue: &mut CommandQueue, count: usize) {
    for i in 0..count {
        queue.enqueue(FnCommand::new("bench", BANDS[i % BANDS.len()]));
    }
}

fn bench_enqueue_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("enqueue_drain");
    for count in [100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let mut queue = CommandQueue::new();
                fill(&mut queue, count);
                while queue.has_commands() {
                    black_box(queue.dequeue().unwrap());
                }
            });
        });
    }
    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut queue = CommandQueue::new();
    fill(&mut queue, 10_000);
    c.bench_function("snapshot_10k", |b| b.iter(|| black_box(queue.snapshot())));
}

criterion_group!(benches, bench_enqueue_drain, bench_snapshot);
criterion_main!(benches);
