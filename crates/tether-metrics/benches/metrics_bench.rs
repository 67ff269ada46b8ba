// Criterion benchmarks for tether-metrics
//
// Run benchmarks with:
//   cargo bench -p tether-metrics

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Instant;
use tether_metrics::{CallMeasurer, ClientMeasurer};

fn bench_record_call(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_call");
    let measurer = ClientMeasurer::new();

    group.bench_function("single_method", |b| {
        b.iter(|| measurer.record_call(black_box("demo.Echo.echo"), Instant::now(), true));
    });

    let methods = ["m.a", "m.b", "m.c", "m.d", "m.e"];
    group.bench_function("five_methods", |b| {
        b.iter(|| {
            for method in &methods {
                measurer.record_call(black_box(method), Instant::now(), true);
            }
        });
    });

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let measurer = ClientMeasurer::new();
    for i in 0..100 {
        measurer.record_call(&format!("m.{}", i % 10), Instant::now(), i % 3 != 0);
    }

    c.bench_function("snapshot_10_methods", |b| b.iter(|| measurer.snapshot()));
}

criterion_group!(benches, bench_record_call, bench_snapshot);
criterion_main!(benches);
