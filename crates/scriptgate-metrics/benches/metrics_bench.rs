// Criterion benchmarks for scriptgate-metrics
//
// Run benchmarks with:
//   cargo bench -p scriptgate-metrics

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use scriptgate_metrics::{GatewayMetricsCollector, MetricsCollector, Outcome};
use std::time::Instant;

fn bench_record_call(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_call");
    let collector = GatewayMetricsCollector::new();

    group.bench_function("existing_route", |b| {
        collector.record_call("GET /users/:id", Instant::now(), Outcome::Success);
        b.iter(|| {
            collector.record_call(
                black_box("GET /users/:id"),
                black_box(Instant::now()),
                black_box(Outcome::Success),
            );
        });
    });

    let routes = ["GET /a", "GET /b/:id", "POST /c", "PUT /d/:x/:y", "DELETE /e"];
    group.bench_function("five_routes", |b| {
        b.iter(|| {
            for route in &routes {
                collector.record_call(black_box(route), Instant::now(), Outcome::Success);
            }
        });
    });

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let collector = GatewayMetricsCollector::new();
    for i in 0..100 {
        let route = format!("GET /route/{}", i % 10);
        let outcome = if i % 2 == 0 { Outcome::Success } else { Outcome::Failure };
        collector.record_call(&route, Instant::now(), outcome);
    }

    c.bench_function("snapshot_10_routes", |b| b.iter(|| collector.snapshot()));
}

criterion_group!(benches, bench_record_call, bench_snapshot);
criterion_main!(benches);
