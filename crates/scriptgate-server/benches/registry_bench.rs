// Criterion benchmarks for the handler registry
//
// Run benchmarks with:
//   cargo bench -p scriptgate-server

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use scriptgate_server::{HandlerId, HandlerRegistry};

fn populated(exact: usize, patterned: usize) -> HandlerRegistry {
    let registry = HandlerRegistry::new();
    for i in 0..exact {
        registry
            .register("GET", &format!("/static/{}", i), HandlerId::next(), None)
            .unwrap();
    }
    for i in 0..patterned {
        registry
            .register("GET", &format!("/api/v{}/users/:id/posts/:post", i), HandlerId::next(), None)
            .unwrap();
    }
    registry
}

fn bench_exact_lookup(c: &mut Criterion) {
    let registry = populated(1000, 100);
    c.bench_function("lookup_exact_1000", |b| {
        b.iter(|| registry.lookup(black_box("GET"), black_box("/static/500")))
    });
}

fn bench_pattern_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup_pattern");

    for size in [10, 100, 1000] {
        let registry = populated(0, size);
        let path = format!("/api/v{}/users/42/posts/hello", size - 1);
        group.bench_with_input(BenchmarkId::from_parameter(size), &path, |b, path| {
            b.iter(|| registry.lookup(black_box("GET"), black_box(path)))
        });
    }

    group.finish();
}

fn bench_miss(c: &mut Criterion) {
    let registry = populated(100, 100);
    c.bench_function("lookup_miss", |b| {
        b.iter(|| registry.lookup(black_box("GET"), black_box("/nowhere/at/all")))
    });
}

criterion_group!(benches, bench_exact_lookup, bench_pattern_lookup, bench_miss);
criterion_main!(benches);
