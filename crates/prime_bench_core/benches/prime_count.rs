//! Trial-division workload benchmarks using Criterion.rs.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use prime_bench_core::primes::{count_primes_below, parse_limit};

fn bench_count_primes(c: &mut Criterion) {
    let mut group = c.benchmark_group("count_primes_below");
    for limit in [1_000i64, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(limit), &limit, |b, &limit| {
            b.iter(|| black_box(count_primes_below(black_box(limit))));
        });
    }
    group.finish();
}

fn bench_parse_limit(c: &mut Criterion) {
    c.bench_function("parse_limit", |b| {
        b.iter(|| black_box(parse_limit(black_box(" 1000 "))));
    });
}

criterion_group!(benches, bench_count_primes, bench_parse_limit);
criterion_main!(benches);
