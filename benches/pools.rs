//! Criterion benchmarks for the fixed-size and variable-size memory pools.
//!
//! These establish the O(1) allocate/free baseline for the fixed pool (the
//! queue's and worker pool's hot paths both ultimately rest on it) and the
//! first-fit + coalesce cost for the variable pool under realistic
//! alloc/free churn.
//!
//! Run with: cargo bench --bench pools

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use threadkit::{FixedPool, Protection, VariablePool};

/// Single allocate/free round trip on a fixed pool, for a few object sizes.
fn fixed_pool_alloc_free_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("fixed_pool_alloc_free");

    for object_size in [16usize, 64, 256, 1024] {
        let pool = FixedPool::create(object_size, 64, Protection::Protected)
            .expect("object_size and capacity are positive");

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("round_trip", object_size),
            &object_size,
            |b, _| {
                b.iter(|| {
                    let allocation = pool.allocate().unwrap();
                    black_box(&allocation);
                    drop(allocation);
                });
            },
        );
    }

    group.finish();
}

/// Allocating every slot in a fixed pool, then freeing them all in reverse
/// order — the worst case for the free list's LIFO reuse pattern.
fn fixed_pool_drain_and_refill(c: &mut Criterion) {
    const CAPACITY: usize = 256;
    let pool = FixedPool::create(32, CAPACITY, Protection::Protected)
        .expect("object_size and capacity are positive");

    c.bench_function("fixed_pool_drain_and_refill", |b| {
        b.iter(|| {
            let allocations: Vec<_> = (0..CAPACITY).map(|_| pool.allocate().unwrap()).collect();
            black_box(&allocations);
        });
    });
}

/// Allocate/free churn on a variable pool sized to force first-fit search
/// and occasional splitting/coalescing across a mix of request sizes.
fn variable_pool_mixed_churn(c: &mut Criterion) {
    const POOL_SIZE: usize = 1024 * 1024;
    let pool = VariablePool::create(POOL_SIZE, Protection::Protected)
        .expect("total_size is positive");
    let sizes = [32usize, 128, 512, 2048];

    c.bench_function("variable_pool_mixed_churn", |b| {
        b.iter(|| {
            let allocations: Vec<_> = sizes
                .iter()
                .cycle()
                .take(16)
                .map(|&n| pool.allocate(n).unwrap())
                .collect();
            black_box(&allocations);
        });
    });
}

criterion_group!(
    benches,
    fixed_pool_alloc_free_round_trip,
    fixed_pool_drain_and_refill,
    variable_pool_mixed_churn
);
criterion_main!(benches);
