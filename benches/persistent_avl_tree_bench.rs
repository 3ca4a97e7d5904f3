//! Benchmark for PersistentAvlTree vs standard Vec.
//!
//! Compares positional operations against `Vec` (which shifts elements on
//! insert/remove) and sorted operations against `std::collections::BTreeSet`.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use arbora::PersistentAvlTree;
use std::collections::BTreeSet;

// =============================================================================
// Positional insert Benchmark
// =============================================================================

fn benchmark_insert_front(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("insert_front");

    for size in [100, 1000, 10000] {
        group.bench_with_input(
            BenchmarkId::new("PersistentAvlTree", size),
            &size,
            |bencher, &size| {
                bencher.iter(|| {
                    let mut tree = PersistentAvlTree::new();
                    for value in 0..size {
                        tree = tree.push_front(black_box(value));
                    }
                    black_box(tree)
                });
            },
        );

        group.bench_with_input(BenchmarkId::new("Vec", size), &size, |bencher, &size| {
            bencher.iter(|| {
                let mut vec = Vec::new();
                for value in 0..size {
                    vec.insert(0, black_box(value));
                }
                black_box(vec)
            });
        });
    }

    group.finish();
}

// =============================================================================
// get Benchmark
// =============================================================================

fn benchmark_get(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("get");

    for size in [100, 1000, 10000] {
        let tree: PersistentAvlTree<usize> = (0..size).collect();
        let vec: Vec<usize> = (0..size).collect();

        group.bench_with_input(
            BenchmarkId::new("PersistentAvlTree", size),
            &size,
            |bencher, &size| {
                bencher.iter(|| {
                    let mut total = 0;
                    for index in 0..size {
                        total += tree.get(black_box(index)).copied().unwrap_or(0);
                    }
                    black_box(total)
                });
            },
        );

        group.bench_with_input(BenchmarkId::new("Vec", size), &size, |bencher, &size| {
            bencher.iter(|| {
                let mut total = 0;
                for index in 0..size {
                    total += vec.get(black_box(index)).copied().unwrap_or(0);
                }
                black_box(total)
            });
        });
    }

    group.finish();
}

// =============================================================================
// Sorted insert Benchmark
// =============================================================================

fn benchmark_insert_sorted(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("insert_sorted");

    for size in [100, 1000, 10000] {
        group.bench_with_input(
            BenchmarkId::new("PersistentAvlTree", size),
            &size,
            |bencher, &size| {
                bencher.iter(|| {
                    let mut tree = PersistentAvlTree::new();
                    for value in 0..size {
                        // Scatter the keys to avoid a purely sequential shape.
                        tree = tree.insert_by(black_box(value * 2_654_435_761 % size), usize::cmp);
                    }
                    black_box(tree)
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("BTreeSet", size),
            &size,
            |bencher, &size| {
                bencher.iter(|| {
                    let mut set = BTreeSet::new();
                    for value in 0..size {
                        set.insert(black_box(value * 2_654_435_761 % size));
                    }
                    black_box(set)
                });
            },
        );
    }

    group.finish();
}

// =============================================================================
// Ranged iteration Benchmark
// =============================================================================

fn benchmark_iter_range(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("iter_range");

    for size in [1000, 10000, 100_000] {
        let tree: PersistentAvlTree<usize> = (0..size).collect();

        group.bench_with_input(
            BenchmarkId::new("PersistentAvlTree", size),
            &size,
            |bencher, &size| {
                bencher.iter(|| {
                    let total: usize = tree.iter_range(size / 2, 64).sum();
                    black_box(total)
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_insert_front,
    benchmark_get,
    benchmark_insert_sorted,
    benchmark_iter_range
);
criterion_main!(benches);
