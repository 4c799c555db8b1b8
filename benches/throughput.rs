use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

use segalloc::{Allocator, FixedHeap};

const OPS: u64 = 10_000;

/// Malloc/free churn at a fixed size, the classic allocator hot path.
fn malloc_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("malloc_free");

    for size in [16, 64, 256, 1024, 4096] {
        group.throughput(Throughput::Elements(OPS));

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut allocator = Allocator::new(FixedHeap::with_capacity(1 << 24)).unwrap();

            b.iter(|| {
                for _ in 0..OPS {
                    let ptr = allocator.malloc(size);
                    black_box(ptr);
                    unsafe { allocator.free(ptr) };
                }
            })
        });
    }

    group.finish();
}

/// Step by step growth of a single allocation, the workload the no-split
/// realloc policies are tuned for.
fn realloc_growth(c: &mut Criterion) {
    let mut group = c.benchmark_group("realloc_growth");
    group.throughput(Throughput::Elements(1024));

    group.bench_function("grow_loop", |b| {
        b.iter(|| {
            let mut allocator = Allocator::new(FixedHeap::with_capacity(1 << 24)).unwrap();
            let mut ptr = allocator.malloc(16);

            for size in (32..=16384).step_by(16) {
                ptr = unsafe { allocator.realloc(ptr, size) };
                black_box(ptr);
            }

            unsafe { allocator.free(ptr) };
        })
    });

    group.finish();
}

criterion_group!(benches, malloc_free, realloc_growth);
criterion_main!(benches);
