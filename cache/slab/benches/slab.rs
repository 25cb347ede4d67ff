//! Benchmarks for slab-cache hot paths.
//!
//! - single request get/set through the convenience API
//! - pipelined batches of gets executed under one lock
//! - large values spanning several big blocks
//!
//! Run with: cargo bench -p slab-cache --bench slab

use cache_core::HeapProvider;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use slab_cache::{Batch, Opcode, RequestHead, SlabCache};

/// Generate a key from an index.
fn make_key(index: usize) -> Vec<u8> {
    format!("key:{:016x}", index).into_bytes()
}

fn make_cache(memory_limit_mb: usize) -> SlabCache {
    SlabCache::builder()
        .memory_limit_mb(memory_limit_mb)
        .bucket_count(256 * 1024)
        .provider(HeapProvider::new())
        .build()
        .unwrap()
}

fn populate(cache: &SlabCache, items: usize, value_size: usize) -> Vec<Vec<u8>> {
    let value = vec![0xAB; value_size];
    (0..items)
        .map(|i| {
            let key = make_key(i);
            cache.set(&key, &value, 0, 0);
            key
        })
        .collect()
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("slab/get");

    for (items, value_size) in [(10_000, 64), (100_000, 64), (10_000, 1024)] {
        let cache = make_cache(256);
        let keys = populate(&cache, items, value_size);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("hit", format!("{}items_{}B", items, value_size)),
            &items,
            |b, _| {
                let mut idx = 0usize;
                b.iter(|| {
                    let result = cache.get(black_box(&keys[idx]));
                    idx = (idx + 1) % keys.len();
                    black_box(result)
                })
            },
        );
    }

    let cache = make_cache(64);
    group.bench_function("miss", |b| {
        b.iter(|| black_box(cache.get(black_box(b"missing"))));
    });

    group.finish();
}

fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("slab/set");

    for value_size in [64, 1024, 16 * 1024] {
        let cache = make_cache(64);
        let value = vec![0xCD; value_size];

        group.throughput(Throughput::Bytes(value_size as u64));
        group.bench_with_input(BenchmarkId::new("value", value_size), &value_size, |b, _| {
            let mut idx = 0usize;
            b.iter(|| {
                let key = make_key(idx % 50_000);
                idx += 1;
                black_box(cache.set(&key, black_box(&value), 0, 0))
            })
        });
    }

    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("slab/batch");
    let cache = make_cache(256);
    let keys = populate(&cache, 10_000, 128);

    for depth in [1, 16, 64] {
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::new("get", depth), &depth, |b, &depth| {
            let mut batch = Batch::default();
            let mut idx = 0usize;
            b.iter(|| {
                for _ in 0..depth {
                    batch.push(RequestHead::new(Opcode::GetQ), &keys[idx], None);
                    idx = (idx + 1) % keys.len();
                }
                cache.execute(&mut batch);
                black_box(batch.responses().len());
                batch.clear();
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_get, bench_set, bench_batch);
criterion_main!(benches);
