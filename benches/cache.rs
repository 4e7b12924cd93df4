#![allow(unused)]
extern crate clrloader;

use clrloader::AssemblyCache;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

fn image(size: usize, seed: u8) -> Vec<u8> {
    (0..size)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Benchmark cache lookups, which hash the whole buffer on every call
///
/// Lookups run against a cache holding 32 assemblies of the same size, so the cost is
/// dominated by the SHA-256 of the probed buffer rather than the scan.
fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_lookup");

    for size in [2048_usize, 64 * 1024, 1024 * 1024] {
        let mut cache = AssemblyCache::new();
        for seed in 0..32_u8 {
            cache.insert(seed, &image(size, seed));
        }
        let hit = image(size, 31);
        let miss = image(size, 200);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("hit", size), &hit, |b, data| {
            b.iter(|| black_box(cache.lookup(black_box(data)).is_some()));
        });
        group.bench_with_input(BenchmarkId::new("miss", size), &miss, |b, data| {
            b.iter(|| black_box(cache.lookup(black_box(data)).is_some()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_lookup);
criterion_main!(benches);
