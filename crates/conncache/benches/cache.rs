use std::sync::Arc;
use std::time::Duration;

use conncache::{CacheConfig, ConnCache, ManualTimer, PeerKey};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn open(capacity: usize) -> ConnCache<u64> {
    ConnCache::open(
        CacheConfig::new(capacity, Duration::from_secs(60)),
        |_conn| {},
        Arc::new(ManualTimer::new()),
    )
    .unwrap()
}

fn peers(n: u32) -> Vec<PeerKey> {
    (0..n).map(|i| PeerKey::new(0x0A00_0000 + i, 6030, 0)).collect()
}

fn bench_reuse_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("reuse");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_put_hit", |b| {
        let cache = open(1000);
        let keys = peers(100);

        // Park one connection per peer
        for (i, key) in keys.iter().enumerate() {
            cache.put(*key, i as u64).unwrap();
        }

        let mut counter = 0;
        b.iter(|| {
            let key = keys[counter % 100];
            let conn = cache.get(key).unwrap();
            cache.put(key, black_box(conn)).unwrap();
            counter += 1;
        });
    });

    group.finish();
}

fn bench_miss(c: &mut Criterion) {
    let mut group = c.benchmark_group("miss");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_empty_bucket", |b| {
        let cache = open(1000);
        let keys = peers(100);

        let mut counter = 0;
        b.iter(|| {
            black_box(cache.get(keys[counter % 100]));
            counter += 1;
        });
    });

    group.finish();
}

fn bench_crowded_bucket(c: &mut Criterion) {
    let mut group = c.benchmark_group("collisions");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_put_16_deep", |b| {
        // Single bucket: every peer collides
        let cache = open(16);
        let keys: Vec<PeerKey> = (0..16u16).map(|i| PeerKey::new(0, 16 * i, 0)).collect();
        for (i, key) in keys.iter().enumerate() {
            cache.put(*key, i as u64).unwrap();
        }

        let mut counter = 0;
        b.iter(|| {
            let key = keys[counter % 16];
            let conn = cache.get(key).unwrap();
            cache.put(key, black_box(conn)).unwrap();
            counter += 1;
        });
    });

    group.finish();
}

criterion_group!(benches, bench_reuse_cycle, bench_miss, bench_crowded_bucket);
criterion_main!(benches);
