// ==============================================
// CONNECTION CACHE CONCURRENCY TESTS (integration)
// ==============================================
//
// Exercise put/get/sweep from many threads against a tokio-driven sweep
// and check that every connection id has exactly one owner at any time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use ahash::AHashSet;
use conncache::{CacheConfig, ConnCache, PeerKey, TokioTimer};
use parking_lot::Mutex;
use tokio::runtime::Runtime;

fn sweep_runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("conncache-sweep")
        .enable_time()
        .build()
        .unwrap()
}

fn peers(n: u16) -> Vec<PeerKey> {
    (0..n)
        .map(|i| PeerKey::new(0x0A00_0000 + u32::from(i), 6030, (i % 2) as u8))
        .collect()
}

#[derive(Default)]
struct Ledger {
    checked_out: Mutex<AHashSet<u64>>,
    evicted: Mutex<Vec<u64>>,
    rejected: Mutex<Vec<u64>>,
}

fn run_workload(capacity: usize, keep_alive: Duration, peer_count: u16, threads: usize, rounds: usize) {
    let ledger = Arc::new(Ledger::default());
    let runtime = sweep_runtime();
    let timer = Arc::new(TokioTimer::new(runtime.handle().clone()));

    let sink = Arc::clone(&ledger);
    let cache = Arc::new(
        ConnCache::open(
            CacheConfig::new(capacity, keep_alive).with_sweep_interval(Duration::from_millis(5)),
            move |id: u64| {
                assert!(
                    !sink.checked_out.lock().contains(&id),
                    "evicted connection {} while a caller owns it",
                    id
                );
                sink.evicted.lock().push(id);
            },
            timer,
        )
        .unwrap(),
    );

    let next_id = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(threads));
    let keys = Arc::new(peers(peer_count));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let cache = Arc::clone(&cache);
            let ledger = Arc::clone(&ledger);
            let next_id = Arc::clone(&next_id);
            let barrier = Arc::clone(&barrier);
            let keys = Arc::clone(&keys);

            thread::spawn(move || {
                barrier.wait();
                for i in 0..rounds {
                    let key = keys[(t * 7 + i * 13) % keys.len()];

                    let id = match cache.get(key) {
                        Some(id) => {
                            assert!(
                                ledger.checked_out.lock().insert(id),
                                "connection {} handed to two callers",
                                id
                            );
                            id
                        }
                        None => {
                            let id = next_id.fetch_add(1, Ordering::Relaxed);
                            ledger.checked_out.lock().insert(id);
                            id
                        }
                    };

                    if i % 17 == 0 {
                        thread::sleep(Duration::from_micros(200));
                    }

                    ledger.checked_out.lock().remove(&id);
                    if let Err(err) = cache.put(key, id) {
                        ledger.rejected.lock().push(err.into_inner());
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    cache.debug_validate_invariants();
    let cache = Arc::try_unwrap(cache).expect("workers still hold the cache");
    let leftovers = cache.close();

    // Every id ends up in exactly one place
    let created = next_id.load(Ordering::Relaxed);
    let mut seen = AHashSet::new();
    for id in ledger
        .evicted
        .lock()
        .iter()
        .chain(ledger.rejected.lock().iter())
        .chain(leftovers.iter())
    {
        assert!(seen.insert(*id), "connection {} accounted twice", id);
    }
    assert_eq!(seen.len() as u64, created);
    assert!(ledger.checked_out.lock().is_empty());
}

#[test]
fn concurrent_reuse_keeps_single_owner() {
    run_workload(64, Duration::from_secs(30), 32, 8, 2_000);
}

#[test]
fn concurrent_reuse_with_fast_expiry() {
    run_workload(64, Duration::from_millis(2), 32, 8, 2_000);
}

#[test]
fn single_bucket_contention() {
    // One bucket, one slot: every thread fights over the same lock
    run_workload(1, Duration::from_millis(1), 4, 6, 1_000);
}

#[test]
fn runtime_sweeps_idle_buckets() {
    let evicted = Arc::new(AtomicU64::new(0));
    let runtime = sweep_runtime();
    let timer = Arc::new(TokioTimer::new(runtime.handle().clone()));

    let counter = Arc::clone(&evicted);
    let cache = ConnCache::open(
        CacheConfig::new(16, Duration::from_millis(20)),
        move |_conn: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        timer,
    )
    .unwrap();

    let keys = peers(5);
    for (i, key) in keys.iter().enumerate() {
        cache.put(*key, i as u32).unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    // The sweep counter is bumped after the last bucket is released
    while (evicted.load(Ordering::SeqCst) < 5
        || cache.slots_in_use() != 0
        || cache.stats().sweeps() == 0)
        && Instant::now() < deadline
    {
        thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(evicted.load(Ordering::SeqCst), 5);
    assert!(cache.stats().sweeps() >= 1);
    for key in &keys {
        assert_eq!(cache.bucket_len(cache.bucket_of(*key)), 0);
    }
    assert_eq!(cache.slots_in_use(), 0);
    assert!(cache.close().is_empty());
}
