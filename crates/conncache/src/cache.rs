//! ConnCache: idle connection reuse keyed by peer

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::bucket::{BucketList, Evicted};
use crate::clock::{Clock, MonotonicClock};
use crate::config::CacheConfig;
use crate::error::{PutError, Result};
use crate::key::PeerKey;
use crate::lock::BucketLock;
use crate::slab::SlabBudget;
use crate::stats::CacheStats;
use crate::timer::{Timer, TimerId};

/// Callback that closes a connection dropped for age
pub type CleanupFn<T> = Box<dyn Fn(T) + Send + Sync>;

struct Inner<T> {
    /// One lock per bucket; the bucket count never changes
    buckets: Box<[BucketLock<BucketList<T>>]>,

    /// Bound on live entries across all buckets
    slab: SlabBudget,

    keep_alive_ms: u64,
    sweep_interval: Duration,
    cleanup: CleanupFn<T>,
    clock: Arc<dyn Clock>,
    timer: Arc<dyn Timer>,

    /// Registration of the next sweep
    sweep_task: Mutex<Option<TimerId>>,

    /// Bumped on teardown so in-flight sweep callbacks stand down
    sweep_epoch: AtomicU64,

    stats: CacheStats,
}

/// Sharded cache of idle connections with keep-alive expiry
///
/// Callers `get` before dialing a peer and `put` the connection back once
/// they are done with it. An entry is owned by exactly one party at a time:
/// the cache while parked, the caller after `get`, or the cleanup callback
/// once it outlives the keep-alive.
///
/// Expired entries are dropped lazily by `put`/`get` on the same bucket and
/// by a periodic sweep. The sweep only inspects bucket heads, so a bucket
/// whose head is fresh keeps its stale tail until the next access.
pub struct ConnCache<T: Send + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> ConnCache<T> {
    /// Open a cache and schedule its first sweep
    ///
    /// # Arguments
    /// * `config` - Capacity, keep-alive and sweep period
    /// * `cleanup` - Closes connections evicted for age, runs under the bucket lock
    /// * `timer` - Timer facility that drives the sweep
    ///
    /// # Returns
    /// * `Result<ConnCache<T>>` - Cache handle, or `InvalidConfig`
    pub fn open<F>(config: CacheConfig, cleanup: F, timer: Arc<dyn Timer>) -> Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self::open_with_clock(config, cleanup, timer, Arc::new(MonotonicClock::new()))
    }

    /// Open a cache that reads time from `clock`
    pub fn open_with_clock<F>(
        config: CacheConfig,
        cleanup: F,
        timer: Arc<dyn Timer>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        config.validate()?;

        let buckets = (0..config.capacity)
            .map(|_| BucketLock::new(BucketList::new()))
            .collect();

        let inner = Arc::new(Inner {
            buckets,
            slab: SlabBudget::new(config.capacity),
            keep_alive_ms: config.keep_alive_ms,
            sweep_interval: config.sweep_interval(),
            cleanup: Box::new(cleanup),
            clock,
            timer,
            sweep_task: Mutex::new(None),
            sweep_epoch: AtomicU64::new(0),
            stats: CacheStats::new(),
        });

        schedule_sweep(&inner, 0);

        debug!(
            capacity = config.capacity,
            keep_alive_ms = config.keep_alive_ms,
            sweep_ms = inner.sweep_interval.as_millis() as u64,
            "connection cache opened"
        );
        Ok(Self { inner })
    }

    /// Park an idle connection
    ///
    /// Expired entries behind the new head are evicted on the way. When
    /// every slot is taken, this bucket's own expired entries are reclaimed
    /// first; if that frees nothing the connection comes back inside
    /// [`PutError::CapacityExhausted`] and the caller must close it.
    pub fn put(&self, key: PeerKey, payload: T) -> std::result::Result<(), PutError<T>> {
        let inner = &*self.inner;
        let hash = key.bucket(inner.buckets.len());
        let ttl = inner.keep_alive_ms;

        let mut bucket = inner.buckets[hash].lock();
        let now = inner.clock.now_ms();

        if inner.slab.acquire().is_err() {
            let stale = bucket.evict_expired(now, ttl);
            inner.discard(hash, stale);

            if inner.slab.acquire().is_err() {
                drop(bucket);
                inner.stats.record_rejected();
                warn!(peer = %key, hash, "connection cache full, connection not cached");
                return Err(PutError::CapacityExhausted(payload));
            }
        }

        let idx = bucket.push_front(key, payload, now);
        inner.stats.record_insert();
        let behind = bucket.next_of(idx);
        let stale = bucket.truncate_expired(behind, now, ttl);
        inner.discard(hash, stale);
        let connections = bucket.len();
        drop(bucket);

        trace!(peer = %key, hash, connections, "connection added into cache");
        Ok(())
    }

    /// Take a live connection to `key` out of the cache
    ///
    /// Returns `None` on a miss, including when an expired entry is reached
    /// before a match.
    pub fn get(&self, key: PeerKey) -> Option<T> {
        let inner = &*self.inner;
        let hash = key.bucket(inner.buckets.len());

        let mut bucket = inner.buckets[hash].lock();
        let now = inner.clock.now_ms();
        let (found, stale) = bucket.take(key, now, inner.keep_alive_ms);
        if found.is_some() {
            inner.slab.release(1);
            inner.stats.record_hit();
        } else {
            inner.stats.record_miss();
        }
        inner.discard(hash, stale);
        let connections = bucket.len();
        drop(bucket);

        if found.is_some() {
            trace!(peer = %key, hash, connections, "connection retrieved from cache");
        }
        found
    }

    /// Run one sweep pass now, outside the timer schedule
    ///
    /// # Returns
    /// * `usize` - Number of connections evicted
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    /// Stop the sweeper and hand every parked connection back
    ///
    /// The cleanup callback is not called for these; the caller decides
    /// what to do with them.
    pub fn close(self) -> Vec<T> {
        self.stop_sweeper();

        let mut remaining = Vec::new();
        for lock in self.inner.buckets.iter() {
            remaining.extend(lock.lock().drain());
        }
        self.inner.slab.release(remaining.len());
        self.inner.stats.record_drained(remaining.len());

        debug!(remaining = remaining.len(), "connection cache closed");
        remaining
    }

    fn stop_sweeper(&self) {
        let mut task = self.inner.sweep_task.lock();
        self.inner.sweep_epoch.fetch_add(1, Ordering::AcqRel);
        if let Some(id) = task.take() {
            self.inner.timer.cancel(id);
        }
    }

    /// Bucket index of `key`
    pub fn bucket_of(&self, key: PeerKey) -> usize {
        key.bucket(self.inner.buckets.len())
    }

    /// Number of entries currently in bucket `hash`
    pub fn bucket_len(&self, hash: usize) -> usize {
        self.inner.buckets[hash].lock().len()
    }

    /// Keys and insertion stamps of bucket `hash`, freshest first
    pub fn bucket_entries(&self, hash: usize) -> Vec<(PeerKey, u64)> {
        self.inner.buckets[hash].lock().entries()
    }

    /// Maximum number of cached connections, also the bucket count
    pub fn capacity(&self) -> usize {
        self.inner.buckets.len()
    }

    /// Configured keep-alive
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.inner.keep_alive_ms)
    }

    /// Slots currently occupied by parked connections
    pub fn slots_in_use(&self) -> usize {
        self.inner.slab.in_use()
    }

    /// Approximate number of parked connections, for diagnostics only
    pub fn len(&self) -> usize {
        self.inner.stats.live()
    }

    /// Check if the cache looks empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.inner.stats
    }

    /// Validate every bucket and the slot accounting
    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        // Hold every bucket, taken in index order like the sweeper
        let guards: Vec<_> = self.inner.buckets.iter().map(|lock| lock.lock()).collect();
        let mut total = 0;
        for bucket in &guards {
            bucket.debug_validate_invariants();
            total += bucket.len();
        }
        assert!(total <= self.inner.slab.capacity());
        assert_eq!(total, self.inner.slab.in_use());
    }
}

impl<T: Send + 'static> Drop for ConnCache<T> {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

impl<T: Send + 'static> fmt::Debug for ConnCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnCache")
            .field("capacity", &self.capacity())
            .field("keep_alive_ms", &self.inner.keep_alive_ms)
            .field("slots_in_use", &self.slots_in_use())
            .finish()
    }
}

impl<T> Inner<T> {
    /// Settle the accounting for entries already detached from bucket
    /// `hash`, then close them
    ///
    /// Runs under the bucket lock. If cleanup panics, the bucket and the
    /// slot budget are already consistent and the remaining payloads are
    /// dropped during unwinding.
    fn discard(&self, hash: usize, stale: Evicted<T>) -> usize {
        let evicted = stale.len();
        if evicted == 0 {
            return 0;
        }
        self.slab.release(evicted);
        self.stats.record_evictions(evicted);

        for (key, payload) in stale {
            trace!(peer = %key, hash, "expired connection removed from cache");
            (self.cleanup)(payload);
        }
        evicted
    }

    /// Drop every bucket whose head has expired
    fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let mut total = 0;

        for (hash, lock) in self.buckets.iter().enumerate() {
            let mut bucket = lock.lock();
            let head = bucket.head();
            let stale = bucket.truncate_expired(head, now, self.keep_alive_ms);
            total += self.discard(hash, stale);
        }

        self.stats.record_sweep();
        debug!(evicted = total, live = self.stats.live(), "sweep finished");
        total
    }
}

fn schedule_sweep<T: Send + 'static>(inner: &Arc<Inner<T>>, epoch: u64) {
    let mut task = inner.sweep_task.lock();
    if inner.sweep_epoch.load(Ordering::Acquire) != epoch {
        return;
    }

    let weak: Weak<Inner<T>> = Arc::downgrade(inner);
    let id = inner.timer.schedule(
        inner.sweep_interval,
        Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                run_scheduled_sweep(&inner, epoch);
            }
        }),
    );
    *task = Some(id);
}

/// Re-arms the sweep when dropped, including while a panicking cleanup
/// unwinds out of the sweep
struct Rearm<'a, T: Send + 'static> {
    inner: &'a Arc<Inner<T>>,
    epoch: u64,
}

impl<T: Send + 'static> Drop for Rearm<'_, T> {
    fn drop(&mut self) {
        schedule_sweep(self.inner, self.epoch);
    }
}

fn run_scheduled_sweep<T: Send + 'static>(inner: &Arc<Inner<T>>, epoch: u64) {
    if inner.sweep_epoch.load(Ordering::Acquire) != epoch {
        debug!(epoch, "stale sweep timer ignored");
        return;
    }
    let _rearm = Rearm { inner, epoch };
    inner.sweep();
}
