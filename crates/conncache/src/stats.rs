//! Cache statistics tracking
//!
//! Every counter is advisory. They are updated with relaxed atomics outside
//! the bucket locks and may briefly disagree with the buckets under load, so
//! nothing in the cache reads them to make decisions.

use std::sync::atomic::{AtomicIsize, AtomicU64, Ordering};

/// Statistics for connection reuse tracking
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
    rejected: AtomicU64,
    sweeps: AtomicU64,
    /// Signed so a decrement racing ahead of its increment still cancels out
    live: AtomicIsize,
}

impl CacheStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection handed back to a caller
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.live_sub(1);
    }

    /// Record a lookup that found nothing
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection parked in the cache
    pub fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
        self.live.fetch_add(1, Ordering::Relaxed);
    }

    /// Record `n` connections dropped for age
    pub fn record_evictions(&self, n: usize) {
        if n == 0 {
            return;
        }
        self.evictions.fetch_add(n as u64, Ordering::Relaxed);
        self.live_sub(n);
    }

    /// Record a put refused for lack of room
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one completed sweep pass
    pub fn record_sweep(&self) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
    }

    /// Record `n` connections handed out by teardown
    pub fn record_drained(&self, n: usize) {
        self.live_sub(n);
    }

    fn live_sub(&self, n: usize) {
        self.live.fetch_sub(n as isize, Ordering::Relaxed);
    }

    /// Get total hits
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get total misses
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get total inserts
    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    /// Get total evictions
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get total rejected puts
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Get completed sweep passes
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    /// Approximate number of cached connections
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed).max(0) as usize
    }

    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Reset the event counters; the live gauge is left alone
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.inserts.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
        self.sweeps.store(0, Ordering::Relaxed);
    }
}
