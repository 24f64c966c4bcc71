//! Fixed-capacity slot budget shared by every bucket
//!
//! Buckets keep their nodes in local arenas, but a node may only be created
//! after a slot was granted here. The budget never grows, so the number of
//! live entries across the whole cache is bounded by its capacity.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Returned when every slot is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlabExhausted;

impl fmt::Display for SlabExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "No free slab slot")
    }
}

impl std::error::Error for SlabExhausted {}

/// Lock-free slot counter with a hard upper bound
#[derive(Debug)]
pub struct SlabBudget {
    capacity: usize,
    in_use: AtomicUsize,
}

impl SlabBudget {
    /// Reserve a budget of `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            in_use: AtomicUsize::new(0),
        }
    }

    /// Take one slot, failing when the budget is spent
    pub fn acquire(&self) -> Result<(), SlabExhausted> {
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.capacity).then_some(used + 1)
            })
            .map(|_| ())
            .map_err(|_| SlabExhausted)
    }

    /// Give back `n` slots
    pub fn release(&self, n: usize) {
        if n == 0 {
            return;
        }
        let prev = self.in_use.fetch_sub(n, Ordering::AcqRel);
        debug_assert!(prev >= n, "released {} slots with only {} in use", n, prev);
    }

    /// Slots currently handed out
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Slots still available
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.in_use())
    }

    /// Total slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_acquire_until_exhausted() {
        let slab = SlabBudget::new(2);
        assert!(slab.acquire().is_ok());
        assert!(slab.acquire().is_ok());
        assert_eq!(slab.acquire(), Err(SlabExhausted));
        assert_eq!(slab.in_use(), 2);
        assert_eq!(slab.available(), 0);

        slab.release(1);
        assert_eq!(slab.available(), 1);
        assert!(slab.acquire().is_ok());
    }

    #[test]
    fn test_concurrent_acquire_never_overshoots() {
        let slab = Arc::new(SlabBudget::new(100));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let slab = Arc::clone(&slab);
                thread::spawn(move || (0..50).filter(|_| slab.acquire().is_ok()).count())
            })
            .collect();

        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 100);
        assert_eq!(slab.in_use(), 100);
    }
}
