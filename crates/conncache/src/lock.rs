//! Per-bucket lock with an owning-thread tag
//!
//! Acquisition spins on `try_lock` and yields to the scheduler every
//! [`SPINS_BEFORE_YIELD`] failed attempts. While held, the lock records a tag
//! identifying the holding thread; a release whose tag does not match means
//! the lock state is corrupt and the process is aborted.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use parking_lot::{Mutex, MutexGuard};

/// Failed `try_lock` attempts between two `yield_now` calls
pub const SPINS_BEFORE_YIELD: u32 = 100;

/// Tag value meaning "not held"
const UNOWNED: u64 = 0;

static NEXT_THREAD_TAG: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TAG: u64 = NEXT_THREAD_TAG.fetch_add(1, Ordering::Relaxed);
}

/// Non-zero tag unique to the calling thread
pub fn thread_tag() -> u64 {
    THREAD_TAG.with(|tag| *tag)
}

/// Mutex around one bucket plus the tag of its current holder
#[derive(Debug)]
pub struct BucketLock<T> {
    data: Mutex<T>,
    owner: AtomicU64,
}

impl<T> BucketLock<T> {
    /// Wrap `value` in an unheld lock
    pub fn new(value: T) -> Self {
        Self {
            data: Mutex::new(value),
            owner: AtomicU64::new(UNOWNED),
        }
    }

    /// Spin until the lock is ours
    pub fn lock(&self) -> BucketGuard<'_, T> {
        let mut attempts: u32 = 0;
        let guard = loop {
            if let Some(guard) = self.data.try_lock() {
                break guard;
            }
            attempts = attempts.wrapping_add(1);
            if attempts % SPINS_BEFORE_YIELD == 0 {
                thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        };

        let tag = thread_tag();
        if let Err(found) =
            self.owner
                .compare_exchange(UNOWNED, tag, Ordering::AcqRel, Ordering::Acquire)
        {
            ownership_violation("acquire", UNOWNED, found);
        }

        BucketGuard {
            guard,
            owner: &self.owner,
            tag,
        }
    }

    /// Tag of the thread holding the lock, `None` when free
    pub fn owner(&self) -> Option<u64> {
        match self.owner.load(Ordering::Acquire) {
            UNOWNED => None,
            tag => Some(tag),
        }
    }

    /// Exclusive access without locking
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

/// RAII guard; clears the owner tag before the mutex is released
pub struct BucketGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    owner: &'a AtomicU64,
    tag: u64,
}

impl<T> Deref for BucketGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for BucketGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for BucketGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(found) =
            self.owner
                .compare_exchange(self.tag, UNOWNED, Ordering::AcqRel, Ordering::Acquire)
        {
            ownership_violation("release", self.tag, found);
        }
    }
}

fn ownership_violation(op: &str, expected: u64, found: u64) -> ! {
    tracing::error!(
        op,
        expected,
        found,
        thread = thread_tag(),
        "bucket lock owner mismatch, aborting"
    );
    std::process::abort()
}
