//! Timer facility driving the periodic sweep
//!
//! ## Implementations
//! - [`TokioTimer`]: sleeps on a tokio runtime, runs tasks on its blocking pool
//! - [`ManualTimer`]: runs pending tasks only when told to, for tests

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::error;

/// One-shot callback run by a timer
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Schedules one-shot tasks after a delay
pub trait Timer: Send + Sync {
    /// Run `task` once after `delay`
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerId;

    /// Drop a task that has not run yet; returns false if it already ran
    fn cancel(&self, id: TimerId) -> bool;
}

type Registry = Arc<Mutex<AHashMap<TimerId, AbortHandle>>>;

/// Timer backed by a tokio runtime
///
/// Each task sleeps on the runtime and then runs on its blocking pool, since
/// cache callbacks take bucket locks and close connections synchronously.
pub struct TokioTimer {
    runtime: Handle,
    next_id: AtomicU64,
    pending: Registry,
}

impl TokioTimer {
    /// Create a timer spawning onto `runtime`
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(AHashMap::new())),
        }
    }

    /// Create a timer on the runtime of the calling task
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Number of tasks waiting to run
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Timer for TokioTimer {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let registry = Arc::clone(&self.pending);

        // Held across the spawn so the task cannot finish before it is registered
        let mut pending = self.pending.lock();
        let join = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if registry.lock().remove(&id).is_none() {
                return;
            }
            if let Err(e) = tokio::task::spawn_blocking(task).await {
                error!(?id, "timer task failed: {}", e);
            }
        });
        pending.insert(id, join.abort_handle());
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        match self.pending.lock().remove(&id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        for (_, handle) in self.pending.lock().drain() {
            handle.abort();
        }
    }
}

struct ManualState {
    next_id: u64,
    pending: Vec<(TimerId, Duration, TimerTask)>,
}

/// Timer whose tasks only run on [`ManualTimer::fire`]
pub struct ManualTimer {
    state: Mutex<ManualState>,
}

impl ManualTimer {
    /// Create a timer with nothing scheduled
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManualState {
                next_id: 1,
                pending: Vec::new(),
            }),
        }
    }

    /// Run every task scheduled so far, ignoring delays
    ///
    /// Tasks scheduled while firing wait for the next call. Returns how many
    /// tasks ran.
    pub fn fire(&self) -> usize {
        let due = std::mem::take(&mut self.state.lock().pending);
        let ran = due.len();
        for (_, _, task) in due {
            task();
        }
        ran
    }

    /// Number of tasks waiting
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Delays of the waiting tasks, in scheduling order
    pub fn pending_delays(&self) -> Vec<Duration> {
        self.state
            .lock()
            .pending
            .iter()
            .map(|(_, delay, _)| *delay)
            .collect()
    }
}

impl Default for ManualTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for ManualTimer {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerId {
        let mut state = self.state.lock();
        let id = TimerId(state.next_id);
        state.next_id += 1;
        state.pending.push((id, delay, task));
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        let mut state = self.state.lock();
        let before = state.pending.len();
        state.pending.retain(|(pending, _, _)| *pending != id);
        state.pending.len() != before
    }
}
