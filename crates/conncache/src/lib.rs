//! # conncache
//!
//! Idle connection cache for an RPC client: keeps connections to recently
//! used peers alive for a keep-alive period so the next call to the same
//! peer can skip the dial.
//!
//! ## Architecture
//! - **Buckets**: fixed hash table, one lock per bucket, peers hashed by
//!   address, port and connection kind
//! - **Lists**: index-linked per bucket, freshest first, so a stale suffix
//!   is dropped in one cut
//! - **Slab**: fixed slot budget bounding live entries
//! - **Sweeper**: timer task evicting buckets whose head has expired, driven
//!   by a tokio runtime ([`TokioTimer`]) or by hand in tests ([`ManualTimer`])
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use conncache::{CacheConfig, ConnCache, ManualTimer, PeerKey};
//!
//! let timer = Arc::new(ManualTimer::new());
//! let cache = ConnCache::open(
//!     CacheConfig::new(64, Duration::from_secs(2)),
//!     |conn: u64| drop(conn),
//!     timer,
//! )
//! .unwrap();
//!
//! let peer = PeerKey::new(0x0A00_0001, 6030, 0);
//! cache.put(peer, 17).unwrap();
//! assert_eq!(cache.get(peer), Some(17));
//! assert_eq!(cache.get(peer), None);
//! ```

#![warn(missing_docs)]

mod bucket;
mod cache;
mod clock;
mod config;
mod error;
mod key;
mod lock;
mod slab;
mod stats;
mod timer;

pub use cache::{CleanupFn, ConnCache};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::CacheConfig;
pub use error::{Error, PutError, Result};
pub use key::PeerKey;
pub use lock::{BucketGuard, BucketLock, SPINS_BEFORE_YIELD};
pub use slab::{SlabBudget, SlabExhausted};
pub use stats::CacheStats;
pub use timer::{ManualTimer, Timer, TimerId, TimerTask, TokioTimer};
