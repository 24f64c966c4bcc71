//! Simulated RPC clients reusing connections through the cache

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashSet;
use anyhow::{bail, Context, Result};
use conncache::{CacheConfig, ConnCache, PeerKey, Timer};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::Rng;
use tracing::trace;

use crate::cluster::Cluster;

/// Stand-in for a dialed RPC connection
#[derive(Debug)]
pub struct SimConn {
    pub id: u64,
    pub peer: PeerKey,
}

#[derive(Debug, Default)]
struct Tally {
    calls: AtomicU64,
    dialed: AtomicU64,
    reused: AtomicU64,
    expired: AtomicU64,
    refused: AtomicU64,
}

/// Totals reported once the workload is torn down
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub calls: u64,
    pub dialed: u64,
    pub reused: u64,
    pub expired: u64,
    pub refused: u64,
    pub leftover: u64,
    pub sweeps: u64,
    pub hit_ratio: f64,
}

pub struct Workload {
    cluster: Cluster,
    cache: ConnCache<SimConn>,
    checked_out: Mutex<AHashSet<u64>>,
    next_id: AtomicU64,
    tally: Arc<Tally>,
}

impl Workload {
    pub fn new(cluster: Cluster, config: CacheConfig, timer: Arc<dyn Timer>) -> Result<Self> {
        let tally = Arc::new(Tally::default());

        let expired = Arc::clone(&tally);
        let cache = ConnCache::open(
            config,
            move |conn: SimConn| {
                trace!(id = conn.id, peer = %conn.peer, "closing idle connection");
                expired.expired.fetch_add(1, Ordering::Relaxed);
            },
            timer,
        )
        .context("Failed to open connection cache")?;

        Ok(Self {
            cluster,
            cache,
            checked_out: Mutex::new(AHashSet::new()),
            next_id: AtomicU64::new(1),
            tally,
        })
    }

    /// One RPC: reuse a parked connection or dial, hold it, park it again
    pub async fn call(&self, rng: &mut StdRng, max_hold: Duration) -> Result<()> {
        let vgroup = rng.random_range(0..self.cluster.vgroups.len());
        let kind = rng.random_range(0..2u8);
        let peer = self.cluster.peer(vgroup, kind);
        let hold_ms = rng.random_range(0..=max_hold.as_millis() as u64);

        let conn = match self.cache.get(peer) {
            Some(conn) => {
                self.tally.reused.fetch_add(1, Ordering::Relaxed);
                conn
            }
            None => {
                self.tally.dialed.fetch_add(1, Ordering::Relaxed);
                SimConn {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    peer,
                }
            }
        };

        if conn.peer != peer {
            bail!("connection {} to {} handed out for {}", conn.id, conn.peer, peer);
        }
        if !self.checked_out.lock().insert(conn.id) {
            bail!("connection {} handed out twice", conn.id);
        }

        if hold_ms == 0 {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(Duration::from_millis(hold_ms)).await;
        }

        self.checked_out.lock().remove(&conn.id);
        if let Err(err) = self.cache.put(peer, conn) {
            let conn = err.into_inner();
            trace!(id = conn.id, %peer, "cache full, closing connection");
            self.tally.refused.fetch_add(1, Ordering::Relaxed);
        }

        self.tally.calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Close the cache and collect totals
    pub fn finish(self) -> Summary {
        let sweeps = self.cache.stats().sweeps();
        let hit_ratio = self.cache.stats().hit_ratio();
        let leftover = self.cache.close().len() as u64;

        Summary {
            calls: self.tally.calls.load(Ordering::Relaxed),
            dialed: self.tally.dialed.load(Ordering::Relaxed),
            reused: self.tally.reused.load(Ordering::Relaxed),
            expired: self.tally.expired.load(Ordering::Relaxed),
            refused: self.tally.refused.load(Ordering::Relaxed),
            leftover,
            sweeps,
            hit_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conncache::ManualTimer;
    use rand::SeedableRng;

    fn workload(capacity: usize, vgroups: u32) -> Workload {
        let cluster = Cluster::build(4, 8, vgroups).unwrap();
        Workload::new(
            cluster,
            CacheConfig::new(capacity, Duration::from_secs(60)),
            Arc::new(ManualTimer::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_sequential_calls_reuse_connections() {
        let wl = workload(64, 1);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..20 {
            wl.call(&mut rng, Duration::ZERO).await.unwrap();
        }

        let summary = wl.finish();
        assert_eq!(summary.calls, 20);
        // One vgroup, two connection kinds
        assert!(summary.dialed <= 2);
        assert_eq!(summary.dialed + summary.reused, 20);
        assert_eq!(summary.leftover, summary.dialed);
    }

    #[tokio::test]
    async fn test_every_connection_accounted_for() {
        let wl = Arc::new(workload(4, 16));

        let tasks: Vec<_> = (0..8u64)
            .map(|seed| {
                let wl = Arc::clone(&wl);
                tokio::spawn(async move {
                    let mut rng = StdRng::seed_from_u64(seed);
                    for _ in 0..50 {
                        wl.call(&mut rng, Duration::from_millis(1)).await?;
                    }
                    Ok::<_, anyhow::Error>(())
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let wl = Arc::try_unwrap(wl).ok().unwrap();
        let summary = wl.finish();
        assert_eq!(summary.calls, 400);
        assert_eq!(summary.dialed, summary.expired + summary.refused + summary.leftover);
    }
}
