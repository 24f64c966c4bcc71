//! conncache simulator - RPC clients reusing connections to dnodes

mod cluster;
mod workload;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, ensure, Context, Result};
use clap::Parser;
use conncache::{CacheConfig, TokioTimer};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info};

use crate::cluster::Cluster;
use crate::workload::Workload;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cache capacity (buckets and maximum parked connections)
    #[arg(short, long, default_value_t = 1024)]
    capacity: usize,

    /// Idle connection keep-alive in milliseconds
    #[arg(short, long, default_value_t = 1500)]
    keep_alive_ms: u64,

    /// Sweep period in milliseconds (default: twice the keep-alive)
    #[arg(long)]
    sweep_ms: Option<u64>,

    /// JSON cache config; overrides the three flags above
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of simulated dnodes
    #[arg(long, default_value_t = 8)]
    dnodes: u32,

    /// Vnode slots per dnode
    #[arg(long, default_value_t = 16)]
    vnodes_per_dnode: u32,

    /// Vgroups to place across the dnodes
    #[arg(long, default_value_t = 64)]
    vgroups: u32,

    /// Concurrent client tasks
    #[arg(short, long, default_value_t = 32)]
    workers: usize,

    /// Upper bound on how long a call holds its connection, in milliseconds
    #[arg(long, default_value_t = 5)]
    hold_ms: u64,

    /// How long to run, in seconds
    #[arg(short, long, default_value_t = 10)]
    duration_secs: u64,
}

impl Args {
    fn cache_config(&self) -> Result<CacheConfig> {
        let config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse config {}", path.display()))?
            }
            None => {
                let config =
                    CacheConfig::new(self.capacity, Duration::from_millis(self.keep_alive_ms));
                match self.sweep_ms {
                    Some(ms) => config.with_sweep_interval(Duration::from_millis(ms)),
                    None => config,
                }
            }
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    ensure!(args.vgroups > 0, "at least one vgroup is required");
    ensure!(args.workers > 0, "at least one worker is required");

    let config = args.cache_config()?;
    info!("Starting conncache simulator v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Cache capacity: {}, keep-alive: {}ms, sweep: {}ms",
        config.capacity,
        config.keep_alive_ms,
        config.sweep_interval().as_millis()
    );

    let cluster = Cluster::build(args.dnodes, args.vnodes_per_dnode, args.vgroups)?;
    for dnode in &cluster.dnodes {
        info!(
            "dnode {} hosts {}/{} vnodes",
            dnode.id, dnode.open_vnodes, dnode.total_vnodes
        );
    }

    let timer = Arc::new(TokioTimer::current());
    let workload = Arc::new(Workload::new(cluster, config, timer)?);

    let deadline = Instant::now() + Duration::from_secs(args.duration_secs);
    let max_hold = Duration::from_millis(args.hold_ms);
    info!("Running {} workers for {}s", args.workers, args.duration_secs);

    let tasks: Vec<_> = (0..args.workers)
        .map(|n| {
            let workload = Arc::clone(&workload);
            tokio::spawn(async move {
                let mut rng = StdRng::seed_from_u64(n as u64);
                while Instant::now() < deadline {
                    workload.call(&mut rng, max_hold).await?;
                }
                Ok::<_, anyhow::Error>(())
            })
        })
        .collect();

    let mut failed = None;
    for task in tasks {
        if let Err(e) = task.await.context("worker panicked")? {
            error!("Worker failed: {:#}", e);
            failed.get_or_insert(e);
        }
    }
    if let Some(e) = failed {
        return Err(e);
    }

    let workload = Arc::try_unwrap(workload).map_err(|_| anyhow!("workload still shared"))?;
    let summary = workload.finish();

    println!("\n📊 SUMMARY:");
    println!("   Calls:           {}", summary.calls);
    println!("   Dialed:          {}", summary.dialed);
    println!("   Reused:          {}", summary.reused);
    println!("   Hit ratio:       {:.3}", summary.hit_ratio);
    println!("   Expired+closed:  {}", summary.expired);
    println!("   Refused (full):  {}", summary.refused);
    println!("   Left at close:   {}", summary.leftover);
    println!("   Sweeps:          {}", summary.sweeps);

    Ok(())
}
