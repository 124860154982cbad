//! vidcache CLI
//!
//! Scan directories of video files into the metadata cache, query the
//! resolutions it has seen, and evict stale entries.

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use vidcache::{
    replication, CacheConfig, CacheError, FfprobeProber, MetadataCache, ReplicationManager,
    ScanCoordinator, ScanOutcome, ScanSummary, StorePaths,
};

/// Per-file video metadata cache
#[derive(Parser)]
#[command(name = "vidcache")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Canonical database file
    #[arg(short = 'd', long, default_value = "vidcache.db", global = true)]
    db: PathBuf,

    /// Scratch directory for the working copy when the database lives on a
    /// network mount
    #[arg(long, global = true)]
    scratch: Option<PathBuf>,

    /// Treat the database and scan roots as network-mounted
    #[arg(long, global = true)]
    network: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a directory of video files into the cache
    Scan {
        /// Directory to scan
        root: PathBuf,

        /// Re-scan even if the directory completed a full scan recently
        #[arg(short, long)]
        force: bool,

        /// Emit the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// List distinct resolutions cached under a directory prefix
    Resolutions {
        /// Directory prefix to filter on
        prefix: String,
    },
    /// Evict a path from the cache
    Evict {
        /// Exact path of the record to remove
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CacheError> {
    let config = CacheConfig::builder().network(cli.network).build();
    let (cache, manager) = open_session(&cli, &config).await?;
    let cache = Arc::new(cache);

    match cli.command {
        Commands::Scan { root, force, json } => {
            let prober = Arc::new(FfprobeProber::new());
            let coordinator = ScanCoordinator::new(Arc::clone(&cache), prober, config);

            let token = CancellationToken::new();
            spawn_ctrl_c_handler(token.clone());

            let started = Instant::now();
            let mut rx = coordinator.scan_directory(&root, force, token).await?;
            let mut summary = ScanSummary::default();
            while let Some(event) = rx.recv().await {
                summary.record_event(&event);
                if !json {
                    print_event(&event);
                }
            }
            summary.duration_ms = started.elapsed().as_millis() as u64;

            if json {
                match serde_json::to_string_pretty(&summary) {
                    Ok(out) => println!("{out}"),
                    Err(e) => warn!("could not serialize summary: {e}"),
                }
            } else {
                print_summary(&summary);
            }
        }
        Commands::Resolutions { prefix } => {
            for label in cache.get_unique_resolutions(&prefix) {
                println!("{label}");
            }
        }
        Commands::Evict { path } => {
            let key = path.to_string_lossy();
            if cache.get_cached_metadata(&key).is_none() {
                println!("no cached record for {key}");
            } else {
                cache.remove_metadata(&key);
                println!("evicted {key}");
            }
        }
    }

    // Drain the store writer before the final replication push so the
    // canonical copy holds every write
    cache.close().await;
    if let Some(manager) = manager {
        manager.stop().await?;
    }
    Ok(())
}

/// Resolve store paths, pull the canonical copy if needed, and open the
/// cache with replication running
async fn open_session(
    cli: &Cli,
    config: &CacheConfig,
) -> Result<(MetadataCache, Option<ReplicationManager>), CacheError> {
    let scratch = cli
        .scratch
        .clone()
        .unwrap_or_else(std::env::temp_dir);
    let network = cli.network;
    let paths = StorePaths::resolve(&cli.db, &scratch, |_| network);

    // A failed pull is a cold cache, not a fatal error
    if let Err(e) = replication::pull(&paths).await {
        warn!("could not pull canonical store, starting cold: {e}");
    }

    let cache = MetadataCache::open(&paths.active, config)?;
    info!("cache open with {} records", cache.len());

    let manager = if paths.is_replicated() {
        let mut manager = ReplicationManager::new(paths);
        manager.start(config.replication_interval());
        Some(manager)
    } else {
        None
    };

    Ok((cache, manager))
}

fn spawn_ctrl_c_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; finishing current batch");
            token.cancel();
        }
    });
}

fn print_event(event: &vidcache::ScanEvent) {
    let detail = match &event.outcome {
        ScanOutcome::Updated(r) | ScanOutcome::Cached(r) => r.resolution.clone(),
        ScanOutcome::Unsupported(_) => "unsupported".to_string(),
        ScanOutcome::TransientError(msg) => msg.clone(),
    };
    println!(
        "[{}/{}] {} {} ({})",
        event.completed,
        event.total,
        event.outcome.as_str(),
        event.path.display(),
        detail
    );
}

fn print_summary(summary: &ScanSummary) {
    println!("Scan completed:");
    println!("  Total files: {}", summary.total);
    println!("  Updated: {}", summary.updated);
    println!("  From cache: {}", summary.cached);
    println!("  Unsupported: {}", summary.unsupported);
    println!("  Errors: {}", summary.errors);
    println!("  Duration: {}ms", summary.duration_ms);
}
