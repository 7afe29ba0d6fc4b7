use alibi_core::{
    BlockRangeScanner, BlockRangeStore, Blocklist, CommitmentStore, ExclusionTreeBuilder,
    PoolEntry, PoolKey, PoolRegistry, ProgressReporter, ProverParameters, RateLimiter,
    RateLimiterConfig, ScannerConfig, TracingReporter, TreeBuilder,
};
use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

mod config;
mod constants;
mod error;
mod progress;
mod rpc;
mod storage;

use crate::rpc::EthRpcSource;
use crate::storage::SledStore;

#[derive(Parser, Debug)]
#[command(name = "alibi")]
#[command(about = "proof-of-innocence indexer: deposit scans and exclusion trees", long_about = None)]
struct Args {
    /// sled database path
    #[arg(long, env = "ALIBI_DB", default_value = constants::DEFAULT_DB_PATH, global = true)]
    db_path: String,

    /// JSON-RPC endpoint per chain, as chain=url (repeatable)
    #[arg(
        long = "rpc",
        env = "ALIBI_RPC",
        value_delimiter = ',',
        value_parser = config::parse_endpoint,
        global = true
    )]
    rpc: Vec<(u64, String)>,

    /// TOML file adding or overriding pool deployments
    #[arg(long, env = "ALIBI_POOLS", global = true)]
    pools: Option<PathBuf>,

    /// draw progress bars instead of logging progress
    #[arg(long, global = true)]
    progress: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
struct PoolArgs {
    /// pool name, e.g. 1ETH
    #[arg(long)]
    pool: String,

    #[arg(long, default_value_t = 1)]
    chain_id: u64,
}

#[derive(ClapArgs, Debug, Clone)]
struct BlocklistArgs {
    /// JSON file holding {"blocklist": [addresses]}
    #[arg(long)]
    blocklist: PathBuf,

    /// content id of the blocklist version
    #[arg(long)]
    cid: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// scan a pool's deposits up to the sanctioned block
    Scan {
        #[command(flatten)]
        pool: PoolArgs,

        /// first block not scanned; defaults to the chain head
        #[arg(long, env = "ALIBI_SANCTIONED_AT")]
        sanctioned_at: Option<u64>,

        /// blocks per range
        #[arg(long, default_value_t = 2000)]
        range_span: u64,

        /// compute units the node grants per second
        #[arg(long, default_value_t = constants::DEFAULT_COMPUTE_UNITS)]
        compute_units: u32,

        /// receipt lookups in flight at once
        #[arg(long, default_value_t = 16)]
        receipt_concurrency: usize,

        /// give up after this many retry rounds without progress
        #[arg(long)]
        max_retry_rounds: Option<u32>,
    },

    /// print scan progress of a pool
    Status {
        #[command(flatten)]
        pool: PoolArgs,
    },

    /// build the full deposit tree of a pool
    Tree {
        #[command(flatten)]
        pool: PoolArgs,

        /// write the tree here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// build the exclusion tree over blocklisted deposits
    ExclusionTree {
        #[command(flatten)]
        pool: PoolArgs,

        #[command(flatten)]
        blocklist: BlocklistArgs,

        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// bundle both trees for a prover
    ProverParams {
        #[command(flatten)]
        pool: PoolArgs,

        #[command(flatten)]
        blocklist: BlocklistArgs,

        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// drop every indexed row of a pool
    Reset {
        #[command(flatten)]
        pool: PoolArgs,
    },

    /// list known pool deployments
    Pools,
}

/// everything a command needs
struct App {
    store: Arc<SledStore>,
    chain: Arc<EthRpcSource>,
    progress: Arc<dyn ProgressReporter>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "alibi=info,alibi_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let registry = config::load_registry(args.pools.as_deref())?;

    info!("database: {}", args.db_path);
    for (chain_id, url) in &args.rpc {
        info!("chain {} via {}", chain_id, url);
    }

    let progress: Arc<dyn ProgressReporter> = if args.progress {
        Arc::new(progress::BarReporter::new())
    } else {
        Arc::new(TracingReporter)
    };
    let app = App {
        store: Arc::new(SledStore::open(&args.db_path)?),
        chain: Arc::new(EthRpcSource::new(registry, args.rpc.clone())),
        progress,
    };

    let result = run(&app, args.command).await;
    app.store.flush().await?;
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

async fn run(app: &App, command: Command) -> Result<()> {
    match command {
        Command::Scan {
            pool,
            sanctioned_at,
            range_span,
            compute_units,
            receipt_concurrency,
            max_retry_rounds,
        } => {
            let limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
                capacity: compute_units,
                refill_per_second: compute_units,
            })?);
            let config = ScannerConfig {
                sanctioned_at_block: sanctioned_at.unwrap_or(u64::MAX),
                range_span,
                receipt_concurrency,
                max_retry_rounds,
                ..Default::default()
            };
            let scanner = BlockRangeScanner::new(
                app.chain.clone(),
                app.store.clone(),
                app.store.clone(),
                limiter,
                config,
            )?
            .with_progress(app.progress.clone());

            let (stop, cancel) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted, stopping scan; rerun to resume");
                    let _ = stop.send(true);
                }
            });

            let summary = scanner.scan_until(&pool.pool, pool.chain_id, cancel).await?;
            print_json(&summary, None)
        }

        Command::Status { pool } => {
            let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::default())?);
            let scanner = BlockRangeScanner::new(
                app.chain.clone(),
                app.store.clone(),
                app.store.clone(),
                limiter,
                ScannerConfig::default(),
            )?;
            let status = scanner.status(&pool.pool, pool.chain_id).await?;
            print_json(&status, None)
        }

        Command::Tree { pool, out } => {
            let trees = TreeBuilder::new(app.chain.clone(), app.store.clone())
                .with_progress(app.progress.clone());
            let tree = trees.build(&pool.pool, pool.chain_id).await?;
            print_json(&tree, out.as_deref())
        }

        Command::ExclusionTree { pool, blocklist, out } => {
            let blocklist = read_blocklist(&blocklist)?;
            let exclusions = ExclusionTreeBuilder::new(app.chain.clone(), app.store.clone())
                .with_progress(app.progress.clone());
            let tree = exclusions
                .build_for(&pool.pool, pool.chain_id, &blocklist)
                .await?;
            print_json(&tree, out.as_deref())
        }

        Command::ProverParams { pool, blocklist, out } => {
            let blocklist = read_blocklist(&blocklist)?;
            let trees = TreeBuilder::new(app.chain.clone(), app.store.clone())
                .with_progress(app.progress.clone());
            let exclusions = ExclusionTreeBuilder::new(app.chain.clone(), app.store.clone())
                .with_progress(app.progress.clone());
            let params =
                ProverParameters::assemble(&trees, &exclusions, &pool.pool, pool.chain_id, &blocklist)
                    .await?;
            print_json(&params, out.as_deref())
        }

        Command::Reset { pool } => {
            let key = PoolKey::checked(&pool.pool, pool.chain_id)?;
            let commitments = CommitmentStore::remove_all(app.store.as_ref(), &key).await?;
            let ranges = BlockRangeStore::remove_all(app.store.as_ref(), &key).await?;
            info!("{}: removed {} commitments and {} ranges", key, commitments, ranges);
            Ok(())
        }

        Command::Pools => print_pools(app.chain.registry()),
    }
}

fn read_blocklist(args: &BlocklistArgs) -> Result<Blocklist> {
    let bytes = std::fs::read(&args.blocklist)
        .with_context(|| format!("failed to read blocklist {}", args.blocklist.display()))?;
    let blocklist = Blocklist::from_json(args.cid.clone(), &bytes)
        .with_context(|| format!("invalid blocklist {}", args.blocklist.display()))?;
    if blocklist.is_empty() {
        warn!("blocklist {} is empty", blocklist.cid());
    }
    info!("blocklist {}: {} addresses", blocklist.cid(), blocklist.len());
    Ok(blocklist)
}

fn print_json<T: Serialize>(value: &T, out: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("wrote {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn print_pools(registry: &PoolRegistry) -> Result<()> {
    if registry.is_empty() {
        bail!("no pools configured");
    }
    let entries: Vec<_> = registry
        .iter()
        .map(|(key, deployment)| PoolEntry {
            pool: key.pool_name.clone(),
            chain_id: key.chain_id,
            address: deployment.address.clone(),
            created_at_block: deployment.created_at_block,
        })
        .collect();
    print_json(&entries, None)
}
