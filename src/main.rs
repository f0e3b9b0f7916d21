//! ecrepair command-line tool
//!
//! ```text
//! init → encode → fail → recover → restore
//! ```
//!
//! Every subcommand loads the cluster from the state file, acts on it and
//! writes it back, so a session is a sequence of independent invocations.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use ecrepair::sim::{self, Failure};
use ecrepair::{
    BlockSelection, ClusterState, EngineConfig, FileEncoder, RecoveryEngine, RecoveryMetrics,
    RecoveryMode, RecoveryOptions, ReedSolomonCodec,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// =============================================================================
// CLI Arguments
// =============================================================================

/// ecrepair - recovery engine for erasure-coded disk arrays
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// System state file
    #[arg(long, env = "ECREPAIR_STATE", default_value = "ecrepair-state.json", global = true)]
    state: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register disks and write a fresh state file
    Init(InitArgs),
    /// Stripe a file onto the disk array
    Encode {
        /// File to encode
        path: PathBuf,
    },
    /// Simulate failures
    Fail(FailArgs),
    /// Rebuild the lost blocks of a file onto spare disks
    Recover(RecoverArgs),
    /// Compare block-selection load on a generated layout
    Simulate(SimulateArgs),
    /// Bring every disk back online
    Restore,
}

#[derive(Args, Debug)]
struct InitArgs {
    /// File with one disk mount path per line
    #[arg(long)]
    mounts: PathBuf,

    /// File with one `read write` bandwidth pair (MB/s) per line
    #[arg(long)]
    bandwidth: Option<PathBuf>,

    /// JSON engine configuration; flags below override it
    #[arg(long, env = "ECREPAIR_CONFIG")]
    config: Option<PathBuf>,

    /// Data shards per stripe
    #[arg(short = 'k', long)]
    data_shards: Option<usize>,

    /// Parity shards per stripe
    #[arg(short = 'm', long)]
    parity_shards: Option<usize>,

    /// Number of active disks
    #[arg(long)]
    disk_num: Option<usize>,

    /// Block size in bytes
    #[arg(long)]
    block_size: Option<u64>,

    /// Memory budget for buffered stripes, in bytes
    #[arg(long, env = "ECREPAIR_MEMORY")]
    memory: Option<u64>,

    /// Number of highest-latency disks flagged slow
    #[arg(long)]
    slow_num: Option<usize>,

    /// Number of META replicas
    #[arg(long)]
    replicate_factor: Option<usize>,

    /// Maximum concurrent block transfers
    #[arg(long, env = "ECREPAIR_MAX_IO")]
    max_concurrent_io: Option<usize>,

    /// Replace existing backup directories during recovery
    #[arg(long)]
    override_existing: bool,

    /// Log per-scheme load statistics at debug level
    #[arg(long)]
    quiet: bool,
}

#[derive(Args, Debug)]
struct FailArgs {
    /// Disk ids to take offline
    #[arg(long, value_delimiter = ',', conflicts_with_all = ["random", "bit_rot"])]
    disks: Vec<usize>,

    /// Number of random active disks to take offline
    #[arg(long, conflicts_with = "bit_rot")]
    random: Option<usize>,

    /// Corrupt blocks of this file
    #[arg(long)]
    bit_rot: Option<String>,

    /// Number of blocks to corrupt
    #[arg(long, default_value = "1")]
    count: usize,

    /// Seed for random choices
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct RecoverArgs {
    /// File to recover
    file: String,

    /// Recovery mode (full, selected, ordered, scheduled, partial)
    #[arg(long, default_value = "full")]
    mode: String,

    /// Algorithm for the selected, ordered and scheduled modes
    #[arg(long)]
    algorithm: Option<String>,

    /// Rebuild data blocks only
    #[arg(long)]
    degrade: bool,

    /// Blocks read per wave in wave-based modes
    #[arg(long)]
    intra_stripe: Option<usize>,

    /// Decode without writing the rebuilt blocks
    #[arg(long)]
    no_write: bool,

    /// Extra read time charged to slow disks
    #[arg(long, default_value = "0")]
    slow_latency: f64,

    /// Seed for randomized schedulers
    #[arg(long)]
    seed: Option<u64>,

    /// Point failed disks at their backups once recovery succeeds
    #[arg(long)]
    apply_replacement: bool,

    /// Write Prometheus metrics to this file
    #[arg(long)]
    metrics_out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    #[arg(short = 'k', long, default_value = "6")]
    data_shards: usize,

    #[arg(short = 'm', long, default_value = "2")]
    parity_shards: usize,

    #[arg(long, default_value = "16")]
    disk_num: usize,

    #[arg(long, default_value = "1000")]
    stripes: usize,

    /// Failed disk ids
    #[arg(long, value_delimiter = ',', default_value = "0")]
    failed: Vec<usize>,

    #[arg(long, default_value = "0")]
    seed: u64,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli);

    match cli.command {
        Command::Init(args) => init(&cli.state, args),
        Command::Encode { path } => encode(&cli.state, &path),
        Command::Fail(args) => fail(&cli.state, args),
        Command::Recover(args) => recover(&cli.state, args).await,
        Command::Simulate(args) => simulate(args),
        Command::Restore => restore(&cli.state),
    }
}

fn rng_for(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

fn load_cluster(state: &Path) -> anyhow::Result<Arc<ClusterState>> {
    let cluster = ClusterState::load(state)
        .with_context(|| format!("failed to load state from {}", state.display()))?;
    Ok(Arc::new(cluster))
}

/// Save the state and refresh its META replicas
fn persist(cluster: &ClusterState, state: &Path) -> anyhow::Result<()> {
    cluster.save(state)?;
    let replicas = cluster.replicate_state(state, &mut StdRng::from_entropy())?;
    cluster.save(state)?;
    info!("State saved to {} (META on disks {:?})", state.display(), replicas);
    Ok(())
}

// =============================================================================
// Subcommands
// =============================================================================

fn init(state: &Path, args: InitArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(k) = args.data_shards {
        config.data_shards = k;
    }
    if let Some(m) = args.parity_shards {
        config.parity_shards = m;
    }
    if let Some(n) = args.disk_num {
        config.disk_num = n;
    }
    if let Some(bs) = args.block_size {
        config.block_size = bs;
    }
    if let Some(mem) = args.memory {
        config.memory_bytes = mem;
    }
    if let Some(slow) = args.slow_num {
        config.slow_num = slow;
    }
    if let Some(r) = args.replicate_factor {
        config.replicate_factor = r;
    }
    if let Some(io) = args.max_concurrent_io {
        config.max_concurrent_io = io;
    }
    config.override_existing |= args.override_existing;
    config.quiet |= args.quiet;
    config.validate()?;

    let cluster = ClusterState::from_disk_files(config, &args.mounts, args.bandwidth.as_deref())?;
    persist(&cluster, state)
}

fn encode(state: &Path, path: &Path) -> anyhow::Result<()> {
    let cluster = load_cluster(state)?;
    let config = cluster.config();
    let codec = Arc::new(ReedSolomonCodec::new(config.data_shards, config.parity_shards)?);
    let file = FileEncoder::new(Arc::clone(&cluster), codec)
        .encode_path(path, &mut StdRng::from_entropy())
        .with_context(|| format!("failed to encode {}", path.display()))?;
    info!("Encoded {} into {} stripes", file.name, file.stripe_count());
    persist(&cluster, state)
}

fn fail(state: &Path, args: FailArgs) -> anyhow::Result<()> {
    let cluster = load_cluster(state)?;
    let failure = match (args.bit_rot, args.random) {
        (Some(file), _) => Failure::BitRot {
            file,
            count: args.count,
        },
        (None, Some(count)) => Failure::RandomDisks(count),
        (None, None) if !args.disks.is_empty() => Failure::Disks(args.disks),
        (None, None) => anyhow::bail!("nothing to fail: pass --disks, --random or --bit-rot"),
    };
    let affected = sim::inject(&cluster, &failure, &mut rng_for(args.seed))?;
    info!("Injected {:?}, affected disks {:?}", failure, affected);
    cluster.save(state)?;
    Ok(())
}

async fn recover(state: &Path, args: RecoverArgs) -> anyhow::Result<()> {
    let cluster = load_cluster(state)?;
    let config = cluster.config();
    let codec = Arc::new(ReedSolomonCodec::new(config.data_shards, config.parity_shards)?);
    let metrics = Arc::new(RecoveryMetrics::new()?);
    let engine = RecoveryEngine::new(Arc::clone(&cluster), codec)
        .with_metrics(Arc::clone(&metrics))
        .with_state_file(state);

    let options = RecoveryOptions {
        degrade: args.degrade,
        mode: RecoveryMode::from_parts(&args.mode, args.algorithm.as_deref())?,
        intra_stripe: args.intra_stripe,
        write_to_backup: !args.no_write,
        slow_latency: args.slow_latency,
        seed: args.seed,
    };

    let replaced = engine
        .recover(&args.file, &options)
        .await
        .with_context(|| format!("recovery of {} failed", args.file))?;
    for (failed, backup) in replaced.iter() {
        info!("Disk {} rebuilt onto disk {}", failed, backup);
    }

    if args.apply_replacement {
        if options.write_to_backup {
            cluster.apply_replacement(&replaced)?;
            persist(&cluster, state)?;
        } else {
            warn!("Skipping replacement: nothing was written");
        }
    }

    if let Some(path) = args.metrics_out {
        std::fs::write(&path, metrics.render()?)
            .with_context(|| format!("failed to write metrics to {}", path.display()))?;
    }
    Ok(())
}

fn simulate(args: SimulateArgs) -> anyhow::Result<()> {
    let report = sim::simulate_load_balance(
        args.data_shards,
        args.parity_shards,
        args.disk_num,
        args.stripes,
        &args.failed,
        args.seed,
    )?;
    println!("{} stripes, {} damaged", report.stripes, report.damaged);
    for selection in BlockSelection::ALL {
        if let Some(stats) = report.stats(selection) {
            println!(
                "{:<10} max load {:>6}  total load {:>8}",
                selection.as_str(),
                stats.max_load,
                stats.sum_load
            );
        }
    }
    Ok(())
}

fn restore(state: &Path) -> anyhow::Result<()> {
    let cluster = load_cluster(state)?;
    cluster.restore_all();
    info!("All disks restored");
    cluster.save(state)?;
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(cli: &Cli) {
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
