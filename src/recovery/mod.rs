//! Recovery Execution Harness
//!
//! Rebuilds the blocks a file lost on failed disks and writes them to spare
//! disks. One call runs through these phases:
//!
//! ```text
//! OpenInputs -> OpenOutputs -> { Read -> Verify -> Reconstruct -> Write }* -> Done
//! ```
//!
//! The stripe loop runs in rounds planned by the selected [`RecoveryMode`].
//! Each round fans out one task per stripe and each stripe one bounded task
//! per block transfer. Rounds are separated by a barrier.

mod io;
mod plan;
mod repair;
mod task_group;

pub use repair::StripeTask;
pub use task_group::TaskGroup;

use crate::cluster::ClusterState;
use crate::codec::RecoveryCodec;
use crate::conflict::ConflictScheduler;
use crate::error::{Error, Result};
use crate::metrics::RecoveryMetrics;
use crate::model::{Disk, DiskId, DiskSet, ReplaceMap};
use crate::order::SlotOrdering;
use crate::scheme::BlockSelection;
use plan::PlanInput;
use rand::rngs::StdRng;
use rand::SeedableRng;
use repair::RepairContext;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

// =============================================================================
// Options
// =============================================================================

/// Which recovery algorithm drives the stripe loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    /// Read every surviving block of every stripe
    Full,
    /// Read K blocks chosen by a block-selection scheme
    BlockSelected(BlockSelection),
    /// Run stripes in lanes computed by a stripe-ordering scheduler
    Ordered(SlotOrdering),
    /// Run stripes in conflict-free slots
    ConflictScheduled(ConflictScheduler),
    /// Run stripes in waves of `intra_stripe` blocks
    Partial,
}

impl RecoveryMode {
    /// Build a mode from its name and, where needed, its algorithm name
    pub fn from_parts(mode: &str, algorithm: Option<&str>) -> Result<Self> {
        let missing = || Error::UnknownScheme(format!("{} requires an algorithm", mode));
        match mode.to_ascii_lowercase().as_str() {
            "full" | "baseline" => Ok(RecoveryMode::Full),
            "selected" | "block-selected" => {
                Ok(RecoveryMode::BlockSelected(algorithm.ok_or_else(missing)?.parse()?))
            }
            "ordered" => Ok(RecoveryMode::Ordered(algorithm.ok_or_else(missing)?.parse()?)),
            "scheduled" | "conflict" | "conflict-scheduled" => {
                Ok(RecoveryMode::ConflictScheduled(algorithm.ok_or_else(missing)?.parse()?))
            }
            "partial" => Ok(RecoveryMode::Partial),
            _ => Err(Error::UnknownScheme(mode.to_string())),
        }
    }

    /// Whether rotten-block hints are repaired by this mode
    pub fn repairs_bit_rot(&self) -> bool {
        matches!(self, RecoveryMode::Full | RecoveryMode::ConflictScheduled(_))
    }
}

impl fmt::Display for RecoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryMode::Full => write!(f, "full"),
            RecoveryMode::BlockSelected(s) => write!(f, "selected({})", s),
            RecoveryMode::Ordered(o) => write!(f, "ordered({})", o),
            RecoveryMode::ConflictScheduled(c) => write!(f, "scheduled({})", c),
            RecoveryMode::Partial => write!(f, "partial"),
        }
    }
}

/// Options for a single recovery call
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryOptions {
    /// Rebuild data blocks only, leaving lost parity unrepaired
    pub degrade: bool,
    pub mode: RecoveryMode,
    /// Blocks read per wave in wave-based modes; `None` lets the engine decide
    pub intra_stripe: Option<usize>,
    /// Persist rebuilt blocks; when off the call only reads and decodes
    pub write_to_backup: bool,
    /// Extra read time charged to slow disks in the repair-time model
    pub slow_latency: f64,
    /// Seed for the randomized schedulers
    pub seed: Option<u64>,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            degrade: false,
            mode: RecoveryMode::Full,
            intra_stripe: None,
            write_to_backup: true,
            slow_latency: 0.0,
            seed: None,
        }
    }
}

/// Progress markers of a recovery call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPhase {
    OpenInputs,
    OpenOutputs,
    Read,
    Verify,
    Reconstruct,
    Write,
    Done,
}

impl fmt::Display for RecoveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryPhase::OpenInputs => write!(f, "OpenInputs"),
            RecoveryPhase::OpenOutputs => write!(f, "OpenOutputs"),
            RecoveryPhase::Read => write!(f, "Read"),
            RecoveryPhase::Verify => write!(f, "Verify"),
            RecoveryPhase::Reconstruct => write!(f, "Reconstruct"),
            RecoveryPhase::Write => write!(f, "Write"),
            RecoveryPhase::Done => write!(f, "Done"),
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Recovers cataloged files of a cluster
pub struct RecoveryEngine {
    cluster: Arc<ClusterState>,
    codec: Arc<dyn RecoveryCodec>,
    metrics: Option<Arc<RecoveryMetrics>>,
    state_file: Option<PathBuf>,
}

impl RecoveryEngine {
    pub fn new(cluster: Arc<ClusterState>, codec: Arc<dyn RecoveryCodec>) -> Self {
        Self {
            cluster,
            codec,
            metrics: None,
            state_file: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<RecoveryMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// System state file copied to backups that replace a META holder
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = Some(path.into());
        self
    }

    pub fn cluster(&self) -> &Arc<ClusterState> {
        &self.cluster
    }

    /// Rebuild `file_name` onto spare disks. Returns the failed-to-backup
    /// mapping used.
    #[instrument(skip(self, options), fields(mode = %options.mode))]
    pub async fn recover(&self, file_name: &str, options: &RecoveryOptions) -> Result<ReplaceMap> {
        let started = Instant::now();
        let config = self.cluster.config();
        let file = self
            .cluster
            .catalog()
            .get(file_name)
            .ok_or_else(|| Error::FileNotFound(file_name.to_string()))?;
        let mut disks = self.cluster.snapshot();
        let disk_num = config.disk_num;
        let k = config.data_shards;

        // ---------------------------------------------------------------------
        // Inputs
        // ---------------------------------------------------------------------
        info!(
            phase = %RecoveryPhase::OpenInputs,
            "Recovering {} ({} stripes)",
            file_name,
            file.stripe_count()
        );
        let mut inputs: Vec<Option<Arc<std::fs::File>>> = vec![None; disks.len()];
        let mut lost = Vec::new();
        for disk in disks.iter_mut().take(disk_num).filter(|d| d.available) {
            match io::open_read(&disk.blob_path(file_name)) {
                Ok(f) => inputs[disk.id] = Some(f),
                Err(e) => {
                    warn!("Cannot open blob of {} on disk {}: {}", file_name, disk.id, e);
                    disk.available = false;
                    lost.push(disk.id);
                }
            }
        }
        if !lost.is_empty() {
            self.cluster.fail_disks(&lost)?;
        }

        let failed = DiskSet::from_ids(
            disks.len(),
            disks.iter().take(disk_num).filter(|d| !d.available).map(|d| d.id),
        );
        let alive = disk_num - failed.len();
        if alive < k {
            return Err(Error::TooFewDisksAlive { alive, required: k });
        }

        let spares: Vec<DiskId> = disks
            .iter()
            .skip(disk_num)
            .filter(|d| d.available)
            .map(|d| d.id)
            .collect();
        if failed.len() > spares.len() {
            return Err(Error::NotEnoughBackups {
                failed: failed.len(),
                spares: spares.len(),
            });
        }
        let mut replace = ReplaceMap::new();
        for (f, &b) in failed.iter().zip(&spares) {
            replace.insert(f, b, &disks[f].mount_path, &disks[b].mount_path);
        }
        if !failed.is_empty() {
            info!("{} disks failed, {} alive, rebuilding onto {:?}", failed.len(), alive, spares);
        }

        // ---------------------------------------------------------------------
        // Plan
        // ---------------------------------------------------------------------
        let mut rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let plan = plan::plan(
            &PlanInput {
                file: &file,
                disks: &disks,
                failed: &failed,
                config,
                options,
            },
            &mut rng,
        )?;
        debug!(
            "Planned {} stripe tasks in {} rounds ({} bytes per stripe, {} in flight)",
            plan.task_count(),
            plan.rounds.len(),
            plan.footprint,
            plan.concurrency
        );

        // ---------------------------------------------------------------------
        // Outputs
        // ---------------------------------------------------------------------
        let mut outputs = HashMap::new();
        let mut rewrites = HashMap::new();
        if options.write_to_backup {
            info!(phase = %RecoveryPhase::OpenOutputs, "Opening {} backup blobs", replace.len());
            let targets: Vec<(PathBuf, PathBuf)> = replace
                .iter()
                .map(|(_, b)| (disks[b].file_dir(file_name), disks[b].blob_path(file_name)))
                .collect();
            let blobs = io::create_blobs(&targets, config.override_existing)?;
            outputs.extend(replace.iter().map(|(f, _)| f).zip(blobs));
            if options.mode.repairs_bit_rot() {
                for d in plan::hinted_disks(&file, &failed) {
                    rewrites.insert(d, io::open_write(&disks[d].blob_path(file_name))?);
                }
            }
        }

        // ---------------------------------------------------------------------
        // Stripe loop
        // ---------------------------------------------------------------------
        let ctx = Arc::new(RepairContext {
            codec: Arc::clone(&self.codec),
            file: Arc::new(file),
            inputs,
            outputs,
            rewrites,
            failed,
            block_size: config.block_size,
            degrade: options.degrade,
            io: Arc::new(Semaphore::new(config.max_concurrent_io.max(1))),
            metrics: self.metrics.clone(),
        });

        let mut rewritten = Vec::new();
        for (i, round) in plan.rounds.into_iter().enumerate() {
            debug!(round = i, stripes = round.len(), "Starting round");
            rewritten.extend(repair::run_round(&ctx, round).await?);
        }
        for file in ctx.outputs.values().chain(ctx.rewrites.values()) {
            io::sync(Arc::clone(file)).await?;
        }

        // ---------------------------------------------------------------------
        // Finish
        // ---------------------------------------------------------------------
        if options.write_to_backup {
            self.propagate_meta(&disks, &replace)?;
        }
        if !rewritten.is_empty() {
            self.cluster.catalog().update(file_name, |f| {
                for &(s, p) in &rewritten {
                    f.mark_ok(s, p);
                }
            })?;
            info!("Rewrote {} rotten blocks in place", rewritten.len());
        }

        let elapsed = started.elapsed();
        if let Some(m) = &self.metrics {
            m.recovery_duration.observe(elapsed.as_secs_f64());
        }
        info!(
            phase = %RecoveryPhase::Done,
            "Recovered {} in {:.3}s",
            file_name,
            elapsed.as_secs_f64()
        );
        Ok(replace)
    }

    /// Place a META replica on every backup that replaces a META holder
    fn propagate_meta(&self, disks: &[Disk], replace: &ReplaceMap) -> Result<()> {
        for (f, b) in replace.iter() {
            if !disks[f].has_meta {
                continue;
            }
            let Some(source) = self.meta_source(disks) else {
                warn!("Disk {} carried META but no replica survives", f);
                continue;
            };
            std::fs::copy(&source, disks[b].meta_path())?;
            self.cluster.update_disks(|all| {
                if let Some(d) = all.get_mut(b) {
                    d.has_meta = true;
                }
            });
            debug!("Copied META from {} to disk {}", source.display(), b);
        }
        Ok(())
    }

    fn meta_source(&self, disks: &[Disk]) -> Option<PathBuf> {
        if let Some(path) = self.state_file.as_deref().filter(|p| p.exists()) {
            return Some(path.to_path_buf());
        }
        disks
            .iter()
            .take(self.cluster.config().disk_num)
            .filter(|d| d.available && d.has_meta)
            .map(Disk::meta_path)
            .find(|p| Path::new(p).exists())
    }
}

// =============================================================================
// Tests
// =============================================================================
