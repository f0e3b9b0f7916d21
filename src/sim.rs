//! Failure and load-balance simulation
//!
//! Helpers that damage a cluster on purpose (failed disks, rotten blocks) and
//! a dry run comparing the read load of block-selection schemes on a
//! generated layout.

use crate::cluster::ClusterState;
use crate::error::{Error, Result};
use crate::model::{layout, Disk, DiskId, DiskSet};
use crate::scheme::{select_blocks, BlockSelection, LoadStats};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use tracing::info;

/// What to break
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Named disks go offline
    Disks(Vec<DiskId>),
    /// `count` random active disks go offline
    RandomDisks(usize),
    /// `count` blocks of `file` are overwritten with noise
    BitRot { file: String, count: usize },
}

/// Apply `failure` to `cluster`. Returns the affected disks, or for bit-rot
/// the disks that hold rotten blocks.
pub fn inject<R: Rng + ?Sized>(
    cluster: &ClusterState,
    failure: &Failure,
    rng: &mut R,
) -> Result<Vec<DiskId>> {
    match failure {
        Failure::Disks(ids) => {
            cluster.fail_disks(ids)?;
            Ok(ids.clone())
        }
        Failure::RandomDisks(count) => cluster.fail_random(*count, rng),
        Failure::BitRot { file, count } => {
            let rotten = bit_rot(cluster, file, *count, rng)?;
            let snapshot = cluster
                .catalog()
                .get(file)
                .ok_or_else(|| Error::FileNotFound(file.clone()))?;
            let mut disks: Vec<DiskId> = rotten
                .iter()
                .map(|&(s, p)| snapshot.stripes[s].distribution[p])
                .collect();
            disks.sort_unstable();
            disks.dedup();
            Ok(disks)
        }
    }
}

/// Corrupt one random block in each of `count` distinct random stripes of
/// `file` and flag them in the catalog. Only blocks on available disks are
/// touched. Returns the `(stripe, position)` pairs.
pub fn bit_rot<R: Rng + ?Sized>(
    cluster: &ClusterState,
    file_name: &str,
    count: usize,
    rng: &mut R,
) -> Result<Vec<(usize, usize)>> {
    let file = cluster
        .catalog()
        .get(file_name)
        .ok_or_else(|| Error::FileNotFound(file_name.to_string()))?;
    let disks = cluster.snapshot();
    let bs = cluster.config().block_size;

    let picked = index::sample(rng, file.stripe_count(), count.min(file.stripe_count())).into_vec();
    let mut rotten = Vec::with_capacity(picked.len());
    for s in picked {
        let stripe = &file.stripes[s];
        let candidates: Vec<usize> = (0..stripe.width())
            .filter(|&p| disks.get(stripe.distribution[p]).is_some_and(|d| d.available))
            .collect();
        if candidates.is_empty() {
            continue;
        }
        let pos = candidates[rng.gen_range(0..candidates.len())];
        let disk = &disks[stripe.distribution[pos]];

        let mut noise = vec![0u8; bs as usize];
        rng.fill(noise.as_mut_slice());
        let blob = OpenOptions::new().write(true).open(disk.blob_path(file_name))?;
        blob.write_all_at(&noise, stripe.block_to_offset[pos] * bs)?;
        rotten.push((s, pos));
    }

    cluster.catalog().update(file_name, |f| {
        for &(s, p) in &rotten {
            f.mark_failed(s, p);
        }
    })?;
    rotten.sort_unstable();
    info!("Corrupted {} blocks of {}", rotten.len(), file_name);
    Ok(rotten)
}

// =============================================================================
// Load-Balance Simulation
// =============================================================================

/// Read-load of each compared scheme on one generated layout
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub stripes: usize,
    pub damaged: usize,
    pub results: Vec<(BlockSelection, LoadStats)>,
}

impl LoadReport {
    pub fn stats(&self, selection: BlockSelection) -> Option<&LoadStats> {
        self.results.iter().find(|(s, _)| *s == selection).map(|(_, st)| st)
    }
}

/// Compare FirstK, BalanceK and RandomK on `stripe_num` random stripes with
/// `failed` disks down. Deterministic for a given `seed`.
pub fn simulate_load_balance(
    data_shards: usize,
    parity_shards: usize,
    disk_num: usize,
    stripe_num: usize,
    failed: &[DiskId],
    seed: u64,
) -> Result<LoadReport> {
    let mut rng = StdRng::seed_from_u64(seed);
    let dists =
        layout::random_distribution(stripe_num, data_shards + parity_shards, disk_num, &mut rng)?;
    let mut counts = vec![0u64; disk_num];
    let stripes = layout::build_stripes(0, dists, &mut counts)?;
    let disks: Vec<Disk> = (0..disk_num).map(|i| Disk::new(i, "")).collect();
    let failed = DiskSet::from_ids(disk_num, failed.iter().copied());

    let mut results = Vec::new();
    let mut damaged = 0;
    for selection in [BlockSelection::FirstK, BlockSelection::BalanceK, BlockSelection::RandomK] {
        let scheme = select_blocks(selection, &stripes, &failed, &disks, data_shards, &mut rng);
        damaged = scheme.damaged().len();
        let stats = scheme.load_stats(disk_num);
        info!(
            "{}: max load {}, total load {} over {} damaged stripes",
            selection, stats.max_load, stats.sum_load, damaged
        );
        results.push((selection, stats));
    }

    Ok(LoadReport {
        stripes: stripe_num,
        damaged,
        results,
    })
}
