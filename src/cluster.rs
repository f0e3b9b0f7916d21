//! Cluster State
//!
//! Owns the engine configuration, the disk registry and the file catalog.
//! Disk flags are mutated under a single reader/writer lock; recovery runs on
//! an immutable [`ClusterState::snapshot`] taken at the start of each call.

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::model::{registry, Disk, DiskId, DiskSet, FileInfo, ReplaceMap};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

// =============================================================================
// Persisted State
// =============================================================================

/// On-disk form of the cluster state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemState {
    pub config: EngineConfig,
    pub disks: Vec<Disk>,
    pub files: Vec<FileInfo>,
    pub saved_at: DateTime<Utc>,
}

// =============================================================================
// Cluster State
// =============================================================================

/// Disk registry and catalog shared by the engine components
#[derive(Debug)]
pub struct ClusterState {
    config: EngineConfig,
    disks: RwLock<Vec<Disk>>,
    catalog: Catalog,
}

impl ClusterState {
    /// Create a cluster over `disks`; ids must equal their position
    pub fn new(config: EngineConfig, disks: Vec<Disk>) -> Result<Self> {
        Self::with_catalog(config, disks, Catalog::new())
    }

    fn with_catalog(config: EngineConfig, disks: Vec<Disk>, catalog: Catalog) -> Result<Self> {
        config.validate()?;
        if disks.len() < config.disk_num {
            return Err(Error::InvalidConfig(format!(
                "{} disks registered but disk_num is {}",
                disks.len(),
                config.disk_num
            )));
        }
        if let Some(d) = disks.iter().enumerate().find(|(i, d)| d.id != *i) {
            return Err(Error::InvalidConfig(format!(
                "disk at position {} has id {}",
                d.0, d.1.id
            )));
        }
        Ok(Self {
            config,
            disks: RwLock::new(disks),
            catalog,
        })
    }

    /// Build a cluster from a mount-path file and an optional bandwidth file
    pub fn from_disk_files(
        config: EngineConfig,
        mount_file: &Path,
        bandwidth_file: Option<&Path>,
    ) -> Result<Self> {
        let mut disks = registry::load_mount_paths(mount_file)?;
        if let Some(bw) = bandwidth_file {
            registry::load_bandwidth(bw, &mut disks)?;
        }
        registry::mark_slowest(&mut disks, config.disk_num, config.slow_num);
        info!(
            "Registered {} disks ({} active, {} spare)",
            disks.len(),
            config.disk_num,
            disks.len().saturating_sub(config.disk_num)
        );
        Self::new(config, disks)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Immutable copy of the disk registry
    pub fn snapshot(&self) -> Vec<Disk> {
        self.disks.read().clone()
    }

    pub fn disk(&self, id: DiskId) -> Option<Disk> {
        self.disks.read().get(id).cloned()
    }

    pub fn disk_count(&self) -> usize {
        self.disks.read().len()
    }

    /// Run `f` with exclusive access to the disk list
    pub fn update_disks<R>(&self, f: impl FnOnce(&mut Vec<Disk>) -> R) -> R {
        f(&mut self.disks.write())
    }

    /// Mark the given disks unavailable
    pub fn fail_disks(&self, ids: &[DiskId]) -> Result<()> {
        let mut disks = self.disks.write();
        let count = disks.len();
        for &id in ids {
            let disk = disks
                .get_mut(id)
                .ok_or(Error::DiskOutOfRange { disk: id, count })?;
            disk.available = false;
        }
        info!("Marked disks {:?} as failed", ids);
        Ok(())
    }

    /// Mark `count` distinct random active disks unavailable
    pub fn fail_random<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Result<Vec<DiskId>> {
        if count > self.config.disk_num {
            return Err(Error::InvalidConfig(format!(
                "cannot fail {} of {} disks",
                count, self.config.disk_num
            )));
        }
        let mut ids: Vec<DiskId> = (0..self.config.disk_num).collect();
        ids.shuffle(rng);
        ids.truncate(count);
        ids.sort_unstable();
        self.fail_disks(&ids)?;
        Ok(ids)
    }

    /// Mark every disk available again
    pub fn restore_all(&self) {
        for disk in self.disks.write().iter_mut() {
            disk.available = true;
        }
    }

    /// Unavailable disks among the active set
    pub fn failed_set(&self) -> DiskSet {
        let disks = self.disks.read();
        DiskSet::from_ids(
            disks.len(),
            disks
                .iter()
                .take(self.config.disk_num)
                .filter(|d| !d.available)
                .map(|d| d.id),
        )
    }

    /// Swap each failed disk record for the backup that replaced it.
    ///
    /// The failed id keeps its place in every stripe distribution but now
    /// points at the backup mount; the backup slot takes the dead disk.
    pub fn apply_replacement(&self, map: &ReplaceMap) -> Result<()> {
        let mut disks = self.disks.write();
        let count = disks.len();
        for (failed, backup) in map.iter() {
            if failed >= count || backup >= count {
                return Err(Error::DiskOutOfRange {
                    disk: failed.max(backup),
                    count,
                });
            }
            disks.swap(failed, backup);
            disks[failed].id = failed;
            disks[backup].id = backup;
            disks[failed].available = true;
            disks[backup].available = false;
            debug!("Disk {} now served from {}", failed, disks[failed].mount_path.display());
        }
        Ok(())
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Serialize configuration, disks and catalog
    pub fn to_state(&self) -> SystemState {
        SystemState {
            config: self.config.clone(),
            disks: self.snapshot(),
            files: self.catalog.files(),
            saved_at: Utc::now(),
        }
    }

    /// Write the state as JSON to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(&self.to_state())?;
        std::fs::write(path, raw)?;
        debug!("Saved cluster state to {}", path.display());
        Ok(())
    }

    /// Load a state file written by [`ClusterState::save`]
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let state: SystemState = serde_json::from_str(&raw)?;
        let cluster =
            Self::with_catalog(state.config, state.disks, Catalog::from_files(state.files))?;
        cluster.recount_blocks();
        Ok(cluster)
    }

    /// Recompute per-disk block counts from the catalog
    pub fn recount_blocks(&self) {
        let files = self.catalog.files();
        let mut disks = self.disks.write();
        let mut counts = vec![0u64; disks.len()];
        for stripe in files.iter().flat_map(|f| f.stripes.iter()) {
            for &disk in &stripe.distribution {
                if let Some(c) = counts.get_mut(disk) {
                    *c += 1;
                }
            }
        }
        for (disk, count) in disks.iter_mut().zip(counts) {
            disk.block_count = count;
        }
    }

    /// Copy the state file to the META slot of `replicate_factor` random
    /// available active disks
    pub fn replicate_state<R: Rng + ?Sized>(
        &self,
        state_path: &Path,
        rng: &mut R,
    ) -> Result<Vec<DiskId>> {
        let mut disks = self.disks.write();
        let mut candidates: Vec<DiskId> = disks
            .iter()
            .take(self.config.disk_num)
            .filter(|d| d.available)
            .map(|d| d.id)
            .collect();
        candidates.shuffle(rng);
        candidates.truncate(self.config.replicate_factor);
        candidates.sort_unstable();

        if candidates.len() < self.config.replicate_factor {
            warn!(
                "Only {} disks available for {} META replicas",
                candidates.len(),
                self.config.replicate_factor
            );
        }
        for disk in disks.iter_mut() {
            disk.has_meta = false;
        }
        for &id in &candidates {
            std::fs::copy(state_path, disks[id].meta_path())?;
            disks[id].has_meta = true;
        }
        Ok(candidates)
    }
}

// =============================================================================
// Tests
// =============================================================================
