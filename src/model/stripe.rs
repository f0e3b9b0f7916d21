//! Stripes and file records
//!
//! A stripe places K data and M parity blocks on K+M distinct disks. Each
//! file owns its stripes in order; schedulers and the recovery harness
//! address them by index into [`FileInfo::stripes`].

use super::bitset::DiskSet;
use super::disk::DiskId;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

// =============================================================================
// Stripe
// =============================================================================

/// Placement of one stripe across the disk array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stripe {
    /// Global stripe identifier
    pub id: u64,
    /// `distribution[i]` holds block `i` of the stripe
    pub distribution: Vec<DiskId>,
    /// Block position (in block units) of block `i` on its disk
    pub block_to_offset: Vec<u64>,
}

impl Stripe {
    /// Create a stripe, checking that both vectors match and disks are distinct
    pub fn new(id: u64, distribution: Vec<DiskId>, block_to_offset: Vec<u64>) -> Result<Self> {
        if distribution.len() != block_to_offset.len() {
            return Err(Error::InvalidConfig(format!(
                "stripe {}: {} disks but {} offsets",
                id,
                distribution.len(),
                block_to_offset.len()
            )));
        }
        let mut seen = DiskSet::default();
        for &disk in &distribution {
            if seen.contains(disk) {
                return Err(Error::InvalidConfig(format!(
                    "stripe {}: disk {} used twice",
                    id, disk
                )));
            }
            seen.insert(disk);
        }
        Ok(Self {
            id,
            distribution,
            block_to_offset,
        })
    }

    /// Number of blocks (K+M)
    pub fn width(&self) -> usize {
        self.distribution.len()
    }

    /// True if any block lives on a failed disk
    pub fn is_damaged(&self, failed: &DiskSet) -> bool {
        self.distribution.iter().any(|&d| failed.contains(d))
    }

    /// Surviving disk ids, in distribution order
    pub fn surviving(&self, failed: &DiskSet) -> Vec<DiskId> {
        self.distribution
            .iter()
            .copied()
            .filter(|&d| !failed.contains(d))
            .collect()
    }

    /// Block positions that live on failed disks
    pub fn failed_indices(&self, failed: &DiskSet) -> Vec<usize> {
        self.distribution
            .iter()
            .enumerate()
            .filter(|(_, &d)| failed.contains(d))
            .map(|(i, _)| i)
            .collect()
    }

    /// Block position held by `disk`
    pub fn position_of(&self, disk: DiskId) -> Option<usize> {
        self.distribution.iter().position(|&d| d == disk)
    }

    /// Block offset of this stripe on `disk`
    pub fn offset_on(&self, disk: DiskId) -> Option<u64> {
        self.position_of(disk).map(|i| self.block_to_offset[i])
    }

    /// Mask of every disk in the distribution
    pub fn disk_mask(&self, capacity: usize) -> DiskSet {
        DiskSet::from_ids(capacity, self.distribution.iter().copied())
    }
}

// =============================================================================
// File Info
// =============================================================================

/// Health of a single block as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlockStatus {
    #[default]
    Ok,
    Failed,
}

/// A cataloged file and its stripe layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: u64,
    pub name: String,
    /// Original file size in bytes
    pub size: u64,
    /// Content digest supplied by the caller, empty when not tracked
    #[serde(default)]
    pub hash: String,
    pub stripes: Vec<Stripe>,
    /// In-memory bit-rot hints, one row per stripe
    #[serde(skip)]
    pub block_status: Vec<Vec<BlockStatus>>,
}

impl FileInfo {
    pub fn new(id: u64, name: impl Into<String>, size: u64, stripes: Vec<Stripe>) -> Self {
        let block_status = stripes
            .iter()
            .map(|s| vec![BlockStatus::Ok; s.width()])
            .collect();
        Self {
            id,
            name: name.into(),
            size,
            hash: String::new(),
            stripes,
            block_status,
        }
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Indices of stripes touching a failed disk
    pub fn damaged_stripes(&self, failed: &DiskSet) -> Vec<usize> {
        self.stripes
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_damaged(failed))
            .map(|(i, _)| i)
            .collect()
    }

    /// Status of block `block` in stripe `stripe`; unknown blocks are OK
    pub fn block_status(&self, stripe: usize, block: usize) -> BlockStatus {
        self.block_status
            .get(stripe)
            .and_then(|row| row.get(block))
            .copied()
            .unwrap_or_default()
    }

    /// Flag a block as rotten
    pub fn mark_failed(&mut self, stripe: usize, block: usize) {
        self.ensure_block_status();
        if let Some(slot) = self
            .block_status
            .get_mut(stripe)
            .and_then(|row| row.get_mut(block))
        {
            *slot = BlockStatus::Failed;
        }
    }

    /// Clear the hint for a block that has been rewritten
    pub fn mark_ok(&mut self, stripe: usize, block: usize) {
        if let Some(slot) = self
            .block_status
            .get_mut(stripe)
            .and_then(|row| row.get_mut(block))
        {
            *slot = BlockStatus::Ok;
        }
    }

    /// Rebuild the status matrix after deserialization
    pub fn ensure_block_status(&mut self) {
        if self.block_status.len() != self.stripes.len() {
            self.block_status = self
                .stripes
                .iter()
                .map(|s| vec![BlockStatus::Ok; s.width()])
                .collect();
        }
    }

    /// Number of blocks flagged as failed
    pub fn failed_block_count(&self) -> usize {
        self.block_status
            .iter()
            .flatten()
            .filter(|&&b| b == BlockStatus::Failed)
            .count()
    }
}

// =============================================================================
// Tests
// =============================================================================
