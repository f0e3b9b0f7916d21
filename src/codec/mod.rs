//! Erasure Codec Port
//!
//! The recovery engine treats the erasure code as a black box: given K valid
//! shards, the codec rebuilds the missing ones. This module defines the
//! operations the engine relies on; [`ReedSolomonCodec`] implements them on
//! top of `reed-solomon-erasure`.
//!
//! # Partial reconstruction
//!
//! A missing shard is a linear combination of the K selected input shards.
//! [`RecoveryCodec::recover_with_some_shards`] evaluates the contribution of
//! a subset of those inputs and accumulates it into the output buffers, so a
//! stripe can be rebuilt from several waves of reads without ever holding all
//! K inputs at once.

pub mod reed_solomon;

pub use reed_solomon::ReedSolomonCodec;

use crate::error::{Error, Result};
use crate::model::{DiskId, DiskSet};

// =============================================================================
// Decode Matrix
// =============================================================================

/// Opaque plan for rebuilding `invalid` shards from exactly K `selected` shards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeMatrix {
    selected: Vec<usize>,
    invalid: Vec<usize>,
}

impl DecodeMatrix {
    pub(crate) fn new(selected: Vec<usize>, invalid: Vec<usize>) -> Self {
        Self { selected, invalid }
    }

    /// Shard positions used as inputs
    pub fn selected(&self) -> &[usize] {
        &self.selected
    }

    /// Shard positions being rebuilt, in output-buffer order
    pub fn invalid(&self) -> &[usize] {
        &self.invalid
    }
}

// =============================================================================
// Codec Port
// =============================================================================

/// Erasure codec operations consumed by the recovery engine
pub trait RecoveryCodec: Send + Sync {
    /// Number of data shards (k)
    fn data_shards(&self) -> usize;

    /// Number of parity shards (m)
    fn parity_shards(&self) -> usize;

    /// Total shards per stripe
    fn total_shards(&self) -> usize {
        self.data_shards() + self.parity_shards()
    }

    /// Compute parity shards in place from the leading data shards
    fn encode(&self, shards: &mut [Vec<u8>]) -> Result<()>;

    /// Check that parity is consistent with data
    fn verify(&self, shards: &[Vec<u8>]) -> Result<bool>;

    /// Rebuild every shard whose disk is in `failed` (or that is already missing)
    fn reconstruct_with_list(
        &self,
        shards: &mut [Option<Vec<u8>>],
        failed: &DiskSet,
        distribution: &[DiskId],
        degrade: bool,
    ) -> Result<()>;

    /// Rebuild the stripe using only the blocks held by `selected` disks
    fn reconstruct_with_k_blocks(
        &self,
        shards: &mut [Option<Vec<u8>>],
        failed: &DiskSet,
        selected: &[DiskId],
        distribution: &[DiskId],
        degrade: bool,
    ) -> Result<()>;

    /// Prepare a plan rebuilding `invalid` from exactly K `selected` positions
    fn decode_matrix(&self, invalid: &[usize], selected: &[usize]) -> Result<DecodeMatrix>;

    /// Accumulate the contribution of `inputs` (position, bytes) into
    /// `outputs`, one buffer per invalid position of `matrix`
    fn recover_with_some_shards(
        &self,
        matrix: &DecodeMatrix,
        inputs: &[(usize, &[u8])],
        outputs: &mut [Vec<u8>],
    ) -> Result<()>;
}

/// Shard positions of `distribution` whose disk is in `disks`
pub fn positions_of(distribution: &[DiskId], disks: &[DiskId]) -> Vec<usize> {
    distribution
        .iter()
        .enumerate()
        .filter(|(_, d)| disks.contains(d))
        .map(|(i, _)| i)
        .collect()
}

pub(crate) fn check_shard_count(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(Error::InvalidConfig(format!(
            "Expected {} shards, got {}",
            expected, actual
        )));
    }
    Ok(())
}
