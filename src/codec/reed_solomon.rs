//! Reed-Solomon Codec
//!
//! Implements [`RecoveryCodec`] with the GF(2^8) codec from the
//! `reed-solomon-erasure` crate.

use super::{check_shard_count, DecodeMatrix, RecoveryCodec};
use crate::error::{Error, Result};
use crate::model::{DiskId, DiskSet};
use reed_solomon_erasure::galois_8::ReedSolomon;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Reed-Solomon codec shared across recovery tasks
#[derive(Clone)]
pub struct ReedSolomonCodec {
    /// Reed-Solomon codec instance
    rs: Arc<ReedSolomon>,
    /// Number of data shards (k)
    data_shards: usize,
    /// Number of parity shards (m)
    parity_shards: usize,
}

impl std::fmt::Debug for ReedSolomonCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReedSolomonCodec")
            .field("data_shards", &self.data_shards)
            .field("parity_shards", &self.parity_shards)
            .finish()
    }
}

impl ReedSolomonCodec {
    /// Create a new codec with the specified k+m configuration
    ///
    /// # Arguments
    /// * `data_shards` - Number of data shards (k)
    /// * `parity_shards` - Number of parity shards (m)
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        if data_shards == 0 {
            return Err(Error::InvalidConfig(
                "data_shards must be greater than 0".to_string(),
            ));
        }
        if parity_shards == 0 {
            return Err(Error::InvalidConfig(
                "parity_shards must be greater than 0".to_string(),
            ));
        }

        let rs = ReedSolomon::new(data_shards, parity_shards).map_err(|e| {
            Error::InvalidConfig(format!("Failed to create Reed-Solomon codec: {}", e))
        })?;

        Ok(Self {
            rs: Arc::new(rs),
            data_shards,
            parity_shards,
        })
    }

    /// Run the library reconstruction over whatever shards are present
    fn rebuild(&self, shards: &mut [Option<Vec<u8>>], data_only: bool) -> Result<()> {
        let available = shards.iter().filter(|s| s.is_some()).count();
        if available < self.data_shards {
            return Err(Error::InsufficientShards {
                available,
                required: self.data_shards,
            });
        }

        let result = if data_only {
            self.rs.reconstruct_data(shards)
        } else {
            self.rs.reconstruct(shards)
        };
        result.map_err(|e| Error::Codec(format!("Reed-Solomon reconstruction failed: {}", e)))
    }
}

impl RecoveryCodec for ReedSolomonCodec {
    fn data_shards(&self) -> usize {
        self.data_shards
    }

    fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    fn encode(&self, shards: &mut [Vec<u8>]) -> Result<()> {
        check_shard_count(self.total_shards(), shards.len())?;
        self.rs
            .encode(shards)
            .map_err(|e| Error::Codec(format!("Reed-Solomon encoding failed: {}", e)))
    }

    fn verify(&self, shards: &[Vec<u8>]) -> Result<bool> {
        check_shard_count(self.total_shards(), shards.len())?;
        self.rs
            .verify(shards)
            .map_err(|e| Error::Codec(format!("Verification failed: {}", e)))
    }

    #[instrument(skip(self, shards, failed, distribution))]
    fn reconstruct_with_list(
        &self,
        shards: &mut [Option<Vec<u8>>],
        failed: &DiskSet,
        distribution: &[DiskId],
        degrade: bool,
    ) -> Result<()> {
        check_shard_count(self.total_shards(), shards.len())?;
        check_shard_count(self.total_shards(), distribution.len())?;

        for (shard, &disk) in shards.iter_mut().zip(distribution) {
            if failed.contains(disk) {
                *shard = None;
            }
        }
        if shards.iter().all(Option::is_some) {
            return Ok(());
        }

        self.rebuild(shards, degrade)?;
        debug!(
            "Reconstructed stripe with {} failed disks (degrade={})",
            failed.len(),
            degrade
        );
        Ok(())
    }

    #[instrument(skip(self, shards, failed, selected, distribution))]
    fn reconstruct_with_k_blocks(
        &self,
        shards: &mut [Option<Vec<u8>>],
        failed: &DiskSet,
        selected: &[DiskId],
        distribution: &[DiskId],
        degrade: bool,
    ) -> Result<()> {
        check_shard_count(self.total_shards(), shards.len())?;
        check_shard_count(self.total_shards(), distribution.len())?;

        let mut kept = 0;
        for (shard, &disk) in shards.iter_mut().zip(distribution) {
            if failed.contains(disk) || !selected.contains(&disk) {
                *shard = None;
            } else if shard.is_some() {
                kept += 1;
            }
        }
        if kept < self.data_shards {
            return Err(Error::InsufficientShards {
                available: kept,
                required: self.data_shards,
            });
        }

        self.rebuild(shards, degrade)
    }

    fn decode_matrix(&self, invalid: &[usize], selected: &[usize]) -> Result<DecodeMatrix> {
        let total = self.total_shards();
        if selected.len() != self.data_shards {
            return Err(Error::InsufficientShards {
                available: selected.len(),
                required: self.data_shards,
            });
        }

        let mut seen = vec![false; total];
        for &p in selected.iter().chain(invalid) {
            if p >= total {
                return Err(Error::Codec(format!(
                    "shard position {} out of range for {} shards",
                    p, total
                )));
            }
            if seen[p] {
                return Err(Error::Codec(format!(
                    "shard position {} listed twice in decode plan",
                    p
                )));
            }
            seen[p] = true;
        }

        let mut selected = selected.to_vec();
        selected.sort_unstable();
        Ok(DecodeMatrix::new(selected, invalid.to_vec()))
    }

    fn recover_with_some_shards(
        &self,
        matrix: &DecodeMatrix,
        inputs: &[(usize, &[u8])],
        outputs: &mut [Vec<u8>],
    ) -> Result<()> {
        check_shard_count(matrix.invalid().len(), outputs.len())?;
        let Some(len) = inputs.first().map(|(_, b)| b.len()) else {
            return Ok(());
        };

        let mut shards: Vec<Option<Vec<u8>>> = vec![None; self.total_shards()];
        for &p in matrix.selected() {
            shards[p] = Some(vec![0u8; len]);
        }
        for &(p, bytes) in inputs {
            if !matrix.selected().contains(&p) {
                return Err(Error::Codec(format!(
                    "shard position {} is not an input of the decode plan",
                    p
                )));
            }
            if bytes.len() != len {
                return Err(Error::Codec(format!(
                    "shard length mismatch: {} vs {}",
                    bytes.len(),
                    len
                )));
            }
            shards[p] = Some(bytes.to_vec());
        }

        let data_only = matrix.invalid().iter().all(|&p| p < self.data_shards);
        self.rebuild(&mut shards, data_only)?;

        for (out, &p) in outputs.iter_mut().zip(matrix.invalid()) {
            if out.is_empty() {
                out.resize(len, 0);
            }
            if let Some(part) = &shards[p] {
                for (o, x) in out.iter_mut().zip(part) {
                    *o ^= *x;
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn encoded(k: usize, m: usize, len: usize) -> (ReedSolomonCodec, Vec<Vec<u8>>) {
        let codec = ReedSolomonCodec::new(k, m).unwrap();
        let mut shards: Vec<Vec<u8>> = (0..k)
            .map(|i| (0..len).map(|j| (i * 31 + j * 7) as u8).collect())
            .collect();
        shards.extend((0..m).map(|_| vec![0u8; len]));
        codec.encode(&mut shards).unwrap();
        (codec, shards)
    }

    #[test]
    fn test_codec_invalid_config() {
        assert!(ReedSolomonCodec::new(0, 2).is_err());
        assert!(ReedSolomonCodec::new(4, 0).is_err());
    }

    #[test]
    fn test_verify_detects_corruption() {
        let (codec, mut shards) = encoded(4, 2, 64);
        assert!(codec.verify(&shards).unwrap());

        shards[1][10] ^= 0xff;
        assert!(!codec.verify(&shards).unwrap());
    }

    #[test]
    fn test_reconstruct_with_list() {
        let (codec, shards) = encoded(4, 2, 64);
        let distribution = vec![10, 11, 12, 13, 14, 15];
        let failed = DiskSet::from_ids(16, [11, 15]);

        let mut work: Vec<Option<Vec<u8>>> = shards.iter().cloned().map(Some).collect();
        codec
            .reconstruct_with_list(&mut work, &failed, &distribution, false)
            .unwrap();

        let rebuilt: Vec<Vec<u8>> = work.into_iter().map(|s| s.unwrap()).collect();
        assert_eq!(rebuilt, shards);
    }

    #[test]
    fn test_reconstruct_with_list_degrade_skips_parity() {
        let (codec, shards) = encoded(4, 2, 32);
        let distribution = vec![0, 1, 2, 3, 4, 5];
        let failed = DiskSet::from_ids(6, [0, 5]);

        let mut work: Vec<Option<Vec<u8>>> = shards.iter().cloned().map(Some).collect();
        codec
            .reconstruct_with_list(&mut work, &failed, &distribution, true)
            .unwrap();

        assert_eq!(work[0].as_ref(), Some(&shards[0]));
        assert!(work[5].is_none());
    }

    #[test]
    fn test_reconstruct_with_k_blocks_ignores_unselected() {
        let (codec, shards) = encoded(4, 2, 64);
        let distribution = vec![0, 1, 2, 3, 4, 5];
        let failed = DiskSet::from_ids(6, [2]);
        let selected = vec![1, 3, 4, 5];

        let mut work: Vec<Option<Vec<u8>>> = shards.iter().cloned().map(Some).collect();
        // Garbage in an unselected block must not leak into the result
        work[0] = Some(vec![0xAA; 64]);
        codec
            .reconstruct_with_k_blocks(&mut work, &failed, &selected, &distribution, false)
            .unwrap();

        assert_eq!(work[2].as_ref(), Some(&shards[2]));
        assert_eq!(work[0].as_ref(), Some(&shards[0]));
    }

    #[test]
    fn test_reconstruct_with_k_blocks_needs_k() {
        let (codec, shards) = encoded(4, 2, 16);
        let distribution = vec![0, 1, 2, 3, 4, 5];
        let failed = DiskSet::from_ids(6, [0]);

        let mut work: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
        assert_matches!(
            codec.reconstruct_with_k_blocks(&mut work, &failed, &[1, 2, 3], &distribution, false),
            Err(Error::InsufficientShards {
                available: 3,
                required: 4
            })
        );
    }

    #[test]
    fn test_decode_matrix_validates() {
        let codec = ReedSolomonCodec::new(4, 2).unwrap();
        assert!(codec.decode_matrix(&[0], &[1, 2, 3, 4]).is_ok());
        assert!(codec.decode_matrix(&[0], &[1, 2, 3]).is_err());
        assert!(codec.decode_matrix(&[1], &[1, 2, 3, 4]).is_err());
        assert!(codec.decode_matrix(&[9], &[1, 2, 3, 4]).is_err());
    }

    #[test]
    fn test_recover_in_waves_matches_full_reconstruction() {
        let (codec, shards) = encoded(4, 2, 128);
        let invalid = vec![0, 5];
        let matrix = codec.decode_matrix(&invalid, &[4, 2, 1, 3]).unwrap();

        let mut outputs = vec![Vec::new(), Vec::new()];
        codec
            .recover_with_some_shards(
                &matrix,
                &[(1, shards[1].as_slice()), (4, shards[4].as_slice())],
                &mut outputs,
            )
            .unwrap();
        codec
            .recover_with_some_shards(&matrix, &[(2, shards[2].as_slice())], &mut outputs)
            .unwrap();
        codec
            .recover_with_some_shards(&matrix, &[(3, shards[3].as_slice())], &mut outputs)
            .unwrap();

        assert_eq!(outputs[0], shards[0]);
        assert_eq!(outputs[1], shards[5]);
    }

    #[test]
    fn test_recover_rejects_foreign_input() {
        let (codec, shards) = encoded(4, 2, 16);
        let matrix = codec.decode_matrix(&[0], &[1, 2, 3, 4]).unwrap();
        let mut outputs = vec![Vec::new()];
        assert!(codec
            .recover_with_some_shards(&matrix, &[(5, shards[5].as_slice())], &mut outputs)
            .is_err());
    }
}
