//! File Encoding
//!
//! Splits a file into stripes of K data blocks, computes M parity blocks per
//! stripe and appends every block to the `<mnt>/<file>/BLOB` of the disk the
//! layout assigns it to.

use crate::cluster::ClusterState;
use crate::codec::RecoveryCodec;
use crate::error::{Error, Result};
use crate::model::{layout, FileInfo};
use rand::Rng;
use std::fs::{self, File};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Writes files onto the active disks of a cluster
pub struct FileEncoder {
    cluster: Arc<ClusterState>,
    codec: Arc<dyn RecoveryCodec>,
}

impl FileEncoder {
    pub fn new(cluster: Arc<ClusterState>, codec: Arc<dyn RecoveryCodec>) -> Self {
        Self { cluster, codec }
    }

    /// Encode the file at `path`, cataloged under its base name
    pub fn encode_path<R: Rng + ?Sized>(&self, path: &Path, rng: &mut R) -> Result<FileInfo> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::FileNotFound(path.display().to_string()))?
            .to_string();
        let data = fs::read(path)?;
        self.encode(&name, &data, rng)
    }

    /// Encode `data` as file `name` using a random stripe layout
    #[instrument(skip(self, data, rng), fields(data_len = data.len()))]
    pub fn encode<R: Rng + ?Sized>(
        &self,
        name: &str,
        data: &[u8],
        rng: &mut R,
    ) -> Result<FileInfo> {
        let config = self.cluster.config().clone();
        let catalog = self.cluster.catalog();
        if catalog.contains(name) {
            if !config.override_existing {
                return Err(Error::FileExists(name.to_string()));
            }
            catalog.remove(name);
        }

        let disks = self.cluster.snapshot();
        let active = &disks[..config.disk_num];
        let alive = active.iter().filter(|d| d.available).count();
        if alive < config.disk_num {
            return Err(Error::TooFewDisksAlive {
                alive,
                required: config.disk_num,
            });
        }

        let k = config.data_shards;
        let bs = config.block_size as usize;
        let stripe_num = config.stripes_for(data.len() as u64);
        let distributions =
            layout::random_distribution(stripe_num, config.total_shards(), config.disk_num, rng)?;
        let mut counts = vec![0u64; config.disk_num];
        let first_id = catalog.allocate_stripe_ids(stripe_num);
        let stripes = layout::build_stripes(first_id, distributions, &mut counts)?;

        let mut blobs = Vec::with_capacity(active.len());
        for disk in active {
            let dir = disk.file_dir(name);
            if dir.exists() {
                if !config.override_existing {
                    return Err(Error::DataDirExists(dir));
                }
                fs::remove_dir_all(&dir)?;
            }
            fs::create_dir_all(&dir)?;
            blobs.push(File::create(disk.blob_path(name))?);
        }

        for (s, stripe) in stripes.iter().enumerate() {
            let start = s * k * bs;
            let mut shards: Vec<Vec<u8>> = (0..config.total_shards())
                .map(|i| {
                    let mut block = vec![0u8; bs];
                    if i < k {
                        let from = (start + i * bs).min(data.len());
                        let to = (start + (i + 1) * bs).min(data.len());
                        block[..to - from].copy_from_slice(&data[from..to]);
                    }
                    block
                })
                .collect();
            self.codec.encode(&mut shards)?;

            for (i, shard) in shards.iter().enumerate() {
                let offset = stripe.block_to_offset[i] * config.block_size;
                blobs[stripe.distribution[i]].write_all_at(shard, offset)?;
            }
        }
        for blob in &blobs {
            blob.sync_all()?;
        }

        self.cluster.update_disks(|disks| {
            for (disk, added) in disks.iter_mut().zip(&counts) {
                disk.block_count += added;
            }
        });

        let file = FileInfo::new(catalog.allocate_file_id(), name, data.len() as u64, stripes);
        catalog.insert(file.clone())?;

        debug!(
            "Encoded {} bytes into {} stripes of {}+{} blocks",
            data.len(),
            stripe_num,
            k,
            config.parity_shards
        );
        info!("Encoded file {} ({} stripes)", name, stripe_num);
        Ok(file)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ReedSolomonCodec;
    use crate::config::EngineConfig;
    use crate::model::Disk;
    use assert_matches::assert_matches;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn setup(dir: &Path, config: EngineConfig) -> FileEncoder {
        let disks = (0..config.disk_num)
            .map(|i| {
                let p = dir.join(format!("disk{}", i));
                fs::create_dir_all(&p).unwrap();
                Disk::new(i, p)
            })
            .collect();
        let codec = ReedSolomonCodec::new(config.data_shards, config.parity_shards).unwrap();
        let cluster = Arc::new(ClusterState::new(config, disks).unwrap());
        FileEncoder::new(cluster, Arc::new(codec))
    }

    fn config() -> EngineConfig {
        EngineConfig {
            block_size: 16,
            ..EngineConfig::new(4, 2, 7)
        }
    }

    #[test]
    fn test_encode_writes_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = setup(dir.path(), config());
        let data: Vec<u8> = (0..200u8).collect();

        let fi = encoder
            .encode("f.bin", &data, &mut StdRng::seed_from_u64(1))
            .unwrap();
        // 200 bytes over 64-byte stripes
        assert_eq!(fi.stripe_count(), 4);

        // First data block of stripe 0 holds the first 16 bytes
        let s0 = &fi.stripes[0];
        let disk = encoder.cluster.disk(s0.distribution[0]).unwrap();
        let blob = fs::read(disk.blob_path("f.bin")).unwrap();
        let off = (s0.block_to_offset[0] * 16) as usize;
        assert_eq!(&blob[off..off + 16], &data[..16]);

        let blocks: u64 = encoder.cluster.snapshot().iter().map(|d| d.block_count).sum();
        assert_eq!(blocks, 4 * 6);
    }

    #[test]
    fn test_encode_parity_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = setup(dir.path(), config());
        let data = vec![0x5au8; 100];
        let fi = encoder
            .encode("p.bin", &data, &mut StdRng::seed_from_u64(2))
            .unwrap();

        let disks = encoder.cluster.snapshot();
        for stripe in &fi.stripes {
            let shards: Vec<Vec<u8>> = stripe
                .distribution
                .iter()
                .zip(&stripe.block_to_offset)
                .map(|(&d, &o)| {
                    let blob = fs::read(disks[d].blob_path("p.bin")).unwrap();
                    blob[(o * 16) as usize..(o * 16 + 16) as usize].to_vec()
                })
                .collect();
            assert!(encoder.codec.verify(&shards).unwrap());
        }
    }

    #[test]
    fn test_encode_twice_without_override() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = setup(dir.path(), config());
        let mut rng = StdRng::seed_from_u64(3);
        encoder.encode("dup", b"abc", &mut rng).unwrap();
        assert_matches!(
            encoder.encode("dup", b"abc", &mut rng),
            Err(Error::FileExists(_))
        );
    }

    #[test]
    fn test_encode_requires_all_active_disks() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = setup(dir.path(), config());
        encoder.cluster.fail_disks(&[0]).unwrap();
        assert_matches!(
            encoder.encode("x", b"abc", &mut StdRng::seed_from_u64(4)),
            Err(Error::TooFewDisksAlive {
                alive: 6,
                required: 7
            })
        );
    }
}
