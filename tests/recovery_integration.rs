//! End-to-end recovery tests
//!
//! Each test builds a disk array in a temp directory, stripes a file onto
//! it, breaks disks, recovers, swaps the backups in and reads the file back.

use assert_matches::assert_matches;
use ecrepair::{
    sim, BlockSelection, ClusterState, ConflictScheduler, Disk, EngineConfig, Error, FileEncoder,
    RecoveryCodec, RecoveryEngine, RecoveryMode, RecoveryOptions, ReedSolomonCodec, SlotOrdering,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

// =============================================================================
// Harness
// =============================================================================

struct Array {
    _dir: TempDir,
    cluster: Arc<ClusterState>,
    codec: Arc<ReedSolomonCodec>,
    data: Vec<u8>,
}

const SPARES: usize = 2;

fn array(k: usize, m: usize, block_size: u64, size: usize, seed: u64) -> Array {
    array_with_active(k, m, k + m + 2, block_size, size, seed)
}

fn array_with_active(
    k: usize,
    m: usize,
    active: usize,
    block_size: u64,
    size: usize,
    seed: u64,
) -> Array {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        block_size,
        memory_bytes: 16 * (k + m) as u64 * block_size,
        ..EngineConfig::new(k, m, active)
    };
    let disks = (0..active + SPARES)
        .map(|i| {
            let path = dir.path().join(format!("mnt{}", i));
            std::fs::create_dir_all(&path).unwrap();
            Disk::new(i, path)
        })
        .collect();
    let cluster = Arc::new(ClusterState::new(config, disks).unwrap());
    let codec = Arc::new(ReedSolomonCodec::new(k, m).unwrap());

    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; size];
    rng.fill(data.as_mut_slice());
    FileEncoder::new(Arc::clone(&cluster), codec.clone())
        .encode("object", &data, &mut rng)
        .unwrap();

    Array {
        _dir: dir,
        cluster,
        codec,
        data,
    }
}

fn read_block(path: &Path, offset: u64, len: usize) -> Vec<u8> {
    let file = File::open(path).unwrap();
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = file.read_at(&mut buf[filled..], offset + filled as u64).unwrap();
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf
}

/// Every shard of every stripe, as currently stored on disk
fn read_shards(array: &Array) -> Vec<Vec<Vec<u8>>> {
    let file = array.cluster.catalog().get("object").unwrap();
    let disks = array.cluster.snapshot();
    let bs = array.cluster.config().block_size;
    file.stripes
        .iter()
        .map(|stripe| {
            stripe
                .distribution
                .iter()
                .zip(&stripe.block_to_offset)
                .map(|(&d, &off)| read_block(&disks[d].blob_path("object"), off * bs, bs as usize))
                .collect()
        })
        .collect()
}

fn read_back(array: &Array) -> Vec<u8> {
    let k = array.cluster.config().data_shards;
    let mut out: Vec<u8> = read_shards(array)
        .into_iter()
        .flat_map(|shards| shards.into_iter().take(k).flatten())
        .collect();
    out.truncate(array.data.len());
    out
}

async fn recover_and_swap(array: &Array, failed: &[usize], options: &RecoveryOptions) {
    array.cluster.fail_disks(failed).unwrap();
    let engine = RecoveryEngine::new(Arc::clone(&array.cluster), array.codec.clone());
    let map = engine.recover("object", options).await.unwrap();
    assert_eq!(map.len(), failed.len());
    array.cluster.apply_replacement(&map).unwrap();
    assert!(array.cluster.failed_set().is_empty());
}

fn all_modes() -> Vec<RecoveryMode> {
    let mut modes = vec![RecoveryMode::Full, RecoveryMode::Partial];
    modes.extend(BlockSelection::ALL.into_iter().map(RecoveryMode::BlockSelected));
    modes.extend(SlotOrdering::ALL.into_iter().map(RecoveryMode::Ordered));
    modes.extend(ConflictScheduler::ALL.into_iter().map(RecoveryMode::ConflictScheduled));
    modes
}

// =============================================================================
// Round Trips
// =============================================================================

#[tokio::test]
async fn test_every_mode_round_trips_small_file() {
    for (k, m) in [(4, 2), (6, 2)] {
        for mode in all_modes() {
            let array = array(k, m, 64, 1024, 5);
            let options = RecoveryOptions {
                mode,
                seed: Some(9),
                ..RecoveryOptions::default()
            };
            recover_and_swap(&array, &[1, 4], &options).await;
            assert_eq!(read_back(&array), array.data, "{}+{} {}", k, m, mode);

            for shards in read_shards(&array) {
                assert!(array.codec.verify(&shards).unwrap(), "{}+{} {}", k, m, mode);
            }
        }
    }
}

#[tokio::test]
async fn test_every_mode_round_trips_one_mebibyte() {
    for (k, m) in [(4, 2), (6, 2)] {
        for mode in all_modes() {
            let array = array(k, m, 4096, 1 << 20, 17);
            let options = RecoveryOptions {
                mode,
                seed: Some(2),
                ..RecoveryOptions::default()
            };
            recover_and_swap(&array, &[0, k + m], &options).await;
            assert_eq!(read_back(&array), array.data, "{}+{} {}", k, m, mode);
        }
    }
}

#[tokio::test]
async fn test_partial_recovery_with_explicit_waves() {
    for intra_stripe in 1..=4 {
        let array = array(4, 2, 128, 8 * 1024, 23);
        let options = RecoveryOptions {
            mode: RecoveryMode::Partial,
            intra_stripe: Some(intra_stripe),
            ..RecoveryOptions::default()
        };
        recover_and_swap(&array, &[2, 3], &options).await;
        assert_eq!(read_back(&array), array.data, "intra_stripe {}", intra_stripe);
    }
}

#[tokio::test]
async fn test_degraded_recovery_restores_data() {
    let array = array(6, 2, 256, 64 * 1024, 31);
    let options = RecoveryOptions {
        degrade: true,
        mode: RecoveryMode::BlockSelected(BlockSelection::BalanceK),
        ..RecoveryOptions::default()
    };
    recover_and_swap(&array, &[5, 7], &options).await;
    assert_eq!(read_back(&array), array.data);
}

#[tokio::test]
async fn test_recovery_after_state_reload() {
    let array = array(4, 2, 64, 4096, 41);
    let state = array._dir.path().join("state.json");
    array.cluster.fail_disks(&[3]).unwrap();
    array.cluster.save(&state).unwrap();

    let reloaded = Arc::new(ClusterState::load(&state).unwrap());
    assert!(reloaded.failed_set().contains(3));
    let engine = RecoveryEngine::new(Arc::clone(&reloaded), array.codec.clone());
    let map = engine
        .recover("object", &RecoveryOptions::default())
        .await
        .unwrap();
    assert_eq!(map.backup_for(3), Some(8));
}

#[tokio::test]
#[ignore = "writes a 1 GiB object"]
async fn test_one_gibibyte_round_trip() {
    let array = array(6, 2, 1 << 20, 1 << 30, 3);
    let options = RecoveryOptions {
        mode: RecoveryMode::ConflictScheduled(ConflictScheduler::Coloring),
        ..RecoveryOptions::default()
    };
    recover_and_swap(&array, &[2, 6], &options).await;
    assert!(read_back(&array) == array.data);
}

// =============================================================================
// Bit Rot
// =============================================================================

#[tokio::test]
async fn test_every_mode_rebuilds_around_rotten_blocks() {
    for mode in all_modes() {
        let array = array(4, 2, 64, 4096, 29);
        let before = read_shards(&array);
        array.cluster.fail_disks(&[1]).unwrap();
        let rotten =
            sim::bit_rot(&array.cluster, "object", before.len(), &mut StdRng::seed_from_u64(8))
                .unwrap();
        assert_eq!(rotten.len(), before.len());

        let options = RecoveryOptions {
            mode,
            seed: Some(4),
            ..RecoveryOptions::default()
        };
        recover_and_swap(&array, &[1], &options).await;

        let file = array.cluster.catalog().get("object").unwrap();
        let after = read_shards(&array);
        for (s, stripe) in file.stripes.iter().enumerate() {
            if let Some(p) = stripe.position_of(1) {
                assert_eq!(after[s][p], before[s][p], "{} stripe {}", mode, s);
            }
        }
        if mode.repairs_bit_rot() {
            assert_eq!(after, before, "{}", mode);
            assert_eq!(file.failed_block_count(), 0, "{}", mode);
            assert_eq!(read_back(&array), array.data, "{}", mode);
        } else {
            assert_eq!(file.failed_block_count(), rotten.len(), "{}", mode);
            for &(s, p) in &rotten {
                assert_ne!(after[s][p], before[s][p], "{} stripe {}", mode, s);
            }
        }
    }
}

#[tokio::test]
async fn test_rotten_blocks_without_disk_failure() {
    for mode in all_modes() {
        let array = array(6, 2, 64, 6144, 37);
        let before = read_shards(&array);
        let rotten = sim::bit_rot(&array.cluster, "object", 5, &mut StdRng::seed_from_u64(19))
            .unwrap();
        assert_eq!(rotten.len(), 5);

        let options = RecoveryOptions {
            mode,
            ..RecoveryOptions::default()
        };
        recover_and_swap(&array, &[], &options).await;

        let file = array.cluster.catalog().get("object").unwrap();
        let after = read_shards(&array);
        if mode.repairs_bit_rot() {
            assert_eq!(after, before, "{}", mode);
            assert_eq!(file.failed_block_count(), 0, "{}", mode);
        } else {
            assert_eq!(file.failed_block_count(), 5, "{}", mode);
            for &(s, p) in &rotten {
                assert_ne!(after[s][p], before[s][p], "{} stripe {}", mode, s);
            }
        }
        let spares = &array.cluster.snapshot()[10..];
        assert!(spares.iter().all(|d| !d.blob_path("object").exists()), "{}", mode);
    }
}

// =============================================================================
// Failure Paths
// =============================================================================

#[tokio::test]
async fn test_too_few_alive_disks() {
    let array = array(4, 2, 64, 2048, 7);
    array.cluster.fail_disks(&[0, 1, 2, 3, 4]).unwrap();
    let engine = RecoveryEngine::new(Arc::clone(&array.cluster), array.codec.clone());

    for mode in all_modes() {
        let options = RecoveryOptions {
            mode,
            ..RecoveryOptions::default()
        };
        assert_matches!(
            engine.recover("object", &options).await,
            Err(Error::TooFewDisksAlive { alive: 3, required: 4 })
        );
    }
    let spare = &array.cluster.snapshot()[8];
    assert!(!spare.file_dir("object").exists());
}

#[tokio::test]
async fn test_too_few_alive_disks_six_plus_two() {
    for failed in [vec![0, 3, 6], vec![1, 2, 5, 7]] {
        let array = array_with_active(6, 2, 8, 64, 4096, 43);
        array.cluster.fail_disks(&failed).unwrap();
        let engine = RecoveryEngine::new(Arc::clone(&array.cluster), array.codec.clone());
        let alive = 8 - failed.len();

        for mode in all_modes() {
            let options = RecoveryOptions {
                mode,
                ..RecoveryOptions::default()
            };
            assert_matches!(
                engine.recover("object", &options).await,
                Err(Error::TooFewDisksAlive { alive: a, required: 6 }) if a == alive
            );
        }
        let disks = array.cluster.snapshot();
        assert_eq!(disks.len(), 8 + SPARES);
        assert!(disks[8..].iter().all(|d| !d.file_dir("object").exists()));
    }
}

#[tokio::test]
async fn test_no_write_leaves_backups_empty() {
    let array = array(4, 2, 64, 2048, 13);
    array.cluster.fail_disks(&[1]).unwrap();
    let engine = RecoveryEngine::new(Arc::clone(&array.cluster), array.codec.clone());
    let options = RecoveryOptions {
        write_to_backup: false,
        ..RecoveryOptions::default()
    };
    let map = engine.recover("object", &options).await.unwrap();
    assert_eq!(map.backup_for(1), Some(8));
    let spare = &array.cluster.snapshot()[8];
    assert!(!spare.blob_path("object").exists());
}
