//! Disk registry files
//!
//! The disk list comes from a plain-text file with one mount path per line.
//! Bandwidth comes from a parallel file whose lines hold up to four
//! whitespace-separated numbers: `read [write [randread [randwrite]]]`.

use super::disk::{Disk, META_FILE};
use crate::error::{Error, Result};
use std::path::Path;
use tracing::debug;

/// Read disk mount paths, one per line. Every path must exist.
pub fn load_mount_paths(file: &Path) -> Result<Vec<Disk>> {
    let raw = std::fs::read_to_string(file)?;
    let mut disks = Vec::new();

    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let mount = Path::new(line);
        if !mount.exists() {
            return Err(Error::InvalidDiskFile {
                path: file.to_path_buf(),
                reason: format!("disk path {} does not exist", line),
            });
        }
        let mut disk = Disk::new(disks.len(), mount);
        disk.has_meta = mount.join(META_FILE).exists();
        disks.push(disk);
    }

    debug!("Loaded {} disk paths from {}", disks.len(), file.display());
    Ok(disks)
}

/// Apply bandwidth figures to `disks`, line `i` describing disk `i`
pub fn load_bandwidth(file: &Path, disks: &mut [Disk]) -> Result<()> {
    let raw = std::fs::read_to_string(file)?;

    for (id, line) in raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .enumerate()
    {
        let count = disks.len();
        let disk = disks
            .get_mut(id)
            .ok_or(Error::DiskOutOfRange { disk: id, count })?;

        let values = line
            .split_whitespace()
            .map(|v| {
                v.parse::<f64>().map_err(|e| Error::InvalidDiskFile {
                    path: file.to_path_buf(),
                    reason: format!("line {}: {}", id + 1, e),
                })
            })
            .collect::<Result<Vec<f64>>>()?;

        if values.len() > 4 {
            return Err(Error::InvalidDiskFile {
                path: file.to_path_buf(),
                reason: format!("line {}: expected at most 4 values", id + 1),
            });
        }

        let slots = [
            &mut disk.read_bw,
            &mut disk.write_bw,
            &mut disk.rand_read_bw,
            &mut disk.rand_write_bw,
        ];
        for (slot, value) in slots.into_iter().zip(values) {
            *slot = value;
        }
    }
    Ok(())
}

/// Flag the `slow_num` highest-latency disks among the first `disk_num` as
/// busy and slow. Ties go to the lower disk id.
pub fn mark_slowest(disks: &mut [Disk], disk_num: usize, slow_num: usize) {
    let active = disk_num.min(disks.len());
    let mut order: Vec<usize> = (0..active).collect();
    order.sort_by(|&a, &b| {
        disks[b]
            .latency
            .total_cmp(&disks[a].latency)
            .then(a.cmp(&b))
    });

    for disk in disks.iter_mut().take(active) {
        disk.busy = false;
        disk.slow = false;
    }
    for &i in order.iter().take(slow_num) {
        disks[i].busy = true;
        disks[i].slow = true;
    }
}

// =============================================================================
// Tests
// =============================================================================
