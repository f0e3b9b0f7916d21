//! Repair-time model
//!
//! Reading a block costs `block_size / read_bw`, plus a fixed penalty when
//! the disk is flagged slow. A stripe's blocks are fetched in parallel, so its
//! repair time is the slowest of its reads.

use crate::model::{Disk, DiskId};

/// Modeled time to read one block from `disk`; unknown disks count as unit bandwidth
pub fn block_time(disks: &[Disk], disk: DiskId, block_size: u64, slow_latency: f64) -> f64 {
    match disks.get(disk) {
        Some(d) => d.block_read_time(block_size, slow_latency),
        None => block_size as f64,
    }
}

/// Per-block read times for the selected disks, in selection order
pub fn block_times(
    selected: &[DiskId],
    disks: &[Disk],
    block_size: u64,
    slow_latency: f64,
) -> Vec<f64> {
    selected
        .iter()
        .map(|&d| block_time(disks, d, block_size, slow_latency))
        .collect()
}

/// Time to repair one stripe: the slowest of its selected reads
pub fn stripe_repair_time(
    selected: &[DiskId],
    disks: &[Disk],
    block_size: u64,
    slow_latency: f64,
) -> f64 {
    block_times(selected, disks, block_size, slow_latency)
        .into_iter()
        .fold(0.0, f64::max)
}
