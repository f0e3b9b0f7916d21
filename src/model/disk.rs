//! Disk records
//!
//! Per-disk runtime stats: availability, bandwidth, latency and the
//! mount path holding one `<file>/BLOB` per encoded file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Disk identifier. Ids at or above `disk_num` name spare disks.
pub type DiskId = usize;

/// Name of the per-file blob on each disk
pub const BLOB_FILE: &str = "BLOB";

/// Name of the system-state replica stored at the root of some disks
pub const META_FILE: &str = "META";

/// Bandwidth assumed for disks that have not been measured
pub const DEFAULT_BANDWIDTH: f64 = 1.0;

/// A single mounted disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disk {
    pub id: DiskId,
    pub mount_path: PathBuf,
    pub available: bool,
    pub busy: bool,
    pub slow: bool,
    pub read_bw: f64,
    pub write_bw: f64,
    pub rand_read_bw: f64,
    pub rand_write_bw: f64,
    /// Observed request latency, larger is slower
    pub latency: f64,
    pub capacity: u64,
    /// Number of blocks already stored on this disk
    pub block_count: u64,
    /// Whether a `META` replica lives on this disk
    pub has_meta: bool,
}

impl Disk {
    /// Create an available disk with default bandwidth
    pub fn new(id: DiskId, mount_path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            mount_path: mount_path.into(),
            available: true,
            busy: false,
            slow: false,
            read_bw: DEFAULT_BANDWIDTH,
            write_bw: DEFAULT_BANDWIDTH,
            rand_read_bw: DEFAULT_BANDWIDTH,
            rand_write_bw: DEFAULT_BANDWIDTH,
            latency: 0.0,
            capacity: 0,
            block_count: 0,
            has_meta: false,
        }
    }

    /// Read bandwidth used for normalization; non-positive values count as 1
    pub fn effective_read_bw(&self) -> f64 {
        if self.read_bw > 0.0 {
            self.read_bw
        } else {
            DEFAULT_BANDWIDTH
        }
    }

    /// Modeled time to read one block from this disk
    pub fn block_read_time(&self, block_size: u64, slow_latency: f64) -> f64 {
        let base = block_size as f64 / self.effective_read_bw();
        if self.slow {
            base + slow_latency
        } else {
            base
        }
    }

    /// Directory holding this disk's share of `file_name`
    pub fn file_dir(&self, file_name: &str) -> PathBuf {
        self.mount_path.join(file_name)
    }

    /// Path of this disk's blob for `file_name`
    pub fn blob_path(&self, file_name: &str) -> PathBuf {
        self.file_dir(file_name).join(BLOB_FILE)
    }

    /// Path of the META replica on this disk
    pub fn meta_path(&self) -> PathBuf {
        self.mount_path.join(META_FILE)
    }

    pub fn mount(&self) -> &Path {
        &self.mount_path
    }
}

// =============================================================================
// Tests
// =============================================================================
