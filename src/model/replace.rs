//! Failed-disk to backup-disk remap

use super::disk::DiskId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Bijective mapping from failed disks to the spares replacing them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceMap {
    ids: BTreeMap<DiskId, DiskId>,
    paths: BTreeMap<PathBuf, PathBuf>,
}

impl ReplaceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `failed` is rebuilt onto `backup`.
    ///
    /// Returns false and leaves the map untouched if either side is already
    /// mapped.
    pub fn insert(
        &mut self,
        failed: DiskId,
        backup: DiskId,
        failed_path: &Path,
        backup_path: &Path,
    ) -> bool {
        if self.ids.contains_key(&failed) || self.ids.values().any(|&b| b == backup) {
            return false;
        }
        self.ids.insert(failed, backup);
        self.paths
            .insert(failed_path.to_path_buf(), backup_path.to_path_buf());
        true
    }

    /// Backup disk replacing `failed`
    pub fn backup_for(&self, failed: DiskId) -> Option<DiskId> {
        self.ids.get(&failed).copied()
    }

    /// Backup mount path replacing `failed_path`
    pub fn path_for(&self, failed_path: &Path) -> Option<&Path> {
        self.paths.get(failed_path).map(PathBuf::as_path)
    }

    pub fn contains(&self, failed: DiskId) -> bool {
        self.ids.contains_key(&failed)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// `(failed, backup)` pairs in ascending failed-id order
    pub fn iter(&self) -> impl Iterator<Item = (DiskId, DiskId)> + '_ {
        self.ids.iter().map(|(&f, &b)| (f, b))
    }

    /// Caller-visible mount path mapping
    pub fn paths(&self) -> &BTreeMap<PathBuf, PathBuf> {
        &self.paths
    }
}
