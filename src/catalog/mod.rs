//! File Catalog
//!
//! Typed mapping from file name to [`FileInfo`], plus the encoder that lays a
//! file out across the disk array.

pub mod encode;

pub use encode::FileEncoder;

use crate::error::{Error, Result};
use crate::model::FileInfo;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Concurrent file catalog
#[derive(Debug, Default)]
pub struct Catalog {
    files: DashMap<String, FileInfo>,
    next_file_id: AtomicU64,
    next_stripe_id: AtomicU64,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a catalog from persisted records
    pub fn from_files(files: Vec<FileInfo>) -> Self {
        let catalog = Self::new();
        let mut next_file = 0;
        let mut next_stripe = 0;
        for mut fi in files {
            fi.ensure_block_status();
            next_file = next_file.max(fi.id + 1);
            if let Some(max) = fi.stripes.iter().map(|s| s.id).max() {
                next_stripe = next_stripe.max(max + 1);
            }
            catalog.files.insert(fi.name.clone(), fi);
        }
        catalog.next_file_id.store(next_file, Ordering::SeqCst);
        catalog.next_stripe_id.store(next_stripe, Ordering::SeqCst);
        catalog
    }

    /// Look up a file by name
    pub fn get(&self, name: &str) -> Option<FileInfo> {
        self.files.get(name).map(|f| f.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    /// Insert a new file; fails if the name is taken
    pub fn insert(&self, file: FileInfo) -> Result<()> {
        use dashmap::mapref::entry::Entry;
        match self.files.entry(file.name.clone()) {
            Entry::Occupied(_) => Err(Error::FileExists(file.name)),
            Entry::Vacant(v) => {
                v.insert(file);
                Ok(())
            }
        }
    }

    /// Insert or replace a file record
    pub fn upsert(&self, file: FileInfo) {
        self.files.insert(file.name.clone(), file);
    }

    pub fn remove(&self, name: &str) -> Option<FileInfo> {
        self.files.remove(name).map(|(_, f)| f)
    }

    /// Mutate a file record in place
    pub fn update<R>(&self, name: &str, f: impl FnOnce(&mut FileInfo) -> R) -> Result<R> {
        let mut entry = self
            .files
            .get_mut(name)
            .ok_or_else(|| Error::FileNotFound(name.to_string()))?;
        Ok(f(entry.value_mut()))
    }

    /// All records sorted by name
    pub fn files(&self) -> Vec<FileInfo> {
        let mut files: Vec<FileInfo> = self.files.iter().map(|e| e.value().clone()).collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        files
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn allocate_file_id(&self) -> u64 {
        self.next_file_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Reserve `count` consecutive global stripe ids, returning the first
    pub fn allocate_stripe_ids(&self, count: usize) -> u64 {
        self.next_stripe_id.fetch_add(count as u64, Ordering::SeqCst)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Stripe;
    use assert_matches::assert_matches;

    fn file(id: u64, name: &str, first_stripe: u64) -> FileInfo {
        let stripes = (0..3)
            .map(|i| Stripe::new(first_stripe + i, vec![0, 1, 2], vec![i, i, i]).unwrap())
            .collect();
        FileInfo::new(id, name, 10, stripes)
    }

    #[test]
    fn test_insert_get_remove() {
        let catalog = Catalog::new();
        catalog.insert(file(0, "a", 0)).unwrap();
        assert!(catalog.contains("a"));
        assert_eq!(catalog.get("a").unwrap().stripe_count(), 3);
        assert_matches!(catalog.insert(file(1, "a", 3)), Err(Error::FileExists(_)));

        assert!(catalog.remove("a").is_some());
        assert!(catalog.get("a").is_none());
    }

    #[test]
    fn test_update_missing_file() {
        let catalog = Catalog::new();
        assert_matches!(
            catalog.update("nope", |f| f.size),
            Err(Error::FileNotFound(_))
        );
    }

    #[test]
    fn test_from_files_restores_counters() {
        let catalog = Catalog::from_files(vec![file(4, "b", 10), file(1, "a", 0)]);
        assert_eq!(catalog.names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(catalog.allocate_file_id(), 5);
        assert_eq!(catalog.allocate_stripe_ids(2), 13);
        assert_eq!(catalog.allocate_stripe_ids(1), 15);
        assert_eq!(catalog.get("b").unwrap().block_status.len(), 3);
    }
}
