//! Fixed-width disk bitset
//!
//! One bit per disk id packed into `u64` words. Used for failed-disk sets and
//! for per-stripe conflict masks.

use super::disk::DiskId;

const WORD_BITS: usize = 64;

/// A set of disk ids backed by machine words
#[derive(Debug, Clone, Default)]
pub struct DiskSet {
    words: Vec<u64>,
}

impl DiskSet {
    /// Create an empty set able to hold ids below `capacity` without growing
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(WORD_BITS)],
        }
    }

    /// Create a set from an iterator of disk ids
    pub fn from_ids<I: IntoIterator<Item = DiskId>>(capacity: usize, ids: I) -> Self {
        let mut set = Self::with_capacity(capacity);
        for id in ids {
            set.insert(id);
        }
        set
    }

    /// Insert a disk id, growing the word array when needed
    pub fn insert(&mut self, id: DiskId) {
        let word = id / WORD_BITS;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (id % WORD_BITS);
    }

    /// Remove a disk id
    pub fn remove(&mut self, id: DiskId) {
        if let Some(w) = self.words.get_mut(id / WORD_BITS) {
            *w &= !(1u64 << (id % WORD_BITS));
        }
    }

    /// Check membership
    pub fn contains(&self, id: DiskId) -> bool {
        self.words
            .get(id / WORD_BITS)
            .is_some_and(|w| w & (1u64 << (id % WORD_BITS)) != 0)
    }

    /// True if the two sets share at least one disk
    pub fn intersects(&self, other: &DiskSet) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| a & b != 0)
    }

    /// Number of disks in the set
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Iterate over member ids in ascending order
    pub fn iter(&self) -> impl Iterator<Item = DiskId> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &w)| {
            (0..WORD_BITS)
                .filter(move |b| w & (1u64 << b) != 0)
                .map(move |b| i * WORD_BITS + b)
        })
    }
}

impl PartialEq for DiskSet {
    fn eq(&self, other: &Self) -> bool {
        let n = self.words.len().max(other.words.len());
        (0..n).all(|i| {
            self.words.get(i).copied().unwrap_or(0) == other.words.get(i).copied().unwrap_or(0)
        })
    }
}

impl Eq for DiskSet {}

impl FromIterator<DiskId> for DiskSet {
    fn from_iter<I: IntoIterator<Item = DiskId>>(iter: I) -> Self {
        Self::from_ids(0, iter)
    }
}

// =============================================================================
// Tests
// =============================================================================
