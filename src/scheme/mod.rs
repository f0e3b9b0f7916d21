//! Block-Selection Schemes
//!
//! For each damaged stripe, choose which K of the surviving blocks to read:
//!
//! - **FirstK** - first K survivors in distribution order
//! - **FastestK** - K survivors with the highest read bandwidth
//! - **RandomK** - K survivors chosen uniformly at random
//! - **BalanceK** - K survivors chosen to minimize the maximum per-disk load
//!
//! Undamaged stripes keep their original distribution. A stripe with fewer
//! than K readable survivors gets all of them; the planner rejects it.

mod balance;

use crate::error::Error;
use crate::model::{Disk, DiskId, DiskSet, Stripe};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Selection Kind
// =============================================================================

/// Block-selection algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockSelection {
    FirstK,
    FastestK,
    RandomK,
    BalanceK,
}

impl BlockSelection {
    pub const ALL: [BlockSelection; 4] = [
        BlockSelection::FirstK,
        BlockSelection::FastestK,
        BlockSelection::RandomK,
        BlockSelection::BalanceK,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockSelection::FirstK => "first-k",
            BlockSelection::FastestK => "fastest-k",
            BlockSelection::RandomK => "random-k",
            BlockSelection::BalanceK => "balance-k",
        }
    }
}

impl fmt::Display for BlockSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockSelection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "first-k" | "firstk" => Ok(BlockSelection::FirstK),
            "fastest-k" | "fastestk" => Ok(BlockSelection::FastestK),
            "random-k" | "randomk" => Ok(BlockSelection::RandomK),
            "balance-k" | "balancek" => Ok(BlockSelection::BalanceK),
            _ => Err(Error::UnknownScheme(s.to_string())),
        }
    }
}

// =============================================================================
// Scheme
// =============================================================================

/// Blocks to read, one ordered disk list per stripe index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scheme {
    selections: Vec<Vec<DiskId>>,
    damaged: Vec<usize>,
}

impl Scheme {
    /// Disks to read for stripe `stripe`
    pub fn get(&self, stripe: usize) -> &[DiskId] {
        self.selections.get(stripe).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of stripes covered
    pub fn len(&self) -> usize {
        self.selections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    /// Indices of the damaged stripes the scheme was computed for
    pub fn damaged(&self) -> &[usize] {
        &self.damaged
    }

    /// Per-disk read counts over damaged stripes
    pub fn load_stats(&self, disk_count: usize) -> LoadStats {
        let mut per_disk = vec![0usize; disk_count];
        for &s in &self.damaged {
            for &d in &self.selections[s] {
                if d >= per_disk.len() {
                    per_disk.resize(d + 1, 0);
                }
                per_disk[d] += 1;
            }
        }
        LoadStats::from_loads(per_disk)
    }
}

/// Read-load summary of a scheme
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadStats {
    pub per_disk: Vec<usize>,
    pub max_load: usize,
    pub sum_load: usize,
}

impl LoadStats {
    pub fn from_loads(per_disk: Vec<usize>) -> Self {
        Self {
            max_load: per_disk.iter().copied().max().unwrap_or(0),
            sum_load: per_disk.iter().sum(),
            per_disk,
        }
    }
}

// =============================================================================
// Selection
// =============================================================================

/// Choose the blocks each stripe reads under `failed`
pub fn select_blocks<R: Rng + ?Sized>(
    selection: BlockSelection,
    stripes: &[Stripe],
    failed: &DiskSet,
    disks: &[Disk],
    k: usize,
    rng: &mut R,
) -> Scheme {
    select_blocks_avoiding(selection, stripes, failed, &[], disks, k, rng)
}

/// Like [`select_blocks`], but stripe `s` never reads the disks listed in
/// `avoid[s]` (blocks known to be rotten). Stripes past the end of `avoid`
/// have nothing to avoid.
pub fn select_blocks_avoiding<R: Rng + ?Sized>(
    selection: BlockSelection,
    stripes: &[Stripe],
    failed: &DiskSet,
    avoid: &[Vec<DiskId>],
    disks: &[Disk],
    k: usize,
    rng: &mut R,
) -> Scheme {
    let mut selections: Vec<Vec<DiskId>> = stripes
        .iter()
        .map(|s| s.distribution.clone())
        .collect();
    let damaged: Vec<usize> = (0..stripes.len())
        .filter(|&s| stripes[s].is_damaged(failed))
        .collect();

    let candidates = |s: usize| -> Vec<DiskId> {
        let skip = avoid.get(s).map(Vec::as_slice).unwrap_or(&[]);
        stripes[s]
            .surviving(failed)
            .into_iter()
            .filter(|d| !skip.contains(d))
            .collect()
    };
    let read_bw = |d: DiskId| disks.get(d).map_or(0.0, |disk| disk.read_bw);

    match selection {
        BlockSelection::BalanceK => {
            let pool = damaged.iter().map(|&s| candidates(s)).collect();
            let chosen = balance::balance_k(pool, disks, k);
            for (&s, sel) in damaged.iter().zip(chosen) {
                selections[s] = sel;
            }
        }
        _ => {
            for &s in &damaged {
                let mut surv = candidates(s);
                match selection {
                    BlockSelection::FastestK => {
                        surv.sort_by(|&a, &b| read_bw(b).total_cmp(&read_bw(a)));
                    }
                    BlockSelection::RandomK => surv.shuffle(rng),
                    _ => {}
                }
                surv.truncate(k);
                selections[s] = surv;
            }
        }
    }

    Scheme {
        selections,
        damaged,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn stripes() -> Vec<Stripe> {
        vec![
            Stripe::new(0, vec![0, 1, 2, 3, 4, 5], vec![0; 6]).unwrap(),
            Stripe::new(1, vec![5, 6, 7, 1, 2, 3], vec![0; 6]).unwrap(),
            Stripe::new(2, vec![3, 4, 5, 6, 7, 0], vec![1; 6]).unwrap(),
        ]
    }

    fn disks(n: usize) -> Vec<Disk> {
        (0..n).map(|i| Disk::new(i, "/tmp")).collect()
    }

    #[test]
    fn test_parse_selection() {
        assert_eq!("first-k".parse::<BlockSelection>().unwrap(), BlockSelection::FirstK);
        assert_eq!("BalanceK".parse::<BlockSelection>().unwrap(), BlockSelection::BalanceK);
        assert_eq!("random_k".parse::<BlockSelection>().unwrap(), BlockSelection::RandomK);
        assert_matches!(
            "slowest-k".parse::<BlockSelection>(),
            Err(Error::UnknownScheme(s)) if s == "slowest-k"
        );
        for sel in BlockSelection::ALL {
            assert_eq!(sel.to_string().parse::<BlockSelection>().unwrap(), sel);
        }
    }

    #[test]
    fn test_first_k() {
        let failed = DiskSet::from_ids(8, [1]);
        let scheme = select_blocks(
            BlockSelection::FirstK,
            &stripes(),
            &failed,
            &disks(8),
            4,
            &mut StdRng::seed_from_u64(0),
        );
        assert_eq!(scheme.damaged(), &[0, 1]);
        assert_eq!(scheme.get(0), &[0, 2, 3, 4]);
        assert_eq!(scheme.get(1), &[5, 6, 7, 2]);
        // Undamaged stripe keeps its distribution
        assert_eq!(scheme.get(2), &[3, 4, 5, 6, 7, 0]);
    }

    #[test]
    fn test_fastest_k_is_stable() {
        let mut d = disks(8);
        d[4].read_bw = 50.0;
        d[5].read_bw = 20.0;
        let failed = DiskSet::from_ids(8, [1]);
        let scheme = select_blocks(
            BlockSelection::FastestK,
            &stripes(),
            &failed,
            &d,
            4,
            &mut StdRng::seed_from_u64(0),
        );
        assert_eq!(scheme.get(0), &[4, 5, 0, 2]);
    }

    #[test]
    fn test_random_k_draws_survivors() {
        let failed = DiskSet::from_ids(8, [1, 3]);
        let scheme = select_blocks(
            BlockSelection::RandomK,
            &stripes(),
            &failed,
            &disks(8),
            4,
            &mut StdRng::seed_from_u64(9),
        );
        for &s in scheme.damaged() {
            let sel = scheme.get(s);
            assert_eq!(sel.len(), 4);
            assert!(sel.iter().all(|d| !failed.contains(*d)));
        }
    }

    #[test]
    fn test_load_stats() {
        let failed = DiskSet::from_ids(8, [1]);
        let scheme = select_blocks(
            BlockSelection::FirstK,
            &stripes(),
            &failed,
            &disks(8),
            4,
            &mut StdRng::seed_from_u64(0),
        );
        let stats = scheme.load_stats(8);
        assert_eq!(stats.sum_load, 8);
        assert_eq!(stats.max_load, 2);
        assert_eq!(stats.per_disk[2], 2);
        assert_eq!(stats.per_disk[1], 0);
    }

    #[test]
    fn test_avoided_blocks_are_never_selected() {
        let failed = DiskSet::from_ids(8, [1]);
        let avoid = vec![vec![2], vec![], vec![4]];
        for selection in BlockSelection::ALL {
            let scheme = select_blocks_avoiding(
                selection,
                &stripes(),
                &failed,
                &avoid,
                &disks(8),
                4,
                &mut StdRng::seed_from_u64(4),
            );
            assert_eq!(scheme.get(0).len(), 4, "{}", selection);
            assert!(!scheme.get(0).contains(&2), "{}", selection);
            assert_eq!(scheme.get(1).len(), 4, "{}", selection);
        }

        let first = select_blocks_avoiding(
            BlockSelection::FirstK,
            &stripes(),
            &failed,
            &avoid,
            &disks(8),
            4,
            &mut StdRng::seed_from_u64(0),
        );
        assert_eq!(first.get(0), &[0, 3, 4, 5]);
        assert_eq!(first.get(1), &[5, 6, 7, 2]);
    }

    #[test]
    fn test_balance_k_not_worse_than_first_k() {
        let failed = DiskSet::from_ids(8, [5]);
        let mut rng = StdRng::seed_from_u64(0);
        let first = select_blocks(
            BlockSelection::FirstK,
            &stripes(),
            &failed,
            &disks(8),
            4,
            &mut rng,
        );
        let balanced = select_blocks(
            BlockSelection::BalanceK,
            &stripes(),
            &failed,
            &disks(8),
            4,
            &mut rng,
        );
        assert!(balanced.load_stats(8).max_load <= first.load_stats(8).max_load);
        assert_eq!(balanced.load_stats(8).sum_load, first.load_stats(8).sum_load);
    }
}
