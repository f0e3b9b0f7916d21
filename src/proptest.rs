//! Property-Based Tests for Scheduling
//!
//! # Test Properties
//!
//! 1. **Scheme Validity**: every damaged stripe reads K distinct survivors
//! 2. **Balance**: BalanceK's max load never exceeds FirstK's, at equal total load
//! 3. **Determinism**: BalanceK depends only on its input
//! 4. **Makespan Bounds**: every ordering lands in `[max, sum]`
//! 5. **LPT Bound**: Greedy stays within 4/3 of the optimum
//! 6. **Conflict Freedom**: SS-HDR slots never share a disk

#![cfg(test)]

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::conflict::{self, ConflictScheduler};
use crate::model::{layout, Disk, DiskId, DiskSet, Stripe};
use crate::order::{self, SlotOrdering};
use crate::scheme::{select_blocks, BlockSelection};

// =============================================================================
// Property Strategies
// =============================================================================

/// (k, m, disk_num)
fn layout_config_strategy() -> impl Strategy<Value = (usize, usize, usize)> {
    (2usize..=6, 1usize..=3).prop_flat_map(|(k, m)| (Just(k), Just(m), (k + m)..=(k + m + 8)))
}

/// Random stripes plus a failed set no larger than m
fn damaged_layout_strategy() -> impl Strategy<Value = (usize, usize, Vec<Stripe>, Vec<DiskId>)> {
    (layout_config_strategy(), 1usize..40, any::<u64>()).prop_flat_map(
        |((k, m, n), stripes, seed)| {
            let failed = proptest::sample::subsequence((0..n).collect::<Vec<_>>(), 1..=m);
            (Just(k), Just(n), Just(build(k + m, n, stripes, seed)), failed)
        },
    )
}

fn build(width: usize, disk_num: usize, stripe_num: usize, seed: u64) -> Vec<Stripe> {
    let mut rng = StdRng::seed_from_u64(seed);
    let dists = layout::random_distribution(stripe_num, width, disk_num, &mut rng).unwrap();
    let mut counts = vec![0u64; disk_num];
    layout::build_stripes(0, dists, &mut counts).unwrap()
}

fn times_strategy(max_len: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.1f64..100.0, 1..max_len)
}

fn uniform(n: usize) -> Vec<Disk> {
    (0..n).map(|i| Disk::new(i, "")).collect()
}

/// Exhaustive optimal makespan for small inputs
fn brute_force(times: &[f64], pr: usize) -> f64 {
    let n = times.len();
    let mut best = f64::INFINITY;
    let combos = pr.pow(n as u32);
    for mut code in 0..combos {
        let mut loads = vec![0.0; pr];
        for &t in times {
            loads[code % pr] += t;
            code /= pr;
        }
        best = best.min(loads.into_iter().fold(0.0, f64::max));
    }
    best
}

// =============================================================================
// Scheme Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: every scheme reads exactly K distinct surviving disks per damaged stripe.
    #[test]
    fn prop_schemes_read_k_survivors(
        (k, n, stripes, failed) in damaged_layout_strategy(),
        seed in any::<u64>(),
    ) {
        let failed = DiskSet::from_ids(n, failed);
        let disks = uniform(n);
        for selection in BlockSelection::ALL {
            let mut rng = StdRng::seed_from_u64(seed);
            let scheme = select_blocks(selection, &stripes, &failed, &disks, k, &mut rng);
            for &s in scheme.damaged() {
                let sel = scheme.get(s);
                prop_assert_eq!(sel.len(), k);
                let unique: DiskSet = sel.iter().copied().collect();
                prop_assert_eq!(unique.len(), k);
                for &d in sel {
                    prop_assert!(!failed.contains(d));
                    prop_assert!(stripes[s].distribution.contains(&d));
                }
            }
        }
    }

    /// Property: with uniform bandwidth BalanceK's max load never exceeds FirstK's.
    #[test]
    fn prop_balance_k_not_worse_than_first_k(
        (k, n, stripes, failed) in damaged_layout_strategy(),
    ) {
        let failed = DiskSet::from_ids(n, failed);
        let disks = uniform(n);
        let mut rng = StdRng::seed_from_u64(0);
        let first = select_blocks(BlockSelection::FirstK, &stripes, &failed, &disks, k, &mut rng)
            .load_stats(n);
        let balanced =
            select_blocks(BlockSelection::BalanceK, &stripes, &failed, &disks, k, &mut rng)
                .load_stats(n);
        prop_assert!(balanced.max_load <= first.max_load);
        prop_assert_eq!(balanced.sum_load, first.sum_load);
    }

    /// Property: BalanceK is a pure function of its input.
    #[test]
    fn prop_balance_k_deterministic(
        (k, n, stripes, failed) in damaged_layout_strategy(),
        a in any::<u64>(),
        b in any::<u64>(),
    ) {
        let failed = DiskSet::from_ids(n, failed);
        let disks = uniform(n);
        let select = |seed: u64| {
            let mut rng = StdRng::seed_from_u64(seed);
            select_blocks(BlockSelection::BalanceK, &stripes, &failed, &disks, k, &mut rng)
        };
        let x = select(a);
        let y = select(b);
        prop_assert_eq!(x, y);
    }
}

// =============================================================================
// Ordering Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: makespan lies between the longest stripe and the total time.
    #[test]
    fn prop_makespan_bounds(times in times_strategy(30), pr in 1usize..8) {
        let max = times.iter().copied().fold(0.0, f64::max);
        let sum: f64 = times.iter().sum();
        for kind in SlotOrdering::ALL {
            let (order, makespan) =
                order::order(kind, &times, pr, 50, &mut StdRng::seed_from_u64(1)).unwrap();
            prop_assert!(makespan >= max - 1e-9);
            prop_assert!(makespan <= sum + 1e-9);
            prop_assert!(order.len() <= pr);
            prop_assert_eq!(order.slots().iter().map(Vec::len).sum::<usize>(), times.len());
        }
    }

    /// Property: LPT makespan is at most 4/3 of the optimum (n = 6, pr = 2).
    #[test]
    fn prop_lpt_bound(times in prop::collection::vec(0.1f64..100.0, 6)) {
        let mut rng = StdRng::seed_from_u64(0);
        let (_, lpt) = order::order(SlotOrdering::Greedy, &times, 2, 1, &mut rng).unwrap();
        let opt = brute_force(&times, 2);
        prop_assert!(lpt <= opt * 4.0 / 3.0 + 1e-9);
    }

    /// Property: Continuous matches the best contiguous split within tolerance.
    #[test]
    fn prop_continuous_is_optimal_contiguous(times in prop::collection::vec(0.1f64..100.0, 2..10)) {
        let mut rng = StdRng::seed_from_u64(0);
        let (_, got) = order::order(SlotOrdering::Continuous, &times, 2, 1, &mut rng).unwrap();
        let sum: f64 = times.iter().sum();
        let mut best = f64::INFINITY;
        let mut prefix = 0.0;
        for &t in &times[..times.len() - 1] {
            prefix += t;
            best = best.min(prefix.max(sum - prefix));
        }
        prop_assert!((got - best).abs() < 1e-3, "got {} best {}", got, best);
    }
}

// =============================================================================
// Conflict Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: no slot holds two stripes reading a common disk, and no slot exceeds the cap.
    #[test]
    fn prop_conflict_free_slots(
        (_k, n, stripes, failed) in damaged_layout_strategy(),
        cap in 1usize..6,
    ) {
        let failed = DiskSet::from_ids(n, failed);
        let damaged: Vec<usize> =
            (0..stripes.len()).filter(|&s| stripes[s].is_damaged(&failed)).collect();
        let masks = conflict::read_masks(&stripes, &damaged, &failed, n);
        let items: Vec<usize> = (0..damaged.len()).collect();

        for kind in ConflictScheduler::ALL {
            let (slots, count) =
                conflict::schedule(kind, &items, |a, b| masks[a].intersects(&masks[b]), cap);
            prop_assert_eq!(count, slots.len());
            prop_assert_eq!(slots.iter().map(Vec::len).sum::<usize>(), items.len());
            for slot in &slots {
                prop_assert!(slot.len() <= cap.max(1));
                for (i, &a) in slot.iter().enumerate() {
                    for &b in &slot[i + 1..] {
                        prop_assert!(!masks[a].intersects(&masks[b]));
                    }
                }
            }
        }
    }
}
