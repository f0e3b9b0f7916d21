//! Stripe layout generation
//!
//! Chooses which disks hold each stripe and where each block lands on its
//! disk. Offsets are assigned by appending to each disk's running block count.

use super::disk::DiskId;
use super::stripe::Stripe;
use crate::error::{Error, Result};
use rand::seq::index;
use rand::Rng;

/// Random placement: each stripe picks `width` distinct disks uniformly
pub fn random_distribution<R: Rng + ?Sized>(
    stripe_num: usize,
    width: usize,
    disk_num: usize,
    rng: &mut R,
) -> Result<Vec<Vec<DiskId>>> {
    check_width(width, disk_num)?;
    Ok((0..stripe_num)
        .map(|_| index::sample(rng, disk_num, width).into_vec())
        .collect())
}

/// Round-robin placement: block `i` of stripe `s` lands on disk `(s + i) % disk_num`
pub fn rotating_distribution(
    stripe_num: usize,
    width: usize,
    disk_num: usize,
) -> Result<Vec<Vec<DiskId>>> {
    check_width(width, disk_num)?;
    Ok((0..stripe_num)
        .map(|s| (0..width).map(|i| (s + i) % disk_num).collect())
        .collect())
}

/// Assign block offsets by appending to each disk, updating `block_counts`
pub fn assign_offsets(
    distributions: &[Vec<DiskId>],
    block_counts: &mut [u64],
) -> Result<Vec<Vec<u64>>> {
    let len = block_counts.len();
    let mut offsets = Vec::with_capacity(distributions.len());
    for dist in distributions {
        let mut row = Vec::with_capacity(dist.len());
        for &disk in dist {
            let count = block_counts
                .get_mut(disk)
                .ok_or(Error::DiskOutOfRange { disk, count: len })?;
            row.push(*count);
            *count += 1;
        }
        offsets.push(row);
    }
    Ok(offsets)
}

/// Build stripes with consecutive ids starting at `first_id`
pub fn build_stripes(
    first_id: u64,
    distributions: Vec<Vec<DiskId>>,
    block_counts: &mut [u64],
) -> Result<Vec<Stripe>> {
    let offsets = assign_offsets(&distributions, block_counts)?;
    distributions
        .into_iter()
        .zip(offsets)
        .enumerate()
        .map(|(i, (dist, off))| Stripe::new(first_id + i as u64, dist, off))
        .collect()
}

fn check_width(width: usize, disk_num: usize) -> Result<()> {
    if width > disk_num {
        return Err(Error::InvalidConfig(format!(
            "stripe width {} exceeds disk count {}",
            width, disk_num
        )));
    }
    Ok(())
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

    #[test]
    fn test_random_distribution_is_distinct() {
        let mut rng = StdRng::seed_from_u64(7);
        let dists = random_distribution(100, 6, 9, &mut rng).unwrap();
        assert_eq!(dists.len(), 100);
        for d in &dists {
            let mut sorted = d.clone();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(sorted.len(), 6);
            assert!(d.iter().all(|&x| x < 9));
        }
    }

    #[test]
    fn test_random_distribution_is_seeded() {
        let a = random_distribution(20, 4, 10, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = random_distribution(20, 4, 10, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rotating_distribution() {
        let dists = rotating_distribution(3, 3, 4).unwrap();
        assert_eq!(dists, vec![vec![0, 1, 2], vec![1, 2, 3], vec![2, 3, 0]]);
    }

    #[test]
    fn test_width_exceeding_disks_is_rejected() {
        assert!(rotating_distribution(1, 5, 4).is_err());
    }

    #[test]
    fn test_offsets_append_per_disk() {
        let dists = vec![vec![0, 1], vec![1, 2], vec![0, 2]];
        let mut counts = vec![0, 5, 0];
        let offsets = assign_offsets(&dists, &mut counts).unwrap();
        assert_eq!(offsets, vec![vec![0, 5], vec![6, 0], vec![1, 1]]);
        assert_eq!(counts, vec![2, 7, 2]);
    }

    #[test]
    fn test_offsets_reject_unknown_disk() {
        let mut counts = vec![0, 0];
        assert_matches!(
            assign_offsets(&[vec![0, 3]], &mut counts),
            Err(Error::DiskOutOfRange { disk: 3, count: 2 })
        );
    }
}
