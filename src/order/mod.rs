//! Stripe-Ordering Schedulers
//!
//! Distribute damaged stripes over `pr` concurrent slots so that the slowest
//! slot finishes as early as possible. A slot's stripes are repaired one after
//! another, so the makespan is the largest per-slot sum of repair times.
//!
//! - **Continuous** - binary search over contiguous groups in index order
//! - **Greedy** - longest processing time first
//! - **Random** - best of many random assignments

mod continuous;
mod greedy;
mod random;
pub mod repair_time;

pub use repair_time::{block_time, block_times, stripe_repair_time};

use crate::error::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Ordering Kind
// =============================================================================

/// Stripe-ordering algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlotOrdering {
    Continuous,
    Greedy,
    Random,
}

impl SlotOrdering {
    pub const ALL: [SlotOrdering; 3] =
        [SlotOrdering::Continuous, SlotOrdering::Greedy, SlotOrdering::Random];

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotOrdering::Continuous => "continuous",
            SlotOrdering::Greedy => "greedy",
            SlotOrdering::Random => "random",
        }
    }
}

impl fmt::Display for SlotOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotOrdering {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "continuous" => Ok(SlotOrdering::Continuous),
            "greedy" | "lpt" => Ok(SlotOrdering::Greedy),
            "random" => Ok(SlotOrdering::Random),
            _ => Err(Error::UnknownScheme(s.to_string())),
        }
    }
}

// =============================================================================
// Stripe Order
// =============================================================================

/// Total-order wrapper for repair times
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct OrderedTime(pub f64);

impl Eq for OrderedTime {}

impl PartialOrd for OrderedTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Slots of stripe positions; positions index the repair-time input
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StripeOrder {
    slots: Vec<Vec<usize>>,
}

impl StripeOrder {
    /// Empty slots are dropped
    pub fn new(slots: Vec<Vec<usize>>) -> Self {
        Self {
            slots: slots.into_iter().filter(|s| !s.is_empty()).collect(),
        }
    }

    /// One stripe per slot
    pub fn singletons(n: usize) -> Self {
        Self {
            slots: (0..n).map(|i| vec![i]).collect(),
        }
    }

    pub fn slots(&self) -> &[Vec<usize>] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Largest per-slot sum of `times`
    pub fn makespan(&self, times: &[f64]) -> f64 {
        self.slots
            .iter()
            .map(|slot| slot.iter().map(|&i| times[i]).sum::<f64>())
            .fold(0.0, f64::max)
    }

    /// Stripes grouped by round: round `r` holds the `r`-th stripe of every
    /// slot that still has one.
    pub fn rounds(&self) -> Vec<Vec<usize>> {
        let depth = self.slots.iter().map(Vec::len).max().unwrap_or(0);
        (0..depth)
            .map(|r| self.slots.iter().filter_map(|slot| slot.get(r).copied()).collect())
            .collect()
    }
}

// =============================================================================
// Scheduling
// =============================================================================

/// Concurrent stripe slots that fit in `memory` bytes
pub fn slot_count(memory: u64, footprint: u64) -> Result<usize> {
    let pr = if footprint == 0 { 0 } else { memory / footprint };
    if pr == 0 {
        return Err(Error::MemoryTooSmall { memory, footprint });
    }
    Ok(usize::try_from(pr).unwrap_or(usize::MAX))
}

/// Order stripes with repair times `times` over at most `pr` slots.
/// Returns the order and its makespan.
pub fn order<R: Rng + ?Sized>(
    kind: SlotOrdering,
    times: &[f64],
    pr: usize,
    trials: usize,
    rng: &mut R,
) -> Result<(StripeOrder, f64)> {
    if pr == 0 {
        return Err(Error::InvalidConfig("slot count must be positive".into()));
    }
    if times.len() <= pr {
        let makespan = times.iter().copied().fold(0.0, f64::max);
        return Ok((StripeOrder::singletons(times.len()), makespan));
    }

    let order = match kind {
        SlotOrdering::Continuous => continuous::schedule(times, pr),
        SlotOrdering::Greedy => greedy::schedule(times, pr),
        SlotOrdering::Random => random::schedule(times, pr, trials, rng),
    };
    let makespan = order.makespan(times);
    Ok((order, makespan))
}

// =============================================================================
// Tests
// =============================================================================
