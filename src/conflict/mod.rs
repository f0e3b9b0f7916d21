//! Conflict-Aware Stripe Scheduler (SS-HDR)
//!
//! Two stripes conflict when they read from a common disk. Stripes that share
//! a slot are repaired at the same time, so a slot should only hold stripes
//! that do not conflict, and never more than the memory cap allows.
//!
//! - **Sequence** - pair each stripe with its successor when they are disjoint
//! - **Coloring** - greedy coloring of the conflict graph, one slot per color

use crate::error::Error;
use crate::model::{DiskSet, Stripe};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Conflict-scheduler algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictScheduler {
    Sequence,
    Coloring,
}

impl ConflictScheduler {
    pub const ALL: [ConflictScheduler; 2] =
        [ConflictScheduler::Sequence, ConflictScheduler::Coloring];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictScheduler::Sequence => "sequence",
            ConflictScheduler::Coloring => "coloring",
        }
    }
}

impl fmt::Display for ConflictScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictScheduler {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequence" | "seq" => Ok(ConflictScheduler::Sequence),
            "coloring" | "colouring" | "color" => Ok(ConflictScheduler::Coloring),
            _ => Err(Error::UnknownScheme(s.to_string())),
        }
    }
}

// =============================================================================
// Read Masks
// =============================================================================

/// Disks each damaged stripe reads from, keyed by position in `damaged`.
/// Failed disks are never read and stay out of the mask.
pub fn read_masks(
    stripes: &[Stripe],
    damaged: &[usize],
    failed: &DiskSet,
    capacity: usize,
) -> Vec<DiskSet> {
    damaged
        .iter()
        .map(|&s| DiskSet::from_ids(capacity, stripes[s].surviving(failed)))
        .collect()
}

// =============================================================================
// Scheduling
// =============================================================================

/// Group `items` into slots with `kind`. `conflicts` is called with pairs of
/// items. Returns the slots and their count.
pub fn schedule<F>(
    kind: ConflictScheduler,
    items: &[usize],
    conflicts: F,
    cap: usize,
) -> (Vec<Vec<usize>>, usize)
where
    F: Fn(usize, usize) -> bool,
{
    let cap = cap.max(1);
    let slots = match kind {
        ConflictScheduler::Sequence => sequence(items, &conflicts, cap),
        ConflictScheduler::Coloring => coloring(items, &conflicts, cap),
    };
    let count = slots.len();
    (slots, count)
}

fn sequence<F>(items: &[usize], conflicts: &F, cap: usize) -> Vec<Vec<usize>>
where
    F: Fn(usize, usize) -> bool,
{
    let mut slots = Vec::new();
    let mut i = 0;
    while i < items.len() {
        let a = items[i];
        match items.get(i + 1) {
            Some(&b) if cap >= 2 && !conflicts(a, b) => {
                slots.push(vec![a, b]);
                i += 2;
            }
            _ => {
                slots.push(vec![a]);
                i += 1;
            }
        }
    }
    slots
}

fn coloring<F>(items: &[usize], conflicts: &F, cap: usize) -> Vec<Vec<usize>>
where
    F: Fn(usize, usize) -> bool,
{
    let n = items.len();
    let mut neighbors: Vec<Vec<usize>> = vec![Vec::new(); n];
    for a in 0..n {
        for b in a + 1..n {
            if conflicts(items[a], items[b]) {
                neighbors[a].push(b);
                neighbors[b].push(a);
            }
        }
    }

    let mut color: Vec<Option<usize>> = vec![None; n];
    let mut slots: Vec<Vec<usize>> = Vec::new();
    for v in 0..n {
        let mut used = vec![false; slots.len() + 1];
        for &u in &neighbors[v] {
            if let Some(c) = color[u] {
                used[c] = true;
            }
        }
        let c = (0..=slots.len())
            .find(|&c| !used[c] && slots.get(c).map_or(true, |s| s.len() < cap))
            .unwrap_or(slots.len());
        if c == slots.len() {
            slots.push(Vec::new());
        }
        slots[c].push(items[v]);
        color[v] = Some(c);
    }
    slots
}

// =============================================================================
// Tests
// =============================================================================
