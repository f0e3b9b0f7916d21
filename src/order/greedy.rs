//! Greedy (LPT) stripe ordering
//!
//! Longest stripe first, always onto the least-loaded slot.

use super::{OrderedTime, StripeOrder};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

pub(crate) fn schedule(times: &[f64], pr: usize) -> StripeOrder {
    let lanes = pr.min(times.len());
    let mut slots: Vec<Vec<usize>> = vec![Vec::new(); lanes];

    // Max-heap on time; equal times pop in index order
    let mut jobs: BinaryHeap<(OrderedTime, Reverse<usize>)> = times
        .iter()
        .enumerate()
        .map(|(i, &t)| (OrderedTime(t), Reverse(i)))
        .collect();

    // Min-heap on load; equal loads resolve to the lower slot
    let mut loads: BinaryHeap<Reverse<(OrderedTime, usize)>> =
        (0..lanes).map(|s| Reverse((OrderedTime(0.0), s))).collect();

    while let Some((OrderedTime(t), Reverse(job))) = jobs.pop() {
        let Some(Reverse((OrderedTime(load), slot))) = loads.pop() else {
            break;
        };
        slots[slot].push(job);
        loads.push(Reverse((OrderedTime(load + t), slot)));
    }

    StripeOrder::new(slots)
}
