//! Intra-Stripe Parallelism Optimizer
//!
//! Repairing a stripe in waves of `is` blocks needs only `is` block buffers in
//! flight, so a smaller `is` lets more stripes run concurrently at the cost of
//! serializing each stripe's reads. For every candidate `is` in `2..=K` the
//! optimizer models the per-stripe wave cost and simulates the batch, then
//! picks the fastest.

use crate::model::Disk;
use crate::order::block_times;
use crate::order::OrderedTime;
use crate::scheme::Scheme;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Per-block read times for each damaged stripe of `scheme`, sorted descending
pub fn read_time_matrix(
    scheme: &Scheme,
    disks: &[Disk],
    block_size: u64,
    slow_latency: f64,
) -> Vec<Vec<f64>> {
    scheme
        .damaged()
        .iter()
        .map(|&s| {
            let mut row = block_times(scheme.get(s), disks, block_size, slow_latency);
            row.sort_by(|a, b| b.total_cmp(a));
            row
        })
        .collect()
}

/// Cost of a stripe read in waves of `is` blocks: each wave lasts as long as
/// its slowest block. `row` must be sorted descending.
pub fn wave_cost(row: &[f64], is: usize) -> f64 {
    row.chunks(is.max(1)).map(|wave| wave[0]).sum()
}

/// Finish time of `costs` processed `con` at a time, each free lane taking
/// the next pending stripe
pub fn simulate(costs: &[f64], con: usize) -> f64 {
    if con == 0 {
        return f64::INFINITY;
    }
    let mut running: BinaryHeap<Reverse<OrderedTime>> = BinaryHeap::new();
    let mut finish = 0.0f64;
    for &cost in costs {
        let start = if running.len() < con {
            0.0
        } else {
            match running.pop() {
                Some(Reverse(OrderedTime(t))) => t,
                None => 0.0,
            }
        };
        let end = start + cost;
        finish = finish.max(end);
        running.push(Reverse(OrderedTime(end)));
    }
    finish
}

/// Best wave width for repairing `matrix` with `memory` bytes of buffers
pub fn optimize(matrix: &[Vec<f64>], k: usize, memory: u64, block_size: u64) -> usize {
    if k < 2 || matrix.is_empty() {
        return k;
    }

    let n = matrix.len();
    let mut best: Option<(f64, usize)> = None;
    for is in 2..=k {
        let per_stripe = is as u64 * block_size;
        let con = if per_stripe == 0 { n as u64 } else { memory / per_stripe };
        let con = usize::try_from(con).unwrap_or(usize::MAX).min(n);
        if con == 0 {
            continue;
        }
        let costs: Vec<f64> = matrix.iter().map(|row| wave_cost(row, is)).collect();
        let total = simulate(&costs, con);
        if best.map_or(true, |(t, _)| total < t) {
            best = Some((total, is));
        }
    }
    best.map_or(k, |(_, is)| is)
}
