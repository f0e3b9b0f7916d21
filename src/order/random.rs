//! Random stripe ordering
//!
//! Draws `trials` uniform slot assignments and keeps the one with the
//! smallest makespan. A trial is abandoned as soon as one of its slots
//! grows past the best makespan seen so far.

use super::StripeOrder;
use rand::Rng;

pub(crate) fn schedule<R: Rng + ?Sized>(
    times: &[f64],
    pr: usize,
    trials: usize,
    rng: &mut R,
) -> StripeOrder {
    let lanes = pr.min(times.len()).max(1);
    let mut best: Option<(f64, Vec<usize>)> = None;
    let mut assignment = vec![0usize; times.len()];
    let mut loads = vec![0.0f64; lanes];

    for _ in 0..trials.max(1) {
        loads.iter_mut().for_each(|l| *l = 0.0);
        let bound = best.as_ref().map_or(f64::INFINITY, |(m, _)| *m);
        let mut aborted = false;

        for (i, &t) in times.iter().enumerate() {
            let slot = rng.gen_range(0..lanes);
            assignment[i] = slot;
            loads[slot] += t;
            if loads[slot] >= bound {
                aborted = true;
                break;
            }
        }
        if aborted {
            continue;
        }

        let makespan = loads.iter().copied().fold(0.0, f64::max);
        best = Some((makespan, assignment.clone()));
    }

    let mut slots: Vec<Vec<usize>> = vec![Vec::new(); lanes];
    if let Some((_, assignment)) = best {
        for (i, slot) in assignment.into_iter().enumerate() {
            slots[slot].push(i);
        }
    }
    StripeOrder::new(slots)
}
