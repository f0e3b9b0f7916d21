//! BalanceK block selection
//!
//! Every damaged stripe starts out reading all of its survivors. Phase one
//! sheds surplus memberships (a stripe only needs K) from the disk with the
//! highest normalized load `load / bandwidth`. Phase two migrates memberships
//! away from the most loaded disk along a borrowing chain
//! `d -> stripe -> disk -> stripe -> ... -> n`, where each hop hands a stripe
//! to a survivor that does not read it yet and the chain ends at a disk whose
//! normalized load after the transfer stays strictly below that of `d`.
//! Intermediate disks keep their load. A disk with no such chain lands in the
//! cannot-reduce set, which is emptied again after every successful chain;
//! the loop stops once every loaded disk is in it.
//!
//! Disks are visited by metric descending then id ascending, stripes by index
//! ascending, so the result only depends on the input.

use crate::model::{Disk, DiskId};
use std::collections::{BTreeSet, VecDeque};

struct Balancer {
    k: usize,
    /// Readable survivors of each damaged stripe, in distribution order
    survivors: Vec<Vec<DiskId>>,
    /// Disks currently read by each damaged stripe
    members: Vec<BTreeSet<DiskId>>,
    /// Damaged stripes reading each disk
    stripes_of: Vec<BTreeSet<usize>>,
    load: Vec<usize>,
    bandwidth: Vec<f64>,
}

impl Balancer {
    fn new(survivors: Vec<Vec<DiskId>>, disks: &[Disk], k: usize) -> Self {
        let width = survivors
            .iter()
            .flatten()
            .map(|&d| d + 1)
            .max()
            .unwrap_or(0)
            .max(disks.len());

        let mut stripes_of = vec![BTreeSet::new(); width];
        let mut load = vec![0usize; width];
        let members: Vec<BTreeSet<DiskId>> = survivors
            .iter()
            .enumerate()
            .map(|(j, surv)| {
                for &d in surv {
                    stripes_of[d].insert(j);
                    load[d] += 1;
                }
                surv.iter().copied().collect()
            })
            .collect();

        let bandwidth = (0..width)
            .map(|d| disks.get(d).map_or(1.0, Disk::effective_read_bw))
            .collect();

        Self {
            k,
            survivors,
            members,
            stripes_of,
            load,
            bandwidth,
        }
    }

    fn metric(&self, d: DiskId) -> f64 {
        self.load[d] as f64 / self.bandwidth[d]
    }

    fn surplus(&self, j: usize) -> usize {
        self.members[j].len().saturating_sub(self.k)
    }

    /// Disks ordered by metric descending, id ascending
    fn ranked(&self) -> Vec<DiskId> {
        let mut order: Vec<DiskId> = (0..self.load.len())
            .filter(|&d| self.load[d] > 0)
            .collect();
        order.sort_by(|&a, &b| self.metric(b).total_cmp(&self.metric(a)).then(a.cmp(&b)));
        order
    }

    fn drop_member(&mut self, j: usize, d: DiskId) {
        self.members[j].remove(&d);
        self.stripes_of[d].remove(&j);
        self.load[d] -= 1;
    }

    fn add_member(&mut self, j: usize, d: DiskId) {
        self.members[j].insert(d);
        self.stripes_of[d].insert(j);
        self.load[d] += 1;
    }

    /// Phase one: drop surplus memberships from the most loaded disks
    fn shed(&mut self) {
        let mut available: usize = (0..self.members.len()).map(|j| self.surplus(j)).sum();
        while available > 0 {
            let pick = self.ranked().into_iter().find_map(|d| {
                self.stripes_of[d]
                    .iter()
                    .copied()
                    .find(|&j| self.surplus(j) > 0)
                    .map(|j| (d, j))
            });
            let Some((d, j)) = pick else {
                break;
            };
            self.drop_member(j, d);
            available -= 1;
        }
    }

    /// Shortest borrowing chain from `from` to a disk that can absorb one
    /// more stripe while staying below `from`'s metric
    fn find_chain(&self, from: DiskId) -> Option<Vec<(usize, DiskId, DiskId)>> {
        let width = self.load.len();
        let threshold = self.metric(from);
        let mut parent: Vec<Option<(usize, DiskId)>> = vec![None; width];
        let mut seen_disk = vec![false; width];
        let mut seen_stripe = vec![false; self.members.len()];
        let mut queue = VecDeque::new();

        seen_disk[from] = true;
        queue.push_back(from);

        while let Some(x) = queue.pop_front() {
            for &j in &self.stripes_of[x] {
                if seen_stripe[j] {
                    continue;
                }
                seen_stripe[j] = true;
                for &y in &self.survivors[j] {
                    if seen_disk[y] || self.members[j].contains(&y) {
                        continue;
                    }
                    seen_disk[y] = true;
                    parent[y] = Some((j, x));

                    if (self.load[y] + 1) as f64 / self.bandwidth[y] < threshold {
                        let mut chain = Vec::new();
                        let mut cur = y;
                        while let Some((stripe, prev)) = parent[cur] {
                            chain.push((stripe, prev, cur));
                            cur = prev;
                        }
                        chain.reverse();
                        return Some(chain);
                    }
                    queue.push_back(y);
                }
            }
        }
        None
    }

    /// Phase two: migrate along borrowing chains until every loaded disk is
    /// stuck. A successful chain strictly lowers `sum(load * (load + 1) / bandwidth)`,
    /// so the loop is finite.
    fn migrate(&mut self) {
        let mut cannot_reduce = BTreeSet::new();
        loop {
            let Some(top) = self
                .ranked()
                .into_iter()
                .find(|d| !cannot_reduce.contains(d))
            else {
                return;
            };
            match self.find_chain(top) {
                Some(chain) => {
                    for (j, out, into) in chain {
                        self.drop_member(j, out);
                        self.add_member(j, into);
                    }
                    cannot_reduce.clear();
                }
                None => {
                    cannot_reduce.insert(top);
                }
            }
        }
    }

    fn into_selection(self) -> Vec<Vec<DiskId>> {
        self.survivors
            .iter()
            .zip(&self.members)
            .map(|(surv, members)| {
                surv.iter()
                    .copied()
                    .filter(|d| members.contains(d))
                    .collect()
            })
            .collect()
    }
}

/// Select K of each stripe's `candidates`, minimizing the maximum normalized
/// disk load. Returns one selection per candidate list.
pub(crate) fn balance_k(
    candidates: Vec<Vec<DiskId>>,
    disks: &[Disk],
    k: usize,
) -> Vec<Vec<DiskId>> {
    let mut balancer = Balancer::new(candidates, disks, k);
    balancer.shed();
    balancer.migrate();
    balancer.into_selection()
}
