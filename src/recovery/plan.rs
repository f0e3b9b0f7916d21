//! Recovery planning
//!
//! Turns a recovery mode into rounds of [`StripeTask`]s. Every task of a round
//! runs concurrently and rounds are separated by a barrier, so the round size
//! is what the memory budget bounds.

use super::repair::StripeTask;
use super::{RecoveryMode, RecoveryOptions};
use crate::config::EngineConfig;
use crate::conflict;
use crate::error::{Error, Result};
use crate::model::{BlockStatus, Disk, DiskId, DiskSet, FileInfo};
use crate::order::{self, block_time, stripe_repair_time};
use crate::parallelism;
use crate::scheme::{select_blocks_avoiding, BlockSelection, Scheme};
use rand::Rng;
use std::collections::BTreeSet;
use tracing::{debug, info};

pub(crate) struct PlanInput<'a> {
    pub file: &'a FileInfo,
    pub disks: &'a [Disk],
    pub failed: &'a DiskSet,
    pub config: &'a EngineConfig,
    pub options: &'a RecoveryOptions,
}

#[derive(Debug)]
pub(crate) struct Plan {
    pub rounds: Vec<Vec<StripeTask>>,
    /// Memory reserved per concurrent stripe
    pub footprint: u64,
    /// Stripes allowed in flight
    pub concurrency: usize,
}

impl Plan {
    pub fn task_count(&self) -> usize {
        self.rounds.iter().map(Vec::len).sum()
    }
}

/// Stripes holding a rotten block on a live disk
pub(crate) fn hinted_stripes(file: &FileInfo, failed: &DiskSet) -> Vec<usize> {
    (0..file.stripe_count())
        .filter(|&s| !hinted_positions(file, failed, s).is_empty())
        .collect()
}

/// Live disks holding at least one rotten block
pub(crate) fn hinted_disks(file: &FileInfo, failed: &DiskSet) -> BTreeSet<DiskId> {
    (0..file.stripe_count())
        .flat_map(|s| {
            hinted_positions(file, failed, s)
                .into_iter()
                .map(move |p| file.stripes[s].distribution[p])
        })
        .collect()
}

fn hinted_positions(file: &FileInfo, failed: &DiskSet, stripe: usize) -> Vec<usize> {
    let s = &file.stripes[stripe];
    (0..s.width())
        .filter(|&p| {
            !failed.contains(s.distribution[p])
                && file.block_status(stripe, p) == BlockStatus::Failed
        })
        .collect()
}

/// Per stripe, the live disks whose block is flagged rotten
fn rotten_disks(file: &FileInfo, failed: &DiskSet) -> Vec<Vec<DiskId>> {
    (0..file.stripe_count())
        .map(|s| {
            hinted_positions(file, failed, s)
                .into_iter()
                .map(|p| file.stripes[s].distribution[p])
                .collect()
        })
        .collect()
}

/// Reject the first of `stripes` left with fewer than `k` clean survivors
fn ensure_readable(file: &FileInfo, failed: &DiskSet, stripes: &[usize], k: usize) -> Result<()> {
    for &s in stripes {
        let stripe = &file.stripes[s];
        let available = (0..stripe.width())
            .filter(|&p| {
                !failed.contains(stripe.distribution[p])
                    && file.block_status(s, p) == BlockStatus::Ok
            })
            .count();
        if available < k {
            return Err(Error::NotEnoughSurvivors {
                stripe: s,
                available,
                required: k,
            });
        }
    }
    Ok(())
}

pub(crate) fn plan<R: Rng + ?Sized>(input: &PlanInput<'_>, rng: &mut R) -> Result<Plan> {
    let config = input.config;
    let file = input.file;
    let memory = config.memory_bytes;
    let k = config.data_shards;

    match input.options.mode {
        RecoveryMode::Full => {
            let stripes: Vec<usize> = (0..file.stripe_count()).collect();
            ensure_readable(file, input.failed, &stripes, k)?;
            let footprint = config.full_stripe_footprint();
            let concurrency = order::slot_count(memory, footprint)?;
            Ok(Plan {
                rounds: batches(&stripes, concurrency, |s| StripeTask::Full { stripe: s }),
                footprint,
                concurrency,
            })
        }

        RecoveryMode::ConflictScheduled(kind) => {
            let stripes: Vec<usize> = file
                .damaged_stripes(input.failed)
                .into_iter()
                .chain(hinted_stripes(file, input.failed))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            ensure_readable(file, input.failed, &stripes, k)?;
            let footprint = config.full_stripe_footprint();
            let concurrency = order::slot_count(memory, footprint)?;

            let masks =
                conflict::read_masks(&file.stripes, &stripes, input.failed, input.disks.len());
            let items: Vec<usize> = (0..stripes.len()).collect();
            let (slots, count) = conflict::schedule(
                kind,
                &items,
                |a, b| masks[a].intersects(&masks[b]),
                concurrency,
            );
            debug!("{} scheduler packed {} stripes into {} slots", kind, stripes.len(), count);

            let rounds = slots
                .into_iter()
                .map(|slot| {
                    slot.into_iter()
                        .map(|p| StripeTask::Full { stripe: stripes[p] })
                        .collect()
                })
                .collect();
            Ok(Plan {
                rounds,
                footprint,
                concurrency,
            })
        }

        RecoveryMode::BlockSelected(selection) => {
            let scheme = scheme_for(input, selection, rng)?;
            let footprint = config.data_stripe_footprint();
            let concurrency = order::slot_count(memory, footprint)?;
            let rounds = batches(scheme.damaged(), concurrency, |s| StripeTask::Selected {
                stripe: s,
                disks: scheme.get(s).to_vec(),
            });
            Ok(Plan {
                rounds,
                footprint,
                concurrency,
            })
        }

        RecoveryMode::Ordered(kind) => {
            let scheme = scheme_for(input, BlockSelection::FirstK, rng)?;
            let footprint = config.data_stripe_footprint();
            let concurrency = order::slot_count(memory, footprint)?;
            let slow_latency = input.options.slow_latency;
            let bs = config.block_size;

            let times: Vec<f64> = scheme
                .damaged()
                .iter()
                .map(|&s| stripe_repair_time(scheme.get(s), input.disks, bs, slow_latency))
                .collect();
            let (stripe_order, makespan) =
                order::order(kind, &times, concurrency, config.random_trials, rng)?;
            info!(
                "{} ordering: {} stripes over {} slots, makespan {:.3}",
                kind,
                times.len(),
                stripe_order.len(),
                makespan
            );

            let wave = wave_width(input.options.intra_stripe, config.data_shards);
            let damaged = scheme.damaged();
            let rounds = stripe_order
                .rounds()
                .into_iter()
                .map(|round| {
                    round
                        .into_iter()
                        .map(|p| waves_task(input, &scheme, damaged[p], wave))
                        .collect()
                })
                .collect();
            Ok(Plan {
                rounds,
                footprint,
                concurrency,
            })
        }

        RecoveryMode::Partial => {
            let scheme = scheme_for(input, BlockSelection::FirstK, rng)?;
            let wave = match input.options.intra_stripe {
                Some(is) => wave_width(Some(is), k),
                None => {
                    let matrix = parallelism::read_time_matrix(
                        &scheme,
                        input.disks,
                        config.block_size,
                        input.options.slow_latency,
                    );
                    parallelism::optimize(&matrix, k, memory, config.block_size)
                }
            };
            let footprint = wave as u64 * config.block_size;
            let concurrency = order::slot_count(memory, footprint)?;
            info!(
                "Partial recovery with {} blocks per wave, {} stripes in flight",
                wave, concurrency
            );

            let rounds = batches(scheme.damaged(), concurrency, |s| {
                waves_task(input, &scheme, s, wave)
            });
            Ok(Plan {
                rounds,
                footprint,
                concurrency,
            })
        }
    }
}

fn batches<F>(stripes: &[usize], size: usize, task: F) -> Vec<Vec<StripeTask>>
where
    F: Fn(usize) -> StripeTask,
{
    stripes
        .chunks(size.max(1))
        .map(|chunk| chunk.iter().map(|&s| task(s)).collect())
        .collect()
}

fn wave_width(requested: Option<usize>, k: usize) -> usize {
    requested.unwrap_or(k).clamp(1, k.max(1))
}

/// Scheme over the damaged stripes that never reads a rotten block
fn scheme_for<R: Rng + ?Sized>(
    input: &PlanInput<'_>,
    selection: BlockSelection,
    rng: &mut R,
) -> Result<Scheme> {
    let k = input.config.data_shards;
    ensure_readable(input.file, input.failed, &input.file.damaged_stripes(input.failed), k)?;
    let scheme = select_blocks_avoiding(
        selection,
        &input.file.stripes,
        input.failed,
        &rotten_disks(input.file, input.failed),
        input.disks,
        k,
        rng,
    );
    let stats = scheme.load_stats(input.disks.len());
    if input.config.quiet {
        debug!(
            "{}: max load {}, total load {} over {} stripes",
            selection,
            stats.max_load,
            stats.sum_load,
            scheme.damaged().len()
        );
    } else {
        info!(
            "{}: max load {}, total load {} over {} stripes",
            selection,
            stats.max_load,
            stats.sum_load,
            scheme.damaged().len()
        );
    }
    Ok(scheme)
}

/// Wave task reading the selected disks slowest first
fn waves_task(input: &PlanInput<'_>, scheme: &Scheme, stripe: usize, wave: usize) -> StripeTask {
    let bs = input.config.block_size;
    let slow_latency = input.options.slow_latency;
    let time = |d: DiskId| block_time(input.disks, d, bs, slow_latency);
    let mut disks = scheme.get(stripe).to_vec();
    disks.sort_by(|&a, &b| time(b).total_cmp(&time(a)));
    StripeTask::Waves { stripe, disks, wave }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictScheduler;
    use crate::model::Stripe;
    use crate::order::SlotOrdering;
    use assert_matches::assert_matches;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn file() -> FileInfo {
        let stripes = (0..6)
            .map(|i| {
                let dist: Vec<DiskId> = (0..6).map(|b| (i + b) % 8).collect();
                Stripe::new(i as u64, dist, vec![i as u64; 6]).unwrap()
            })
            .collect();
        FileInfo::new(0, "f", 6 * 4 * 16, stripes)
    }

    fn config(memory: u64) -> EngineConfig {
        EngineConfig {
            block_size: 16,
            memory_bytes: memory,
            ..EngineConfig::new(4, 2, 8)
        }
    }

    fn run(mode: RecoveryMode, memory: u64, file: &FileInfo, failed: &DiskSet) -> Result<Plan> {
        let disks: Vec<Disk> = (0..10).map(|i| Disk::new(i, "/tmp")).collect();
        let config = config(memory);
        let options = RecoveryOptions {
            mode,
            ..RecoveryOptions::default()
        };
        let input = PlanInput {
            file,
            disks: &disks,
            failed,
            config: &config,
            options: &options,
        };
        plan(&input, &mut StdRng::seed_from_u64(0))
    }

    #[test]
    fn test_full_batches_every_stripe() {
        let failed = DiskSet::from_ids(10, [0]);
        // 6 blocks of 16 bytes per stripe, room for two stripes
        let p = run(RecoveryMode::Full, 2 * 96, &file(), &failed).unwrap();
        assert_eq!(p.concurrency, 2);
        assert_eq!(p.rounds.len(), 3);
        assert_eq!(p.task_count(), 6);
    }

    #[test]
    fn test_selected_covers_damaged_only() {
        let failed = DiskSet::from_ids(10, [7]);
        let f = file();
        let mode = RecoveryMode::BlockSelected(BlockSelection::BalanceK);
        let p = run(mode, 1 << 20, &f, &failed).unwrap();
        let stripes: Vec<usize> = p.rounds.iter().flatten().map(StripeTask::stripe).collect();
        assert_eq!(stripes, f.damaged_stripes(&failed));
        for task in p.rounds.iter().flatten() {
            assert_matches!(
                task,
                StripeTask::Selected { disks, .. } if disks.len() == 4 && !disks.contains(&7)
            );
        }
    }

    #[test]
    fn test_ordered_uses_waves() {
        let failed = DiskSet::from_ids(10, [3]);
        let f = file();
        // Room for two data stripes of 64 bytes
        let p = run(RecoveryMode::Ordered(SlotOrdering::Greedy), 128, &f, &failed).unwrap();
        assert!(p.rounds.iter().all(|r| r.len() <= 2));
        assert_eq!(p.task_count(), f.damaged_stripes(&failed).len());
        for task in p.rounds.iter().flatten() {
            assert_matches!(task, StripeTask::Waves { wave: 4, disks, .. } if disks.len() == 4);
        }
    }

    #[test]
    fn test_conflict_rounds_are_disjoint() {
        let failed = DiskSet::from_ids(10, [5]);
        let f = file();
        let mode = RecoveryMode::ConflictScheduled(ConflictScheduler::Coloring);
        let p = run(mode, 1 << 20, &f, &failed).unwrap();
        for round in &p.rounds {
            for (i, a) in round.iter().enumerate() {
                for b in &round[i + 1..] {
                    let ma = DiskSet::from_ids(10, f.stripes[a.stripe()].surviving(&failed));
                    let mb = DiskSet::from_ids(10, f.stripes[b.stripe()].surviving(&failed));
                    assert!(!ma.intersects(&mb));
                }
            }
        }
    }

    #[test]
    fn test_conflict_includes_hinted_stripes() {
        let failed = DiskSet::with_capacity(10);
        let mut f = file();
        f.mark_failed(2, 1);
        let mode = RecoveryMode::ConflictScheduled(ConflictScheduler::Sequence);
        let p = run(mode, 1 << 20, &f, &failed).unwrap();
        assert_eq!(p.task_count(), 1);
        assert_eq!(p.rounds[0][0].stripe(), 2);
        assert_eq!(hinted_disks(&f, &failed).into_iter().collect::<Vec<_>>(), vec![3]);
    }

    fn reading_modes() -> Vec<RecoveryMode> {
        let mut modes = vec![RecoveryMode::Partial];
        modes.extend(BlockSelection::ALL.into_iter().map(RecoveryMode::BlockSelected));
        modes.extend(SlotOrdering::ALL.into_iter().map(RecoveryMode::Ordered));
        modes
    }

    #[test]
    fn test_rotten_blocks_are_never_read() {
        let failed = DiskSet::from_ids(10, [0]);
        let mut f = file();
        f.mark_failed(0, 1);
        for mode in reading_modes() {
            let p = run(mode, 1 << 20, &f, &failed).unwrap();
            let task = p.rounds.iter().flatten().find(|t| t.stripe() == 0).unwrap();
            let mut disks = match task {
                StripeTask::Selected { disks, .. } | StripeTask::Waves { disks, .. } => {
                    disks.clone()
                }
                StripeTask::Full { .. } => panic!("{} planned a full read", mode),
            };
            disks.sort_unstable();
            assert_eq!(disks, vec![2, 3, 4, 5], "{}", mode);
        }
    }

    #[test]
    fn test_not_enough_clean_survivors() {
        let failed = DiskSet::from_ids(10, [0]);
        let mut f = file();
        f.mark_failed(0, 1);
        f.mark_failed(0, 2);
        let mut modes = reading_modes();
        modes.push(RecoveryMode::Full);
        modes.extend(ConflictScheduler::ALL.into_iter().map(RecoveryMode::ConflictScheduled));
        for mode in modes {
            assert_matches!(
                run(mode, 1 << 20, &f, &failed),
                Err(Error::NotEnoughSurvivors {
                    stripe: 0,
                    available: 3,
                    required: 4
                }),
                "{}",
                mode
            );
        }
    }

    #[test]
    fn test_rot_on_intact_stripe_does_not_block_selection() {
        let failed = DiskSet::from_ids(10, [0]);
        let mut f = file();
        for p in 0..3 {
            f.mark_failed(1, p);
        }
        let mode = RecoveryMode::BlockSelected(BlockSelection::FirstK);
        let p = run(mode, 1 << 20, &f, &failed).unwrap();
        assert_eq!(p.task_count(), f.damaged_stripes(&failed).len());
    }

    #[test]
    fn test_partial_footprint_follows_wave() {
        let failed = DiskSet::from_ids(10, [2]);
        let f = file();
        let disks: Vec<Disk> = (0..10).map(|i| Disk::new(i, "/tmp")).collect();
        let config = config(64);
        let partial = |is: usize| {
            let options = RecoveryOptions {
                mode: RecoveryMode::Partial,
                intra_stripe: Some(is),
                ..RecoveryOptions::default()
            };
            let input = PlanInput {
                file: &f,
                disks: &disks,
                failed: &failed,
                config: &config,
                options: &options,
            };
            plan(&input, &mut StdRng::seed_from_u64(0)).unwrap()
        };

        let p = partial(2);
        assert_eq!(p.footprint, 32);
        assert_eq!(p.concurrency, 2);
        // Clamped to K
        assert_eq!(partial(100).footprint, 64);
    }

    #[test]
    fn test_memory_too_small() {
        let failed = DiskSet::from_ids(10, [0]);
        assert_matches!(
            run(RecoveryMode::Full, 50, &file(), &failed),
            Err(Error::MemoryTooSmall {
                memory: 50,
                footprint: 96
            })
        );
    }
}
