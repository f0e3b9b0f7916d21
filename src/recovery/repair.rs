//! Per-stripe repair
//!
//! A [`StripeTask`] names one stripe and how to repair it. [`RepairContext`]
//! holds the open handles of a recovery call and runs tasks: reads fan out as
//! one bounded task per block, the codec rebuilds the lost blocks, and the
//! results go to the mapped backup disk (or back in place for rotten blocks).

use super::io;
use super::task_group::TaskGroup;
use super::RecoveryPhase;
use crate::codec::{positions_of, RecoveryCodec};
use crate::error::{Error, Result};
use crate::metrics::RecoveryMetrics;
use crate::model::{BlockStatus, DiskId, DiskSet, FileInfo};
use std::collections::HashMap;
use std::fs::File;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{trace, warn};

/// How a single stripe is repaired
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StripeTask {
    /// Read every readable block, verify, rebuild the rest
    Full { stripe: usize },
    /// Read only `disks` and rebuild from them
    Selected { stripe: usize, disks: Vec<DiskId> },
    /// Read exactly K `disks` in waves of `wave`, accumulating partial
    /// reconstructions
    Waves {
        stripe: usize,
        disks: Vec<DiskId>,
        wave: usize,
    },
}

impl StripeTask {
    pub fn stripe(&self) -> usize {
        match self {
            StripeTask::Full { stripe } => *stripe,
            StripeTask::Selected { stripe, .. } => *stripe,
            StripeTask::Waves { stripe, .. } => *stripe,
        }
    }
}

/// Blocks rewritten in place by a task, as (stripe, position)
pub(crate) type Rewritten = Vec<(usize, usize)>;

pub(crate) struct RepairContext {
    pub codec: Arc<dyn RecoveryCodec>,
    pub file: Arc<FileInfo>,
    /// Read handles by disk id, `None` for unreadable disks
    pub inputs: Vec<Option<Arc<File>>>,
    /// Backup blob for each failed disk
    pub outputs: HashMap<DiskId, Arc<File>>,
    /// Writable handles for disks carrying rotten blocks
    pub rewrites: HashMap<DiskId, Arc<File>>,
    pub failed: DiskSet,
    pub block_size: u64,
    pub degrade: bool,
    pub io: Arc<Semaphore>,
    pub metrics: Option<Arc<RecoveryMetrics>>,
}

impl RepairContext {
    fn readable(&self, stripe: usize, pos: usize) -> bool {
        let disk = self.file.stripes[stripe].distribution[pos];
        !self.failed.contains(disk)
            && self.inputs.get(disk).is_some_and(Option::is_some)
            && self.file.block_status(stripe, pos) == BlockStatus::Ok
    }

    fn decode_error(stripe: usize, e: Error) -> Error {
        Error::Decode {
            stripe,
            reason: e.to_string(),
        }
    }

    /// Read the blocks at `positions` of `stripe` concurrently
    async fn read_positions(
        &self,
        stripe: usize,
        positions: &[usize],
    ) -> Result<Vec<(usize, Vec<u8>)>> {
        let s = &self.file.stripes[stripe];
        let len = self.block_size as usize;
        let mut group = TaskGroup::new(Arc::clone(&self.io));
        for &pos in positions {
            let disk = s.distribution[pos];
            let Some(file) = self.inputs.get(disk).cloned().flatten() else {
                return Err(Error::Decode {
                    stripe,
                    reason: format!("disk {} has no open input", disk),
                });
            };
            let offset = s.block_to_offset[pos] * self.block_size;
            group.spawn(async move {
                let bytes = io::read_block(file, offset, len).await?;
                Ok((pos, bytes))
            });
        }
        let blocks = group.wait().await?;
        if let Some(m) = &self.metrics {
            m.bytes_read.inc_by((blocks.len() * len) as u64);
        }
        trace!(stripe, blocks = blocks.len(), phase = %RecoveryPhase::Read, "read blocks");
        Ok(blocks)
    }

    /// Write rebuilt blocks. Blocks of failed disks go to their backup, blocks
    /// of live disks are rewritten in place. Returns the in-place positions.
    async fn write_positions(
        &self,
        stripe: usize,
        blocks: Vec<(usize, Vec<u8>)>,
    ) -> Result<Rewritten> {
        let s = &self.file.stripes[stripe];
        let mut group = TaskGroup::new(Arc::clone(&self.io));
        let mut rewritten = Vec::new();
        for (pos, bytes) in blocks {
            let disk = s.distribution[pos];
            let target = if self.failed.contains(disk) {
                self.outputs.get(&disk)
            } else {
                let target = self.rewrites.get(&disk);
                if target.is_some() {
                    rewritten.push((stripe, pos));
                }
                target
            };
            let Some(file) = target.cloned() else {
                continue;
            };
            let offset = s.block_to_offset[pos] * self.block_size;
            group.spawn(io::write_block(file, offset, bytes));
        }
        let written = group.wait().await?.len();
        if let Some(m) = &self.metrics {
            m.blocks_written.inc_by(written as u64);
        }
        trace!(stripe, written, phase = %RecoveryPhase::Write, "wrote blocks");
        Ok(rewritten)
    }

    pub(crate) async fn run(self: Arc<Self>, task: StripeTask) -> Result<Rewritten> {
        let stripe = task.stripe();
        let rewritten = match task {
            StripeTask::Full { stripe } => self.repair_full(stripe).await?,
            StripeTask::Selected { stripe, disks } => self.repair_selected(stripe, &disks).await?,
            StripeTask::Waves { stripe, disks, wave } => {
                self.repair_waves(stripe, &disks, wave).await?
            }
        };
        if let Some(m) = &self.metrics {
            m.stripes_repaired.inc();
        }
        trace!(stripe, "stripe done");
        Ok(rewritten)
    }

    async fn repair_full(&self, stripe: usize) -> Result<Rewritten> {
        let width = self.file.stripes[stripe].width();
        let (present, missing): (Vec<usize>, Vec<usize>) =
            (0..width).partition(|&p| self.readable(stripe, p));

        let mut shards: Vec<Option<Vec<u8>>> = vec![None; width];
        for (pos, bytes) in self.read_positions(stripe, &present).await? {
            shards[pos] = Some(bytes);
        }

        if missing.is_empty() {
            let full: Vec<Vec<u8>> = shards.into_iter().flatten().collect();
            if !self.codec.verify(&full)? {
                warn!(stripe, "parity mismatch on a stripe without known failures");
            }
            trace!(stripe, phase = %RecoveryPhase::Verify, "stripe intact");
            return Ok(Vec::new());
        }

        let distribution = &self.file.stripes[stripe].distribution;
        self.codec
            .reconstruct_with_list(&mut shards, &self.failed, distribution, self.degrade)
            .map_err(|e| Self::decode_error(stripe, e))?;
        trace!(stripe, missing = missing.len(), phase = %RecoveryPhase::Reconstruct, "rebuilt");

        let rebuilt: Vec<(usize, Vec<u8>)> = missing
            .into_iter()
            .filter_map(|p| shards[p].take().map(|b| (p, b)))
            .collect();
        self.write_positions(stripe, rebuilt).await
    }

    async fn repair_selected(&self, stripe: usize, disks: &[DiskId]) -> Result<Rewritten> {
        let distribution = &self.file.stripes[stripe].distribution;
        let positions = positions_of(distribution, disks);

        let mut shards: Vec<Option<Vec<u8>>> = vec![None; distribution.len()];
        for (pos, bytes) in self.read_positions(stripe, &positions).await? {
            shards[pos] = Some(bytes);
        }

        self.codec
            .reconstruct_with_k_blocks(&mut shards, &self.failed, disks, distribution, self.degrade)
            .map_err(|e| Self::decode_error(stripe, e))?;
        trace!(stripe, phase = %RecoveryPhase::Reconstruct, "rebuilt from selection");

        let rebuilt: Vec<(usize, Vec<u8>)> = self.file.stripes[stripe]
            .failed_indices(&self.failed)
            .into_iter()
            .filter_map(|p| shards[p].take().map(|b| (p, b)))
            .collect();
        self.write_positions(stripe, rebuilt).await
    }

    async fn repair_waves(
        &self,
        stripe: usize,
        disks: &[DiskId],
        wave: usize,
    ) -> Result<Rewritten> {
        let s = &self.file.stripes[stripe];
        let k = self.codec.data_shards();
        let invalid: Vec<usize> = s
            .failed_indices(&self.failed)
            .into_iter()
            .filter(|&p| !self.degrade || p < k)
            .collect();
        if invalid.is_empty() {
            return Ok(Vec::new());
        }

        // Wave order follows `disks`; the plan lists slow reads first
        let ordered: Vec<usize> = disks.iter().filter_map(|&d| s.position_of(d)).collect();
        let matrix = self
            .codec
            .decode_matrix(&invalid, &ordered)
            .map_err(|e| Self::decode_error(stripe, e))?;

        let mut outputs: Vec<Vec<u8>> = vec![Vec::new(); invalid.len()];
        for chunk in ordered.chunks(wave.max(1)) {
            let blocks = self.read_positions(stripe, chunk).await?;
            let inputs: Vec<(usize, &[u8])> =
                blocks.iter().map(|(p, b)| (*p, b.as_slice())).collect();
            self.codec
                .recover_with_some_shards(&matrix, &inputs, &mut outputs)
                .map_err(|e| Self::decode_error(stripe, e))?;
        }
        trace!(
            stripe,
            waves = ordered.len().div_ceil(wave.max(1)),
            phase = %RecoveryPhase::Reconstruct,
            "accumulated"
        );

        self.write_positions(stripe, invalid.into_iter().zip(outputs).collect())
            .await
    }
}

/// Run one round of tasks concurrently and collect the in-place rewrites
pub(crate) async fn run_round(
    ctx: &Arc<RepairContext>,
    tasks: Vec<StripeTask>,
) -> Result<Rewritten> {
    let mut group = TaskGroup::with_limit(tasks.len());
    for task in tasks {
        group.spawn(Arc::clone(ctx).run(task));
    }
    Ok(group.wait().await?.into_iter().flatten().collect())
}
