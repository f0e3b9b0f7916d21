//! ecrepair - Recovery Engine for Erasure-Coded Disk Arrays
//!
//! Objects are split into Reed-Solomon stripes of K data and M parity blocks
//! spread over independently-mounted disks. When disks fail (or blocks rot),
//! the engine rebuilds the lost blocks onto spare disks while keeping every
//! surviving disk as evenly loaded, and every memory slot as busy, as it can.
//!
//! # Architecture
//!
//! ```text
//! Scheme (which blocks)
//!   → Order / Conflict (which stripes together)
//!   → Recovery (read, decode, write)
//! ```
//!
//! # Recovery Modes
//!
//! - Full: read every surviving block, FirstK decode
//! - Block-selected: FirstK, FastestK, RandomK or BalanceK
//! - Ordered: Continuous, Greedy (LPT) or Random lanes
//! - Conflict-scheduled: SS-HDR Sequence or Coloring slots
//! - Partial: intra-stripe waves sized by the parallelism optimizer
//!
//! # Modules
//!
//! - [`catalog`] - File catalog and the striping encoder
//! - [`cluster`] - Disk registry plus catalog, persisted as the system state
//! - [`codec`] - Erasure codec seam and its Reed-Solomon implementation
//! - [`config`] - Engine configuration
//! - [`conflict`] - SS-HDR conflict schedulers
//! - [`error`] - Error types
//! - [`metrics`] - Prometheus recovery counters
//! - [`model`] - Disks, stripes and layouts
//! - [`order`] - Stripe-ordering schedulers and the repair-time model
//! - [`parallelism`] - Intra-stripe parallelism optimizer
//! - [`recovery`] - Concurrent recovery engine
//! - [`scheme`] - Block-selection schemes
//! - [`sim`] - Failure injection and load-balance simulation

pub mod catalog;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod conflict;
pub mod error;
pub mod metrics;
pub mod model;
pub mod order;
pub mod parallelism;
pub mod recovery;
pub mod scheme;
pub mod sim;

mod proptest;

// Re-export commonly used types
pub use catalog::{Catalog, FileEncoder};
pub use cluster::{ClusterState, SystemState};
pub use codec::{RecoveryCodec, ReedSolomonCodec};
pub use config::EngineConfig;
pub use conflict::ConflictScheduler;
pub use error::{Error, Result};
pub use metrics::RecoveryMetrics;
pub use model::{Disk, DiskId, DiskSet, FileInfo, ReplaceMap, Stripe};
pub use order::{SlotOrdering, StripeOrder};
pub use recovery::{RecoveryEngine, RecoveryMode, RecoveryOptions, RecoveryPhase};
pub use scheme::{BlockSelection, Scheme};
