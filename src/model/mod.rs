//! Stripe/Disk Model
//!
//! In-memory representation of the disk array and of the stripes laid out on
//! it:
//!
//! - [`Disk`] - per-disk availability, bandwidth and latency
//! - [`Stripe`] / [`FileInfo`] - block-to-disk distribution and offsets
//! - [`DiskSet`] - word-packed set of disk ids with an `intersects` test
//! - [`ReplaceMap`] - failed disk to backup disk remap
//! - [`layout`] - stripe placement and offset assignment
//! - [`registry`] - disk path and bandwidth files

pub mod bitset;
pub mod disk;
pub mod layout;
pub mod registry;
pub mod replace;
pub mod stripe;

pub use bitset::DiskSet;
pub use disk::{Disk, DiskId, BLOB_FILE, META_FILE};
pub use replace::ReplaceMap;
pub use stripe::{BlockStatus, FileInfo, Stripe};
