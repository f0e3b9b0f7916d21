//! Error types for the recovery engine

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while encoding, scheduling or recovering files
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid engine configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed disk path or bandwidth file
    #[error("Invalid disk file {path}: {reason}")]
    InvalidDiskFile { path: PathBuf, reason: String },

    /// Disk id outside of the registry
    #[error("Disk {disk} is out of range (registry holds {count} disks)")]
    DiskOutOfRange { disk: usize, count: usize },

    /// Requested file is absent from the catalog
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// A file with the same name is already cataloged
    #[error("File already exists: {0}")]
    FileExists(String),

    // =========================================================================
    // Recovery Errors
    // =========================================================================
    /// Fewer than K disks survived, the data is unrecoverable
    #[error("Too few disks alive: {alive} alive, {required} required")]
    TooFewDisksAlive { alive: usize, required: usize },

    /// More failed disks than spare disks
    #[error("Not enough backup disks: {failed} failed, {spares} spares")]
    NotEnoughBackups { failed: usize, spares: usize },

    /// Memory budget cannot hold a single stripe
    #[error("Memory too small: {memory} bytes cannot hold a {footprint}-byte stripe")]
    MemoryTooSmall { memory: u64, footprint: u64 },

    /// Unknown scheme identifier
    #[error("Unknown scheme: {0}")]
    UnknownScheme(String),

    /// Destination blob directory already exists and override is off
    #[error("Data directory already exists: {}", .0.display())]
    DataDirExists(PathBuf),

    // =========================================================================
    // Erasure Coding Errors
    // =========================================================================
    /// Erasure codec rejected the operation
    #[error("EC codec error: {0}")]
    Codec(String),

    /// Insufficient shards for reconstruction
    #[error("Insufficient shards for reconstruction: have {available}, need {required}")]
    InsufficientShards { available: usize, required: usize },

    /// A stripe to repair has fewer than K readable blocks
    #[error("Stripe {stripe} has {available} readable blocks, need {required}")]
    NotEnoughSurvivors {
        stripe: usize,
        available: usize,
        required: usize,
    },

    /// Stripe could not be decoded
    #[error("Decode failed for stripe {stripe}: {reason}")]
    Decode { stripe: usize, reason: String },

    // =========================================================================
    // Runtime Errors
    // =========================================================================
    /// A spawned task panicked or was cancelled
    #[error("Task failed: {0}")]
    Task(String),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
