//! Engine Configuration
//!
//! Shard geometry, memory budget and runtime knobs shared by the encoder,
//! the schedulers and the recovery harness. Persisted as JSON.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Largest stripe width supported by GF(2^8) Reed-Solomon
pub const MAX_TOTAL_SHARDS: usize = 256;

/// Default number of Monte-Carlo trials for the random stripe order
pub const DEFAULT_RANDOM_TRIALS: usize = 100_000;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the erasure-coded disk array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of data shards per stripe (k)
    pub data_shards: usize,

    /// Number of parity shards per stripe (m)
    pub parity_shards: usize,

    /// Block size in bytes
    pub block_size: u64,

    /// Number of active disks; ids at or above this are spares
    pub disk_num: usize,

    /// Memory budget for buffered stripes, in bytes
    pub memory_bytes: u64,

    /// Number of highest-latency disks flagged slow
    pub slow_num: usize,

    /// Number of disks carrying a META replica of the system state
    pub replicate_factor: usize,

    /// Remove pre-existing output directories instead of failing
    pub override_existing: bool,

    /// Demote per-scheme load statistics to debug level
    pub quiet: bool,

    /// Maximum concurrent block transfers across all stripe tasks
    pub max_concurrent_io: usize,

    /// Trials run by the random stripe-ordering scheduler
    pub random_trials: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_shards: 6,
            parity_shards: 2,
            block_size: 4096,
            disk_num: 8,
            memory_bytes: 64 * 1024 * 1024, // 64 MiB
            slow_num: 0,
            replicate_factor: 1,
            override_existing: false,
            quiet: false,
            max_concurrent_io: 64,
            random_trials: DEFAULT_RANDOM_TRIALS,
        }
    }
}

impl EngineConfig {
    /// Create a configuration for a k+m array over `disk_num` active disks
    pub fn new(data_shards: usize, parity_shards: usize, disk_num: usize) -> Self {
        Self {
            data_shards,
            parity_shards,
            disk_num,
            ..Default::default()
        }
    }

    /// Get the total number of shards per stripe
    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Bytes of file data carried by one stripe
    pub fn data_stripe_size(&self) -> u64 {
        self.block_size * self.data_shards as u64
    }

    /// Bytes buffered when a whole stripe (data and parity) is held in memory
    pub fn full_stripe_footprint(&self) -> u64 {
        self.block_size * self.total_shards() as u64
    }

    /// Bytes buffered when only K blocks of a stripe are held in memory
    pub fn data_stripe_footprint(&self) -> u64 {
        self.data_stripe_size()
    }

    /// Number of stripes needed to hold `file_size` bytes
    pub fn stripes_for(&self, file_size: u64) -> usize {
        if file_size == 0 {
            return 0;
        }
        file_size.div_ceil(self.data_stripe_size()) as usize
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.data_shards == 0 {
            return Err(Error::InvalidConfig(
                "data_shards must be greater than 0".to_string(),
            ));
        }
        if self.parity_shards == 0 {
            return Err(Error::InvalidConfig(
                "parity_shards must be greater than 0".to_string(),
            ));
        }
        if self.total_shards() > MAX_TOTAL_SHARDS {
            return Err(Error::InvalidConfig(format!(
                "data_shards + parity_shards must not exceed {}",
                MAX_TOTAL_SHARDS
            )));
        }
        if self.block_size == 0 {
            return Err(Error::InvalidConfig(
                "block_size must be greater than 0".to_string(),
            ));
        }
        if self.disk_num < self.total_shards() {
            return Err(Error::InvalidConfig(format!(
                "disk_num ({}) must be at least data_shards + parity_shards ({})",
                self.disk_num,
                self.total_shards()
            )));
        }
        if self.replicate_factor > self.disk_num {
            return Err(Error::InvalidConfig(format!(
                "replicate_factor ({}) exceeds disk_num ({})",
                self.replicate_factor, self.disk_num
            )));
        }
        if self.slow_num > self.disk_num {
            return Err(Error::InvalidConfig(format!(
                "slow_num ({}) exceeds disk_num ({})",
                self.slow_num, self.disk_num
            )));
        }
        if self.max_concurrent_io == 0 {
            return Err(Error::InvalidConfig(
                "max_concurrent_io must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Load a configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.total_shards(), 8);
        assert_eq!(config.full_stripe_footprint(), 8 * 4096);
        assert_eq!(config.data_stripe_footprint(), 6 * 4096);
    }

    #[test]
    fn test_stripes_for() {
        let config = EngineConfig::new(4, 2, 6);
        assert_eq!(config.stripes_for(0), 0);
        assert_eq!(config.stripes_for(1), 1);
        assert_eq!(config.stripes_for(4 * 4096), 1);
        assert_eq!(config.stripes_for(4 * 4096 + 1), 2);
    }

    #[test]
    fn test_validate_rejects_bad_geometry() {
        assert_matches!(
            EngineConfig::new(0, 2, 8).validate(),
            Err(Error::InvalidConfig(_))
        );
        assert_matches!(
            EngineConfig::new(4, 0, 8).validate(),
            Err(Error::InvalidConfig(_))
        );
        assert_matches!(
            EngineConfig::new(6, 2, 7).validate(),
            Err(Error::InvalidConfig(_))
        );

        let config = EngineConfig {
            block_size: 0,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::InvalidConfig(_)));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = EngineConfig {
            memory_bytes: 1 << 20,
            quiet: true,
            ..EngineConfig::new(4, 2, 10)
        };
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"data_shards": 4, "parity_shards": 2}"#).unwrap();
        assert_eq!(config.data_shards, 4);
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.random_trials, DEFAULT_RANDOM_TRIALS);
    }
}
