//! Recovery Metrics
//!
//! Prometheus counters for repair progress plus a histogram of end-to-end
//! recovery durations. Each engine owns its registry so several engines can
//! coexist in one process.

use crate::error::Result;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};

/// Metric handles for a recovery engine
#[derive(Clone)]
pub struct RecoveryMetrics {
    registry: Registry,
    pub stripes_repaired: IntCounter,
    pub blocks_written: IntCounter,
    pub bytes_read: IntCounter,
    pub recovery_duration: Histogram,
}

impl RecoveryMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("ecrepair".into()), None)?;

        let stripes_repaired = IntCounter::new("stripes_repaired_total", "Stripes reconstructed")?;
        let blocks_written =
            IntCounter::new("blocks_written_total", "Recovered blocks written to disk")?;
        let bytes_read = IntCounter::new("bytes_read_total", "Bytes read from surviving disks")?;
        let recovery_duration = Histogram::with_opts(
            HistogramOpts::new("recovery_duration_seconds", "Wall time of a file recovery")
                .buckets(prometheus::exponential_buckets(0.001, 4.0, 10)?),
        )?;

        registry.register(Box::new(stripes_repaired.clone()))?;
        registry.register(Box::new(blocks_written.clone()))?;
        registry.register(Box::new(bytes_read.clone()))?;
        registry.register(Box::new(recovery_duration.clone()))?;

        Ok(Self {
            registry,
            stripes_repaired,
            blocks_written,
            bytes_read,
            recovery_duration,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of every metric
    pub fn render(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

impl std::fmt::Debug for RecoveryMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryMetrics")
            .field("stripes_repaired", &self.stripes_repaired.get())
            .field("blocks_written", &self.blocks_written.get())
            .field("bytes_read", &self.bytes_read.get())
            .finish()
    }
}
