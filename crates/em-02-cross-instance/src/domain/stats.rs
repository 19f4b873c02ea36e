//! Coordinator statistics.

use serde::Serialize;

/// Exponential moving average. The first sample initializes the value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    pub fn record(&mut self, sample: f64) {
        self.value = Some(match self.value {
            Some(current) => self.alpha * sample + (1.0 - self.alpha) * current,
            None => sample,
        });
    }

    pub fn value(&self) -> f64 {
        self.value.unwrap_or(0.0)
    }
}

/// Snapshot of coordinator counters and averages.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoordinatorStats {
    pub events_propagated: u64,
    pub events_received: u64,
    /// Envelopes that failed to send, decode or deserialize.
    pub events_dropped: u64,
    pub duplicates_suppressed: u64,
    pub acks_received: u64,
    /// Compressed size over original size, averaged over compressed payloads.
    pub avg_compression_ratio: f64,
    /// Envelope timestamp to receipt, milliseconds.
    pub avg_latency_ms: f64,
    pub known_instances: usize,
}
