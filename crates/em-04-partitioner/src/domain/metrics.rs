//! Partition metrics.

use serde::Serialize;

/// Smoothing factor of the per-partition latency average.
pub const LATENCY_ALPHA: f64 = 0.2;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PartitionMetrics {
    pub partition: u32,
    pub processed: u64,
    /// Events waiting in reorder buffers.
    pub queued: usize,
    pub avg_latency_ms: f64,
    /// Times a gap was force-skipped.
    pub sequence_gaps: u64,
    /// Events dropped because their sequence number was already buffered.
    pub sequence_collisions: u64,
}

impl PartitionMetrics {
    pub fn new(partition: u32) -> Self {
        Self {
            partition,
            ..Self::default()
        }
    }

    pub fn record_processed(&mut self, latency_ms: f64) {
        self.avg_latency_ms = if self.processed == 0 {
            latency_ms
        } else {
            LATENCY_ALPHA * latency_ms + (1.0 - LATENCY_ALPHA) * self.avg_latency_ms
        };
        self.processed += 1;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PartitionerMetrics {
    pub partitions: Vec<PartitionMetrics>,
    pub total_processed: u64,
    pub total_sequence_gaps: u64,
    /// `1 - stddev / mean` of processed counts, at least 0.
    pub balance: f64,
}

/// Balance of the processed counts. An idle partitioner is balanced.
pub fn partition_balance(processed: &[u64]) -> f64 {
    if processed.is_empty() {
        return 1.0;
    }
    let n = processed.len() as f64;
    let mean = processed.iter().sum::<u64>() as f64 / n;
    if mean == 0.0 {
        return 1.0;
    }
    let variance = processed
        .iter()
        .map(|&count| {
            let diff = count as f64 - mean;
            diff * diff
        })
        .sum::<f64>()
        / n;
    (1.0 - variance.sqrt() / mean).max(0.0)
}
