//! Partitioner configuration.

use std::time::Duration;

use shared_types::{MeshError, MeshResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionStrategy {
    /// `hash(key) % partition_count`
    Hash,
    /// Rotate over partitions. Gives no ordering guarantee.
    RoundRobin,
    /// Virtual-node ring.
    #[default]
    ConsistentHash,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionConfig {
    pub partition_count: u32,
    pub strategy: PartitionStrategy,
    pub virtual_nodes: u32,
    /// Deliver each origin's events to partition handlers in sequence order.
    pub ordering_guarantees: bool,
    /// How long a sequence gap may stall a partition before it is skipped.
    pub max_wait_time: Duration,
    /// Maximum out-of-order events buffered per partition.
    pub max_queue_size: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            partition_count: 16,
            strategy: PartitionStrategy::ConsistentHash,
            virtual_nodes: 150,
            ordering_guarantees: true,
            max_wait_time: Duration::from_secs(5),
            max_queue_size: 1000,
        }
    }
}

impl PartitionConfig {
    pub fn validate(&self) -> MeshResult<()> {
        if self.partition_count == 0 {
            return Err(MeshError::InvalidConfig("partition_count must be at least 1".into()));
        }
        if self.strategy == PartitionStrategy::ConsistentHash && self.virtual_nodes == 0 {
            return Err(MeshError::InvalidConfig(
                "consistent hashing needs at least one virtual node".into(),
            ));
        }
        if self.strategy == PartitionStrategy::RoundRobin && self.ordering_guarantees {
            return Err(MeshError::InvalidConfig(
                "round-robin assignment cannot honor ordering guarantees".into(),
            ));
        }
        if self.max_queue_size == 0 {
            return Err(MeshError::InvalidConfig("max_queue_size must be at least 1".into()));
        }
        Ok(())
    }
}
