//! # EM-04 Event Partitioner
//!
//! Splits the event stream into partitions and guarantees per-partition
//! ordering of each origin's events.
//!
//! **Subsystem ID:** 4
//!
//! ## Partition Key
//!
//! First present rule wins: aggregate id, user id, correlation id, module,
//! source, first dot segment of the pattern, full pattern.
//!
//! ## Strategies
//!
//! | Strategy | Assignment | Ordering |
//! |----------|------------|----------|
//! | `Hash` | `hash(key) % count` | yes |
//! | `RoundRobin` | rotating | rejected together with ordering |
//! | `ConsistentHash` | virtual-node ring (default) | yes |
//!
//! ## Module Structure
//!
//! ```text
//! em-04-partitioner/
//! ├── algorithms/  # hash_partition, HashRing
//! ├── domain/      # PartitionConfig, key derivation, SequenceBuffer, metrics
//! └── service.rs   # EventPartitioner
//! ```

#![warn(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod algorithms;
pub mod domain;
pub mod service;

pub use algorithms::{hash_partition, HashRing};
pub use domain::{
    partition_balance, partition_key, PartitionConfig, PartitionMetrics, PartitionStrategy,
    PartitionerMetrics, SequenceBuffer,
};
pub use service::{EventPartitioner, PartitionHandler};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
