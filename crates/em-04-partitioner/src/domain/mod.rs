//! # Domain Module
//!
//! Configuration, key derivation, reorder buffers and metrics.

pub mod config;
pub mod key;
pub mod metrics;
pub mod ordering;

pub use config::{PartitionConfig, PartitionStrategy};
pub use key::partition_key;
pub use metrics::{partition_balance, PartitionMetrics, PartitionerMetrics};
pub use ordering::{Flushed, OfferError, SequenceBuffer, FIRST_SEQUENCE};
