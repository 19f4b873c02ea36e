//! Partition assignment algorithms.

pub mod assignment;

pub use assignment::{hash_partition, HashRing};
