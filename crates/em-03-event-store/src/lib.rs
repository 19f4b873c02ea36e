//! # EM-03 Distributed Event Store
//!
//! Per-instance event table with vector clocks, conflict resolution and
//! size-bounded compaction.
//!
//! **Subsystem ID:** 3
//! **Architecture:** Hexagonal (domain / ports / adapters / service)
//!
//! ## Invariants
//!
//! - A row is keyed by `sha256(origin ":" event_id)`; storing the same
//!   event twice updates one row.
//! - Every local write advances this instance's clock component by one;
//!   merging a remote clock takes the component-wise maximum.
//! - Compaction evicts the oldest rows by `last_modified` once the estimated
//!   size exceeds `max_storage_bytes`.
//!
//! ## Module Structure
//!
//! ```text
//! em-03-event-store/
//! ├── domain/     # StoredRecord, conflict strategies, StoreConfig
//! ├── ports/      # DurableStore (outbound)
//! ├── adapters/   # InMemoryDurableStore, RocksDbStore (feature "rocksdb")
//! └── service.rs  # DistributedEventStore
//! ```

#![warn(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::InMemoryDurableStore;
#[cfg(feature = "rocksdb")]
pub use adapters::{RocksDbConfig, RocksDbStore};
pub use domain::{
    causal_order, last_write_wins, resolve, storage_id, ConflictResolver, ConflictStrategy,
    Resolution, StoreConfig, StoredRecord,
};
pub use ports::{BatchOperation, DurableStore, StoreError};
pub use service::{DistributedEventStore, StoreStats};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
