//! # Outbound Ports (Driven Ports)
//!
//! Durable key-value storage required by the distributed event store.
//!
//! Adapters: `InMemoryDurableStore` (always available) and `RocksDbStore`
//! (behind the `rocksdb` feature).

use shared_types::MeshError;
use thiserror::Error;

/// Errors reported by a durable store adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Durable store I/O error: {0}")]
    Io(String),

    #[error("Durable store corruption: {0}")]
    Corruption(String),

    #[error("Durable store unavailable")]
    Unavailable,
}

impl From<StoreError> for MeshError {
    fn from(err: StoreError) -> Self {
        MeshError::StorageFailure(err.to_string())
    }
}

/// Abstract interface for key-value database operations.
pub trait DurableStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError>;

    /// Either all operations are applied or none.
    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), StoreError>;

    /// Every pair whose key starts with `prefix`.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
}

/// Batch operation for atomic writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOperation {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Delete { key: key.into() }
    }
}
