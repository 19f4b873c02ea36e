//! # Stored Record
//!
//! One row of the distributed event store. Rows are keyed by a storage id
//! derived from `(origin, event id)`, so re-storing the same event updates
//! the existing row.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared_types::{DistributedEvent, InstanceId, VectorClock};

/// Hex SHA-256 of `"{origin}:{event_id}"`.
pub fn storage_id(origin: &InstanceId, event_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(origin.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(event_id.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub storage_id: String,
    pub event: DistributedEvent,
    /// Clock of the version held in this row.
    pub vector_clock: VectorClock,
    pub instance_origin: InstanceId,
    /// Number of instances known to hold this event.
    pub replication_level: u32,
    /// Wall-clock milliseconds of the last write to this row.
    pub last_modified: u64,
    /// Store-local write counter. Orders rows written in the same millisecond.
    pub revision: u64,
    #[serde(default)]
    pub tombstone: bool,
}

impl StoredRecord {
    pub fn event_id(&self) -> &str {
        self.event.id()
    }

    /// Counter of the origin's own clock component.
    pub fn origin_counter(&self) -> u64 {
        self.vector_clock.get(&self.instance_origin)
    }
}
