//! # Core Domain Entities
//!
//! ## Clusters
//!
//! - **Identity**: `InstanceId`, `BusId`, `Rank`, priority derivation
//! - **Events**: `LocalEvent`, `EventMetadata`, `EventOptions`
//! - **Distribution**: `DistributedEvent` (local event plus routing metadata)

use std::cmp::Ordering;
use std::fmt;
use std::hash::Hasher;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;
use uuid::Uuid;

use crate::clock::VectorClock;

// =============================================================================
// CLUSTER A: IDENTITY
// =============================================================================

/// Opaque, globally unique identifier of one bus instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random instance id.
    pub fn random() -> Self {
        Self(format!("instance-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for InstanceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Scope of one logical bus. Instances on different bus ids share a
/// transport but ignore each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct BusId(pub String);

impl BusId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Transport channel name for a subsystem on this bus.
    pub fn channel(&self, subsystem: &str) -> String {
        format!("{}:{}", self.0, subsystem)
    }
}

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BusId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Upper bound (exclusive) of derived priorities.
pub const DERIVED_PRIORITY_RANGE: u64 = 1_000_000;

/// Stable 64-bit string hash shared by every instance.
///
/// SipHash-1-3 with fixed zero keys: independent processes hash the same
/// string to the same value, which `std`'s randomly keyed hasher does not.
pub fn stable_hash(value: &str) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(0, 0);
    hasher.write(value.as_bytes());
    hasher.finish()
}

/// Derive a priority from an instance id when none is configured.
pub fn derive_priority(instance_id: &InstanceId) -> u64 {
    stable_hash(instance_id.as_str()) % DERIVED_PRIORITY_RANGE
}

/// Total order over instances used by leader election.
///
/// Higher priority wins; equal priorities fall back to the lexicographically
/// greater instance id so that every instance agrees on the winner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rank {
    pub priority: u64,
    pub instance_id: InstanceId,
}

impl Rank {
    pub fn new(instance_id: InstanceId, priority: u64) -> Self {
        Self {
            priority,
            instance_id,
        }
    }

    /// Rank with a derived priority.
    pub fn derived(instance_id: InstanceId) -> Self {
        let priority = derive_priority(&instance_id);
        Self::new(instance_id, priority)
    }
}

impl Ord for Rank {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.instance_id.cmp(&other.instance_id))
    }
}

impl PartialOrd for Rank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// =============================================================================
// CLUSTER B: EVENTS
// =============================================================================

/// Optional routing hints attached to an event.
///
/// The partitioner derives partition keys from these in a fixed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EventMetadata {
    pub aggregate_id: Option<String>,
    pub user_id: Option<String>,
    pub correlation_id: Option<String>,
    pub module: Option<String>,
}

/// An event as seen by the local dispatch engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalEvent {
    pub id: String,
    pub pattern: String,
    pub payload: serde_json::Value,
    /// Wall-clock milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: EventMetadata,
}

impl LocalEvent {
    pub fn new(pattern: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            pattern: pattern.into(),
            payload,
            timestamp: now_ms(),
            source: None,
            metadata: EventMetadata::default(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Caller options for `emit`.
#[derive(Debug, Clone, Default)]
pub struct EventOptions {
    /// Never leave this instance.
    pub local_only: bool,
    /// Explicitly disable propagation for this call.
    pub disable_propagation: bool,
    /// Source module name.
    pub source: Option<String>,
    pub metadata: EventMetadata,
}

impl EventOptions {
    pub fn local_only() -> Self {
        Self {
            local_only: true,
            ..Self::default()
        }
    }
}

// =============================================================================
// CLUSTER C: DISTRIBUTION
// =============================================================================

/// A local event extended with cross-instance routing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedEvent {
    pub event: LocalEvent,
    /// Originating instance.
    pub instance_id: InstanceId,
    pub bus_id: BusId,
    /// Instances that have accepted this event, origin first. Append-only.
    pub propagation_path: Vec<InstanceId>,
    pub partition: Option<u32>,
    pub sequence_number: Option<u64>,
    /// Origin's vector clock when the event was stored.
    #[serde(default)]
    pub vector_clock: Option<VectorClock>,
    /// Set by a non-leader asking the leader to propagate a global event.
    #[serde(default)]
    pub relay: bool,
    /// Set on events re-sent during partition catch-up.
    #[serde(default)]
    pub replayed: bool,
}

impl DistributedEvent {
    pub fn new(event: LocalEvent, instance_id: InstanceId, bus_id: BusId) -> Self {
        Self {
            event,
            propagation_path: vec![instance_id.clone()],
            instance_id,
            bus_id,
            partition: None,
            sequence_number: None,
            vector_clock: None,
            relay: false,
            replayed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.event.id
    }

    pub fn pattern(&self) -> &str {
        &self.event.pattern
    }

    pub fn has_visited(&self, instance: &InstanceId) -> bool {
        self.propagation_path.iter().any(|id| id == instance)
    }

    /// Record acceptance by `instance`. No-op if already present.
    pub fn append_hop(&mut self, instance: &InstanceId) {
        if !self.has_visited(instance) {
            self.propagation_path.push(instance.clone());
        }
    }

    /// Number of hops recorded beyond the origin.
    pub fn hops(&self) -> usize {
        self.propagation_path.len().saturating_sub(1)
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
