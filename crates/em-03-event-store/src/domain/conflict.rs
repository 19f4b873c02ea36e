//! # Conflict Resolution
//!
//! Decides which of two versions of the same storage id survives.
//!
//! | Strategy | Winner |
//! |----------|--------|
//! | `LastWriteWins` | larger event timestamp, ties keep the existing row |
//! | `VectorClock` | causally later version; concurrent versions use a deterministic tie-break |
//! | `Custom` | injected [`ConflictResolver`], `LastWriteWins` when none is set |
//!
//! Every function here is pure, so all instances that see the same pair of
//! versions pick the same winner.

use std::cmp::Ordering;

use shared_types::{ClockOrdering, MeshError, MeshResult};

use super::record::StoredRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictStrategy {
    LastWriteWins,
    #[default]
    VectorClock,
    Custom,
}

/// Outcome of resolving a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    KeepExisting,
    TakeIncoming,
}

/// User-supplied resolver for `ConflictStrategy::Custom`.
///
/// An `Err` aborts the write with `ConflictResolutionFailure`.
pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, existing: &StoredRecord, incoming: &StoredRecord)
        -> Result<Resolution, String>;
}

impl<F> ConflictResolver for F
where
    F: Fn(&StoredRecord, &StoredRecord) -> Result<Resolution, String> + Send + Sync,
{
    fn resolve(
        &self,
        existing: &StoredRecord,
        incoming: &StoredRecord,
    ) -> Result<Resolution, String> {
        self(existing, incoming)
    }
}

pub fn last_write_wins(existing: &StoredRecord, incoming: &StoredRecord) -> Resolution {
    if incoming.event.event.timestamp > existing.event.event.timestamp {
        Resolution::TakeIncoming
    } else {
        Resolution::KeepExisting
    }
}

pub fn causal_order(existing: &StoredRecord, incoming: &StoredRecord) -> Resolution {
    match existing.vector_clock.compare(&incoming.vector_clock) {
        ClockOrdering::Before => Resolution::TakeIncoming,
        ClockOrdering::After | ClockOrdering::Equal => Resolution::KeepExisting,
        ClockOrdering::Concurrent => match tie_break(existing, incoming) {
            Ordering::Less => Resolution::TakeIncoming,
            Ordering::Equal | Ordering::Greater => Resolution::KeepExisting,
        },
    }
}

/// Total order over concurrent versions: event id, then timestamp, then the
/// canonical JSON of the payload.
fn tie_break(a: &StoredRecord, b: &StoredRecord) -> Ordering {
    a.event_id()
        .cmp(b.event_id())
        .then_with(|| a.event.event.timestamp.cmp(&b.event.event.timestamp))
        .then_with(|| canonical_payload(a).cmp(&canonical_payload(b)))
}

fn canonical_payload(record: &StoredRecord) -> String {
    // serde_json maps are ordered, so equal values print identically.
    serde_json::to_string(&record.event.event.payload).unwrap_or_default()
}

pub fn resolve(
    strategy: ConflictStrategy,
    custom: Option<&dyn ConflictResolver>,
    existing: &StoredRecord,
    incoming: &StoredRecord,
) -> MeshResult<Resolution> {
    match strategy {
        ConflictStrategy::LastWriteWins => Ok(last_write_wins(existing, incoming)),
        ConflictStrategy::VectorClock => Ok(causal_order(existing, incoming)),
        ConflictStrategy::Custom => match custom {
            Some(resolver) => resolver.resolve(existing, incoming).map_err(|reason| {
                MeshError::ConflictResolutionFailure {
                    storage_id: existing.storage_id.clone(),
                    reason,
                }
            }),
            None => Ok(last_write_wins(existing, incoming)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::storage_id;
    use serde_json::json;
    use shared_types::{BusId, DistributedEvent, InstanceId, LocalEvent, VectorClock};

    fn clock(pairs: &[(&str, u64)]) -> VectorClock {
        pairs
            .iter()
            .map(|(id, counter)| (InstanceId::new(*id), *counter))
            .collect()
    }

    fn record(event_id: &str, timestamp: u64, payload: serde_json::Value, vc: VectorClock) -> StoredRecord {
        let origin = InstanceId::new("a");
        let mut local = LocalEvent::new("order.updated", payload);
        local.id = event_id.to_string();
        local.timestamp = timestamp;
        StoredRecord {
            storage_id: storage_id(&origin, event_id),
            event: DistributedEvent::new(local, origin.clone(), BusId::new("orders")),
            vector_clock: vc,
            instance_origin: origin,
            replication_level: 1,
            last_modified: timestamp,
            revision: 1,
            tombstone: false,
        }
    }

    /// Resolve in the given order and return the surviving record.
    fn winner<'a>(
        strategy: ConflictStrategy,
        existing: &'a StoredRecord,
        incoming: &'a StoredRecord,
    ) -> &'a StoredRecord {
        match resolve(strategy, None, existing, incoming).unwrap() {
            Resolution::KeepExisting => existing,
            Resolution::TakeIncoming => incoming,
        }
    }

    #[test]
    fn test_causally_later_version_wins_in_either_order() {
        let a = record("e1", 500, json!({"v": 1}), clock(&[("a", 1)]));
        let b = record("e1", 100, json!({"v": 2}), clock(&[("a", 1), ("b", 1)]));

        assert_eq!(winner(ConflictStrategy::VectorClock, &a, &b), &b);
        assert_eq!(winner(ConflictStrategy::VectorClock, &b, &a), &b);
    }

    #[test]
    fn test_concurrent_versions_converge() {
        let a = record("e1", 100, json!({"v": 1}), clock(&[("a", 2)]));
        let b = record("e1", 100, json!({"v": 2}), clock(&[("b", 1)]));

        let first = winner(ConflictStrategy::VectorClock, &a, &b);
        let second = winner(ConflictStrategy::VectorClock, &b, &a);
        assert_eq!(first, second);
        assert_eq!(first.event.event.payload, json!({"v": 2}));
    }

    #[test]
    fn test_concurrent_tie_break_prefers_later_timestamp() {
        let early = record("e1", 100, json!({"v": 9}), clock(&[("a", 1)]));
        let late = record("e1", 200, json!({"v": 1}), clock(&[("b", 1)]));

        assert_eq!(winner(ConflictStrategy::VectorClock, &early, &late), &late);
        assert_eq!(winner(ConflictStrategy::VectorClock, &late, &early), &late);
    }

    #[test]
    fn test_last_write_wins_ties_keep_existing() {
        let existing = record("e1", 100, json!({"v": 1}), clock(&[]));
        let newer = record("e1", 200, json!({"v": 2}), clock(&[]));
        let same_time = record("e1", 100, json!({"v": 3}), clock(&[]));

        assert_eq!(last_write_wins(&existing, &newer), Resolution::TakeIncoming);
        assert_eq!(last_write_wins(&newer, &existing), Resolution::KeepExisting);
        assert_eq!(last_write_wins(&existing, &same_time), Resolution::KeepExisting);
    }

    #[test]
    fn test_custom_without_resolver_falls_back_to_last_write_wins() {
        let existing = record("e1", 100, json!({}), clock(&[]));
        let newer = record("e1", 200, json!({}), clock(&[]));
        assert_eq!(winner(ConflictStrategy::Custom, &existing, &newer), &newer);
    }

    #[test]
    fn test_failing_custom_resolver_surfaces_error() {
        let existing = record("e1", 100, json!({}), clock(&[]));
        let incoming = record("e1", 200, json!({}), clock(&[]));
        let resolver = |_: &StoredRecord, _: &StoredRecord| -> Result<Resolution, String> {
            Err("schema mismatch".into())
        };

        let result = resolve(
            ConflictStrategy::Custom,
            Some(&resolver as &dyn ConflictResolver),
            &existing,
            &incoming,
        );
        match result {
            Err(MeshError::ConflictResolutionFailure { storage_id, reason }) => {
                assert_eq!(storage_id, existing.storage_id);
                assert_eq!(reason, "schema mismatch");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
