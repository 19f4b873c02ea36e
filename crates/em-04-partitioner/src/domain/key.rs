//! Partition key derivation.

use shared_types::LocalEvent;

/// Key used to pick an event's partition. First present rule wins:
/// aggregate id, user id, correlation id, module, source, first pattern
/// segment, full pattern.
pub fn partition_key(event: &LocalEvent) -> String {
    let metadata = &event.metadata;
    let explicit = [
        metadata.aggregate_id.as_deref(),
        metadata.user_id.as_deref(),
        metadata.correlation_id.as_deref(),
        metadata.module.as_deref(),
        event.source.as_deref(),
    ]
    .into_iter()
    .flatten()
    .find(|key| !key.is_empty());
    if let Some(key) = explicit {
        return key.to_string();
    }

    match event.pattern.split('.').next() {
        Some(segment) if !segment.is_empty() => segment.to_string(),
        _ => event.pattern.clone(),
    }
}
