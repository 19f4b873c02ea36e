//! Registry of instances heard on the bus.

use std::collections::HashMap;
use std::time::Duration;

use shared_types::InstanceId;
use tokio::time::Instant;

/// What the coordinator knows about one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub first_seen: Instant,
    pub last_seen: Instant,
    pub messages_received: u64,
}

/// Peers keyed by instance id.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: HashMap<InstanceId, InstanceInfo>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record traffic from `instance`. Returns `true` if it was unknown.
    pub fn touch(&mut self, instance: &InstanceId, now: Instant) -> bool {
        match self.instances.get_mut(instance) {
            Some(info) => {
                info.last_seen = now;
                info.messages_received += 1;
                false
            }
            None => {
                self.instances.insert(
                    instance.clone(),
                    InstanceInfo {
                        first_seen: now,
                        last_seen: now,
                        messages_received: 1,
                    },
                );
                true
            }
        }
    }

    pub fn remove(&mut self, instance: &InstanceId) -> bool {
        self.instances.remove(instance).is_some()
    }

    /// Remove and return every instance unseen for longer than `timeout`.
    pub fn evict_stale(&mut self, now: Instant, timeout: Duration) -> Vec<InstanceId> {
        let stale: Vec<InstanceId> = self
            .instances
            .iter()
            .filter(|(_, info)| now.saturating_duration_since(info.last_seen) > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.instances.remove(id);
        }
        stale
    }

    pub fn get(&self, instance: &InstanceId) -> Option<&InstanceInfo> {
        self.instances.get(instance)
    }

    /// Known instance ids, sorted.
    pub fn instance_ids(&self) -> Vec<InstanceId> {
        let mut ids: Vec<InstanceId> = self.instances.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
