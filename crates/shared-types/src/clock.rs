//! # Vector Clock
//!
//! Causal ordering between events produced by different instances.
//!
//! The clock is an immutable value: `incremented` and `merged` return a new
//! clock, and owners replace their snapshot. Neither operation ever
//! decreases a component.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entities::InstanceId;

/// Causal relation of one clock to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
    /// `self` happens-before `other`.
    Before,
    /// `other` happens-before `self`.
    After,
    Equal,
    Concurrent,
}

/// Map from instance id to logical counter. Missing entries read as zero.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VectorClock {
    entries: BTreeMap<InstanceId, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, instance: &InstanceId) -> u64 {
        self.entries.get(instance).copied().unwrap_or(0)
    }

    pub fn entries(&self) -> &BTreeMap<InstanceId, u64> {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of this clock with `instance`'s component advanced by one.
    #[must_use]
    pub fn incremented(&self, instance: &InstanceId) -> Self {
        let mut next = self.clone();
        *next.entries.entry(instance.clone()).or_insert(0) += 1;
        next
    }

    /// Component-wise maximum of both clocks.
    #[must_use]
    pub fn merged(&self, other: &VectorClock) -> Self {
        let mut next = self.clone();
        for (instance, &counter) in &other.entries {
            let slot = next.entries.entry(instance.clone()).or_insert(0);
            if counter > *slot {
                *slot = counter;
            }
        }
        next
    }

    /// Compare causally against `other`.
    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let mut less = false;
        let mut greater = false;

        for instance in self.entries.keys().chain(other.entries.keys()) {
            let mine = self.get(instance);
            let theirs = other.get(instance);
            if mine < theirs {
                less = true;
            } else if mine > theirs {
                greater = true;
            }
            if less && greater {
                return ClockOrdering::Concurrent;
            }
        }

        match (less, greater) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Before,
            (false, true) => ClockOrdering::After,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    /// Every component `<=` and at least one strictly `<`.
    pub fn happens_before(&self, other: &VectorClock) -> bool {
        self.compare(other) == ClockOrdering::Before
    }
}

impl FromIterator<(InstanceId, u64)> for VectorClock {
    fn from_iter<T: IntoIterator<Item = (InstanceId, u64)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
