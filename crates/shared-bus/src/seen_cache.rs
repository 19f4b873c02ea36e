//! # Time-Bounded Seen Cache
//!
//! Duplicate suppression for message and event ids.
//!
//! - An id is remembered for the validity window after it was first seen
//! - Expired ids are garbage-collected lazily on insert
//! - Memory is bounded by the arrival rate times the window

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

/// Remembers recently seen ids for a bounded time window.
pub struct TimeBoundedSeenCache<K = Uuid> {
    /// Map of id -> instant it was first seen.
    cache: HashMap<K, Instant>,

    validity_window: Duration,

    last_gc: Instant,

    gc_interval: Duration,
}

impl<K: Hash + Eq + Clone> TimeBoundedSeenCache<K> {
    /// Default validity window.
    pub const DEFAULT_VALIDITY_WINDOW: Duration = Duration::from_secs(120);

    /// Default garbage collection interval.
    pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(10);

    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Self::DEFAULT_VALIDITY_WINDOW, Self::DEFAULT_GC_INTERVAL)
    }

    #[must_use]
    pub fn with_config(validity_window: Duration, gc_interval: Duration) -> Self {
        Self {
            cache: HashMap::new(),
            validity_window,
            last_gc: Instant::now(),
            gc_interval,
        }
    }

    /// Record `id` and report whether it is new.
    ///
    /// Returns `false` if `id` was already seen within the window.
    pub fn check_and_insert(&mut self, id: K) -> bool {
        let now = Instant::now();

        if now.duration_since(self.last_gc) > self.gc_interval {
            self.garbage_collect(now);
            self.last_gc = now;
        }

        match self.cache.get(&id) {
            Some(seen_at) if now.duration_since(*seen_at) <= self.validity_window => false,
            _ => {
                self.cache.insert(id, now);
                true
            }
        }
    }

    /// Whether `id` is currently remembered.
    #[must_use]
    pub fn contains(&self, id: &K) -> bool {
        self.cache
            .get(id)
            .is_some_and(|seen_at| seen_at.elapsed() <= self.validity_window)
    }

    /// Drop every id older than the validity window.
    pub fn garbage_collect(&mut self, now: Instant) {
        let window = self.validity_window;
        self.cache
            .retain(|_, seen_at| now.duration_since(*seen_at) <= window);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

impl<K: Hash + Eq + Clone> Default for TimeBoundedSeenCache<K> {
    fn default() -> Self {
        Self::new()
    }
}
