//! Heartbeat-based partition detection.
//!
//! The detector only becomes armed once a first peer heartbeat has been
//! seen, so an instance that is alone on its bus is never reported as
//! partitioned.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use shared_types::InstanceId;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum PartitionStatus {
    #[default]
    Healthy,
    Partitioned,
    /// Connectivity recovered; waiting out the healing window.
    Healing,
}

impl fmt::Display for PartitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionStatus::Healthy => write!(f, "healthy"),
            PartitionStatus::Partitioned => write!(f, "partitioned"),
            PartitionStatus::Healing => write!(f, "healing"),
        }
    }
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    PartitionDetected,
    HealingStarted,
    /// Healing did not hold; back to partitioned without a new detection.
    HealingAborted,
    Healed,
}

#[derive(Debug)]
pub struct PartitionDetector {
    partition_timeout: Duration,
    minimum_connected: usize,
    healing_window: Duration,
    heartbeats: HashMap<InstanceId, Instant>,
    status: PartitionStatus,
    healing_since: Option<Instant>,
    partitioned_since: Option<Instant>,
    armed: bool,
}

impl PartitionDetector {
    pub fn new(partition_timeout: Duration, minimum_connected: usize, healing_window: Duration) -> Self {
        Self {
            partition_timeout,
            minimum_connected,
            healing_window,
            heartbeats: HashMap::new(),
            status: PartitionStatus::Healthy,
            healing_since: None,
            partitioned_since: None,
            armed: false,
        }
    }

    pub fn status(&self) -> PartitionStatus {
        self.status
    }

    pub fn is_partitioned(&self) -> bool {
        self.status != PartitionStatus::Healthy
    }

    pub fn partitioned_since(&self) -> Option<Instant> {
        self.partitioned_since
    }

    pub fn record_heartbeat(&mut self, instance: InstanceId, now: Instant) {
        self.armed = true;
        self.heartbeats.insert(instance, now);
    }

    /// Forget a peer that left gracefully. Once every peer has left the
    /// detector is disarmed again.
    pub fn remove(&mut self, instance: &InstanceId) -> bool {
        let removed = self.heartbeats.remove(instance).is_some();
        if self.heartbeats.is_empty() {
            self.armed = false;
        }
        removed
    }

    pub fn connected_count(&self, now: Instant) -> usize {
        self.heartbeats
            .values()
            .filter(|seen| now.saturating_duration_since(**seen) <= self.partition_timeout)
            .count()
    }

    pub fn known_count(&self) -> usize {
        self.heartbeats.len()
    }

    /// Returns `false` when already partitioned.
    pub fn declare_partition(&mut self, now: Instant) -> bool {
        match self.status {
            PartitionStatus::Partitioned => false,
            PartitionStatus::Healing => {
                self.status = PartitionStatus::Partitioned;
                self.healing_since = None;
                false
            }
            PartitionStatus::Healthy => {
                self.status = PartitionStatus::Partitioned;
                self.partitioned_since = Some(now);
                true
            }
        }
    }

    pub fn evaluate(&mut self, now: Instant) -> Transition {
        // Unarmed: nobody to lose, but a declared partition may still heal.
        let connected = !self.armed
            || self.minimum_connected == 0
            || self.connected_count(now) >= self.minimum_connected;

        match (self.status, connected) {
            (PartitionStatus::Healthy, false) => {
                self.status = PartitionStatus::Partitioned;
                self.partitioned_since = Some(now);
                Transition::PartitionDetected
            }
            (PartitionStatus::Partitioned, true) => {
                self.status = PartitionStatus::Healing;
                self.healing_since = Some(now);
                Transition::HealingStarted
            }
            (PartitionStatus::Healing, false) => {
                self.status = PartitionStatus::Partitioned;
                self.healing_since = None;
                Transition::HealingAborted
            }
            (PartitionStatus::Healing, true) => {
                let since = self.healing_since.unwrap_or(now);
                if now.saturating_duration_since(since) >= self.healing_window {
                    self.status = PartitionStatus::Healthy;
                    self.healing_since = None;
                    self.partitioned_since = None;
                    Transition::Healed
                } else {
                    Transition::None
                }
            }
            _ => Transition::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> PartitionDetector {
        PartitionDetector::new(Duration::from_millis(500), 1, Duration::from_millis(300))
    }

    fn peer(id: &str) -> InstanceId {
        InstanceId::new(id)
    }

    #[test]
    fn test_solo_instance_never_partitioned() {
        let mut d = detector();
        let later = Instant::now() + Duration::from_secs(60);
        assert_eq!(d.evaluate(later), Transition::None);
        assert_eq!(d.status(), PartitionStatus::Healthy);
    }

    #[test]
    fn test_stale_heartbeats_trigger_partition() {
        let start = Instant::now();
        let mut d = detector();
        d.record_heartbeat(peer("b"), start);

        assert_eq!(d.evaluate(start + Duration::from_millis(400)), Transition::None);
        assert_eq!(
            d.evaluate(start + Duration::from_millis(600)),
            Transition::PartitionDetected
        );
        assert!(d.is_partitioned());
        assert_eq!(d.evaluate(start + Duration::from_millis(700)), Transition::None);
    }

    #[test]
    fn test_healing_requires_window() {
        let start = Instant::now();
        let mut d = detector();
        d.record_heartbeat(peer("b"), start);
        d.evaluate(start + Duration::from_millis(600));

        let back = start + Duration::from_millis(800);
        d.record_heartbeat(peer("b"), back);
        assert_eq!(d.evaluate(back), Transition::HealingStarted);
        assert_eq!(d.status(), PartitionStatus::Healing);
        assert!(d.is_partitioned());

        d.record_heartbeat(peer("b"), back + Duration::from_millis(200));
        assert_eq!(d.evaluate(back + Duration::from_millis(200)), Transition::None);
        assert_eq!(d.evaluate(back + Duration::from_millis(300)), Transition::Healed);
        assert_eq!(d.status(), PartitionStatus::Healthy);
    }

    #[test]
    fn test_healing_aborted_when_peers_drop_again() {
        let start = Instant::now();
        let mut d = detector();
        d.record_heartbeat(peer("b"), start);
        d.evaluate(start + Duration::from_millis(600));
        d.record_heartbeat(peer("b"), start + Duration::from_millis(700));
        d.evaluate(start + Duration::from_millis(700));

        assert_eq!(
            d.evaluate(start + Duration::from_millis(1300)),
            Transition::HealingAborted
        );
        assert_eq!(d.status(), PartitionStatus::Partitioned);
    }

    #[test]
    fn test_declared_partition_heals_without_peers() {
        let now = Instant::now();
        let mut d = detector();
        d.declare_partition(now);
        assert_eq!(d.evaluate(now), Transition::HealingStarted);
        assert_eq!(d.evaluate(now + Duration::from_millis(300)), Transition::Healed);
    }

    #[test]
    fn test_last_peer_leaving_disarms() {
        let start = Instant::now();
        let mut d = detector();
        d.record_heartbeat(peer("b"), start);
        assert!(d.remove(&peer("b")));
        assert_eq!(d.evaluate(start + Duration::from_secs(5)), Transition::None);
        assert_eq!(d.status(), PartitionStatus::Healthy);
    }

    #[test]
    fn test_declare_partition_is_idempotent() {
        let now = Instant::now();
        let mut d = detector();
        assert!(d.declare_partition(now));
        assert!(!d.declare_partition(now));
        assert_eq!(d.partitioned_since(), Some(now));
    }

    #[test]
    fn test_minimum_two_connected() {
        let start = Instant::now();
        let mut d = PartitionDetector::new(Duration::from_millis(500), 2, Duration::ZERO);
        d.record_heartbeat(peer("b"), start);
        assert_eq!(d.evaluate(start), Transition::PartitionDetected);

        d.record_heartbeat(peer("c"), start);
        assert_eq!(d.evaluate(start), Transition::HealingStarted);
        assert_eq!(d.evaluate(start), Transition::Healed);
    }
}
