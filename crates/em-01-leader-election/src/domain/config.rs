//! Election timing configuration.

use std::time::Duration;

use shared_types::{MeshError, MeshResult};

/// Timing parameters of the election protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionConfig {
    /// Period of leader heartbeats.
    pub heartbeat_interval: Duration,
    /// How long a candidate waits for `ELECTION_OK` (and then for `COORDINATOR`).
    pub election_timeout: Duration,
    /// Silence after which a follower declares the leader lost.
    pub leadership_timeout: Duration,
    /// Upper bound of the random delay before re-electing after a step-down.
    pub step_down_jitter: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(1),
            election_timeout: Duration::from_secs(2),
            leadership_timeout: Duration::from_secs(5),
            step_down_jitter: Duration::from_millis(500),
        }
    }
}

impl ElectionConfig {
    /// Short timeouts for tests running on a paused clock.
    pub fn for_testing() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(50),
            election_timeout: Duration::from_millis(100),
            leadership_timeout: Duration::from_millis(250),
            step_down_jitter: Duration::from_millis(50),
        }
    }

    /// Silence after which a registry entry is evicted.
    pub fn inactive_after(&self) -> Duration {
        self.leadership_timeout * 2
    }

    pub fn validate(&self) -> MeshResult<()> {
        if self.heartbeat_interval.is_zero() || self.election_timeout.is_zero() {
            return Err(MeshError::InvalidConfig(
                "election intervals must be non-zero".into(),
            ));
        }
        if self.leadership_timeout <= self.heartbeat_interval {
            return Err(MeshError::InvalidConfig(format!(
                "leadership_timeout ({:?}) must exceed heartbeat_interval ({:?})",
                self.leadership_timeout, self.heartbeat_interval
            )));
        }
        Ok(())
    }
}
