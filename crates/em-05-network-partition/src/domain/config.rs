//! Partition handling configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shared_types::{MeshError, MeshResult};

use super::circuit_breaker::CircuitBreakerConfig;

/// What the instance still accepts while partitioned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    /// Serve local state, reject cross-instance writes.
    ReadOnly,
    /// Accept writes locally and queue them for replay on heal.
    #[default]
    WriteThrough,
    /// Reject anything that needs remote coordination.
    Offline,
}

impl fmt::Display for FallbackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackMode::ReadOnly => write!(f, "readonly"),
            FallbackMode::WriteThrough => write!(f, "writethrough"),
            FallbackMode::Offline => write!(f, "offline"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionHandlerConfig {
    /// A peer whose last heartbeat is older than this no longer counts as connected.
    pub partition_timeout: Duration,
    pub minimum_connected_instances: usize,
    /// Attempts per operation; also the breaker's failure threshold.
    pub max_retries: u32,
    pub base_retry_delay: Duration,
    /// Cap for both retry backoff and the breaker's open period.
    pub max_backoff: Duration,
    /// How long connectivity must stay recovered before healing is declared.
    pub healing_window: Duration,
    pub monitor_interval: Duration,
    pub fallback_mode: FallbackMode,
    /// Bound of the writethrough replay queue; the oldest entry is dropped first.
    pub replay_queue_capacity: usize,
}

impl Default for PartitionHandlerConfig {
    fn default() -> Self {
        Self {
            partition_timeout: Duration::from_secs(10),
            minimum_connected_instances: 1,
            max_retries: 3,
            base_retry_delay: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            healing_window: Duration::from_secs(3),
            monitor_interval: Duration::from_secs(1),
            fallback_mode: FallbackMode::WriteThrough,
            replay_queue_capacity: 10_000,
        }
    }
}

impl PartitionHandlerConfig {
    pub fn for_testing() -> Self {
        Self {
            partition_timeout: Duration::from_millis(500),
            healing_window: Duration::from_millis(300),
            monitor_interval: Duration::from_millis(100),
            base_retry_delay: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
            ..Self::default()
        }
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.max_retries,
            base_backoff: self.base_retry_delay,
            max_backoff: self.max_backoff,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_retry_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    pub fn validate(&self) -> MeshResult<()> {
        if self.max_retries == 0 {
            return Err(MeshError::InvalidConfig("max_retries must be at least 1".into()));
        }
        if self.partition_timeout.is_zero() || self.monitor_interval.is_zero() {
            return Err(MeshError::InvalidConfig(
                "partition_timeout and monitor_interval must be non-zero".into(),
            ));
        }
        if self.max_backoff < self.base_retry_delay {
            return Err(MeshError::InvalidConfig(format!(
                "max_backoff ({:?}) is below base_retry_delay ({:?})",
                self.max_backoff, self.base_retry_delay
            )));
        }
        if self.replay_queue_capacity == 0 {
            return Err(MeshError::InvalidConfig(
                "replay_queue_capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
