//! Coordinator configuration.

use std::time::Duration;

use shared_types::{MeshError, MeshResult};

/// Configuration of the cross-instance coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Ceiling on the encoded envelope size.
    pub max_message_bytes: usize,
    /// Payloads at least this large are compressed even under the ceiling.
    pub compression_threshold: usize,
    pub compression_level: i32,
    /// Send attempts per propagation.
    pub max_retries: u32,
    /// Backoff before the second attempt; doubles per attempt.
    pub retry_base_delay: Duration,
    pub ping_interval: Duration,
    /// Registry entries unseen for longer are evicted.
    pub instance_timeout: Duration,
    pub ack_timeout: Duration,
    /// Ask receivers to acknowledge every event envelope.
    pub require_acks: bool,
    /// Smoothing factor of the moving averages.
    pub ema_alpha: f64,
    /// How long a message id is remembered for duplicate suppression.
    pub dedup_window: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: 256 * 1024,
            compression_threshold: 16 * 1024,
            compression_level: 3,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            ping_interval: Duration::from_secs(5),
            instance_timeout: Duration::from_secs(15),
            ack_timeout: Duration::from_secs(5),
            require_acks: false,
            ema_alpha: 0.2,
            dedup_window: Duration::from_secs(120),
        }
    }
}

impl CoordinatorConfig {
    /// Short timeouts for tests running on a paused clock.
    pub fn for_testing() -> Self {
        Self {
            retry_base_delay: Duration::from_millis(10),
            ping_interval: Duration::from_millis(100),
            instance_timeout: Duration::from_millis(350),
            ack_timeout: Duration::from_millis(200),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> MeshResult<()> {
        if self.max_retries == 0 {
            return Err(MeshError::InvalidConfig("max_retries must be at least 1".into()));
        }
        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            return Err(MeshError::InvalidConfig(format!(
                "ema_alpha must be in (0, 1], got {}",
                self.ema_alpha
            )));
        }
        if self.instance_timeout <= self.ping_interval {
            return Err(MeshError::InvalidConfig(
                "instance_timeout must exceed ping_interval".into(),
            ));
        }
        if self.max_message_bytes == 0 {
            return Err(MeshError::InvalidConfig("max_message_bytes must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(CoordinatorConfig::default().validate().is_ok());
        assert!(CoordinatorConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_alpha() {
        let config = CoordinatorConfig {
            ema_alpha: 0.0,
            ..CoordinatorConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
