//! Store configuration.

use std::time::Duration;

use shared_types::{MeshError, MeshResult};

use super::conflict::ConflictStrategy;

/// Configuration of the distributed event store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub strategy: ConflictStrategy,
    /// Compaction triggers once the estimated record size exceeds this.
    pub max_storage_bytes: usize,
    pub compaction_interval: Duration,
    /// Share of records evicted by one compaction, oldest first.
    pub eviction_fraction: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            strategy: ConflictStrategy::VectorClock,
            max_storage_bytes: 10 * 1024 * 1024,
            compaction_interval: Duration::from_secs(60),
            eviction_fraction: 0.10,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> MeshResult<()> {
        if !(self.eviction_fraction > 0.0 && self.eviction_fraction <= 1.0) {
            return Err(MeshError::InvalidConfig(format!(
                "eviction_fraction must be in (0, 1], got {}",
                self.eviction_fraction
            )));
        }
        if self.compaction_interval.is_zero() {
            return Err(MeshError::InvalidConfig(
                "compaction_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(StoreConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_eviction() {
        let config = StoreConfig {
            eviction_fraction: 0.0,
            ..StoreConfig::default()
        };
        assert!(matches!(config.validate(), Err(MeshError::InvalidConfig(_))));
    }
}
