//! # Mesh Configuration
//!
//! Identity of one instance on one bus plus the configuration of every
//! subsystem.

use std::env;
use std::time::Duration;

use em_01_leader_election::ElectionConfig;
use em_02_cross_instance::CoordinatorConfig;
use em_03_event_store::StoreConfig;
use em_04_partitioner::PartitionConfig;
use em_05_network_partition::PartitionHandlerConfig;
use shared_types::{BusId, InstanceId, MeshError, MeshResult};

/// Complete configuration of one distributed event bus instance.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    pub instance_id: InstanceId,
    /// Election priority; derived from `instance_id` when unset.
    pub priority: Option<u64>,
    pub bus_id: BusId,
    /// Patterns with this prefix are propagated by the leader only.
    pub global_namespace: String,
    /// Master switch for cross-instance propagation.
    pub enable_propagation: bool,
    pub election: ElectionConfig,
    pub coordinator: CoordinatorConfig,
    pub store: StoreConfig,
    pub partition: PartitionConfig,
    pub partition_handler: PartitionHandlerConfig,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            instance_id: InstanceId::random(),
            priority: None,
            bus_id: BusId::new("default"),
            global_namespace: "global.".to_string(),
            enable_propagation: true,
            election: ElectionConfig::default(),
            coordinator: CoordinatorConfig::default(),
            store: StoreConfig::default(),
            partition: PartitionConfig::default(),
            partition_handler: PartitionHandlerConfig::default(),
        }
    }
}

impl MeshConfig {
    pub fn new(instance_id: impl Into<String>, bus_id: impl Into<String>) -> Self {
        Self {
            instance_id: InstanceId::new(instance_id),
            bus_id: BusId::new(bus_id),
            ..Self::default()
        }
    }

    /// Short timers everywhere, for tests on a paused clock and demos.
    pub fn for_testing(instance_id: impl Into<String>, bus_id: impl Into<String>) -> Self {
        Self {
            election: ElectionConfig::for_testing(),
            coordinator: CoordinatorConfig {
                instance_timeout: Duration::from_secs(2),
                ..CoordinatorConfig::for_testing()
            },
            partition: PartitionConfig {
                max_wait_time: Duration::from_millis(500),
                ..PartitionConfig::default()
            },
            partition_handler: PartitionHandlerConfig::for_testing(),
            ..Self::new(instance_id, bus_id)
        }
    }

    pub fn with_priority(mut self, priority: u64) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Override identity fields from the environment.
    ///
    /// # Environment Variables
    ///
    /// - `MESH_INSTANCE_ID`: instance id (default: random)
    /// - `MESH_PRIORITY`: election priority (default: derived from the id)
    /// - `MESH_BUS_ID`: bus id (default: `default`)
    pub fn from_env() -> MeshResult<Self> {
        Self::default().apply_overrides(|key| env::var(key).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> MeshResult<Self> {
        if let Some(id) = lookup("MESH_INSTANCE_ID").filter(|v| !v.is_empty()) {
            self.instance_id = InstanceId::new(id);
        }
        if let Some(raw) = lookup("MESH_PRIORITY") {
            let priority = raw.trim().parse::<u64>().map_err(|_| {
                MeshError::InvalidConfig(format!("MESH_PRIORITY is not an integer: {raw}"))
            })?;
            self.priority = Some(priority);
        }
        if let Some(bus) = lookup("MESH_BUS_ID").filter(|v| !v.is_empty()) {
            self.bus_id = BusId::new(bus);
        }
        Ok(self)
    }

    pub fn is_global(&self, pattern: &str) -> bool {
        pattern.starts_with(&self.global_namespace)
    }

    pub fn validate(&self) -> MeshResult<()> {
        if self.instance_id.as_str().is_empty() || self.bus_id.as_str().is_empty() {
            return Err(MeshError::InvalidConfig(
                "instance_id and bus_id must be non-empty".into(),
            ));
        }
        if self.global_namespace.is_empty() {
            return Err(MeshError::InvalidConfig("global_namespace must be non-empty".into()));
        }
        self.election.validate()?;
        self.coordinator.validate()?;
        self.store.validate()?;
        self.partition.validate()?;
        self.partition_handler.validate()
    }
}
