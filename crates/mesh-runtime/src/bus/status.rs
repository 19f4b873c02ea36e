//! Status and metrics snapshots of a distributed event bus.

use em_02_cross_instance::CoordinatorStats;
use em_03_event_store::StoreStats;
use em_04_partitioner::PartitionerMetrics;
use em_05_network_partition::{PartitionHandlerStats, PartitionStatus};
use serde::Serialize;
use shared_bus::DispatchMetrics;
use shared_types::{BusId, InstanceId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributedStatus {
    pub instance_id: InstanceId,
    pub bus_id: BusId,
    pub is_leader: bool,
    pub current_leader: Option<InstanceId>,
    /// Peers currently in the coordinator registry.
    pub connected_instances: usize,
    pub partition_status: PartitionStatus,
}

/// Façade counters. Each one has a Prometheus mirror in `mesh-telemetry`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventCounters {
    pub emitted: u64,
    pub propagated: u64,
    pub received: u64,
    pub replayed: u64,
    pub loops_prevented: u64,
    pub duplicates_skipped: u64,
    /// Global events not sent because no leader was known.
    pub leader_gated: u64,
    /// Propagations refused by the fallback mode.
    pub partition_rejected: u64,
    pub queued_for_replay: u64,
    pub propagation_failures: u64,
}

#[derive(Debug, Clone)]
pub struct DistributedMetrics {
    pub events: EventCounters,
    pub connected_instances: usize,
    pub leadership_duration_ms: Option<u64>,
    pub avg_latency_ms: f64,
    pub partition_balance: f64,
    pub coordinator: CoordinatorStats,
    pub store: StoreStats,
    pub partitioner: PartitionerMetrics,
    pub partition_handler: PartitionHandlerStats,
    pub local: DispatchMetrics,
}
