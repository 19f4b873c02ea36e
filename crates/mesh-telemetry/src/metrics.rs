//! Prometheus metrics for the event mesh.
//!
//! All metrics follow the naming convention: `mesh_<area>_<metric>_<unit>`
//! and carry a `bus` label so several buses in one process stay apart.

use lazy_static::lazy_static;
use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // EVENT FLOW
    // =========================================================================

    /// Events emitted locally
    pub static ref EVENTS_EMITTED: CounterVec = CounterVec::new(
        Opts::new("mesh_events_emitted_total", "Events emitted on this instance"),
        &["bus"]
    ).expect("metric creation failed");

    /// Events handed to the coordinator for propagation
    pub static ref EVENTS_PROPAGATED: CounterVec = CounterVec::new(
        Opts::new("mesh_events_propagated_total", "Events propagated to other instances"),
        &["bus"]
    ).expect("metric creation failed");

    /// Remote events accepted and dispatched locally
    pub static ref EVENTS_RECEIVED: CounterVec = CounterVec::new(
        Opts::new("mesh_events_received_total", "Remote events dispatched locally"),
        &["bus"]
    ).expect("metric creation failed");

    /// Events not propagated or not dispatched, by reason
    pub static ref EVENTS_DROPPED: CounterVec = CounterVec::new(
        Opts::new("mesh_events_dropped_total", "Events dropped by the mesh"),
        &["bus", "reason"]  // reason: loop/leader_gate/partition/error
    ).expect("metric creation failed");

    /// Events replayed after a partition healed
    pub static ref EVENTS_REPLAYED: CounterVec = CounterVec::new(
        Opts::new("mesh_events_replayed_total", "Events replayed after healing"),
        &["bus"]
    ).expect("metric creation failed");

    // =========================================================================
    // CLUSTER STATE
    // =========================================================================

    /// 1 while this instance is leader of the bus
    pub static ref IS_LEADER: GaugeVec = GaugeVec::new(
        Opts::new("mesh_is_leader", "Whether this instance currently leads the bus"),
        &["bus"]
    ).expect("metric creation failed");

    /// Peers currently in the coordinator registry
    pub static ref KNOWN_INSTANCES: GaugeVec = GaugeVec::new(
        Opts::new("mesh_known_instances", "Peers in the instance registry"),
        &["bus"]
    ).expect("metric creation failed");

    /// 1 while partitioned or healing
    pub static ref PARTITIONED: GaugeVec = GaugeVec::new(
        Opts::new("mesh_partitioned", "Whether the instance considers itself partitioned"),
        &["bus"]
    ).expect("metric creation failed");

    /// Records held by the distributed event store
    pub static ref STORED_RECORDS: GaugeVec = GaugeVec::new(
        Opts::new("mesh_store_records", "Records in the distributed event store"),
        &["bus"]
    ).expect("metric creation failed");

    // =========================================================================
    // ERROR METRICS
    // =========================================================================

    /// Mesh errors by kind
    pub static ref MESH_ERRORS: CounterVec = CounterVec::new(
        Opts::new("mesh_errors_total", "Errors by bus and type"),
        &["bus", "error_type"]
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry. Registering twice is a no-op.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Event flow
        Box::new(EVENTS_EMITTED.clone()),
        Box::new(EVENTS_PROPAGATED.clone()),
        Box::new(EVENTS_RECEIVED.clone()),
        Box::new(EVENTS_DROPPED.clone()),
        Box::new(EVENTS_REPLAYED.clone()),
        // Cluster state
        Box::new(IS_LEADER.clone()),
        Box::new(KNOWN_INSTANCES.clone()),
        Box::new(PARTITIONED.clone()),
        Box::new(STORED_RECORDS.clone()),
        // Errors
        Box::new(MESH_ERRORS.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }
    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_twice_is_ok() {
        assert!(register_metrics().is_ok());
        assert!(register_metrics().is_ok());
    }

    #[test]
    fn test_counter_increment_and_encode() {
        register_metrics().unwrap();
        EVENTS_EMITTED.with_label_values(&["metrics-test"]).inc();
        assert!(EVENTS_EMITTED.with_label_values(&["metrics-test"]).get() >= 1.0);

        let text = encode_metrics().unwrap();
        assert!(text.contains("mesh_events_emitted_total"));
    }

    #[test]
    fn test_gauge_set() {
        IS_LEADER.with_label_values(&["gauge-test"]).set(1.0);
        assert_eq!(IS_LEADER.with_label_values(&["gauge-test"]).get(), 1.0);
    }
}
