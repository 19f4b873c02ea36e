//! # Event Mesh Demo Node
//!
//! Runs two instances of one bus (`MESH_BUS_ID`) over the in-memory transport,
//! emits a global event once a leader is elected, and shuts down on Ctrl+C
//! or after a few seconds.
//!
//! ## Startup Sequence
//!
//! 1. Initialize logging and metrics
//! 2. Load configuration from the environment
//! 3. Start one bus per instance
//! 4. Wait for the election, then emit
//! 5. Graceful shutdown

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mesh_runtime::{DistributedEventBus, MeshConfig};
use mesh_telemetry::{init_telemetry, TelemetryConfig};
use shared_bus::{InMemoryEventBus, InMemoryTransportHub};
use shared_types::EventOptions;
use tracing::info;

const DEMO_RUNTIME: Duration = Duration::from_secs(5);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

fn start_instance(
    hub: &InMemoryTransportHub,
    base: &MeshConfig,
    instance_id: &str,
    priority: u64,
) -> Result<(DistributedEventBus, Arc<InMemoryEventBus>)> {
    let local = Arc::new(InMemoryEventBus::new());
    let config = MeshConfig {
        election: base.election.clone(),
        coordinator: base.coordinator.clone(),
        partition: base.partition.clone(),
        partition_handler: base.partition_handler.clone(),
        ..MeshConfig::new(instance_id, base.bus_id.as_str())
    }
    .with_priority(priority);

    let bus = DistributedEventBus::new(config, hub.endpoint(instance_id), local.clone())
        .with_context(|| format!("failed to create instance {instance_id}"))?;
    bus.start()
        .with_context(|| format!("failed to start instance {instance_id}"))?;

    let label = instance_id.to_string();
    // Kept for the lifetime of the process.
    let _ = local.on("**", move |event| {
        info!(instance = %label, pattern = %event.pattern, event_id = %event.id, "[demo] Event received");
        Ok(())
    });
    Ok((bus, local))
}

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = TelemetryConfig::from_env();
    init_telemetry(&telemetry).context("failed to initialize telemetry")?;

    let base = MeshConfig::from_env().context("invalid mesh configuration")?;

    let hub = InMemoryTransportHub::new();
    let (a, _) = start_instance(&hub, &base, "instance-a", 100)?;
    let (b, _) = start_instance(&hub, &base, "instance-b", 200)?;

    // Let the election settle.
    tokio::time::sleep(base.election.election_timeout * 2).await;
    info!(leader = ?a.current_leader(), "[demo] Election settled");

    a.emit(
        "global.order.created",
        serde_json::json!({ "order_id": 42, "total": 99.5 }),
        EventOptions::default(),
    )?;
    b.emit(
        "order.shipped",
        serde_json::json!({ "order_id": 42 }),
        EventOptions::default(),
    )?;

    info!("Mesh is running. Press Ctrl+C to stop.");
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for Ctrl+C")?,
        _ = tokio::time::sleep(DEMO_RUNTIME) => {}
    }

    for bus in [&a, &b] {
        let metrics = bus.get_distributed_metrics();
        info!(
            instance = %bus.instance_id(),
            status = %serde_json::to_string(&bus.get_distributed_status())?,
            emitted = metrics.events.emitted,
            received = metrics.events.received,
            "[demo] Final status"
        );
    }

    a.graceful_shutdown(SHUTDOWN_TIMEOUT).await;
    b.graceful_shutdown(SHUTDOWN_TIMEOUT).await;
    Ok(())
}
