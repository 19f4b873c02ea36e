//! # Network Partition Scenarios
//!
//! Links are cut with the hub's fault injection. Detection takes one
//! partition timeout; healing takes one healing window after the first
//! heartbeat gets through again.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use em_05_network_partition::{FallbackMode, PartitionStatus};
    use mesh_runtime::MeshConfig;
    use serde_json::json;
    use shared_bus::InMemoryTransportHub;
    use shared_types::EventOptions;

    use crate::integration::harness::{settle, Cluster, Node, BUS};

    fn count(counter: &Arc<AtomicUsize>) -> impl Fn() + Send + Sync + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pair_with_mode(mode: FallbackMode) -> (InMemoryTransportHub, Node, Node) {
        let hub = InMemoryTransportHub::new();
        let mut config = MeshConfig::for_testing("a", BUS).with_priority(100);
        config.partition_handler.fallback_mode = mode;
        let a = Node::start_with(&hub, config);
        let b = Node::start(&hub, "b", 200);
        (hub, a, b)
    }

    #[tokio::test(start_paused = true)]
    async fn test_partition_detected_then_healed_with_replay() {
        let cluster = Cluster::start(&[("a", 100), ("b", 200)]);
        settle(600).await;
        let a = cluster.node("a");
        let b = cluster.node("b");

        let partitions = Arc::new(AtomicUsize::new(0));
        let heals = Arc::new(AtomicUsize::new(0));
        let _p = a.bus.on_network_partition(count(&partitions));
        let _h = a.bus.on_partition_healed(count(&heals));

        cluster.hub.disconnect("a", "b");
        settle(800).await;
        assert_eq!(partitions.load(Ordering::SeqCst), 1);
        assert_eq!(a.bus.get_distributed_status().partition_status, PartitionStatus::Partitioned);

        // Writethrough: dispatched locally, queued for the mesh.
        let first = a.bus.emit("order.created", json!({"n": 1}), EventOptions::default()).unwrap();
        let second = a.bus.emit("order.created", json!({"n": 2}), EventOptions::default()).unwrap();
        assert_eq!(a.times_seen(&first.id), 1);
        assert_eq!(a.bus.get_distributed_metrics().events.queued_for_replay, 2);
        settle(100).await;
        assert!(b.received("order.created").is_empty());

        cluster.hub.reconnect("a", "b");
        settle(1000).await;

        assert_eq!(heals.load(Ordering::SeqCst), 1);
        assert_eq!(a.bus.get_distributed_status().partition_status, PartitionStatus::Healthy);
        assert_eq!(b.times_seen(&first.id), 1);
        assert_eq!(b.times_seen(&second.id), 1);
        let order: Vec<_> = b
            .received("order.created")
            .iter()
            .map(|event| event.id.clone())
            .collect();
        assert_eq!(order, vec![first.id.clone(), second.id.clone()]);

        let metrics = a.bus.get_distributed_metrics();
        assert_eq!(metrics.events.replayed, 2);
        assert_eq!(metrics.partition_handler.queued_writes, 0);
        assert!(b.bus.store().get(a.id(), &first.id).unwrap().event.replayed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_readonly_mode_keeps_writes_local() {
        let (hub, a, b) = pair_with_mode(FallbackMode::ReadOnly);
        settle(600).await;

        hub.disconnect("a", "b");
        settle(800).await;
        assert!(a.bus.get_distributed_status().partition_status != PartitionStatus::Healthy);

        let event = a.bus.emit("order.created", json!({}), EventOptions::default()).unwrap();
        assert_eq!(a.times_seen(&event.id), 1);
        assert_eq!(a.bus.get_distributed_metrics().events.partition_rejected, 1);

        hub.reconnect("a", "b");
        settle(1000).await;

        assert_eq!(b.times_seen(&event.id), 0);
        assert_eq!(a.bus.get_distributed_metrics().events.replayed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_mode_rejects_mesh_writes() {
        let (hub, a, _b) = pair_with_mode(FallbackMode::Offline);
        settle(600).await;

        hub.disconnect("a", "b");
        settle(800).await;

        a.bus.emit("order.created", json!({}), EventOptions::default()).unwrap();
        a.bus.emit("order.paid", json!({}), EventOptions::default()).unwrap();

        let metrics = a.bus.get_distributed_metrics();
        assert_eq!(metrics.events.emitted, 2);
        assert_eq!(metrics.events.partition_rejected, 2);
        assert_eq!(metrics.local.events_processed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failures_declare_partition() {
        let cluster = Cluster::start(&[("a", 100), ("b", 200)]);
        settle(600).await;
        let a = cluster.node("a");

        let partitions = Arc::new(AtomicUsize::new(0));
        let _p = a.bus.on_network_partition(count(&partitions));

        cluster.hub.set_send_failure("a", true);
        let event = a.bus.emit("order.created", json!({}), EventOptions::default()).unwrap();
        settle(1000).await;

        // Kept locally, never delivered, counted as failed.
        assert_eq!(a.times_seen(&event.id), 1);
        assert_eq!(cluster.node("b").times_seen(&event.id), 0);
        assert!(partitions.load(Ordering::SeqCst) >= 1);
        assert_eq!(a.bus.get_distributed_metrics().events.propagation_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_solo_instance_never_partitioned() {
        let cluster = Cluster::start(&[("solo", 1)]);
        settle(2000).await;

        let solo = cluster.node("solo");
        assert_eq!(solo.bus.get_distributed_status().partition_status, PartitionStatus::Healthy);
        assert!(solo.bus.is_leader());

        solo.bus
            .emit("global.order.created", json!({}), EventOptions::default())
            .unwrap();
        settle(100).await;
        assert_eq!(solo.bus.get_distributed_metrics().events.partition_rejected, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_graceful_exit_is_not_a_partition() {
        let cluster = Cluster::start(&[("a", 100), ("b", 200)]);
        settle(600).await;

        let partitions = Arc::new(AtomicUsize::new(0));
        let _p = cluster.node("a").bus.on_network_partition(count(&partitions));

        cluster
            .node("b")
            .bus
            .graceful_shutdown(std::time::Duration::from_millis(100))
            .await;
        settle(2000).await;

        assert_eq!(partitions.load(Ordering::SeqCst), 0);
        assert_eq!(
            cluster.node("a").bus.get_distributed_status().partition_status,
            PartitionStatus::Healthy
        );
        assert!(cluster.node("a").bus.is_leader());
    }
}
