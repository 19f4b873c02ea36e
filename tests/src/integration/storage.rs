//! # Storage Scenarios
//!
//! Replicas that see the same versions in different orders must keep the
//! same winner, and a record is never duplicated by redelivery.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use em_03_event_store::{
        ConflictStrategy, DistributedEventStore, InMemoryDurableStore, Resolution, StoreConfig,
        StoredRecord,
    };
    use mesh_runtime::{DistributedEventBus, MeshConfig};
    use serde_json::json;
    use shared_bus::{InMemoryEventBus, InMemoryTransportHub};
    use shared_types::{BusId, DistributedEvent, EventOptions, InstanceId, LocalEvent, VectorClock};

    use crate::integration::harness::{settle, Cluster, BUS};

    fn clock(pairs: &[(&str, u64)]) -> VectorClock {
        pairs
            .iter()
            .map(|(id, counter)| (InstanceId::new(*id), *counter))
            .collect()
    }

    fn version(base: &DistributedEvent, payload: serde_json::Value, vc: VectorClock) -> DistributedEvent {
        let mut version = base.clone();
        version.event.payload = payload;
        version.vector_clock = Some(vc);
        version
    }

    fn replica(id: &str, strategy: ConflictStrategy) -> DistributedEventStore {
        DistributedEventStore::new(
            InstanceId::new(id),
            StoreConfig {
                strategy,
                ..StoreConfig::default()
            },
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_instance_stores_one_record_per_event() {
        let cluster = Cluster::start(&[("a", 100), ("b", 300), ("c", 200)]);
        settle(600).await;

        let event = cluster
            .node("a")
            .bus
            .emit("global.order.created", json!({"orderId": "O1"}), EventOptions::default())
            .unwrap();
        cluster
            .node("b")
            .bus
            .emit("order.paid", json!({"orderId": "O1"}), EventOptions::default())
            .unwrap();
        settle(300).await;

        for node in &cluster.nodes {
            let store = node.bus.store();
            assert_eq!(store.len(), 2, "instance {}", node.id());
            assert!(store.get(&InstanceId::new("a"), &event.id).is_some());
        }
        let metrics = cluster.node("c").bus.get_distributed_metrics();
        assert_eq!(metrics.events.received, 2);
    }

    #[test]
    fn test_concurrent_versions_converge_across_replicas() {
        let base = DistributedEvent::new(
            LocalEvent::new("order.updated", json!({})),
            InstanceId::new("a"),
            BusId::new(BUS),
        );
        let from_b = version(&base, json!({"status": "paid"}), clock(&[("a", 1), ("b", 1)]));
        let from_c = version(&base, json!({"status": "cancelled"}), clock(&[("a", 1), ("c", 1)]));

        let left = replica("d", ConflictStrategy::VectorClock);
        left.store_remote_event(&from_b).unwrap();
        let left_winner = left.store_remote_event(&from_c).unwrap();

        let right = replica("e", ConflictStrategy::VectorClock);
        right.store_remote_event(&from_c).unwrap();
        let right_winner = right.store_remote_event(&from_b).unwrap();

        assert_eq!(left_winner.event.event.payload, right_winner.event.event.payload);
        assert_eq!(left.stats().conflicts_resolved, 1);
        assert_eq!(right.stats().conflicts_resolved, 1);
    }

    #[test]
    fn test_causally_later_version_wins_in_any_order() {
        let base = DistributedEvent::new(
            LocalEvent::new("order.updated", json!({})),
            InstanceId::new("a"),
            BusId::new(BUS),
        );
        let earlier = version(&base, json!({"v": 1}), clock(&[("a", 1)]));
        let later = version(&base, json!({"v": 2}), clock(&[("a", 1), ("b", 2)]));

        for (first, second) in [(&earlier, &later), (&later, &earlier)] {
            let store = replica("c", ConflictStrategy::VectorClock);
            store.store_remote_event(first).unwrap();
            let winner = store.store_remote_event(second).unwrap();
            assert_eq!(winner.event.event.payload, json!({"v": 2}));
            assert_eq!(store.len(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_resolver_installed_through_bus() {
        let hub = InMemoryTransportHub::new();
        let mut config = MeshConfig::for_testing("c", BUS);
        config.store.strategy = ConflictStrategy::Custom;
        let bus = DistributedEventBus::new(
            config,
            hub.endpoint("c"),
            Arc::new(InMemoryEventBus::new()),
        )
        .unwrap();
        bus.start().unwrap();
        bus.set_conflict_resolver(Arc::new(
            |_: &StoredRecord, _: &StoredRecord| -> Result<Resolution, String> {
                Ok(Resolution::KeepExisting)
            },
        ));

        let base = DistributedEvent::new(
            LocalEvent::new("order.updated", json!({})),
            InstanceId::new("a"),
            BusId::new(BUS),
        );
        let first = version(&base, json!({"v": 1}), clock(&[("a", 1)]));
        let second = version(&base, json!({"v": 2}), clock(&[("a", 2)]));
        bus.store().store_remote_event(&first).unwrap();
        let winner = bus.store().store_remote_event(&second).unwrap();

        assert_eq!(winner.event.event.payload, json!({"v": 1}));
    }

    #[test]
    fn test_redelivery_is_idempotent() {
        let store = replica("b", ConflictStrategy::VectorClock);
        let event = version(
            &DistributedEvent::new(
                LocalEvent::new("order.created", json!({})),
                InstanceId::new("a"),
                BusId::new(BUS),
            ),
            json!({"orderId": "O1"}),
            clock(&[("a", 1)]),
        );

        for _ in 0..5 {
            store.store_remote_event(&event).unwrap();
        }
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_missed_events_during_partition(&VectorClock::default()).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarted_instance_reloads_its_events() {
        let hub = InMemoryTransportHub::new();
        let durable = InMemoryDurableStore::new();

        let first = DistributedEventBus::with_durable(
            MeshConfig::for_testing("a", BUS),
            hub.endpoint("a"),
            Arc::new(InMemoryEventBus::new()),
            Box::new(durable.clone()),
        )
        .unwrap();
        first.start().unwrap();
        let created = first
            .emit("order.created", json!({"orderId": "O1"}), EventOptions::default())
            .unwrap();
        first
            .emit("order.paid", json!({"orderId": "O1"}), EventOptions::default())
            .unwrap();
        first.graceful_shutdown(std::time::Duration::from_millis(100)).await;

        let second = DistributedEventBus::with_durable(
            MeshConfig::for_testing("a", BUS),
            hub.endpoint("a"),
            Arc::new(InMemoryEventBus::new()),
            Box::new(durable),
        )
        .unwrap();
        second.start().unwrap();

        assert_eq!(second.store().len(), 2);
        assert!(second.store().get(&InstanceId::new("a"), &created.id).is_some());
        assert_eq!(second.store().vector_clock().get(&InstanceId::new("a")), 2);
    }
}
