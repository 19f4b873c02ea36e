//! # Propagation Scenarios
//!
//! ```text
//! follower ──relay──→ leader ──re-broadcast──→ every instance
//!     │                                              │
//!     └──── drops its own copy (already on path) ←───┘
//! ```
//!
//! Non-global events skip the leader and go to every peer directly.

#[cfg(test)]
mod tests {
    use serde_json::json;
    use shared_bus::LocalDispatcher;
    use shared_types::{EventMetadata, EventOptions, InstanceId};

    use crate::integration::harness::{settle, Cluster};

    #[tokio::test(start_paused = true)]
    async fn test_orders_global_event_delivered_once_per_instance() {
        let cluster = Cluster::start(&[("a", 100), ("b", 200)]);
        settle(600).await;
        assert_eq!(cluster.leaders(), vec![InstanceId::new("b")]);

        let event = cluster
            .node("a")
            .bus
            .emit(
                "global.order.created",
                json!({"orderId": "O1"}),
                EventOptions::default(),
            )
            .unwrap();
        settle(200).await;

        assert_eq!(cluster.node("a").times_seen(&event.id), 1);
        assert_eq!(cluster.node("b").times_seen(&event.id), 1);

        // The leader's re-broadcast came back to the origin and was dropped.
        let a = cluster.node("a").bus.get_distributed_metrics();
        assert!(a.events.loops_prevented >= 1);
        assert_eq!(a.events.received, 0);
        let b = cluster.node("b").bus.get_distributed_metrics();
        assert_eq!(b.events.received, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relayed_event_reaches_other_followers_through_leader() {
        let cluster = Cluster::start(&[("a", 100), ("b", 300), ("c", 200)]);
        settle(600).await;

        let event = cluster
            .node("a")
            .bus
            .emit("global.config.changed", json!({"key": "tax"}), EventOptions::default())
            .unwrap();
        settle(200).await;

        for node in &cluster.nodes {
            assert_eq!(node.times_seen(&event.id), 1, "instance {}", node.id());
        }

        // c ignored the relay copy and accepted the leader's copy.
        let stored = cluster
            .node("c")
            .bus
            .store()
            .get(&InstanceId::new("a"), &event.id)
            .unwrap();
        assert!(!stored.event.relay);
        assert_eq!(
            stored.event.propagation_path,
            vec![InstanceId::new("a"), InstanceId::new("c")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_leader_global_event_sent_directly() {
        let cluster = Cluster::start(&[("a", 100), ("b", 200)]);
        settle(600).await;

        let event = cluster
            .node("b")
            .bus
            .emit("global.order.created", json!({}), EventOptions::default())
            .unwrap();
        settle(200).await;

        assert_eq!(cluster.node("a").times_seen(&event.id), 1);
        assert_eq!(cluster.node("b").times_seen(&event.id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_global_event_broadcast_to_every_peer() {
        let cluster = Cluster::start(&[("a", 100), ("b", 300), ("c", 200)]);
        settle(600).await;

        let event = cluster
            .node("c")
            .bus
            .emit("order.shipped", json!({"orderId": "O1"}), EventOptions::default())
            .unwrap();
        settle(200).await;

        for node in &cluster.nodes {
            assert_eq!(node.times_seen(&event.id), 1, "instance {}", node.id());
        }
        let stored = cluster
            .node("a")
            .bus
            .store()
            .get(&InstanceId::new("c"), &event.id)
            .unwrap();
        assert_eq!(
            stored.event.propagation_path,
            vec![InstanceId::new("c"), InstanceId::new("a")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_propagation_opt_outs_stay_local() {
        let cluster = Cluster::start(&[("a", 100), ("b", 200)]);
        settle(600).await;

        let local_only = cluster
            .node("a")
            .bus
            .emit("order.draft", json!({}), EventOptions::local_only())
            .unwrap();
        let undistributed = cluster
            .node("a")
            .bus
            .emit(
                "order.draft",
                json!({}),
                EventOptions {
                    disable_propagation: true,
                    ..EventOptions::default()
                },
            )
            .unwrap();
        settle(200).await;

        let a = cluster.node("a");
        let b = cluster.node("b");
        assert_eq!(a.times_seen(&local_only.id), 1);
        assert_eq!(a.times_seen(&undistributed.id), 1);
        assert!(b.received("order.draft").is_empty());
        assert!(a.bus.store().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_of_one_aggregate_arrive_in_emit_order() {
        let cluster = Cluster::start(&[("a", 100), ("b", 200)]);
        settle(600).await;

        for step in 0..20 {
            let options = EventOptions {
                metadata: EventMetadata {
                    aggregate_id: Some("order-7".into()),
                    ..EventMetadata::default()
                },
                ..EventOptions::default()
            };
            cluster
                .node("a")
                .bus
                .emit("order.updated", json!({"step": step}), options)
                .unwrap();
        }
        settle(300).await;

        let steps: Vec<i64> = cluster
            .node("b")
            .received("order.updated")
            .iter()
            .filter_map(|event| event.payload["step"].as_i64())
            .collect();
        assert_eq!(steps, (0..20).collect::<Vec<_>>());

        let metrics = cluster.node("b").bus.get_distributed_metrics();
        assert_eq!(metrics.partitioner.total_processed, 20);
        assert_eq!(metrics.partitioner.total_sequence_gaps, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_report_local_and_mesh_activity() {
        let cluster = Cluster::start(&[("a", 100), ("b", 200)]);
        settle(600).await;

        cluster
            .node("a")
            .bus
            .emit("order.created", json!({}), EventOptions::default())
            .unwrap();
        settle(200).await;

        let a = cluster.node("a").bus.get_distributed_metrics();
        assert_eq!(a.events.emitted, 1);
        assert_eq!(a.events.propagated, 1);
        assert_eq!(a.connected_instances, 1);
        assert_eq!(a.store.records, 1);
        assert!(a.coordinator.events_propagated >= 1);
        assert_eq!(a.local.events_processed, 1);

        let b = cluster.node("b");
        assert_eq!(b.local.metrics().events_processed, 1);
        assert!(b.bus.get_distributed_metrics().leadership_duration_ms.is_some());
    }
}
