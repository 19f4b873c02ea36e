//! # Leader Election Scenarios
//!
//! Elections run inside full distributed buses, so leadership also decides
//! how global events are routed.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use shared_types::InstanceId;

    use crate::integration::harness::{settle, Cluster};

    #[tokio::test(start_paused = true)]
    async fn test_single_leader_with_highest_priority() {
        let cluster = Cluster::start(&[("a", 10), ("b", 30), ("c", 20)]);
        settle(600).await;

        assert_eq!(cluster.leaders(), vec![InstanceId::new("b")]);
        for node in &cluster.nodes {
            assert_eq!(node.bus.current_leader(), Some(InstanceId::new("b")));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_when_leader_goes_silent() {
        let cluster = Cluster::start(&[("a", 10), ("b", 30), ("c", 20)]);
        settle(600).await;

        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changes);
        let _handle = cluster.node("c").bus.on_leadership_change(move |change| {
            sink.lock().push(change.clone());
        });

        cluster.hub.isolate("b");
        settle(1000).await;

        assert!(cluster.node("c").bus.is_leader());
        assert!(!cluster.node("a").bus.is_leader());
        assert_eq!(cluster.node("a").bus.current_leader(), Some(InstanceId::new("c")));

        let won = changes
            .lock()
            .iter()
            .any(|change| change.is_leader && change.current_leader == Some(InstanceId::new("c")));
        assert!(won);
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_leader_shutdown_hands_over() {
        let cluster = Cluster::start(&[("a", 10), ("b", 30), ("c", 20)]);
        settle(600).await;

        let gone = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&gone);
        let _handle = cluster
            .node("a")
            .bus
            .on_instance_shutdown(move |id| sink.lock().push(id.clone()));

        cluster
            .node("b")
            .bus
            .graceful_shutdown(Duration::from_millis(100))
            .await;
        settle(400).await;

        assert!(gone.lock().contains(&InstanceId::new("b")));
        assert!(cluster.node("c").bus.is_leader());
        assert_eq!(cluster.node("a").bus.current_leader(), Some(InstanceId::new("c")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_split_brain_resolves_to_highest_rank() {
        let cluster = Cluster::start(&[("a", 10), ("b", 20)]);
        settle(600).await;
        assert_eq!(cluster.leaders(), vec![InstanceId::new("b")]);

        cluster.hub.disconnect("a", "b");
        settle(1000).await;
        // Each side elected itself.
        assert_eq!(cluster.leaders().len(), 2);

        cluster.hub.reconnect("a", "b");
        settle(1000).await;

        assert_eq!(cluster.leaders(), vec![InstanceId::new("b")]);
        assert_eq!(cluster.node("a").bus.current_leader(), Some(InstanceId::new("b")));
    }
}
