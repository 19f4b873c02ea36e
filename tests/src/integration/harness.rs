//! Test fixtures: a cluster of distributed buses on one in-memory hub.

use std::sync::Arc;
use std::time::Duration;

use mesh_runtime::{DistributedEventBus, MeshConfig};
use parking_lot::Mutex;
use shared_bus::{InMemoryEventBus, InMemoryTransportHub};
use shared_types::{InstanceId, LocalEvent};

pub const BUS: &str = "orders";

/// One instance: the distributed bus plus everything its local bus saw.
pub struct Node {
    pub bus: DistributedEventBus,
    pub local: Arc<InMemoryEventBus>,
    seen: Arc<Mutex<Vec<LocalEvent>>>,
}

impl Node {
    pub fn start(hub: &InMemoryTransportHub, id: &str, priority: u64) -> Self {
        Self::start_with(hub, MeshConfig::for_testing(id, BUS).with_priority(priority))
    }

    pub fn start_with(hub: &InMemoryTransportHub, config: MeshConfig) -> Self {
        let local = Arc::new(InMemoryEventBus::new());
        let endpoint = hub.endpoint(config.instance_id.as_str());
        let bus = DistributedEventBus::new(config, endpoint, local.clone())
            .expect("valid test config");
        bus.start().expect("bus starts");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        // Lives as long as the local bus.
        let _ = local.on("**", move |event| {
            sink.lock().push(event.clone());
            Ok(())
        });

        Self { bus, local, seen }
    }

    pub fn id(&self) -> &InstanceId {
        self.bus.instance_id()
    }

    /// Events dispatched locally with exactly this pattern.
    pub fn received(&self, pattern: &str) -> Vec<LocalEvent> {
        self.seen
            .lock()
            .iter()
            .filter(|event| event.pattern == pattern)
            .cloned()
            .collect()
    }

    /// How many times the event with `id` was dispatched locally.
    pub fn times_seen(&self, id: &str) -> usize {
        self.seen.lock().iter().filter(|event| event.id == id).count()
    }
}

pub struct Cluster {
    pub hub: InMemoryTransportHub,
    pub nodes: Vec<Node>,
}

impl Cluster {
    /// Start one node per `(id, priority)` pair.
    pub fn start(members: &[(&str, u64)]) -> Self {
        let hub = InMemoryTransportHub::new();
        let nodes = members
            .iter()
            .map(|(id, priority)| Node::start(&hub, id, *priority))
            .collect();
        Self { hub, nodes }
    }

    pub fn node(&self, id: &str) -> &Node {
        self.nodes
            .iter()
            .find(|node| node.id().as_str() == id)
            .expect("node exists")
    }

    pub fn leaders(&self) -> Vec<InstanceId> {
        self.nodes
            .iter()
            .filter(|node| node.bus.is_leader())
            .map(|node| node.id().clone())
            .collect()
    }
}

/// Advance the paused clock.
pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
