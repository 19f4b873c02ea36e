//! # Distributed Event Bus
//!
//! One instance's view of a logical bus: a local dispatcher wrapped by the
//! five coordination subsystems.
//!
//! ## Outbound
//!
//! ```text
//! emit ──→ local dispatch ──→ eligible? ──→ leader gate ──→ fallback mode
//!                                                               │
//!              coordinator ←── partition tolerance ←── store ←── partitioner
//! ```
//!
//! ## Inbound
//!
//! ```text
//! coordinator ──→ loop check ──→ relay check ──→ duplicate check ──→ store
//!                                                                      │
//!                                  local dispatch ←── partition ordering
//! ```
//!
//! Local dispatch always happens before, and independently of, anything that
//! touches the network.

mod status;

pub use status::{DistributedMetrics, DistributedStatus, EventCounters};

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use em_01_leader_election::{LeaderElection, LeadershipChange};
use em_02_cross_instance::CrossInstanceCoordinator;
use em_03_event_store::{ConflictResolver, DistributedEventStore, DurableStore, InMemoryDurableStore};
use em_04_partitioner::EventPartitioner;
use em_05_network_partition::{Admission, NetworkPartitionHandler, OperationKind, PartitionStatus};
use mesh_telemetry::{
    EVENTS_DROPPED, EVENTS_EMITTED, EVENTS_PROPAGATED, EVENTS_RECEIVED, EVENTS_REPLAYED,
    IS_LEADER, KNOWN_INSTANCES, MESH_ERRORS, PARTITIONED, STORED_RECORDS,
};
use parking_lot::Mutex;
use shared_bus::{CallbackHandle, EventFilter, EventStream, LocalDispatcher, Subscription};
use shared_types::{
    BroadcastTransport, BusId, DistributedEvent, EventOptions, InstanceId, LocalEvent, MeshError,
    MeshResult, VectorClock,
};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::MeshConfig;

struct Inner {
    config: MeshConfig,
    dispatcher: Arc<dyn LocalDispatcher>,
    election: LeaderElection,
    coordinator: CrossInstanceCoordinator,
    store: DistributedEventStore,
    partitioner: EventPartitioner,
    partition_handler: NetworkPartitionHandler,
    counters: Mutex<EventCounters>,
    /// Store clock when the current partition began.
    partition_clock: Mutex<Option<VectorClock>>,
    in_flight: AtomicUsize,
    idle: Notify,
    started: AtomicBool,
    destroyed: AtomicBool,
}

/// A distributed event bus instance.
pub struct DistributedEventBus {
    inner: Arc<Inner>,
}

impl DistributedEventBus {
    pub fn new(
        config: MeshConfig,
        transport: Arc<dyn BroadcastTransport>,
        dispatcher: Arc<dyn LocalDispatcher>,
    ) -> MeshResult<Self> {
        Self::with_durable(config, transport, dispatcher, Box::new(InMemoryDurableStore::new()))
    }

    /// Like [`DistributedEventBus::new`] with an explicit durable store
    /// behind the event store.
    pub fn with_durable(
        config: MeshConfig,
        transport: Arc<dyn BroadcastTransport>,
        dispatcher: Arc<dyn LocalDispatcher>,
        durable: Box<dyn DurableStore>,
    ) -> MeshResult<Self> {
        config.validate()?;
        let instance_id = config.instance_id.clone();
        let bus_id = config.bus_id.clone();

        let election = LeaderElection::new(
            instance_id.clone(),
            config.priority,
            &bus_id,
            Arc::clone(&transport),
            config.election.clone(),
        )?;
        let coordinator = CrossInstanceCoordinator::new(
            instance_id.clone(),
            bus_id,
            transport,
            config.coordinator.clone(),
        )?;
        let store =
            DistributedEventStore::with_durable(instance_id.clone(), config.store.clone(), durable)?;
        let partitioner = EventPartitioner::new(instance_id.clone(), config.partition.clone())?;
        let partition_handler =
            NetworkPartitionHandler::new(instance_id, config.partition_handler.clone())?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                dispatcher,
                election,
                coordinator,
                store,
                partitioner,
                partition_handler,
                counters: Mutex::new(EventCounters::default()),
                partition_clock: Mutex::new(None),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                started: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
            }),
        })
    }

    /// Wire the subsystems together and start them.
    pub fn start(&self) -> MeshResult<()> {
        let inner = &self.inner;
        if inner.destroyed.load(Ordering::Acquire) {
            return Err(MeshError::Shutdown);
        }
        if inner.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let reloaded = inner.store.start();

        let weak = Arc::downgrade(inner);
        inner.coordinator.on_remote_event(move |event| {
            with_inner(&weak, |inner| inner.handle_remote(event));
        });

        let weak = Arc::downgrade(inner);
        inner.coordinator.on_peer_seen(move |peer| {
            with_inner(&weak, |inner| {
                inner.election.observe_peer(peer);
                inner.partition_handler.record_heartbeat(peer);
            });
        });

        let weak = Arc::downgrade(inner);
        inner.coordinator.on_peer_shutdown(move |peer| {
            with_inner(&weak, |inner| inner.partition_handler.remove_instance(peer));
        });

        let weak = Arc::downgrade(inner);
        inner.partitioner.on_partition_event(None, move |_, event| {
            with_inner(&weak, |inner| inner.deliver_remote(event));
        });

        let weak = Arc::downgrade(inner);
        inner.partition_handler.on_network_partition(move || {
            with_inner(&weak, |inner| inner.on_partition());
        });

        let weak = Arc::downgrade(inner);
        inner.partition_handler.on_partition_healed(move || {
            with_inner(&weak, |inner| inner.replay_after_heal());
        });

        let weak = Arc::downgrade(inner);
        inner.election.on_leadership_change(move |change| {
            with_inner(&weak, |inner| inner.on_leadership_change(change));
        });

        inner.coordinator.start()?;
        inner.partition_handler.start()?;
        inner.election.start()?;

        info!(
            instance = %inner.config.instance_id,
            bus = %inner.config.bus_id,
            reloaded,
            "[mesh] Distributed event bus started"
        );
        Ok(())
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.inner.config.instance_id
    }

    pub fn bus_id(&self) -> &BusId {
        &self.inner.config.bus_id
    }

    /// Dispatch an event locally, then hand it to the mesh if eligible.
    ///
    /// Returns once local dispatch completes; propagation runs in the
    /// background and its failures are logged, never returned.
    pub fn emit(
        &self,
        pattern: impl Into<String>,
        payload: serde_json::Value,
        options: EventOptions,
    ) -> MeshResult<LocalEvent> {
        let inner = &self.inner;
        if inner.destroyed.load(Ordering::Acquire) {
            return Err(MeshError::Shutdown);
        }

        let mut event = LocalEvent::new(pattern, payload).with_metadata(options.metadata);
        if let Some(source) = options.source {
            event = event.with_source(source);
        }

        let reached = inner.dispatcher.dispatch(&event);
        inner.counters.lock().emitted += 1;
        EVENTS_EMITTED.with_label_values(&[inner.bus_label()]).inc();
        debug!(event_id = %event.id, pattern = %event.pattern, reached, "[mesh] Event emitted");

        let eligible = inner.config.enable_propagation
            && !options.local_only
            && !options.disable_propagation
            && inner.started.load(Ordering::Acquire);
        if eligible {
            inner.route_outbound(event.clone());
        }
        Ok(event)
    }

    pub fn is_leader(&self) -> bool {
        self.inner.election.is_leader()
    }

    pub fn current_leader(&self) -> Option<InstanceId> {
        self.inner.election.current_leader()
    }

    /// Pull-style subscription to events dispatched on this instance, local
    /// and remote alike.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.inner.dispatcher.subscribe(filter)
    }

    pub fn event_stream(&self, filter: EventFilter) -> EventStream {
        self.inner.dispatcher.event_stream(filter)
    }

    /// Resolver for the store's custom conflict strategy.
    pub fn set_conflict_resolver(&self, resolver: Arc<dyn ConflictResolver>) {
        self.inner.store.set_conflict_resolver(resolver);
    }

    pub fn on_leadership_change<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&LeadershipChange) + Send + Sync + 'static,
    {
        self.inner.election.on_leadership_change(callback)
    }

    pub fn on_network_partition<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.partition_handler.on_network_partition(callback)
    }

    pub fn on_partition_healed<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.partition_handler.on_partition_healed(callback)
    }

    pub fn on_instance_shutdown<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&InstanceId) + Send + Sync + 'static,
    {
        self.inner.election.on_instance_shutdown(callback)
    }

    /// The event store, for catch-up queries and inspection.
    pub fn store(&self) -> &DistributedEventStore {
        &self.inner.store
    }

    pub fn partitioner(&self) -> &EventPartitioner {
        &self.inner.partitioner
    }

    pub fn get_distributed_status(&self) -> DistributedStatus {
        let inner = &self.inner;
        DistributedStatus {
            instance_id: inner.config.instance_id.clone(),
            bus_id: inner.config.bus_id.clone(),
            is_leader: inner.election.is_leader(),
            current_leader: inner.election.current_leader(),
            connected_instances: inner.coordinator.known_instances().len(),
            partition_status: inner.partition_handler.status(),
        }
    }

    pub fn get_distributed_metrics(&self) -> DistributedMetrics {
        let inner = &self.inner;
        let coordinator = inner.coordinator.stats();
        let store = inner.store.stats();
        let partitioner = inner.partitioner.metrics();
        let partition_handler = inner.partition_handler.stats();

        let bus = inner.bus_label();
        KNOWN_INSTANCES
            .with_label_values(&[bus])
            .set(coordinator.known_instances as f64);
        STORED_RECORDS.with_label_values(&[bus]).set(store.records as f64);
        PARTITIONED
            .with_label_values(&[bus])
            .set(flag(partition_handler.status != PartitionStatus::Healthy));

        DistributedMetrics {
            events: *inner.counters.lock(),
            connected_instances: coordinator.known_instances,
            leadership_duration_ms: inner
                .election
                .leadership_duration()
                .map(|d| d.as_millis() as u64),
            avg_latency_ms: coordinator.avg_latency_ms,
            partition_balance: partitioner.balance,
            coordinator,
            store,
            partitioner,
            partition_handler,
            local: inner.dispatcher.metrics(),
        }
    }

    /// Wait up to `timeout` for in-flight propagations, step down if
    /// leading, tell peers, then tear everything down.
    pub async fn graceful_shutdown(&self, timeout: Duration) {
        let inner = &self.inner;
        if inner.destroyed.load(Ordering::Acquire) {
            return;
        }
        info!(
            instance = %inner.config.instance_id,
            timeout_ms = timeout.as_millis() as u64,
            "[mesh] Graceful shutdown started"
        );

        if tokio::time::timeout(timeout, inner.wait_idle()).await.is_err() {
            warn!(
                in_flight = inner.in_flight.load(Ordering::Acquire),
                "[mesh] Shutdown timeout reached with propagations still in flight"
            );
        }

        if inner.election.is_leader() {
            inner.election.step_down();
        }
        inner.coordinator.notify_shutdown();
        inner.teardown();
    }

    /// Tear down immediately, without waiting or stepping down.
    pub fn destroy(&self) {
        self.inner.teardown();
    }
}

impl Drop for DistributedEventBus {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

impl Inner {
    fn bus_label(&self) -> &str {
        self.config.bus_id.as_str()
    }

    fn count(&self, update: impl FnOnce(&mut EventCounters)) {
        update(&mut self.counters.lock());
    }

    fn dropped(&self, reason: &str) {
        EVENTS_DROPPED
            .with_label_values(&[self.bus_label(), reason])
            .inc();
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    /// Relay flag for a global event: leaders send authoritative copies,
    /// followers ask the leader. `None` when no leader is known.
    fn relay_for(&self, pattern: &str) -> Option<bool> {
        if !self.config.is_global(pattern) {
            return Some(false);
        }
        if self.election.is_leader() {
            return Some(false);
        }
        self.election.current_leader().map(|_| true)
    }

    fn route_outbound(self: &Arc<Self>, event: LocalEvent) {
        let Some(relay) = self.relay_for(&event.pattern) else {
            self.count(|c| c.leader_gated += 1);
            self.dropped("leader_gate");
            debug!(
                event_id = %event.id,
                pattern = %event.pattern,
                "[mesh] No leader known, global event not propagated"
            );
            return;
        };

        let admission = match self.partition_handler.admit(OperationKind::Write) {
            Ok(admission) => admission,
            Err(e) => {
                self.count(|c| c.partition_rejected += 1);
                self.dropped("partition");
                debug!(event_id = %event.id, error = %e, "[mesh] Propagation refused while partitioned");
                return;
            }
        };

        let mut distributed = DistributedEvent::new(
            event,
            self.config.instance_id.clone(),
            self.config.bus_id.clone(),
        );
        distributed.relay = relay;
        self.partitioner.assign(&mut distributed);

        match self.store.store_event(&distributed) {
            Ok(record) => distributed.vector_clock = record.event.vector_clock,
            Err(e) => {
                MESH_ERRORS
                    .with_label_values(&[self.bus_label(), "storage"])
                    .inc();
                warn!(event_id = %distributed.id(), error = %e, "[mesh] Could not record local event");
            }
        }

        match admission {
            Admission::Queue => {
                self.count(|c| c.queued_for_replay += 1);
                debug!(event_id = %distributed.id(), "[mesh] Partitioned, event queued for replay");
                self.partition_handler.queue_for_replay(distributed);
            }
            Admission::Proceed => self.spawn_propagation(distributed),
        }
    }

    fn spawn_propagation(self: &Arc<Self>, event: DistributedEvent) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let result = inner
                .partition_handler
                .execute_with_partition_tolerance(|| inner.coordinator.propagate_event(&event), None)
                .await;

            match result {
                Ok(()) => {
                    inner.count(|c| c.propagated += 1);
                    EVENTS_PROPAGATED.with_label_values(&[inner.bus_label()]).inc();
                }
                Err(e) => {
                    inner.count(|c| c.propagation_failures += 1);
                    inner.dropped("error");
                    MESH_ERRORS
                        .with_label_values(&[inner.bus_label(), error_type(&e)])
                        .inc();
                    warn!(event_id = %event.id(), error = %e, "[mesh] Propagation failed, event kept locally");
                }
            }

            if inner.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
                inner.idle.notify_waiters();
            }
        });
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    fn handle_remote(self: &Arc<Self>, event: &DistributedEvent) {
        let me = &self.config.instance_id;
        if event.has_visited(me) {
            self.count(|c| c.loops_prevented += 1);
            self.dropped("loop");
            debug!(event_id = %event.id(), path = ?event.propagation_path, "[mesh] Already processed here, dropped");
            return;
        }

        let relay_request = event.relay;
        if relay_request && !(self.config.is_global(event.pattern()) && self.election.is_leader()) {
            debug!(event_id = %event.id(), "[mesh] Relay ignored, not the leader");
            return;
        }

        let duplicate = self.store.get(&event.instance_id, event.id()).is_some();
        let mut accepted = event.clone();
        accepted.append_hop(me);
        // Later versions of a known event still go through conflict resolution.
        if let Err(e) = self.store.store_remote_event(&accepted) {
            MESH_ERRORS
                .with_label_values(&[self.bus_label(), error_type(&e)])
                .inc();
            warn!(event_id = %event.id(), error = %e, "[mesh] Could not store remote event");
        }
        if duplicate {
            self.count(|c| c.duplicates_skipped += 1);
            debug!(event_id = %event.id(), "[mesh] Event already stored, not dispatched again");
            return;
        }

        if let Err(e) = self.partitioner.submit(accepted) {
            self.dropped("overflow");
            warn!(event_id = %event.id(), error = %e, "[mesh] Remote event not delivered");
        }

        if relay_request {
            // The wire copy keeps the origin-only path.
            let mut rebroadcast = event.clone();
            rebroadcast.relay = false;
            debug!(event_id = %event.id(), origin = %event.instance_id, "[mesh] Leader re-broadcasting relayed event");
            self.spawn_propagation(rebroadcast);
        }
    }

    fn deliver_remote(&self, event: &DistributedEvent) {
        let reached = self.dispatcher.dispatch(&event.event);
        self.count(|c| c.received += 1);
        EVENTS_RECEIVED.with_label_values(&[self.bus_label()]).inc();
        debug!(
            event_id = %event.id(),
            origin = %event.instance_id,
            partition = ?event.partition,
            sequence = ?event.sequence_number,
            reached,
            "[mesh] Remote event dispatched"
        );
    }

    // =========================================================================
    // LEADERSHIP AND PARTITIONS
    // =========================================================================

    fn on_leadership_change(&self, change: &LeadershipChange) {
        IS_LEADER
            .with_label_values(&[self.bus_label()])
            .set(flag(change.is_leader));
        info!(
            instance = %self.config.instance_id,
            is_leader = change.is_leader,
            previous = ?change.previous_leader,
            current = ?change.current_leader,
            "[mesh] Leadership changed"
        );
    }

    fn on_partition(&self) {
        PARTITIONED.with_label_values(&[self.bus_label()]).set(1.0);
        let mut clock = self.partition_clock.lock();
        if clock.is_none() {
            *clock = Some(self.store.vector_clock());
        }
    }

    /// Re-send what peers may have missed: writethrough writes and local
    /// events stored since the partition began.
    fn replay_after_heal(self: &Arc<Self>) {
        PARTITIONED.with_label_values(&[self.bus_label()]).set(0.0);
        let since = self.partition_clock.lock().take().unwrap_or_default();

        let mut seen = HashSet::new();
        let mut batch: Vec<DistributedEvent> = Vec::new();
        for event in self.partition_handler.drain_replay_queue() {
            if seen.insert(event.id().to_string()) {
                batch.push(event);
            }
        }
        for record in self.store.get_missed_events_during_partition(&since) {
            if record.instance_origin == self.config.instance_id
                && seen.insert(record.event_id().to_string())
            {
                batch.push(record.event);
            }
        }

        let total = batch.len();
        let mut replayed = 0u64;
        for mut event in batch {
            let Some(relay) = self.relay_for(event.pattern()) else {
                self.count(|c| c.leader_gated += 1);
                continue;
            };
            event.relay = relay;
            event.replayed = true;
            self.spawn_propagation(event);
            replayed += 1;
        }

        self.count(|c| c.replayed += replayed);
        EVENTS_REPLAYED
            .with_label_values(&[self.bus_label()])
            .inc_by(replayed as f64);
        info!(
            instance = %self.config.instance_id,
            candidates = total,
            replayed,
            "[mesh] Partition healed, missed events replayed"
        );
    }

    fn teardown(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.partition_handler.destroy();
        self.partitioner.destroy();
        self.store.destroy();
        self.coordinator.destroy();
        self.election.destroy();
        self.dispatcher.shutdown();
        IS_LEADER.with_label_values(&[self.bus_label()]).set(0.0);
        info!(
            instance = %self.config.instance_id,
            bus = %self.config.bus_id,
            "[mesh] Distributed event bus shut down"
        );
    }
}

fn with_inner(weak: &Weak<Inner>, f: impl FnOnce(&Arc<Inner>)) {
    if let Some(inner) = weak.upgrade() {
        if !inner.destroyed.load(Ordering::Acquire) {
            f(&inner);
        }
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn error_type(error: &MeshError) -> &'static str {
    match error {
        MeshError::TransportFailure(_) => "transport",
        MeshError::PayloadTooLarge { .. } => "payload_too_large",
        MeshError::ConflictResolutionFailure { .. } => "conflict",
        MeshError::StorageFailure(_) => "storage",
        MeshError::PartitionQueueOverflow { .. } => "overflow",
        MeshError::CircuitOpen { .. } => "circuit_open",
        MeshError::AcknowledgmentTimeout { .. } => "ack_timeout",
        MeshError::PartitionRejected { .. } => "partition",
        MeshError::Shutdown => "shutdown",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_bus::{InMemoryEventBus, InMemoryTransportHub};
    use std::sync::atomic::AtomicUsize;

    struct Node {
        bus: DistributedEventBus,
        local: Arc<InMemoryEventBus>,
    }

    fn node(hub: &InMemoryTransportHub, id: &str, priority: u64) -> Node {
        let local = Arc::new(InMemoryEventBus::new());
        let config = MeshConfig::for_testing(id, "orders").with_priority(priority);
        let bus = DistributedEventBus::new(config, hub.endpoint(id), local.clone()).unwrap();
        bus.start().unwrap();
        Node { bus, local }
    }

    fn counter(local: &InMemoryEventBus, pattern: &str) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        // Handle dropped on purpose: the subscription stays alive.
        let _ = local.on(pattern, move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        count
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(600)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_dispatches_locally_without_peers() {
        let hub = InMemoryTransportHub::new();
        let a = node(&hub, "a", 100);
        let seen = counter(&a.local, "order.*");

        a.bus
            .emit("order.created", serde_json::json!({"id": 1}), EventOptions::default())
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(a.bus.get_distributed_metrics().events.emitted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_reaches_peer_once() {
        let hub = InMemoryTransportHub::new();
        let a = node(&hub, "a", 100);
        let b = node(&hub, "b", 200);
        let at_b = counter(&b.local, "order.created");
        settle().await;

        a.bus
            .emit("order.created", serde_json::json!({"id": 1}), EventOptions::default())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(at_b.load(Ordering::SeqCst), 1);
        let stored = b.bus.store().len();
        assert_eq!(stored, 1);
        assert_eq!(b.bus.get_distributed_metrics().events.received, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_sees_local_and_remote_events() {
        let hub = InMemoryTransportHub::new();
        let a = node(&hub, "a", 100);
        let b = node(&hub, "b", 200);
        let mut orders = b.bus.subscribe(EventFilter::pattern("order.*"));
        settle().await;

        a.bus
            .emit("order.created", serde_json::json!({"id": 1}), EventOptions::default())
            .unwrap();
        b.bus
            .emit("order.paid", serde_json::json!({"id": 1}), EventOptions::default())
            .unwrap();
        b.bus
            .emit("invoice.sent", serde_json::json!({"id": 1}), EventOptions::default())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut patterns = Vec::new();
        while let Some(event) = orders.try_recv().unwrap() {
            patterns.push(event.pattern);
        }
        patterns.sort();
        assert_eq!(patterns, vec!["order.created", "order.paid"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_only_not_propagated() {
        let hub = InMemoryTransportHub::new();
        let a = node(&hub, "a", 100);
        let b = node(&hub, "b", 200);
        let at_b = counter(&b.local, "**");
        settle().await;

        a.bus
            .emit("order.created", serde_json::json!({}), EventOptions::local_only())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(at_b.load(Ordering::SeqCst), 0);
        assert!(a.bus.store().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_prevention_drops_visited_event() {
        let hub = InMemoryTransportHub::new();
        let a = node(&hub, "a", 100);
        let at_a = counter(&a.local, "**");

        let mut event = DistributedEvent::new(
            LocalEvent::new("order.created", serde_json::json!({})),
            InstanceId::new("b"),
            BusId::new("orders"),
        );
        event.append_hop(&InstanceId::new("a"));
        a.bus.inner.handle_remote(&event);

        assert_eq!(at_a.load(Ordering::SeqCst), 0);
        assert_eq!(a.bus.get_distributed_metrics().events.loops_prevented, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_remote_event_dispatched_once() {
        let hub = InMemoryTransportHub::new();
        let a = node(&hub, "a", 100);
        let at_a = counter(&a.local, "**");

        let event = DistributedEvent::new(
            LocalEvent::new("order.created", serde_json::json!({})),
            InstanceId::new("b"),
            BusId::new("orders"),
        );
        a.bus.inner.handle_remote(&event);
        a.bus.inner.handle_remote(&event);

        assert_eq!(at_a.load(Ordering::SeqCst), 1);
        assert_eq!(a.bus.get_distributed_metrics().events.duplicates_skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_ignored_by_follower() {
        let hub = InMemoryTransportHub::new();
        let a = node(&hub, "a", 100);
        let _b = node(&hub, "b", 200);
        settle().await;
        assert!(!a.bus.is_leader());
        let at_a = counter(&a.local, "**");

        let mut event = DistributedEvent::new(
            LocalEvent::new("global.order.created", serde_json::json!({})),
            InstanceId::new("c"),
            BusId::new("orders"),
        );
        event.relay = true;
        a.bus.inner.handle_remote(&event);

        assert_eq!(at_a.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_event_without_leader_stays_local() {
        let hub = InMemoryTransportHub::new();
        let a = node(&hub, "a", 100);
        let seen = counter(&a.local, "global.**");

        // Right after start no election has completed yet.
        a.bus
            .emit("global.config.changed", serde_json::json!({}), EventOptions::default())
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(a.bus.get_distributed_metrics().events.leader_gated, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_leader_and_peers() {
        let hub = InMemoryTransportHub::new();
        let a = node(&hub, "a", 100);
        let b = node(&hub, "b", 200);
        settle().await;

        let status = a.bus.get_distributed_status();
        assert!(!status.is_leader);
        assert_eq!(status.current_leader, Some(InstanceId::new("b")));
        assert_eq!(status.connected_instances, 1);
        assert_eq!(status.partition_status, PartitionStatus::Healthy);
        assert!(b.bus.get_distributed_status().is_leader);
        assert!(b.bus.get_distributed_metrics().leadership_duration_ms.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_shutdown_rejects_emit() {
        let hub = InMemoryTransportHub::new();
        let a = node(&hub, "a", 100);
        let _seen = counter(&a.local, "**");
        settle().await;

        a.bus.graceful_shutdown(Duration::from_millis(100)).await;
        let result = a.bus.emit("order.created", serde_json::json!({}), EventOptions::default());
        assert!(matches!(result, Err(MeshError::Shutdown)));
        assert_eq!(a.local.metrics().active_subscribers, 0);
    }
}
