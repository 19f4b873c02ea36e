//! # Event Partitioner Service
//!
//! Assigns partitions and sequence numbers to outgoing events and delivers
//! incoming events to partition handlers.
//!
//! With ordering enabled, each `(origin, partition)` stream is delivered in
//! sequence order. Streams are keyed by the partition the sender assigned, so
//! a sender running with more partitions keeps separate sequence spaces even
//! when its partitions fold onto one local partition. A gap holds the stream for at most `max_wait_time`, after
//! which everything buffered is released and the gap is counted.
//!
//! Handlers are invoked from a single drain loop, outside the state lock, so
//! a handler may submit further events without deadlocking and deliveries
//! never interleave.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use shared_bus::{CallbackHandle, CallbackRegistry, TimerSlot};
use shared_types::{now_ms, DistributedEvent, InstanceId, MeshError, MeshResult};
use tracing::{debug, info, warn};

use crate::algorithms::{hash_partition, HashRing};
use crate::domain::{
    partition_balance, partition_key, OfferError, PartitionConfig, PartitionMetrics,
    PartitionStrategy, PartitionerMetrics, SequenceBuffer,
};

/// Handler invoked with the partition and the delivered event.
pub type PartitionHandler = dyn Fn(u32, &DistributedEvent) + Send + Sync;

/// Reorder stream: events of one origin within one sender partition.
type StreamKey = (InstanceId, u32);

struct Stream {
    /// Local partition the stream's events are delivered to.
    local: u32,
    buffer: SequenceBuffer,
    gap_timer: TimerSlot,
}

fn fold(partition: u32, partition_count: u32) -> u32 {
    partition % partition_count.max(1)
}

struct PartitionerState {
    partition_count: u32,
    ring: HashRing,
    round_robin_next: u32,
    /// Next sequence number per partition for locally assigned events.
    sequences: Vec<u64>,
    streams: HashMap<StreamKey, Stream>,
    metrics: Vec<PartitionMetrics>,
    outbox: VecDeque<(u32, DistributedEvent)>,
    draining: bool,
}

impl PartitionerState {
    fn new(config: &PartitionConfig) -> Self {
        let count = config.partition_count;
        Self {
            partition_count: count,
            ring: HashRing::new(count, config.virtual_nodes),
            round_robin_next: 0,
            sequences: vec![0; count as usize],
            streams: HashMap::new(),
            metrics: (0..count).map(PartitionMetrics::new).collect(),
            outbox: VecDeque::new(),
            draining: false,
        }
    }

    fn queued_in(&self, partition: u32) -> usize {
        self.streams
            .iter()
            .filter(|(_, stream)| stream.local == partition)
            .map(|(_, stream)| stream.buffer.pending_len())
            .sum()
    }

    fn metrics_mut(&mut self, partition: u32) -> Option<&mut PartitionMetrics> {
        self.metrics.get_mut(partition as usize)
    }
}

struct Inner {
    instance_id: InstanceId,
    config: PartitionConfig,
    state: Mutex<PartitionerState>,
    handlers: CallbackRegistry<PartitionHandler>,
    destroyed: AtomicBool,
}

/// Partition assignment and ordered delivery for one instance.
pub struct EventPartitioner {
    inner: Arc<Inner>,
}

impl EventPartitioner {
    pub fn new(instance_id: InstanceId, config: PartitionConfig) -> MeshResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                instance_id,
                state: Mutex::new(PartitionerState::new(&config)),
                config,
                handlers: CallbackRegistry::new("partition"),
                destroyed: AtomicBool::new(false),
            }),
        })
    }

    pub fn partition_count(&self) -> u32 {
        self.inner.state.lock().partition_count
    }

    /// Partition for `key` under the configured strategy. Round robin
    /// ignores the key.
    pub fn partition_for_key(&self, key: &str) -> u32 {
        let mut state = self.inner.state.lock();
        Self::pick(&self.inner.config, &mut state, key)
    }

    fn pick(config: &PartitionConfig, state: &mut PartitionerState, key: &str) -> u32 {
        match config.strategy {
            PartitionStrategy::Hash => hash_partition(key, state.partition_count),
            PartitionStrategy::ConsistentHash => state.ring.locate(key),
            PartitionStrategy::RoundRobin => {
                let partition = state.round_robin_next % state.partition_count.max(1);
                state.round_robin_next = partition + 1;
                partition
            }
        }
    }

    /// Stamp a locally originated event with its partition and the next
    /// sequence number of that partition.
    pub fn assign(&self, event: &mut DistributedEvent) -> u32 {
        let key = partition_key(&event.event);
        let mut state = self.inner.state.lock();
        let partition = Self::pick(&self.inner.config, &mut state, &key);

        let sequence = match state.sequences.get_mut(partition as usize) {
            Some(counter) => {
                *counter += 1;
                *counter
            }
            None => 0,
        };
        event.partition = Some(partition);
        if self.inner.config.ordering_guarantees {
            event.sequence_number = Some(sequence);
        }
        partition
    }

    /// Deliver `event` to partition handlers, reordering if needed.
    ///
    /// Events without a partition are assigned one by key and delivered
    /// without reordering.
    pub fn submit(&self, event: DistributedEvent) -> MeshResult<()> {
        if self.inner.destroyed.load(Ordering::Acquire) {
            return Err(MeshError::Shutdown);
        }
        self.inner.enqueue(event)?;
        self.inner.drain();
        Ok(())
    }

    /// Register a handler for one partition, or for all with `None`.
    pub fn on_partition_event<F>(&self, partition: Option<u32>, handler: F) -> CallbackHandle
    where
        F: Fn(u32, &DistributedEvent) + Send + Sync + 'static,
    {
        let filtered = move |p: u32, event: &DistributedEvent| {
            if partition.map_or(true, |wanted| wanted == p) {
                handler(p, event);
            }
        };
        self.inner.handlers.register(Arc::new(filtered))
    }

    /// Change the partition count and rebuild the ring.
    ///
    /// Buffered streams keep their sequence state and are remapped onto the
    /// new local partitions.
    pub fn rebalance(&self, partition_count: u32) -> MeshResult<()> {
        let config = PartitionConfig {
            partition_count,
            ..self.inner.config.clone()
        };
        config.validate()?;

        {
            let mut state = self.inner.state.lock();
            let previous = state.partition_count;
            for ((_, wire), stream) in state.streams.iter_mut() {
                stream.local = fold(*wire, partition_count);
            }

            state.partition_count = partition_count;
            state.ring = HashRing::new(partition_count, config.virtual_nodes);
            state.sequences.resize(partition_count as usize, 0);
            state.metrics.truncate(partition_count as usize);
            for partition in previous..partition_count {
                state.metrics.push(PartitionMetrics::new(partition));
            }
            info!(from = previous, to = partition_count, "[em-04] Partitions rebalanced");
        }
        self.inner.drain();
        Ok(())
    }

    pub fn metrics(&self) -> PartitionerMetrics {
        let state = self.inner.state.lock();
        let partitions: Vec<PartitionMetrics> = state
            .metrics
            .iter()
            .map(|metrics| PartitionMetrics {
                queued: state.queued_in(metrics.partition),
                ..metrics.clone()
            })
            .collect();
        let processed: Vec<u64> = partitions.iter().map(|m| m.processed).collect();

        PartitionerMetrics {
            total_processed: processed.iter().sum(),
            total_sequence_gaps: partitions.iter().map(|m| m.sequence_gaps).sum(),
            balance: partition_balance(&processed),
            partitions,
        }
    }

    /// Cancel gap timers and drop buffered events.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.inner.state.lock();
        let dropped: usize = state.streams.values().map(|s| s.buffer.pending_len()).sum();
        for stream in state.streams.values() {
            stream.gap_timer.cancel();
        }
        state.streams.clear();
        state.outbox.clear();
        drop(state);
        self.inner.handlers.clear();
        info!(instance = %self.inner.instance_id, dropped, "[em-04] Partitioner destroyed");
    }
}

impl Drop for EventPartitioner {
    fn drop(&mut self) {
        for stream in self.inner.state.lock().streams.values() {
            stream.gap_timer.cancel();
        }
    }
}

impl Inner {
    /// Place `event` in its stream and move deliverable events to the outbox.
    fn enqueue(self: &Arc<Self>, mut event: DistributedEvent) -> MeshResult<()> {
        let mut state = self.state.lock();

        let (wire, partition) = match event.partition {
            Some(p) if p < state.partition_count => (p, p),
            Some(p) => {
                // Sender runs with more partitions; fold into range.
                let folded = fold(p, state.partition_count);
                debug!(partition = p, folded, "[em-04] Folding out-of-range partition");
                (p, folded)
            }
            None => {
                let key = partition_key(&event.event);
                let p = EventPartitioner::pick(&self.config, &mut state, &key);
                event.partition = Some(p);
                (p, p)
            }
        };

        let sequence = match (self.config.ordering_guarantees, event.sequence_number) {
            (true, Some(sequence)) => sequence,
            _ => {
                state.outbox.push_back((partition, event));
                return Ok(());
            }
        };

        let key: StreamKey = (event.instance_id.clone(), wire);
        let origin = event.instance_id.clone();
        let capacity = self.config.max_queue_size;
        let queued = state.queued_in(partition);
        let stream = state.streams.entry(key.clone()).or_insert_with(|| Stream {
            local: partition,
            buffer: SequenceBuffer::new(),
            gap_timer: TimerSlot::new(),
        });

        // The bound applies to the whole partition, not just this stream.
        let room = capacity.saturating_sub(queued - stream.buffer.pending_len());
        let before = stream.buffer.next_expected();
        let ready = match stream.buffer.offer(sequence, event, room) {
            Ok(ready) => ready,
            Err(OfferError::Full) => {
                warn!(partition, capacity, "[em-04] Partition queue overflow");
                return Err(MeshError::PartitionQueueOverflow {
                    partition,
                    capacity,
                });
            }
            Err(OfferError::DuplicateSequence) => {
                warn!(
                    origin = %origin,
                    partition = wire,
                    sequence,
                    "[em-04] Sequence already buffered, event dropped"
                );
                if let Some(metrics) = state.metrics_mut(partition) {
                    metrics.sequence_collisions += 1;
                }
                return Ok(());
            }
        };

        let progressed = stream.buffer.next_expected() != before;
        if !stream.buffer.is_waiting() {
            stream.gap_timer.cancel();
        } else if progressed || !stream.gap_timer.is_armed() {
            let weak = Arc::downgrade(self);
            let timer_key = key.clone();
            stream.gap_timer.schedule(self.config.max_wait_time, async move {
                if let Some(inner) = weak.upgrade() {
                    inner.skip_gap(&timer_key);
                }
            });
        }

        for event in ready {
            state.outbox.push_back((partition, event));
        }
        Ok(())
    }

    /// Gap timer expiry: release everything buffered for `key`.
    fn skip_gap(&self, key: &StreamKey) {
        {
            let mut state = self.state.lock();
            let Some(stream) = state.streams.get_mut(key) else { return };
            let local = stream.local;
            let flushed = stream.buffer.force_flush();
            if flushed.events.is_empty() {
                return;
            }
            warn!(
                origin = %key.0,
                partition = key.1,
                skipped = flushed.skipped,
                released = flushed.events.len(),
                "[em-04] Sequence gap skipped"
            );
            for event in flushed.events {
                state.outbox.push_back((local, event));
            }
            if let Some(metrics) = state.metrics_mut(local) {
                metrics.sequence_gaps += 1;
            }
        }
        self.drain();
    }

    /// Deliver outbox entries one at a time. Only one caller drains at once.
    fn drain(&self) {
        {
            let mut state = self.state.lock();
            if state.draining {
                return;
            }
            state.draining = true;
        }

        loop {
            let next = {
                let mut state = self.state.lock();
                match state.outbox.pop_front() {
                    Some((partition, event)) => {
                        let latency = now_ms().saturating_sub(event.event.timestamp) as f64;
                        if let Some(metrics) = state.metrics_mut(partition) {
                            metrics.record_processed(latency);
                        }
                        Some((partition, event))
                    }
                    None => {
                        state.draining = false;
                        None
                    }
                }
            };
            let Some((partition, mut event)) = next else { break };
            event.partition = Some(partition);
            self.handlers.invoke(|handler| handler(partition, &event));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_types::{BusId, EventMetadata, LocalEvent};
    use std::time::Duration;

    fn keyed_event(origin: &str, aggregate: &str, n: u64) -> DistributedEvent {
        let local = LocalEvent::new("order.updated", json!({ "n": n })).with_metadata(EventMetadata {
            aggregate_id: Some(aggregate.to_string()),
            ..EventMetadata::default()
        });
        DistributedEvent::new(local, InstanceId::new(origin), BusId::new("orders"))
    }

    fn partitioner(config: PartitionConfig) -> EventPartitioner {
        EventPartitioner::new(InstanceId::new("b"), config).unwrap()
    }

    fn record_deliveries(p: &EventPartitioner) -> Arc<Mutex<Vec<u64>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _handle = p.on_partition_event(None, move |_, event| {
            sink.lock().push(event.event.payload["n"].as_u64().unwrap_or(0));
        });
        seen
    }

    #[test]
    fn test_same_key_same_partition_with_increasing_sequence() {
        let sender = EventPartitioner::new(InstanceId::new("a"), PartitionConfig::default()).unwrap();
        let mut events: Vec<DistributedEvent> =
            (1..=5).map(|n| keyed_event("a", "order-1", n)).collect();

        let partitions: Vec<u32> = events.iter_mut().map(|e| sender.assign(e)).collect();
        assert!(partitions.windows(2).all(|w| w[0] == w[1]));
        let sequences: Vec<u64> = events.iter().filter_map(|e| e.sequence_number).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_out_of_order_events_delivered_in_sequence() {
        let sender = EventPartitioner::new(InstanceId::new("a"), PartitionConfig::default()).unwrap();
        let mut events: Vec<DistributedEvent> =
            (1..=5).map(|n| keyed_event("a", "order-1", n)).collect();
        for e in events.iter_mut() {
            sender.assign(e);
        }

        let receiver = partitioner(PartitionConfig::default());
        let seen = record_deliveries(&receiver);
        for index in [2, 0, 4, 1, 3] {
            receiver.submit(events[index].clone()).unwrap();
        }

        assert_eq!(*seen.lock(), vec![1, 2, 3, 4, 5]);
        assert_eq!(receiver.metrics().total_processed, 5);
        assert_eq!(receiver.metrics().total_sequence_gaps, 0);
    }

    #[tokio::test]
    async fn test_origins_are_ordered_independently() {
        let receiver = partitioner(PartitionConfig::default());
        let seen = record_deliveries(&receiver);

        let mut from_a = keyed_event("a", "k", 1);
        from_a.partition = Some(0);
        from_a.sequence_number = Some(1);
        let mut from_c = keyed_event("c", "k", 2);
        from_c.partition = Some(0);
        from_c.sequence_number = Some(7);

        receiver.submit(from_a).unwrap();
        receiver.submit(from_c).unwrap();
        // c's stream waits for 1..6; a's stream is unaffected.
        assert_eq!(*seen.lock(), vec![1]);
        assert_eq!(receiver.metrics().partitions[0].queued, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gap_is_skipped_after_max_wait() {
        let config = PartitionConfig {
            max_wait_time: Duration::from_millis(100),
            ..PartitionConfig::default()
        };
        let receiver = partitioner(config);
        let seen = record_deliveries(&receiver);

        for n in [1u64, 3, 4] {
            let mut e = keyed_event("a", "k", n);
            e.partition = Some(2);
            e.sequence_number = Some(n);
            receiver.submit(e).unwrap();
        }
        assert_eq!(*seen.lock(), vec![1]);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(*seen.lock(), vec![1, 3, 4]);
        assert_eq!(receiver.metrics().partitions[2].sequence_gaps, 1);
        assert_eq!(receiver.metrics().partitions[2].queued, 0);
    }

    #[tokio::test]
    async fn test_queue_overflow() {
        let receiver = partitioner(PartitionConfig {
            max_queue_size: 2,
            ..PartitionConfig::default()
        });
        for n in 2..=3 {
            let mut e = keyed_event("a", "k", n);
            e.partition = Some(1);
            e.sequence_number = Some(n);
            receiver.submit(e).unwrap();
        }

        let mut overflow = keyed_event("c", "k", 9);
        overflow.partition = Some(1);
        overflow.sequence_number = Some(9);
        assert_eq!(
            receiver.submit(overflow),
            Err(MeshError::PartitionQueueOverflow {
                partition: 1,
                capacity: 2
            })
        );
    }

    #[test]
    fn test_unordered_mode_delivers_in_arrival_order() {
        let receiver = partitioner(PartitionConfig {
            ordering_guarantees: false,
            ..PartitionConfig::default()
        });
        let seen = record_deliveries(&receiver);
        for n in [3u64, 1, 2] {
            let mut e = keyed_event("a", "k", n);
            e.sequence_number = Some(n);
            receiver.submit(e).unwrap();
        }
        assert_eq!(*seen.lock(), vec![3, 1, 2]);
    }

    #[test]
    fn test_round_robin_rotates() {
        let p = partitioner(PartitionConfig {
            partition_count: 3,
            strategy: PartitionStrategy::RoundRobin,
            ordering_guarantees: false,
            ..PartitionConfig::default()
        });
        let picks: Vec<u32> = (0..6).map(|_| p.partition_for_key("same")).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_partition_filter_on_handler() {
        let p = partitioner(PartitionConfig {
            ordering_guarantees: false,
            ..PartitionConfig::default()
        });
        let hits = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&hits);
        let _handle = p.on_partition_event(Some(4), move |partition, _| sink.lock().push(partition));

        for partition in [1u32, 4, 4, 7] {
            let mut e = keyed_event("a", "k", 0);
            e.partition = Some(partition);
            p.submit(e).unwrap();
        }
        assert_eq!(*hits.lock(), vec![4, 4]);
    }

    #[test]
    fn test_handler_may_submit_reentrantly() {
        let p = Arc::new(partitioner(PartitionConfig {
            ordering_guarantees: false,
            ..PartitionConfig::default()
        }));
        let seen = record_deliveries(&p);
        let weak = Arc::downgrade(&p);
        let _handle = p.on_partition_event(None, move |_, event| {
            if event.event.payload["n"] == 1 {
                if let Some(p) = weak.upgrade() {
                    p.submit(keyed_event("a", "k", 2)).unwrap();
                }
            }
        });

        p.submit(keyed_event("a", "k", 1)).unwrap();
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_folded_sender_partitions_keep_separate_sequences() {
        let receiver = partitioner(PartitionConfig {
            partition_count: 4,
            ..PartitionConfig::default()
        });
        let seen = record_deliveries(&receiver);

        // Sender partitions 1 and 5 both land on local partition 1.
        for (partition, sequence) in [(5u32, 2u64), (1, 2), (1, 1), (5, 1)] {
            let mut e = keyed_event("a", "k", u64::from(partition) * 10 + sequence);
            e.partition = Some(partition);
            e.sequence_number = Some(sequence);
            receiver.submit(e).unwrap();
        }
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(*seen.lock(), vec![11, 12, 51, 52]);
        let metrics = receiver.metrics();
        assert_eq!(metrics.partitions[1].processed, 4);
        assert_eq!(metrics.partitions[1].sequence_collisions, 0);
        assert_eq!(metrics.total_sequence_gaps, 0);
    }

    #[tokio::test]
    async fn test_sequence_collision_is_counted() {
        let receiver = partitioner(PartitionConfig::default());
        let seen = record_deliveries(&receiver);
        for n in [30u64, 31] {
            let mut e = keyed_event("a", "k", n);
            e.partition = Some(2);
            e.sequence_number = Some(3);
            receiver.submit(e).unwrap();
        }
        assert!(seen.lock().is_empty());
        assert_eq!(receiver.metrics().partitions[2].queued, 1);
        assert_eq!(receiver.metrics().partitions[2].sequence_collisions, 1);
    }

    #[tokio::test]
    async fn test_rebalance_keeps_buffered_streams() {
        let receiver = partitioner(PartitionConfig {
            partition_count: 8,
            ..PartitionConfig::default()
        });
        let seen = record_deliveries(&receiver);
        let mut later = keyed_event("a", "k", 2);
        later.partition = Some(6);
        later.sequence_number = Some(2);
        receiver.submit(later).unwrap();

        receiver.rebalance(4).unwrap();
        assert_eq!(receiver.metrics().partitions[2].queued, 1);

        let mut first = keyed_event("a", "k", 1);
        first.partition = Some(6);
        first.sequence_number = Some(1);
        receiver.submit(first).unwrap();
        assert_eq!(*seen.lock(), vec![1, 2]);
        assert_eq!(receiver.metrics().partitions[2].processed, 2);
    }

    #[test]
    fn test_rebalance_resizes_metrics_and_ring() {
        let p = partitioner(PartitionConfig::default());
        p.rebalance(4).unwrap();
        assert_eq!(p.partition_count(), 4);
        assert_eq!(p.metrics().partitions.len(), 4);
        assert!(p.partition_for_key("any-key") < 4);
        assert!(p.rebalance(0).is_err());
    }

    #[test]
    fn test_balance_reflects_processed_spread() {
        let p = partitioner(PartitionConfig {
            partition_count: 2,
            ordering_guarantees: false,
            ..PartitionConfig::default()
        });
        for partition in [0u32, 1, 0, 1] {
            let mut e = keyed_event("a", "k", 0);
            e.partition = Some(partition);
            p.submit(e).unwrap();
        }
        assert_eq!(p.metrics().balance, 1.0);
    }
}
