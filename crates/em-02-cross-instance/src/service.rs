//! # Cross-Instance Coordinator Service
//!
//! Moves distributed events between instances of one bus and keeps the peer
//! registry fresh.
//!
//! ```text
//! propagate_event ──→ JSON ──→ [zstd] ──→ Envelope ──→ transport.send (retry)
//!
//! transport ──→ decode ──→ bus / self / duplicate filter ──→ registry touch
//!           ──→ EVENT: [unzstd] ──→ JSON ──→ on_remote_event callbacks
//! ```
//!
//! Propagation is at-most-once and best effort.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use shared_bus::{CallbackHandle, CallbackRegistry, TimeBoundedSeenCache, TimerSlot};
use shared_types::{
    now_ms, BroadcastTransport, BusId, DistributedEvent, InstanceId, MeshError, MeshResult,
};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::domain::{
    CompressionConfig, CoordinatorConfig, CoordinatorStats, Ema, Envelope, EnvelopeKind,
    InstanceRegistry, PayloadCompressor, ZstdCompressor,
};

/// Transport subsystem name of the event channel.
pub const EVENTS_CHANNEL: &str = "events";

/// Callback invoked for every accepted inbound event.
pub type RemoteEventCallback = dyn Fn(&DistributedEvent) + Send + Sync;

/// Callback invoked with a peer instance id.
pub type PeerCallback = dyn Fn(&InstanceId) + Send + Sync;

struct CoordinatorState {
    registry: InstanceRegistry,
    seen: TimeBoundedSeenCache<Uuid>,
    pending_acks: HashMap<Uuid, oneshot::Sender<()>>,
    counters: CoordinatorStats,
    latency: Ema,
    compression_ratio: Ema,
}

struct Inner {
    instance_id: InstanceId,
    bus_id: BusId,
    channel: String,
    config: CoordinatorConfig,
    transport: Arc<dyn BroadcastTransport>,
    compressor: Box<dyn PayloadCompressor>,
    state: Mutex<CoordinatorState>,
    ping_timer: TimerSlot,
    receive_loop: TimerSlot,
    remote_callbacks: CallbackRegistry<RemoteEventCallback>,
    peer_seen_callbacks: CallbackRegistry<PeerCallback>,
    peer_left_callbacks: CallbackRegistry<PeerCallback>,
    peer_shutdown_callbacks: CallbackRegistry<PeerCallback>,
    started: AtomicBool,
    destroyed: AtomicBool,
}

/// Envelope transport between the instances of one bus.
pub struct CrossInstanceCoordinator {
    inner: Arc<Inner>,
}

impl CrossInstanceCoordinator {
    pub fn new(
        instance_id: InstanceId,
        bus_id: BusId,
        transport: Arc<dyn BroadcastTransport>,
        config: CoordinatorConfig,
    ) -> MeshResult<Self> {
        config.validate()?;
        let compressor = ZstdCompressor::new(CompressionConfig {
            level: config.compression_level,
            enabled: true,
        });

        Ok(Self {
            inner: Arc::new(Inner {
                channel: bus_id.channel(EVENTS_CHANNEL),
                instance_id,
                bus_id,
                transport,
                compressor: Box::new(compressor),
                state: Mutex::new(CoordinatorState {
                    registry: InstanceRegistry::new(),
                    seen: TimeBoundedSeenCache::with_config(
                        config.dedup_window,
                        Duration::from_secs(10),
                    ),
                    pending_acks: HashMap::new(),
                    counters: CoordinatorStats::default(),
                    latency: Ema::new(config.ema_alpha),
                    compression_ratio: Ema::new(config.ema_alpha),
                }),
                config,
                ping_timer: TimerSlot::new(),
                receive_loop: TimerSlot::new(),
                remote_callbacks: CallbackRegistry::new("remote-event"),
                peer_seen_callbacks: CallbackRegistry::new("peer-seen"),
                peer_left_callbacks: CallbackRegistry::new("peer-left"),
                peer_shutdown_callbacks: CallbackRegistry::new("peer-shutdown"),
                started: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
            }),
        })
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.inner.instance_id
    }

    pub fn bus_id(&self) -> &BusId {
        &self.inner.bus_id
    }

    /// Subscribe to the event channel, start the health protocol and
    /// announce this instance.
    pub fn start(&self) -> MeshResult<()> {
        if self.inner.destroyed.load(Ordering::Acquire) {
            return Err(MeshError::Shutdown);
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut receiver = self.inner.transport.subscribe(&self.inner.channel)?;
        let weak = Arc::downgrade(&self.inner);
        self.inner.receive_loop.adopt(tokio::spawn(async move {
            while let Some(bytes) = receiver.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.handle_bytes(&bytes);
            }
        }));

        let weak = Arc::downgrade(&self.inner);
        self.inner
            .ping_timer
            .schedule_repeating(self.inner.config.ping_interval, move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.health_tick();
                    }
                }
            });

        self.inner.send_control(EnvelopeKind::Registry);
        info!(
            instance = %self.inner.instance_id,
            bus = %self.inner.bus_id,
            "[em-02] Coordinator started"
        );
        Ok(())
    }

    /// Broadcast `event` to every peer on the bus.
    ///
    /// Waits for an `ACK` when `require_acks` is configured.
    pub async fn propagate_event(&self, event: &DistributedEvent) -> MeshResult<()> {
        self.propagate(event, self.inner.config.require_acks).await
    }

    /// Broadcast `event` and wait for at least one peer to acknowledge it.
    pub async fn propagate_event_with_ack(&self, event: &DistributedEvent) -> MeshResult<()> {
        self.propagate(event, true).await
    }

    async fn propagate(&self, event: &DistributedEvent, requires_ack: bool) -> MeshResult<()> {
        let inner = &self.inner;
        if inner.destroyed.load(Ordering::Acquire) {
            return Err(MeshError::Shutdown);
        }

        let (envelope, bytes) = match inner.seal_event(event, requires_ack) {
            Ok(sealed) => sealed,
            Err(e) => {
                inner.state.lock().counters.events_dropped += 1;
                return Err(e);
            }
        };

        let ack = requires_ack.then(|| {
            let (tx, rx) = oneshot::channel();
            inner.state.lock().pending_acks.insert(envelope.message_id, tx);
            rx
        });

        if let Err(e) = inner.send_with_retry(bytes).await {
            let mut state = inner.state.lock();
            state.pending_acks.remove(&envelope.message_id);
            state.counters.events_dropped += 1;
            warn!(event_id = %event.id(), error = %e, "[em-02] Propagation failed");
            return Err(e);
        }
        inner.state.lock().counters.events_propagated += 1;
        debug!(
            event_id = %event.id(),
            pattern = %event.pattern(),
            compressed = envelope.compressed,
            "[em-02] Event propagated"
        );

        let Some(ack) = ack else { return Ok(()) };
        match tokio::time::timeout(inner.config.ack_timeout, ack).await {
            Ok(Ok(())) => Ok(()),
            _ => {
                inner.state.lock().pending_acks.remove(&envelope.message_id);
                Err(MeshError::AcknowledgmentTimeout {
                    message_id: envelope.message_id.to_string(),
                })
            }
        }
    }

    /// Best-effort `SHUTDOWN` broadcast.
    pub fn notify_shutdown(&self) {
        self.inner.send_control(EnvelopeKind::Shutdown);
    }

    /// Cancel timers, abandon pending acknowledgments and leave the channel.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.ping_timer.cancel();
        self.inner.receive_loop.cancel();
        self.inner.state.lock().pending_acks.clear();
        self.inner.transport.close(&self.inner.channel);
        self.inner.remote_callbacks.clear();
        self.inner.peer_seen_callbacks.clear();
        self.inner.peer_left_callbacks.clear();
        self.inner.peer_shutdown_callbacks.clear();
        info!(instance = %self.inner.instance_id, "[em-02] Coordinator destroyed");
    }

    pub fn on_remote_event<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&DistributedEvent) + Send + Sync + 'static,
    {
        self.inner.remote_callbacks.register(Arc::new(callback))
    }

    /// Invoked for every accepted envelope with its sender.
    pub fn on_peer_seen<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&InstanceId) + Send + Sync + 'static,
    {
        self.inner.peer_seen_callbacks.register(Arc::new(callback))
    }

    /// Invoked when a peer announces shutdown or is evicted as stale.
    pub fn on_peer_left<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&InstanceId) + Send + Sync + 'static,
    {
        self.inner.peer_left_callbacks.register(Arc::new(callback))
    }

    /// Invoked only when a peer announced its own shutdown.
    pub fn on_peer_shutdown<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&InstanceId) + Send + Sync + 'static,
    {
        self.inner.peer_shutdown_callbacks.register(Arc::new(callback))
    }

    pub fn known_instances(&self) -> Vec<InstanceId> {
        self.inner.state.lock().registry.instance_ids()
    }

    pub fn stats(&self) -> CoordinatorStats {
        let state = self.inner.state.lock();
        CoordinatorStats {
            avg_compression_ratio: state.compression_ratio.value(),
            avg_latency_ms: state.latency.value(),
            known_instances: state.registry.len(),
            ..state.counters.clone()
        }
    }
}

impl Drop for CrossInstanceCoordinator {
    fn drop(&mut self) {
        self.inner.ping_timer.cancel();
        self.inner.receive_loop.cancel();
    }
}

impl Inner {
    // =========================================================================
    // OUTBOUND
    // =========================================================================

    /// Build and encode the `EVENT` envelope, compressing when needed.
    fn seal_event(
        &self,
        event: &DistributedEvent,
        requires_ack: bool,
    ) -> MeshResult<(Envelope, Vec<u8>)> {
        let payload = serde_json::to_vec(event)?;
        let original_len = payload.len();
        let max = self.config.max_message_bytes;

        let mut envelope = Envelope::new(
            EnvelopeKind::Event,
            self.instance_id.clone(),
            self.bus_id.clone(),
            payload,
        );
        envelope.requires_ack = requires_ack;
        let mut bytes = envelope.encode()?;

        let wants_compression =
            bytes.len() > max || original_len >= self.config.compression_threshold;
        if wants_compression && self.compressor.is_enabled() {
            let compressed = self
                .compressor
                .compress(&envelope.payload)
                .map_err(|e| MeshError::Serialization(e.to_string()))?;
            if compressed.len() < original_len {
                self.state
                    .lock()
                    .compression_ratio
                    .record(compressed.len() as f64 / original_len.max(1) as f64);
                envelope.payload = compressed;
                envelope.compressed = true;
                bytes = envelope.encode()?;
            }
        }

        if bytes.len() > max {
            return Err(MeshError::PayloadTooLarge {
                size: bytes.len(),
                max,
            });
        }
        Ok((envelope, bytes))
    }

    async fn send_with_retry(&self, bytes: Vec<u8>) -> MeshResult<()> {
        let attempts = self.config.max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = self
                    .config
                    .retry_base_delay
                    .saturating_mul(1u32 << (attempt - 1).min(16));
                tokio::time::sleep(backoff).await;
            }
            match self.transport.send(&self.channel, bytes.clone()) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(attempt, error = %e, "[em-02] Send attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(MeshError::TransportFailure(format!(
            "{} (after {} attempts)",
            last_error.map(|e| e.to_string()).unwrap_or_default(),
            attempts
        )))
    }

    fn send_control(&self, kind: EnvelopeKind) {
        let envelope = Envelope::new(kind, self.instance_id.clone(), self.bus_id.clone(), Vec::new());
        self.send_envelope(&envelope);
    }

    fn send_envelope(&self, envelope: &Envelope) {
        let sent = envelope
            .encode()
            .and_then(|bytes| Ok(self.transport.send(&self.channel, bytes)?));
        if let Err(e) = sent {
            debug!(kind = ?envelope.kind, error = %e, "[em-02] Control message not sent");
        }
    }

    fn health_tick(&self) {
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }
        self.send_control(EnvelopeKind::Ping);

        let evicted = self
            .state
            .lock()
            .registry
            .evict_stale(Instant::now(), self.config.instance_timeout);
        for id in evicted {
            warn!(instance = %id, "[em-02] Instance timed out");
            self.peer_left_callbacks.invoke(|callback| callback(&id));
        }
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    fn handle_bytes(&self, bytes: &[u8]) {
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }
        let envelope = match Envelope::decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "[em-02] Dropping undecodable envelope");
                self.state.lock().counters.events_dropped += 1;
                return;
            }
        };

        if envelope.bus_id != self.bus_id {
            trace!(bus = %envelope.bus_id, "[em-02] Ignoring envelope for foreign bus");
            return;
        }
        if envelope.sender_id == self.instance_id {
            return;
        }

        let first_contact = {
            let mut state = self.state.lock();
            if !state.seen.check_and_insert(envelope.message_id) {
                state.counters.duplicates_suppressed += 1;
                return;
            }
            let latency = now_ms().saturating_sub(envelope.timestamp) as f64;
            state.latency.record(latency);

            envelope.kind != EnvelopeKind::Shutdown
                && state.registry.touch(&envelope.sender_id, Instant::now())
        };

        let sender = &envelope.sender_id;
        if envelope.kind != EnvelopeKind::Shutdown {
            self.peer_seen_callbacks.invoke(|callback| callback(sender));
        }
        if first_contact {
            debug!(instance = %sender, "[em-02] New instance discovered");
        }

        match envelope.kind {
            EnvelopeKind::Event => self.accept_event(&envelope),
            EnvelopeKind::Ack => {
                let mut state = self.state.lock();
                state.counters.acks_received += 1;
                if let Some(tx) = envelope.acked_id().and_then(|id| state.pending_acks.remove(&id)) {
                    let _ = tx.send(());
                }
            }
            EnvelopeKind::Ping => self.send_control(EnvelopeKind::Pong),
            EnvelopeKind::Pong => {}
            EnvelopeKind::Registry => {
                if first_contact {
                    self.send_control(EnvelopeKind::Registry);
                }
            }
            EnvelopeKind::Shutdown => {
                let removed = self.state.lock().registry.remove(sender);
                if removed {
                    info!(instance = %sender, "[em-02] Instance announced shutdown");
                    self.peer_left_callbacks.invoke(|callback| callback(sender));
                    self.peer_shutdown_callbacks.invoke(|callback| callback(sender));
                }
            }
        }
    }

    fn accept_event(&self, envelope: &Envelope) {
        let event = match self.open_event(envelope) {
            Ok(event) => event,
            Err(e) => {
                warn!(sender = %envelope.sender_id, error = %e, "[em-02] Dropping malformed event");
                self.state.lock().counters.events_dropped += 1;
                return;
            }
        };

        if event.instance_id == self.instance_id {
            trace!(event_id = %event.id(), "[em-02] Ignoring own event echoed back");
            return;
        }

        self.state.lock().counters.events_received += 1;
        if envelope.requires_ack {
            let ack = Envelope::ack(
                self.instance_id.clone(),
                self.bus_id.clone(),
                envelope.message_id,
            );
            self.send_envelope(&ack);
        }

        self.remote_callbacks.invoke(|callback| callback(&event));
    }

    fn open_event(&self, envelope: &Envelope) -> MeshResult<DistributedEvent> {
        let event = if envelope.compressed {
            let payload = self
                .compressor
                .decompress(&envelope.payload)
                .map_err(|e| MeshError::Serialization(e.to_string()))?;
            serde_json::from_slice(&payload)?
        } else {
            serde_json::from_slice(&envelope.payload)?
        };
        Ok(event)
    }
}
