//! # Leader Election Service
//!
//! Wires the [`ElectionCore`] state machine to the broadcast transport and
//! the tokio timers.
//!
//! All state sits behind one mutex. Transport handlers, timers and API calls
//! lock it, compute actions, release it, then perform the actions. The lock
//! is never held while sending or while user callbacks run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use shared_bus::{CallbackHandle, CallbackRegistry, TimerSlot};
use shared_types::{
    BroadcastTransport, BusId, InstanceId, MeshError, MeshResult, Rank,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{
    ElectionAction, ElectionConfig, ElectionCore, ElectionMessage, ElectionState,
    LeadershipChange, MessageKind,
};

/// Transport subsystem name of the election channel.
pub const ELECTION_CHANNEL: &str = "election";

/// Callback invoked when the known leader changes.
pub type LeadershipCallback = dyn Fn(&LeadershipChange) + Send + Sync;

/// Callback invoked when a peer shuts down or is evicted as inactive.
pub type InstanceShutdownCallback = dyn Fn(&InstanceId) + Send + Sync;

/// Decentralized Bully-style leader election for one instance.
pub struct LeaderElection {
    inner: Arc<Inner>,
}

struct Inner {
    config: ElectionConfig,
    channel: String,
    transport: Arc<dyn BroadcastTransport>,
    core: Mutex<ElectionCore>,
    election_timer: TimerSlot,
    leadership_timer: TimerSlot,
    heartbeat_timer: TimerSlot,
    restart_timer: TimerSlot,
    sweep_timer: TimerSlot,
    receive_loop: TimerSlot,
    leadership_callbacks: CallbackRegistry<LeadershipCallback>,
    shutdown_callbacks: CallbackRegistry<InstanceShutdownCallback>,
    started: AtomicBool,
    destroyed: AtomicBool,
}

impl LeaderElection {
    /// Create an election participant. `priority` defaults to a value derived
    /// from `instance_id`.
    pub fn new(
        instance_id: InstanceId,
        priority: Option<u64>,
        bus_id: &BusId,
        transport: Arc<dyn BroadcastTransport>,
        config: ElectionConfig,
    ) -> MeshResult<Self> {
        config.validate()?;
        let rank = match priority {
            Some(priority) => Rank::new(instance_id, priority),
            None => Rank::derived(instance_id),
        };

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                channel: bus_id.channel(ELECTION_CHANNEL),
                transport,
                core: Mutex::new(ElectionCore::new(rank)),
                election_timer: TimerSlot::new(),
                leadership_timer: TimerSlot::new(),
                heartbeat_timer: TimerSlot::new(),
                restart_timer: TimerSlot::new(),
                sweep_timer: TimerSlot::new(),
                receive_loop: TimerSlot::new(),
                leadership_callbacks: CallbackRegistry::new("leadership-change"),
                shutdown_callbacks: CallbackRegistry::new("instance-shutdown"),
                started: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
            }),
        })
    }

    /// Join the election channel and run the first election.
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
            .sweep_timer
            .schedule_repeating(self.inner.config.leadership_timeout, move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.sweep();
                    }
                }
            });

        let rank = self.rank();
        info!(
            "[em-01] Election started for {} (priority {})",
            rank.instance_id, rank.priority
        );
        self.start_election();
        Ok(())
    }

    /// Begin a new election round now.
    pub fn start_election(&self) {
        if self.inner.destroyed.load(Ordering::Acquire) {
            return;
        }
        let actions = self.inner.core.lock().start_election(Instant::now());
        self.inner.apply(actions);
    }

    /// Relinquish leadership; re-election follows after a random jitter.
    pub fn step_down(&self) {
        self.inner.step_down();
    }

    /// Announce departure, cancel every timer and leave the channel.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let actions = self.inner.core.lock().shutdown(Instant::now());
        self.inner.apply(actions);
        self.inner.cancel_timers();
        self.inner.transport.close(&self.inner.channel);
        self.inner.leadership_callbacks.clear();
        self.inner.shutdown_callbacks.clear();
        info!("[em-01] Election participant destroyed");
    }

    pub fn is_leader(&self) -> bool {
        self.inner.core.lock().is_leader()
    }

    pub fn current_leader(&self) -> Option<InstanceId> {
        self.inner.core.lock().current_leader().cloned()
    }

    pub fn state(&self) -> ElectionState {
        self.inner.core.lock().state()
    }

    pub fn rank(&self) -> Rank {
        self.inner.core.lock().rank().clone()
    }

    /// Time since this instance became leader, if it is.
    pub fn leadership_duration(&self) -> Option<Duration> {
        self.inner
            .core
            .lock()
            .leader_since()
            .map(|since| since.elapsed())
    }

    /// Instances heard on the election channel and not yet evicted.
    pub fn known_instances(&self) -> Vec<InstanceId> {
        self.inner.core.lock().peers().keys().cloned().collect()
    }

    /// Refresh a known peer's liveness from traffic seen outside the
    /// election channel. Followers are otherwise silent here.
    pub fn observe_peer(&self, instance_id: &InstanceId) {
        self.inner.core.lock().touch(instance_id, Instant::now());
    }

    /// Subscribe to leader changes.
    pub fn on_leadership_change<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&LeadershipChange) + Send + Sync + 'static,
    {
        self.inner.leadership_callbacks.register(Arc::new(callback))
    }

    /// Subscribe to peer departures (explicit shutdown or inactivity).
    pub fn on_instance_shutdown<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&InstanceId) + Send + Sync + 'static,
    {
        self.inner.shutdown_callbacks.register(Arc::new(callback))
    }
}

impl Drop for LeaderElection {
    fn drop(&mut self) {
        self.inner.cancel_timers();
    }
}

impl Inner {
    fn handle_bytes(self: &Arc<Self>, bytes: &[u8]) {
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }
        let message = match ElectionMessage::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "[em-01] Dropping undecodable election message");
                return;
            }
        };
        let actions = self.core.lock().on_message(&message, Instant::now());
        self.apply(actions);
    }

    fn step_down(self: &Arc<Self>) {
        let actions = self.core.lock().step_down(Instant::now());
        if !actions.is_empty() {
            info!("[em-01] Stepping down from leadership");
        }
        self.apply(actions);
    }

    fn sweep(self: &Arc<Self>) {
        let actions = self
            .core
            .lock()
            .sweep(Instant::now(), self.config.inactive_after());
        self.apply(actions);
    }

    fn apply(self: &Arc<Self>, actions: Vec<ElectionAction>) {
        // Applied after the batch so a fresh leader finishes its transition
        // before giving it up.
        let mut lost_reach = false;
        for action in actions {
            match action {
                ElectionAction::Broadcast(kind) => {
                    if !self.broadcast(kind) {
                        lost_reach |= matches!(
                            kind,
                            MessageKind::Heartbeat | MessageKind::Coordinator
                        );
                    }
                }
                ElectionAction::ArmElectionTimer { round } => {
                    let weak = Arc::downgrade(self);
                    self.election_timer
                        .schedule(self.config.election_timeout, async move {
                            with_inner(&weak, |inner| {
                                let actions =
                                    inner.core.lock().on_election_timeout(round, Instant::now());
                                inner.apply(actions);
                            });
                        });
                }
                ElectionAction::CancelElectionTimer => self.election_timer.cancel(),
                ElectionAction::ArmLeadershipTimer { epoch } => {
                    let weak = Arc::downgrade(self);
                    self.leadership_timer
                        .schedule(self.config.leadership_timeout, async move {
                            with_inner(&weak, |inner| {
                                let actions = inner
                                    .core
                                    .lock()
                                    .on_leadership_timeout(epoch, Instant::now());
                                if !actions.is_empty() {
                                    warn!("[em-01] Leader heartbeat timed out");
                                }
                                inner.apply(actions);
                            });
                        });
                }
                ElectionAction::CancelLeadershipTimer => self.leadership_timer.cancel(),
                ElectionAction::StartHeartbeats => {
                    let weak = Arc::downgrade(self);
                    self.heartbeat_timer
                        .schedule_repeating(self.config.heartbeat_interval, move || {
                            let weak = weak.clone();
                            async move {
                                with_inner(&weak, |inner| {
                                    let actions = inner.core.lock().heartbeat();
                                    inner.apply(actions);
                                });
                            }
                        });
                }
                ElectionAction::StopHeartbeats => self.heartbeat_timer.cancel(),
                ElectionAction::ScheduleElection => {
                    let jitter = self.jitter();
                    debug!(?jitter, "[em-01] Re-election scheduled");
                    let weak = Arc::downgrade(self);
                    self.restart_timer.schedule(jitter, async move {
                        with_inner(&weak, |inner| {
                            let actions = inner.core.lock().on_scheduled_election(Instant::now());
                            inner.apply(actions);
                        });
                    });
                }
                ElectionAction::LeadershipChanged(change) => {
                    if change.is_leader {
                        info!(
                            previous = ?change.previous_leader,
                            "[em-01] Became leader"
                        );
                    } else {
                        debug!(leader = ?change.current_leader, "[em-01] Leader changed");
                    }
                    self.leadership_callbacks.invoke(|callback| callback(&change));
                }
                ElectionAction::InstanceGone(id) => {
                    info!(instance = %id, "[em-01] Instance left the bus");
                    self.shutdown_callbacks.invoke(|callback| callback(&id));
                }
            }
        }
        // A leader that cannot announce itself or heartbeat stops asserting
        // leadership.
        if lost_reach {
            self.step_down();
        }
    }

    /// Returns whether the message left this instance.
    fn broadcast(&self, kind: MessageKind) -> bool {
        let message = self.core.lock().message(kind);
        let sent = message
            .encode()
            .and_then(|bytes| Ok(self.transport.send(&self.channel, bytes)?));

        let Err(e) = sent else { return true };
        warn!(?kind, error = %e, "[em-01] Election broadcast failed");
        if kind == MessageKind::Election {
            self.core.lock().mark_isolated();
        }
        false
    }

    fn jitter(&self) -> Duration {
        let max = self.config.step_down_jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }

    fn cancel_timers(&self) {
        self.election_timer.cancel();
        self.leadership_timer.cancel();
        self.heartbeat_timer.cancel();
        self.restart_timer.cancel();
        self.sweep_timer.cancel();
        self.receive_loop.cancel();
    }
}

fn with_inner(weak: &Weak<Inner>, f: impl FnOnce(&Arc<Inner>)) {
    if let Some(inner) = weak.upgrade() {
        if !inner.destroyed.load(Ordering::Acquire) {
            f(&inner);
        }
    }
}
