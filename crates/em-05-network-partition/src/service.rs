//! # Network Partition Handler Service
//!
//! Watches peer heartbeats for loss of connectivity, runs remote operations
//! behind retries and a circuit breaker, and applies the configured fallback
//! mode while the instance is cut off.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use shared_bus::{CallbackHandle, CallbackRegistry, TimerSlot};
use shared_types::{DistributedEvent, InstanceId, MeshError, MeshResult};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{
    CircuitBreaker, CircuitBreakerStats, CircuitState, FallbackMode, PartitionDetector,
    PartitionHandlerConfig, PartitionStatus, Transition,
};

/// Invoked on partition detection and on healing.
pub type PartitionCallback = dyn Fn() + Send + Sync;

/// Kind of operation asking for admission during a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Write,
}

/// Admission decision for an operation that would involve remote instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Proceed,
    /// Apply locally and hand the event to [`NetworkPartitionHandler::queue_for_replay`].
    Queue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionHandlerStats {
    pub status: PartitionStatus,
    pub connected_instances: usize,
    pub known_instances: usize,
    pub partitions_detected: u64,
    pub heals: u64,
    pub operations_succeeded: u64,
    pub operations_failed: u64,
    pub fallbacks_served: u64,
    pub circuit_state: CircuitState,
    pub breaker: CircuitBreakerStats,
    pub queued_writes: usize,
    pub dropped_writes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    partitions_detected: u64,
    heals: u64,
    operations_succeeded: u64,
    operations_failed: u64,
    fallbacks_served: u64,
    dropped_writes: u64,
}

struct HandlerState {
    detector: PartitionDetector,
    breaker: CircuitBreaker,
    replay_queue: VecDeque<DistributedEvent>,
    counters: Counters,
}

struct Inner {
    instance_id: InstanceId,
    config: PartitionHandlerConfig,
    state: Mutex<HandlerState>,
    monitor_timer: TimerSlot,
    partition_callbacks: CallbackRegistry<PartitionCallback>,
    healed_callbacks: CallbackRegistry<PartitionCallback>,
    started: AtomicBool,
    destroyed: AtomicBool,
}

/// Partition detection and partition-tolerant execution for one instance.
pub struct NetworkPartitionHandler {
    inner: Arc<Inner>,
}

impl NetworkPartitionHandler {
    pub fn new(instance_id: InstanceId, config: PartitionHandlerConfig) -> MeshResult<Self> {
        config.validate()?;
        let state = HandlerState {
            detector: PartitionDetector::new(
                config.partition_timeout,
                config.minimum_connected_instances,
                config.healing_window,
            ),
            breaker: CircuitBreaker::new(config.breaker_config()),
            replay_queue: VecDeque::new(),
            counters: Counters::default(),
        };
        Ok(Self {
            inner: Arc::new(Inner {
                instance_id,
                config,
                state: Mutex::new(state),
                monitor_timer: TimerSlot::new(),
                partition_callbacks: CallbackRegistry::new("network-partition"),
                healed_callbacks: CallbackRegistry::new("partition-healed"),
                started: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
            }),
        })
    }

    /// Start the periodic connectivity check.
    pub fn start(&self) -> MeshResult<()> {
        if self.inner.destroyed.load(Ordering::Acquire) {
            return Err(MeshError::Shutdown);
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner
            .monitor_timer
            .schedule_repeating(self.inner.config.monitor_interval, move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        if !inner.destroyed.load(Ordering::Acquire) {
                            inner.check_partition_status();
                        }
                    }
                }
            });

        info!(
            instance = %self.inner.instance_id,
            mode = %self.inner.config.fallback_mode,
            "[em-05] Partition monitor started"
        );
        Ok(())
    }

    pub fn record_heartbeat(&self, instance: &InstanceId) {
        if *instance == self.inner.instance_id {
            return;
        }
        self.inner
            .state
            .lock()
            .detector
            .record_heartbeat(instance.clone(), Instant::now());
    }

    /// Forget a peer that shut down gracefully, so its absence is not
    /// mistaken for a partition.
    pub fn remove_instance(&self, instance: &InstanceId) {
        if self.inner.state.lock().detector.remove(instance) {
            debug!(peer = %instance, "[em-05] Peer removed from heartbeat tracking");
        }
    }

    /// Run one detection step immediately.
    pub fn check_partition_status(&self) {
        self.inner.check_partition_status();
    }

    /// Declare a partition outside the heartbeat check. Re-declaring is a no-op.
    pub fn declare_partition(&self, reason: &str) {
        self.inner.declare_partition(reason);
    }

    pub fn status(&self) -> PartitionStatus {
        self.inner.state.lock().detector.status()
    }

    /// True while partitioned or still healing.
    pub fn is_partitioned(&self) -> bool {
        self.inner.state.lock().detector.is_partitioned()
    }

    pub fn connected_instances(&self) -> usize {
        self.inner.state.lock().detector.connected_count(Instant::now())
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.inner.state.lock().breaker.state()
    }

    pub fn fallback_mode(&self) -> FallbackMode {
        self.inner.config.fallback_mode
    }

    /// Run `operation` with retries, exponential backoff and the circuit
    /// breaker.
    ///
    /// Terminal errors are returned at once. Once retries are exhausted, or
    /// while the circuit is open, `fallback` is returned when given. A final
    /// network-related failure declares a partition.
    pub async fn execute_with_partition_tolerance<T, F, Fut>(
        &self,
        mut operation: F,
        fallback: Option<T>,
    ) -> MeshResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = MeshResult<T>>,
    {
        if self.inner.destroyed.load(Ordering::Acquire) {
            return Err(MeshError::Shutdown);
        }
        let mode = self.inner.config.fallback_mode;
        if mode == FallbackMode::Offline && self.is_partitioned() {
            return self.inner.serve_fallback(
                fallback,
                MeshError::PartitionRejected {
                    mode: mode.to_string(),
                },
            );
        }

        let max_attempts = self.inner.config.max_retries;
        let mut last_error = MeshError::OperationFailed("operation was not attempted".into());

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.inner.config.retry_delay(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "[em-05] Retrying operation");
                tokio::time::sleep(delay).await;
            }

            let permit = self.inner.state.lock().breaker.try_acquire(Instant::now());
            if let Err(wait) = permit {
                debug!(
                    retry_after_ms = wait.as_millis() as u64,
                    "[em-05] Circuit open, short-circuiting operation"
                );
                return self.inner.serve_fallback(
                    fallback,
                    MeshError::CircuitOpen {
                        retry_after_ms: wait.as_millis() as u64,
                    },
                );
            }

            match operation().await {
                Ok(value) => {
                    let mut state = self.inner.state.lock();
                    state.breaker.record_success();
                    state.counters.operations_succeeded += 1;
                    return Ok(value);
                }
                Err(err) => {
                    let retryable = err.is_retryable();
                    {
                        let mut state = self.inner.state.lock();
                        state.counters.operations_failed += 1;
                        // Rejected payloads are not evidence of a bad link.
                        if retryable || err.is_network_related() {
                            state.breaker.record_failure(Instant::now());
                        } else {
                            state.breaker.release();
                        }
                    }
                    if !retryable {
                        return Err(err);
                    }
                    warn!(attempt, max_attempts, error = %err, "[em-05] Operation attempt failed");
                    last_error = err;
                }
            }
        }

        if last_error.is_network_related() {
            self.inner.declare_partition(&last_error.to_string());
        }
        self.inner.serve_fallback(fallback, last_error)
    }

    /// Decide how an operation involving remote instances is handled under
    /// the current partition status and fallback mode.
    pub fn admit(&self, kind: OperationKind) -> MeshResult<Admission> {
        if !self.is_partitioned() {
            return Ok(Admission::Proceed);
        }
        let mode = self.inner.config.fallback_mode;
        match (mode, kind) {
            (FallbackMode::Offline, _) | (FallbackMode::ReadOnly, OperationKind::Write) => {
                Err(MeshError::PartitionRejected {
                    mode: mode.to_string(),
                })
            }
            (FallbackMode::WriteThrough, OperationKind::Write) => Ok(Admission::Queue),
            (_, OperationKind::Read) => Ok(Admission::Proceed),
        }
    }

    /// Hold a locally applied event until the partition heals.
    pub fn queue_for_replay(&self, event: DistributedEvent) {
        let capacity = self.inner.config.replay_queue_capacity;
        let mut state = self.inner.state.lock();
        if state.replay_queue.len() >= capacity {
            if let Some(dropped) = state.replay_queue.pop_front() {
                state.counters.dropped_writes += 1;
                warn!(event = %dropped.id(), capacity, "[em-05] Replay queue full, dropping oldest write");
            }
        }
        state.replay_queue.push_back(event);
    }

    /// Take every queued write, oldest first.
    pub fn drain_replay_queue(&self) -> Vec<DistributedEvent> {
        self.inner.state.lock().replay_queue.drain(..).collect()
    }

    pub fn replay_queue_len(&self) -> usize {
        self.inner.state.lock().replay_queue.len()
    }

    pub fn on_network_partition<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.partition_callbacks.register(Arc::new(callback))
    }

    pub fn on_partition_healed<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.healed_callbacks.register(Arc::new(callback))
    }

    pub fn stats(&self) -> PartitionHandlerStats {
        let state = self.inner.state.lock();
        let now = Instant::now();
        PartitionHandlerStats {
            status: state.detector.status(),
            connected_instances: state.detector.connected_count(now),
            known_instances: state.detector.known_count(),
            partitions_detected: state.counters.partitions_detected,
            heals: state.counters.heals,
            operations_succeeded: state.counters.operations_succeeded,
            operations_failed: state.counters.operations_failed,
            fallbacks_served: state.counters.fallbacks_served,
            circuit_state: state.breaker.state(),
            breaker: state.breaker.stats(),
            queued_writes: state.replay_queue.len(),
            dropped_writes: state.counters.dropped_writes,
        }
    }

    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.monitor_timer.cancel();
        self.inner.partition_callbacks.clear();
        self.inner.healed_callbacks.clear();
        debug!(instance = %self.inner.instance_id, "[em-05] Partition handler destroyed");
    }
}

impl Inner {
    fn check_partition_status(&self) {
        let transition = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let transition = state.detector.evaluate(now);
            match transition {
                Transition::PartitionDetected => state.counters.partitions_detected += 1,
                Transition::Healed => {
                    state.counters.heals += 1;
                    state.breaker.reset();
                }
                _ => {}
            }
            transition
        };

        match transition {
            Transition::PartitionDetected => {
                warn!(
                    instance = %self.instance_id,
                    min_connected = self.config.minimum_connected_instances,
                    "[em-05] Network partition detected: too few peers heard from"
                );
                self.partition_callbacks.invoke(|cb| cb());
            }
            Transition::HealingStarted => {
                info!(instance = %self.instance_id, "[em-05] Connectivity recovered, healing");
            }
            Transition::HealingAborted => {
                warn!(instance = %self.instance_id, "[em-05] Connectivity lost again while healing");
            }
            Transition::Healed => {
                info!(instance = %self.instance_id, "[em-05] Partition healed");
                self.healed_callbacks.invoke(|cb| cb());
            }
            Transition::None => {}
        }
    }

    fn declare_partition(&self, reason: &str) {
        let declared = {
            let mut state = self.state.lock();
            let declared = state.detector.declare_partition(Instant::now());
            if declared {
                state.counters.partitions_detected += 1;
            }
            declared
        };
        if declared {
            warn!(instance = %self.instance_id, reason, "[em-05] Network partition declared");
            self.partition_callbacks.invoke(|cb| cb());
        }
    }

    fn serve_fallback<T>(&self, fallback: Option<T>, err: MeshError) -> MeshResult<T> {
        match fallback {
            Some(value) => {
                self.state.lock().counters.fallbacks_served += 1;
                debug!(error = %err, "[em-05] Serving fallback value");
                Ok(value)
            }
            None => Err(err),
        }
    }
}

impl Drop for NetworkPartitionHandler {
    fn drop(&mut self) {
        self.inner.monitor_timer.cancel();
    }
}
