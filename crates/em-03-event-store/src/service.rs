//! # Distributed Event Store Service
//!
//! Owns the local vector clock and the record table, mirrors both into a
//! [`DurableStore`], and resolves conflicting versions of the same event.
//!
//! Durable failures never fail a write: the in-memory table stays
//! authoritative and the store reports itself degraded until the next
//! successful durable write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use shared_bus::TimerSlot;
use shared_types::{now_ms, DistributedEvent, InstanceId, MeshError, MeshResult, VectorClock};
use tracing::{debug, info, warn};

use crate::adapters::InMemoryDurableStore;
use crate::domain::{resolve, storage_id, ConflictResolver, Resolution, StoreConfig, StoredRecord};
use crate::ports::outbound::{BatchOperation, DurableStore, StoreError};

const RECORD_PREFIX: &[u8] = b"rec:";
const CLOCK_KEY: &[u8] = b"meta:clock";

fn record_key(storage_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(RECORD_PREFIX.len() + storage_id.len());
    key.extend_from_slice(RECORD_PREFIX);
    key.extend_from_slice(storage_id.as_bytes());
    key
}

/// Store counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub records: usize,
    pub tombstones: usize,
    pub estimated_bytes: usize,
    pub conflicts_resolved: u64,
    pub compactions: u64,
    pub records_evicted: u64,
    pub storage_failures: u64,
    /// Last durable write failed; the in-memory table is ahead of disk.
    pub degraded: bool,
}

struct Row {
    record: StoredRecord,
    size: usize,
}

struct StoreState {
    clock: VectorClock,
    rows: HashMap<String, Row>,
    durable: Box<dyn DurableStore>,
    resolver: Option<Arc<dyn ConflictResolver>>,
    next_revision: u64,
    estimated_bytes: usize,
    stats: StoreStats,
}

impl StoreState {
    fn bump_revision(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }

    /// Replace or insert `record` and mirror it together with the clock.
    fn commit(&mut self, record: StoredRecord) -> MeshResult<()> {
        let encoded = serde_json::to_vec(&record)?;
        let size = encoded.len();

        let mut operations = vec![BatchOperation::put(record_key(&record.storage_id), encoded)];
        match serde_json::to_vec(&self.clock) {
            Ok(clock) => operations.push(BatchOperation::put(CLOCK_KEY, clock)),
            Err(e) => warn!(error = %e, "[em-03] Vector clock not serializable"),
        }
        let outcome = self.durable.atomic_batch_write(operations);
        self.note_durable(outcome);

        let storage_id = record.storage_id.clone();
        if let Some(previous) = self.rows.insert(storage_id, Row { record, size }) {
            self.estimated_bytes = self.estimated_bytes.saturating_sub(previous.size);
        }
        self.estimated_bytes += size;
        Ok(())
    }

    fn note_durable(&mut self, outcome: Result<(), StoreError>) {
        match outcome {
            Ok(()) => {
                if self.stats.degraded {
                    info!("[em-03] Durable store recovered");
                }
                self.stats.degraded = false;
            }
            Err(e) => {
                warn!(error = %e, "[em-03] Durable write failed, continuing in memory");
                self.stats.storage_failures += 1;
                self.stats.degraded = true;
            }
        }
    }

    /// Evict the oldest `eviction_fraction` of rows if over budget.
    fn compact(&mut self, config: &StoreConfig) -> usize {
        if self.estimated_bytes <= config.max_storage_bytes || self.rows.is_empty() {
            return 0;
        }

        let count = ((self.rows.len() as f64 * config.eviction_fraction).ceil() as usize)
            .clamp(1, self.rows.len());
        let mut by_age: Vec<(u64, u64, String)> = self
            .rows
            .values()
            .map(|row| {
                (
                    row.record.last_modified,
                    row.record.revision,
                    row.record.storage_id.clone(),
                )
            })
            .collect();
        by_age.sort_unstable();

        let mut operations = Vec::with_capacity(count);
        for (_, _, id) in by_age.into_iter().take(count) {
            if let Some(row) = self.rows.remove(&id) {
                self.estimated_bytes = self.estimated_bytes.saturating_sub(row.size);
                operations.push(BatchOperation::delete(record_key(&id)));
            }
        }
        let outcome = self.durable.atomic_batch_write(operations);
        self.note_durable(outcome);

        self.stats.compactions += 1;
        self.stats.records_evicted += count as u64;
        count
    }
}

struct Inner {
    instance_id: InstanceId,
    config: StoreConfig,
    state: Mutex<StoreState>,
    compaction_timer: TimerSlot,
    destroyed: AtomicBool,
}

/// Vector-clock event store for one instance.
pub struct DistributedEventStore {
    inner: Arc<Inner>,
}

impl DistributedEventStore {
    /// Store backed by a private in-memory durable store.
    pub fn new(instance_id: InstanceId, config: StoreConfig) -> MeshResult<Self> {
        Self::with_durable(instance_id, config, Box::new(InMemoryDurableStore::new()))
    }

    pub fn with_durable(
        instance_id: InstanceId,
        config: StoreConfig,
        durable: Box<dyn DurableStore>,
    ) -> MeshResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                instance_id,
                config,
                state: Mutex::new(StoreState {
                    clock: VectorClock::new(),
                    rows: HashMap::new(),
                    durable,
                    resolver: None,
                    next_revision: 0,
                    estimated_bytes: 0,
                    stats: StoreStats::default(),
                }),
                compaction_timer: TimerSlot::new(),
                destroyed: AtomicBool::new(false),
            }),
        })
    }

    /// Resolver used by `ConflictStrategy::Custom`.
    pub fn set_conflict_resolver(&self, resolver: Arc<dyn ConflictResolver>) {
        self.inner.state.lock().resolver = Some(resolver);
    }

    /// Reload records and the clock from the durable store, then start the
    /// compaction timer. Returns the number of records loaded.
    pub fn start(&self) -> usize {
        let loaded = self.reload();

        let weak = Arc::downgrade(&self.inner);
        self.inner
            .compaction_timer
            .schedule_repeating(self.inner.config.compaction_interval, move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        let evicted = inner.state.lock().compact(&inner.config);
                        if evicted > 0 {
                            info!(evicted, "[em-03] Compaction evicted records");
                        }
                    }
                }
            });

        info!(
            instance = %self.inner.instance_id,
            records = loaded,
            "[em-03] Event store started"
        );
        loaded
    }

    fn reload(&self) -> usize {
        let mut state = self.inner.state.lock();

        let clock = match state.durable.get(CLOCK_KEY) {
            Ok(Some(bytes)) => serde_json::from_slice::<VectorClock>(&bytes).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "[em-03] Durable store unavailable, starting empty");
                state.stats.storage_failures += 1;
                state.stats.degraded = true;
                return 0;
            }
        };
        if let Some(clock) = clock {
            state.clock = state.clock.merged(&clock);
        }

        let rows = match state.durable.prefix_scan(RECORD_PREFIX) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "[em-03] Record scan failed, starting empty");
                state.stats.storage_failures += 1;
                state.stats.degraded = true;
                return 0;
            }
        };

        let mut loaded = 0;
        for (key, bytes) in rows {
            let record: StoredRecord = match serde_json::from_slice(&bytes) {
                Ok(record) => record,
                Err(e) => {
                    warn!(key = %String::from_utf8_lossy(&key), error = %e, "[em-03] Skipping corrupt record");
                    continue;
                }
            };
            state.next_revision = state.next_revision.max(record.revision);
            state.clock = state.clock.merged(&record.vector_clock);
            state.estimated_bytes += bytes.len();
            state.rows.insert(
                record.storage_id.clone(),
                Row {
                    record,
                    size: bytes.len(),
                },
            );
            loaded += 1;
        }
        loaded
    }

    /// Record a locally emitted event.
    ///
    /// Advances the local clock component and stamps the returned record's
    /// event with the new clock. Storing the same event again only refreshes
    /// the row's clock and modification time.
    pub fn store_event(&self, event: &DistributedEvent) -> MeshResult<StoredRecord> {
        self.ensure_running()?;
        let inner = &self.inner;
        let mut state = inner.state.lock();

        let clock = state.clock.incremented(&inner.instance_id);
        state.clock = clock.clone();

        let id = storage_id(&event.instance_id, event.id());
        let revision = state.bump_revision();
        let record = match state.rows.get(&id) {
            Some(row) => StoredRecord {
                vector_clock: clock.clone(),
                last_modified: now_ms(),
                revision,
                ..row.record.clone()
            },
            None => StoredRecord {
                storage_id: id,
                event: event.clone(),
                vector_clock: clock.clone(),
                instance_origin: event.instance_id.clone(),
                replication_level: 1,
                last_modified: now_ms(),
                revision,
                tombstone: false,
            },
        };

        let mut record = record;
        record.event.vector_clock = Some(clock);
        state.commit(record.clone())?;
        debug!(event_id = %event.id(), "[em-03] Stored local event");
        Ok(record)
    }

    /// Record an event received from a peer, resolving conflicts with an
    /// existing version. Returns the surviving record.
    pub fn store_remote_event(&self, event: &DistributedEvent) -> MeshResult<StoredRecord> {
        self.ensure_running()?;
        let inner = &self.inner;
        let mut state = inner.state.lock();

        let remote_clock = event.vector_clock.clone().unwrap_or_default();
        let id = storage_id(&event.instance_id, event.id());
        let revision = state.bump_revision();
        let incoming = StoredRecord {
            storage_id: id.clone(),
            event: event.clone(),
            vector_clock: remote_clock.clone(),
            instance_origin: event.instance_id.clone(),
            replication_level: event.propagation_path.len().max(1) as u32,
            last_modified: now_ms(),
            revision,
            tombstone: false,
        };

        let existing = state.rows.get(&id).map(|row| row.record.clone());
        let winner = match existing {
            None => incoming,
            Some(existing)
                if !existing.tombstone
                    && existing.vector_clock == incoming.vector_clock
                    && existing.event.event == incoming.event.event =>
            {
                // Redelivery of the stored version: nothing to resolve.
                let replication_level = existing.replication_level.max(incoming.replication_level);
                debug!(storage_id = %id, "[em-03] Redelivered event absorbed");
                StoredRecord {
                    last_modified: incoming.last_modified,
                    revision,
                    replication_level,
                    ..existing
                }
            }
            Some(existing) => {
                let resolution = resolve(
                    inner.config.strategy,
                    state.resolver.as_deref(),
                    &existing,
                    &incoming,
                )?;
                let replication_level = existing.replication_level.max(incoming.replication_level);
                let mut winner = match resolution {
                    Resolution::TakeIncoming => incoming,
                    Resolution::KeepExisting => StoredRecord {
                        last_modified: incoming.last_modified,
                        revision,
                        ..existing
                    },
                };
                winner.replication_level = replication_level;
                state.stats.conflicts_resolved += 1;
                debug!(storage_id = %id, ?resolution, "[em-03] Conflict resolved");
                winner
            }
        };

        state.clock = state
            .clock
            .merged(&remote_clock)
            .incremented(&inner.instance_id);
        state.commit(winner.clone())?;
        Ok(winner)
    }

    /// Mark an event deleted. The row stays as a tombstone so a late
    /// remote copy cannot resurrect it. Returns `false` if unknown.
    pub fn remove_event(&self, origin: &InstanceId, event_id: &str) -> MeshResult<bool> {
        self.ensure_running()?;
        let inner = &self.inner;
        let mut state = inner.state.lock();

        let id = storage_id(origin, event_id);
        let Some(existing) = state.rows.get(&id).map(|row| row.record.clone()) else {
            return Ok(false);
        };

        let clock = state.clock.incremented(&inner.instance_id);
        state.clock = clock.clone();
        let revision = state.bump_revision();
        state.commit(StoredRecord {
            vector_clock: existing.vector_clock.merged(&clock),
            last_modified: now_ms(),
            revision,
            tombstone: true,
            ..existing
        })?;
        Ok(true)
    }

    /// Live records whose origin component advanced past `last_known`,
    /// oldest first.
    pub fn get_missed_events_during_partition(&self, last_known: &VectorClock) -> Vec<StoredRecord> {
        let state = self.inner.state.lock();
        let mut missed: Vec<StoredRecord> = state
            .rows
            .values()
            .map(|row| &row.record)
            .filter(|record| !record.tombstone)
            .filter(|record| record.origin_counter() > last_known.get(&record.instance_origin))
            .cloned()
            .collect();
        missed.sort_by_key(|record| (record.last_modified, record.revision));
        missed
    }

    pub fn get(&self, origin: &InstanceId, event_id: &str) -> Option<StoredRecord> {
        self.get_by_storage_id(&storage_id(origin, event_id))
    }

    pub fn get_by_storage_id(&self, storage_id: &str) -> Option<StoredRecord> {
        self.inner
            .state
            .lock()
            .rows
            .get(storage_id)
            .map(|row| row.record.clone())
    }

    /// Snapshot of the local vector clock.
    pub fn vector_clock(&self) -> VectorClock {
        self.inner.state.lock().clock.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run one compaction pass now. Returns the number of evicted records.
    pub fn compact(&self) -> usize {
        self.inner.state.lock().compact(&self.inner.config)
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.inner.state.lock();
        StoreStats {
            records: state.rows.len(),
            tombstones: state.rows.values().filter(|row| row.record.tombstone).count(),
            estimated_bytes: state.estimated_bytes,
            ..state.stats.clone()
        }
    }

    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.compaction_timer.cancel();
        info!(instance = %self.inner.instance_id, "[em-03] Event store destroyed");
    }

    fn ensure_running(&self) -> MeshResult<()> {
        if self.inner.destroyed.load(Ordering::Acquire) {
            return Err(MeshError::Shutdown);
        }
        Ok(())
    }
}

impl Drop for DistributedEventStore {
    fn drop(&mut self) {
        self.inner.compaction_timer.cancel();
    }
}
