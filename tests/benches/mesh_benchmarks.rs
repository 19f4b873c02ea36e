//! # Event Mesh Benchmarks
//!
//! | Subsystem | Operation | Target |
//! |-----------|-----------|--------|
//! | em-03 Event Store | local write with clock advance | < 10µs |
//! | em-03 Event Store | remote write with conflict check | < 20µs |
//! | em-04 Partitioner | hash and ring assignment | < 1µs |
//! | shared-types | vector clock merge and compare | < 1µs |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use em_03_event_store::{DistributedEventStore, StoreConfig};
use em_04_partitioner::{hash_partition, HashRing};
use serde_json::json;
use shared_types::{BusId, DistributedEvent, InstanceId, LocalEvent, VectorClock};
use std::time::Duration;

fn event(origin: &str, n: u64) -> DistributedEvent {
    DistributedEvent::new(
        LocalEvent::new("order.created", json!({ "orderId": n, "total": 99.5 })),
        InstanceId::new(origin),
        BusId::new("orders"),
    )
}

fn clock(instances: u64, base: u64) -> VectorClock {
    (0..instances)
        .map(|i| (InstanceId::new(format!("instance-{i}")), base + i))
        .collect()
}

// ============================================================================
// EM-03: Event Store
// ============================================================================

fn bench_store_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("em-03-event-store");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("store_local_event", |b| {
        let store = DistributedEventStore::new(InstanceId::new("a"), StoreConfig::default())
            .expect("valid config");
        let mut n = 0;
        b.iter(|| {
            n += 1;
            black_box(store.store_event(&event("a", n)).is_ok())
        })
    });

    group.bench_function("store_remote_duplicate", |b| {
        let store = DistributedEventStore::new(InstanceId::new("b"), StoreConfig::default())
            .expect("valid config");
        let mut remote = event("a", 1);
        remote.vector_clock = Some(clock(3, 1));
        b.iter(|| black_box(store.store_remote_event(&remote).is_ok()))
    });

    group.finish();
}

// ============================================================================
// EM-04: Partitioner
// ============================================================================

fn bench_partition_assignment(c: &mut Criterion) {
    let mut group = c.benchmark_group("em-04-partitioner");
    let keys: Vec<String> = (0..1000).map(|i| format!("order-{i}")).collect();

    group.throughput(Throughput::Elements(keys.len() as u64));
    group.bench_function("hash_partition", |b| {
        b.iter(|| {
            for key in &keys {
                black_box(hash_partition(key, 16));
            }
        })
    });

    for virtual_nodes in [16, 64, 256] {
        let ring = HashRing::new(16, virtual_nodes);
        group.bench_with_input(
            BenchmarkId::new("ring_locate", virtual_nodes),
            &ring,
            |b, ring| {
                b.iter(|| {
                    for key in &keys {
                        black_box(ring.locate(key));
                    }
                })
            },
        );
    }

    group.finish();
}

// ============================================================================
// Vector Clocks
// ============================================================================

fn bench_vector_clocks(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector-clock");

    for instances in [3, 10, 50] {
        let left = clock(instances, 1);
        let right = clock(instances, 2);
        group.bench_with_input(
            BenchmarkId::new("merge", instances),
            &(left.clone(), right.clone()),
            |b, (l, r)| b.iter(|| black_box(l.merged(r))),
        );
        group.bench_with_input(
            BenchmarkId::new("compare", instances),
            &(left, right),
            |b, (l, r)| b.iter(|| black_box(l.compare(r))),
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_store_writes,
    bench_partition_assignment,
    bench_vector_clocks
);
criterion_main!(benches);
