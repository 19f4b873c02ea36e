//! # Partition Assignment
//!
//! Maps a partition key to a partition.
//!
//! - [`hash_partition`]: `stable_hash(key) % count`. Fast, but most keys move
//!   when the count changes.
//! - [`HashRing`]: virtual-node ring. Changing the count moves roughly
//!   `1/count` of the keys.
//!
//! Both use the fixed-key SipHash from `shared_types`, so every instance maps
//! a key to the same partition.

use shared_types::stable_hash;

pub fn hash_partition(key: &str, partition_count: u32) -> u32 {
    if partition_count == 0 {
        return 0;
    }
    (stable_hash(key) % u64::from(partition_count)) as u32
}

/// Consistent-hash ring of `virtual_nodes` points per partition.
#[derive(Debug, Clone)]
pub struct HashRing {
    /// `(point, partition)` sorted by point.
    points: Vec<(u64, u32)>,
    partition_count: u32,
}

impl HashRing {
    pub fn new(partition_count: u32, virtual_nodes: u32) -> Self {
        let mut points: Vec<(u64, u32)> = (0..partition_count)
            .flat_map(|partition| {
                (0..virtual_nodes).map(move |vnode| {
                    (stable_hash(&format!("partition-{partition}#{vnode}")), partition)
                })
            })
            .collect();
        points.sort_unstable();

        Self {
            points,
            partition_count,
        }
    }

    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// First ring point at or after the key's hash, wrapping to the start.
    pub fn locate(&self, key: &str) -> u32 {
        if self.points.is_empty() {
            return 0;
        }
        let hash = stable_hash(key);
        let index = self.points.partition_point(|(point, _)| *point < hash);
        self.points
            .get(index)
            .or_else(|| self.points.first())
            .map(|(_, partition)| *partition)
            .unwrap_or(0)
    }
}
