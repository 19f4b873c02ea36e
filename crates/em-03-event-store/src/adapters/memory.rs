use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::ports::outbound::{BatchOperation, DurableStore, StoreError};

/// In-memory durable store.
///
/// Clones share the same data, so a test can hand one clone to an event
/// store and inspect or fail the other. Failure injection makes every call
/// return `StoreError::Unavailable`.
#[derive(Clone, Default)]
pub struct InMemoryDurableStore {
    data: Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }
}

impl DurableStore for InMemoryDurableStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.check()?;
        Ok(self.data.lock().get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.check()?;
        self.data.lock().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.check()?;
        self.data.lock().remove(key);
        Ok(())
    }

    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), StoreError> {
        self.check()?;
        let mut data = self.data.lock();
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOperation::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.check()?;
        Ok(self
            .data
            .lock()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_store_roundtrip_and_scan() {
        let mut store = InMemoryDurableStore::new();
        store.put(b"rec:1", b"one").unwrap();
        store
            .atomic_batch_write(vec![
                BatchOperation::put(b"rec:2".to_vec(), b"two".to_vec()),
                BatchOperation::put(b"meta:clock".to_vec(), b"{}".to_vec()),
            ])
            .unwrap();

        assert_eq!(store.get(b"rec:1").unwrap(), Some(b"one".to_vec()));
        let scanned = store.prefix_scan(b"rec:").unwrap();
        assert_eq!(scanned.len(), 2);

        store.delete(b"rec:1").unwrap();
        assert_eq!(store.prefix_scan(b"rec:").unwrap().len(), 1);
    }

    #[test]
    fn test_clones_share_data_and_failure_switch() {
        let mut store = InMemoryDurableStore::new();
        let observer = store.clone();
        store.put(b"k", b"v").unwrap();
        assert_eq!(observer.len(), 1);

        observer.set_failing(true);
        assert_eq!(store.put(b"k2", b"v"), Err(StoreError::Unavailable));
        assert_eq!(observer.len(), 1);
    }
}
