//! # Callback Registry
//!
//! Subscribe/unsubscribe bookkeeping for the notification channels exposed
//! by every subsystem (leadership change, partition, healing, shutdown, ...).
//!
//! A panicking callback never aborts dispatch to the remaining callbacks: the
//! panic is logged, the callback is retried once, and dispatch continues.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{error, warn};

struct RegistryInner<T: ?Sized> {
    next_id: u64,
    callbacks: BTreeMap<u64, Arc<T>>,
}

/// Ordered set of callbacks of one kind.
pub struct CallbackRegistry<T: ?Sized> {
    name: &'static str,
    inner: Arc<Mutex<RegistryInner<T>>>,
}

impl<T: ?Sized + Send + Sync + 'static> CallbackRegistry<T> {
    /// Create an empty registry. `name` only appears in logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(RegistryInner {
                next_id: 0,
                callbacks: BTreeMap::new(),
            })),
        }
    }

    /// Register a callback and return its unsubscribe handle.
    pub fn register(&self, callback: Arc<T>) -> CallbackHandle {
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.callbacks.insert(id, callback);
            id
        };

        let weak: Weak<Mutex<RegistryInner<T>>> = Arc::downgrade(&self.inner);
        CallbackHandle {
            unsubscribe: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.lock().callbacks.remove(&id);
                }
            })),
        }
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.inner.lock().callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the currently registered callbacks, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.inner.lock().callbacks.values().cloned().collect()
    }

    /// Remove every callback.
    pub fn clear(&self) {
        self.inner.lock().callbacks.clear();
    }

    /// Invoke every callback with `call`.
    ///
    /// The registry lock is released before any callback runs, so callbacks
    /// may register or unsubscribe freely.
    pub fn invoke<F>(&self, call: F)
    where
        F: Fn(&T),
    {
        for callback in self.snapshot() {
            if catch_unwind(AssertUnwindSafe(|| call(&callback))).is_ok() {
                continue;
            }
            warn!(registry = self.name, "Callback panicked, retrying once");
            if catch_unwind(AssertUnwindSafe(|| call(&callback))).is_err() {
                error!(registry = self.name, "Callback failed on retry, skipping");
            }
        }
    }
}

/// Handle returned by a subscription. Call [`CallbackHandle::unsubscribe`]
/// to stop receiving notifications; dropping the handle keeps the
/// subscription alive.
pub struct CallbackHandle {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Remove the callback from its registry.
    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandle").finish_non_exhaustive()
    }
}
