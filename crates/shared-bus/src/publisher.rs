//! # Local Dispatch Engine
//!
//! The single-instance event bus the coordination layer wraps. It delivers
//! an event to every matching local handler and stream subscriber and keeps a
//! bounded history of dispatched events.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use shared_types::LocalEvent;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::callbacks::{CallbackHandle, CallbackRegistry};
use crate::events::{pattern_matches, EventFilter};
use crate::subscriber::{EventStream, Subscription};
use crate::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_HISTORY_SIZE};

/// Failure reported by a local event handler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("Handler failed: {0}")]
    Failed(String),
}

/// Signature of a local event handler.
pub type EventHandler = dyn Fn(&LocalEvent) -> Result<(), HandlerError> + Send + Sync;

/// Counters exposed by a local dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchMetrics {
    /// Registered handlers plus live stream subscriptions.
    pub active_subscribers: usize,
    /// Events dispatched since creation.
    pub events_processed: u64,
    /// Handler invocations that failed after their retry.
    pub handler_failures: u64,
}

/// What the coordination layer needs from a local event bus.
pub trait LocalDispatcher: Send + Sync {
    /// Deliver `event` to local subscribers. Returns the number reached.
    fn dispatch(&self, event: &LocalEvent) -> usize;

    /// Pull-style subscription to events matching `filter`.
    fn subscribe(&self, filter: EventFilter) -> Subscription;

    /// `subscribe` as a `Stream`.
    fn event_stream(&self, filter: EventFilter) -> EventStream {
        EventStream::new(self.subscribe(filter))
    }

    fn metrics(&self) -> DispatchMetrics;

    /// Stop dispatching and drop every subscription.
    fn shutdown(&self);
}

struct PatternHandler {
    pattern: String,
    handler: Arc<EventHandler>,
}

/// In-memory implementation of the local event bus.
///
/// Handlers run synchronously inside `dispatch`; stream subscriptions use
/// `tokio::sync::broadcast`.
pub struct InMemoryEventBus {
    sender: broadcast::Sender<LocalEvent>,

    handlers: CallbackRegistry<PatternHandler>,

    history: Mutex<VecDeque<LocalEvent>>,

    history_size: usize,

    events_processed: AtomicU64,

    handler_failures: AtomicU64,

    closed: AtomicBool,

    capacity: usize,
}

impl InMemoryEventBus {
    /// Create a new in-memory event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new in-memory event bus with specified stream capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            handlers: CallbackRegistry::new("local-handlers"),
            history: Mutex::new(VecDeque::with_capacity(DEFAULT_HISTORY_SIZE)),
            history_size: DEFAULT_HISTORY_SIZE,
            events_processed: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            capacity,
        }
    }

    /// Register a handler for events matching `pattern`.
    pub fn on<F>(&self, pattern: impl Into<String>, handler: F) -> CallbackHandle
    where
        F: Fn(&LocalEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let pattern = pattern.into();
        debug!(pattern = %pattern, "Handler registered");
        self.handlers.register(Arc::new(PatternHandler {
            pattern,
            handler: Arc::new(handler),
        }))
    }

    /// Number of live stream subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The most recent dispatched events, oldest first, at most `limit`.
    #[must_use]
    pub fn history(&self, limit: usize) -> Vec<LocalEvent> {
        let history = self.history.lock();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Run one handler with a single retry on failure or panic.
    fn run_handler(&self, entry: &PatternHandler, event: &LocalEvent) -> bool {
        for attempt in 0..2 {
            let outcome = catch_unwind(AssertUnwindSafe(|| (entry.handler)(event)));
            match outcome {
                Ok(Ok(())) => return true,
                Ok(Err(e)) => warn!(
                    pattern = %entry.pattern,
                    event_id = %event.id,
                    attempt,
                    error = %e,
                    "Local handler failed"
                ),
                Err(_) => warn!(
                    pattern = %entry.pattern,
                    event_id = %event.id,
                    attempt,
                    "Local handler panicked"
                ),
            }
        }
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
        false
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalDispatcher for InMemoryEventBus {
    fn dispatch(&self, event: &LocalEvent) -> usize {
        if self.closed.load(Ordering::Acquire) {
            debug!(pattern = %event.pattern, "Dispatch after shutdown ignored");
            return 0;
        }

        self.events_processed.fetch_add(1, Ordering::Relaxed);
        {
            let mut history = self.history.lock();
            if history.len() == self.history_size {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        let mut reached = 0;
        for entry in self.handlers.snapshot() {
            if pattern_matches(&entry.pattern, &event.pattern) {
                self.run_handler(&entry, event);
                reached += 1;
            }
        }

        // Stream subscribers filter on their side.
        reached += self.sender.send(event.clone()).unwrap_or(0);

        debug!(pattern = %event.pattern, event_id = %event.id, reached, "Event dispatched");
        reached
    }

    fn subscribe(&self, filter: EventFilter) -> Subscription {
        debug!(patterns = ?filter.patterns, "New subscription created");
        Subscription::new(self.sender.subscribe(), filter)
    }

    fn metrics(&self) -> DispatchMetrics {
        DispatchMetrics {
            active_subscribers: self.handlers.len() + self.sender.receiver_count(),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.handlers.clear();
        self.history.lock().clear();
        debug!("Local dispatcher shut down");
    }
}
