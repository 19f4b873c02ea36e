//! # Shared Bus - Runtime Primitives for the Event Mesh
//!
//! Everything the coordination subsystems share at runtime but that is not
//! itself part of the coordination protocol.
//!
//! ```text
//! ┌──────────────┐  emit   ┌────────────────────┐  dispatch  ┌─────────────┐
//! │ Application  │ ──────→ │  Mesh facade       │ ─────────→ │ InMemory    │
//! └──────────────┘         │  (mesh-runtime)    │            │ EventBus    │
//!                          └─────────┬──────────┘            └─────────────┘
//!                                    │ send / subscribe
//!                                    ▼
//!                          ┌────────────────────┐
//!                          │ InMemoryTransport  │  (any BroadcastTransport)
//!                          └────────────────────┘
//! ```
//!
//! ## Contents
//!
//! - **Local dispatch engine**: [`InMemoryEventBus`] with callback and stream
//!   subscriptions filtered by dotted patterns
//! - **Transport adapter**: [`InMemoryTransportHub`] with fault injection
//! - **Seen cache**: time-bounded duplicate suppression for message ids
//! - **Timers**: [`TimerSlot`], an individually cancelable scheduled task
//! - **Callbacks**: [`CallbackRegistry`] with explicit unsubscribe handles

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod callbacks;
pub mod events;
pub mod publisher;
pub mod seen_cache;
pub mod subscriber;
pub mod timer;
pub mod transport;

// Re-export main types
pub use callbacks::{CallbackHandle, CallbackRegistry};
pub use events::{pattern_matches, EventFilter};
pub use publisher::{DispatchMetrics, HandlerError, InMemoryEventBus, LocalDispatcher};
pub use seen_cache::TimeBoundedSeenCache;
pub use subscriber::{EventStream, Subscription, SubscriptionError};
pub use timer::TimerSlot;
pub use transport::{InMemoryTransport, InMemoryTransportHub};

/// Maximum events to buffer per stream subscriber before lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Number of recently dispatched events kept in local history.
pub const DEFAULT_HISTORY_SIZE: usize = 500;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacity() {
        assert_eq!(DEFAULT_CHANNEL_CAPACITY, 1000);
        assert!(DEFAULT_HISTORY_SIZE < DEFAULT_CHANNEL_CAPACITY);
    }
}
