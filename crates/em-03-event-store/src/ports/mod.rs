//! # Ports
//!
//! The store consumes a durable key-value store through [`outbound::DurableStore`].

pub mod outbound;

pub use outbound::{BatchOperation, DurableStore, StoreError};
