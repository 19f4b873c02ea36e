//! # EM-02 Cross-Instance Coordinator
//!
//! Moves distributed events between the instances of one bus over a
//! [`BroadcastTransport`](shared_types::BroadcastTransport) and maintains a
//! registry of live peers.
//!
//! **Subsystem ID:** 2
//!
//! ## Envelope Kinds
//!
//! | Kind | Purpose |
//! |------|---------|
//! | `EVENT` | JSON `DistributedEvent`, zstd compressed when large |
//! | `ACK` | acknowledges an `EVENT` sent with `requires_ack` |
//! | `PING` / `PONG` | periodic liveness probe |
//! | `REGISTRY` | presence announcement, answered once by new peers |
//! | `SHUTDOWN` | graceful departure |
//!
//! Envelopes for another bus id, envelopes from this instance and envelopes
//! whose message id was already seen are dropped before any processing.
//!
//! ## Module Structure
//!
//! ```text
//! em-02-cross-instance/
//! ├── domain/     # Envelope, compression, InstanceRegistry, stats, config
//! └── service.rs  # CrossInstanceCoordinator
//! ```

#![warn(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod domain;
pub mod service;

pub use domain::{
    CompressionConfig, CompressionError, CoordinatorConfig, CoordinatorStats, Envelope,
    EnvelopeKind, InstanceInfo, InstanceRegistry, PayloadCompressor, ZstdCompressor,
};
pub use service::{CrossInstanceCoordinator, PeerCallback, RemoteEventCallback, EVENTS_CHANNEL};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
