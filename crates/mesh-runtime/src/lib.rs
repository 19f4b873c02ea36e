//! # Mesh Runtime
//!
//! The distributed event bus facade. Each [`DistributedEventBus`] wraps a
//! local dispatcher and the five coordination subsystems:
//!
//! | Subsystem | Crate | Role |
//! |-----------|-------|------|
//! | 1 | `em-01-leader-election` | one leader per bus for global events |
//! | 2 | `em-02-cross-instance` | envelope transport and peer registry |
//! | 3 | `em-03-event-store` | causal storage and catch-up |
//! | 4 | `em-04-partitioner` | per-key ordering of delivered events |
//! | 5 | `em-05-network-partition` | partition detection and fallback |
//!
//! ## Event Routing
//!
//! - Every emit is dispatched locally first.
//! - Non-global events go straight to all peers.
//! - Global events (`global.` prefix by default) are sent by the leader, or
//!   relayed to it by followers; with no leader known they stay local.
//! - An event is never processed twice by the same instance: its
//!   propagation path and the store both guard against it.
//!
//! [`MeshManager`] hosts several buses sharing one transport.

#![warn(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod bus;
pub mod config;
pub mod manager;

pub use bus::{DistributedEventBus, DistributedMetrics, DistributedStatus, EventCounters};
pub use config::MeshConfig;
pub use manager::MeshManager;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
