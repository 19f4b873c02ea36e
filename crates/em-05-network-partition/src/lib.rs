//! # EM-05 Network Partition Handler
//!
//! Detects loss of connectivity between instances and keeps remote
//! operations from hammering an unreachable bus.
//!
//! **Subsystem ID:** 5
//!
//! ## Responsibilities
//!
//! - Track the last heartbeat per peer and declare a partition when fewer
//!   than `minimum_connected_instances` were heard from within
//!   `partition_timeout`.
//! - Declare healing once connectivity has held for `healing_window`; the
//!   circuit breaker is reset and healing callbacks fire.
//! - Run remote operations with retries, exponential backoff and a
//!   `CLOSED -> OPEN -> HALF_OPEN` circuit breaker.
//! - Apply the fallback mode (`readonly`, `writethrough`, `offline`) while
//!   partitioned, queueing writethrough writes for replay.
//!
//! ## Module Structure
//!
//! ```text
//! em-05-network-partition/
//! ├── domain/
//! │   ├── circuit_breaker.rs  # Breaker state machine
//! │   ├── detector.rs         # Heartbeat bookkeeping, partition/heal transitions
//! │   └── config.rs           # PartitionHandlerConfig, FallbackMode
//! └── service.rs              # NetworkPartitionHandler
//! ```

#![warn(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod domain;
pub mod service;

pub use domain::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState, FallbackMode,
    PartitionDetector, PartitionHandlerConfig, PartitionStatus,
};
pub use service::{
    Admission, NetworkPartitionHandler, OperationKind, PartitionCallback, PartitionHandlerStats,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
