//! # Event Mesh Test Suite
//!
//! Multi-instance scenarios running whole distributed buses over the
//! in-memory transport on a paused clock.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── harness.rs      # Cluster of buses sharing one transport hub
//!     ├── election.rs     # single leader, failover, split brain
//!     ├── propagation.rs  # relay routing, exactly-once delivery, ordering
//!     ├── partition.rs    # detection, fallback modes, heal and replay
//!     └── storage.rs      # idempotence, causal conflicts, restart
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p mesh-tests
//!
//! # By category
//! cargo test -p mesh-tests integration::partition::
//!
//! # Benchmarks
//! cargo bench -p mesh-tests
//! ```

#![allow(dead_code)]

pub mod integration;
