//! # EM-01 Leader Election
//!
//! Fully decentralized, Bully-style leader election between the instances of
//! one logical bus.
//!
//! **Subsystem ID:** 1
//! **Architecture:** Hexagonal (pure state machine + service wiring)
//!
//! ## Protocol
//!
//! | Message | Sent when | Receiver reaction |
//! |---------|-----------|-------------------|
//! | `ELECTION` | election starts | higher-ranked instances reply `ELECTION_OK` |
//! | `ELECTION_OK` | a lower candidate is seen | candidate defers and awaits `COORDINATOR` |
//! | `COORDINATOR` | an election is won | higher or equal: follow; lower: challenge |
//! | `HEARTBEAT` | every `heartbeat_interval` while leader | resets the leadership timer |
//! | `STEP_DOWN` | leader relinquishes | followers re-elect after jitter |
//! | `SHUTDOWN` | instance leaves | peers evict it, re-elect if it led |
//!
//! Ranks compare by `(priority, instance_id)`, so every instance agrees on
//! the winner without communication.
//!
//! ## Split-Brain Correction
//!
//! A `COORDINATOR` or `HEARTBEAT` from a leader ranked below the receiver
//! starts a challenge election. A leader that hears a heartbeat from a
//! higher-ranked leader steps down. A leader whose heartbeats cannot be sent
//! steps down as self-isolated.
//!
//! ## Module Structure
//!
//! ```text
//! em-01-leader-election/
//! ├── domain/     # ElectionConfig, ElectionMessage, ElectionCore state machine
//! └── service.rs  # LeaderElection: transport, timers, callbacks
//! ```

#![warn(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod domain;
pub mod service;

pub use domain::{
    ElectionAction, ElectionConfig, ElectionCore, ElectionMessage, ElectionState,
    LeadershipChange, MessageKind, PeerRecord,
};
pub use service::{
    InstanceShutdownCallback, LeaderElection, LeadershipCallback, ELECTION_CHANNEL,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
