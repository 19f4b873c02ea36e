//! # Domain Module
//!
//! Pure election logic: configuration, wire messages and the state machine.

pub mod config;
pub mod messages;
pub mod state_machine;

pub use config::ElectionConfig;
pub use messages::{ElectionMessage, MessageKind};
pub use state_machine::{
    ElectionAction, ElectionCore, ElectionState, LeadershipChange, PeerRecord,
};
