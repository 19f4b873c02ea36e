//! Cross-subsystem scenarios.

pub mod harness;

mod election;
mod partition;
mod propagation;
mod storage;
