//! # Domain Module
//!
//! Envelope format, compression, peer registry, statistics and configuration.

pub mod compression;
pub mod config;
pub mod envelope;
pub mod registry;
pub mod stats;

pub use compression::{
    CompressionConfig, CompressionError, NoOpCompressor, PayloadCompressor, ZstdCompressor,
};
pub use config::CoordinatorConfig;
pub use envelope::{Envelope, EnvelopeKind};
pub use registry::{InstanceInfo, InstanceRegistry};
pub use stats::{CoordinatorStats, Ema};
