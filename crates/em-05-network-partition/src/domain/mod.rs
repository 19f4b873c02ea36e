//! # Domain Module
//!
//! Circuit breaker, heartbeat-based partition detector and configuration.

pub mod circuit_breaker;
pub mod config;
pub mod detector;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use config::{FallbackMode, PartitionHandlerConfig};
pub use detector::{PartitionDetector, PartitionStatus, Transition};
