//! # Mesh Telemetry
//!
//! Logging initialisation and Prometheus metrics for event mesh processes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mesh_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() -> Result<(), mesh_telemetry::TelemetryError> {
//!     init_telemetry(&TelemetryConfig::from_env())?;
//!     // Application code here
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `MESH_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `MESH_JSON_LOGS` | `false` | JSON log lines instead of pretty output |
//! | `MESH_SERVICE_NAME` | `event-mesh` | Service name in logs |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{
    encode_metrics, register_metrics, EVENTS_DROPPED, EVENTS_EMITTED, EVENTS_PROPAGATED,
    EVENTS_RECEIVED, EVENTS_REPLAYED, IS_LEADER, KNOWN_INSTANCES, MESH_ERRORS, PARTITIONED,
    STORED_RECORDS,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Register metrics and install the global log subscriber.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    register_metrics()?;
    init_logging(config)
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}
