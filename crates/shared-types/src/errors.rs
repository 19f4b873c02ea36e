//! # Error Types
//!
//! The error taxonomy shared by every coordination subsystem.
//!
//! Leadership and partition conditions are deliberately absent: they are
//! reported through status, metrics and callbacks, never as errors.

use thiserror::Error;

use crate::ports::TransportError;

/// Errors surfaced by propagation, store and partition-tolerance APIs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MeshError {
    /// Send or receive failed at the transport.
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// Serialized envelope exceeds the ceiling even after compression.
    #[error("Payload too large: {size} bytes exceeds ceiling of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// A conflict resolver failed.
    #[error("Conflict resolution failed for {storage_id}: {reason}")]
    ConflictResolutionFailure { storage_id: String, reason: String },

    /// The durable store is unavailable.
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// A partition's reorder buffer exceeded its bound.
    #[error("Partition {partition} queue overflow (capacity {capacity})")]
    PartitionQueueOverflow { partition: u32, capacity: usize },

    /// Short-circuited by an open circuit breaker.
    #[error("Circuit open: retry after {retry_after_ms}ms")]
    CircuitOpen { retry_after_ms: u64 },

    /// No acknowledgment within the configured window.
    #[error("Acknowledgment timeout for message {message_id}")]
    AcknowledgmentTimeout { message_id: String },

    /// Encoding or decoding a wire message failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration rejected by validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The active fallback mode refused the operation during a partition.
    #[error("Operation rejected during network partition ({mode} mode)")]
    PartitionRejected { mode: String },

    /// A caller-supplied operation failed.
    #[error("Operation failed: {0}")]
    OperationFailed(String),

    /// The component has been destroyed.
    #[error("Component shut down")]
    Shutdown,
}

/// Result type for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;

const NETWORK_KEYWORDS: &[&str] = &[
    "timeout",
    "timed out",
    "unreachable",
    "refused",
    "dns",
    "connection",
    "network",
    "transport",
];

impl MeshError {
    /// Whether retrying could help. Terminal errors are surfaced immediately.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            MeshError::PayloadTooLarge { .. }
                | MeshError::ConflictResolutionFailure { .. }
                | MeshError::InvalidConfig(_)
                | MeshError::Serialization(_)
                | MeshError::PartitionRejected { .. }
                | MeshError::Shutdown
        )
    }

    /// Message-content heuristic for network-related failures.
    pub fn is_network_related(&self) -> bool {
        match self {
            MeshError::TransportFailure(_) | MeshError::AcknowledgmentTimeout { .. } => true,
            MeshError::PartitionRejected { .. } | MeshError::CircuitOpen { .. } => false,
            other => {
                let message = other.to_string().to_lowercase();
                NETWORK_KEYWORDS.iter().any(|keyword| message.contains(keyword))
            }
        }
    }
}

impl From<TransportError> for MeshError {
    fn from(err: TransportError) -> Self {
        MeshError::TransportFailure(err.to_string())
    }
}

impl From<serde_json::Error> for MeshError {
    fn from(err: serde_json::Error) -> Self {
        MeshError::Serialization(err.to_string())
    }
}
