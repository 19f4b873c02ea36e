//! # Outbound Ports
//!
//! Traits for the collaborators the coordination layer consumes but does not
//! implement.

use thiserror::Error;
use tokio::sync::mpsc;

/// Errors reported by a transport adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The channel was closed on this endpoint.
    #[error("Channel {0} is closed")]
    ChannelClosed(String),

    /// The transport refused or failed to send.
    #[error("Send failed on channel {channel}: {reason}")]
    SendFailed { channel: String, reason: String },
}

/// Stream of raw messages delivered on one channel subscription.
pub type TransportReceiver = mpsc::UnboundedReceiver<Vec<u8>>;

/// Unordered, unreliable multicast of byte messages to every reachable
/// instance listening on the same channel name.
///
/// No delivery, ordering or duplication guarantees are made. A message is
/// never delivered back to the endpoint that sent it.
pub trait BroadcastTransport: Send + Sync {
    /// Broadcast `message` on `channel`.
    fn send(&self, channel: &str, message: Vec<u8>) -> Result<(), TransportError>;

    /// Start receiving messages sent by other endpoints on `channel`.
    fn subscribe(&self, channel: &str) -> Result<TransportReceiver, TransportError>;

    /// Stop receiving on `channel` and refuse further sends on it.
    fn close(&self, channel: &str);
}
