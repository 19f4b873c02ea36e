//! # Cross-Instance Envelope
//!
//! Wire frame for everything the coordinator sends. Envelopes are bincode
//! encoded; an `EVENT` payload is the JSON form of a `DistributedEvent`,
//! optionally zstd compressed.

use serde::{Deserialize, Serialize};
use shared_types::{now_ms, BusId, InstanceId, MeshError, MeshResult, PROTOCOL_VERSION};
use uuid::Uuid;

/// Kind of a cross-instance envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvelopeKind {
    Event,
    Ack,
    Ping,
    Pong,
    Shutdown,
    Registry,
}

/// One cross-instance message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u16,
    pub kind: EnvelopeKind,
    pub message_id: Uuid,
    pub sender_id: InstanceId,
    pub bus_id: BusId,
    /// Sender wall clock, milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub payload: Vec<u8>,
    pub compressed: bool,
    pub requires_ack: bool,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, sender_id: InstanceId, bus_id: BusId, payload: Vec<u8>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind,
            message_id: Uuid::new_v4(),
            sender_id,
            bus_id,
            timestamp: now_ms(),
            payload,
            compressed: false,
            requires_ack: false,
        }
    }

    /// `ACK` for the envelope `acked`.
    pub fn ack(sender_id: InstanceId, bus_id: BusId, acked: Uuid) -> Self {
        Self::new(EnvelopeKind::Ack, sender_id, bus_id, acked.as_bytes().to_vec())
    }

    /// Message id acknowledged by an `ACK` envelope.
    pub fn acked_id(&self) -> Option<Uuid> {
        if self.kind != EnvelopeKind::Ack {
            return None;
        }
        Uuid::from_slice(&self.payload).ok()
    }

    pub fn encode(&self) -> MeshResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| MeshError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> MeshResult<Self> {
        let envelope: Self =
            bincode::deserialize(bytes).map_err(|e| MeshError::Serialization(e.to_string()))?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(MeshError::Serialization(format!(
                "unsupported envelope version {}",
                envelope.version
            )));
        }
        Ok(envelope)
    }
}
