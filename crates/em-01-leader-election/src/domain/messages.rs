//! Election wire messages.
//!
//! Messages are ephemeral: created, broadcast, consumed, discarded.

use serde::{Deserialize, Serialize};
use shared_types::{now_ms, InstanceId, MeshError, MeshResult, Rank, PROTOCOL_VERSION};

/// Kind of an election message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Election,
    ElectionOk,
    Coordinator,
    Heartbeat,
    StepDown,
    Shutdown,
}

/// One election protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionMessage {
    pub version: u16,
    pub kind: MessageKind,
    pub sender_id: InstanceId,
    /// Sender wall clock, milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub priority: u64,
}

impl ElectionMessage {
    pub fn new(kind: MessageKind, sender: &Rank) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind,
            sender_id: sender.instance_id.clone(),
            timestamp: now_ms(),
            priority: sender.priority,
        }
    }

    pub fn sender_rank(&self) -> Rank {
        Rank::new(self.sender_id.clone(), self.priority)
    }

    pub fn encode(&self) -> MeshResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| MeshError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> MeshResult<Self> {
        let message: Self =
            bincode::deserialize(bytes).map_err(|e| MeshError::Serialization(e.to_string()))?;
        if message.version != PROTOCOL_VERSION {
            return Err(MeshError::Serialization(format!(
                "unsupported election protocol version {}",
                message.version
            )));
        }
        Ok(message)
    }
}
