//! # Shared Types Crate
//!
//! Types that cross subsystem boundaries in the event mesh.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: instance identity, events and vector clocks
//!   are defined once here and reused by every `em-*` subsystem.
//! - **One Error Taxonomy**: every public operation that can fail returns
//!   [`MeshError`].
//! - **Ports, not Adapters**: the broadcast transport is a trait; the
//!   in-memory adapter lives in `shared-bus`.

pub mod clock;
pub mod entities;
pub mod errors;
pub mod ports;

pub use clock::{ClockOrdering, VectorClock};
pub use entities::*;
pub use errors::{MeshError, MeshResult};
pub use ports::{BroadcastTransport, TransportError, TransportReceiver};

/// Current wire protocol version for election and envelope messages.
pub const PROTOCOL_VERSION: u16 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_version() {
        assert_eq!(PROTOCOL_VERSION, 1);
    }
}
