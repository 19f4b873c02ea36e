//! # Domain Module
//!
//! Stored records, conflict resolution and store configuration.

pub mod config;
pub mod conflict;
pub mod record;

pub use config::StoreConfig;
pub use conflict::{
    causal_order, last_write_wins, resolve, ConflictResolver, ConflictStrategy, Resolution,
};
pub use record::{storage_id, StoredRecord};
