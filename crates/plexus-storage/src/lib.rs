//! Persistence contracts and the event bus.
//!
//! The actual database is an external collaborator; everything here speaks
//! to opaque stores: a keyed cooldown map and an append-style usage log.
//! Two implementations ship: an in-memory store (tests, ephemeral runs) and
//! a JSON-file store (single-node durability).

mod bus;
mod file;
mod memory;
mod store;

pub use bus::{Event, EventBus, EventSink};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::{
    CooldownRow, CooldownStore, ErrorLogEntry, StoreError, UsageLogEntry, UsageStore,
};
