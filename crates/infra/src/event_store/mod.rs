//! Append-only, tenant-scoped event store.
//!
//! One stream per aggregate instance (settlement, cost allocation, invoice,
//! number sequence). Multi-aggregate operations commit through
//! [`EventStore::append_batch`], which is all-or-nothing across streams.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};
