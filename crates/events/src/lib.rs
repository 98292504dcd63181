//! Domain events and their post-commit distribution.
//!
//! Aggregates emit typed events; the infrastructure layer persists them and,
//! only after the owning transaction has committed, hands tenant-scoped
//! envelopes to an [`EventBus`] for side effects (webhooks, notifications).

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
