//! Infrastructure layer: event store, unit of work, read models, delivery
//! jobs and the application services that tie the domain crates together.

pub mod clock;
pub mod error;
pub mod event_store;
pub mod jobs;
pub mod post_commit;
pub mod read_model;
pub mod repository;
pub mod sequence_pg;
pub mod services;
pub mod unit_of_work;


pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{ServiceError, ServiceResult};
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent};
pub use post_commit::{PostCommit, PostCommitReport};
pub use read_model::{InMemoryTenantStore, InvoiceDirectory, InvoiceSummary};
pub use sequence_pg::PgSequenceAllocator;
pub use services::{BillingServices, ServiceConfig};
pub use unit_of_work::{UnitOfWork, retry_on_conflict};
