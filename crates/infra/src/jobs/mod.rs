//! Post-commit delivery jobs (PDF rendering, email, webhooks).
//!
//! Jobs are enqueued only after the financial state change is durable. Their
//! failures are retried with backoff and eventually dead-lettered; they never
//! roll back or block the commit that produced them.

pub mod store;
pub mod types;
pub mod worker;

pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{
    BackoffStrategy, DeadLetterEntry, DeliveryJob, DeliveryKind, JobAttemptRecord, JobId,
    JobResult, JobStatus, RetryPolicy,
};
pub use worker::{DeliveryWorker, RunSummary};
