//! Application-level error: domain rule failures plus infrastructure failures.

use thiserror::Error;

use windledger_core::{DomainError, ErrorKind};

use crate::event_store::EventStoreError;
use crate::jobs::JobStoreError;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// A domain rule or validation failed; nothing was written.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// A stream changed between read and commit; the batch was not written.
    #[error("concurrent modification: {0}")]
    Concurrency(String),

    /// Historical payloads could not be decoded into the aggregate's events.
    #[error("failed to decode stored events: {0}")]
    Deserialize(String),

    /// The event store rejected or failed the operation.
    #[error("event store failure: {0}")]
    Store(EventStoreError),

    /// Sequence allocation against the relational store failed.
    #[error("database failure: {0}")]
    Database(String),

    #[error("job store failure: {0}")]
    Jobs(#[from] JobStoreError),
}

impl From<EventStoreError> for ServiceError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => ServiceError::Concurrency(msg),
            other => ServiceError::Store(other),
        }
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(value: sqlx::Error) -> Self {
        ServiceError::Database(value.to_string())
    }
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Domain(e) => e.kind(),
            _ => ErrorKind::Infrastructure,
        }
    }

    /// Safe to re-run the whole operation (nothing was committed).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Concurrency(_)
                | ServiceError::Store(EventStoreError::Unavailable(_))
                | ServiceError::Database(_)
        )
    }

    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            ServiceError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
