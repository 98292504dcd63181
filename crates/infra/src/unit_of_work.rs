//! Explicit transaction handle for multi-aggregate operations.
//!
//! A `UnitOfWork` remembers the version each stream was read at, stages the
//! events every command produces and commits them all through one
//! [`EventStore::append_batch`] call. If any stream moved in the meantime the
//! whole batch is rejected, so a credit note can never exist without the
//! cancellation of its original (or a number without its document).

use tracing::warn;
use uuid::Uuid;

use windledger_core::{AggregateId, DomainError, ExpectedVersion, TenantId};

use crate::error::{ServiceError, ServiceResult};
use crate::event_store::{EventStore, StoredEvent, StreamAppend, UncommittedEvent};
use crate::repository::{StreamAggregate, rehydrate};

#[derive(Debug)]
struct TrackedStream {
    aggregate_id: AggregateId,
    aggregate_type: &'static str,
    expected: ExpectedVersion,
    events: Vec<UncommittedEvent>,
}

pub struct UnitOfWork<'s, S: EventStore + ?Sized> {
    store: &'s S,
    tenant_id: TenantId,
    streams: Vec<TrackedStream>,
}

impl<'s, S: EventStore + ?Sized> UnitOfWork<'s, S> {
    pub fn begin(store: &'s S, tenant_id: TenantId) -> Self {
        Self {
            store,
            tenant_id,
            streams: Vec::new(),
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    fn track(
        &mut self,
        aggregate_id: AggregateId,
        aggregate_type: &'static str,
        expected: ExpectedVersion,
    ) -> ServiceResult<()> {
        if self.streams.iter().any(|s| s.aggregate_id == aggregate_id) {
            return Err(DomainError::invariant(format!(
                "stream {aggregate_id} is already part of this unit of work"
            ))
            .into());
        }
        self.streams.push(TrackedStream {
            aggregate_id,
            aggregate_type,
            expected,
            events: Vec::new(),
        });
        Ok(())
    }

    /// Read an aggregate (possibly not yet created) and pin its stream version.
    pub fn load<A: StreamAggregate>(&mut self, aggregate_id: AggregateId) -> ServiceResult<A> {
        let (aggregate, version) = rehydrate::<A, S>(self.store, self.tenant_id, aggregate_id)?;
        self.track(
            aggregate_id,
            A::AGGREGATE_TYPE,
            ExpectedVersion::from_version(version),
        )?;
        Ok(aggregate)
    }

    /// Like [`load`](Self::load) but `NotFound` for streams that do not exist.
    pub fn load_existing<A: StreamAggregate>(
        &mut self,
        aggregate_id: AggregateId,
    ) -> ServiceResult<A> {
        let aggregate = self.load::<A>(aggregate_id)?;
        if !aggregate.exists() {
            return Err(DomainError::not_found().into());
        }
        Ok(aggregate)
    }

    /// Start a brand-new stream (must not exist at commit time).
    pub fn create<A: StreamAggregate>(&mut self, aggregate_id: AggregateId) -> ServiceResult<A> {
        self.track(aggregate_id, A::AGGREGATE_TYPE, ExpectedVersion::NoStream)?;
        Ok(A::empty_for(aggregate_id))
    }

    /// Decide + apply a command in memory and stage the resulting events.
    pub fn execute<A: StreamAggregate>(
        &mut self,
        aggregate: &mut A,
        command: &A::Command,
    ) -> ServiceResult<Vec<A::Event>> {
        let aggregate_id = aggregate.stream_id();
        let tenant_id = self.tenant_id;
        let stream = self
            .streams
            .iter_mut()
            .find(|s| s.aggregate_id == aggregate_id)
            .ok_or_else(|| {
                DomainError::invariant(format!(
                    "stream {aggregate_id} was not loaded in this unit of work"
                ))
            })?;

        let events = windledger_events::execute(aggregate, command)?;
        for ev in &events {
            stream.events.push(UncommittedEvent::from_typed(
                tenant_id,
                aggregate_id,
                stream.aggregate_type,
                Uuid::now_v7(),
                ev,
            )?);
        }
        Ok(events)
    }

    pub fn staged_event_count(&self) -> usize {
        self.streams.iter().map(|s| s.events.len()).sum()
    }

    /// Commit every staged stream atomically. Read-only streams are not written.
    pub fn commit(self) -> ServiceResult<Vec<StoredEvent>> {
        let batch: Vec<StreamAppend> = self
            .streams
            .into_iter()
            .filter(|s| !s.events.is_empty())
            .map(|s| StreamAppend::new(s.expected, s.events))
            .collect();
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.store.append_batch(batch)?)
    }
}

/// Re-run `op` while it fails with a retry-safe conflict.
///
/// Each attempt must start from a fresh unit of work so it re-reads state
/// (and re-reserves numbers).
pub fn retry_on_conflict<T>(
    operation: &str,
    max_attempts: u32,
    mut op: impl FnMut() -> ServiceResult<T>,
) -> ServiceResult<T> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Err(ServiceError::Concurrency(msg)) if attempt < max_attempts => {
                warn!(operation, attempt, conflict = %msg, "commit conflict, retrying");
                attempt += 1;
            }
            other => return other,
        }
    }
}
