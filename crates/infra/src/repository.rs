//! Rehydrating aggregates from their event streams.

use serde::Serialize;
use serde::de::DeserializeOwned;

use windledger_allocation::{AllocationId, CostAllocation};
use windledger_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use windledger_invoicing::{Invoice, InvoiceId};
use windledger_numbering::{NumberSequence, SequenceId};
use windledger_settlement::{Settlement, SettlementId};

use crate::error::{ServiceError, ServiceResult};
use crate::event_store::{EventStore, EventStoreError, StoredEvent};

/// An aggregate that lives in its own event stream.
pub trait StreamAggregate:
    Aggregate<Error = DomainError, Event: windledger_events::Event + Serialize + DeserializeOwned> + Sized
{
    /// Stable stream type name (stored with every event).
    const AGGREGATE_TYPE: &'static str;

    /// Fresh, not-yet-created instance for the stream.
    fn empty_for(id: AggregateId) -> Self;

    fn stream_id(&self) -> AggregateId;

    /// Whether a creating event has been applied.
    fn exists(&self) -> bool;
}

impl StreamAggregate for Settlement {
    const AGGREGATE_TYPE: &'static str = "settlement";

    fn empty_for(id: AggregateId) -> Self {
        Settlement::empty(SettlementId::new(id))
    }

    fn stream_id(&self) -> AggregateId {
        self.id_typed().0
    }

    fn exists(&self) -> bool {
        self.is_created()
    }
}

impl StreamAggregate for CostAllocation {
    const AGGREGATE_TYPE: &'static str = "allocation";

    fn empty_for(id: AggregateId) -> Self {
        CostAllocation::empty(AllocationId::new(id))
    }

    fn stream_id(&self) -> AggregateId {
        self.id_typed().0
    }

    fn exists(&self) -> bool {
        self.is_created()
    }
}

impl StreamAggregate for Invoice {
    const AGGREGATE_TYPE: &'static str = "invoice";

    fn empty_for(id: AggregateId) -> Self {
        Invoice::empty(InvoiceId::new(id))
    }

    fn stream_id(&self) -> AggregateId {
        self.id_typed().0
    }

    fn exists(&self) -> bool {
        self.is_created()
    }
}

impl StreamAggregate for NumberSequence {
    const AGGREGATE_TYPE: &'static str = "number_sequence";

    fn empty_for(id: AggregateId) -> Self {
        NumberSequence::empty(SequenceId::new(id))
    }

    fn stream_id(&self) -> AggregateId {
        self.id().0
    }

    fn exists(&self) -> bool {
        self.is_created()
    }
}

/// Load and replay a stream. Returns the aggregate and the stream version it was read at.
pub fn rehydrate<A, S>(
    store: &S,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
) -> ServiceResult<(A, u64)>
where
    S: EventStore + ?Sized,
    A: StreamAggregate,
{
    let history = store.load_stream(tenant_id, aggregate_id)?;
    validate_loaded_stream(tenant_id, aggregate_id, A::AGGREGATE_TYPE, &history)?;

    let mut aggregate = A::empty_for(aggregate_id);
    for stored in &history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone()).map_err(|e| {
            ServiceError::Deserialize(format!(
                "{} #{}: {e}",
                stored.event_type, stored.sequence_number
            ))
        })?;
        aggregate.apply(&ev);
    }

    let version = history.last().map(|e| e.sequence_number).unwrap_or(0);
    Ok((aggregate, version))
}

/// Load an existing aggregate; `NotFound` when the stream is empty.
pub fn load_existing<A, S>(
    store: &S,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
) -> ServiceResult<A>
where
    S: EventStore + ?Sized,
    A: StreamAggregate,
{
    let (aggregate, _) = rehydrate::<A, S>(store, tenant_id, aggregate_id)?;
    if !aggregate.exists() {
        return Err(DomainError::not_found().into());
    }
    Ok(aggregate)
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    aggregate_type: &str,
    stream: &[StoredEvent],
) -> ServiceResult<()> {
    // A buggy backend must never leak another tenant's events into a rehydration.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id || e.aggregate_id != aggregate_id {
            return Err(ServiceError::Store(EventStoreError::TenantIsolation(format!(
                "loaded stream contains a foreign event at index {idx}"
            ))));
        }
        if e.aggregate_type != aggregate_type {
            // Same id, different kind of document: treat as absent for this caller.
            return Err(DomainError::not_found().into());
        }
        if e.sequence_number <= last {
            return Err(ServiceError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}
