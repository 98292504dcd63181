use std::collections::HashMap;
use std::sync::RwLock;

use windledger_core::{AggregateId, TenantId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

/// In-memory append-only event store.
///
/// Intended for tests/dev. A single write lock covers the whole batch, so
/// version checks and writes for every stream happen atomically.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamKey, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    /// Number of streams across all tenants.
    pub fn stream_count(&self) -> usize {
        self.streams.read().map(|s| s.len()).unwrap_or(0)
    }
}

/// Stream coordinates of one batch entry, after shape validation.
fn stream_key(
    append: &StreamAppend,
    tenant_id: TenantId,
) -> Result<(StreamKey, String), EventStoreError> {
    let first = append
        .events
        .first()
        .ok_or_else(|| EventStoreError::InvalidAppend("empty stream append".to_string()))?;

    for (idx, e) in append.events.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(EventStoreError::TenantIsolation(format!(
                "batch contains multiple tenant_ids (index {idx})"
            )));
        }
        if e.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "stream append contains multiple aggregate_ids (index {idx})"
            )));
        }
        if e.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "stream append contains multiple aggregate_types (index {idx})"
            )));
        }
    }

    Ok((
        StreamKey {
            tenant_id,
            aggregate_id: first.aggregate_id,
        },
        first.aggregate_type.clone(),
    ))
}

impl EventStore for InMemoryEventStore {
    fn append_batch(&self, batch: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        let batch: Vec<StreamAppend> = batch.into_iter().filter(|a| !a.events.is_empty()).collect();
        let Some(tenant_id) = batch.first().and_then(|a| a.events.first()).map(|e| e.tenant_id)
        else {
            return Ok(vec![]);
        };

        let mut keys = Vec::with_capacity(batch.len());
        for append in &batch {
            let (key, aggregate_type) = stream_key(append, tenant_id)?;
            if keys.iter().any(|(k, _)| *k == key) {
                return Err(EventStoreError::InvalidAppend(format!(
                    "stream {} appears twice in one batch",
                    key.aggregate_id
                )));
            }
            keys.push((key, aggregate_type));
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        // Check every stream before touching any of them.
        for (append, (key, aggregate_type)) in batch.iter().zip(&keys) {
            let stream = streams.get(key).map(Vec::as_slice).unwrap_or(&[]);
            let current = Self::current_version(stream);
            if !append.expected_version.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "stream {}: expected {:?}, found {current}",
                    key.aggregate_id, append.expected_version
                )));
            }
            if let Some(existing) = stream.first() {
                if &existing.aggregate_type != aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{}', attempted append with '{}'",
                        existing.aggregate_type, aggregate_type
                    )));
                }
            }
        }

        let mut committed = Vec::new();
        for (append, (key, _)) in batch.into_iter().zip(keys) {
            let stream = streams.entry(key).or_default();
            let mut next = Self::current_version(stream) + 1;
            for e in append.events {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    tenant_id: e.tenant_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                next += 1;
                stream.push(stored.clone());
                committed.push(stored);
            }
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            tenant_id,
            aggregate_id,
        };

        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        Ok(streams.get(&key).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::UncommittedEvent;
    use chrono::Utc;
    use uuid::Uuid;
    use windledger_core::ExpectedVersion;

    fn event(tenant_id: TenantId, aggregate_id: AggregateId, kind: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            tenant_id,
            aggregate_id,
            aggregate_type: kind.to_string(),
            event_type: format!("{kind}.happened"),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn batch_assigns_per_stream_sequence_numbers() {
        let store = InMemoryEventStore::new();
        let tenant = TenantId::new();
        let a = AggregateId::new();
        let b = AggregateId::new();

        let committed = store
            .append_batch(vec![
                StreamAppend::new(
                    ExpectedVersion::NoStream,
                    vec![event(tenant, a, "invoice"), event(tenant, a, "invoice")],
                ),
                StreamAppend::new(ExpectedVersion::NoStream, vec![event(tenant, b, "invoice")]),
            ])
            .unwrap();

        let seqs: Vec<u64> = committed.iter().map(|e| e.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 1]);
        assert_eq!(store.load_stream(tenant, a).unwrap().len(), 2);
    }

    #[test]
    fn stale_stream_aborts_the_whole_batch() {
        let store = InMemoryEventStore::new();
        let tenant = TenantId::new();
        let a = AggregateId::new();
        let b = AggregateId::new();
        store
            .append(vec![event(tenant, a, "invoice")], ExpectedVersion::NoStream)
            .unwrap();

        let err = store
            .append_batch(vec![
                StreamAppend::new(ExpectedVersion::NoStream, vec![event(tenant, b, "invoice")]),
                StreamAppend::new(ExpectedVersion::NoStream, vec![event(tenant, a, "invoice")]),
            ])
            .unwrap_err();

        assert!(matches!(err, EventStoreError::Concurrency(_)));
        assert!(store.load_stream(tenant, b).unwrap().is_empty());
    }

    #[test]
    fn mixed_tenants_are_rejected() {
        let store = InMemoryEventStore::new();
        let err = store
            .append_batch(vec![
                StreamAppend::new(
                    ExpectedVersion::Any,
                    vec![event(TenantId::new(), AggregateId::new(), "invoice")],
                ),
                StreamAppend::new(
                    ExpectedVersion::Any,
                    vec![event(TenantId::new(), AggregateId::new(), "invoice")],
                ),
            ])
            .unwrap_err();
        assert!(matches!(err, EventStoreError::TenantIsolation(_)));
    }

    #[test]
    fn streams_are_invisible_to_other_tenants() {
        let store = InMemoryEventStore::new();
        let tenant = TenantId::new();
        let id = AggregateId::new();
        store
            .append(vec![event(tenant, id, "settlement")], ExpectedVersion::NoStream)
            .unwrap();

        assert!(store.load_stream(TenantId::new(), id).unwrap().is_empty());
    }
}
