//! Gap-free document numbers.
//!
//! A reservation is an ordinary command on the tenant's `NumberSequence`
//! stream. Reserving inside a caller's unit of work ties the numbers to the
//! documents that use them: if the batch is rejected, no number was issued.
//!
//! The number year follows the configured clock, never the document date, so
//! a pre- or post-dated document cannot move a tenant's counter.

use chrono::Utc;
use tracing::{info, instrument};

use windledger_core::{DomainError, TenantId};
use windledger_numbering::{
    ConfigureSequence, DocumentType, NumberFormat, NumberSequence, ReserveNumbers,
    SequenceCommand, SequenceEvent, SequenceId,
};

use crate::error::ServiceResult;
use crate::event_store::EventStore;
use crate::services::ServiceConfig;
use crate::unit_of_work::{UnitOfWork, retry_on_conflict};

pub struct SequenceGenerator<'a, S: EventStore + ?Sized> {
    store: &'a S,
    config: &'a ServiceConfig,
}

impl<'a, S: EventStore + ?Sized> SequenceGenerator<'a, S> {
    pub fn new(store: &'a S, config: &'a ServiceConfig) -> Self {
        Self { store, config }
    }

    pub fn next_number(&self, tenant_id: TenantId, document_type: DocumentType) -> ServiceResult<String> {
        self.next_numbers(tenant_id, document_type, 1)?
            .pop()
            .ok_or_else(|| DomainError::invariant("reservation returned no number").into())
    }

    /// Reserve `count` consecutive numbers in one step.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, document_type = %document_type))]
    pub fn next_numbers(
        &self,
        tenant_id: TenantId,
        document_type: DocumentType,
        count: u32,
    ) -> ServiceResult<Vec<String>> {
        let numbers = retry_on_conflict("reserve_numbers", self.config.max_commit_retries, || {
            let mut uow = UnitOfWork::begin(self.store, tenant_id);
            let numbers = reserve_into(&mut uow, self.config, document_type, count)?;
            uow.commit()?;
            Ok(numbers)
        })?;

        info!(count, first = numbers.first().map(String::as_str), "numbers reserved");
        Ok(numbers)
    }

    /// Replace the tenant's template for one document type.
    #[instrument(skip(self, format), fields(tenant_id = %tenant_id, document_type = %document_type))]
    pub fn configure(
        &self,
        tenant_id: TenantId,
        document_type: DocumentType,
        format: NumberFormat,
    ) -> ServiceResult<()> {
        retry_on_conflict("configure_sequence", self.config.max_commit_retries, || {
            let sequence_id = SequenceId::for_document(tenant_id, document_type);
            let mut uow = UnitOfWork::begin(self.store, tenant_id);
            let mut sequence = uow.load::<NumberSequence>(sequence_id.0)?;
            uow.execute(
                &mut sequence,
                &SequenceCommand::Configure(ConfigureSequence {
                    tenant_id,
                    sequence_id,
                    document_type,
                    format: format.clone(),
                    occurred_at: Utc::now(),
                }),
            )?;
            uow.commit()?;
            Ok(())
        })?;

        info!(template = format.template(), "number format configured");
        Ok(())
    }
}

/// Stage a reservation of `count` numbers in the caller's unit of work.
///
/// A sequence stream can only be loaded once per unit of work; callers that
/// need several numbers of one type reserve them together (see
/// [`reserve_documents`]).
pub fn reserve_into<S: EventStore + ?Sized>(
    uow: &mut UnitOfWork<'_, S>,
    config: &ServiceConfig,
    document_type: DocumentType,
    count: u32,
) -> ServiceResult<Vec<String>> {
    let tenant_id = uow.tenant_id();
    let sequence_id = SequenceId::for_document(tenant_id, document_type);
    let mut sequence = uow.load::<NumberSequence>(sequence_id.0)?;

    let events = uow.execute(
        &mut sequence,
        &SequenceCommand::Reserve(ReserveNumbers {
            tenant_id,
            sequence_id,
            document_type,
            count,
            on_date: config.clock.today(),
            default_format: config.format_for(document_type).clone(),
            occurred_at: Utc::now(),
        }),
    )?;

    events
        .into_iter()
        .find_map(|ev| match ev {
            SequenceEvent::NumbersReserved(reserved) => Some(reserved.numbers),
            SequenceEvent::SequenceConfigured(_) => None,
        })
        .ok_or_else(|| DomainError::invariant("reservation produced no numbers").into())
}

/// Reserve one number per requested document, grouped by type.
///
/// Returns the numbers in request order.
pub fn reserve_documents<S: EventStore + ?Sized>(
    uow: &mut UnitOfWork<'_, S>,
    config: &ServiceConfig,
    documents: &[DocumentType],
) -> ServiceResult<Vec<String>> {
    let mut by_type = Vec::with_capacity(2);
    for document_type in [DocumentType::Invoice, DocumentType::CreditNote] {
        let count = documents.iter().filter(|d| **d == document_type).count();
        if count == 0 {
            by_type.push((document_type, Vec::new().into_iter()));
            continue;
        }
        let count = u32::try_from(count)
            .map_err(|_| DomainError::validation("too many documents in one operation"))?;
        let numbers = reserve_into(uow, config, document_type, count)?;
        by_type.push((document_type, numbers.into_iter()));
    }

    documents
        .iter()
        .map(|document_type| {
            by_type
                .iter_mut()
                .find(|(t, _)| t == document_type)
                .and_then(|(_, numbers)| numbers.next())
                .ok_or_else(|| DomainError::invariant("reserved fewer numbers than documents").into())
        })
        .collect()
}
