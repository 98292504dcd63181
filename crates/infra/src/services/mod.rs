//! Application services: load aggregates, run commands, commit atomically,
//! then hand the committed events to the post-commit pipeline.
//!
//! Every mutating operation follows the same shape:
//!
//! ```text
//! retry_on_conflict(
//!     UnitOfWork::begin -> load/create streams -> execute commands -> commit
//! ) -> post-commit (read models, bus, delivery jobs)
//! ```

use std::sync::Arc;

use serde_json::Value as JsonValue;

use windledger_core::{AggregateId, TenantId};
use windledger_events::{EventBus, EventEnvelope};
use windledger_numbering::{DocumentType, NumberFormat};

use crate::clock::{Clock, SystemClock};
use crate::error::ServiceResult;
use crate::event_store::{EventStore, StoredEvent};
use crate::jobs::JobStore;
use crate::post_commit::PostCommit;
use crate::read_model::InvoiceDirectory;
use crate::repository::{StreamAggregate, load_existing};
use crate::unit_of_work::UnitOfWork;

pub mod allocation;
pub mod bank_import;
pub mod invoice;
pub mod sequence;
pub mod settlement;

pub use allocation::AllocationInvoices;
pub use invoice::{CancellationOutcome, CorrectionOutcome, InvoiceDraft, SendOutcome};
pub use sequence::{SequenceGenerator, reserve_documents, reserve_into};
pub use settlement::{CalculationRequest, LessorCreditNotes, RevenueUpdate, ReviewAction};

pub const DEFAULT_MAX_COMMIT_RETRIES: u32 = 5;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Attempts per operation when a stream moved between read and commit.
    pub max_commit_retries: u32,
    pub invoice_format: NumberFormat,
    pub credit_note_format: NumberFormat,
    /// Issue date for number reservations.
    pub clock: Arc<dyn Clock>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_commit_retries: DEFAULT_MAX_COMMIT_RETRIES,
            invoice_format: DocumentType::Invoice.default_format(),
            credit_note_format: DocumentType::CreditNote.default_format(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl ServiceConfig {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Template used the first time a tenant's sequence is touched.
    pub fn format_for(&self, document_type: DocumentType) -> &NumberFormat {
        match document_type {
            DocumentType::Invoice => &self.invoice_format,
            DocumentType::CreditNote => &self.credit_note_format,
        }
    }
}

/// Entry point for every billing operation.
pub struct BillingServices<S, B> {
    store: S,
    post_commit: PostCommit<B>,
    config: ServiceConfig,
}

impl<S, B> BillingServices<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: S, post_commit: PostCommit<B>, config: ServiceConfig) -> Self {
        Self {
            store,
            post_commit,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn bus(&self) -> &B {
        self.post_commit.bus()
    }

    pub fn directory(&self) -> &Arc<InvoiceDirectory> {
        self.post_commit.directory()
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        self.post_commit.jobs()
    }

    pub fn sequences(&self) -> SequenceGenerator<'_, S> {
        SequenceGenerator::new(&self.store, &self.config)
    }

    /// Commit a unit of work and run the post-commit side effects.
    fn commit(&self, uow: UnitOfWork<'_, S>) -> ServiceResult<Vec<StoredEvent>> {
        let committed = uow.commit()?;
        self.post_commit.after_commit(&committed);
        Ok(committed)
    }

    fn read<A: StreamAggregate>(&self, tenant_id: TenantId, id: AggregateId) -> ServiceResult<A> {
        load_existing::<A, S>(&self.store, tenant_id, id)
    }
}
