//! Invoice lifecycle and the correction engine's write side.
//!
//! Cancellations and corrections never edit an issued document. They create
//! new, already-issued documents and record the reversed quantities on the
//! original, in one commit together with the number reservation.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};

use windledger_allocation::{AllocationStatus, CostAllocation};
use windledger_core::{AggregateId, DomainError, TenantId};
use windledger_events::{EventBus, EventEnvelope};
use windledger_invoicing::{
    CancelInvoice, CancelPositions, CancellationPlan, CreateInvoice, DocumentSource, DocumentType,
    Invoice, InvoiceCommand, InvoiceId, InvoiceItemInput, InvoiceRecipient, MarkInvoicePaid,
    PartialCancelRequest, PositionCorrection, PositionDelta, SendInvoice, plan_correction,
    plan_full_cancellation, plan_partial_cancellation,
};
use windledger_settlement::{Settlement, SettlementStatus};

use crate::error::{ServiceError, ServiceResult};
use crate::event_store::EventStore;
use crate::services::{BillingServices, reserve_documents, reserve_into};
use crate::unit_of_work::{UnitOfWork, retry_on_conflict};

/// A manually created document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDraft {
    #[serde(default = "default_document_type")]
    pub document_type: DocumentType,
    pub recipient: InvoiceRecipient,
    pub invoice_date: NaiveDate,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    pub items: Vec<InvoiceItemInput>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_document_type() -> DocumentType {
    DocumentType::Invoice
}

/// Result of one item of a batch send.
#[derive(Debug)]
pub struct SendOutcome {
    pub invoice_id: InvoiceId,
    pub result: ServiceResult<Invoice>,
}

#[derive(Debug, Clone)]
pub struct CancellationOutcome {
    pub original: Invoice,
    pub credit_note: Invoice,
}

#[derive(Debug, Clone)]
pub struct CorrectionOutcome {
    pub original: Invoice,
    pub credit_note: Invoice,
    pub correction: Invoice,
    pub deltas: Vec<PositionDelta>,
    pub net_delta: Decimal,
}

impl<S, B> BillingServices<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Create a DRAFT document. The number is reserved at creation and
    /// carries the issue year, whatever the draft is dated.
    #[instrument(skip(self, draft), fields(tenant_id = %tenant_id, document_type = %draft.document_type))]
    pub fn create_invoice(&self, tenant_id: TenantId, draft: InvoiceDraft) -> ServiceResult<Invoice> {
        let invoice = retry_on_conflict("create_invoice", self.config().max_commit_retries, || {
            let mut uow = UnitOfWork::begin(self.store(), tenant_id);
            let invoice_id = AggregateId::new();
            let mut invoice = uow.create::<Invoice>(invoice_id)?;
            let number = reserve_into(&mut uow, self.config(), draft.document_type, 1)?
            .pop()
            .ok_or_else(|| ServiceError::from(DomainError::invariant("no number reserved")))?;

            uow.execute(
                &mut invoice,
                &InvoiceCommand::Create(CreateInvoice {
                    tenant_id,
                    invoice_id: InvoiceId::new(invoice_id),
                    number,
                    document_type: draft.document_type,
                    recipient: draft.recipient.clone(),
                    invoice_date: draft.invoice_date,
                    due_date: draft.due_date,
                    items: draft.items.clone(),
                    cancelled_invoice_id: None,
                    correction_of_invoice_id: None,
                    source: None,
                    notes: draft.notes.clone(),
                    issue_immediately: false,
                    occurred_at: Utc::now(),
                }),
            )?;
            self.commit(uow)?;
            Ok(invoice)
        })?;

        info!(invoice_id = %invoice.id_typed(), number = invoice.number(), "invoice created");
        Ok(invoice)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub fn send_invoice(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> ServiceResult<Invoice> {
        let invoice = self.run_invoice_command(tenant_id, invoice_id, "send_invoice", || {
            InvoiceCommand::Send(SendInvoice {
                tenant_id,
                invoice_id,
                occurred_at: Utc::now(),
            })
        })?;
        info!(number = invoice.number(), "invoice sent");
        Ok(invoice)
    }

    /// Send several drafts one after another. A failure only affects its own item.
    #[instrument(skip(self, invoice_ids), fields(tenant_id = %tenant_id, count = invoice_ids.len()))]
    pub fn send_invoices(&self, tenant_id: TenantId, invoice_ids: &[InvoiceId]) -> Vec<SendOutcome> {
        invoice_ids
            .iter()
            .map(|invoice_id| {
                let result = self.send_invoice(tenant_id, *invoice_id);
                if let Err(e) = &result {
                    warn!(invoice_id = %invoice_id, error = %e, "invoice not sent");
                }
                SendOutcome {
                    invoice_id: *invoice_id,
                    result,
                }
            })
            .collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub fn mark_invoice_paid(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> ServiceResult<Invoice> {
        let invoice = self.run_invoice_command(tenant_id, invoice_id, "mark_invoice_paid", || {
            InvoiceCommand::MarkPaid(MarkInvoicePaid {
                tenant_id,
                invoice_id,
                occurred_at: Utc::now(),
            })
        })?;
        info!(number = invoice.number(), "invoice paid");
        Ok(invoice)
    }

    pub fn get_invoice(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> ServiceResult<Invoice> {
        self.read::<Invoice>(tenant_id, invoice_id.0)
    }

    /// Storno: a credit note mirroring everything that remains, original → CANCELLED.
    #[instrument(skip(self, reason), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub fn cancel_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        reason: &str,
    ) -> ServiceResult<CancellationOutcome> {
        let outcome = retry_on_conflict("cancel_invoice", self.config().max_commit_retries, || {
            let mut uow = UnitOfWork::begin(self.store(), tenant_id);
            let mut original = uow.load_existing::<Invoice>(invoice_id.0)?;
            self.ensure_source_open(tenant_id, &original)?;
            let plan = plan_full_cancellation(&original, reason)?;

            let credit_note_id = InvoiceId::new(AggregateId::new());
            uow.execute(
                &mut original,
                &InvoiceCommand::Cancel(CancelInvoice {
                    tenant_id,
                    invoice_id,
                    reason: plan.reason.clone(),
                    storno_invoice_id: credit_note_id,
                    cancellations: plan.cancellations.clone(),
                    occurred_at: Utc::now(),
                }),
            )?;
            let credit_note = self.issue_credit_note(&mut uow, &original, credit_note_id, &plan, "Storno")?;

            self.commit(uow)?;
            Ok(CancellationOutcome {
                original,
                credit_note,
            })
        })?;

        info!(
            storno = outcome.credit_note.number(),
            gross = %outcome.credit_note.gross_amount(),
            "invoice cancelled"
        );
        Ok(outcome)
    }

    /// Credit selected quantities; the original keeps its status.
    #[instrument(skip(self, requests, reason), fields(tenant_id = %tenant_id, invoice_id = %invoice_id, positions = requests.len()))]
    pub fn partial_cancel_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        requests: &[PartialCancelRequest],
        reason: &str,
    ) -> ServiceResult<CancellationOutcome> {
        let outcome = retry_on_conflict("partial_cancel_invoice", self.config().max_commit_retries, || {
            let mut uow = UnitOfWork::begin(self.store(), tenant_id);
            let mut original = uow.load_existing::<Invoice>(invoice_id.0)?;
            self.ensure_source_open(tenant_id, &original)?;
            let plan = plan_partial_cancellation(&original, requests, reason)?;

            let credit_note_id = InvoiceId::new(AggregateId::new());
            uow.execute(
                &mut original,
                &InvoiceCommand::CancelPositions(CancelPositions {
                    tenant_id,
                    invoice_id,
                    reason: plan.reason.clone(),
                    credit_note_id,
                    cancellations: plan.cancellations.clone(),
                    occurred_at: Utc::now(),
                }),
            )?;
            let credit_note =
                self.issue_credit_note(&mut uow, &original, credit_note_id, &plan, "Teilstorno")?;

            self.commit(uow)?;
            Ok(CancellationOutcome {
                original,
                credit_note,
            })
        })?;

        info!(credit_note = outcome.credit_note.number(), "positions cancelled");
        Ok(outcome)
    }

    /// Reverse the changed positions with a credit note and re-issue them
    /// corrected on a new document of the original's type.
    #[instrument(skip(self, corrections, reason), fields(tenant_id = %tenant_id, invoice_id = %invoice_id, positions = corrections.len()))]
    pub fn correct_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        corrections: &[PositionCorrection],
        reason: &str,
    ) -> ServiceResult<CorrectionOutcome> {
        let outcome = retry_on_conflict("correct_invoice", self.config().max_commit_retries, || {
            let mut uow = UnitOfWork::begin(self.store(), tenant_id);
            let mut original = uow.load_existing::<Invoice>(invoice_id.0)?;
            self.ensure_source_open(tenant_id, &original)?;
            let plan = plan_correction(&original, corrections, reason)?;

            let credit_note_id = InvoiceId::new(AggregateId::new());
            let correction_id = InvoiceId::new(AggregateId::new());
            uow.execute(
                &mut original,
                &InvoiceCommand::CancelPositions(CancelPositions {
                    tenant_id,
                    invoice_id,
                    reason: plan.reversal.reason.clone(),
                    credit_note_id,
                    cancellations: plan.reversal.cancellations.clone(),
                    occurred_at: Utc::now(),
                }),
            )?;

            let today = self.document_date(&original);
            let numbers = reserve_documents(
                &mut uow,
                self.config(),
                &[DocumentType::CreditNote, original.document_type()],
            )?;
            let [credit_note_number, correction_number]: [String; 2] =
                numbers.try_into().map_err(|_| {
                    ServiceError::from(DomainError::invariant(
                        "expected two reserved numbers",
                    ))
                })?;

            let credit_note = self.create_issued(
                &mut uow,
                credit_note_id,
                CreateInvoice {
                    tenant_id,
                    invoice_id: credit_note_id,
                    number: credit_note_number,
                    document_type: DocumentType::CreditNote,
                    recipient: recipient_of(&original)?,
                    invoice_date: today,
                    due_date: None,
                    items: plan.reversal.credit_note_items.clone(),
                    cancelled_invoice_id: Some(invoice_id),
                    correction_of_invoice_id: None,
                    source: original.source().cloned(),
                    notes: Some(format!("Korrektur zu {}: {}", original.number(), plan.reversal.reason)),
                    issue_immediately: true,
                    occurred_at: Utc::now(),
                },
            )?;
            let correction = self.create_issued(
                &mut uow,
                correction_id,
                CreateInvoice {
                    tenant_id,
                    invoice_id: correction_id,
                    number: correction_number,
                    document_type: original.document_type(),
                    recipient: recipient_of(&original)?,
                    invoice_date: today,
                    due_date: original.due_date().filter(|d| *d >= today),
                    items: plan.corrected_items.clone(),
                    cancelled_invoice_id: None,
                    correction_of_invoice_id: Some(invoice_id),
                    source: original.source().cloned(),
                    notes: Some(format!("Korrektur zu {}: {}", original.number(), plan.reversal.reason)),
                    issue_immediately: true,
                    occurred_at: Utc::now(),
                },
            )?;

            self.commit(uow)?;
            Ok(CorrectionOutcome {
                original,
                credit_note,
                correction,
                net_delta: plan.net_delta(),
                deltas: plan.deltas,
            })
        })?;

        info!(
            credit_note = outcome.credit_note.number(),
            correction = outcome.correction.number(),
            net_delta = %outcome.net_delta,
            "invoice corrected"
        );
        Ok(outcome)
    }

    fn run_invoice_command(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        operation: &str,
        command: impl Fn() -> InvoiceCommand,
    ) -> ServiceResult<Invoice> {
        retry_on_conflict(operation, self.config().max_commit_retries, || {
            let mut uow = UnitOfWork::begin(self.store(), tenant_id);
            let mut invoice = uow.load_existing::<Invoice>(invoice_id.0)?;
            uow.execute(&mut invoice, &command())?;
            self.commit(uow)?;
            Ok(invoice)
        })
    }

    /// Reserve a credit-note number and issue the plan's credit note.
    fn issue_credit_note(
        &self,
        uow: &mut UnitOfWork<'_, S>,
        original: &Invoice,
        credit_note_id: InvoiceId,
        plan: &CancellationPlan,
        label: &str,
    ) -> ServiceResult<Invoice> {
        let tenant_id = uow.tenant_id();
        let today = self.document_date(original);
        let number = reserve_into(uow, self.config(), DocumentType::CreditNote, 1)?
            .pop()
            .ok_or_else(|| ServiceError::from(DomainError::invariant("no number reserved")))?;

        self.create_issued(
            uow,
            credit_note_id,
            CreateInvoice {
                tenant_id,
                invoice_id: credit_note_id,
                number,
                document_type: DocumentType::CreditNote,
                recipient: recipient_of(original)?,
                invoice_date: today,
                due_date: None,
                items: plan.credit_note_items.clone(),
                cancelled_invoice_id: Some(original.id_typed()),
                correction_of_invoice_id: None,
                source: original.source().cloned(),
                notes: Some(format!("{label} zu {}: {}", original.number(), plan.reason)),
                issue_immediately: true,
                occurred_at: Utc::now(),
            },
        )
    }

    /// Documents of a closed settlement or allocation are final.
    fn ensure_source_open(&self, tenant_id: TenantId, invoice: &Invoice) -> ServiceResult<()> {
        let closed = match invoice.source() {
            None => false,
            Some(DocumentSource::Settlement { settlement_id, .. }) => {
                self.read::<Settlement>(tenant_id, *settlement_id)?.status() == SettlementStatus::Closed
            }
            Some(DocumentSource::Allocation { allocation_id, .. }) => {
                self.read::<CostAllocation>(tenant_id, *allocation_id)?.status()
                    == AllocationStatus::Closed
            }
        };
        if closed {
            warn!(number = invoice.number(), "source is closed, document is final");
            return Err(DomainError::invalid_status("CLOSED", "source not CLOSED").into());
        }
        Ok(())
    }

    /// Follow-up documents are dated today, never before the original.
    fn document_date(&self, original: &Invoice) -> NaiveDate {
        let today = self.config().clock.today();
        original.invoice_date().map_or(today, |d| d.max(today))
    }

    fn create_issued(
        &self,
        uow: &mut UnitOfWork<'_, S>,
        invoice_id: InvoiceId,
        command: CreateInvoice,
    ) -> ServiceResult<Invoice> {
        let mut invoice = uow.create::<Invoice>(invoice_id.0)?;
        uow.execute(&mut invoice, &InvoiceCommand::Create(command))?;
        Ok(invoice)
    }
}

fn recipient_of(invoice: &Invoice) -> ServiceResult<InvoiceRecipient> {
    invoice
        .recipient()
        .cloned()
        .ok_or_else(|| DomainError::invariant("invoice has no recipient").into())
}
