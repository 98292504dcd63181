//! Invoice directory projection.
//!
//! Keeps one summary row per invoice or credit note so the bank import can
//! list a tenant's open documents without replaying every invoice stream.
//! The directory is disposable: it can always be rebuilt from the streams.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use windledger_core::{AggregateId, TenantId};
use windledger_events::EventEnvelope;
use windledger_invoicing::{
    DocumentSource, DocumentType, Invoice, InvoiceEvent, InvoiceStatus,
};
use windledger_reconciliation::OpenInvoice;

use crate::read_model::tenant_store::TenantStore;
use crate::repository::StreamAggregate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSummary {
    pub invoice_id: AggregateId,
    pub number: String,
    pub document_type: DocumentType,
    pub status: InvoiceStatus,
    pub recipient_name: String,
    pub recipient_email: Option<String>,
    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub gross_amount: Decimal,
    pub source: Option<DocumentSource>,
    /// Credit notes issued against this document (storno or partial).
    pub credit_note_count: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvoiceDirectoryError {
    #[error("failed to decode invoice event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence for stream (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

pub struct InvoiceDirectory {
    store: Arc<dyn TenantStore<AggregateId, InvoiceSummary>>,
    cursors: RwLock<HashMap<(TenantId, AggregateId), u64>>,
}

impl InvoiceDirectory {
    pub fn new(store: Arc<dyn TenantStore<AggregateId, InvoiceSummary>>) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, tenant_id: TenantId, invoice_id: AggregateId) -> Option<InvoiceSummary> {
        self.store.get(tenant_id, &invoice_id)
    }

    pub fn find_by_number(&self, tenant_id: TenantId, number: &str) -> Option<InvoiceSummary> {
        self.store
            .list(tenant_id)
            .into_iter()
            .find(|s| s.number.eq_ignore_ascii_case(number))
    }

    /// Every document of the tenant, ordered by number.
    pub fn list(&self, tenant_id: TenantId) -> Vec<InvoiceSummary> {
        let mut all = self.store.list(tenant_id);
        all.sort_by(|a, b| a.number.cmp(&b.number));
        all
    }

    /// Documents awaiting payment: sent, not paid, not cancelled.
    pub fn open_invoices(&self, tenant_id: TenantId) -> Vec<OpenInvoice> {
        self.list(tenant_id)
            .into_iter()
            .filter(|s| s.status == InvoiceStatus::Sent)
            .map(|s| OpenInvoice {
                invoice_id: s.invoice_id,
                number: s.number,
                gross_amount: s.gross_amount,
                recipient_name: s.recipient_name,
            })
            .collect()
    }

    /// Drop the tenant's rows and replay the given envelopes in order.
    pub fn rebuild<'a>(
        &self,
        tenant_id: TenantId,
        envelopes: impl IntoIterator<Item = &'a EventEnvelope<JsonValue>>,
    ) -> Result<(), InvoiceDirectoryError> {
        self.store.clear_tenant(tenant_id);
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.retain(|(t, _), _| *t != tenant_id);
        }
        for envelope in envelopes {
            if envelope.tenant_id() != tenant_id {
                return Err(InvoiceDirectoryError::TenantIsolation(
                    "rebuild received an envelope of another tenant".to_string(),
                ));
            }
            self.apply_envelope(envelope)?;
        }
        Ok(())
    }

    fn cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        self.cursors
            .read()
            .ok()
            .and_then(|c| c.get(&(tenant_id, aggregate_id)).copied())
            .unwrap_or(0)
    }

    fn advance_cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert((tenant_id, aggregate_id), seq);
        }
    }

    /// Apply one committed envelope. Envelopes of other streams are ignored,
    /// already-seen sequence numbers are skipped.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), InvoiceDirectoryError> {
        if envelope.aggregate_type() != Invoice::AGGREGATE_TYPE {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        let last = self.cursor(tenant_id, aggregate_id);

        if seq == 0 || (last != 0 && seq > last + 1) {
            return Err(InvoiceDirectoryError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }

        let ev: InvoiceEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| InvoiceDirectoryError::Deserialize(e.to_string()))?;

        let (event_tenant, invoice_id) = match &ev {
            InvoiceEvent::InvoiceCreated(e) => (e.tenant_id, e.invoice_id),
            InvoiceEvent::InvoiceSent(e) => (e.tenant_id, e.invoice_id),
            InvoiceEvent::InvoicePaid(e) => (e.tenant_id, e.invoice_id),
            InvoiceEvent::InvoiceCancelled(e) => (e.tenant_id, e.invoice_id),
            InvoiceEvent::PositionsCancelled(e) => (e.tenant_id, e.invoice_id),
        };
        if event_tenant != tenant_id {
            return Err(InvoiceDirectoryError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if invoice_id.0 != aggregate_id {
            return Err(InvoiceDirectoryError::TenantIsolation(
                "event invoice_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            InvoiceEvent::InvoiceCreated(e) => {
                let summary = InvoiceSummary {
                    invoice_id: aggregate_id,
                    number: e.number,
                    document_type: e.document_type,
                    status: InvoiceStatus::Draft,
                    recipient_name: e.recipient.name,
                    recipient_email: e.recipient.email,
                    invoice_date: e.invoice_date,
                    due_date: e.due_date,
                    gross_amount: e.gross_amount,
                    source: e.source,
                    credit_note_count: 0,
                };
                self.store.upsert(tenant_id, aggregate_id, summary);
            }
            InvoiceEvent::InvoiceSent(_) => self.set_status(tenant_id, aggregate_id, InvoiceStatus::Sent),
            InvoiceEvent::InvoicePaid(_) => self.set_status(tenant_id, aggregate_id, InvoiceStatus::Paid),
            InvoiceEvent::InvoiceCancelled(_) => {
                if let Some(mut summary) = self.store.get(tenant_id, &aggregate_id) {
                    summary.status = InvoiceStatus::Cancelled;
                    summary.credit_note_count += 1;
                    self.store.upsert(tenant_id, aggregate_id, summary);
                }
            }
            InvoiceEvent::PositionsCancelled(_) => {
                if let Some(mut summary) = self.store.get(tenant_id, &aggregate_id) {
                    summary.credit_note_count += 1;
                    self.store.upsert(tenant_id, aggregate_id, summary);
                }
            }
        }

        self.advance_cursor(tenant_id, aggregate_id, seq);
        Ok(())
    }

    fn set_status(&self, tenant_id: TenantId, aggregate_id: AggregateId, status: InvoiceStatus) {
        if let Some(mut summary) = self.store.get(tenant_id, &aggregate_id) {
            summary.status = status;
            self.store.upsert(tenant_id, aggregate_id, summary);
        }
    }
}
