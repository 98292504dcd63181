use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use windledger_allocation::{AllocationItem, AllocationStatus, CostAllocation, OperatingEntity};
use windledger_core::{AggregateId, UserId};
use windledger_infra::ServiceError;
use windledger_infra::services::{
    AllocationInvoices, CancellationOutcome, CorrectionOutcome, LessorCreditNotes, ReviewAction,
    SendOutcome,
};
use windledger_invoicing::{
    DocumentSource, DocumentType, Invoice, InvoiceId, InvoiceItem, InvoiceRecipient,
    InvoiceStatus, PartialCancelRequest, PositionCorrection, PositionDelta,
};
use windledger_settlement::{
    LeaseTerms, ParkTerms, RevenueInput, RevenueSource, Settlement, SettlementCalculation, SettlementItem,
    SettlementPeriod, SettlementStatus,
};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub action: ReviewAction,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreditNotesRequest {
    /// Defaults to today.
    #[serde(default)]
    pub document_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct AllocateRequest {
    pub entities: Vec<OperatingEntity>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AllocationInvoicesRequest {
    #[serde(default)]
    pub invoice_date: Option<NaiveDate>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct SendInvoicesRequest {
    pub invoice_ids: Vec<InvoiceId>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct PartialCancelBody {
    pub positions: Vec<PartialCancelRequest>,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct CorrectionBody {
    pub corrections: Vec<PositionCorrection>,
    pub reason: String,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct SettlementResponse {
    pub id: AggregateId,
    pub status: SettlementStatus,
    pub park: Option<ParkTerms>,
    pub period: Option<SettlementPeriod>,
    pub leases: Vec<LeaseTerms>,
    pub revenue: RevenueInput,
    pub calculation: Option<SettlementCalculationView>,
    pub items: Vec<SettlementItem>,
    pub created_by: Option<UserId>,
    pub created_at: Option<DateTime<Utc>>,
    pub calculated_at: Option<DateTime<Utc>>,
    pub submission_notes: Option<String>,
    pub reviewed_by: Option<UserId>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub credit_note_ids: Vec<AggregateId>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Calculation totals; the per-lease rows are returned as `items`.
#[derive(Debug, Serialize)]
pub struct SettlementCalculationView {
    pub total_revenue: Decimal,
    pub revenue_source: RevenueSource,
    pub revenue_share_percent: Decimal,
    pub revenue_share_fee: Decimal,
    pub minimum_guarantee: Decimal,
    pub calculated_fee: Decimal,
    pub used_minimum: bool,
}

impl From<&SettlementCalculation> for SettlementCalculationView {
    fn from(c: &SettlementCalculation) -> Self {
        Self {
            total_revenue: c.total_revenue,
            revenue_source: c.revenue_source,
            revenue_share_percent: c.revenue_share_percent,
            revenue_share_fee: c.revenue_share_fee,
            minimum_guarantee: c.minimum_guarantee,
            calculated_fee: c.calculated_fee,
            used_minimum: c.used_minimum,
        }
    }
}

impl From<&Settlement> for SettlementResponse {
    fn from(s: &Settlement) -> Self {
        Self {
            id: s.id_typed().0,
            status: s.status(),
            park: s.park().cloned(),
            period: s.period().copied(),
            leases: s.leases().to_vec(),
            revenue: s.revenue().clone(),
            calculation: s.calculation().map(SettlementCalculationView::from),
            items: s.items().to_vec(),
            created_by: s.created_by(),
            created_at: s.created_at(),
            calculated_at: s.calculated_at(),
            submission_notes: s.submission_notes().map(str::to_string),
            reviewed_by: s.reviewed_by(),
            reviewed_at: s.reviewed_at(),
            review_notes: s.review_notes().map(str::to_string),
            credit_note_ids: s.credit_note_ids().to_vec(),
            closed_at: s.closed_at(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AllocationResponse {
    pub id: AggregateId,
    pub settlement_id: Option<AggregateId>,
    pub status: AllocationStatus,
    pub label: Option<String>,
    pub notes: Option<String>,
    pub total_allocable: Decimal,
    pub items: Vec<AllocationItem>,
    pub created_by: Option<UserId>,
    pub created_at: Option<DateTime<Utc>>,
    pub invoiced_at: Option<DateTime<Utc>>,
}

impl From<&CostAllocation> for AllocationResponse {
    fn from(a: &CostAllocation) -> Self {
        Self {
            id: a.id_typed().0,
            settlement_id: a.settlement_id().map(|s| s.0),
            status: a.status(),
            label: a.label().map(str::to_string),
            notes: a.notes().map(str::to_string),
            total_allocable: a.total_allocable(),
            items: a.items().to_vec(),
            created_by: a.created_by(),
            created_at: a.created_at(),
            invoiced_at: a.invoiced_at(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    pub id: AggregateId,
    pub number: String,
    pub document_type: DocumentType,
    pub status: InvoiceStatus,
    pub recipient: Option<InvoiceRecipient>,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub items: Vec<InvoiceItem>,
    pub net_amount: Decimal,
    pub tax_amount: Decimal,
    pub gross_amount: Decimal,
    pub cancelled_invoice_id: Option<InvoiceId>,
    pub correction_of_invoice_id: Option<InvoiceId>,
    pub source: Option<DocumentSource>,
    pub notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub storno_invoice_id: Option<InvoiceId>,
    pub credit_note_ids: Vec<InvoiceId>,
    pub created_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl From<&Invoice> for InvoiceResponse {
    fn from(i: &Invoice) -> Self {
        Self {
            id: i.id_typed().0,
            number: i.number().to_string(),
            document_type: i.document_type(),
            status: i.status(),
            recipient: i.recipient().cloned(),
            invoice_date: i.invoice_date(),
            due_date: i.due_date(),
            items: i.items().to_vec(),
            net_amount: i.net_amount(),
            tax_amount: i.tax_amount(),
            gross_amount: i.gross_amount(),
            cancelled_invoice_id: i.cancelled_invoice_id(),
            correction_of_invoice_id: i.correction_of_invoice_id(),
            source: i.source().cloned(),
            notes: i.notes().map(str::to_string),
            cancellation_reason: i.cancellation_reason().map(str::to_string),
            storno_invoice_id: i.storno_invoice_id(),
            credit_note_ids: i.credit_note_ids().to_vec(),
            created_at: i.created_at(),
            sent_at: i.sent_at(),
            paid_at: i.paid_at(),
            cancelled_at: i.cancelled_at(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LessorCreditNotesResponse {
    pub settlement: SettlementResponse,
    pub credit_notes: Vec<InvoiceResponse>,
}

impl From<&LessorCreditNotes> for LessorCreditNotesResponse {
    fn from(r: &LessorCreditNotes) -> Self {
        Self {
            settlement: SettlementResponse::from(&r.settlement),
            credit_notes: r.credit_notes.iter().map(InvoiceResponse::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AllocationInvoicesResponse {
    pub allocation: AllocationResponse,
    pub invoices: Vec<InvoiceResponse>,
}

impl From<&AllocationInvoices> for AllocationInvoicesResponse {
    fn from(r: &AllocationInvoices) -> Self {
        Self {
            allocation: AllocationResponse::from(&r.allocation),
            invoices: r.invoices.iter().map(InvoiceResponse::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CancellationResponse {
    pub original: InvoiceResponse,
    pub credit_note: InvoiceResponse,
}

impl From<&CancellationOutcome> for CancellationResponse {
    fn from(o: &CancellationOutcome) -> Self {
        Self {
            original: InvoiceResponse::from(&o.original),
            credit_note: InvoiceResponse::from(&o.credit_note),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CorrectionResponse {
    pub original: InvoiceResponse,
    pub credit_note: InvoiceResponse,
    pub correction: InvoiceResponse,
    pub deltas: Vec<PositionDelta>,
    pub net_delta: Decimal,
}

impl From<&CorrectionOutcome> for CorrectionResponse {
    fn from(o: &CorrectionOutcome) -> Self {
        Self {
            original: InvoiceResponse::from(&o.original),
            credit_note: InvoiceResponse::from(&o.credit_note),
            correction: InvoiceResponse::from(&o.correction),
            deltas: o.deltas.clone(),
            net_delta: o.net_delta,
        }
    }
}

/// One entry of a batch send.
#[derive(Debug, Serialize)]
pub struct SendResult {
    pub invoice_id: InvoiceId,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice: Option<InvoiceResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonValue>,
}

impl From<&SendOutcome> for SendResult {
    fn from(o: &SendOutcome) -> Self {
        match &o.result {
            Ok(invoice) => Self {
                invoice_id: o.invoice_id,
                ok: true,
                invoice: Some(InvoiceResponse::from(invoice)),
                error: None,
            },
            Err(e) => Self {
                invoice_id: o.invoice_id,
                ok: false,
                invoice: None,
                error: Some(error_summary(e)),
            },
        }
    }
}

fn error_summary(err: &ServiceError) -> JsonValue {
    match err.as_domain() {
        Some(e) => json!({ "error": e.code(), "message": e.to_string() }),
        None => json!({ "error": "internal_error", "message": "internal error" }),
    }
}
