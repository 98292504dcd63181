use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use windledger_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use windledger_events::Event;
use windledger_numbering::DocumentType;

use crate::line::{InvoiceItem, InvoiceItemInput};

/// Invoice identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub AggregateId);

impl InvoiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Sent => "SENT",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Cancelled => "CANCELLED",
        }
    }

    /// Issued documents have frozen amounts.
    pub fn is_issued(self) -> bool {
        matches!(self, InvoiceStatus::Sent | InvoiceStatus::Paid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRecipient {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Lessor, operating entity or customer id in the master data.
    #[serde(default)]
    pub party_id: Option<Uuid>,
}

/// Where a generated document came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentSource {
    Settlement {
        settlement_id: AggregateId,
        lease_id: Uuid,
    },
    Allocation {
        allocation_id: AggregateId,
        entity_id: Uuid,
    },
}

/// Quantity magnitude reversed on one position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionCancellation {
    pub position: u32,
    pub quantity: Decimal,
}

/// Aggregate root: Invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    tenant_id: Option<TenantId>,
    number: String,
    document_type: DocumentType,
    status: InvoiceStatus,
    recipient: Option<InvoiceRecipient>,
    invoice_date: Option<NaiveDate>,
    due_date: Option<NaiveDate>,
    items: Vec<InvoiceItem>,
    net_amount: Decimal,
    tax_amount: Decimal,
    gross_amount: Decimal,
    cancelled_invoice_id: Option<InvoiceId>,
    correction_of_invoice_id: Option<InvoiceId>,
    source: Option<DocumentSource>,
    notes: Option<String>,
    cancellation_reason: Option<String>,
    storno_invoice_id: Option<InvoiceId>,
    credit_note_ids: Vec<InvoiceId>,
    created_at: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
    paid_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Invoice {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            tenant_id: None,
            number: String::new(),
            document_type: DocumentType::Invoice,
            status: InvoiceStatus::Draft,
            recipient: None,
            invoice_date: None,
            due_date: None,
            items: Vec::new(),
            net_amount: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            gross_amount: Decimal::ZERO,
            cancelled_invoice_id: None,
            correction_of_invoice_id: None,
            source: None,
            notes: None,
            cancellation_reason: None,
            storno_invoice_id: None,
            credit_note_ids: Vec::new(),
            created_at: None,
            sent_at: None,
            paid_at: None,
            cancelled_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn document_type(&self) -> DocumentType {
        self.document_type
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn recipient(&self) -> Option<&InvoiceRecipient> {
        self.recipient.as_ref()
    }

    pub fn invoice_date(&self) -> Option<NaiveDate> {
        self.invoice_date
    }

    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_date
    }

    pub fn items(&self) -> &[InvoiceItem] {
        &self.items
    }

    pub fn net_amount(&self) -> Decimal {
        self.net_amount
    }

    pub fn tax_amount(&self) -> Decimal {
        self.tax_amount
    }

    pub fn gross_amount(&self) -> Decimal {
        self.gross_amount
    }

    pub fn cancelled_invoice_id(&self) -> Option<InvoiceId> {
        self.cancelled_invoice_id
    }

    pub fn correction_of_invoice_id(&self) -> Option<InvoiceId> {
        self.correction_of_invoice_id
    }

    pub fn source(&self) -> Option<&DocumentSource> {
        self.source.as_ref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn storno_invoice_id(&self) -> Option<InvoiceId> {
        self.storno_invoice_id
    }

    /// Partial-cancellation and correction credit notes referencing this invoice.
    pub fn credit_note_ids(&self) -> &[InvoiceId] {
        &self.credit_note_ids
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn has_remaining_quantity(&self) -> bool {
        self.items.iter().any(|i| !i.is_fully_cancelled())
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateInvoice.
///
/// The number is reserved by the caller in the same unit of work.
/// `issue_immediately` creates the document directly in SENT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub number: String,
    pub document_type: DocumentType,
    pub recipient: InvoiceRecipient,
    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub items: Vec<InvoiceItemInput>,
    pub cancelled_invoice_id: Option<InvoiceId>,
    pub correction_of_invoice_id: Option<InvoiceId>,
    pub source: Option<DocumentSource>,
    pub notes: Option<String>,
    pub issue_immediately: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SendInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkInvoicePaid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkInvoicePaid {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelInvoice (full cancellation; the storno document is created alongside).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub reason: String,
    pub storno_invoice_id: InvoiceId,
    pub cancellations: Vec<PositionCancellation>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelPositions (partial cancellation or correction reversal).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPositions {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub reason: String,
    pub credit_note_id: InvoiceId,
    pub cancellations: Vec<PositionCancellation>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    Create(CreateInvoice),
    Send(SendInvoice),
    MarkPaid(MarkInvoicePaid),
    Cancel(CancelInvoice),
    CancelPositions(CancelPositions),
}

/// Event: InvoiceCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCreated {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub number: String,
    pub document_type: DocumentType,
    pub recipient: InvoiceRecipient,
    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub items: Vec<InvoiceItem>,
    pub net_amount: Decimal,
    pub tax_amount: Decimal,
    pub gross_amount: Decimal,
    pub cancelled_invoice_id: Option<InvoiceId>,
    pub correction_of_invoice_id: Option<InvoiceId>,
    pub source: Option<DocumentSource>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceSent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSent {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoicePaid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicePaid {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCancelled {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub reason: String,
    pub storno_invoice_id: InvoiceId,
    pub cancellations: Vec<PositionCancellation>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PositionsCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionsCancelled {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub reason: String,
    pub credit_note_id: InvoiceId,
    pub cancellations: Vec<PositionCancellation>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceCreated(InvoiceCreated),
    InvoiceSent(InvoiceSent),
    InvoicePaid(InvoicePaid),
    InvoiceCancelled(InvoiceCancelled),
    PositionsCancelled(PositionsCancelled),
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceCreated(_) => "invoicing.invoice.created",
            InvoiceEvent::InvoiceSent(_) => "invoicing.invoice.sent",
            InvoiceEvent::InvoicePaid(_) => "invoicing.invoice.paid",
            InvoiceEvent::InvoiceCancelled(_) => "invoicing.invoice.cancelled",
            InvoiceEvent::PositionsCancelled(_) => "invoicing.invoice.positions_cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceCreated(e) => e.occurred_at,
            InvoiceEvent::InvoiceSent(e) => e.occurred_at,
            InvoiceEvent::InvoicePaid(e) => e.occurred_at,
            InvoiceEvent::InvoiceCancelled(e) => e.occurred_at,
            InvoiceEvent::PositionsCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceCreated(e) => {
                self.id = e.invoice_id;
                self.tenant_id = Some(e.tenant_id);
                self.number = e.number.clone();
                self.document_type = e.document_type;
                self.recipient = Some(e.recipient.clone());
                self.invoice_date = Some(e.invoice_date);
                self.due_date = e.due_date;
                self.items = e.items.clone();
                self.net_amount = e.net_amount;
                self.tax_amount = e.tax_amount;
                self.gross_amount = e.gross_amount;
                self.cancelled_invoice_id = e.cancelled_invoice_id;
                self.correction_of_invoice_id = e.correction_of_invoice_id;
                self.source = e.source.clone();
                self.notes = e.notes.clone();
                self.created_at = Some(e.occurred_at);
                self.status = InvoiceStatus::Draft;
                self.created = true;
            }
            InvoiceEvent::InvoiceSent(e) => {
                self.sent_at = Some(e.occurred_at);
                self.status = InvoiceStatus::Sent;
            }
            InvoiceEvent::InvoicePaid(e) => {
                self.paid_at = Some(e.occurred_at);
                self.status = InvoiceStatus::Paid;
            }
            InvoiceEvent::InvoiceCancelled(e) => {
                self.record_cancellations(&e.cancellations);
                self.cancellation_reason = Some(e.reason.clone());
                self.storno_invoice_id = Some(e.storno_invoice_id);
                self.cancelled_at = Some(e.occurred_at);
                self.status = InvoiceStatus::Cancelled;
            }
            InvoiceEvent::PositionsCancelled(e) => {
                self.record_cancellations(&e.cancellations);
                self.credit_note_ids.push(e.credit_note_id);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::Create(cmd) => self.handle_create(cmd),
            InvoiceCommand::Send(cmd) => self.handle_send(cmd),
            InvoiceCommand::MarkPaid(cmd) => self.handle_mark_paid(cmd),
            InvoiceCommand::Cancel(cmd) => self.handle_cancel(cmd),
            InvoiceCommand::CancelPositions(cmd) => self.handle_cancel_positions(cmd),
        }
    }
}

impl Invoice {
    fn record_cancellations(&mut self, cancellations: &[PositionCancellation]) {
        for c in cancellations {
            if let Some(item) = self.items.iter_mut().find(|i| i.position == c.position) {
                item.cancelled_quantity += c.quantity;
            }
        }
    }

    fn ensure_existing(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != invoice_id {
            return Err(DomainError::invariant("invoice_id mismatch"));
        }
        Ok(())
    }

    /// Preconditions shared by every cancellation and correction.
    pub fn ensure_correctable(&self) -> Result<(), DomainError> {
        if !self.status.is_issued() {
            return Err(DomainError::invalid_status(self.status.as_str(), "SENT or PAID"));
        }
        if !self.has_remaining_quantity() {
            return Err(DomainError::AllPositionsAlreadyCancelled);
        }
        Ok(())
    }

    /// Validates position references and quantities against what remains.
    fn check_cancellations(&self, cancellations: &[PositionCancellation]) -> Result<(), DomainError> {
        if cancellations.is_empty() {
            return Err(DomainError::validation("at least one position is required"));
        }
        for (idx, c) in cancellations.iter().enumerate() {
            if cancellations[..idx].iter().any(|p| p.position == c.position) {
                return Err(DomainError::validation(format!(
                    "position {} is listed more than once",
                    c.position
                )));
            }
            let item = self
                .items
                .iter()
                .find(|i| i.position == c.position)
                .ok_or(DomainError::InvalidPosition {
                    position: c.position,
                    count: self.items.len(),
                })?;
            if item.is_fully_cancelled() {
                return Err(DomainError::PositionAlreadyCancelled {
                    position: c.position,
                });
            }
            if c.quantity <= Decimal::ZERO {
                return Err(DomainError::validation("cancel quantity must be positive"));
            }
            if c.quantity > item.remaining_quantity() {
                return Err(DomainError::QuantityExceedsOriginal {
                    position: c.position,
                    requested: c.quantity,
                    available: item.remaining_quantity(),
                });
            }
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("invoice already exists"));
        }
        if self.id != cmd.invoice_id {
            return Err(DomainError::invariant("invoice_id mismatch"));
        }
        if cmd.number.trim().is_empty() {
            return Err(DomainError::validation("invoice number must not be empty"));
        }
        if cmd.recipient.name.trim().is_empty() {
            return Err(DomainError::validation("recipient name must not be empty"));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation("cannot create invoice without positions"));
        }
        if let Some(due) = cmd.due_date {
            if due < cmd.invoice_date {
                return Err(DomainError::validation("due date precedes invoice date"));
            }
        }

        let mut items = Vec::with_capacity(cmd.items.len());
        for (idx, input) in cmd.items.iter().enumerate() {
            input.validate()?;
            let position = u32::try_from(idx + 1)
                .map_err(|_| DomainError::validation("too many positions"))?;
            items.push(InvoiceItem::from_input(position, input));
        }

        let net_amount = items.iter().map(|i| i.net).sum();
        let tax_amount = items.iter().map(|i| i.tax).sum();
        let gross_amount = items.iter().map(|i| i.gross).sum();

        let mut events = vec![InvoiceEvent::InvoiceCreated(InvoiceCreated {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            number: cmd.number.clone(),
            document_type: cmd.document_type,
            recipient: cmd.recipient.clone(),
            invoice_date: cmd.invoice_date,
            due_date: cmd.due_date,
            items,
            net_amount,
            tax_amount,
            gross_amount,
            cancelled_invoice_id: cmd.cancelled_invoice_id,
            correction_of_invoice_id: cmd.correction_of_invoice_id,
            source: cmd.source.clone(),
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })];

        if cmd.issue_immediately {
            events.push(InvoiceEvent::InvoiceSent(InvoiceSent {
                tenant_id: cmd.tenant_id,
                invoice_id: cmd.invoice_id,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_send(&self, cmd: &SendInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.invoice_id)?;
        if self.status != InvoiceStatus::Draft {
            return Err(DomainError::invalid_transition(
                "send",
                self.status.as_str(),
                InvoiceStatus::Draft.as_str(),
            ));
        }

        Ok(vec![InvoiceEvent::InvoiceSent(InvoiceSent {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_paid(&self, cmd: &MarkInvoicePaid) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.invoice_id)?;
        if self.status != InvoiceStatus::Sent {
            return Err(DomainError::invalid_transition(
                "mark_paid",
                self.status.as_str(),
                InvoiceStatus::Sent.as_str(),
            ));
        }

        Ok(vec![InvoiceEvent::InvoicePaid(InvoicePaid {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.invoice_id)?;
        self.ensure_correctable()?;
        let reason = required_reason(&cmd.reason)?;
        self.check_cancellations(&cmd.cancellations)?;

        Ok(vec![InvoiceEvent::InvoiceCancelled(InvoiceCancelled {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            reason,
            storno_invoice_id: cmd.storno_invoice_id,
            cancellations: cmd.cancellations.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel_positions(
        &self,
        cmd: &CancelPositions,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.invoice_id)?;
        self.ensure_correctable()?;
        let reason = required_reason(&cmd.reason)?;
        self.check_cancellations(&cmd.cancellations)?;

        Ok(vec![InvoiceEvent::PositionsCancelled(PositionsCancelled {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            reason,
            credit_note_id: cmd.credit_note_id,
            cancellations: cmd.cancellations.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

pub(crate) fn required_reason(reason: &str) -> Result<String, DomainError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(DomainError::validation("a reason is required"));
    }
    Ok(reason.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::line::TaxType;
    use rust_decimal_macros::dec;
    use windledger_events::execute;

    pub(crate) fn create_cmd(tenant_id: TenantId, invoice_id: InvoiceId) -> CreateInvoice {
        CreateInvoice {
            tenant_id,
            invoice_id,
            number: "RG-2026-0001".to_string(),
            document_type: DocumentType::Invoice,
            recipient: InvoiceRecipient {
                name: "Bürgerwind eG".to_string(),
                email: Some("buchhaltung@buergerwind.example".to_string()),
                party_id: None,
            },
            invoice_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2026, 3, 31),
            items: vec![
                InvoiceItemInput {
                    description: "Betriebsführung".to_string(),
                    quantity: dec!(10),
                    unit: Some("h".to_string()),
                    unit_price: dec!(80),
                    tax_type: TaxType::Standard,
                },
                InvoiceItemInput {
                    description: "Wartungspauschale".to_string(),
                    quantity: dec!(2),
                    unit: None,
                    unit_price: dec!(100),
                    tax_type: TaxType::Standard,
                },
            ],
            cancelled_invoice_id: None,
            correction_of_invoice_id: None,
            source: None,
            notes: None,
            issue_immediately: false,
            occurred_at: Utc::now(),
        }
    }

    /// A sent invoice: 10 x 80 + 2 x 100 = 1000 net, 1190 gross.
    pub(crate) fn sent_invoice() -> (TenantId, Invoice) {
        let tenant = TenantId::new();
        let id = InvoiceId::new(AggregateId::new());
        let mut invoice = Invoice::empty(id);
        let mut cmd = create_cmd(tenant, id);
        cmd.issue_immediately = true;
        execute(&mut invoice, &InvoiceCommand::Create(cmd)).unwrap();
        (tenant, invoice)
    }

    #[test]
    fn create_computes_totals_and_positions() {
        let tenant = TenantId::new();
        let id = InvoiceId::new(AggregateId::new());
        let mut invoice = Invoice::empty(id);
        execute(&mut invoice, &InvoiceCommand::Create(create_cmd(tenant, id))).unwrap();

        assert_eq!(invoice.status(), InvoiceStatus::Draft);
        assert_eq!(invoice.net_amount(), dec!(1000));
        assert_eq!(invoice.tax_amount(), dec!(190));
        assert_eq!(invoice.gross_amount(), dec!(1190));
        assert_eq!(invoice.items()[1].position, 2);
    }

    #[test]
    fn issue_immediately_emits_sent() {
        let (_, invoice) = sent_invoice();
        assert_eq!(invoice.status(), InvoiceStatus::Sent);
        assert_eq!(invoice.version(), 2);
    }

    #[test]
    fn lifecycle_send_then_pay() {
        let tenant = TenantId::new();
        let id = InvoiceId::new(AggregateId::new());
        let mut invoice = Invoice::empty(id);
        execute(&mut invoice, &InvoiceCommand::Create(create_cmd(tenant, id))).unwrap();

        let pay = InvoiceCommand::MarkPaid(MarkInvoicePaid {
            tenant_id: tenant,
            invoice_id: id,
            occurred_at: Utc::now(),
        });
        assert!(matches!(
            execute(&mut invoice, &pay),
            Err(DomainError::InvalidTransition { .. })
        ));

        let send = InvoiceCommand::Send(SendInvoice {
            tenant_id: tenant,
            invoice_id: id,
            occurred_at: Utc::now(),
        });
        execute(&mut invoice, &send).unwrap();
        execute(&mut invoice, &pay).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Paid);
        assert!(execute(&mut invoice, &send).is_err());
    }

    #[test]
    fn drafts_cannot_be_cancelled() {
        let tenant = TenantId::new();
        let id = InvoiceId::new(AggregateId::new());
        let mut invoice = Invoice::empty(id);
        execute(&mut invoice, &InvoiceCommand::Create(create_cmd(tenant, id))).unwrap();

        let cancel = InvoiceCommand::Cancel(CancelInvoice {
            tenant_id: tenant,
            invoice_id: id,
            reason: "falscher Empfänger".to_string(),
            storno_invoice_id: InvoiceId::new(AggregateId::new()),
            cancellations: vec![PositionCancellation { position: 1, quantity: dec!(10) }],
            occurred_at: Utc::now(),
        });
        let err = execute(&mut invoice, &cancel).unwrap_err();
        assert_eq!(err, DomainError::invalid_status("DRAFT", "SENT or PAID"));
    }

    #[test]
    fn position_cancellation_keeps_status() {
        let (tenant, mut invoice) = sent_invoice();
        let cmd = InvoiceCommand::CancelPositions(CancelPositions {
            tenant_id: tenant,
            invoice_id: invoice.id_typed(),
            reason: "Stunden zu viel berechnet".to_string(),
            credit_note_id: InvoiceId::new(AggregateId::new()),
            cancellations: vec![PositionCancellation { position: 1, quantity: dec!(4) }],
            occurred_at: Utc::now(),
        });
        execute(&mut invoice, &cmd).unwrap();

        assert_eq!(invoice.status(), InvoiceStatus::Sent);
        assert_eq!(invoice.items()[0].remaining_quantity(), dec!(6));
        assert_eq!(invoice.credit_note_ids().len(), 1);
        // amounts of an issued document never change
        assert_eq!(invoice.gross_amount(), dec!(1190));
    }

    #[test]
    fn empty_invoice_is_rejected() {
        let tenant = TenantId::new();
        let id = InvoiceId::new(AggregateId::new());
        let mut cmd = create_cmd(tenant, id);
        cmd.items.clear();
        let err = Invoice::empty(id).handle(&InvoiceCommand::Create(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
