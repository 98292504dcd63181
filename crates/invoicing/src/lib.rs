//! Invoicing domain (event-sourced).
//!
//! Invoices and credit notes are immutable once sent; every correction is a
//! new document. This crate holds the `Invoice` aggregate, line arithmetic and
//! the planners that turn a cancellation or correction request into the
//! documents and position updates the infrastructure commits atomically.

pub mod correction;
pub mod invoice;
pub mod line;

pub use correction::{
    CancellationPlan, CorrectionPlan, PartialCancelRequest, PositionCorrection, PositionDelta,
    plan_correction, plan_full_cancellation, plan_partial_cancellation,
};
pub use invoice::{
    CancelInvoice, CancelPositions, CreateInvoice, DocumentSource, Invoice, InvoiceCancelled,
    InvoiceCommand, InvoiceCreated, InvoiceEvent, InvoiceId, InvoicePaid, InvoiceRecipient,
    InvoiceSent, InvoiceStatus, MarkInvoicePaid, PositionCancellation, PositionsCancelled,
    SendInvoice,
};
pub use line::{InvoiceItem, InvoiceItemInput, LineAmounts, TaxType};
pub use windledger_numbering::DocumentType;
