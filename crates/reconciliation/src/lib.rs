//! Bank statement import and invoice matching.
//!
//! Parses MT940 and CAMT.053 exports into signed transactions and proposes
//! candidate invoices with a confidence tier. Nothing here applies payments;
//! every match is a proposal for a human to confirm.

pub mod detect;
pub mod formats;
pub mod matcher;
pub mod model;

pub use detect::{detect_format, parse_statement};
pub use matcher::{match_transactions, name_similarity, reconcile};
pub use model::{
    BankFormat, BankTransaction, InvoiceCandidate, MatchConfidence, OpenInvoice, ParseIssue,
    ParsedStatement, ReconciliationReport, TransactionMatch,
};
