use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use windledger_core::AggregateId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BankFormat {
    Mt940,
    Camt053,
}

impl BankFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            BankFormat::Mt940 => "MT940",
            BankFormat::Camt053 => "CAMT053",
        }
    }
}

/// One booked transaction. `amount` is signed: credits positive, debits negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankTransaction {
    pub amount: Decimal,
    pub value_date: NaiveDate,
    pub counterparty: Option<String>,
    pub reference: String,
}

/// A record that could not be parsed; the rest of the file is still used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseIssue {
    /// 1-based record number within the file.
    pub record: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedStatement {
    pub format: BankFormat,
    pub transactions: Vec<BankTransaction>,
    pub issues: Vec<ParseIssue>,
}

impl ParsedStatement {
    pub fn new(format: BankFormat) -> Self {
        Self {
            format,
            transactions: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn skipped(&self) -> usize {
        self.issues.len()
    }

    pub(crate) fn skip(&mut self, record: usize, message: impl Into<String>) {
        self.issues.push(ParseIssue {
            record,
            message: message.into(),
        });
    }
}

/// An invoice that can still receive a payment (status SENT).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenInvoice {
    pub invoice_id: AggregateId,
    pub number: String,
    pub gross_amount: Decimal,
    pub recipient_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchConfidence {
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCandidate {
    pub invoice_id: AggregateId,
    pub number: String,
    pub gross_amount: Decimal,
    pub amount_matches: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMatch {
    pub transaction: BankTransaction,
    pub confidence: MatchConfidence,
    pub candidates: Vec<InvoiceCandidate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub format: BankFormat,
    pub transaction_count: usize,
    pub skipped_records: usize,
    pub issues: Vec<ParseIssue>,
    pub matches: Vec<TransactionMatch>,
}

impl ReconciliationReport {
    pub fn count(&self, confidence: MatchConfidence) -> usize {
        self.matches
            .iter()
            .filter(|m| m.confidence == confidence)
            .count()
    }
}
