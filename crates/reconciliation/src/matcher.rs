//! Transaction-to-invoice matching.
//!
//! Tiers, strongest first:
//! - `high`: an open invoice number occurs in the reference text
//! - `medium`: amount equals an invoice gross and the counterparty resembles the recipient
//! - `low`: amount-only match (one or several candidates)
//! - `none`: nothing fits

use std::collections::HashSet;

use windledger_core::DomainResult;

use crate::detect::parse_statement;
use crate::model::{
    BankTransaction, InvoiceCandidate, MatchConfidence, OpenInvoice, ReconciliationReport,
    TransactionMatch,
};

/// Minimum token overlap for two names to count as similar.
pub const NAME_SIMILARITY_THRESHOLD: f64 = 0.5;

const LEGAL_FORMS: &[&str] = &[
    "gmbh", "mbh", "co", "kg", "ag", "eg", "ug", "ohg", "gbr", "se", "kgaa", "ev", "ek",
    "haftungsbeschränkt", "ltd", "inc", "llc", "und",
];

fn name_tokens(name: &str) -> HashSet<String> {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !LEGAL_FORMS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Overlap coefficient of the significant name tokens (0.0 ..= 1.0).
///
/// Divides by the smaller token set so truncated bank names still match.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let a = name_tokens(a);
    let b = name_tokens(b);
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return 0.0;
    }
    let shared = a.intersection(&b).count();
    shared as f64 / smaller as f64
}

/// `number` occurs in `reference` as a whole token, so `RG-2026-1000` is not
/// found inside `RG-2026-10000`. Both arguments are expected uppercased.
fn mentions_number(reference: &str, number: &str) -> bool {
    reference.match_indices(number).any(|(start, _)| {
        let before = reference[..start].chars().next_back();
        let after = reference[start + number.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn candidate(tx: &BankTransaction, invoice: &OpenInvoice) -> InvoiceCandidate {
    InvoiceCandidate {
        invoice_id: invoice.invoice_id,
        number: invoice.number.clone(),
        gross_amount: invoice.gross_amount,
        amount_matches: invoice.gross_amount == tx.amount,
    }
}

fn match_one(tx: &BankTransaction, open: &[OpenInvoice]) -> TransactionMatch {
    let reference = tx.reference.to_uppercase();

    let mut by_number: Vec<InvoiceCandidate> = open
        .iter()
        .filter(|inv| {
            let number = inv.number.trim();
            !number.is_empty() && mentions_number(&reference, &number.to_uppercase())
        })
        .map(|inv| candidate(tx, inv))
        .collect();
    if !by_number.is_empty() {
        // amount-confirmed candidates first
        by_number.sort_by_key(|c| !c.amount_matches);
        return TransactionMatch {
            transaction: tx.clone(),
            confidence: MatchConfidence::High,
            candidates: by_number,
        };
    }

    let by_amount: Vec<&OpenInvoice> = open
        .iter()
        .filter(|inv| inv.gross_amount == tx.amount)
        .collect();
    if by_amount.is_empty() {
        return TransactionMatch {
            transaction: tx.clone(),
            confidence: MatchConfidence::None,
            candidates: Vec::new(),
        };
    }

    let by_name: Vec<InvoiceCandidate> = match tx.counterparty.as_deref() {
        Some(counterparty) => by_amount
            .iter()
            .filter(|inv| {
                name_similarity(counterparty, &inv.recipient_name) >= NAME_SIMILARITY_THRESHOLD
            })
            .map(|inv| candidate(tx, inv))
            .collect(),
        None => Vec::new(),
    };
    if !by_name.is_empty() {
        return TransactionMatch {
            transaction: tx.clone(),
            confidence: MatchConfidence::Medium,
            candidates: by_name,
        };
    }

    TransactionMatch {
        transaction: tx.clone(),
        confidence: MatchConfidence::Low,
        candidates: by_amount.into_iter().map(|inv| candidate(tx, inv)).collect(),
    }
}

/// Propose candidates for every transaction.
pub fn match_transactions(
    transactions: &[BankTransaction],
    open_invoices: &[OpenInvoice],
) -> Vec<TransactionMatch> {
    transactions
        .iter()
        .map(|tx| match_one(tx, open_invoices))
        .collect()
}

/// Parse an export and match it against the tenant's open invoices.
pub fn reconcile(text: &str, open_invoices: &[OpenInvoice]) -> DomainResult<ReconciliationReport> {
    let statement = parse_statement(text)?;
    let matches = match_transactions(&statement.transactions, open_invoices);

    Ok(ReconciliationReport {
        format: statement.format,
        transaction_count: statement.transactions.len(),
        skipped_records: statement.skipped(),
        issues: statement.issues,
        matches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BankFormat;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use windledger_core::AggregateId;

    fn invoice(number: &str, gross: Decimal, recipient: &str) -> OpenInvoice {
        OpenInvoice {
            invoice_id: AggregateId::new(),
            number: number.to_string(),
            gross_amount: gross,
            recipient_name: recipient.to_string(),
        }
    }

    fn tx(amount: Decimal, counterparty: Option<&str>, reference: &str) -> BankTransaction {
        BankTransaction {
            amount,
            value_date: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
            counterparty: counterparty.map(str::to_string),
            reference: reference.to_string(),
        }
    }

    fn open() -> Vec<OpenInvoice> {
        vec![
            invoice("RG-2026-0001", dec!(1190.00), "Bürgerwind eG"),
            invoice("RG-2026-0002", dec!(500.00), "Windpark Nord GmbH & Co. KG"),
            invoice("RG-2026-0003", dec!(500.00), "Solar Süd GmbH"),
        ]
    }

    #[test]
    fn invoice_number_in_reference_is_high() {
        let m = match_one(&tx(dec!(1190.00), None, "Zahlung rg-2026-0001 danke"), &open());
        assert_eq!(m.confidence, MatchConfidence::High);
        assert_eq!(m.candidates.len(), 1);
        assert!(m.candidates[0].amount_matches);
    }

    #[test]
    fn number_must_not_continue_into_a_longer_number() {
        let open = vec![invoice("RG-2026-1000", dec!(80.00), "Bürgerwind eG")];
        let m = match_one(&tx(dec!(80.00), None, "RG-2026-10000 Wartung"), &open);
        assert_eq!(m.confidence, MatchConfidence::Low);

        let m = match_one(&tx(dec!(80.00), None, "RG-2026-10000, RG-2026-1000."), &open);
        assert_eq!(m.confidence, MatchConfidence::High);
        assert!(!mentions_number("XRG-2026-1000", "RG-2026-1000"));
        assert!(mentions_number("RG-2026-1000", "RG-2026-1000"));
    }

    #[test]
    fn number_split_across_mt940_subfields_is_high() {
        let text = "\
:20:STARTUMS
:61:2601150115C1190,00NTRFNONREF
:86:166?00GUTSCHRIFT?20Zahlung Rechnung RG-2026-?210001 danke?32Buergerwind eG
";
        let report = reconcile(text, &open()).unwrap();
        assert_eq!(report.matches[0].transaction.reference, "Zahlung Rechnung RG-2026-0001 danke");
        assert_eq!(report.count(MatchConfidence::High), 1);
        assert_eq!(report.matches[0].candidates[0].number, "RG-2026-0001");
    }

    #[test]
    fn amount_and_similar_name_is_medium() {
        let m = match_one(&tx(dec!(500.00), Some("WINDPARK NORD GMBH"), "Umlage"), &open());
        assert_eq!(m.confidence, MatchConfidence::Medium);
        assert_eq!(m.candidates[0].number, "RG-2026-0002");
    }

    #[test]
    fn amount_only_is_low_with_every_candidate() {
        let m = match_one(&tx(dec!(500.00), Some("Unbekannt"), "Umlage"), &open());
        assert_eq!(m.confidence, MatchConfidence::Low);
        assert_eq!(m.candidates.len(), 2);
    }

    #[test]
    fn nothing_matching_is_none() {
        let m = match_one(&tx(dec!(-12.34), None, "Kontoführung"), &open());
        assert_eq!(m.confidence, MatchConfidence::None);
        assert!(m.candidates.is_empty());
    }

    #[test]
    fn legal_forms_do_not_count_towards_similarity() {
        assert_eq!(name_similarity("Muster GmbH", "Anders GmbH"), 0.0);
        assert_eq!(name_similarity("Muster GmbH", "Hans Muster GmbH & Co. KG"), 1.0);
        assert_eq!(name_similarity("", "Muster"), 0.0);
    }

    #[test]
    fn reconcile_reports_format_counts_and_matches() {
        let text = "\
:20:STARTUMS
:61:2601150115C1190,00NTRFNONREF
:86:166?00GUTSCHRIFT?20RG-2026-0001?32Buergerwind eG
:61:BROKEN
:62F:C260116EUR1190,00
";
        let report = reconcile(text, &open()).unwrap();
        assert_eq!(report.format, BankFormat::Mt940);
        assert_eq!(report.transaction_count, 1);
        assert_eq!(report.skipped_records, 1);
        assert_eq!(report.count(MatchConfidence::High), 1);
    }

    mod props {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn similarity_is_symmetric_and_bounded(a in "[A-Za-z &.-]{0,40}", b in "[A-Za-z &.-]{0,40}") {
                let ab = name_similarity(&a, &b);
                prop_assert!((0.0..=1.0).contains(&ab));
                prop_assert_eq!(ab, name_similarity(&b, &a));
            }

            #[test]
            fn garbage_mt940_records_never_abort_the_file(lines in prop::collection::vec("[:0-9A-Z,?/ ]{0,30}", 0..30)) {
                let text = format!(":20:STARTUMS\n{}\n", lines.join("\n"));
                let report = reconcile(&text, &[]).unwrap();
                prop_assert_eq!(report.transaction_count, report.matches.len());
            }
        }
    }
}
