//! Format auto-detection by structural markers.

use windledger_core::{DomainError, DomainResult};

use crate::formats::{camt053, mt940};
use crate::model::{BankFormat, ParsedStatement};

/// MT940 opens with `:20:` (or a SWIFT `{1:` header); CAMT.053 is markup
/// containing a `BkToCstmrStmt` statement element.
pub fn detect_format(text: &str) -> Option<BankFormat> {
    let text = text.trim_start_matches('\u{feff}');
    let first = text.lines().map(str::trim).find(|l| !l.is_empty())?;

    if first.starts_with(":20:") || first.starts_with("{1:") {
        return Some(BankFormat::Mt940);
    }
    if first.starts_with('<') && text.contains("BkToCstmrStmt") {
        return Some(BankFormat::Camt053);
    }
    None
}

/// Detect and parse. Unknown formats are a validation error.
pub fn parse_statement(text: &str) -> DomainResult<ParsedStatement> {
    match detect_format(text) {
        Some(BankFormat::Mt940) => mt940::parse(text.trim_start_matches('\u{feff}')),
        Some(BankFormat::Camt053) => camt053::parse(text.trim_start_matches('\u{feff}')),
        None => Err(DomainError::validation(
            "unrecognized bank statement format (expected MT940 or CAMT.053)",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_both_formats() {
        assert_eq!(detect_format("\n\n:20:STARTUMS\n:25:x"), Some(BankFormat::Mt940));
        assert_eq!(
            detect_format("{1:F01DEUTDEFFAXXX0000000000}{2:O940}{4:\n:20:X\n-}"),
            Some(BankFormat::Mt940)
        );
        assert_eq!(
            detect_format("\u{feff}<?xml version=\"1.0\"?><Document><BkToCstmrStmt/></Document>"),
            Some(BankFormat::Camt053)
        );
    }

    #[test]
    fn other_markup_or_csv_is_rejected() {
        assert_eq!(detect_format("<Document><CstmrCdtTrfInitn/></Document>"), None);
        assert_eq!(detect_format("date;amount;text\n"), None);
        assert!(matches!(
            parse_statement("   "),
            Err(DomainError::Validation(_))
        ));
    }
}
