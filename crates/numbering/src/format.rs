//! Number template rendering.
//!
//! Placeholders: `{YYYY}` four-digit year, `{YY}` two-digit year, `{MM}`
//! two-digit month, `{NUMBER}` the counter zero-padded to the configured width.

use serde::{Deserialize, Serialize};

use windledger_core::{DomainError, DomainResult};

pub const DEFAULT_DIGITS: u8 = 4;
pub const MAX_DIGITS: u8 = 12;

const NUMBER_PLACEHOLDER: &str = "{NUMBER}";

/// Validated number template plus zero-padding width.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberFormat {
    template: String,
    digits: u8,
}

impl NumberFormat {
    pub fn new(template: impl Into<String>, digits: u8) -> DomainResult<Self> {
        let template = template.into();
        if template.trim().is_empty() {
            return Err(DomainError::validation("number format must not be empty"));
        }
        if !template.contains(NUMBER_PLACEHOLDER) {
            return Err(DomainError::validation(
                "number format must contain the {NUMBER} placeholder",
            ));
        }
        if digits == 0 || digits > MAX_DIGITS {
            return Err(DomainError::validation(format!(
                "number digits must be between 1 and {MAX_DIGITS}"
            )));
        }
        Ok(Self { template, digits })
    }

    /// Known-good templates compiled into the binary.
    pub(crate) fn builtin(template: &str, digits: u8) -> Self {
        Self {
            template: template.to_string(),
            digits,
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn digits(&self) -> u8 {
        self.digits
    }

    /// Render a single number. Counters wider than `digits` are printed in full.
    pub fn render(&self, year: i32, month: u32, number: u64) -> String {
        let width = usize::from(self.digits);
        self.template
            .replace("{YYYY}", &format!("{year:04}"))
            .replace("{YY}", &format!("{:02}", year.rem_euclid(100)))
            .replace("{MM}", &format!("{month:02}"))
            .replace(NUMBER_PLACEHOLDER, &format!("{number:0width$}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_every_placeholder() {
        let f = NumberFormat::new("RG-{YYYY}/{YY}-{MM}-{NUMBER}", 4).unwrap();
        assert_eq!(f.render(2026, 3, 7), "RG-2026/26-03-0007");
    }

    #[test]
    fn wide_counters_are_not_truncated() {
        let f = NumberFormat::new("GS-{NUMBER}", 2).unwrap();
        assert_eq!(f.render(2026, 1, 1234), "GS-1234");
    }

    #[test]
    fn template_without_number_is_rejected() {
        assert!(NumberFormat::new("RG-{YYYY}", 4).is_err());
        assert!(NumberFormat::new("RG-{NUMBER}", 0).is_err());
        assert!(NumberFormat::new("RG-{NUMBER}", 13).is_err());
    }
}
