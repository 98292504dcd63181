//! Invoice positions and their arithmetic.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use windledger_core::{DomainError, DomainResult, round_money};

/// VAT category of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaxType {
    /// 19 %
    Standard,
    /// 7 %
    Reduced,
    /// 0 %, e.g. land lease or exempt fund shares.
    Exempt,
}

impl TaxType {
    pub fn rate(self) -> Decimal {
        match self {
            TaxType::Standard => Decimal::new(19, 2),
            TaxType::Reduced => Decimal::new(7, 2),
            TaxType::Exempt => Decimal::ZERO,
        }
    }
}

/// Net, tax and gross of one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAmounts {
    pub net: Decimal,
    pub tax: Decimal,
    pub gross: Decimal,
}

impl LineAmounts {
    /// `net = round(qty * price)`, `tax = round(net * rate)`, `gross = net + tax`.
    ///
    /// Rounding is symmetric, so negating the quantity negates every amount.
    pub fn compute(quantity: Decimal, unit_price: Decimal, tax_type: TaxType) -> Self {
        let net = round_money(quantity * unit_price);
        let tax = round_money(net * tax_type.rate());
        Self {
            net,
            tax,
            gross: net + tax,
        }
    }
}

/// Position as requested by a caller (before numbering and arithmetic).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItemInput {
    pub description: String,
    pub quantity: Decimal,
    #[serde(default)]
    pub unit: Option<String>,
    pub unit_price: Decimal,
    pub tax_type: TaxType,
}

impl InvoiceItemInput {
    pub fn validate(&self) -> DomainResult<()> {
        if self.description.trim().is_empty() {
            return Err(DomainError::validation("position description must not be empty"));
        }
        if self.quantity.is_zero() {
            return Err(DomainError::validation("position quantity must not be zero"));
        }
        Ok(())
    }
}

/// A stored position. `position` is 1-based and never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub position: u32,
    pub description: String,
    pub quantity: Decimal,
    pub unit: Option<String>,
    pub unit_price: Decimal,
    pub tax_type: TaxType,
    pub net: Decimal,
    pub tax: Decimal,
    pub gross: Decimal,
    /// Magnitude already reversed by credit notes (0 ..= |quantity|).
    #[serde(default)]
    pub cancelled_quantity: Decimal,
}

impl InvoiceItem {
    pub fn from_input(position: u32, input: &InvoiceItemInput) -> Self {
        let amounts = LineAmounts::compute(input.quantity, input.unit_price, input.tax_type);
        Self {
            position,
            description: input.description.trim().to_string(),
            quantity: input.quantity,
            unit: input.unit.clone(),
            unit_price: input.unit_price,
            tax_type: input.tax_type,
            net: amounts.net,
            tax: amounts.tax,
            gross: amounts.gross,
            cancelled_quantity: Decimal::ZERO,
        }
    }

    /// Quantity magnitude that can still be cancelled.
    pub fn remaining_quantity(&self) -> Decimal {
        (self.quantity.abs() - self.cancelled_quantity).max(Decimal::ZERO)
    }

    pub fn is_fully_cancelled(&self) -> bool {
        self.remaining_quantity().is_zero()
    }

    /// Remaining quantity carrying the original sign.
    pub fn signed_remaining(&self) -> Decimal {
        self.with_sign(self.remaining_quantity())
    }

    /// Apply the sign of this position's quantity to a magnitude.
    pub fn with_sign(&self, magnitude: Decimal) -> Decimal {
        if self.quantity.is_sign_negative() {
            -magnitude
        } else {
            magnitude
        }
    }

    /// Position reversing `magnitude` units of this one at the original price and tax.
    pub fn mirror(&self, magnitude: Decimal) -> InvoiceItemInput {
        InvoiceItemInput {
            description: self.description.clone(),
            quantity: -self.with_sign(magnitude),
            unit: self.unit.clone(),
            unit_price: self.unit_price,
            tax_type: self.tax_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn standard_rate_line() {
        let a = LineAmounts::compute(dec!(10), dec!(100), TaxType::Standard);
        assert_eq!(a.net, dec!(1000));
        assert_eq!(a.tax, dec!(190));
        assert_eq!(a.gross, dec!(1190));
    }

    #[test]
    fn negated_quantity_negates_amounts() {
        let a = LineAmounts::compute(dec!(3), dec!(0.335), TaxType::Reduced);
        let b = LineAmounts::compute(dec!(-3), dec!(0.335), TaxType::Reduced);
        assert_eq!(a.net, dec!(1.01));
        assert_eq!(b.net, -a.net);
        assert_eq!(b.tax, -a.tax);
        assert_eq!(b.gross, -a.gross);
    }

    #[test]
    fn mirror_of_negative_position_is_positive() {
        let item = InvoiceItem::from_input(
            1,
            &InvoiceItemInput {
                description: "Gutschrift Pacht".to_string(),
                quantity: dec!(-1),
                unit: None,
                unit_price: dec!(500),
                tax_type: TaxType::Exempt,
            },
        );
        assert_eq!(item.remaining_quantity(), dec!(1));
        assert_eq!(item.mirror(dec!(1)).quantity, dec!(1));
    }
}
