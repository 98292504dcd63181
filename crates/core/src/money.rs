//! Monetary rounding (single currency, EUR).
//!
//! Amounts are `rust_decimal::Decimal`. Intermediate ratios keep full
//! precision; rounding to cents happens only where a value leaves a
//! calculation (stored totals, document lines).

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{DomainError, DomainResult};

/// Number of decimal places for stored currency amounts.
pub const MONEY_SCALE: u32 = 2;

/// Commercial rounding to cents (half away from zero, symmetric for negatives).
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Split `total` across `weights` proportionally.
///
/// Shares are differences of the rounded running allocation, so each share is
/// within one cent of its exact value, zero weights get exactly zero and the
/// shares always sum to `round_money(total)`.
pub fn split_proportionally(total: Decimal, weights: &[Decimal]) -> DomainResult<Vec<Decimal>> {
    if weights.is_empty() {
        return Err(DomainError::validation("at least one weight is required"));
    }
    if weights.iter().any(|w| w.is_sign_negative()) {
        return Err(DomainError::validation("weights must not be negative"));
    }

    let weight_sum: Decimal = weights.iter().copied().sum();
    if weight_sum.is_zero() {
        return Err(DomainError::validation("sum of weights must be positive"));
    }

    let total = round_money(total);
    let mut shares = Vec::with_capacity(weights.len());
    let mut cumulative_weight = Decimal::ZERO;
    let mut allocated = Decimal::ZERO;

    for (idx, weight) in weights.iter().enumerate() {
        cumulative_weight += *weight;
        let running = if idx + 1 == weights.len() {
            total
        } else {
            round_money(total * cumulative_weight / weight_sum)
        };
        shares.push(running - allocated);
        allocated = running;
    }

    Ok(shares)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round_money(dec!(0.005)), dec!(0.01));
        assert_eq!(round_money(dec!(-0.005)), dec!(-0.01));
        assert_eq!(round_money(dec!(1.234)), dec!(1.23));
    }

    #[test]
    fn rounding_follows_the_running_total() {
        let shares = split_proportionally(dec!(100), &[dec!(1), dec!(1), dec!(1)]).unwrap();
        assert_eq!(shares, vec![dec!(33.33), dec!(33.34), dec!(33.33)]);
    }

    #[test]
    fn zero_weight_gets_nothing_and_last_share_stays_positive() {
        let shares = split_proportionally(
            dec!(100.02),
            &[dec!(1), dec!(1), dec!(1), dec!(1), dec!(0)],
        )
        .unwrap();
        assert_eq!(shares[4], Decimal::ZERO);
        assert!(shares.iter().all(|s| !s.is_sign_negative()));
        assert_eq!(shares.iter().copied().sum::<Decimal>(), dec!(100.02));
    }

    #[test]
    fn no_share_drifts_beyond_a_cent() {
        let shares = split_proportionally(dec!(100.05), &[dec!(1); 10]).unwrap();
        for share in &shares {
            assert!((*share - dec!(10.005)).abs() <= dec!(0.01), "share {share}");
        }
        assert_eq!(shares.iter().copied().sum::<Decimal>(), dec!(100.05));
    }

    #[test]
    fn zero_weight_sum_is_rejected() {
        let err = split_proportionally(dec!(10), &[dec!(0), dec!(0)]).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    proptest! {
        #[test]
        fn shares_sum_to_total_exactly(
            cents in 0i64..1_000_000_000i64,
            weights in prop::collection::vec(1u32..100_000u32, 1..25)
        ) {
            let total = Decimal::new(cents, 2);
            let weights: Vec<Decimal> = weights.into_iter().map(Decimal::from).collect();
            let shares = split_proportionally(total, &weights).unwrap();

            let sum: Decimal = shares.iter().copied().sum();
            prop_assert_eq!(sum, total);
            prop_assert_eq!(shares.len(), weights.len());

            let weight_sum: Decimal = weights.iter().copied().sum();
            for (share, weight) in shares.iter().zip(&weights) {
                let exact = total * *weight / weight_sum;
                prop_assert!((*share - exact).abs() <= dec!(0.01));
            }
        }
    }
}
