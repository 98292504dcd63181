//! Settlement calculation: the greater of the minimum-guarantee rent and the
//! revenue-share fee, split per lease and netted against advances.
//!
//! Pure and deterministic. Intermediate values keep full decimal precision;
//! money is rounded to cents only on the way out.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use windledger_core::{DomainError, DomainResult, round_money, split_proportionally};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Advance (installment) or year-end final settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodType {
    Advance,
    Final,
}

impl PeriodType {
    pub fn as_str(self) -> &'static str {
        match self {
            PeriodType::Advance => "ADVANCE",
            PeriodType::Final => "FINAL",
        }
    }
}

/// Payment rhythm of advance settlements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdvanceInterval {
    Monthly,
    Quarterly,
    SemiAnnual,
    Annual,
}

impl AdvanceInterval {
    /// Number of installments per year.
    pub fn divisor(self) -> Decimal {
        match self {
            AdvanceInterval::Monthly => Decimal::from(12),
            AdvanceInterval::Quarterly => Decimal::from(4),
            AdvanceInterval::SemiAnnual => Decimal::from(2),
            AdvanceInterval::Annual => Decimal::ONE,
        }
    }
}

/// Settlement period key: year, optional month, period type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SettlementPeriod {
    pub year: i32,
    pub month: Option<u32>,
    pub period_type: PeriodType,
    /// Only meaningful for advances; defaults to monthly when a month is
    /// given and annual otherwise.
    #[serde(default)]
    pub interval: Option<AdvanceInterval>,
}

impl SettlementPeriod {
    pub fn validate(&self) -> DomainResult<()> {
        if !(1900..=9999).contains(&self.year) {
            return Err(DomainError::validation("year is out of range"));
        }
        if let Some(month) = self.month {
            if !(1..=12).contains(&month) {
                return Err(DomainError::validation("month must be between 1 and 12"));
            }
        }
        Ok(())
    }

    pub fn effective_interval(&self) -> AdvanceInterval {
        self.interval.unwrap_or(if self.month.is_some() {
            AdvanceInterval::Monthly
        } else {
            AdvanceInterval::Annual
        })
    }

    /// Divisor applied to annual minimum rents (1 for final settlements).
    pub fn minimum_divisor(&self) -> Decimal {
        match self.period_type {
            PeriodType::Advance => self.effective_interval().divisor(),
            PeriodType::Final => Decimal::ONE,
        }
    }
}

/// Park-level contract terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkTerms {
    pub park_id: Uuid,
    pub park_name: String,
    /// Revenue share in percent (5 = 5 %).
    pub revenue_share_percent: Option<Decimal>,
}

/// Per-lease terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseTerms {
    pub lease_id: Uuid,
    pub lessor_id: Uuid,
    pub lessor_name: String,
    /// Annual minimum rent per unit (turbine or area unit).
    pub minimum_rent_per_unit: Option<Decimal>,
    pub units: Decimal,
    /// Advances already paid for the period; only deducted in final settlements.
    #[serde(default)]
    pub advances_paid: Decimal,
}

/// One metered revenue figure (e.g. per turbine or per month).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueRecord {
    pub source: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueInput {
    #[serde(default)]
    pub metered: Vec<RevenueRecord>,
    #[serde(default)]
    pub manual_override: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RevenueSource {
    Metered,
    Manual,
}

impl RevenueInput {
    /// Total revenue and where it came from. A positive manual override wins.
    pub fn resolve(&self) -> (Decimal, RevenueSource) {
        match self.manual_override {
            Some(amount) if amount > Decimal::ZERO => (amount, RevenueSource::Manual),
            _ => (
                self.metered.iter().map(|r| r.amount).sum(),
                RevenueSource::Metered,
            ),
        }
    }
}

/// Per-lease result row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementItem {
    pub lease_id: Uuid,
    pub lessor_id: Uuid,
    pub lessor_name: String,
    pub units: Decimal,
    pub minimum_rent: Decimal,
    pub revenue_share: Decimal,
    pub subtotal: Decimal,
    pub advances_paid: Decimal,
    /// Negative means the lessor was overpaid by the advances.
    pub balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementCalculation {
    pub total_revenue: Decimal,
    pub revenue_source: RevenueSource,
    pub revenue_share_percent: Decimal,
    pub revenue_share_fee: Decimal,
    pub minimum_guarantee: Decimal,
    pub calculated_fee: Decimal,
    pub used_minimum: bool,
    pub items: Vec<SettlementItem>,
}

impl SettlementCalculation {
    pub fn total_balance(&self) -> Decimal {
        self.items.iter().map(|i| i.balance).sum()
    }
}

/// Compute a settlement for one park and period.
pub fn calculate(
    park: &ParkTerms,
    period: &SettlementPeriod,
    leases: &[LeaseTerms],
    revenue: &RevenueInput,
) -> DomainResult<SettlementCalculation> {
    period.validate()?;

    let percent = park.revenue_share_percent.ok_or_else(|| {
        DomainError::config_missing(format!(
            "park '{}' has no revenue share percentage",
            park.park_name
        ))
    })?;
    if percent.is_sign_negative() || percent > HUNDRED {
        return Err(DomainError::validation(
            "revenue share percentage must be between 0 and 100",
        ));
    }

    if leases.is_empty() {
        return Err(DomainError::config_missing(format!(
            "park '{}' has no leases",
            park.park_name
        )));
    }

    let divisor = period.minimum_divisor();
    let mut minimums = Vec::with_capacity(leases.len());
    for lease in leases {
        let rate = lease.minimum_rent_per_unit.ok_or_else(|| {
            DomainError::config_missing(format!(
                "lease {} ({}) has no minimum rent",
                lease.lease_id, lease.lessor_name
            ))
        })?;
        if rate.is_sign_negative() {
            return Err(DomainError::validation("minimum rent must not be negative"));
        }
        if lease.units <= Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "lease {} must have a positive unit count",
                lease.lease_id
            )));
        }
        if lease.advances_paid.is_sign_negative() {
            return Err(DomainError::validation("advances paid must not be negative"));
        }
        minimums.push(rate * lease.units / divisor);
    }

    let (total_revenue, revenue_source) = revenue.resolve();
    if total_revenue.is_sign_negative() {
        return Err(DomainError::validation("total revenue must not be negative"));
    }

    let total_units: Decimal = leases.iter().map(|l| l.units).sum();
    let minimum_guarantee: Decimal = minimums.iter().copied().sum();
    let revenue_share_fee = total_revenue * percent / HUNDRED;

    // Ties go to the minimum guarantee.
    let used_minimum = minimum_guarantee >= revenue_share_fee;
    let fee = if used_minimum {
        minimum_guarantee
    } else {
        revenue_share_fee
    };
    let calculated_fee = round_money(fee);

    let weights: Vec<Decimal> = if used_minimum {
        minimums.clone()
    } else {
        leases.iter().map(|l| l.units).collect()
    };
    let subtotals = if calculated_fee.is_zero() {
        vec![Decimal::ZERO; leases.len()]
    } else {
        split_proportionally(calculated_fee, &weights)?
    };

    let items = leases
        .iter()
        .zip(minimums.iter())
        .zip(subtotals)
        .map(|((lease, minimum), subtotal)| {
            let advances_paid = round_money(lease.advances_paid);
            let balance = match period.period_type {
                PeriodType::Final => subtotal - advances_paid,
                PeriodType::Advance => subtotal,
            };
            SettlementItem {
                lease_id: lease.lease_id,
                lessor_id: lease.lessor_id,
                lessor_name: lease.lessor_name.clone(),
                units: lease.units,
                minimum_rent: round_money(*minimum),
                revenue_share: round_money(revenue_share_fee * lease.units / total_units),
                subtotal,
                advances_paid,
                balance,
            }
        })
        .collect();

    Ok(SettlementCalculation {
        total_revenue: round_money(total_revenue),
        revenue_source,
        revenue_share_percent: percent,
        revenue_share_fee: round_money(revenue_share_fee),
        minimum_guarantee: round_money(minimum_guarantee),
        calculated_fee,
        used_minimum,
        items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn park(percent: Decimal) -> ParkTerms {
        ParkTerms {
            park_id: Uuid::now_v7(),
            park_name: "Windpark Nord".to_string(),
            revenue_share_percent: Some(percent),
        }
    }

    fn lease(rate: Decimal, units: Decimal, advances: Decimal) -> LeaseTerms {
        LeaseTerms {
            lease_id: Uuid::now_v7(),
            lessor_id: Uuid::now_v7(),
            lessor_name: "Hof Jansen".to_string(),
            minimum_rent_per_unit: Some(rate),
            units,
            advances_paid: advances,
        }
    }

    fn final_2026() -> SettlementPeriod {
        SettlementPeriod {
            year: 2026,
            month: None,
            period_type: PeriodType::Final,
            interval: None,
        }
    }

    fn manual(amount: Decimal) -> RevenueInput {
        RevenueInput {
            metered: Vec::new(),
            manual_override: Some(amount),
        }
    }

    #[test]
    fn minimum_guarantee_wins_over_smaller_revenue_share() {
        let leases = vec![
            lease(dec!(10000), dec!(1), dec!(0)),
            lease(dec!(5000), dec!(2), dec!(0)),
            lease(dec!(10000), dec!(1), dec!(0)),
        ];
        let calc = calculate(&park(dec!(5)), &final_2026(), &leases, &manual(dec!(500000))).unwrap();

        assert_eq!(calc.revenue_share_fee, dec!(25000));
        assert_eq!(calc.minimum_guarantee, dec!(30000));
        assert!(calc.used_minimum);
        assert_eq!(calc.calculated_fee, dec!(30000));
        assert_eq!(calc.items[1].subtotal, dec!(10000));
    }

    #[test]
    fn revenue_share_is_split_by_units() {
        let leases = vec![
            lease(dec!(1000), dec!(1), dec!(0)),
            lease(dec!(1000), dec!(2), dec!(0)),
        ];
        let calc = calculate(&park(dec!(10)), &final_2026(), &leases, &manual(dec!(100000))).unwrap();

        assert!(!calc.used_minimum);
        assert_eq!(calc.calculated_fee, dec!(10000));
        assert_eq!(calc.items[0].subtotal, dec!(3333.33));
        assert_eq!(calc.items[1].subtotal, dec!(6666.67));
    }

    #[test]
    fn advance_minimum_is_divided_by_interval() {
        let period = SettlementPeriod {
            year: 2026,
            month: None,
            period_type: PeriodType::Advance,
            interval: Some(AdvanceInterval::Quarterly),
        };
        let leases = vec![lease(dec!(12000), dec!(1), dec!(999))];
        let calc = calculate(&park(dec!(0)), &period, &leases, &RevenueInput::default()).unwrap();

        assert_eq!(calc.minimum_guarantee, dec!(3000));
        // advances are not netted in advance periods
        assert_eq!(calc.items[0].balance, dec!(3000));
    }

    #[test]
    fn final_balance_nets_advances_and_may_go_negative() {
        let leases = vec![
            lease(dec!(1000), dec!(1), dec!(400)),
            lease(dec!(1000), dec!(1), dec!(1500)),
        ];
        let calc = calculate(&park(dec!(1)), &final_2026(), &leases, &manual(dec!(1))).unwrap();

        assert_eq!(calc.items[0].balance, dec!(600));
        assert_eq!(calc.items[1].balance, dec!(-500));
    }

    #[test]
    fn manual_override_takes_precedence_only_when_positive() {
        let input = RevenueInput {
            metered: vec![
                RevenueRecord { source: "WEA-1".into(), amount: dec!(100) },
                RevenueRecord { source: "WEA-2".into(), amount: dec!(50) },
            ],
            manual_override: Some(dec!(0)),
        };
        assert_eq!(input.resolve(), (dec!(150), RevenueSource::Metered));

        let input = RevenueInput { manual_override: Some(dec!(75)), ..input };
        assert_eq!(input.resolve(), (dec!(75), RevenueSource::Manual));
    }

    #[test]
    fn missing_configuration_is_reported() {
        let mut l = lease(dec!(1), dec!(1), dec!(0));
        l.minimum_rent_per_unit = None;
        let err = calculate(&park(dec!(5)), &final_2026(), &[l], &manual(dec!(1))).unwrap_err();
        assert!(matches!(err, DomainError::ConfigurationMissing(_)));

        let mut p = park(dec!(5));
        p.revenue_share_percent = None;
        let err = calculate(&p, &final_2026(), &[lease(dec!(1), dec!(1), dec!(0))], &manual(dec!(1)))
            .unwrap_err();
        assert!(matches!(err, DomainError::ConfigurationMissing(_)));
    }

    proptest! {
        #[test]
        fn exactly_one_branch_is_used_and_items_sum_to_fee(
            revenue_cents in 0i64..10_000_000_000i64,
            percent in 0u32..=100u32,
            leases in prop::collection::vec((0i64..5_000_000i64, 1u32..20u32), 1..12)
        ) {
            let leases: Vec<LeaseTerms> = leases
                .into_iter()
                .map(|(rate, units)| lease(Decimal::new(rate, 2), Decimal::from(units), Decimal::ZERO))
                .collect();
            let calc = calculate(
                &park(Decimal::from(percent)),
                &final_2026(),
                &leases,
                &manual(Decimal::new(revenue_cents, 2)),
            ).unwrap();

            if calc.used_minimum {
                prop_assert_eq!(calc.calculated_fee, calc.minimum_guarantee);
                prop_assert!(calc.minimum_guarantee >= calc.revenue_share_fee);
            } else {
                prop_assert_eq!(calc.calculated_fee, calc.revenue_share_fee);
                prop_assert!(calc.revenue_share_fee >= calc.minimum_guarantee);
            }

            let sum: Decimal = calc.items.iter().map(|i| i.subtotal).sum();
            prop_assert_eq!(sum, calc.calculated_fee);
        }
    }
}
