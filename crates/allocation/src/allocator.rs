//! Proportional split of a settlement's allocable cost.

use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use windledger_core::{AggregateId, DomainError, DomainResult, round_money, split_proportionally};

/// An operating entity (fund) that carries part of the park costs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingEntity {
    pub entity_id: Uuid,
    pub name: String,
    /// Allocation key, e.g. ownership percentage or production share.
    pub basis: Decimal,
    /// Part of the share (0-100 %) that is billed VAT-exempt.
    #[serde(default)]
    pub exempt_share_percent: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationItem {
    pub entity_id: Uuid,
    pub entity_name: String,
    pub basis: Decimal,
    pub share_amount: Decimal,
    /// Portion billed on the standard-rate VAT invoice.
    pub taxable_amount: Decimal,
    /// Portion billed on the separate exempt invoice.
    pub exempt_amount: Decimal,
    pub vat_invoice_id: Option<AggregateId>,
    pub exempt_invoice_id: Option<AggregateId>,
}

impl AllocationItem {
    pub fn is_invoiced(&self) -> bool {
        self.vat_invoice_id.is_some() || self.exempt_invoice_id.is_some()
    }
}

/// Split `total` over `entities` by basis; every share stays within a cent of exact.
pub fn allocate(total: Decimal, entities: &[OperatingEntity]) -> DomainResult<Vec<AllocationItem>> {
    if entities.is_empty() {
        return Err(DomainError::validation("at least one operating entity is required"));
    }

    let mut seen = HashSet::with_capacity(entities.len());
    for entity in entities {
        if !seen.insert(entity.entity_id) {
            return Err(DomainError::validation(format!(
                "operating entity {} is listed twice",
                entity.entity_id
            )));
        }
        if entity.basis.is_sign_negative() {
            return Err(DomainError::validation(format!(
                "allocation basis of '{}' must not be negative",
                entity.name
            )));
        }
        if entity.exempt_share_percent.is_sign_negative()
            || entity.exempt_share_percent > Decimal::ONE_HUNDRED
        {
            return Err(DomainError::validation(format!(
                "exempt share of '{}' must be between 0 and 100",
                entity.name
            )));
        }
    }

    let weights: Vec<Decimal> = entities.iter().map(|e| e.basis).collect();
    let shares = split_proportionally(total, &weights)?;

    Ok(entities
        .iter()
        .zip(shares)
        .map(|(entity, share)| {
            let exempt = round_money(share * entity.exempt_share_percent / Decimal::ONE_HUNDRED);
            AllocationItem {
                entity_id: entity.entity_id,
                entity_name: entity.name.clone(),
                basis: entity.basis,
                share_amount: share,
                taxable_amount: share - exempt,
                exempt_amount: exempt,
                vat_invoice_id: None,
                exempt_invoice_id: None,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn entity(name: &str, basis: Decimal, exempt: Decimal) -> OperatingEntity {
        OperatingEntity {
            entity_id: Uuid::now_v7(),
            name: name.to_string(),
            basis,
            exempt_share_percent: exempt,
        }
    }

    #[test]
    fn rounding_remainder_is_spread_by_running_total() {
        let items = allocate(
            dec!(1000),
            &[
                entity("Fonds I", dec!(1), dec!(0)),
                entity("Fonds II", dec!(1), dec!(0)),
                entity("Fonds III", dec!(1), dec!(0)),
            ],
        )
        .unwrap();

        let shares: Vec<Decimal> = items.iter().map(|i| i.share_amount).collect();
        assert_eq!(shares, vec![dec!(333.33), dec!(333.34), dec!(333.33)]);
    }

    #[test]
    fn zero_basis_fund_is_allocated_nothing() {
        let mut entities: Vec<OperatingEntity> = (1..=4)
            .map(|n| entity(&format!("Fonds {n}"), dec!(1), dec!(0)))
            .collect();
        entities.push(entity("Ruhender Fonds", dec!(0), dec!(0)));

        let items = allocate(dec!(100.02), &entities).unwrap();
        assert_eq!(items[4].share_amount, Decimal::ZERO);
        assert!(items.iter().all(|i| !i.share_amount.is_sign_negative()));
    }

    #[test]
    fn exempt_part_is_split_off() {
        let items = allocate(dec!(1000), &[entity("Fonds I", dec!(60), dec!(25))]).unwrap();
        assert_eq!(items[0].exempt_amount, dec!(250));
        assert_eq!(items[0].taxable_amount, dec!(750));
    }

    #[test]
    fn zero_basis_sum_is_rejected() {
        let err = allocate(dec!(10), &[entity("A", dec!(0), dec!(0))]).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn duplicate_entities_are_rejected() {
        let a = entity("A", dec!(1), dec!(0));
        assert!(allocate(dec!(10), &[a.clone(), a]).is_err());
    }

    proptest! {
        #[test]
        fn shares_sum_to_total_for_any_basis(
            cents in 0i64..100_000_000_000i64,
            bases in prop::collection::vec((1u32..1_000_000u32, 0u32..=100u32), 1..30)
        ) {
            let total = Decimal::new(cents, 2);
            let entities: Vec<OperatingEntity> = bases
                .into_iter()
                .map(|(b, ex)| entity("E", Decimal::new(i64::from(b), 3), Decimal::from(ex)))
                .collect();
            let items = allocate(total, &entities).unwrap();

            let sum: Decimal = items.iter().map(|i| i.share_amount).sum();
            prop_assert_eq!(sum, total);
            for item in &items {
                prop_assert_eq!(item.taxable_amount + item.exempt_amount, item.share_amount);
            }
        }
    }
}
