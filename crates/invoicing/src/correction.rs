//! Cancellation and correction planning.
//!
//! Planners are pure: they inspect an issued invoice and return the credit
//! note / correction positions plus the position cancellations to record on
//! the original. The caller commits everything (original update, new
//! documents, number reservations) in one unit of work.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use windledger_core::{DomainError, DomainResult};

use crate::invoice::{Invoice, PositionCancellation, required_reason};
use crate::line::{InvoiceItem, InvoiceItemInput, LineAmounts, TaxType};

/// Positions to reverse and the credit note that reverses them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationPlan {
    pub reason: String,
    pub cancellations: Vec<PositionCancellation>,
    pub credit_note_items: Vec<InvoiceItemInput>,
}

impl CancellationPlan {
    pub fn credit_note_gross(&self) -> Decimal {
        self.credit_note_items
            .iter()
            .map(|i| LineAmounts::compute(i.quantity, i.unit_price, i.tax_type).gross)
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialCancelRequest {
    pub position: u32,
    /// Defaults to everything that remains on the position.
    #[serde(default)]
    pub quantity: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionCorrection {
    pub position: u32,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub unit_price: Option<Decimal>,
    #[serde(default)]
    pub tax_type: Option<TaxType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionDelta {
    pub position: u32,
    pub old_net: Decimal,
    pub new_net: Decimal,
    pub delta: Decimal,
}

/// Reversal credit note for the changed positions plus the correction invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionPlan {
    pub reversal: CancellationPlan,
    pub corrected_items: Vec<InvoiceItemInput>,
    pub deltas: Vec<PositionDelta>,
}

impl CorrectionPlan {
    pub fn net_delta(&self) -> Decimal {
        self.deltas.iter().map(|d| d.delta).sum()
    }
}

fn find_item(original: &Invoice, position: u32) -> DomainResult<&InvoiceItem> {
    original
        .items()
        .iter()
        .find(|i| i.position == position)
        .ok_or(DomainError::InvalidPosition {
            position,
            count: original.items().len(),
        })
}

fn open_item(original: &Invoice, position: u32) -> DomainResult<&InvoiceItem> {
    let item = find_item(original, position)?;
    if item.is_fully_cancelled() {
        return Err(DomainError::PositionAlreadyCancelled { position });
    }
    Ok(item)
}

fn reject_duplicates(positions: impl Iterator<Item = u32>) -> DomainResult<()> {
    let mut seen = Vec::new();
    for position in positions {
        if seen.contains(&position) {
            return Err(DomainError::validation(format!(
                "position {position} is listed more than once"
            )));
        }
        seen.push(position);
    }
    Ok(())
}

/// Full cancellation (storno): mirror everything that remains.
pub fn plan_full_cancellation(original: &Invoice, reason: &str) -> DomainResult<CancellationPlan> {
    original.ensure_correctable()?;
    let reason = required_reason(reason)?;

    let mut cancellations = Vec::new();
    let mut credit_note_items = Vec::new();
    for item in original.items().iter().filter(|i| !i.is_fully_cancelled()) {
        let remaining = item.remaining_quantity();
        cancellations.push(PositionCancellation {
            position: item.position,
            quantity: remaining,
        });
        credit_note_items.push(item.mirror(remaining));
    }

    Ok(CancellationPlan {
        reason,
        cancellations,
        credit_note_items,
    })
}

/// Partial cancellation: one credit note for the selected quantities.
pub fn plan_partial_cancellation(
    original: &Invoice,
    requests: &[PartialCancelRequest],
    reason: &str,
) -> DomainResult<CancellationPlan> {
    original.ensure_correctable()?;
    let reason = required_reason(reason)?;
    if requests.is_empty() {
        return Err(DomainError::validation("at least one position is required"));
    }
    reject_duplicates(requests.iter().map(|r| r.position))?;

    let mut cancellations = Vec::with_capacity(requests.len());
    let mut credit_note_items = Vec::with_capacity(requests.len());
    for request in requests {
        let item = open_item(original, request.position)?;
        let available = item.remaining_quantity();
        let quantity = request.quantity.unwrap_or(available);

        if quantity <= Decimal::ZERO {
            return Err(DomainError::validation("cancel quantity must be positive"));
        }
        if quantity > available {
            return Err(DomainError::QuantityExceedsOriginal {
                position: request.position,
                requested: quantity,
                available,
            });
        }

        cancellations.push(PositionCancellation {
            position: item.position,
            quantity,
        });
        credit_note_items.push(item.mirror(quantity));
    }

    Ok(CancellationPlan {
        reason,
        cancellations,
        credit_note_items,
    })
}

/// Correction: reverse the changed positions and re-issue them with new values.
pub fn plan_correction(
    original: &Invoice,
    corrections: &[PositionCorrection],
    reason: &str,
) -> DomainResult<CorrectionPlan> {
    original.ensure_correctable()?;
    let reason = required_reason(reason)?;
    if corrections.is_empty() {
        return Err(DomainError::validation("at least one position is required"));
    }
    reject_duplicates(corrections.iter().map(|c| c.position))?;

    let mut cancellations = Vec::new();
    let mut credit_note_items = Vec::new();
    let mut corrected_items = Vec::new();
    let mut deltas = Vec::new();

    for correction in corrections {
        let item = open_item(original, correction.position)?;
        let current_quantity = item.signed_remaining();

        let description = correction
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(&item.description)
            .to_string();
        let quantity = correction.quantity.unwrap_or(current_quantity);
        let unit_price = correction.unit_price.unwrap_or(item.unit_price);
        let tax_type = correction.tax_type.unwrap_or(item.tax_type);

        if quantity.is_zero() {
            return Err(DomainError::validation(format!(
                "position {}: corrected quantity must not be zero; cancel the position instead",
                item.position
            )));
        }

        let unchanged = description == item.description
            && quantity == current_quantity
            && unit_price == item.unit_price
            && tax_type == item.tax_type;
        if unchanged {
            continue;
        }

        let remaining = item.remaining_quantity();
        let old_net = LineAmounts::compute(current_quantity, item.unit_price, item.tax_type).net;
        let new_net = LineAmounts::compute(quantity, unit_price, tax_type).net;

        cancellations.push(PositionCancellation {
            position: item.position,
            quantity: remaining,
        });
        credit_note_items.push(item.mirror(remaining));
        corrected_items.push(InvoiceItemInput {
            description,
            quantity,
            unit: item.unit.clone(),
            unit_price,
            tax_type,
        });
        deltas.push(PositionDelta {
            position: item.position,
            old_net,
            new_net,
            delta: new_net - old_net,
        });
    }

    if deltas.is_empty() {
        return Err(DomainError::NoChangesDetected);
    }

    Ok(CorrectionPlan {
        reversal: CancellationPlan {
            reason,
            cancellations,
            credit_note_items,
        },
        corrected_items,
        deltas,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::tests::{create_cmd, sent_invoice};
    use crate::invoice::{
        CancelInvoice, CancelPositions, InvoiceCommand, InvoiceId, InvoiceStatus,
    };
    use chrono::Utc;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use windledger_core::{AggregateId, AggregateRoot, TenantId};
    use windledger_events::execute;

    fn apply_partial(tenant: TenantId, invoice: &mut Invoice, plan: &CancellationPlan) {
        let cmd = InvoiceCommand::CancelPositions(CancelPositions {
            tenant_id: tenant,
            invoice_id: invoice.id_typed(),
            reason: plan.reason.clone(),
            credit_note_id: InvoiceId::new(AggregateId::new()),
            cancellations: plan.cancellations.clone(),
            occurred_at: Utc::now(),
        });
        execute(invoice, &cmd).unwrap();
    }

    #[test]
    fn storno_mirrors_every_position() {
        let (tenant, mut invoice) = sent_invoice();
        let plan = plan_full_cancellation(&invoice, "Doppelt berechnet").unwrap();

        assert_eq!(plan.credit_note_items.len(), 2);
        assert_eq!(plan.credit_note_items[0].quantity, dec!(-10));
        assert_eq!(plan.credit_note_items[0].unit_price, dec!(80));
        assert_eq!(plan.credit_note_gross(), dec!(-1190));

        let cancel = InvoiceCommand::Cancel(CancelInvoice {
            tenant_id: tenant,
            invoice_id: invoice.id_typed(),
            reason: plan.reason.clone(),
            storno_invoice_id: InvoiceId::new(AggregateId::new()),
            cancellations: plan.cancellations.clone(),
            occurred_at: Utc::now(),
        });
        execute(&mut invoice, &cancel).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Cancelled);
        assert_eq!(invoice.cancellation_reason(), Some("Doppelt berechnet"));

        let err = plan_full_cancellation(&invoice, "nochmal").unwrap_err();
        assert!(matches!(err, DomainError::InvalidStatus { ref current, .. } if current == "CANCELLED"));
    }

    #[test]
    fn cancellation_requires_reason() {
        let (_, invoice) = sent_invoice();
        let err = plan_full_cancellation(&invoice, "  ").unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn partial_cancellation_checks_quantity_and_index() {
        let (_, invoice) = sent_invoice();

        let err = plan_partial_cancellation(
            &invoice,
            &[PartialCancelRequest { position: 1, quantity: Some(dec!(11)) }],
            "Korrektur",
        )
        .unwrap_err();
        assert_eq!(
            err,
            DomainError::QuantityExceedsOriginal {
                position: 1,
                requested: dec!(11),
                available: dec!(10),
            }
        );

        let err = plan_partial_cancellation(
            &invoice,
            &[PartialCancelRequest { position: 3, quantity: None }],
            "Korrektur",
        )
        .unwrap_err();
        assert_eq!(err, DomainError::InvalidPosition { position: 3, count: 2 });
    }

    #[test]
    fn partial_cancellation_defaults_to_remaining_and_rejects_repeat() {
        let (tenant, mut invoice) = sent_invoice();
        let request = [PartialCancelRequest { position: 2, quantity: None }];

        let plan = plan_partial_cancellation(&invoice, &request, "Wartung entfällt").unwrap();
        assert_eq!(plan.cancellations[0].quantity, dec!(2));
        assert_eq!(plan.credit_note_gross(), dec!(-238));
        apply_partial(tenant, &mut invoice, &plan);

        let err = plan_partial_cancellation(&invoice, &request, "Wartung entfällt").unwrap_err();
        assert_eq!(err, DomainError::PositionAlreadyCancelled { position: 2 });
        assert_eq!(invoice.status(), InvoiceStatus::Sent);
    }

    #[test]
    fn nothing_left_to_cancel() {
        let (tenant, mut invoice) = sent_invoice();
        let plan = plan_partial_cancellation(
            &invoice,
            &[
                PartialCancelRequest { position: 1, quantity: None },
                PartialCancelRequest { position: 2, quantity: None },
            ],
            "alles",
        )
        .unwrap();
        apply_partial(tenant, &mut invoice, &plan);

        assert_eq!(
            plan_full_cancellation(&invoice, "x").unwrap_err(),
            DomainError::AllPositionsAlreadyCancelled
        );
    }

    #[test]
    fn storno_after_partial_covers_only_the_rest() {
        let (tenant, mut invoice) = sent_invoice();
        let plan = plan_partial_cancellation(
            &invoice,
            &[PartialCancelRequest { position: 1, quantity: Some(dec!(4)) }],
            "teilweise",
        )
        .unwrap();
        apply_partial(tenant, &mut invoice, &plan);

        let storno = plan_full_cancellation(&invoice, "rest").unwrap();
        assert_eq!(storno.credit_note_items[0].quantity, dec!(-6));
        assert_eq!(plan.credit_note_gross() + storno.credit_note_gross(), -invoice.gross_amount());
    }

    #[test]
    fn correction_reports_delta_and_only_reissues_changed_positions() {
        let (_, invoice) = sent_invoice();
        let plan = plan_correction(
            &invoice,
            &[
                PositionCorrection {
                    position: 1,
                    description: None,
                    quantity: Some(dec!(12)),
                    unit_price: None,
                    tax_type: None,
                },
                PositionCorrection {
                    position: 2,
                    description: Some("Wartungspauschale".to_string()),
                    quantity: None,
                    unit_price: None,
                    tax_type: None,
                },
            ],
            "Stunden nachgetragen",
        )
        .unwrap();

        assert_eq!(plan.corrected_items.len(), 1);
        assert_eq!(plan.reversal.cancellations.len(), 1);
        assert_eq!(plan.reversal.credit_note_items[0].quantity, dec!(-10));
        assert_eq!(
            plan.deltas,
            vec![PositionDelta {
                position: 1,
                old_net: dec!(800),
                new_net: dec!(960),
                delta: dec!(160),
            }]
        );
    }

    #[test]
    fn identical_correction_is_rejected() {
        let (_, invoice) = sent_invoice();
        let err = plan_correction(
            &invoice,
            &[PositionCorrection {
                position: 1,
                description: Some("Betriebsführung".to_string()),
                quantity: Some(dec!(10)),
                unit_price: Some(dec!(80)),
                tax_type: Some(TaxType::Standard),
            }],
            "nichts",
        )
        .unwrap_err();
        assert_eq!(err, DomainError::NoChangesDetected);
    }

    fn issued_with(items: Vec<(i64, i64, u8)>) -> (TenantId, Invoice) {
        let tenant = TenantId::new();
        let id = InvoiceId::new(AggregateId::new());
        let mut cmd = create_cmd(tenant, id);
        cmd.issue_immediately = true;
        cmd.items = items
            .into_iter()
            .map(|(qty, price, tax)| InvoiceItemInput {
                description: "Position".to_string(),
                quantity: Decimal::new(qty, 2),
                unit: None,
                unit_price: Decimal::new(price, 3),
                tax_type: match tax % 3 {
                    0 => TaxType::Standard,
                    1 => TaxType::Reduced,
                    _ => TaxType::Exempt,
                },
            })
            .collect();
        let mut invoice = Invoice::empty(id);
        execute(&mut invoice, &InvoiceCommand::Create(cmd)).unwrap();
        (tenant, invoice)
    }

    proptest! {
        #[test]
        fn storno_gross_negates_original_gross(
            items in prop::collection::vec((1i64..100_000, -5_000_000i64..5_000_000, any::<u8>()), 1..10)
        ) {
            let (tenant, original) = issued_with(items);
            let plan = plan_full_cancellation(&original, "storno").unwrap();

            let storno_id = InvoiceId::new(AggregateId::new());
            let mut storno_cmd = create_cmd(tenant, storno_id);
            storno_cmd.items = plan.credit_note_items.clone();
            let mut storno = Invoice::empty(storno_id);
            execute(&mut storno, &InvoiceCommand::Create(storno_cmd)).unwrap();

            prop_assert_eq!(original.gross_amount() + storno.gross_amount(), Decimal::ZERO);
            prop_assert_eq!(original.net_amount() + storno.net_amount(), Decimal::ZERO);
        }

        #[test]
        fn cancelled_quantity_stays_within_bounds(
            steps in prop::collection::vec((1u32..=2u32, 1i64..600), 1..20)
        ) {
            let (tenant, mut invoice) = sent_invoice();
            for (position, hundredths) in steps {
                let request = [PartialCancelRequest {
                    position,
                    quantity: Some(Decimal::new(hundredths, 2)),
                }];
                if let Ok(plan) = plan_partial_cancellation(&invoice, &request, "schritt") {
                    apply_partial(tenant, &mut invoice, &plan);
                }
                for item in invoice.items() {
                    prop_assert!(item.cancelled_quantity >= Decimal::ZERO);
                    prop_assert!(item.cancelled_quantity <= item.quantity.abs());
                }
            }
            prop_assert!(invoice.version() >= 2);
        }
    }
}
