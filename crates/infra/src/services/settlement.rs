use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use windledger_core::{AggregateId, DomainError, TenantId, UserId};
use windledger_events::{EventBus, EventEnvelope};
use windledger_invoicing::{
    CreateInvoice, DocumentSource, DocumentType, Invoice, InvoiceCommand, InvoiceId,
    InvoiceItemInput, InvoiceRecipient, TaxType,
};
use windledger_settlement::{
    ApproveSettlement, CalculateSettlement, CloseSettlement, LeaseTerms, MarkSettlementSettled,
    ParkTerms, RejectSettlement, RevenueInput, RevenueRecord, Settlement, SettlementCommand,
    SettlementId, SettlementItem, SettlementPeriod, SubmitSettlement,
};

use crate::error::ServiceResult;
use crate::event_store::EventStore;
use crate::services::{BillingServices, reserve_into};
use crate::unit_of_work::{UnitOfWork, retry_on_conflict};

/// Everything needed to create (or recalculate) the settlement of one park and period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationRequest {
    pub park: ParkTerms,
    pub period: SettlementPeriod,
    pub leases: Vec<LeaseTerms>,
    #[serde(default)]
    pub revenue: RevenueInput,
}

/// Revenue changes for a recalculation. Absent fields keep the stored input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueUpdate {
    #[serde(default)]
    pub manual_override: Option<Decimal>,
    #[serde(default)]
    pub metered: Option<Vec<RevenueRecord>>,
}

impl RevenueUpdate {
    fn apply_to(&self, current: &RevenueInput) -> RevenueInput {
        RevenueInput {
            metered: self
                .metered
                .clone()
                .unwrap_or_else(|| current.metered.clone()),
            manual_override: self.manual_override.or(current.manual_override),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Submit,
    Approve,
    Reject,
}

#[derive(Debug, Clone)]
pub struct LessorCreditNotes {
    pub settlement: Settlement,
    pub credit_notes: Vec<Invoice>,
}

impl<S, B> BillingServices<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Create the settlement for a park and period, or recalculate it if it
    /// already exists and is still calculable.
    #[instrument(skip(self, request), fields(tenant_id = %tenant_id, park_id = %request.park.park_id, year = request.period.year))]
    pub fn calculate_settlement(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        request: CalculationRequest,
    ) -> ServiceResult<Settlement> {
        let settlement_id = SettlementId::for_period(tenant_id, request.park.park_id, &request.period);

        let settlement = retry_on_conflict("calculate_settlement", self.config().max_commit_retries, || {
            let mut uow = UnitOfWork::begin(self.store(), tenant_id);
            let mut settlement = uow.load::<Settlement>(settlement_id.0)?;
            uow.execute(
                &mut settlement,
                &SettlementCommand::Calculate(CalculateSettlement {
                    tenant_id,
                    settlement_id,
                    actor,
                    park: request.park.clone(),
                    period: request.period,
                    leases: request.leases.clone(),
                    revenue: request.revenue.clone(),
                    occurred_at: Utc::now(),
                }),
            )?;
            self.commit(uow)?;
            Ok(settlement)
        })?;

        log_calculated(&settlement);
        Ok(settlement)
    }

    /// Recalculate an existing settlement with optional revenue overrides.
    #[instrument(skip(self, update), fields(tenant_id = %tenant_id, settlement_id = %settlement_id))]
    pub fn recalculate_settlement(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        settlement_id: SettlementId,
        update: RevenueUpdate,
    ) -> ServiceResult<Settlement> {
        let settlement = retry_on_conflict("recalculate_settlement", self.config().max_commit_retries, || {
            let mut uow = UnitOfWork::begin(self.store(), tenant_id);
            let mut settlement = uow.load_existing::<Settlement>(settlement_id.0)?;
            let command = recalculation(&settlement, tenant_id, actor, &update)?;
            uow.execute(&mut settlement, &command)?;
            self.commit(uow)?;
            Ok(settlement)
        })?;

        log_calculated(&settlement);
        Ok(settlement)
    }

    /// Run one review transition. For `Reject` the notes are the required reason.
    #[instrument(skip(self, notes), fields(tenant_id = %tenant_id, settlement_id = %settlement_id, actor = %actor))]
    pub fn review_settlement(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        settlement_id: SettlementId,
        action: ReviewAction,
        notes: Option<String>,
    ) -> ServiceResult<Settlement> {
        let settlement = retry_on_conflict("review_settlement", self.config().max_commit_retries, || {
            let occurred_at = Utc::now();
            let command = match action {
                ReviewAction::Submit => SettlementCommand::Submit(SubmitSettlement {
                    tenant_id,
                    settlement_id,
                    actor,
                    notes: notes.clone(),
                    occurred_at,
                }),
                ReviewAction::Approve => SettlementCommand::Approve(ApproveSettlement {
                    tenant_id,
                    settlement_id,
                    actor,
                    notes: notes.clone(),
                    occurred_at,
                }),
                ReviewAction::Reject => SettlementCommand::Reject(RejectSettlement {
                    tenant_id,
                    settlement_id,
                    actor,
                    reason: notes.clone().unwrap_or_default(),
                    occurred_at,
                }),
            };

            let mut uow = UnitOfWork::begin(self.store(), tenant_id);
            let mut settlement = uow.load_existing::<Settlement>(settlement_id.0)?;
            uow.execute(&mut settlement, &command)?;
            self.commit(uow)?;
            Ok(settlement)
        })?;

        info!(action = ?action, status = %settlement.status(), "settlement reviewed");
        Ok(settlement)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, settlement_id = %settlement_id))]
    pub fn close_settlement(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        settlement_id: SettlementId,
    ) -> ServiceResult<Settlement> {
        let settlement = retry_on_conflict("close_settlement", self.config().max_commit_retries, || {
            let mut uow = UnitOfWork::begin(self.store(), tenant_id);
            let mut settlement = uow.load_existing::<Settlement>(settlement_id.0)?;
            uow.execute(
                &mut settlement,
                &SettlementCommand::Close(CloseSettlement {
                    tenant_id,
                    settlement_id,
                    actor,
                    occurred_at: Utc::now(),
                }),
            )?;
            self.commit(uow)?;
            Ok(settlement)
        })?;

        info!("settlement closed");
        Ok(settlement)
    }

    pub fn get_settlement(
        &self,
        tenant_id: TenantId,
        settlement_id: SettlementId,
    ) -> ServiceResult<Settlement> {
        self.read::<Settlement>(tenant_id, settlement_id.0)
    }

    /// Issue one credit note per lessor with an open balance and mark the
    /// settlement SETTLED, all in one commit.
    ///
    /// Lessor documents are always credit notes: the net amount is the
    /// negated balance and land lease is VAT-exempt.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, settlement_id = %settlement_id))]
    pub fn generate_lessor_credit_notes(
        &self,
        tenant_id: TenantId,
        settlement_id: SettlementId,
        document_date: NaiveDate,
    ) -> ServiceResult<LessorCreditNotes> {
        let result = retry_on_conflict("generate_lessor_credit_notes", self.config().max_commit_retries, || {
            let mut uow = UnitOfWork::begin(self.store(), tenant_id);
            let mut settlement = uow.load_existing::<Settlement>(settlement_id.0)?;

            let billable: Vec<SettlementItem> = settlement
                .items()
                .iter()
                .filter(|item| !item.balance.is_zero())
                .cloned()
                .collect();
            let note_ids: Vec<AggregateId> = billable
                .iter()
                .map(|item| lessor_credit_note_id(tenant_id, settlement_id, item))
                .collect();

            // Status check first, so an invalid request reserves nothing.
            uow.execute(
                &mut settlement,
                &SettlementCommand::MarkSettled(MarkSettlementSettled {
                    tenant_id,
                    settlement_id,
                    credit_note_ids: note_ids.clone(),
                    occurred_at: Utc::now(),
                }),
            )?;

            let mut credit_notes = Vec::with_capacity(billable.len());
            if !billable.is_empty() {
                let count = u32::try_from(billable.len())
                    .map_err(|_| DomainError::validation("too many lessors in one settlement"))?;
                let numbers = reserve_into(&mut uow, self.config(), DocumentType::CreditNote, count)?;
                let description = lease_description(&settlement);

                for ((item, note_id), number) in billable.iter().zip(&note_ids).zip(numbers) {
                    let mut note = uow.create::<Invoice>(*note_id)?;
                    uow.execute(
                        &mut note,
                        &InvoiceCommand::Create(CreateInvoice {
                            tenant_id,
                            invoice_id: InvoiceId::new(*note_id),
                            number,
                            document_type: DocumentType::CreditNote,
                            recipient: InvoiceRecipient {
                                name: item.lessor_name.clone(),
                                email: None,
                                party_id: Some(item.lessor_id),
                            },
                            invoice_date: document_date,
                            due_date: None,
                            items: vec![InvoiceItemInput {
                                description: description.clone(),
                                quantity: Decimal::ONE,
                                unit: None,
                                unit_price: -item.balance,
                                tax_type: TaxType::Exempt,
                            }],
                            cancelled_invoice_id: None,
                            correction_of_invoice_id: None,
                            source: Some(DocumentSource::Settlement {
                                settlement_id: settlement_id.0,
                                lease_id: item.lease_id,
                            }),
                            notes: None,
                            issue_immediately: true,
                            occurred_at: Utc::now(),
                        }),
                    )?;
                    credit_notes.push(note);
                }
            }

            self.commit(uow)?;
            Ok(LessorCreditNotes {
                settlement,
                credit_notes,
            })
        })?;

        info!(
            credit_notes = result.credit_notes.len(),
            "lessor credit notes issued, settlement settled"
        );
        Ok(result)
    }
}

fn recalculation(
    settlement: &Settlement,
    tenant_id: TenantId,
    actor: UserId,
    update: &RevenueUpdate,
) -> ServiceResult<SettlementCommand> {
    let (Some(park), Some(period)) = (settlement.park(), settlement.period()) else {
        return Err(DomainError::invariant("settlement has no stored terms").into());
    };

    Ok(SettlementCommand::Calculate(CalculateSettlement {
        tenant_id,
        settlement_id: settlement.id_typed(),
        actor,
        park: park.clone(),
        period: *period,
        leases: settlement.leases().to_vec(),
        revenue: update.apply_to(settlement.revenue()),
        occurred_at: Utc::now(),
    }))
}

fn lessor_credit_note_id(
    tenant_id: TenantId,
    settlement_id: SettlementId,
    item: &SettlementItem,
) -> AggregateId {
    AggregateId::derived(
        tenant_id,
        &format!("lessor-credit-note:{settlement_id}:{}", item.lease_id),
    )
}

fn lease_description(settlement: &Settlement) -> String {
    let park = settlement
        .park()
        .map(|p| p.park_name.as_str())
        .unwrap_or_default();
    match settlement.period() {
        Some(period) => {
            let span = match period.month {
                Some(month) => format!("{:02}/{}", month, period.year),
                None => period.year.to_string(),
            };
            let kind = match period.period_type {
                windledger_settlement::PeriodType::Advance => "Pachtvorschuss",
                windledger_settlement::PeriodType::Final => "Pachtendabrechnung",
            };
            format!("{kind} {park} {span}")
        }
        None => format!("Pacht {park}"),
    }
}

fn log_calculated(settlement: &Settlement) {
    if let Some(calc) = settlement.calculation() {
        info!(
            settlement_id = %settlement.id_typed(),
            calculated_fee = %calc.calculated_fee,
            used_minimum = calc.used_minimum,
            items = calc.items.len(),
            "settlement calculated"
        );
    }
}
