use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use windledger_allocation::{
    AllocateCosts, AllocationCommand, AllocationId, AllocationItem, CloseAllocation,
    CostAllocation, EntityInvoices, OperatingEntity, RecordAllocationInvoices, SettlementSnapshot,
};
use windledger_core::{AggregateId, DomainError, TenantId, UserId};
use windledger_events::{EventBus, EventEnvelope};
use windledger_invoicing::{
    CreateInvoice, DocumentSource, DocumentType, Invoice, InvoiceCommand, InvoiceId,
    InvoiceItemInput, InvoiceRecipient, TaxType,
};
use windledger_settlement::{Settlement, SettlementId};

use crate::error::ServiceResult;
use crate::event_store::EventStore;
use crate::services::{BillingServices, reserve_into};
use crate::unit_of_work::{UnitOfWork, retry_on_conflict};

const DEFAULT_ALLOCATION_LABEL: &str = "Betriebskostenumlage";

#[derive(Debug, Clone)]
pub struct AllocationInvoices {
    pub allocation: CostAllocation,
    pub invoices: Vec<Invoice>,
}

/// One invoice to issue for an allocation item.
struct PlannedInvoice {
    id: AggregateId,
    entity_id: uuid::Uuid,
    recipient: String,
    amount: Decimal,
    tax_type: TaxType,
}

impl<S, B> BillingServices<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Split an approved settlement's fee across operating entities.
    ///
    /// One allocation exists per settlement; calling this again while the
    /// allocation is DRAFT recomputes it.
    #[instrument(skip(self, entities, label, notes), fields(tenant_id = %tenant_id, settlement_id = %settlement_id, entities = entities.len()))]
    pub fn allocate_costs(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        settlement_id: SettlementId,
        entities: Vec<OperatingEntity>,
        label: Option<String>,
        notes: Option<String>,
    ) -> ServiceResult<CostAllocation> {
        let allocation_id = AllocationId::for_settlement(tenant_id, settlement_id);

        let allocation = retry_on_conflict("allocate_costs", self.config().max_commit_retries, || {
            let mut uow = UnitOfWork::begin(self.store(), tenant_id);
            let settlement = uow.load_existing::<Settlement>(settlement_id.0)?;
            let snapshot = SettlementSnapshot {
                settlement_id,
                status: settlement.status(),
                calculated_fee: settlement
                    .calculation()
                    .map(|c| c.calculated_fee)
                    .unwrap_or_default(),
                item_count: settlement.items().len(),
            };

            let mut allocation = uow.load::<CostAllocation>(allocation_id.0)?;
            uow.execute(
                &mut allocation,
                &AllocationCommand::Allocate(AllocateCosts {
                    tenant_id,
                    allocation_id,
                    actor,
                    settlement: snapshot,
                    entities: entities.clone(),
                    label: label.clone(),
                    notes: notes.clone(),
                    occurred_at: Utc::now(),
                }),
            )?;
            self.commit(uow)?;
            Ok(allocation)
        })?;

        info!(
            allocation_id = %allocation_id,
            total = %allocation.total_allocable(),
            "costs allocated"
        );
        Ok(allocation)
    }

    /// Issue the VAT and exempt invoices of every entity and mark the
    /// allocation INVOICED, all in one commit.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, allocation_id = %allocation_id))]
    pub fn generate_allocation_invoices(
        &self,
        tenant_id: TenantId,
        allocation_id: AllocationId,
        invoice_date: NaiveDate,
        due_date: Option<NaiveDate>,
    ) -> ServiceResult<AllocationInvoices> {
        let result = retry_on_conflict("generate_allocation_invoices", self.config().max_commit_retries, || {
            let mut uow = UnitOfWork::begin(self.store(), tenant_id);
            let mut allocation = uow.load_existing::<CostAllocation>(allocation_id.0)?;

            let planned = plan_invoices(tenant_id, allocation_id, allocation.items());
            let references = allocation
                .items()
                .iter()
                .map(|item| EntityInvoices {
                    entity_id: item.entity_id,
                    vat_invoice_id: planned
                        .iter()
                        .find(|p| p.entity_id == item.entity_id && p.tax_type == TaxType::Standard)
                        .map(|p| p.id),
                    exempt_invoice_id: planned
                        .iter()
                        .find(|p| p.entity_id == item.entity_id && p.tax_type == TaxType::Exempt)
                        .map(|p| p.id),
                })
                .collect();

            // Rejects a second run before any number is reserved.
            uow.execute(
                &mut allocation,
                &AllocationCommand::RecordInvoices(RecordAllocationInvoices {
                    tenant_id,
                    allocation_id,
                    invoices: references,
                    occurred_at: Utc::now(),
                }),
            )?;

            let mut invoices = Vec::with_capacity(planned.len());
            if !planned.is_empty() {
                let count = u32::try_from(planned.len())
                    .map_err(|_| DomainError::validation("too many entities in one allocation"))?;
                let numbers = reserve_into(&mut uow, self.config(), DocumentType::Invoice, count)?;
                let label = allocation
                    .label()
                    .unwrap_or(DEFAULT_ALLOCATION_LABEL)
                    .to_string();

                for (plan, number) in planned.iter().zip(numbers) {
                    let mut invoice = uow.create::<Invoice>(plan.id)?;
                    uow.execute(
                        &mut invoice,
                        &InvoiceCommand::Create(CreateInvoice {
                            tenant_id,
                            invoice_id: InvoiceId::new(plan.id),
                            number,
                            document_type: DocumentType::Invoice,
                            recipient: InvoiceRecipient {
                                name: plan.recipient.clone(),
                                email: None,
                                party_id: Some(plan.entity_id),
                            },
                            invoice_date,
                            due_date,
                            items: vec![InvoiceItemInput {
                                description: match plan.tax_type {
                                    TaxType::Exempt => format!("{label} (steuerfrei)"),
                                    _ => label.clone(),
                                },
                                quantity: Decimal::ONE,
                                unit: None,
                                unit_price: plan.amount,
                                tax_type: plan.tax_type,
                            }],
                            cancelled_invoice_id: None,
                            correction_of_invoice_id: None,
                            source: Some(DocumentSource::Allocation {
                                allocation_id: allocation_id.0,
                                entity_id: plan.entity_id,
                            }),
                            notes: allocation.notes().map(str::to_string),
                            issue_immediately: true,
                            occurred_at: Utc::now(),
                        }),
                    )?;
                    invoices.push(invoice);
                }
            }

            self.commit(uow)?;
            Ok(AllocationInvoices {
                allocation,
                invoices,
            })
        })?;

        info!(invoices = result.invoices.len(), "allocation invoiced");
        Ok(result)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, allocation_id = %allocation_id))]
    pub fn close_allocation(
        &self,
        tenant_id: TenantId,
        allocation_id: AllocationId,
    ) -> ServiceResult<CostAllocation> {
        let allocation = retry_on_conflict("close_allocation", self.config().max_commit_retries, || {
            let mut uow = UnitOfWork::begin(self.store(), tenant_id);
            let mut allocation = uow.load_existing::<CostAllocation>(allocation_id.0)?;
            uow.execute(
                &mut allocation,
                &AllocationCommand::Close(CloseAllocation {
                    tenant_id,
                    allocation_id,
                    occurred_at: Utc::now(),
                }),
            )?;
            self.commit(uow)?;
            Ok(allocation)
        })?;

        info!("allocation closed");
        Ok(allocation)
    }

    pub fn get_allocation(
        &self,
        tenant_id: TenantId,
        allocation_id: AllocationId,
    ) -> ServiceResult<CostAllocation> {
        self.read::<CostAllocation>(tenant_id, allocation_id.0)
    }
}

/// Standard-rate invoice for the taxable part, exempt invoice for the rest.
/// Zero amounts produce no document.
fn plan_invoices(
    tenant_id: TenantId,
    allocation_id: AllocationId,
    items: &[AllocationItem],
) -> Vec<PlannedInvoice> {
    let mut planned = Vec::new();
    for item in items {
        for (amount, tax_type, suffix) in [
            (item.taxable_amount, TaxType::Standard, "vat"),
            (item.exempt_amount, TaxType::Exempt, "exempt"),
        ] {
            if amount.is_zero() {
                continue;
            }
            planned.push(PlannedInvoice {
                id: AggregateId::derived(
                    tenant_id,
                    &format!("allocation-invoice:{allocation_id}:{}:{suffix}", item.entity_id),
                ),
                entity_id: item.entity_id,
                recipient: item.entity_name.clone(),
                amount,
                tax_type,
            });
        }
    }
    planned
}
