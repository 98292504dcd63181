use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use windledger_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId, UserId};
use windledger_events::Event;
use windledger_settlement::{SettlementId, SettlementStatus};

use crate::allocator::{AllocationItem, OperatingEntity, allocate};

/// Allocation identifier; one allocation per settlement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationId(pub AggregateId);

impl AllocationId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn for_settlement(tenant_id: TenantId, settlement_id: SettlementId) -> Self {
        Self(AggregateId::derived(
            tenant_id,
            &format!("cost-allocation:{settlement_id}"),
        ))
    }
}

impl core::fmt::Display for AllocationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationStatus {
    Draft,
    Invoiced,
    Closed,
}

impl AllocationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AllocationStatus::Draft => "DRAFT",
            AllocationStatus::Invoiced => "INVOICED",
            AllocationStatus::Closed => "CLOSED",
        }
    }
}

/// What the allocation needs to know about its settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSnapshot {
    pub settlement_id: SettlementId,
    pub status: SettlementStatus,
    pub calculated_fee: Decimal,
    pub item_count: usize,
}

/// Aggregate root: CostAllocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostAllocation {
    id: AllocationId,
    tenant_id: Option<TenantId>,
    settlement_id: Option<SettlementId>,
    label: Option<String>,
    notes: Option<String>,
    total_allocable: Decimal,
    items: Vec<AllocationItem>,
    status: AllocationStatus,
    created_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    invoiced_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl CostAllocation {
    pub fn empty(id: AllocationId) -> Self {
        Self {
            id,
            tenant_id: None,
            settlement_id: None,
            label: None,
            notes: None,
            total_allocable: Decimal::ZERO,
            items: Vec::new(),
            status: AllocationStatus::Draft,
            created_by: None,
            created_at: None,
            invoiced_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> AllocationId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn settlement_id(&self) -> Option<SettlementId> {
        self.settlement_id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn total_allocable(&self) -> Decimal {
        self.total_allocable
    }

    pub fn items(&self) -> &[AllocationItem] {
        &self.items
    }

    pub fn status(&self) -> AllocationStatus {
        self.status
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn invoiced_at(&self) -> Option<DateTime<Utc>> {
        self.invoiced_at
    }
}

impl AggregateRoot for CostAllocation {
    type Id = AllocationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: AllocateCosts (create or recompute while DRAFT).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateCosts {
    pub tenant_id: TenantId,
    pub allocation_id: AllocationId,
    pub actor: UserId,
    pub settlement: SettlementSnapshot,
    pub entities: Vec<OperatingEntity>,
    pub label: Option<String>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Invoices generated for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityInvoices {
    pub entity_id: Uuid,
    pub vat_invoice_id: Option<AggregateId>,
    pub exempt_invoice_id: Option<AggregateId>,
}

/// Command: RecordAllocationInvoices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordAllocationInvoices {
    pub tenant_id: TenantId,
    pub allocation_id: AllocationId,
    pub invoices: Vec<EntityInvoices>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CloseAllocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseAllocation {
    pub tenant_id: TenantId,
    pub allocation_id: AllocationId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationCommand {
    Allocate(AllocateCosts),
    RecordInvoices(RecordAllocationInvoices),
    Close(CloseAllocation),
}

/// Event: CostsAllocated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostsAllocated {
    pub tenant_id: TenantId,
    pub allocation_id: AllocationId,
    pub settlement_id: SettlementId,
    pub allocated_by: UserId,
    pub label: Option<String>,
    pub notes: Option<String>,
    pub total_allocable: Decimal,
    pub items: Vec<AllocationItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AllocationInvoiced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationInvoiced {
    pub tenant_id: TenantId,
    pub allocation_id: AllocationId,
    pub invoices: Vec<EntityInvoices>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AllocationClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationClosed {
    pub tenant_id: TenantId,
    pub allocation_id: AllocationId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationEvent {
    CostsAllocated(CostsAllocated),
    AllocationInvoiced(AllocationInvoiced),
    AllocationClosed(AllocationClosed),
}

impl Event for AllocationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AllocationEvent::CostsAllocated(_) => "allocation.costs_allocated",
            AllocationEvent::AllocationInvoiced(_) => "allocation.invoiced",
            AllocationEvent::AllocationClosed(_) => "allocation.closed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AllocationEvent::CostsAllocated(e) => e.occurred_at,
            AllocationEvent::AllocationInvoiced(e) => e.occurred_at,
            AllocationEvent::AllocationClosed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for CostAllocation {
    type Command = AllocationCommand;
    type Event = AllocationEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AllocationEvent::CostsAllocated(e) => {
                if !self.created {
                    self.id = e.allocation_id;
                    self.tenant_id = Some(e.tenant_id);
                    self.settlement_id = Some(e.settlement_id);
                    self.created_by = Some(e.allocated_by);
                    self.created_at = Some(e.occurred_at);
                    self.created = true;
                }
                self.label = e.label.clone();
                self.notes = e.notes.clone();
                self.total_allocable = e.total_allocable;
                self.items = e.items.clone();
                self.status = AllocationStatus::Draft;
            }
            AllocationEvent::AllocationInvoiced(e) => {
                let by_entity: HashMap<Uuid, &EntityInvoices> =
                    e.invoices.iter().map(|i| (i.entity_id, i)).collect();
                for item in &mut self.items {
                    if let Some(inv) = by_entity.get(&item.entity_id) {
                        item.vat_invoice_id = inv.vat_invoice_id;
                        item.exempt_invoice_id = inv.exempt_invoice_id;
                    }
                }
                self.invoiced_at = Some(e.occurred_at);
                self.status = AllocationStatus::Invoiced;
            }
            AllocationEvent::AllocationClosed(_) => {
                self.status = AllocationStatus::Closed;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AllocationCommand::Allocate(cmd) => self.handle_allocate(cmd),
            AllocationCommand::RecordInvoices(cmd) => self.handle_record_invoices(cmd),
            AllocationCommand::Close(cmd) => self.handle_close(cmd),
        }
    }
}

impl CostAllocation {
    fn ensure_scope(
        &self,
        tenant_id: TenantId,
        allocation_id: AllocationId,
    ) -> Result<(), DomainError> {
        if self.id != allocation_id {
            return Err(DomainError::invariant("allocation_id mismatch"));
        }
        if self.created && self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn handle_allocate(&self, cmd: &AllocateCosts) -> Result<Vec<AllocationEvent>, DomainError> {
        self.ensure_scope(cmd.tenant_id, cmd.allocation_id)?;

        if self.created {
            if self.status != AllocationStatus::Draft {
                return Err(DomainError::invalid_status(
                    self.status.as_str(),
                    AllocationStatus::Draft.as_str(),
                ));
            }
            if self.settlement_id != Some(cmd.settlement.settlement_id) {
                return Err(DomainError::invariant("settlement_id mismatch"));
            }
        }

        let settlement = &cmd.settlement;
        if !matches!(
            settlement.status,
            SettlementStatus::Approved | SettlementStatus::Settled
        ) {
            return Err(DomainError::invalid_status(
                settlement.status.as_str(),
                "APPROVED or SETTLED",
            ));
        }
        if settlement.item_count == 0 {
            return Err(DomainError::validation("settlement has no items to allocate"));
        }

        let items = allocate(settlement.calculated_fee, &cmd.entities)?;

        Ok(vec![AllocationEvent::CostsAllocated(CostsAllocated {
            tenant_id: cmd.tenant_id,
            allocation_id: cmd.allocation_id,
            settlement_id: settlement.settlement_id,
            allocated_by: cmd.actor,
            label: cmd.label.clone(),
            notes: cmd.notes.clone(),
            total_allocable: settlement.calculated_fee,
            items,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_invoices(
        &self,
        cmd: &RecordAllocationInvoices,
    ) -> Result<Vec<AllocationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_scope(cmd.tenant_id, cmd.allocation_id)?;

        if self.items.iter().any(AllocationItem::is_invoiced) {
            return Err(DomainError::AlreadyInvoiced);
        }
        if self.status != AllocationStatus::Draft {
            return Err(DomainError::invalid_status(
                self.status.as_str(),
                AllocationStatus::Draft.as_str(),
            ));
        }

        for item in &self.items {
            if !cmd.invoices.iter().any(|i| i.entity_id == item.entity_id) {
                return Err(DomainError::validation(format!(
                    "no invoices supplied for entity {}",
                    item.entity_id
                )));
            }
        }
        if cmd
            .invoices
            .iter()
            .any(|i| !self.items.iter().any(|item| item.entity_id == i.entity_id))
        {
            return Err(DomainError::validation("invoices reference an unknown entity"));
        }

        Ok(vec![AllocationEvent::AllocationInvoiced(AllocationInvoiced {
            tenant_id: cmd.tenant_id,
            allocation_id: cmd.allocation_id,
            invoices: cmd.invoices.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_close(&self, cmd: &CloseAllocation) -> Result<Vec<AllocationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_scope(cmd.tenant_id, cmd.allocation_id)?;

        if self.status != AllocationStatus::Invoiced {
            return Err(DomainError::invalid_transition(
                "close",
                self.status.as_str(),
                AllocationStatus::Invoiced.as_str(),
            ));
        }

        Ok(vec![AllocationEvent::AllocationClosed(AllocationClosed {
            tenant_id: cmd.tenant_id,
            allocation_id: cmd.allocation_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use windledger_events::execute;

    fn entities() -> Vec<OperatingEntity> {
        vec![
            OperatingEntity {
                entity_id: Uuid::now_v7(),
                name: "Betreiber GmbH & Co. KG".to_string(),
                basis: dec!(70),
                exempt_share_percent: dec!(0),
            },
            OperatingEntity {
                entity_id: Uuid::now_v7(),
                name: "Bürgerwind eG".to_string(),
                basis: dec!(30),
                exempt_share_percent: dec!(100),
            },
        ]
    }

    fn snapshot(status: SettlementStatus) -> SettlementSnapshot {
        SettlementSnapshot {
            settlement_id: SettlementId::new(AggregateId::new()),
            status,
            calculated_fee: dec!(30000),
            item_count: 3,
        }
    }

    fn allocate_cmd(a: &CostAllocation, tenant: TenantId, s: SettlementSnapshot) -> AllocationCommand {
        AllocationCommand::Allocate(AllocateCosts {
            tenant_id: tenant,
            allocation_id: a.id_typed(),
            actor: UserId::new(),
            settlement: s,
            entities: entities(),
            label: Some("Umlage 2026".to_string()),
            notes: None,
            occurred_at: Utc::now(),
        })
    }

    fn invoices_for(a: &CostAllocation) -> Vec<EntityInvoices> {
        a.items()
            .iter()
            .map(|i| EntityInvoices {
                entity_id: i.entity_id,
                vat_invoice_id: Some(AggregateId::new()),
                exempt_invoice_id: None,
            })
            .collect()
    }

    fn record(a: &mut CostAllocation, tenant: TenantId) -> Result<Vec<AllocationEvent>, DomainError> {
        let cmd = AllocationCommand::RecordInvoices(RecordAllocationInvoices {
            tenant_id: tenant,
            allocation_id: a.id_typed(),
            invoices: invoices_for(a),
            occurred_at: Utc::now(),
        });
        execute(a, &cmd)
    }

    #[test]
    fn allocation_requires_released_settlement() {
        let tenant = TenantId::new();
        let mut a = CostAllocation::empty(AllocationId::new(AggregateId::new()));

        let cmd = allocate_cmd(&a, tenant, snapshot(SettlementStatus::PendingReview));
        let err = execute(&mut a, &cmd).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStatus { .. }));

        let cmd = allocate_cmd(&a, tenant, snapshot(SettlementStatus::Approved));
        execute(&mut a, &cmd).unwrap();
        assert_eq!(a.status(), AllocationStatus::Draft);
        assert_eq!(a.items()[0].share_amount, dec!(21000));
        assert_eq!(a.items()[1].exempt_amount, dec!(9000));
    }

    #[test]
    fn settlement_without_items_cannot_be_allocated() {
        let tenant = TenantId::new();
        let mut a = CostAllocation::empty(AllocationId::new(AggregateId::new()));
        let mut s = snapshot(SettlementStatus::Settled);
        s.item_count = 0;
        let cmd = allocate_cmd(&a, tenant, s);
        assert!(execute(&mut a, &cmd).is_err());
    }

    #[test]
    fn invoicing_twice_is_rejected_by_existing_references() {
        let tenant = TenantId::new();
        let mut a = CostAllocation::empty(AllocationId::new(AggregateId::new()));
        let cmd = allocate_cmd(&a, tenant, snapshot(SettlementStatus::Approved));
        execute(&mut a, &cmd).unwrap();

        record(&mut a, tenant).unwrap();
        assert_eq!(a.status(), AllocationStatus::Invoiced);
        assert!(a.items().iter().all(AllocationItem::is_invoiced));

        assert_eq!(record(&mut a, tenant).unwrap_err(), DomainError::AlreadyInvoiced);
    }

    #[test]
    fn reallocation_is_only_possible_in_draft() {
        let tenant = TenantId::new();
        let mut a = CostAllocation::empty(AllocationId::new(AggregateId::new()));
        let s = snapshot(SettlementStatus::Approved);
        let cmd = allocate_cmd(&a, tenant, s);
        execute(&mut a, &cmd).unwrap();
        let cmd = allocate_cmd(&a, tenant, s);
        execute(&mut a, &cmd).unwrap();
        assert_eq!(a.version(), 2);

        record(&mut a, tenant).unwrap();
        let cmd = allocate_cmd(&a, tenant, s);
        let err = execute(&mut a, &cmd).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStatus { ref current, .. } if current == "INVOICED"));
    }

    #[test]
    fn close_requires_invoiced() {
        let tenant = TenantId::new();
        let mut a = CostAllocation::empty(AllocationId::new(AggregateId::new()));
        let cmd = allocate_cmd(&a, tenant, snapshot(SettlementStatus::Approved));
        execute(&mut a, &cmd).unwrap();

        let close = AllocationCommand::Close(CloseAllocation {
            tenant_id: tenant,
            allocation_id: a.id_typed(),
            occurred_at: Utc::now(),
        });
        assert!(matches!(
            execute(&mut a, &close),
            Err(DomainError::InvalidTransition { .. })
        ));

        record(&mut a, tenant).unwrap();
        execute(&mut a, &close).unwrap();
        assert_eq!(a.status(), AllocationStatus::Closed);
    }
}
