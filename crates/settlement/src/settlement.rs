use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use windledger_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId, UserId};
use windledger_events::Event;

use crate::calculator::{
    LeaseTerms, ParkTerms, RevenueInput, SettlementCalculation, SettlementItem, SettlementPeriod,
    calculate,
};

/// Settlement identifier.
///
/// Derived from (tenant, park, period) so there is exactly one settlement per
/// park and period.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettlementId(pub AggregateId);

impl SettlementId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn for_period(tenant_id: TenantId, park_id: uuid::Uuid, period: &SettlementPeriod) -> Self {
        let month = period
            .month
            .map(|m| m.to_string())
            .unwrap_or_else(|| "-".to_string());
        Self(AggregateId::derived(
            tenant_id,
            &format!(
                "settlement:{park_id}:{}:{month}:{}",
                period.year,
                period.period_type.as_str()
            ),
        ))
    }
}

impl core::fmt::Display for SettlementId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Review workflow status.
///
/// `CALCULATED -> PENDING_REVIEW -> {APPROVED | CALCULATED} -> SETTLED -> CLOSED`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    Calculated,
    PendingReview,
    Approved,
    Settled,
    Closed,
}

impl SettlementStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SettlementStatus::Calculated => "CALCULATED",
            SettlementStatus::PendingReview => "PENDING_REVIEW",
            SettlementStatus::Approved => "APPROVED",
            SettlementStatus::Settled => "SETTLED",
            SettlementStatus::Closed => "CLOSED",
        }
    }
}

impl core::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate root: Settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    id: SettlementId,
    tenant_id: Option<TenantId>,
    park: Option<ParkTerms>,
    period: Option<SettlementPeriod>,
    leases: Vec<LeaseTerms>,
    revenue: RevenueInput,
    calculation: Option<SettlementCalculation>,
    status: SettlementStatus,
    created_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    calculated_at: Option<DateTime<Utc>>,
    submission_notes: Option<String>,
    reviewed_by: Option<UserId>,
    reviewed_at: Option<DateTime<Utc>>,
    review_notes: Option<String>,
    credit_note_ids: Vec<AggregateId>,
    closed_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Settlement {
    pub fn empty(id: SettlementId) -> Self {
        Self {
            id,
            tenant_id: None,
            park: None,
            period: None,
            leases: Vec::new(),
            revenue: RevenueInput::default(),
            calculation: None,
            status: SettlementStatus::Calculated,
            created_by: None,
            created_at: None,
            calculated_at: None,
            submission_notes: None,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            credit_note_ids: Vec::new(),
            closed_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SettlementId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn status(&self) -> SettlementStatus {
        self.status
    }

    pub fn park(&self) -> Option<&ParkTerms> {
        self.park.as_ref()
    }

    pub fn period(&self) -> Option<&SettlementPeriod> {
        self.period.as_ref()
    }

    pub fn leases(&self) -> &[LeaseTerms] {
        &self.leases
    }

    /// Revenue inputs of the last calculation.
    pub fn revenue(&self) -> &RevenueInput {
        &self.revenue
    }

    pub fn calculation(&self) -> Option<&SettlementCalculation> {
        self.calculation.as_ref()
    }

    pub fn items(&self) -> &[SettlementItem] {
        self.calculation
            .as_ref()
            .map(|c| c.items.as_slice())
            .unwrap_or(&[])
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn calculated_at(&self) -> Option<DateTime<Utc>> {
        self.calculated_at
    }

    pub fn submission_notes(&self) -> Option<&str> {
        self.submission_notes.as_deref()
    }

    pub fn reviewed_by(&self) -> Option<UserId> {
        self.reviewed_by
    }

    pub fn reviewed_at(&self) -> Option<DateTime<Utc>> {
        self.reviewed_at
    }

    pub fn review_notes(&self) -> Option<&str> {
        self.review_notes.as_deref()
    }

    /// Lessor credit notes issued when the settlement was settled.
    pub fn credit_note_ids(&self) -> &[AggregateId] {
        &self.credit_note_ids
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    /// Approved or settled settlements feed allocation and document generation.
    pub fn is_released(&self) -> bool {
        matches!(
            self.status,
            SettlementStatus::Approved | SettlementStatus::Settled
        )
    }
}

impl AggregateRoot for Settlement {
    type Id = SettlementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CalculateSettlement (create or recalculate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculateSettlement {
    pub tenant_id: TenantId,
    pub settlement_id: SettlementId,
    pub actor: UserId,
    pub park: ParkTerms,
    pub period: SettlementPeriod,
    pub leases: Vec<LeaseTerms>,
    pub revenue: RevenueInput,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitSettlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitSettlement {
    pub tenant_id: TenantId,
    pub settlement_id: SettlementId,
    pub actor: UserId,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveSettlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveSettlement {
    pub tenant_id: TenantId,
    pub settlement_id: SettlementId,
    pub actor: UserId,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectSettlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectSettlement {
    pub tenant_id: TenantId,
    pub settlement_id: SettlementId,
    pub actor: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkSettlementSettled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkSettlementSettled {
    pub tenant_id: TenantId,
    pub settlement_id: SettlementId,
    pub credit_note_ids: Vec<AggregateId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CloseSettlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSettlement {
    pub tenant_id: TenantId,
    pub settlement_id: SettlementId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementCommand {
    Calculate(CalculateSettlement),
    Submit(SubmitSettlement),
    Approve(ApproveSettlement),
    Reject(RejectSettlement),
    MarkSettled(MarkSettlementSettled),
    Close(CloseSettlement),
}

/// Event: SettlementCalculated.
///
/// Carries the complete result; applying it replaces every prior item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementCalculated {
    pub tenant_id: TenantId,
    pub settlement_id: SettlementId,
    pub calculated_by: UserId,
    pub park: ParkTerms,
    pub period: SettlementPeriod,
    pub leases: Vec<LeaseTerms>,
    pub revenue: RevenueInput,
    pub calculation: SettlementCalculation,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SettlementSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSubmitted {
    pub tenant_id: TenantId,
    pub settlement_id: SettlementId,
    pub submitted_by: UserId,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SettlementApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementApproved {
    pub tenant_id: TenantId,
    pub settlement_id: SettlementId,
    pub reviewed_by: UserId,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SettlementRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRejected {
    pub tenant_id: TenantId,
    pub settlement_id: SettlementId,
    pub reviewed_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SettlementSettled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSettled {
    pub tenant_id: TenantId,
    pub settlement_id: SettlementId,
    pub credit_note_ids: Vec<AggregateId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SettlementClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementClosed {
    pub tenant_id: TenantId,
    pub settlement_id: SettlementId,
    pub closed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementEvent {
    SettlementCalculated(SettlementCalculated),
    SettlementSubmitted(SettlementSubmitted),
    SettlementApproved(SettlementApproved),
    SettlementRejected(SettlementRejected),
    SettlementSettled(SettlementSettled),
    SettlementClosed(SettlementClosed),
}

impl Event for SettlementEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SettlementEvent::SettlementCalculated(_) => "settlement.calculated",
            SettlementEvent::SettlementSubmitted(_) => "settlement.submitted",
            SettlementEvent::SettlementApproved(_) => "settlement.approved",
            SettlementEvent::SettlementRejected(_) => "settlement.rejected",
            SettlementEvent::SettlementSettled(_) => "settlement.settled",
            SettlementEvent::SettlementClosed(_) => "settlement.closed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SettlementEvent::SettlementCalculated(e) => e.occurred_at,
            SettlementEvent::SettlementSubmitted(e) => e.occurred_at,
            SettlementEvent::SettlementApproved(e) => e.occurred_at,
            SettlementEvent::SettlementRejected(e) => e.occurred_at,
            SettlementEvent::SettlementSettled(e) => e.occurred_at,
            SettlementEvent::SettlementClosed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Settlement {
    type Command = SettlementCommand;
    type Event = SettlementEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SettlementEvent::SettlementCalculated(e) => {
                if !self.created {
                    self.id = e.settlement_id;
                    self.tenant_id = Some(e.tenant_id);
                    self.created_by = Some(e.calculated_by);
                    self.created_at = Some(e.occurred_at);
                    self.created = true;
                }
                self.park = Some(e.park.clone());
                self.period = Some(e.period);
                self.leases = e.leases.clone();
                self.revenue = e.revenue.clone();
                self.calculation = Some(e.calculation.clone());
                self.calculated_at = Some(e.occurred_at);
                self.status = SettlementStatus::Calculated;
            }
            SettlementEvent::SettlementSubmitted(e) => {
                self.submission_notes = e.notes.clone();
                self.status = SettlementStatus::PendingReview;
            }
            SettlementEvent::SettlementApproved(e) => {
                self.reviewed_by = Some(e.reviewed_by);
                self.reviewed_at = Some(e.occurred_at);
                self.review_notes = e.notes.clone();
                self.status = SettlementStatus::Approved;
            }
            SettlementEvent::SettlementRejected(e) => {
                self.reviewed_by = Some(e.reviewed_by);
                self.reviewed_at = Some(e.occurred_at);
                self.review_notes = Some(e.reason.clone());
                self.status = SettlementStatus::Calculated;
            }
            SettlementEvent::SettlementSettled(e) => {
                self.credit_note_ids = e.credit_note_ids.clone();
                self.status = SettlementStatus::Settled;
            }
            SettlementEvent::SettlementClosed(e) => {
                self.closed_at = Some(e.occurred_at);
                self.status = SettlementStatus::Closed;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SettlementCommand::Calculate(cmd) => self.handle_calculate(cmd),
            SettlementCommand::Submit(cmd) => self.handle_submit(cmd),
            SettlementCommand::Approve(cmd) => self.handle_approve(cmd),
            SettlementCommand::Reject(cmd) => self.handle_reject(cmd),
            SettlementCommand::MarkSettled(cmd) => self.handle_mark_settled(cmd),
            SettlementCommand::Close(cmd) => self.handle_close(cmd),
        }
    }
}

impl Settlement {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_settlement_id(&self, settlement_id: SettlementId) -> Result<(), DomainError> {
        if self.id != settlement_id {
            return Err(DomainError::invariant("settlement_id mismatch"));
        }
        Ok(())
    }

    fn ensure_existing(
        &self,
        tenant_id: TenantId,
        settlement_id: SettlementId,
    ) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(tenant_id)?;
        self.ensure_settlement_id(settlement_id)
    }

    fn require_status(
        &self,
        action: &str,
        allowed: &[SettlementStatus],
    ) -> Result<(), DomainError> {
        if allowed.contains(&self.status) {
            return Ok(());
        }
        let required = allowed
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" or ");
        Err(DomainError::invalid_transition(
            action,
            self.status.as_str(),
            required,
        ))
    }

    fn handle_calculate(
        &self,
        cmd: &CalculateSettlement,
    ) -> Result<Vec<SettlementEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_settlement_id(cmd.settlement_id)?;

        if self.created {
            if self.status != SettlementStatus::Calculated {
                return Err(DomainError::invalid_status(
                    self.status.as_str(),
                    SettlementStatus::Calculated.as_str(),
                ));
            }
            let same_key = self.park.as_ref().map(|p| p.park_id) == Some(cmd.park.park_id)
                && self.period.as_ref() == Some(&cmd.period);
            if !same_key {
                return Err(DomainError::validation(
                    "park and period of an existing settlement cannot change",
                ));
            }
        }

        let calculation = calculate(&cmd.park, &cmd.period, &cmd.leases, &cmd.revenue)?;

        Ok(vec![SettlementEvent::SettlementCalculated(SettlementCalculated {
            tenant_id: cmd.tenant_id,
            settlement_id: cmd.settlement_id,
            calculated_by: cmd.actor,
            park: cmd.park.clone(),
            period: cmd.period,
            leases: cmd.leases.clone(),
            revenue: cmd.revenue.clone(),
            calculation,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit(&self, cmd: &SubmitSettlement) -> Result<Vec<SettlementEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.settlement_id)?;
        self.require_status("submit", &[SettlementStatus::Calculated])?;

        Ok(vec![SettlementEvent::SettlementSubmitted(SettlementSubmitted {
            tenant_id: cmd.tenant_id,
            settlement_id: cmd.settlement_id,
            submitted_by: cmd.actor,
            notes: normalize_notes(cmd.notes.as_deref()),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveSettlement) -> Result<Vec<SettlementEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.settlement_id)?;
        self.require_status("approve", &[SettlementStatus::PendingReview])?;

        if self.created_by == Some(cmd.actor) {
            return Err(DomainError::SelfApprovalForbidden);
        }

        Ok(vec![SettlementEvent::SettlementApproved(SettlementApproved {
            tenant_id: cmd.tenant_id,
            settlement_id: cmd.settlement_id,
            reviewed_by: cmd.actor,
            notes: normalize_notes(cmd.notes.as_deref()),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectSettlement) -> Result<Vec<SettlementEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.settlement_id)?;
        self.require_status("reject", &[SettlementStatus::PendingReview])?;

        let reason = cmd.reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("a rejection reason is required"));
        }

        Ok(vec![SettlementEvent::SettlementRejected(SettlementRejected {
            tenant_id: cmd.tenant_id,
            settlement_id: cmd.settlement_id,
            reviewed_by: cmd.actor,
            reason: reason.to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_settled(
        &self,
        cmd: &MarkSettlementSettled,
    ) -> Result<Vec<SettlementEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.settlement_id)?;
        self.require_status("settle", &[SettlementStatus::Approved])?;

        Ok(vec![SettlementEvent::SettlementSettled(SettlementSettled {
            tenant_id: cmd.tenant_id,
            settlement_id: cmd.settlement_id,
            credit_note_ids: cmd.credit_note_ids.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_close(&self, cmd: &CloseSettlement) -> Result<Vec<SettlementEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.settlement_id)?;
        self.require_status(
            "close",
            &[SettlementStatus::Settled, SettlementStatus::Approved],
        )?;

        Ok(vec![SettlementEvent::SettlementClosed(SettlementClosed {
            tenant_id: cmd.tenant_id,
            settlement_id: cmd.settlement_id,
            closed_by: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }
}

fn normalize_notes(notes: Option<&str>) -> Option<String> {
    notes
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}
