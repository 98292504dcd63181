//! Lease settlement domain (event-sourced).
//!
//! - [`calculator`]: pure minimum-guarantee vs. revenue-share computation.
//! - [`settlement`]: the `Settlement` aggregate and its four-eyes review workflow.

pub mod calculator;
pub mod settlement;

pub use calculator::{
    AdvanceInterval, LeaseTerms, ParkTerms, PeriodType, RevenueInput, RevenueRecord,
    RevenueSource, SettlementCalculation, SettlementItem, SettlementPeriod, calculate,
};
pub use settlement::{
    ApproveSettlement, CalculateSettlement, CloseSettlement, MarkSettlementSettled,
    RejectSettlement, Settlement, SettlementApproved, SettlementCalculated, SettlementClosed,
    SettlementCommand, SettlementEvent, SettlementId, SettlementRejected, SettlementSettled,
    SettlementStatus, SettlementSubmitted, SubmitSettlement,
};
