//! Shared-cost allocation across operating entities (event-sourced).

pub mod allocation;
pub mod allocator;

pub use allocation::{
    AllocateCosts, AllocationClosed, AllocationCommand, AllocationEvent, AllocationId,
    AllocationInvoiced, AllocationStatus, CloseAllocation, CostAllocation, CostsAllocated,
    EntityInvoices, RecordAllocationInvoices, SettlementSnapshot,
};
pub use allocator::{AllocationItem, OperatingEntity, allocate};
