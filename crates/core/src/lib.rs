//! Domain foundation: ids, aggregates, errors and money rounding.
//!
//! Pure domain primitives shared by every billing module (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;
pub mod money;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult, ErrorKind};
pub use id::{AggregateId, TenantId, UserId};
pub use money::{round_money, split_proportionally};
