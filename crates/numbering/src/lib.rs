//! Document numbering (event-sourced).
//!
//! One `NumberSequence` stream per tenant and document type issues gap-free,
//! year-scoped numbers. Reservation is a normal aggregate command so it can be
//! committed in the same unit of work as the documents that consume the numbers.

pub mod format;
pub mod sequence;

pub use format::{DEFAULT_DIGITS, NumberFormat};
pub use sequence::{
    ConfigureSequence, DocumentType, NumberSequence, NumbersReserved, ReserveNumbers,
    SequenceCommand, SequenceConfigured, SequenceEvent, SequenceId,
};
