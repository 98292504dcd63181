//! Statement format readers.

pub mod camt053;
pub mod mt940;
