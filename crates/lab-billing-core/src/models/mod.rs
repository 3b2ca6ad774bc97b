//! Domain models for the lab billing system.

mod bill;
mod catalog;
mod report;

pub use bill::*;
pub use catalog::*;
pub use report::*;

/// Money in the smallest currency unit.
pub type Money = i64;
