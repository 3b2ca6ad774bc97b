//! Bill ledger and report sheet export.

mod ledger;
mod report_sheet;

pub use ledger::*;
pub use report_sheet::*;
