//! Bill workflows.
//!
//! Orchestrates the resolver, the financial calculator and the report sync:
//!
//! ```text
//! request → validate → resolve tests → price lines → settle amounts
//!                                                        │
//!                                                 write bill (tx)
//!                                                        │
//!                                          create / sync report
//!                                                        │
//!                                 BillOutcome { bill, report_id, warning }
//! ```
//!
//! The bill write is the source of truth. Report bookkeeping that fails after
//! the bill is written surfaces as a [`SyncWarning`] on a successful outcome.

mod bills;
mod reports;

pub use bills::*;
pub use reports::*;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::DbError;
use crate::finance::FinanceError;
use crate::models::{Bill, DiscountType, Money};
use crate::report::SyncWarning;
use crate::resolver::{LineItemInput, ResolverError};

/// Workflow errors.
#[derive(Error, Debug)]
pub enum BillingError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(DbError),
}

pub type BillingResult<T> = Result<T, BillingError>;

impl From<DbError> for BillingError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => BillingError::NotFound(what),
            other => BillingError::Database(other),
        }
    }
}

impl From<ResolverError> for BillingError {
    fn from(e: ResolverError) -> Self {
        match e {
            ResolverError::NotFound(test_id) => {
                BillingError::NotFound(format!("test definition {}", test_id))
            }
            ResolverError::Database(db) => db.into(),
        }
    }
}

impl From<FinanceError> for BillingError {
    fn from(e: FinanceError) -> Self {
        BillingError::Validation(e.to_string())
    }
}

/// Behaviour switches for the workflows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BillingOptions {
    /// Reject writes that leave `paid_amount` above the net amount
    pub reject_overpayment: bool,
}

/// Request to open a new bill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateBillInput {
    pub patient_id: String,
    pub doctor_id: Option<String>,
    pub tests: Vec<LineItemInput>,
    pub discount_value: f64,
    pub discount_type: DiscountType,
    pub paid_amount: Money,
    pub payment_type: String,
}

impl CreateBillInput {
    /// Undiscounted, unpaid cash bill for the given tests.
    pub fn new(patient_id: impl Into<String>, tests: Vec<LineItemInput>) -> Self {
        Self {
            patient_id: patient_id.into(),
            doctor_id: None,
            tests,
            discount_value: 0.0,
            discount_type: DiscountType::Amount,
            paid_amount: 0,
            payment_type: "CASH".to_string(),
        }
    }
}

/// Result of a bill write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillOutcome {
    /// Bill as persisted
    pub bill: Bill,
    /// Linked report, when known
    pub report_id: Option<String>,
    /// Report bookkeeping failure, if any
    pub warning: Option<SyncWarning>,
}

impl BillOutcome {
    pub fn is_clean(&self) -> bool {
        self.warning.is_none()
    }
}
