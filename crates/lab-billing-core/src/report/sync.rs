//! Bill ↔ report synchronization.
//!
//! Protocol:
//! 1. Load the report linked to the bill
//! 2. Collect the test ids already present at the top level
//! 3. Resolve and append an entry for every bill line not yet present
//! 4. Persist only if something was appended
//!
//! Existing entries are never mutated, reordered or removed, even when the
//! corresponding line has left the bill. Because step 2 filters by test id,
//! re-running the sync after a partial failure converges without duplicates.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::Database;
use crate::models::{Bill, Report};
use crate::resolver::{ResolvedTest, ResolverError, TestResolver};

use super::builder::{build_entry, build_results};

/// Sync errors.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DbError),

    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),

    #[error("No report linked to bill {0}")]
    MissingReport(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Non-fatal report bookkeeping failure attached to a successful bill write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncWarning {
    /// Bill that was written
    pub bill_id: String,
    /// Report involved, when known
    pub report_id: Option<String>,
    /// What went wrong
    pub message: String,
}

impl SyncWarning {
    pub fn new(bill_id: &str, report_id: Option<String>, error: &SyncError) -> Self {
        Self {
            bill_id: bill_id.to_string(),
            report_id,
            message: error.to_string(),
        }
    }
}

/// Result of one sync pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    pub report_id: String,
    /// Test ids appended in this pass, in bill order
    pub appended: Vec<String>,
    /// Whether the report was written
    pub report_modified: bool,
    /// Report revision after the pass
    pub revision: u32,
}

/// Keeps a bill's report in step with its line items.
pub struct ReportSync<'a> {
    db: &'a Database,
    resolver: TestResolver<'a>,
}

impl<'a> ReportSync<'a> {
    /// Create a new sync coordinator.
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            resolver: TestResolver::new(db),
        }
    }

    /// Create the report for a freshly written bill from already-resolved tests.
    pub fn create_report(&self, bill: &Bill, resolved: &[ResolvedTest]) -> SyncResult<Report> {
        let report = Report::new(
            bill.bill_id.clone(),
            bill.patient_id.clone(),
            bill.doctor_id.clone(),
            build_results(resolved),
        );
        self.db.insert_report(&report)?;

        tracing::info!(
            bill_id = %bill.bill_id,
            report_id = %report.report_id,
            entries = report.results.len(),
            "report created"
        );
        Ok(report)
    }

    /// Create a report by resolving the bill's current lines.
    pub fn create_report_from_bill(&self, bill: &Bill) -> SyncResult<Report> {
        let resolved = bill
            .line_items
            .iter()
            .map(|line| self.resolver.resolve_line(line))
            .collect::<Result<Vec<_>, _>>()?;
        self.create_report(bill, &resolved)
    }

    /// Append entries for bill lines missing from the report.
    ///
    /// Runs in one immediate transaction so result entry cannot interleave
    /// with the append.
    pub fn sync_bill(&self, bill: &Bill) -> SyncResult<SyncOutcome> {
        let tx = self.db.write_transaction()?;
        let mut report = self
            .db
            .get_report_by_bill(&bill.bill_id)?
            .ok_or_else(|| SyncError::MissingReport(bill.bill_id.clone()))?;

        let mut existing: HashSet<String> = report
            .existing_test_ids()
            .into_iter()
            .map(String::from)
            .collect();

        let mut appended = Vec::new();
        for line in &bill.line_items {
            if existing.contains(&line.test_id) {
                continue;
            }
            let resolved = self.resolver.resolve_line(line)?;
            report.results.push(build_entry(&resolved));
            existing.insert(line.test_id.clone());
            appended.push(line.test_id.clone());
        }

        let report_modified = !appended.is_empty();
        let revision = if report_modified {
            self.db
                .update_report_results(&report.report_id, &report.results)?
        } else {
            report.revision
        };
        tx.commit().map_err(crate::db::DbError::from)?;

        tracing::debug!(
            bill_id = %bill.bill_id,
            report_id = %report.report_id,
            appended = ?appended,
            report_modified,
            "report synced"
        );

        Ok(SyncOutcome {
            report_id: report.report_id,
            appended,
            report_modified,
            revision,
        })
    }
}
