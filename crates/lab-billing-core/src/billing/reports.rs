//! Report result entry and lifecycle.

use crate::db::Database;
use crate::models::{Report, ReportStatus};

use super::{BillingError, BillingResult};

/// Report operations for lab staff.
pub struct ReportService<'a> {
    db: &'a Database,
}

impl<'a> ReportService<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn get_report(&self, report_id: &str) -> BillingResult<Report> {
        self.db
            .get_report(report_id)?
            .ok_or_else(|| BillingError::NotFound(format!("report {}", report_id)))
    }

    pub fn get_report_for_bill(&self, bill_id: &str) -> BillingResult<Report> {
        self.db
            .get_report_by_bill(bill_id)?
            .ok_or_else(|| BillingError::NotFound(format!("report for bill {}", bill_id)))
    }

    /// Record a result value on a top-level line or on a group member.
    pub fn enter_result(
        &self,
        report_id: &str,
        test_id: &str,
        sub_test_id: Option<&str>,
        value: &str,
        remarks: Option<&str>,
    ) -> BillingResult<Report> {
        let report = self.db.modify_report(report_id, |report| {
            if report.enter_result(
                test_id,
                sub_test_id,
                value.to_string(),
                remarks.map(str::to_string),
            ) {
                Ok(())
            } else {
                Err(BillingError::NotFound(match sub_test_id {
                    Some(sub) => format!("result entry {}/{} in report {}", test_id, sub, report_id),
                    None => format!("result entry {} in report {}", test_id, report_id),
                }))
            }
        })?;

        tracing::debug!(
            report_id,
            test_id,
            sub_test_id = ?sub_test_id,
            pending = report.pending_line_count(),
            "result entered"
        );
        Ok(report)
    }

    /// Set the lifecycle status. Any status may follow any other.
    pub fn set_report_status(&self, report_id: &str, status: ReportStatus) -> BillingResult<()> {
        self.db.set_report_status(report_id, status)?;
        tracing::info!(report_id, status = status.as_str(), "report status changed");
        Ok(())
    }

    pub fn set_impression(&self, report_id: &str, impression: Option<&str>) -> BillingResult<()> {
        self.db.set_report_impression(report_id, impression)?;
        Ok(())
    }

    pub fn list_reports_by_status(&self, status: ReportStatus) -> BillingResult<Vec<Report>> {
        Ok(self.db.list_reports_by_status(status)?)
    }
}
