//! Report database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{Report, ReportStatus, ResultEntry};

impl Database {
    /// Insert a new report.
    pub fn insert_report(&self, report: &Report) -> DbResult<()> {
        let results_json = serde_json::to_string(&report.results)?;

        self.conn.execute(
            r#"
            INSERT INTO reports (
                report_id, bill_id, patient_id, doctor_id, results,
                status, impression, revision, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                report.report_id,
                report.bill_id,
                report.patient_id,
                report.doctor_id,
                results_json,
                report.status.as_str(),
                report.impression,
                report.revision,
                report.created_at,
                report.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Get a report by ID.
    pub fn get_report(&self, report_id: &str) -> DbResult<Option<Report>> {
        self.conn
            .query_row(
                r#"
                SELECT report_id, bill_id, patient_id, doctor_id, results,
                       status, impression, revision, created_at, updated_at
                FROM reports
                WHERE report_id = ?
                "#,
                [report_id],
                map_report_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Get the report linked to a bill.
    pub fn get_report_by_bill(&self, bill_id: &str) -> DbResult<Option<Report>> {
        self.conn
            .query_row(
                r#"
                SELECT report_id, bill_id, patient_id, doctor_id, results,
                       status, impression, revision, created_at, updated_at
                FROM reports
                WHERE bill_id = ?
                "#,
                [bill_id],
                map_report_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Write a report's result tree and bump its revision.
    ///
    /// Returns the new revision.
    pub fn update_report_results(&self, report_id: &str, results: &[ResultEntry]) -> DbResult<u32> {
        let results_json = serde_json::to_string(results)?;

        let revision: Option<u32> = self
            .conn
            .query_row(
                r#"
                UPDATE reports SET
                    results = ?2,
                    revision = revision + 1,
                    updated_at = ?3
                WHERE report_id = ?1
                RETURNING revision
                "#,
                params![report_id, results_json, chrono::Utc::now().to_rfc3339()],
                |row| row.get(0),
            )
            .optional()?;

        revision.ok_or_else(|| DbError::NotFound(format!("report {}", report_id)))
    }

    /// Read-modify-write a report's result tree inside one immediate transaction.
    ///
    /// The revision is bumped on write; the stored report is returned.
    pub fn modify_report<F, E>(&self, report_id: &str, mutate: F) -> Result<Report, E>
    where
        F: FnOnce(&mut Report) -> Result<(), E>,
        E: From<DbError>,
    {
        let tx = self.write_transaction()?;
        let mut report = self
            .get_report(report_id)?
            .ok_or_else(|| DbError::NotFound(format!("report {}", report_id)))?;

        mutate(&mut report)?;
        self.update_report_results(report_id, &report.results)?;

        let stored = self
            .get_report(report_id)?
            .ok_or_else(|| DbError::NotFound(format!("report {}", report_id)))?;
        tx.commit().map_err(DbError::from)?;
        Ok(stored)
    }

    /// Set a report's lifecycle status (free assignment).
    pub fn set_report_status(&self, report_id: &str, status: ReportStatus) -> DbResult<()> {
        let rows_affected = self.conn.execute(
            "UPDATE reports SET status = ?2, updated_at = ?3 WHERE report_id = ?1",
            params![report_id, status.as_str(), chrono::Utc::now().to_rfc3339()],
        )?;
        if rows_affected == 0 {
            return Err(DbError::NotFound(format!("report {}", report_id)));
        }
        Ok(())
    }

    /// Set a report's free-text impression.
    pub fn set_report_impression(&self, report_id: &str, impression: Option<&str>) -> DbResult<()> {
        let rows_affected = self.conn.execute(
            "UPDATE reports SET impression = ?2, updated_at = ?3 WHERE report_id = ?1",
            params![report_id, impression, chrono::Utc::now().to_rfc3339()],
        )?;
        if rows_affected == 0 {
            return Err(DbError::NotFound(format!("report {}", report_id)));
        }
        Ok(())
    }

    /// List reports in a given status, oldest first.
    pub fn list_reports_by_status(&self, status: ReportStatus) -> DbResult<Vec<Report>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT report_id, bill_id, patient_id, doctor_id, results,
                   status, impression, revision, created_at, updated_at
            FROM reports
            WHERE status = ?
            ORDER BY created_at
            "#,
        )?;

        let rows = stmt.query_map([status.as_str()], map_report_row)?;

        let mut reports = Vec::new();
        for row in rows {
            reports.push(row?.try_into()?);
        }
        Ok(reports)
    }
}

/// Intermediate row struct for database mapping.
struct ReportRow {
    report_id: String,
    bill_id: String,
    patient_id: String,
    doctor_id: Option<String>,
    results: String,
    status: String,
    impression: Option<String>,
    revision: u32,
    created_at: String,
    updated_at: String,
}

fn map_report_row(row: &Row<'_>) -> rusqlite::Result<ReportRow> {
    Ok(ReportRow {
        report_id: row.get(0)?,
        bill_id: row.get(1)?,
        patient_id: row.get(2)?,
        doctor_id: row.get(3)?,
        results: row.get(4)?,
        status: row.get(5)?,
        impression: row.get(6)?,
        revision: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

impl TryFrom<ReportRow> for Report {
    type Error = DbError;

    fn try_from(row: ReportRow) -> Result<Self, Self::Error> {
        let results: Vec<ResultEntry> = serde_json::from_str(&row.results)?;
        let status = ReportStatus::parse(&row.status)
            .ok_or_else(|| DbError::Constraint(format!("Unknown report status: {}", row.status)))?;

        Ok(Report {
            report_id: row.report_id,
            bill_id: row.bill_id,
            patient_id: row.patient_id,
            doctor_id: row.doctor_id,
            results,
            status,
            impression: row.impression,
            revision: row.revision,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
