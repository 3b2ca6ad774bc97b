//! Render-ready report sheets.
//!
//! Result lines keep the name and unit captured when the report was built.
//! Reference ranges are not captured: an empty stored range is filled from
//! the current catalog definition at render time, and stays empty if that
//! definition has been deleted.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::db::{Database, DbError, DbResult};
use crate::models::{Report, ReportStatus, ResultEntry, ResultLine, ResultStatus};

/// One printable result line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SheetLine {
    pub test_id: String,
    pub test_name: String,
    pub result_value: String,
    pub unit: String,
    pub reference_range: String,
    pub status: ResultStatus,
    pub remarks: Option<String>,
}

/// A top-level entry: a single test, or a group heading with its members.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SheetSection {
    pub test_id: String,
    /// Group name; `None` for a single test
    pub heading: Option<String>,
    pub status: ResultStatus,
    pub remarks: Option<String>,
    pub lines: Vec<SheetLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportSheet {
    pub report_id: String,
    pub bill_id: String,
    pub patient_id: String,
    pub doctor_id: Option<String>,
    pub status: ReportStatus,
    /// Human-readable status, e.g. "In Process"
    pub status_label: String,
    pub impression: Option<String>,
    pub sections: Vec<SheetSection>,
    pub rendered_at: String,
}

impl ReportSheet {
    /// Export to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Plain-text rendering, one result per line.
    pub fn to_text(&self) -> String {
        let mut out = format!(
            "Report {} ({})\nPatient: {}\n",
            self.report_id, self.status_label, self.patient_id
        );
        if let Some(doctor) = &self.doctor_id {
            out.push_str(&format!("Referred by: {}\n", doctor));
        }

        for section in &self.sections {
            let indent = if let Some(heading) = &section.heading {
                out.push_str(&format!("\n{}\n", heading));
                "  "
            } else {
                ""
            };
            for line in &section.lines {
                out.push_str(&format!(
                    "{}{}: {} {}",
                    indent, line.test_name, line.result_value, line.unit
                ));
                if !line.reference_range.is_empty() {
                    out.push_str(&format!(" [{}]", line.reference_range.replace('\n', "; ")));
                }
                out.push('\n');
            }
        }

        if let Some(impression) = &self.impression {
            out.push_str(&format!("\nImpression: {}\n", impression));
        }
        out
    }
}

/// Builds report sheets against the live catalog.
pub struct ReportSheetRenderer<'a> {
    db: &'a Database,
}

impl<'a> ReportSheetRenderer<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Render a stored report.
    pub fn render(&self, report_id: &str) -> DbResult<ReportSheet> {
        let report = self
            .db
            .get_report(report_id)?
            .ok_or_else(|| DbError::NotFound(format!("report {}", report_id)))?;
        self.render_report(&report)
    }

    pub fn render_report(&self, report: &Report) -> DbResult<ReportSheet> {
        let mut ranges = RangeCache::new(self.db);

        let mut sections = Vec::with_capacity(report.results.len());
        for entry in &report.results {
            let section = match entry {
                ResultEntry::Single(line) => SheetSection {
                    test_id: line.test_id.clone(),
                    heading: None,
                    status: line.status,
                    remarks: None,
                    lines: vec![ranges.sheet_line(line)?],
                },
                ResultEntry::Group(group) => SheetSection {
                    test_id: group.test_id.clone(),
                    heading: Some(group.test_name.clone()),
                    status: group.status,
                    remarks: group.remarks.clone(),
                    lines: group
                        .group_results
                        .iter()
                        .map(|line| ranges.sheet_line(line))
                        .collect::<DbResult<Vec<_>>>()?,
                },
            };
            sections.push(section);
        }

        Ok(ReportSheet {
            report_id: report.report_id.clone(),
            bill_id: report.bill_id.clone(),
            patient_id: report.patient_id.clone(),
            doctor_id: report.doctor_id.clone(),
            status: report.status,
            status_label: report.status.display_name().to_string(),
            impression: report.impression.clone(),
            sections,
            rendered_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}

/// Live reference ranges, looked up once per test id.
struct RangeCache<'a> {
    db: &'a Database,
    ranges: HashMap<String, String>,
}

impl<'a> RangeCache<'a> {
    fn new(db: &'a Database) -> Self {
        Self {
            db,
            ranges: HashMap::new(),
        }
    }

    fn sheet_line(&mut self, line: &ResultLine) -> DbResult<SheetLine> {
        let reference_range = if line.reference_range.is_empty() {
            self.live_range(&line.test_id)?
        } else {
            line.reference_range.clone()
        };

        Ok(SheetLine {
            test_id: line.test_id.clone(),
            test_name: line.test_name.clone(),
            result_value: line.result_value.clone(),
            unit: line.unit.clone(),
            reference_range,
            status: line.status,
            remarks: line.remarks.clone(),
        })
    }

    fn live_range(&mut self, test_id: &str) -> DbResult<String> {
        if let Some(range) = self.ranges.get(test_id) {
            return Ok(range.clone());
        }
        let range = self
            .db
            .get_test_definition(test_id)?
            .map(|def| def.formatted_reference_ranges())
            .unwrap_or_default();
        self.ranges.insert(test_id.to_string(), range.clone());
        Ok(range)
    }
}
