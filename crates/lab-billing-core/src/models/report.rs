//! Diagnostic report models.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::catalog::TestKind;

/// Report lifecycle status.
///
/// Free assignment: any status may be set from any other, there is no
/// transition table and no terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Initial,
    InProgress,
    Completed,
    Verified,
    Printed,
    Delivered,
}

impl ReportStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [ReportStatus; 6] = [
        ReportStatus::Initial,
        ReportStatus::InProgress,
        ReportStatus::Completed,
        ReportStatus::Verified,
        ReportStatus::Printed,
        ReportStatus::Delivered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Initial => "INITIAL",
            ReportStatus::InProgress => "IN_PROGRESS",
            ReportStatus::Completed => "COMPLETED",
            ReportStatus::Verified => "VERIFIED",
            ReportStatus::Printed => "PRINTED",
            ReportStatus::Delivered => "DELIVERED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// Label shown to staff.
    pub fn display_name(&self) -> &'static str {
        match self {
            ReportStatus::Initial => "Initial",
            ReportStatus::InProgress => "In Process",
            ReportStatus::Completed => "Completed",
            ReportStatus::Verified => "Verified",
            ReportStatus::Printed => "Printed",
            ReportStatus::Delivered => "Delivered",
        }
    }
}

/// Status of a single result line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    /// Awaiting a value
    Pending,
    /// Value entered
    Completed,
}

/// A flat result line: a normal or descriptive test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultLine {
    /// Catalog test id
    pub test_id: String,
    /// Test name frozen at creation time
    pub test_name: String,
    /// Normal or descriptive, frozen at creation time
    pub kind: TestKind,
    pub status: ResultStatus,
    /// Entered value, empty until recorded
    pub result_value: String,
    /// Unit frozen at creation time
    pub unit: String,
    /// Empty means "use the live catalog ranges"
    pub reference_range: String,
    /// Interpretation override
    pub remarks: Option<String>,
}

/// A group (panel) result owning one line per sub-test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupResult {
    /// Catalog id of the group
    pub test_id: String,
    /// Group name frozen at creation time
    pub test_name: String,
    pub status: ResultStatus,
    pub remarks: Option<String>,
    /// Sub-test lines in the group's stored order
    pub group_results: Vec<ResultLine>,
}

/// One top-level entry of a report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "entry", rename_all = "lowercase")]
pub enum ResultEntry {
    Single(ResultLine),
    Group(GroupResult),
}

impl ResultEntry {
    pub fn test_id(&self) -> &str {
        match self {
            ResultEntry::Single(line) => &line.test_id,
            ResultEntry::Group(group) => &group.test_id,
        }
    }

    pub fn test_name(&self) -> &str {
        match self {
            ResultEntry::Single(line) => &line.test_name,
            ResultEntry::Group(group) => &group.test_name,
        }
    }

    pub fn kind(&self) -> TestKind {
        match self {
            ResultEntry::Single(line) => line.kind,
            ResultEntry::Group(_) => TestKind::Group,
        }
    }

    pub fn status(&self) -> ResultStatus {
        match self {
            ResultEntry::Single(line) => line.status,
            ResultEntry::Group(group) => group.status,
        }
    }
}

impl ResultLine {
    /// Record a value and mark the line completed.
    pub fn record(&mut self, value: String, remarks: Option<String>) {
        self.result_value = value;
        if remarks.is_some() {
            self.remarks = remarks;
        }
        self.status = ResultStatus::Completed;
    }
}

/// A diagnostic report linked 1:1 to a bill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    /// Unique report ID
    pub report_id: String,
    /// Owning bill
    pub bill_id: String,
    /// Patient reference
    pub patient_id: String,
    /// Referring doctor reference
    pub doctor_id: Option<String>,
    /// Ordered result tree
    pub results: Vec<ResultEntry>,
    /// Lifecycle status, independent of the bill's payment status
    pub status: ReportStatus,
    /// Free-text impression
    pub impression: Option<String>,
    /// Incremented on every results write
    pub revision: u32,
    /// Creation timestamp
    pub created_at: String,
    /// Last update timestamp
    pub updated_at: String,
}

impl Report {
    /// Create a new report in the `Initial` state.
    pub fn new(
        bill_id: String,
        patient_id: String,
        doctor_id: Option<String>,
        results: Vec<ResultEntry>,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            report_id: uuid::Uuid::new_v4().to_string(),
            bill_id,
            patient_id,
            doctor_id,
            results,
            status: ReportStatus::Initial,
            impression: None,
            revision: 0,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Test ids present in the top-level results array.
    ///
    /// Group members are not unwound: a group contributes only its own id.
    pub fn existing_test_ids(&self) -> HashSet<&str> {
        self.results.iter().map(ResultEntry::test_id).collect()
    }

    /// Record a result on a top-level line, or on a member of a group.
    ///
    /// Returns `false` when no matching entry exists.
    pub fn enter_result(
        &mut self,
        test_id: &str,
        sub_test_id: Option<&str>,
        value: String,
        remarks: Option<String>,
    ) -> bool {
        let Some(entry) = self.results.iter_mut().find(|e| e.test_id() == test_id) else {
            return false;
        };

        match (entry, sub_test_id) {
            (ResultEntry::Single(line), None) => {
                line.record(value, remarks);
                true
            }
            (ResultEntry::Group(group), Some(sub_id)) => {
                let Some(line) = group.group_results.iter_mut().find(|l| l.test_id == sub_id)
                else {
                    return false;
                };
                line.record(value, remarks);
                if group
                    .group_results
                    .iter()
                    .all(|l| l.status == ResultStatus::Completed)
                {
                    group.status = ResultStatus::Completed;
                }
                true
            }
            _ => false,
        }
    }

    /// Count of lines (group members counted individually) still pending.
    pub fn pending_line_count(&self) -> usize {
        self.results
            .iter()
            .map(|entry| match entry {
                ResultEntry::Single(line) => usize::from(line.status == ResultStatus::Pending),
                ResultEntry::Group(group) => group
                    .group_results
                    .iter()
                    .filter(|l| l.status == ResultStatus::Pending)
                    .count(),
            })
            .sum()
    }

    /// Touch the updated_at timestamp.
    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(test_id: &str) -> ResultLine {
        ResultLine {
            test_id: test_id.into(),
            test_name: format!("Test {}", test_id),
            kind: TestKind::Normal,
            status: ResultStatus::Pending,
            result_value: String::new(),
            unit: "mg/dL".into(),
            reference_range: String::new(),
            remarks: None,
        }
    }

    fn make_report() -> Report {
        Report::new(
            "bill-1".into(),
            "patient-1".into(),
            None,
            vec![
                ResultEntry::Single(line("GLU")),
                ResultEntry::Group(GroupResult {
                    test_id: "LFT".into(),
                    test_name: "Liver Function".into(),
                    status: ResultStatus::Pending,
                    remarks: None,
                    group_results: vec![line("ALT"), line("AST")],
                }),
            ],
        )
    }

    #[test]
    fn test_new_report_is_initial() {
        let report = make_report();
        assert_eq!(report.status, ReportStatus::Initial);
        assert_eq!(report.revision, 0);
        assert_eq!(report.report_id.len(), 36);
    }

    #[test]
    fn test_existing_ids_do_not_unwind_groups() {
        let report = make_report();
        let ids = report.existing_test_ids();
        assert!(ids.contains("GLU"));
        assert!(ids.contains("LFT"));
        assert!(!ids.contains("ALT"));
    }

    #[test]
    fn test_enter_result_on_single_line() {
        let mut report = make_report();
        assert!(report.enter_result("GLU", None, "98".into(), None));

        let ResultEntry::Single(line) = &report.results[0] else {
            panic!("expected single entry");
        };
        assert_eq!(line.result_value, "98");
        assert_eq!(line.status, ResultStatus::Completed);
    }

    #[test]
    fn test_group_completes_when_all_members_entered() {
        let mut report = make_report();
        assert!(report.enter_result("LFT", Some("ALT"), "30".into(), None));
        assert_eq!(report.results[1].status(), ResultStatus::Pending);

        assert!(report.enter_result("LFT", Some("AST"), "28".into(), Some("Normal".into())));
        assert_eq!(report.results[1].status(), ResultStatus::Completed);
        assert_eq!(report.pending_line_count(), 1);
    }

    #[test]
    fn test_enter_result_unknown_targets() {
        let mut report = make_report();
        assert!(!report.enter_result("TSH", None, "1".into(), None));
        assert!(!report.enter_result("LFT", Some("GGT"), "1".into(), None));
        // A group needs a sub-test id, a single line must not get one
        assert!(!report.enter_result("LFT", None, "1".into(), None));
        assert!(!report.enter_result("GLU", Some("ALT"), "1".into(), None));
    }

    #[test]
    fn test_status_display_and_wire() {
        assert_eq!(ReportStatus::InProgress.display_name(), "In Process");
        assert_eq!(ReportStatus::InProgress.as_str(), "IN_PROGRESS");
        assert_eq!(
            serde_json::to_string(&ReportStatus::InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
        for status in ReportStatus::ALL {
            assert_eq!(ReportStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ReportStatus::parse("ARCHIVED"), None);
    }

    #[test]
    fn test_result_entry_serde_shape() {
        let report = make_report();
        let json = serde_json::to_string(&report.results).unwrap();
        assert!(json.contains("\"entry\":\"single\""));
        assert!(json.contains("\"entry\":\"group\""));

        let parsed: Vec<ResultEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report.results);
    }
}
