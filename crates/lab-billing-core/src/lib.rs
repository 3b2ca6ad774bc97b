//! Lab Billing Core Library
//!
//! Billing and diagnostic-report engine for a clinical laboratory.
//!
//! # Architecture
//!
//! ```text
//!   Bill request (tests, discount, payment)
//!                  │
//!                  ▼
//!        Test Catalog Resolver ──── groups expanded to sub-tests
//!                  │
//!                  ▼
//!        Financial Calculator ───── subtotal → discount → due → status
//!                  │
//!          ┌───────▼───────┐
//!          │   Bill write  │  (one IMMEDIATE transaction)
//!          └───────┬───────┘
//!                  │
//!                  ▼
//!     Result Tree Builder / Report Sync ──── append-only, idempotent
//!                  │
//!        ┌─────────┴──────────┐
//!        ▼                    ▼
//!   Result entry         Ledger / report sheet
//!   & report status          export
//! ```
//!
//! # Core Principle
//!
//! **The bill is the source of truth.** A report that fails to follow a bill
//! write is reported as a warning on the successful bill result and can be
//! repaired with a resync.
//!
//! # Modules
//!
//! - [`db`]: SQLite storage with FTS5 catalog search
//! - [`models`]: Domain types (TestDefinition, Bill, Report, ResultEntry)
//! - [`resolver`]: Test catalog resolver and fuzzy search
//! - [`finance`]: Discount, due amount and payment status arithmetic
//! - [`report`]: Result tree builder and bill ↔ report sync
//! - [`billing`]: Bill and report workflows
//! - [`export`]: Bill ledger and report sheet export
//! - [`config`], [`logging`]: Environment configuration and tracing setup

pub mod billing;
pub mod config;
pub mod db;
pub mod export;
pub mod finance;
pub mod logging;
pub mod models;
pub mod report;
pub mod resolver;

// Re-export commonly used types
pub use billing::{
    BillOutcome, BillingError, BillingOptions, BillingService, CreateBillInput, ReportService,
};
pub use config::EngineConfig;
pub use db::Database;
pub use export::{BillLedger, LedgerExporter, ReportSheet, ReportSheetRenderer};
pub use logging::init_logging;
pub use models::{
    Bill, BillLineItem, BillStatus, DiscountType, GroupResult, Money, ReferenceRange, Report,
    ReportStatus, ResultEntry, ResultLine, ResultStatus, TestDefinition, TestKind,
};
pub use report::{ReportSync, SyncWarning};
pub use resolver::{LineItemInput, TestResolver, TestSearch};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::{Arc, Mutex};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum LabBillingError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<db::DbError> for LabBillingError {
    fn from(e: db::DbError) -> Self {
        match e {
            db::DbError::NotFound(what) => LabBillingError::NotFound(what),
            db::DbError::Constraint(msg) => LabBillingError::InvalidInput(msg),
            other => LabBillingError::DatabaseError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for LabBillingError {
    fn from(e: serde_json::Error) -> Self {
        LabBillingError::SerializationError(e.to_string())
    }
}

impl From<resolver::ResolverError> for LabBillingError {
    fn from(e: resolver::ResolverError) -> Self {
        BillingError::from(e).into()
    }
}

impl From<BillingError> for LabBillingError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::NotFound(what) => LabBillingError::NotFound(what),
            BillingError::Validation(msg) => LabBillingError::InvalidInput(msg),
            BillingError::Database(db) => db.into(),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for LabBillingError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        LabBillingError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a database at the given path.
///
/// Busy timeout and overpayment policy come from the environment.
#[uniffi::export]
pub fn open_database(path: String) -> Result<Arc<LabBillingCore>, LabBillingError> {
    let config = EngineConfig::from_env();
    let db = Database::open_with_timeout(&path, config.busy_timeout())?;
    Ok(LabBillingCore::wrap(db, config.billing_options()))
}

/// Create an in-memory database (for testing).
#[uniffi::export]
pub fn open_database_in_memory() -> Result<Arc<LabBillingCore>, LabBillingError> {
    let db = Database::open_in_memory()?;
    Ok(LabBillingCore::wrap(db, BillingOptions::default()))
}

/// Install the log subscriber. Returns `false` if one was already installed.
///
/// Without an explicit `filter`, `LAB_LOG_FILTER` is used.
#[uniffi::export]
pub fn enable_logging(filter: Option<String>) -> bool {
    let filter = EngineConfig::from_env().log_filter_for(filter.as_deref());
    init_logging(Some(&filter))
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe database wrapper for FFI.
#[derive(uniffi::Object)]
pub struct LabBillingCore {
    db: Arc<Mutex<Database>>,
    options: BillingOptions,
}

impl LabBillingCore {
    fn wrap(db: Database, options: BillingOptions) -> Arc<Self> {
        Arc::new(Self {
            db: Arc::new(Mutex::new(db)),
            options,
        })
    }
}

#[uniffi::export]
impl LabBillingCore {
    // =========================================================================
    // Catalog Operations
    // =========================================================================

    /// Add or update a test definition (including group membership).
    pub fn upsert_test_definition(&self, def: FfiTestDefinition) -> Result<(), LabBillingError> {
        let db = self.db.lock()?;
        let definition = TestDefinition::try_from(def)?;
        db.upsert_test_definition(&definition)?;
        Ok(())
    }

    /// Get a test definition by id.
    pub fn get_test_definition(
        &self,
        test_id: String,
    ) -> Result<Option<FfiTestDefinition>, LabBillingError> {
        let db = self.db.lock()?;
        let def = db.get_test_definition(&test_id)?;
        Ok(def.map(|d| d.into()))
    }

    /// List catalog tests, optionally only those still offered.
    pub fn list_test_definitions(
        &self,
        active_only: bool,
    ) -> Result<Vec<FfiTestDefinition>, LabBillingError> {
        let db = self.db.lock()?;
        let defs = db.list_test_definitions(active_only)?;
        Ok(defs.into_iter().map(|d| d.into()).collect())
    }

    /// Replace a group's ordered member list.
    pub fn set_group_members(
        &self,
        group_id: String,
        sub_test_ids: Vec<String>,
    ) -> Result<(), LabBillingError> {
        let db = self.db.lock()?;
        db.set_group_members(&group_id, &sub_test_ids)?;
        Ok(())
    }

    /// Stop offering a test; existing bills keep it.
    pub fn deactivate_test_definition(&self, test_id: String) -> Result<bool, LabBillingError> {
        let db = self.db.lock()?;
        Ok(db.deactivate_test_definition(&test_id)?)
    }

    /// Search tests by partial or misspelled name.
    pub fn search_tests(
        &self,
        query: String,
        limit: u32,
    ) -> Result<Vec<FfiScoredTest>, LabBillingError> {
        let db = self.db.lock()?;
        let results = TestSearch::new(&db).search(&query, limit as usize)?;
        Ok(results.into_iter().map(|r| r.into()).collect())
    }

    // =========================================================================
    // Bill Operations
    // =========================================================================

    /// Open a bill and create its report.
    pub fn create_bill(&self, input: FfiCreateBillInput) -> Result<FfiBillOutcome, LabBillingError> {
        let db = self.db.lock()?;
        let input = CreateBillInput::try_from(input)?;
        let outcome = self.billing(&db).create_bill(&input)?;
        Ok(outcome.into())
    }

    /// Get a bill by id.
    pub fn get_bill(&self, bill_id: String) -> Result<Option<FfiBill>, LabBillingError> {
        let db = self.db.lock()?;
        let bill = db.get_bill(&bill_id)?;
        Ok(bill.map(|b| b.into()))
    }

    /// List a patient's bills, newest first.
    pub fn list_bills_for_patient(&self, patient_id: String) -> Result<Vec<FfiBill>, LabBillingError> {
        let db = self.db.lock()?;
        let bills = db.list_bills_for_patient(&patient_id)?;
        Ok(bills.into_iter().map(|b| b.into()).collect())
    }

    /// Append tests to a bill, optionally replacing the paid amount.
    pub fn add_tests(
        &self,
        bill_id: String,
        tests: Vec<FfiLineItemInput>,
        paid_amount: Option<i64>,
    ) -> Result<FfiBillOutcome, LabBillingError> {
        let db = self.db.lock()?;
        let tests: Vec<LineItemInput> = tests.into_iter().map(|t| t.into()).collect();
        let outcome = self.billing(&db).add_tests(&bill_id, &tests, paid_amount)?;
        Ok(outcome.into())
    }

    /// Collect part or all of the due amount, optionally adding tests.
    pub fn collect_due(
        &self,
        bill_id: String,
        collect_due_amount: i64,
        due_payment_type: Option<String>,
        tests: Vec<FfiLineItemInput>,
    ) -> Result<FfiBillOutcome, LabBillingError> {
        let db = self.db.lock()?;
        let tests: Vec<LineItemInput> = tests.into_iter().map(|t| t.into()).collect();
        let outcome = self.billing(&db).collect_due(
            &bill_id,
            collect_due_amount,
            due_payment_type,
            &tests,
        )?;
        Ok(outcome.into())
    }

    /// Replace the paid amount and, optionally, the discount.
    pub fn update_payment(
        &self,
        bill_id: String,
        paid_amount: i64,
        discount_value: Option<f64>,
        discount_type: Option<String>,
    ) -> Result<FfiBillOutcome, LabBillingError> {
        let db = self.db.lock()?;
        let discount = match (discount_value, discount_type) {
            (Some(value), Some(kind)) => Some((value, parse_discount_type(&kind)?)),
            (Some(value), None) => Some((value, DiscountType::Amount)),
            (None, Some(_)) => {
                return Err(LabBillingError::InvalidInput(
                    "discount type given without a discount value".into(),
                ))
            }
            (None, None) => None,
        };
        let outcome = self.billing(&db).update_payment(&bill_id, paid_amount, discount)?;
        Ok(outcome.into())
    }

    /// Repair a bill's report after a sync warning.
    pub fn resync_report(&self, bill_id: String) -> Result<FfiBillOutcome, LabBillingError> {
        let db = self.db.lock()?;
        let outcome = self.billing(&db).resync_report(&bill_id)?;
        Ok(outcome.into())
    }

    // =========================================================================
    // Report Operations
    // =========================================================================

    /// Get a report by id.
    pub fn get_report(&self, report_id: String) -> Result<Option<FfiReport>, LabBillingError> {
        let db = self.db.lock()?;
        let report = db.get_report(&report_id)?;
        Ok(report.map(|r| r.into()))
    }

    /// Get the report linked to a bill.
    pub fn get_report_for_bill(&self, bill_id: String) -> Result<Option<FfiReport>, LabBillingError> {
        let db = self.db.lock()?;
        let report = db.get_report_by_bill(&bill_id)?;
        Ok(report.map(|r| r.into()))
    }

    /// Record a result on a line, or on a group member when `sub_test_id` is set.
    pub fn enter_result(
        &self,
        report_id: String,
        test_id: String,
        sub_test_id: Option<String>,
        value: String,
        remarks: Option<String>,
    ) -> Result<FfiReport, LabBillingError> {
        let db = self.db.lock()?;
        let report = ReportService::new(&db).enter_result(
            &report_id,
            &test_id,
            sub_test_id.as_deref(),
            &value,
            remarks.as_deref(),
        )?;
        Ok(report.into())
    }

    /// Set the report status (e.g. `IN_PROGRESS`, `VERIFIED`).
    pub fn set_report_status(&self, report_id: String, status: String) -> Result<(), LabBillingError> {
        let db = self.db.lock()?;
        let status = ReportStatus::parse(&status)
            .ok_or_else(|| LabBillingError::InvalidInput(format!("unknown report status: {}", status)))?;
        ReportService::new(&db).set_report_status(&report_id, status)?;
        Ok(())
    }

    pub fn set_impression(
        &self,
        report_id: String,
        impression: Option<String>,
    ) -> Result<(), LabBillingError> {
        let db = self.db.lock()?;
        ReportService::new(&db).set_impression(&report_id, impression.as_deref())?;
        Ok(())
    }

    // =========================================================================
    // Export Operations
    // =========================================================================

    /// Export bills created since `since` (RFC 3339) as JSON.
    pub fn export_ledger_json(&self, since: String) -> Result<String, LabBillingError> {
        let db = self.db.lock()?;
        let ledger = LedgerExporter::new(&db).export_since(&since)?;
        Ok(ledger.to_json()?)
    }

    /// Export bills created since `since` (RFC 3339) as CSV.
    pub fn export_ledger_csv(&self, since: String) -> Result<String, LabBillingError> {
        let db = self.db.lock()?;
        let ledger = LedgerExporter::new(&db).export_since(&since)?;
        Ok(ledger.to_csv())
    }

    /// Render a report sheet as JSON.
    pub fn render_report_json(&self, report_id: String) -> Result<String, LabBillingError> {
        let db = self.db.lock()?;
        let sheet = ReportSheetRenderer::new(&db).render(&report_id)?;
        Ok(sheet.to_json()?)
    }

    /// Render a report sheet as plain text.
    pub fn render_report_text(&self, report_id: String) -> Result<String, LabBillingError> {
        let db = self.db.lock()?;
        let sheet = ReportSheetRenderer::new(&db).render(&report_id)?;
        Ok(sheet.to_text())
    }
}

impl LabBillingCore {
    fn billing<'a>(&self, db: &'a Database) -> BillingService<'a> {
        BillingService::with_options(db, self.options)
    }
}

fn parse_discount_type(value: &str) -> Result<DiscountType, LabBillingError> {
    DiscountType::parse(value)
        .ok_or_else(|| LabBillingError::InvalidInput(format!("unknown discount type: {}", value)))
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe reference range.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiReferenceRange {
    pub name: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// FFI-safe test definition.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiTestDefinition {
    pub test_id: String,
    pub name: String,
    /// `normal`, `descriptive` or `group`
    pub kind: String,
    pub price: i64,
    pub unit: Option<String>,
    pub method: Option<String>,
    pub formula: Option<String>,
    pub reference_ranges: Vec<FfiReferenceRange>,
    pub interpretation: Option<String>,
    pub sub_test_ids: Vec<String>,
    pub active: bool,
}

impl From<TestDefinition> for FfiTestDefinition {
    fn from(def: TestDefinition) -> Self {
        Self {
            test_id: def.test_id,
            name: def.name,
            kind: def.kind.as_str().to_string(),
            price: def.price,
            unit: def.unit,
            method: def.method,
            formula: def.formula,
            reference_ranges: def
                .reference_ranges
                .into_iter()
                .map(|r| FfiReferenceRange {
                    name: r.name,
                    min: r.min,
                    max: r.max,
                })
                .collect(),
            interpretation: def.interpretation,
            sub_test_ids: def.sub_test_ids,
            active: def.active,
        }
    }
}

impl TryFrom<FfiTestDefinition> for TestDefinition {
    type Error = LabBillingError;

    fn try_from(def: FfiTestDefinition) -> Result<Self, Self::Error> {
        let kind = TestKind::parse(&def.kind)
            .ok_or_else(|| LabBillingError::InvalidInput(format!("unknown test kind: {}", def.kind)))?;

        let mut definition = TestDefinition::new(def.test_id, def.name, kind, def.price);
        definition.unit = def.unit;
        definition.method = def.method;
        definition.formula = def.formula;
        definition.reference_ranges = def
            .reference_ranges
            .into_iter()
            .map(|r| ReferenceRange {
                name: r.name,
                min: r.min,
                max: r.max,
            })
            .collect();
        definition.interpretation = def.interpretation;
        definition.sub_test_ids = def.sub_test_ids;
        definition.active = def.active;
        Ok(definition)
    }
}

/// FFI-safe search hit.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiScoredTest {
    pub test_id: String,
    pub name: String,
    pub kind: String,
    pub price: i64,
    pub score: f64,
}

impl From<resolver::ScoredTest> for FfiScoredTest {
    fn from(hit: resolver::ScoredTest) -> Self {
        Self {
            test_id: hit.test_id,
            name: hit.name,
            kind: hit.kind.as_str().to_string(),
            price: hit.price,
            score: hit.score,
        }
    }
}

/// FFI-safe requested test.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiLineItemInput {
    pub test_id: String,
    /// Overrides the catalog price when set
    pub price: Option<i64>,
}

impl From<FfiLineItemInput> for LineItemInput {
    fn from(item: FfiLineItemInput) -> Self {
        LineItemInput {
            test_id: item.test_id,
            price: item.price,
        }
    }
}

/// FFI-safe bill creation request.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCreateBillInput {
    pub patient_id: String,
    pub doctor_id: Option<String>,
    pub tests: Vec<FfiLineItemInput>,
    pub discount_value: f64,
    /// `AMOUNT` or `PERCENTAGE`
    pub discount_type: String,
    pub paid_amount: i64,
    pub payment_type: String,
}

impl TryFrom<FfiCreateBillInput> for CreateBillInput {
    type Error = LabBillingError;

    fn try_from(input: FfiCreateBillInput) -> Result<Self, Self::Error> {
        Ok(CreateBillInput {
            patient_id: input.patient_id,
            doctor_id: input.doctor_id,
            tests: input.tests.into_iter().map(|t| t.into()).collect(),
            discount_value: input.discount_value,
            discount_type: parse_discount_type(&input.discount_type)?,
            paid_amount: input.paid_amount,
            payment_type: input.payment_type,
        })
    }
}

/// FFI-safe bill line.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiBillLineItem {
    pub test_id: String,
    pub price: i64,
}

/// FFI-safe bill.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiBill {
    pub bill_id: String,
    pub patient_id: String,
    pub doctor_id: Option<String>,
    pub line_items: Vec<FfiBillLineItem>,
    pub total_amount: i64,
    pub discount_value: f64,
    pub discount_type: String,
    pub discount_amount: i64,
    pub paid_amount: i64,
    pub due_amount: i64,
    pub status: String,
    pub payment_type: String,
    pub due_payment_type: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Bill> for FfiBill {
    fn from(bill: Bill) -> Self {
        Self {
            bill_id: bill.bill_id,
            patient_id: bill.patient_id,
            doctor_id: bill.doctor_id,
            line_items: bill
                .line_items
                .into_iter()
                .map(|l| FfiBillLineItem {
                    test_id: l.test_id,
                    price: l.price,
                })
                .collect(),
            total_amount: bill.total_amount,
            discount_value: bill.discount_value,
            discount_type: bill.discount_type.as_str().to_string(),
            discount_amount: bill.discount_amount,
            paid_amount: bill.paid_amount,
            due_amount: bill.due_amount,
            status: bill.status.as_str().to_string(),
            payment_type: bill.payment_type,
            due_payment_type: bill.due_payment_type,
            created_at: bill.created_at,
            updated_at: bill.updated_at,
        }
    }
}

/// FFI-safe bill write result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiBillOutcome {
    pub bill: FfiBill,
    pub report_id: Option<String>,
    /// Set when the report could not be kept in step with the bill
    pub sync_warning: Option<String>,
}

impl From<BillOutcome> for FfiBillOutcome {
    fn from(outcome: BillOutcome) -> Self {
        Self {
            bill: outcome.bill.into(),
            report_id: outcome.report_id,
            sync_warning: outcome.warning.map(|w| w.message),
        }
    }
}

/// FFI-safe result line.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiResultLine {
    pub test_id: String,
    pub test_name: String,
    pub kind: String,
    pub completed: bool,
    pub result_value: String,
    pub unit: String,
    pub reference_range: String,
    pub remarks: Option<String>,
}

impl From<ResultLine> for FfiResultLine {
    fn from(line: ResultLine) -> Self {
        Self {
            test_id: line.test_id,
            test_name: line.test_name,
            kind: line.kind.as_str().to_string(),
            completed: line.status == ResultStatus::Completed,
            result_value: line.result_value,
            unit: line.unit,
            reference_range: line.reference_range,
            remarks: line.remarks,
        }
    }
}

/// FFI-safe top-level result entry. Single tests carry exactly one line.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiResultEntry {
    pub test_id: String,
    pub test_name: String,
    pub is_group: bool,
    pub completed: bool,
    pub remarks: Option<String>,
    pub lines: Vec<FfiResultLine>,
}

impl From<ResultEntry> for FfiResultEntry {
    fn from(entry: ResultEntry) -> Self {
        match entry {
            ResultEntry::Single(line) => Self {
                test_id: line.test_id.clone(),
                test_name: line.test_name.clone(),
                is_group: false,
                completed: line.status == ResultStatus::Completed,
                remarks: line.remarks.clone(),
                lines: vec![line.into()],
            },
            ResultEntry::Group(group) => Self {
                test_id: group.test_id,
                test_name: group.test_name,
                is_group: true,
                completed: group.status == ResultStatus::Completed,
                remarks: group.remarks,
                lines: group.group_results.into_iter().map(|l| l.into()).collect(),
            },
        }
    }
}

/// FFI-safe report.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiReport {
    pub report_id: String,
    pub bill_id: String,
    pub patient_id: String,
    pub doctor_id: Option<String>,
    pub status: String,
    pub status_label: String,
    pub impression: Option<String>,
    pub revision: u32,
    pub pending_line_count: u32,
    pub results: Vec<FfiResultEntry>,
}

impl From<Report> for FfiReport {
    fn from(report: Report) -> Self {
        let pending_line_count = report.pending_line_count() as u32;
        Self {
            report_id: report.report_id,
            bill_id: report.bill_id,
            patient_id: report.patient_id,
            doctor_id: report.doctor_id,
            status: report.status.as_str().to_string(),
            status_label: report.status.display_name().to_string(),
            impression: report.impression,
            revision: report.revision,
            pending_line_count,
            results: report.results.into_iter().map(|e| e.into()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core_with_catalog() -> Arc<LabBillingCore> {
        let core = open_database_in_memory().unwrap();
        for (id, kind, price) in [
            ("HB", "normal", 100),
            ("WBC", "normal", 120),
            ("GLU", "normal", 300),
        ] {
            core.upsert_test_definition(FfiTestDefinition {
                test_id: id.into(),
                name: format!("Test {}", id),
                kind: kind.into(),
                price,
                unit: None,
                method: None,
                formula: None,
                reference_ranges: vec![],
                interpretation: None,
                sub_test_ids: vec![],
                active: true,
            })
            .unwrap();
        }
        core.upsert_test_definition(FfiTestDefinition {
            test_id: "CBC".into(),
            name: "Complete Blood Count".into(),
            kind: "group".into(),
            price: 400,
            unit: None,
            method: None,
            formula: None,
            reference_ranges: vec![],
            interpretation: None,
            sub_test_ids: vec!["HB".into(), "WBC".into()],
            active: true,
        })
        .unwrap();
        core
    }

    fn create_input(tests: &[&str]) -> FfiCreateBillInput {
        FfiCreateBillInput {
            patient_id: "patient-1".into(),
            doctor_id: None,
            tests: tests
                .iter()
                .map(|id| FfiLineItemInput {
                    test_id: id.to_string(),
                    price: None,
                })
                .collect(),
            discount_value: 10.0,
            discount_type: "PERCENTAGE".into(),
            paid_amount: 0,
            payment_type: "CASH".into(),
        }
    }

    #[test]
    fn test_bill_and_report_roundtrip() {
        let core = core_with_catalog();
        let outcome = core.create_bill(create_input(&["GLU", "CBC"])).unwrap();

        assert_eq!(outcome.bill.total_amount, 700);
        assert_eq!(outcome.bill.discount_amount, 70);
        assert_eq!(outcome.bill.status, "PENDING");
        assert!(outcome.sync_warning.is_none());

        let report_id = outcome.report_id.unwrap();
        let report = core
            .enter_result(report_id.clone(), "CBC".into(), Some("HB".into()), "13.9".into(), None)
            .unwrap();
        assert_eq!(report.results.len(), 2);
        assert!(report.results[1].is_group);
        assert_eq!(report.results[1].lines.len(), 2);
        assert_eq!(report.pending_line_count, 2);
        assert_eq!(report.status_label, "Initial");

        core.set_report_status(report_id.clone(), "IN_PROGRESS".into())
            .unwrap();
        let report = core.get_report(report_id).unwrap().unwrap();
        assert_eq!(report.status_label, "In Process");
    }

    #[test]
    fn test_collect_due_and_export() {
        let core = core_with_catalog();
        let outcome = core.create_bill(create_input(&["GLU"])).unwrap();
        let bill_id = outcome.bill.bill_id.clone();

        let paid = core
            .collect_due(bill_id.clone(), 270, Some("UPI".into()), vec![])
            .unwrap();
        assert_eq!(paid.bill.status, "PAID");
        assert_eq!(paid.bill.due_payment_type.as_deref(), Some("UPI"));

        let csv = core.export_ledger_csv("2000-01-01T00:00:00+00:00".into()).unwrap();
        assert_eq!(csv.lines().count(), 2);
        assert!(csv.contains(&bill_id));
    }

    #[test]
    fn test_invalid_inputs() {
        let core = core_with_catalog();

        let mut input = create_input(&["GLU"]);
        input.discount_type = "BOGUS".into();
        assert!(matches!(core.create_bill(input), Err(LabBillingError::InvalidInput(_))));

        assert!(matches!(
            core.create_bill(create_input(&["NOPE"])),
            Err(LabBillingError::NotFound(_))
        ));
        assert!(matches!(
            core.set_report_status("r".into(), "DONE".into()),
            Err(LabBillingError::InvalidInput(_))
        ));
        assert!(matches!(
            core.update_payment("b".into(), 0, None, Some("AMOUNT".into())),
            Err(LabBillingError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_huge_amounts_rejected_without_poisoning() {
        let core = core_with_catalog();
        let bill_id = core.create_bill(create_input(&["GLU"])).unwrap().bill.bill_id;

        assert!(matches!(
            core.collect_due(bill_id.clone(), i64::MAX, None, vec![]),
            Err(LabBillingError::InvalidInput(_))
        ));

        let mut input = create_input(&["GLU"]);
        input.discount_type = "AMOUNT".into();
        input.discount_value = 1e19;
        assert!(matches!(core.create_bill(input), Err(LabBillingError::InvalidInput(_))));

        // The lock is still usable
        let paid = core.collect_due(bill_id, 100, None, vec![]).unwrap();
        assert_eq!(paid.bill.paid_amount, 100);
    }

    #[test]
    fn test_search_and_deactivate() {
        let core = core_with_catalog();
        let hits = core.search_tests("complete blood".into(), 5).unwrap();
        assert_eq!(hits[0].test_id, "CBC");

        assert!(core.deactivate_test_definition("GLU".into()).unwrap());
        assert_eq!(core.list_test_definitions(true).unwrap().len(), 3);
        assert!(matches!(
            core.create_bill(create_input(&["GLU"])),
            Err(LabBillingError::InvalidInput(_))
        ));
    }
}
