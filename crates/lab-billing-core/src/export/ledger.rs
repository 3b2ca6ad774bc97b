//! Bill ledger export for accounting.

use serde::{Deserialize, Serialize};

use crate::db::{Database, DbResult};
use crate::models::{Bill, BillStatus, Money};

const CSV_HEADER: &str = "bill_id,patient_id,doctor_id,tests,total_amount,discount_amount,paid_amount,due_amount,status,payment_type,due_payment_type,created_at\n";

/// One bill in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerRow {
    pub bill_id: String,
    pub patient_id: String,
    pub doctor_id: Option<String>,
    /// Test ids, in line order
    pub tests: Vec<String>,
    pub total_amount: Money,
    pub discount_amount: Money,
    pub paid_amount: Money,
    pub due_amount: Money,
    pub status: BillStatus,
    pub payment_type: String,
    pub due_payment_type: Option<String>,
    pub created_at: String,
}

impl From<&Bill> for LedgerRow {
    fn from(bill: &Bill) -> Self {
        Self {
            bill_id: bill.bill_id.clone(),
            patient_id: bill.patient_id.clone(),
            doctor_id: bill.doctor_id.clone(),
            tests: bill.test_ids().map(String::from).collect(),
            total_amount: bill.total_amount,
            discount_amount: bill.discount_amount,
            paid_amount: bill.paid_amount,
            due_amount: bill.due_amount,
            status: bill.status,
            payment_type: bill.payment_type.clone(),
            due_payment_type: bill.due_payment_type.clone(),
            created_at: bill.created_at.clone(),
        }
    }
}

/// Batch totals.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSummary {
    pub bill_count: usize,
    /// Sum of subtotals before discount
    pub total_billed: Money,
    pub total_discount: Money,
    pub total_collected: Money,
    pub total_due: Money,
}

/// Ledger export for a batch of bills.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillLedger {
    /// Export timestamp
    pub exported_at: String,
    pub rows: Vec<LedgerRow>,
    pub summary: LedgerSummary,
}

impl BillLedger {
    pub fn from_bills(bills: &[Bill]) -> Self {
        let rows: Vec<LedgerRow> = bills.iter().map(LedgerRow::from).collect();
        let summary = rows.iter().fold(LedgerSummary::default(), |acc, row| LedgerSummary {
            bill_count: acc.bill_count + 1,
            total_billed: acc.total_billed.saturating_add(row.total_amount),
            total_discount: acc.total_discount.saturating_add(row.discount_amount),
            total_collected: acc.total_collected.saturating_add(row.paid_amount),
            total_due: acc.total_due.saturating_add(row.due_amount),
        });

        Self {
            exported_at: chrono::Utc::now().to_rfc3339(),
            rows,
            summary,
        }
    }

    /// Export to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Export to CSV format, one row per bill.
    pub fn to_csv(&self) -> String {
        let mut csv = String::from(CSV_HEADER);

        for row in &self.rows {
            csv.push_str(&format!(
                "{},{},{},{},{},{},{},{},{},{},{},{}\n",
                escape_csv(&row.bill_id),
                escape_csv(&row.patient_id),
                escape_csv(row.doctor_id.as_deref().unwrap_or("")),
                escape_csv(&row.tests.join(";")),
                row.total_amount,
                row.discount_amount,
                row.paid_amount,
                row.due_amount,
                row.status.as_str(),
                escape_csv(&row.payment_type),
                escape_csv(row.due_payment_type.as_deref().unwrap_or("")),
                escape_csv(&row.created_at),
            ));
        }

        csv
    }
}

/// Ledger exporter.
pub struct LedgerExporter<'a> {
    db: &'a Database,
}

impl<'a> LedgerExporter<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Bills created at or after `since` (RFC 3339).
    pub fn export_since(&self, since: &str) -> DbResult<BillLedger> {
        Ok(BillLedger::from_bills(&self.db.list_bills_since(since)?))
    }

    pub fn export_for_patient(&self, patient_id: &str) -> DbResult<BillLedger> {
        Ok(BillLedger::from_bills(
            &self.db.list_bills_for_patient(patient_id)?,
        ))
    }

    /// Outstanding or settled bills, e.g. every `PENDING` bill for follow-up.
    pub fn export_by_status(&self, status: BillStatus) -> DbResult<BillLedger> {
        Ok(BillLedger::from_bills(&self.db.list_bills_by_status(status)?))
    }
}

/// Escape a string for CSV output.
pub(crate) fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
