//! Bill database operations.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{Bill, BillLineItem, BillStatus, DiscountType};

impl Database {
    /// Insert a new bill.
    pub fn insert_bill(&self, bill: &Bill) -> DbResult<()> {
        let line_items_json = serde_json::to_string(&bill.line_items)?;

        self.conn.execute(
            r#"
            INSERT INTO bills (
                bill_id, patient_id, doctor_id, line_items, total_amount,
                discount_value, discount_type, discount_amount, paid_amount,
                due_amount, status, payment_type, due_payment_type,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                bill.bill_id,
                bill.patient_id,
                bill.doctor_id,
                line_items_json,
                bill.total_amount,
                bill.discount_value,
                bill.discount_type.as_str(),
                bill.discount_amount,
                bill.paid_amount,
                bill.due_amount,
                bill.status.as_str(),
                bill.payment_type,
                bill.due_payment_type,
                bill.created_at,
                bill.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Overwrite an existing bill document.
    pub fn update_bill(&self, bill: &Bill) -> DbResult<()> {
        write_bill(&self.conn, bill)
    }

    /// Get a bill by ID.
    pub fn get_bill(&self, bill_id: &str) -> DbResult<Option<Bill>> {
        query_bill(&self.conn, bill_id)
    }

    /// Read-modify-write a bill inside one immediate transaction.
    ///
    /// The write lock is held from the read until commit, so concurrent
    /// writers to the same database serialize and no update is lost.
    pub fn modify_bill<F, E>(&self, bill_id: &str, mutate: F) -> Result<Bill, E>
    where
        F: FnOnce(&mut Bill) -> Result<(), E>,
        E: From<DbError>,
    {
        let tx = self.write_transaction()?;
        let mut bill = query_bill(&tx, bill_id)?
            .ok_or_else(|| DbError::NotFound(format!("bill {}", bill_id)))?;

        mutate(&mut bill)?;
        bill.touch();

        write_bill(&tx, &bill)?;
        tx.commit().map_err(DbError::from)?;
        Ok(bill)
    }

    /// List all bills for a patient, newest first.
    pub fn list_bills_for_patient(&self, patient_id: &str) -> DbResult<Vec<Bill>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT bill_id, patient_id, doctor_id, line_items, total_amount,
                   discount_value, discount_type, discount_amount, paid_amount,
                   due_amount, status, payment_type, due_payment_type,
                   created_at, updated_at
            FROM bills
            WHERE patient_id = ?
            ORDER BY created_at DESC
            "#,
        )?;

        let rows = stmt.query_map([patient_id], map_bill_row)?;

        let mut bills = Vec::new();
        for row in rows {
            bills.push(row?.try_into()?);
        }
        Ok(bills)
    }

    /// List bills by payment status, oldest first.
    pub fn list_bills_by_status(&self, status: BillStatus) -> DbResult<Vec<Bill>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT bill_id, patient_id, doctor_id, line_items, total_amount,
                   discount_value, discount_type, discount_amount, paid_amount,
                   due_amount, status, payment_type, due_payment_type,
                   created_at, updated_at
            FROM bills
            WHERE status = ?
            ORDER BY created_at
            "#,
        )?;

        let rows = stmt.query_map([status.as_str()], map_bill_row)?;

        let mut bills = Vec::new();
        for row in rows {
            bills.push(row?.try_into()?);
        }
        Ok(bills)
    }

    /// List bills created at or after `since` (RFC 3339, any offset), oldest first.
    pub fn list_bills_since(&self, since: &str) -> DbResult<Vec<Bill>> {
        // Stored timestamps are UTC `to_rfc3339` text, which sorts chronologically
        let cutoff = chrono::DateTime::parse_from_rfc3339(since.trim())
            .map_err(|e| DbError::Constraint(format!("invalid timestamp {:?}: {}", since, e)))?
            .with_timezone(&chrono::Utc)
            .to_rfc3339();

        let mut stmt = self.conn.prepare(
            r#"
            SELECT bill_id, patient_id, doctor_id, line_items, total_amount,
                   discount_value, discount_type, discount_amount, paid_amount,
                   due_amount, status, payment_type, due_payment_type,
                   created_at, updated_at
            FROM bills
            WHERE created_at >= ?
            ORDER BY created_at
            "#,
        )?;

        let rows = stmt.query_map([&cutoff], map_bill_row)?;

        let mut bills = Vec::new();
        for row in rows {
            bills.push(row?.try_into()?);
        }
        Ok(bills)
    }
}

fn query_bill(conn: &Connection, bill_id: &str) -> DbResult<Option<Bill>> {
    conn.query_row(
        r#"
        SELECT bill_id, patient_id, doctor_id, line_items, total_amount,
               discount_value, discount_type, discount_amount, paid_amount,
               due_amount, status, payment_type, due_payment_type,
               created_at, updated_at
        FROM bills
        WHERE bill_id = ?
        "#,
        [bill_id],
        map_bill_row,
    )
    .optional()?
    .map(|row| row.try_into())
    .transpose()
}

fn write_bill(conn: &Connection, bill: &Bill) -> DbResult<()> {
    let line_items_json = serde_json::to_string(&bill.line_items)?;

    let rows_affected = conn.execute(
        r#"
        UPDATE bills SET
            patient_id = ?2,
            doctor_id = ?3,
            line_items = ?4,
            total_amount = ?5,
            discount_value = ?6,
            discount_type = ?7,
            discount_amount = ?8,
            paid_amount = ?9,
            due_amount = ?10,
            status = ?11,
            payment_type = ?12,
            due_payment_type = ?13,
            updated_at = ?14
        WHERE bill_id = ?1
        "#,
        params![
            bill.bill_id,
            bill.patient_id,
            bill.doctor_id,
            line_items_json,
            bill.total_amount,
            bill.discount_value,
            bill.discount_type.as_str(),
            bill.discount_amount,
            bill.paid_amount,
            bill.due_amount,
            bill.status.as_str(),
            bill.payment_type,
            bill.due_payment_type,
            bill.updated_at,
        ],
    )?;

    if rows_affected == 0 {
        return Err(DbError::NotFound(format!("bill {}", bill.bill_id)));
    }
    Ok(())
}

/// Intermediate row struct for database mapping.
struct BillRow {
    bill_id: String,
    patient_id: String,
    doctor_id: Option<String>,
    line_items: String,
    total_amount: i64,
    discount_value: f64,
    discount_type: String,
    discount_amount: i64,
    paid_amount: i64,
    due_amount: i64,
    status: String,
    payment_type: String,
    due_payment_type: Option<String>,
    created_at: String,
    updated_at: String,
}

fn map_bill_row(row: &Row<'_>) -> rusqlite::Result<BillRow> {
    Ok(BillRow {
        bill_id: row.get(0)?,
        patient_id: row.get(1)?,
        doctor_id: row.get(2)?,
        line_items: row.get(3)?,
        total_amount: row.get(4)?,
        discount_value: row.get(5)?,
        discount_type: row.get(6)?,
        discount_amount: row.get(7)?,
        paid_amount: row.get(8)?,
        due_amount: row.get(9)?,
        status: row.get(10)?,
        payment_type: row.get(11)?,
        due_payment_type: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

impl TryFrom<BillRow> for Bill {
    type Error = DbError;

    fn try_from(row: BillRow) -> Result<Self, Self::Error> {
        let line_items: Vec<BillLineItem> = serde_json::from_str(&row.line_items)?;
        let discount_type = DiscountType::parse(&row.discount_type).ok_or_else(|| {
            DbError::Constraint(format!("Unknown discount type: {}", row.discount_type))
        })?;
        let status = BillStatus::parse(&row.status)
            .ok_or_else(|| DbError::Constraint(format!("Unknown bill status: {}", row.status)))?;

        Ok(Bill {
            bill_id: row.bill_id,
            patient_id: row.patient_id,
            doctor_id: row.doctor_id,
            line_items,
            total_amount: row.total_amount,
            discount_value: row.discount_value,
            discount_type,
            discount_amount: row.discount_amount,
            paid_amount: row.paid_amount,
            due_amount: row.due_amount,
            status,
            payment_type: row.payment_type,
            due_payment_type: row.due_payment_type,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn make_bill(bill_id: &str, patient_id: &str, status: BillStatus) -> Bill {
        let now = chrono::Utc::now().to_rfc3339();
        Bill {
            bill_id: bill_id.into(),
            patient_id: patient_id.into(),
            doctor_id: Some("doctor-1".into()),
            line_items: vec![
                BillLineItem {
                    test_id: "GLU".into(),
                    price: 300,
                },
                BillLineItem {
                    test_id: "CBC".into(),
                    price: 700,
                },
            ],
            total_amount: 1000,
            discount_value: 10.0,
            discount_type: DiscountType::Percentage,
            discount_amount: 100,
            paid_amount: 400,
            due_amount: 500,
            status,
            payment_type: "CASH".into(),
            due_payment_type: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    #[test]
    fn test_insert_and_get_bill() {
        let db = setup_db();
        let bill = make_bill("bill-1", "patient-1", BillStatus::Partial);
        db.insert_bill(&bill).unwrap();

        let retrieved = db.get_bill("bill-1").unwrap().unwrap();
        assert_eq!(retrieved, bill);
    }

    #[test]
    fn test_update_missing_bill_is_not_found() {
        let db = setup_db();
        let bill = make_bill("bill-1", "patient-1", BillStatus::Partial);
        assert!(matches!(db.update_bill(&bill), Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_modify_bill_persists_mutation() {
        let db = setup_db();
        db.insert_bill(&make_bill("bill-1", "patient-1", BillStatus::Partial))
            .unwrap();

        let updated = db
            .modify_bill::<_, DbError>("bill-1", |bill| {
                bill.paid_amount += 500;
                bill.due_amount = 0;
                bill.status = BillStatus::Paid;
                Ok(())
            })
            .unwrap();
        assert_eq!(updated.paid_amount, 900);

        let stored = db.get_bill("bill-1").unwrap().unwrap();
        assert_eq!(stored.paid_amount, 900);
        assert_eq!(stored.status, BillStatus::Paid);
    }

    #[test]
    fn test_modify_bill_rolls_back_on_error() {
        let db = setup_db();
        db.insert_bill(&make_bill("bill-1", "patient-1", BillStatus::Partial))
            .unwrap();

        let result = db.modify_bill("bill-1", |bill| {
            bill.paid_amount = 0;
            Err(DbError::Constraint("rejected".into()))
        });
        assert!(result.is_err());

        let stored = db.get_bill("bill-1").unwrap().unwrap();
        assert_eq!(stored.paid_amount, 400);
        // Connection is usable again after the rollback
        assert!(db.conn().is_autocommit());
    }

    #[test]
    fn test_modify_missing_bill() {
        let db = setup_db();
        let result = db.modify_bill::<_, DbError>("nope", |_| Ok(()));
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_list_by_patient_and_status() {
        let db = setup_db();
        db.insert_bill(&make_bill("bill-1", "patient-1", BillStatus::Partial))
            .unwrap();
        db.insert_bill(&make_bill("bill-2", "patient-1", BillStatus::Paid))
            .unwrap();
        db.insert_bill(&make_bill("bill-3", "patient-2", BillStatus::Partial))
            .unwrap();

        assert_eq!(db.list_bills_for_patient("patient-1").unwrap().len(), 2);

        let partial = db.list_bills_by_status(BillStatus::Partial).unwrap();
        let ids: Vec<_> = partial.iter().map(|b| b.bill_id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"bill-1"));
        assert!(ids.contains(&"bill-3"));

        assert!(db.list_bills_by_status(BillStatus::Pending).unwrap().is_empty());
    }

    #[test]
    fn test_list_bills_since() {
        let db = setup_db();
        let mut old = make_bill("bill-old", "patient-1", BillStatus::Paid);
        old.created_at = "2024-01-01T00:00:00+00:00".into();
        db.insert_bill(&old).unwrap();
        db.insert_bill(&make_bill("bill-new", "patient-1", BillStatus::Paid))
            .unwrap();

        let recent = db.list_bills_since("2025-01-01T00:00:00+00:00").unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].bill_id, "bill-new");
    }

    #[test]
    fn test_list_bills_since_normalizes_offsets() {
        let db = setup_db();
        let mut morning = make_bill("bill-morning", "patient-1", BillStatus::Paid);
        morning.created_at = "2024-06-01T08:00:00+00:00".into();
        db.insert_bill(&morning).unwrap();
        let mut noon = make_bill("bill-noon", "patient-1", BillStatus::Paid);
        noon.created_at = "2024-06-01T12:00:00.250+00:00".into();
        db.insert_bill(&noon).unwrap();

        let ids = |since: &str| -> Vec<String> {
            db.list_bills_since(since)
                .unwrap()
                .into_iter()
                .map(|b| b.bill_id)
                .collect()
        };

        // 10:00 UTC written three ways
        assert_eq!(ids("2024-06-01T10:00:00Z"), vec!["bill-noon"]);
        assert_eq!(ids("2024-06-01T15:30:00+05:30"), vec!["bill-noon"]);
        assert_eq!(ids("2024-06-01T06:00:00-04:00"), vec!["bill-noon"]);
        // Same second as a stored fractional timestamp
        assert_eq!(ids("2024-06-01T12:00:00Z"), vec!["bill-noon"]);
        assert_eq!(ids("2024-06-01T07:59:59.999Z"), vec!["bill-morning", "bill-noon"]);

        assert!(matches!(
            db.list_bills_since("yesterday"),
            Err(DbError::Constraint(_))
        ));
    }
}
