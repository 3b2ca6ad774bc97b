//! Bill create / update workflows.

use crate::db::Database;
use crate::finance::{
    apply_collect_due, check_overpayment, validate_collect_due_amount, validate_discount,
    validate_line_price, validate_paid_amount,
};
use crate::models::{Bill, BillStatus, DiscountType, Money};
use crate::report::{ReportSync, SyncError, SyncWarning};
use crate::resolver::{LineItemInput, ResolvedTest, TestResolver};

use super::{BillOutcome, BillingError, BillingOptions, BillingResult, CreateBillInput};

/// Bill workflows over one database connection.
pub struct BillingService<'a> {
    db: &'a Database,
    resolver: TestResolver<'a>,
    sync: ReportSync<'a>,
    options: BillingOptions,
}

impl<'a> BillingService<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self::with_options(db, BillingOptions::default())
    }

    pub fn with_options(db: &'a Database, options: BillingOptions) -> Self {
        Self {
            db,
            resolver: TestResolver::new(db),
            sync: ReportSync::new(db),
            options,
        }
    }

    /// Get a bill, failing with `NotFound` when absent.
    pub fn get_bill(&self, bill_id: &str) -> BillingResult<Bill> {
        self.db
            .get_bill(bill_id)?
            .ok_or_else(|| BillingError::NotFound(format!("bill {}", bill_id)))
    }

    /// Open a bill and create its report.
    pub fn create_bill(&self, input: &CreateBillInput) -> BillingResult<BillOutcome> {
        if input.patient_id.trim().is_empty() {
            return Err(BillingError::Validation("patient id is required".into()));
        }
        if input.tests.is_empty() {
            return Err(BillingError::Validation(
                "a bill needs at least one test".into(),
            ));
        }
        validate_discount(input.discount_value, input.discount_type)?;
        validate_paid_amount(input.paid_amount)?;

        let resolved = self.resolve_new(&input.tests)?;

        let now = chrono::Utc::now().to_rfc3339();
        let mut bill = Bill {
            bill_id: uuid::Uuid::new_v4().to_string(),
            patient_id: input.patient_id.clone(),
            doctor_id: input.doctor_id.clone(),
            line_items: resolved.iter().map(|r| r.line_item.clone()).collect(),
            total_amount: 0,
            discount_value: input.discount_value,
            discount_type: input.discount_type,
            discount_amount: 0,
            paid_amount: input.paid_amount,
            due_amount: 0,
            status: BillStatus::Pending,
            payment_type: input.payment_type.clone(),
            due_payment_type: None,
            created_at: now.clone(),
            updated_at: now,
        };
        bill.recalculate()?;
        guard_overpayment(self.options, &bill)?;

        self.db.insert_bill(&bill)?;
        tracing::info!(
            bill_id = %bill.bill_id,
            patient_id = %bill.patient_id,
            lines = bill.line_items.len(),
            total = bill.total_amount,
            due = bill.due_amount,
            status = bill.status.as_str(),
            "bill created"
        );

        let outcome = match self.sync.create_report(&bill, &resolved) {
            Ok(report) => BillOutcome {
                bill,
                report_id: Some(report.report_id),
                warning: None,
            },
            Err(e) => {
                let warning = self.warn(&bill, &e);
                BillOutcome {
                    bill,
                    report_id: None,
                    warning: Some(warning),
                }
            }
        };
        Ok(outcome)
    }

    /// Append tests to an existing bill and sync its report.
    ///
    /// A percentage discount is re-applied to the new subtotal; an amount
    /// discount is kept. `paid_amount`, when given, replaces the stored one.
    pub fn add_tests(
        &self,
        bill_id: &str,
        tests: &[LineItemInput],
        paid_amount: Option<Money>,
    ) -> BillingResult<BillOutcome> {
        if tests.is_empty() {
            return Err(BillingError::Validation("no tests to add".into()));
        }
        if let Some(paid) = paid_amount {
            validate_paid_amount(paid)?;
        }

        let resolved = self.resolve_new(tests)?;
        let options = self.options;
        let bill = self.db.modify_bill(bill_id, |bill| {
            bill.line_items
                .extend(resolved.iter().map(|r| r.line_item.clone()));
            if let Some(paid) = paid_amount {
                bill.paid_amount = paid;
            }
            bill.recalculate()?;
            guard_overpayment(options, bill)
        })?;

        tracing::info!(
            bill_id = %bill.bill_id,
            added = resolved.len(),
            total = bill.total_amount,
            due = bill.due_amount,
            "tests added to bill"
        );
        Ok(self.sync_after_write(bill))
    }

    /// Collect part or all of the due amount, optionally adding tests.
    ///
    /// The increment is applied to the persisted paid amount inside the same
    /// write transaction that reads it, so concurrent collections all count.
    pub fn collect_due(
        &self,
        bill_id: &str,
        collect_due_amount: Money,
        due_payment_type: Option<String>,
        tests: &[LineItemInput],
    ) -> BillingResult<BillOutcome> {
        validate_collect_due_amount(collect_due_amount)?;

        let resolved = if tests.is_empty() {
            Vec::new()
        } else {
            self.resolve_new(tests)?
        };
        let options = self.options;
        let bill = self.db.modify_bill(bill_id, |bill| {
            bill.paid_amount = apply_collect_due(bill.paid_amount, collect_due_amount)?;
            if due_payment_type.is_some() {
                bill.due_payment_type = due_payment_type;
            }
            if resolved.is_empty() {
                bill.resettle()?;
            } else {
                bill.line_items
                    .extend(resolved.iter().map(|r| r.line_item.clone()));
                bill.recalculate()?;
            }
            guard_overpayment(options, bill)
        })?;

        tracing::info!(
            bill_id = %bill.bill_id,
            collected = collect_due_amount,
            paid = bill.paid_amount,
            due = bill.due_amount,
            status = bill.status.as_str(),
            "due collected"
        );
        Ok(self.sync_after_write(bill))
    }

    /// Replace the paid amount and, optionally, the discount.
    pub fn update_payment(
        &self,
        bill_id: &str,
        paid_amount: Money,
        discount: Option<(f64, DiscountType)>,
    ) -> BillingResult<BillOutcome> {
        validate_paid_amount(paid_amount)?;
        if let Some((value, discount_type)) = discount {
            validate_discount(value, discount_type)?;
        }

        let options = self.options;
        let bill = self.db.modify_bill(bill_id, |bill| {
            bill.paid_amount = paid_amount;
            if let Some((value, discount_type)) = discount {
                bill.discount_value = value;
                bill.discount_type = discount_type;
            }
            bill.recalculate()?;
            guard_overpayment(options, bill)
        })?;

        tracing::info!(
            bill_id = %bill.bill_id,
            paid = bill.paid_amount,
            discount = bill.discount_amount,
            due = bill.due_amount,
            "payment updated"
        );
        Ok(self.sync_after_write(bill))
    }

    /// Bring the report back in line with the bill.
    ///
    /// Appends any missing entries, or creates the report when none exists.
    pub fn resync_report(&self, bill_id: &str) -> BillingResult<BillOutcome> {
        let bill = self.get_bill(bill_id)?;

        let synced = match self.sync.sync_bill(&bill) {
            Ok(outcome) => Ok(outcome.report_id),
            Err(SyncError::MissingReport(_)) => {
                tracing::warn!(bill_id = %bill.bill_id, "report missing, recreating");
                self.sync
                    .create_report_from_bill(&bill)
                    .map(|report| report.report_id)
            }
            Err(e) => Err(e),
        };

        Ok(match synced {
            Ok(report_id) => BillOutcome {
                bill,
                report_id: Some(report_id),
                warning: None,
            },
            Err(e) => self.outcome_with_warning(bill, &e),
        })
    }

    /// Resolve tests being newly put on a bill.
    ///
    /// Deactivated tests may stay on existing bills but cannot be added.
    fn resolve_new(&self, tests: &[LineItemInput]) -> BillingResult<Vec<ResolvedTest>> {
        for input in tests {
            if let Some(price) = input.price {
                validate_line_price(&input.test_id, price)?;
            }
        }

        let resolved = self.resolver.resolve_all(tests)?;
        if let Some(inactive) = resolved.iter().find(|r| !r.definition.active) {
            return Err(BillingError::Validation(format!(
                "test {} is no longer offered",
                inactive.definition.test_id
            )));
        }
        Ok(resolved)
    }

    fn sync_after_write(&self, bill: Bill) -> BillOutcome {
        match self.sync.sync_bill(&bill) {
            Ok(outcome) => BillOutcome {
                bill,
                report_id: Some(outcome.report_id),
                warning: None,
            },
            Err(e) => self.outcome_with_warning(bill, &e),
        }
    }

    fn outcome_with_warning(&self, bill: Bill, error: &SyncError) -> BillOutcome {
        let warning = self.warn(&bill, error);
        BillOutcome {
            report_id: warning.report_id.clone(),
            bill,
            warning: Some(warning),
        }
    }

    fn warn(&self, bill: &Bill, error: &SyncError) -> SyncWarning {
        // Best effort: the lookup itself may be what failed
        let report_id = match error {
            SyncError::MissingReport(_) => None,
            _ => self
                .db
                .get_report_by_bill(&bill.bill_id)
                .ok()
                .flatten()
                .map(|report| report.report_id),
        };
        let warning = SyncWarning::new(&bill.bill_id, report_id, error);
        tracing::warn!(
            bill_id = %warning.bill_id,
            report_id = ?warning.report_id,
            error = %warning.message,
            "report out of sync with bill"
        );
        warning
    }
}

fn guard_overpayment(options: BillingOptions, bill: &Bill) -> BillingResult<()> {
    if options.reject_overpayment {
        check_overpayment(bill.paid_amount, bill.net_amount().max(0))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResultEntry, TestDefinition, TestKind};

    fn setup_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        for (id, price) in [("GLU", 300), ("TSH", 500), ("HB", 100), ("WBC", 120)] {
            db.upsert_test_definition(&TestDefinition::new(
                id.into(),
                format!("Test {}", id),
                TestKind::Normal,
                price,
            ))
            .unwrap();
        }
        let mut cbc = TestDefinition::new("CBC".into(), "Complete Blood Count".into(), TestKind::Group, 400);
        cbc.sub_test_ids = vec!["HB".into(), "WBC".into()];
        db.upsert_test_definition(&cbc).unwrap();
        db
    }

    fn open_bill(service: &BillingService<'_>, tests: &[&str]) -> BillOutcome {
        let input = CreateBillInput::new(
            "patient-1",
            tests.iter().map(|id| LineItemInput::new(*id)).collect(),
        );
        service.create_bill(&input).unwrap()
    }

    #[test]
    fn test_create_bill_prices_and_report() {
        let db = setup_db();
        let service = BillingService::new(&db);

        let mut input = CreateBillInput::new(
            "patient-1",
            vec![LineItemInput::new("GLU"), LineItemInput::with_price("TSH", 450)],
        );
        input.discount_value = 10.0;
        input.discount_type = DiscountType::Percentage;
        input.paid_amount = 200;

        let outcome = service.create_bill(&input).unwrap();
        assert!(outcome.is_clean());
        assert_eq!(outcome.bill.total_amount, 750);
        assert_eq!(outcome.bill.discount_amount, 75);
        assert_eq!(outcome.bill.due_amount, 475);
        assert_eq!(outcome.bill.status, BillStatus::Partial);

        let report = db
            .get_report(outcome.report_id.as_deref().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(report.bill_id, outcome.bill.bill_id);
        assert_eq!(report.results.len(), 2);
    }

    #[test]
    fn test_create_bill_validation() {
        let db = setup_db();
        let service = BillingService::new(&db);

        let empty = CreateBillInput::new("patient-1", vec![]);
        assert!(matches!(service.create_bill(&empty), Err(BillingError::Validation(_))));

        let mut bad_discount = CreateBillInput::new("patient-1", vec![LineItemInput::new("GLU")]);
        bad_discount.discount_value = 120.0;
        bad_discount.discount_type = DiscountType::Percentage;
        assert!(matches!(service.create_bill(&bad_discount), Err(BillingError::Validation(_))));

        let negative_price = CreateBillInput::new("patient-1", vec![LineItemInput::with_price("GLU", -1)]);
        assert!(matches!(service.create_bill(&negative_price), Err(BillingError::Validation(_))));

        let no_patient = CreateBillInput::new("  ", vec![LineItemInput::new("GLU")]);
        assert!(matches!(service.create_bill(&no_patient), Err(BillingError::Validation(_))));

        // Nothing was written
        assert!(db.list_bills_for_patient("patient-1").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_test_aborts_without_writes() {
        let db = setup_db();
        let service = BillingService::new(&db);

        let input = CreateBillInput::new(
            "patient-1",
            vec![LineItemInput::new("GLU"), LineItemInput::new("NOPE")],
        );
        assert!(matches!(service.create_bill(&input), Err(BillingError::NotFound(_))));
        assert!(db.list_bills_for_patient("patient-1").unwrap().is_empty());
    }

    #[test]
    fn test_inactive_test_cannot_be_added() {
        let db = setup_db();
        let service = BillingService::new(&db);
        let outcome = open_bill(&service, &["GLU"]);

        db.deactivate_test_definition("TSH").unwrap();
        let result = service.add_tests(&outcome.bill.bill_id, &[LineItemInput::new("TSH")], None);
        assert!(matches!(result, Err(BillingError::Validation(msg)) if msg.contains("TSH")));

        // Existing lines on deactivated tests still resync
        db.deactivate_test_definition("GLU").unwrap();
        assert!(service.resync_report(&outcome.bill.bill_id).unwrap().is_clean());
    }

    #[test]
    fn test_report_failure_is_a_warning() {
        let db = setup_db();
        db.conn().execute_batch("DROP TABLE reports").unwrap();
        let service = BillingService::new(&db);

        let outcome = open_bill(&service, &["GLU"]);
        let warning = outcome.warning.expect("warning expected");
        assert_eq!(warning.bill_id, outcome.bill.bill_id);
        assert!(outcome.report_id.is_none());
        assert!(db.get_bill(&outcome.bill.bill_id).unwrap().is_some());
    }

    #[test]
    fn test_add_tests_reapplies_percentage() {
        let db = setup_db();
        let service = BillingService::new(&db);

        let mut input = CreateBillInput::new("patient-1", vec![LineItemInput::new("GLU")]);
        input.discount_value = 10.0;
        input.discount_type = DiscountType::Percentage;
        let created = service.create_bill(&input).unwrap();
        assert_eq!(created.bill.discount_amount, 30);

        let outcome = service
            .add_tests(&created.bill.bill_id, &[LineItemInput::new("TSH")], Some(100))
            .unwrap();
        assert_eq!(outcome.bill.total_amount, 800);
        assert_eq!(outcome.bill.discount_amount, 80);
        assert_eq!(outcome.bill.paid_amount, 100);
        assert_eq!(outcome.bill.due_amount, 620);
        assert_eq!(outcome.report_id, created.report_id);

        let report = db.get_report_by_bill(&created.bill.bill_id).unwrap().unwrap();
        let ids: Vec<_> = report.results.iter().map(ResultEntry::test_id).collect();
        assert_eq!(ids, vec!["GLU", "TSH"]);
    }

    #[test]
    fn test_add_tests_keeps_amount_discount() {
        let db = setup_db();
        let service = BillingService::new(&db);

        let mut input = CreateBillInput::new("patient-1", vec![LineItemInput::new("GLU")]);
        input.discount_value = 50.0;
        let created = service.create_bill(&input).unwrap();

        let outcome = service
            .add_tests(&created.bill.bill_id, &[LineItemInput::new("TSH")], None)
            .unwrap();
        assert_eq!(outcome.bill.discount_amount, 50);
        assert_eq!(outcome.bill.due_amount, 750);
    }

    #[test]
    fn test_collect_due_increments() {
        let db = setup_db();
        let service = BillingService::new(&db);
        let created = open_bill(&service, &["GLU", "TSH"]);
        let bill_id = created.bill.bill_id.clone();

        let first = service.collect_due(&bill_id, 500, Some("CARD".into()), &[]).unwrap();
        assert_eq!(first.bill.paid_amount, 500);
        assert_eq!(first.bill.due_amount, 300);
        assert_eq!(first.bill.status, BillStatus::Partial);
        assert_eq!(first.bill.due_payment_type.as_deref(), Some("CARD"));

        let second = service.collect_due(&bill_id, 300, None, &[]).unwrap();
        assert_eq!(second.bill.paid_amount, 800);
        assert_eq!(second.bill.due_amount, 0);
        assert_eq!(second.bill.status, BillStatus::Paid);
        assert_eq!(second.bill.due_payment_type.as_deref(), Some("CARD"));

        assert!(matches!(
            service.collect_due(&bill_id, 0, None, &[]),
            Err(BillingError::Validation(_))
        ));
        assert!(matches!(
            service.collect_due("missing", 10, None, &[]),
            Err(BillingError::NotFound(_))
        ));
    }

    #[test]
    fn test_collect_due_with_tests_syncs() {
        let db = setup_db();
        let service = BillingService::new(&db);
        let created = open_bill(&service, &["GLU"]);

        let outcome = service
            .collect_due(&created.bill.bill_id, 100, None, &[LineItemInput::new("CBC")])
            .unwrap();
        assert_eq!(outcome.bill.total_amount, 700);
        assert_eq!(outcome.bill.due_amount, 600);

        let report = db.get_report_by_bill(&created.bill.bill_id).unwrap().unwrap();
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[1].kind(), TestKind::Group);
    }

    #[test]
    fn test_overpayment_guard() {
        let db = setup_db();
        let lenient = BillingService::new(&db);
        let created = open_bill(&lenient, &["GLU"]);

        let absorbed = lenient.collect_due(&created.bill.bill_id, 1000, None, &[]).unwrap();
        assert_eq!(absorbed.bill.due_amount, 0);
        assert_eq!(absorbed.bill.paid_amount, 1000);

        let strict = BillingService::with_options(
            &db,
            BillingOptions {
                reject_overpayment: true,
            },
        );
        let second = open_bill(&strict, &["GLU"]);
        let result = strict.collect_due(&second.bill.bill_id, 301, None, &[]);
        assert!(matches!(result, Err(BillingError::Validation(_))));
        assert_eq!(db.get_bill(&second.bill.bill_id).unwrap().unwrap().paid_amount, 0);
    }

    #[test]
    fn test_huge_collect_due_rejected() {
        let db = setup_db();
        let service = BillingService::new(&db);
        let created = open_bill(&service, &["GLU"]);
        let bill_id = created.bill.bill_id.clone();
        service.collect_due(&bill_id, 100, None, &[]).unwrap();

        assert!(matches!(
            service.collect_due(&bill_id, Money::MAX, None, &[]),
            Err(BillingError::Validation(_))
        ));
        assert_eq!(db.get_bill(&bill_id).unwrap().unwrap().paid_amount, 100);
    }

    #[test]
    fn test_collect_due_overflowing_stored_amount_rejected() {
        let db = setup_db();
        let service = BillingService::new(&db);
        let created = open_bill(&service, &["GLU"]);
        let bill_id = created.bill.bill_id.clone();

        let mut bill = db.get_bill(&bill_id).unwrap().unwrap();
        bill.paid_amount = Money::MAX - 10;
        db.update_bill(&bill).unwrap();

        assert!(matches!(
            service.collect_due(&bill_id, 100, None, &[]),
            Err(BillingError::Validation(_))
        ));
        assert_eq!(db.get_bill(&bill_id).unwrap().unwrap().paid_amount, Money::MAX - 10);
    }

    #[test]
    fn test_huge_discount_and_prices_rejected() {
        let db = setup_db();
        let service = BillingService::new(&db);

        let mut huge_discount = CreateBillInput::new("patient-1", vec![LineItemInput::new("GLU")]);
        huge_discount.discount_value = 1e19;
        huge_discount.paid_amount = 1000;
        assert!(matches!(
            service.create_bill(&huge_discount),
            Err(BillingError::Validation(_))
        ));

        let huge_prices = CreateBillInput::new(
            "patient-1",
            vec![
                LineItemInput::with_price("GLU", Money::MAX),
                LineItemInput::with_price("GLU", 1),
            ],
        );
        assert!(matches!(
            service.create_bill(&huge_prices),
            Err(BillingError::Validation(_))
        ));

        assert!(matches!(
            service.update_payment("missing", Money::MAX, None),
            Err(BillingError::Validation(_))
        ));
        assert!(db.list_bills_for_patient("patient-1").unwrap().is_empty());
    }

    #[test]
    fn test_catalog_prices_overflowing_subtotal_rejected() {
        let db = setup_db();
        let pricey = TestDefinition::new("WGS".into(), "Genome".into(), TestKind::Normal, Money::MAX);
        db.upsert_test_definition(&pricey).unwrap();
        let service = BillingService::new(&db);

        let input = CreateBillInput::new(
            "patient-1",
            vec![LineItemInput::new("WGS"), LineItemInput::new("GLU")],
        );
        assert!(matches!(service.create_bill(&input), Err(BillingError::Validation(_))));
        assert!(db.list_bills_for_patient("patient-1").unwrap().is_empty());
    }

    #[test]
    fn test_update_payment() {
        let db = setup_db();
        let service = BillingService::new(&db);
        let created = open_bill(&service, &["GLU", "TSH"]);

        let outcome = service
            .update_payment(&created.bill.bill_id, 200, Some((25.0, DiscountType::Percentage)))
            .unwrap();
        assert_eq!(outcome.bill.discount_amount, 200);
        assert_eq!(outcome.bill.due_amount, 400);
        assert_eq!(outcome.bill.status, BillStatus::Partial);

        assert!(matches!(
            service.update_payment(&created.bill.bill_id, -5, None),
            Err(BillingError::Validation(_))
        ));
    }

    #[test]
    fn test_resync_recreates_missing_report() {
        let db = setup_db();
        let service = BillingService::new(&db);
        let created = open_bill(&service, &["GLU", "CBC"]);
        let bill_id = created.bill.bill_id.clone();

        db.conn()
            .execute("DELETE FROM reports WHERE bill_id = ?", [&bill_id])
            .unwrap();

        let added = service.add_tests(&bill_id, &[LineItemInput::new("TSH")], None).unwrap();
        assert!(added.warning.is_some());
        assert!(added.report_id.is_none());

        let resynced = service.resync_report(&bill_id).unwrap();
        assert!(resynced.is_clean());
        let report = db.get_report_by_bill(&bill_id).unwrap().unwrap();
        let ids: Vec<_> = report.results.iter().map(ResultEntry::test_id).collect();
        assert_eq!(ids, vec!["GLU", "CBC", "TSH"]);
        assert_eq!(resynced.report_id, Some(report.report_id));
    }

    #[test]
    fn test_resync_missing_bill() {
        let db = setup_db();
        let service = BillingService::new(&db);
        assert!(matches!(service.resync_report("nope"), Err(BillingError::NotFound(_))));
    }
}
