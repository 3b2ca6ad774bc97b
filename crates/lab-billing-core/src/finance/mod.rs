//! Financial calculator for bills.
//!
//! Pure arithmetic: subtotal, discount, due amount and payment status.
//! Nothing here touches the database; the incremental "collect due" path
//! reads persisted state in [`crate::billing`] and only delegates the
//! arithmetic here.
//!
//! Rounding happens once, after multiplying the subtotal by the discount
//! percentage. Overpayment is absorbed: the due amount floors at zero.

mod validation;

pub use validation::*;

use serde::{Deserialize, Serialize};

use crate::models::{Bill, BillLineItem, BillStatus, DiscountType, Money};

/// Amounts derived for a bill.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settlement {
    pub total_amount: Money,
    pub discount_amount: Money,
    pub paid_amount: Money,
    pub due_amount: Money,
    pub status: BillStatus,
}

/// Sum of line prices.
pub fn compute_subtotal(line_items: &[BillLineItem]) -> FinanceResult<Money> {
    line_items.iter().try_fold(0, |sum: Money, item| {
        sum.checked_add(item.price)
            .ok_or_else(|| out_of_range("subtotal", sum, item.price))
    })
}

/// Discount in currency units.
///
/// `PERCENTAGE` rounds `subtotal * input / 100` to the nearest unit.
/// `AMOUNT` passes the input through; it is not capped at the subtotal.
pub fn compute_discount_amount(
    subtotal: Money,
    discount_input: f64,
    discount_type: DiscountType,
) -> Money {
    match discount_type {
        DiscountType::Percentage => (subtotal as f64 * discount_input / 100.0).round() as Money,
        DiscountType::Amount => discount_input.round() as Money,
    }
}

/// `max(0, subtotal - discount - paid)`.
pub fn compute_due_amount(
    subtotal: Money,
    discount_amount: Money,
    paid_amount: Money,
) -> FinanceResult<Money> {
    let net = net_amount(subtotal, discount_amount)?;
    let due = net
        .checked_sub(paid_amount)
        .ok_or_else(|| out_of_range("due amount", net, paid_amount))?;
    Ok(due.max(0))
}

/// Payment status from the due amount and the net (post-discount) amount.
pub fn derive_status(due_amount: Money, net_amount: Money) -> BillStatus {
    if due_amount <= 0 {
        BillStatus::Paid
    } else if due_amount < net_amount {
        BillStatus::Partial
    } else {
        BillStatus::Pending
    }
}

/// Derive all amounts and the status from raw inputs.
pub fn settle(
    total_amount: Money,
    discount_amount: Money,
    paid_amount: Money,
) -> FinanceResult<Settlement> {
    let due_amount = compute_due_amount(total_amount, discount_amount, paid_amount)?;
    Ok(Settlement {
        total_amount,
        discount_amount,
        paid_amount,
        due_amount,
        status: derive_status(due_amount, net_amount(total_amount, discount_amount)?),
    })
}

/// Paid amount after collecting `collect_due_amount` on top of the persisted one.
pub fn apply_collect_due(
    persisted_paid_amount: Money,
    collect_due_amount: Money,
) -> FinanceResult<Money> {
    persisted_paid_amount
        .checked_add(collect_due_amount)
        .ok_or_else(|| out_of_range("paid amount", persisted_paid_amount, collect_due_amount))
}

fn net_amount(subtotal: Money, discount_amount: Money) -> FinanceResult<Money> {
    subtotal
        .checked_sub(discount_amount)
        .ok_or_else(|| out_of_range("net amount", subtotal, discount_amount))
}

fn out_of_range(what: &str, lhs: Money, rhs: Money) -> FinanceError {
    FinanceError::OutOfRange(format!("{} overflows combining {} and {}", what, lhs, rhs))
}

impl Bill {
    /// Recompute total, discount, due and status from the line items,
    /// the stored discount input and the paid amount.
    pub fn recalculate(&mut self) -> FinanceResult<()> {
        let total = compute_subtotal(&self.line_items)?;
        let discount = compute_discount_amount(total, self.discount_value, self.discount_type);
        self.apply_settlement(settle(total, discount, self.paid_amount)?);
        Ok(())
    }

    /// Recompute due and status only, keeping total and discount as stored.
    pub fn resettle(&mut self) -> FinanceResult<()> {
        self.apply_settlement(settle(self.total_amount, self.discount_amount, self.paid_amount)?);
        Ok(())
    }

    fn apply_settlement(&mut self, settlement: Settlement) {
        self.total_amount = settlement.total_amount;
        self.discount_amount = settlement.discount_amount;
        self.paid_amount = settlement.paid_amount;
        self.due_amount = settlement.due_amount;
        self.status = settlement.status;
    }
}
