//! Input validation for payment and discount values.

use thiserror::Error;

use crate::models::{DiscountType, Money};

/// Malformed payment or discount input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FinanceError {
    #[error("Invalid discount: {0}")]
    InvalidDiscount(String),

    #[error("Invalid payment: {0}")]
    InvalidPayment(String),

    #[error("Invalid price for {test_id}: {price}")]
    InvalidPrice { test_id: String, price: Money },

    #[error("Paid amount {paid} exceeds net amount {net}")]
    Overpayment { paid: Money, net: Money },

    #[error("Amount out of range: {0}")]
    OutOfRange(String),
}

pub type FinanceResult<T> = Result<T, FinanceError>;

/// Largest single amount accepted as input, in the smallest currency unit.
///
/// Leaves headroom so sums of a few thousand maximal amounts still fit in
/// `Money`, and so `f64` inputs below it convert without saturating.
pub const MAX_AMOUNT: Money = 1_000_000_000_000_000;

/// Check a raw discount input against its type.
pub fn validate_discount(discount_input: f64, discount_type: DiscountType) -> FinanceResult<()> {
    if !discount_input.is_finite() {
        return Err(FinanceError::InvalidDiscount(format!(
            "discount must be a finite number, got {}",
            discount_input
        )));
    }
    if discount_input < 0.0 {
        return Err(FinanceError::InvalidDiscount(format!(
            "discount must be non-negative, got {}",
            discount_input
        )));
    }
    match discount_type {
        DiscountType::Percentage if discount_input > 100.0 => {
            Err(FinanceError::InvalidDiscount(format!(
                "percentage discount cannot exceed 100, got {}",
                discount_input
            )))
        }
        DiscountType::Amount if discount_input.fract() != 0.0 => {
            Err(FinanceError::InvalidDiscount(format!(
                "amount discount must be a whole number of currency units, got {}",
                discount_input
            )))
        }
        DiscountType::Amount if discount_input > MAX_AMOUNT as f64 => {
            Err(FinanceError::InvalidDiscount(format!(
                "amount discount cannot exceed {}, got {}",
                MAX_AMOUNT, discount_input
            )))
        }
        _ => Ok(()),
    }
}

/// Absolute paid amounts must be non-negative.
pub fn validate_paid_amount(paid_amount: Money) -> FinanceResult<()> {
    if paid_amount < 0 {
        return Err(FinanceError::InvalidPayment(format!(
            "paid amount must be non-negative, got {}",
            paid_amount
        )));
    }
    if paid_amount > MAX_AMOUNT {
        return Err(FinanceError::InvalidPayment(format!(
            "paid amount cannot exceed {}, got {}",
            MAX_AMOUNT, paid_amount
        )));
    }
    Ok(())
}

/// Incremental collections must be strictly positive.
pub fn validate_collect_due_amount(collect_due_amount: Money) -> FinanceResult<()> {
    if collect_due_amount <= 0 {
        return Err(FinanceError::InvalidPayment(format!(
            "collected amount must be positive, got {}",
            collect_due_amount
        )));
    }
    if collect_due_amount > MAX_AMOUNT {
        return Err(FinanceError::InvalidPayment(format!(
            "collected amount cannot exceed {}, got {}",
            MAX_AMOUNT, collect_due_amount
        )));
    }
    Ok(())
}

pub fn validate_line_price(test_id: &str, price: Money) -> FinanceResult<()> {
    if !(0..=MAX_AMOUNT).contains(&price) {
        return Err(FinanceError::InvalidPrice {
            test_id: test_id.to_string(),
            price,
        });
    }
    Ok(())
}

/// Advisory overpayment guard for callers that want it.
///
/// The calculator itself never applies this.
pub fn check_overpayment(paid_amount: Money, net_amount: Money) -> FinanceResult<()> {
    if paid_amount > net_amount {
        return Err(FinanceError::Overpayment {
            paid: paid_amount,
            net: net_amount,
        });
    }
    Ok(())
}
