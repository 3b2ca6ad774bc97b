//! Bill models.

use serde::{Deserialize, Serialize};

use super::Money;

/// Payment status of a bill, derived from its amounts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillStatus {
    /// Nothing paid yet
    Pending,
    /// Some amount paid, some still due
    Partial,
    /// Nothing due
    Paid,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Pending => "PENDING",
            BillStatus::Partial => "PARTIAL",
            BillStatus::Paid => "PAID",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(BillStatus::Pending),
            "PARTIAL" => Some(BillStatus::Partial),
            "PAID" => Some(BillStatus::Paid),
            _ => None,
        }
    }
}

/// How the discount input on a bill is interpreted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    /// Flat amount in minor currency units
    #[default]
    Amount,
    /// Percentage of the subtotal
    Percentage,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Amount => "AMOUNT",
            DiscountType::Percentage => "PERCENTAGE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AMOUNT" => Some(DiscountType::Amount),
            "PERCENTAGE" => Some(DiscountType::Percentage),
            _ => None,
        }
    }
}

/// One priced test on a bill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillLineItem {
    /// Catalog test id
    pub test_id: String,
    /// Price charged for this line
    pub price: Money,
}

/// A financial transaction for a patient visit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bill {
    /// Unique bill ID
    pub bill_id: String,
    /// Patient reference
    pub patient_id: String,
    /// Referring doctor reference
    pub doctor_id: Option<String>,
    /// Ordered line items
    pub line_items: Vec<BillLineItem>,
    /// Sum of line prices
    pub total_amount: Money,
    /// Discount as entered (percent or amount, see `discount_type`)
    pub discount_value: f64,
    /// How `discount_value` is interpreted
    pub discount_type: DiscountType,
    /// Discount in minor currency units
    pub discount_amount: Money,
    /// Amount collected so far
    pub paid_amount: Money,
    /// Amount still owed, never negative
    pub due_amount: Money,
    /// Derived payment status
    pub status: BillStatus,
    /// Payment type of the initial payment
    pub payment_type: String,
    /// Payment type used when collecting the due amount
    pub due_payment_type: Option<String>,
    /// Creation timestamp
    pub created_at: String,
    /// Last update timestamp
    pub updated_at: String,
}

impl Bill {
    /// Amount payable after discount.
    pub fn net_amount(&self) -> Money {
        self.total_amount.saturating_sub(self.discount_amount)
    }

    /// Test ids in line-item order.
    pub fn test_ids(&self) -> impl Iterator<Item = &str> {
        self.line_items.iter().map(|item| item.test_id.as_str())
    }

    /// Touch the updated_at timestamp.
    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_values() {
        assert_eq!(serde_json::to_string(&BillStatus::Partial).unwrap(), "\"PARTIAL\"");
        for status in [BillStatus::Pending, BillStatus::Partial, BillStatus::Paid] {
            assert_eq!(BillStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BillStatus::parse("paid"), None);
    }

    #[test]
    fn test_discount_type_wire_values() {
        assert_eq!(
            serde_json::from_str::<DiscountType>("\"PERCENTAGE\"").unwrap(),
            DiscountType::Percentage
        );
        assert_eq!(DiscountType::parse("AMOUNT"), Some(DiscountType::Amount));
        assert_eq!(DiscountType::default(), DiscountType::Amount);
    }
}
