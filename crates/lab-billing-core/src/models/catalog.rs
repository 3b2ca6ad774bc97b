//! Test catalog models.

use serde::{Deserialize, Serialize};

use super::Money;

/// Kind of a catalog test.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TestKind {
    /// Numeric/short-text result with unit and reference ranges
    Normal,
    /// Free-text result (e.g. culture, histopathology)
    Descriptive,
    /// Panel owning an ordered list of sub-tests
    Group,
}

impl TestKind {
    /// Wire value as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            TestKind::Normal => "normal",
            TestKind::Descriptive => "descriptive",
            TestKind::Group => "group",
        }
    }

    /// Parse from the wire value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(TestKind::Normal),
            "descriptive" => Some(TestKind::Descriptive),
            "group" => Some(TestKind::Group),
            _ => None,
        }
    }
}

/// A single entry in the laboratory test catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestDefinition {
    /// Unique identifier
    pub test_id: String,
    /// Display name
    pub name: String,
    /// Test kind
    pub kind: TestKind,
    /// Catalog price in minor currency units
    pub price: Money,
    /// Result unit (e.g. "mg/dL")
    pub unit: Option<String>,
    /// Method of analysis
    pub method: Option<String>,
    /// Calculation formula for derived values
    pub formula: Option<String>,
    /// Reference ranges, rendered live on reports
    pub reference_ranges: Vec<ReferenceRange>,
    /// Default interpretation text
    pub interpretation: Option<String>,
    /// Ordered sub-test ids (groups only, populated on read)
    pub sub_test_ids: Vec<String>,
    /// Whether this test can still be ordered
    pub active: bool,
    /// Creation timestamp
    pub created_at: String,
    /// Last update timestamp
    pub updated_at: String,
}

/// A named reference interval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferenceRange {
    /// Optional population label (e.g. "Male", "Adult")
    pub name: Option<String>,
    /// Lower bound
    pub min: Option<f64>,
    /// Upper bound
    pub max: Option<f64>,
}

impl TestDefinition {
    /// Create a new test definition with required fields.
    pub fn new(test_id: String, name: String, kind: TestKind, price: Money) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            test_id,
            name,
            kind,
            price,
            unit: None,
            method: None,
            formula: None,
            reference_ranges: Vec::new(),
            interpretation: None,
            sub_test_ids: Vec::new(),
            active: true,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn is_group(&self) -> bool {
        self.kind == TestKind::Group
    }

    /// Render all reference ranges as display text, one per line.
    pub fn formatted_reference_ranges(&self) -> String {
        self.reference_ranges
            .iter()
            .map(ReferenceRange::display)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl ReferenceRange {
    /// Check that at least one bound exists and bounds are ordered.
    pub fn validate(&self) -> Result<(), String> {
        match (self.min, self.max) {
            (None, None) => Err("reference range needs a min or a max".into()),
            (Some(min), Some(max)) if min > max => Err(format!(
                "reference range min {} is greater than max {}",
                min, max
            )),
            _ => Ok(()),
        }
    }

    /// Human-readable form, e.g. `Male: 13 - 17`, `< 200`, `>= 40`.
    pub fn display(&self) -> String {
        let bounds = match (self.min, self.max) {
            (Some(min), Some(max)) => format!("{} - {}", min, max),
            (Some(min), None) => format!(">= {}", min),
            (None, Some(max)) => format!("< {}", max),
            (None, None) => String::new(),
        };
        match &self.name {
            Some(name) if !name.is_empty() => format!("{}: {}", name, bounds),
            _ => bounds,
        }
    }
}
