//! Test catalog resolver.
//!
//! Turns requested test references into catalog definitions, expanding
//! groups into their sub-test definitions in stored order.

mod search;

pub use search::*;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::Database;
use crate::models::{BillLineItem, Money, TestDefinition};

/// Resolver errors.
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DbError),

    #[error("Test definition not found: {0}")]
    NotFound(String),
}

pub type ResolverResult<T> = Result<T, ResolverError>;

/// A requested test with an optional client-supplied price.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItemInput {
    pub test_id: String,
    /// Overrides the catalog price when present
    pub price: Option<Money>,
}

impl LineItemInput {
    pub fn new(test_id: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            price: None,
        }
    }

    pub fn with_price(test_id: impl Into<String>, price: Money) -> Self {
        Self {
            test_id: test_id.into(),
            price: Some(price),
        }
    }
}

/// A line item together with its catalog definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTest {
    /// Priced line item for the bill
    pub line_item: BillLineItem,
    /// Definition of the requested test
    pub definition: TestDefinition,
    /// Sub-test definitions in stored order (groups only)
    pub sub_definitions: Vec<TestDefinition>,
}

/// Resolves test references against the catalog.
pub struct TestResolver<'a> {
    db: &'a Database,
}

impl<'a> TestResolver<'a> {
    /// Create a new resolver.
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Resolve every requested test, in order.
    ///
    /// Fails on the first missing definition: a priced line with no
    /// definition is a billing defect, so the whole request is aborted.
    pub fn resolve_all(&self, requested: &[LineItemInput]) -> ResolverResult<Vec<ResolvedTest>> {
        requested.iter().map(|input| self.resolve(input)).collect()
    }

    /// Resolve a single requested test.
    pub fn resolve(&self, input: &LineItemInput) -> ResolverResult<ResolvedTest> {
        let definition = self.definition(&input.test_id)?;
        let sub_definitions = if definition.is_group() {
            self.db.get_sub_definitions(&definition.test_id)?
        } else {
            Vec::new()
        };

        Ok(ResolvedTest {
            line_item: BillLineItem {
                test_id: definition.test_id.clone(),
                price: input.price.unwrap_or(definition.price),
            },
            definition,
            sub_definitions,
        })
    }

    /// Resolve an already-priced bill line (price is kept as billed).
    pub fn resolve_line(&self, line_item: &BillLineItem) -> ResolverResult<ResolvedTest> {
        self.resolve(&LineItemInput::with_price(
            line_item.test_id.clone(),
            line_item.price,
        ))
    }

    fn definition(&self, test_id: &str) -> ResolverResult<TestDefinition> {
        self.db
            .get_test_definition(test_id)?
            .ok_or_else(|| ResolverError::NotFound(test_id.to_string()))
    }
}
