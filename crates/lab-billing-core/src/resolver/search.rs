//! Fuzzy test catalog search for bill entry.
//!
//! FTS5 prefix search supplies candidates; when it finds nothing (typos,
//! abbreviations) the whole active catalog is scored instead. Candidates are
//! ranked by combined Jaro-Winkler / Levenshtein similarity.

use serde::{Deserialize, Serialize};
use strsim::{jaro_winkler, normalized_levenshtein};

use crate::db::Database;
use crate::models::{Money, TestDefinition, TestKind};

use super::ResolverResult;

/// Number of candidates to retrieve from FTS5.
const FTS_CANDIDATE_LIMIT: usize = 25;

/// Minimum similarity for a fallback candidate.
const MIN_SCORE: f64 = 0.55;

/// A catalog entry ranked against a search query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredTest {
    pub test_id: String,
    pub name: String,
    pub kind: TestKind,
    pub price: Money,
    /// Similarity in 0.0 - 1.0
    pub score: f64,
}

/// Catalog search.
pub struct TestSearch<'a> {
    db: &'a Database,
}

impl<'a> TestSearch<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Search active tests by (partial or misspelled) name or id.
    pub fn search(&self, query: &str, limit: usize) -> ResolverResult<Vec<ScoredTest>> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let candidates = self.db.search_test_definitions(query, FTS_CANDIDATE_LIMIT)?;
        let from_fts = !candidates.is_empty();
        let candidates = if from_fts {
            candidates
        } else {
            self.db.list_test_definitions(true)?
        };

        let mut scored: Vec<ScoredTest> = candidates
            .iter()
            .map(|def| score_definition(def, query))
            .filter(|c| from_fts || c.score >= MIN_SCORE)
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        scored.truncate(limit);

        Ok(scored)
    }
}

fn score_definition(def: &TestDefinition, query: &str) -> ScoredTest {
    let query_lower = query.to_lowercase();
    let name_lower = def.name.to_lowercase();

    let score = if def.test_id.eq_ignore_ascii_case(query) || name_lower == query_lower {
        1.0
    } else if name_lower.starts_with(&query_lower) {
        0.95
    } else if name_lower.contains(&query_lower) {
        0.9
    } else {
        let by_name = fuzzy_match(&query_lower, &name_lower);
        let by_id = fuzzy_match(&query_lower, &def.test_id.to_lowercase());
        by_name.max(by_id)
    };

    ScoredTest {
        test_id: def.test_id.clone(),
        name: def.name.clone(),
        kind: def.kind,
        price: def.price,
        score,
    }
}

/// Compute fuzzy string similarity using combined metrics.
fn fuzzy_match(a: &str, b: &str) -> f64 {
    // Jaro-Winkler favours shared prefixes, Levenshtein overall edit distance
    let jw = jaro_winkler(a, b);
    let lev = normalized_levenshtein(a, b);
    jw * 0.6 + lev * 0.4
}
