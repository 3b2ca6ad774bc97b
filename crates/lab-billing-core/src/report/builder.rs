//! Result tree builder.
//!
//! Expands resolved tests into report entries. Pure: no I/O.

use std::collections::HashSet;

use crate::models::{GroupResult, ResultEntry, ResultLine, ResultStatus, TestDefinition};
use crate::resolver::ResolvedTest;

/// Build the result tree for a list of resolved tests, in line-item order.
///
/// A test id requested more than once yields a single entry (the first).
pub fn build_results(resolved: &[ResolvedTest]) -> Vec<ResultEntry> {
    let mut seen = HashSet::new();
    resolved
        .iter()
        .filter(|r| seen.insert(r.definition.test_id.clone()))
        .map(build_entry)
        .collect()
}

/// Build one top-level entry.
pub fn build_entry(resolved: &ResolvedTest) -> ResultEntry {
    let def = &resolved.definition;
    if def.is_group() {
        let group_results: Vec<ResultLine> =
            resolved.sub_definitions.iter().map(build_line).collect();
        // A group with no members has nothing left to enter
        let status = if group_results.is_empty() {
            ResultStatus::Completed
        } else {
            ResultStatus::Pending
        };
        ResultEntry::Group(GroupResult {
            test_id: def.test_id.clone(),
            test_name: def.name.clone(),
            status,
            remarks: None,
            group_results,
        })
    } else {
        ResultEntry::Single(build_line(def))
    }
}

/// Build a pending flat line.
///
/// Name, kind and unit are frozen here; the reference range is left empty so
/// it is always read from the live definition when rendered.
pub fn build_line(def: &TestDefinition) -> ResultLine {
    ResultLine {
        test_id: def.test_id.clone(),
        test_name: def.name.clone(),
        kind: def.kind,
        status: ResultStatus::Pending,
        result_value: String::new(),
        unit: def.unit.clone().unwrap_or_default(),
        reference_range: String::new(),
        remarks: None,
    }
}
