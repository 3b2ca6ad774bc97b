//! Test catalog database operations.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{TestDefinition, TestKind};

const DEFINITION_COLUMNS: &str = r#"
    test_id, name, kind, price, unit, method, formula,
    reference_ranges, interpretation, active, created_at, updated_at
"#;

impl Database {
    /// Insert or update a test definition.
    ///
    /// For groups, `sub_test_ids` replaces the stored member list in the same
    /// transaction.
    pub fn upsert_test_definition(&self, def: &TestDefinition) -> DbResult<()> {
        validate_definition(def)?;
        let ranges_json = serde_json::to_string(&def.reference_ranges)?;

        let tx = self.write_transaction()?;
        tx.execute(
            r#"
            INSERT INTO test_definitions (
                test_id, name, kind, price, unit, method, formula,
                reference_ranges, interpretation, active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, datetime('now'))
            ON CONFLICT(test_id) DO UPDATE SET
                name = excluded.name,
                kind = excluded.kind,
                price = excluded.price,
                unit = excluded.unit,
                method = excluded.method,
                formula = excluded.formula,
                reference_ranges = excluded.reference_ranges,
                interpretation = excluded.interpretation,
                active = excluded.active,
                updated_at = datetime('now')
            "#,
            params![
                def.test_id,
                def.name,
                def.kind.as_str(),
                def.price,
                def.unit,
                def.method,
                def.formula,
                ranges_json,
                def.interpretation,
                def.active,
                def.created_at,
            ],
        )?;

        if def.is_group() {
            let owner: Option<String> = tx
                .query_row(
                    "SELECT group_id FROM group_members WHERE sub_test_id = ?",
                    [&def.test_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(owner) = owner {
                return Err(DbError::Constraint(format!(
                    "{} belongs to group {} and cannot become a group",
                    def.test_id, owner
                )));
            }
            write_group_members(&tx, &def.test_id, &def.sub_test_ids)?;
        } else {
            // A test that stopped being a group releases its members
            tx.execute("DELETE FROM group_members WHERE group_id = ?", [&def.test_id])?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Replace the ordered member list of an existing group.
    pub fn set_group_members(&self, group_id: &str, sub_test_ids: &[String]) -> DbResult<()> {
        let tx = self.write_transaction()?;
        let kind: Option<String> = tx
            .query_row(
                "SELECT kind FROM test_definitions WHERE test_id = ?",
                [group_id],
                |row| row.get(0),
            )
            .optional()?;

        match kind.as_deref() {
            None => return Err(DbError::NotFound(format!("test definition {}", group_id))),
            Some("group") => {}
            Some(other) => {
                return Err(DbError::Constraint(format!(
                    "{} is a {} test, not a group",
                    group_id, other
                )))
            }
        }

        write_group_members(&tx, group_id, sub_test_ids)?;
        tx.execute(
            "UPDATE test_definitions SET updated_at = datetime('now') WHERE test_id = ?",
            [group_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Get a test definition by id, with group members populated.
    pub fn get_test_definition(&self, test_id: &str) -> DbResult<Option<TestDefinition>> {
        let sql = format!(
            "SELECT {} FROM test_definitions WHERE test_id = ?",
            DEFINITION_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, [test_id], map_definition_row)
            .optional()?;

        match row {
            Some(row) => {
                let mut def: TestDefinition = row.try_into()?;
                if def.is_group() {
                    def.sub_test_ids = self.get_group_member_ids(&def.test_id)?;
                }
                Ok(Some(def))
            }
            None => Ok(None),
        }
    }

    /// Get the sub-test definitions of a group, in stored order.
    pub fn get_sub_definitions(&self, group_id: &str) -> DbResult<Vec<TestDefinition>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT t.test_id, t.name, t.kind, t.price, t.unit, t.method, t.formula,
                   t.reference_ranges, t.interpretation, t.active, t.created_at, t.updated_at
            FROM test_definitions t
            JOIN group_members m ON m.sub_test_id = t.test_id
            WHERE m.group_id = ?
            ORDER BY m.position
            "#,
        )?;
        let rows = stmt.query_map([group_id], map_definition_row)?;

        let mut defs = Vec::new();
        for row in rows {
            defs.push(row?.try_into()?);
        }
        Ok(defs)
    }

    /// Get the ordered member ids of a group.
    pub fn get_group_member_ids(&self, group_id: &str) -> DbResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT sub_test_id FROM group_members WHERE group_id = ? ORDER BY position",
        )?;
        let ids = stmt
            .query_map([group_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Get the group that owns a sub-test, if any.
    pub fn get_owning_group(&self, sub_test_id: &str) -> DbResult<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT group_id FROM group_members WHERE sub_test_id = ?",
                [sub_test_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// List test definitions ordered by name.
    pub fn list_test_definitions(&self, active_only: bool) -> DbResult<Vec<TestDefinition>> {
        let sql = if active_only {
            format!(
                "SELECT {} FROM test_definitions WHERE active = 1 ORDER BY name",
                DEFINITION_COLUMNS
            )
        } else {
            format!("SELECT {} FROM test_definitions ORDER BY name", DEFINITION_COLUMNS)
        };

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_definition_row)?;

        let mut defs = Vec::new();
        for row in rows {
            let mut def: TestDefinition = row?.try_into()?;
            if def.is_group() {
                def.sub_test_ids = self.get_group_member_ids(&def.test_id)?;
            }
            defs.push(def);
        }
        Ok(defs)
    }

    /// Search active definitions by name using FTS5 (BM25 ranking).
    pub fn search_test_definitions(
        &self,
        query: &str,
        limit: usize,
    ) -> DbResult<Vec<TestDefinition>> {
        let escaped_query = escape_fts_query(query);
        if escaped_query.is_empty() {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(
            r#"
            SELECT t.test_id, t.name, t.kind, t.price, t.unit, t.method, t.formula,
                   t.reference_ranges, t.interpretation, t.active, t.created_at, t.updated_at,
                   bm25(test_definitions_fts) as rank
            FROM test_definitions t
            JOIN test_definitions_fts fts ON t.rowid = fts.rowid
            WHERE test_definitions_fts MATCH ?
            AND t.active = 1
            ORDER BY rank
            LIMIT ?
            "#,
        )?;

        let rows = stmt.query_map(params![escaped_query, limit as i64], map_definition_row)?;

        let mut defs = Vec::new();
        for row in rows {
            let mut def: TestDefinition = row?.try_into()?;
            if def.is_group() {
                def.sub_test_ids = self.get_group_member_ids(&def.test_id)?;
            }
            defs.push(def);
        }
        Ok(defs)
    }

    /// Mark a definition as inactive (soft delete).
    ///
    /// Inactive tests still resolve for existing bills and reports.
    pub fn deactivate_test_definition(&self, test_id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE test_definitions SET active = 0, updated_at = datetime('now') WHERE test_id = ?",
            [test_id],
        )?;
        Ok(rows_affected > 0)
    }

    /// Delete a definition (and its group memberships).
    pub fn delete_test_definition(&self, test_id: &str) -> DbResult<bool> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM test_definitions WHERE test_id = ?", [test_id])?;
        Ok(rows_affected > 0)
    }
}

fn validate_definition(def: &TestDefinition) -> DbResult<()> {
    if def.test_id.trim().is_empty() {
        return Err(DbError::Constraint("test id must not be empty".into()));
    }
    if def.price < 0 {
        return Err(DbError::Constraint(format!(
            "price of {} must not be negative",
            def.test_id
        )));
    }
    for range in &def.reference_ranges {
        range
            .validate()
            .map_err(|e| DbError::Constraint(format!("{}: {}", def.test_id, e)))?;
    }
    if !def.is_group() && !def.sub_test_ids.is_empty() {
        return Err(DbError::Constraint(format!(
            "{} is not a group and cannot own sub-tests",
            def.test_id
        )));
    }
    Ok(())
}

/// Replace a group's members, enforcing one level of nesting and single ownership.
fn write_group_members(conn: &Connection, group_id: &str, sub_test_ids: &[String]) -> DbResult<()> {
    for (i, sub_id) in sub_test_ids.iter().enumerate() {
        if sub_id == group_id {
            return Err(DbError::Constraint(format!("group {} cannot contain itself", group_id)));
        }
        if sub_test_ids[..i].contains(sub_id) {
            return Err(DbError::Constraint(format!(
                "{} listed twice in group {}",
                sub_id, group_id
            )));
        }

        let kind: Option<String> = conn
            .query_row(
                "SELECT kind FROM test_definitions WHERE test_id = ?",
                [sub_id],
                |row| row.get(0),
            )
            .optional()?;
        match kind.as_deref() {
            None => return Err(DbError::NotFound(format!("test definition {}", sub_id))),
            Some("group") => {
                return Err(DbError::Constraint(format!(
                    "group {} cannot contain group {}",
                    group_id, sub_id
                )))
            }
            Some(_) => {}
        }

        let owner: Option<String> = conn
            .query_row(
                "SELECT group_id FROM group_members WHERE sub_test_id = ?",
                [sub_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(owner) = owner {
            if owner != group_id {
                return Err(DbError::Constraint(format!(
                    "{} already belongs to group {}",
                    sub_id, owner
                )));
            }
        }
    }

    conn.execute("DELETE FROM group_members WHERE group_id = ?", [group_id])?;
    for (position, sub_id) in sub_test_ids.iter().enumerate() {
        conn.execute(
            "INSERT INTO group_members (group_id, sub_test_id, position) VALUES (?1, ?2, ?3)",
            params![group_id, sub_id, position as i64],
        )?;
    }
    Ok(())
}

/// Intermediate row struct for database mapping.
struct TestDefinitionRow {
    test_id: String,
    name: String,
    kind: String,
    price: i64,
    unit: Option<String>,
    method: Option<String>,
    formula: Option<String>,
    reference_ranges: String,
    interpretation: Option<String>,
    active: bool,
    created_at: String,
    updated_at: String,
}

fn map_definition_row(row: &Row<'_>) -> rusqlite::Result<TestDefinitionRow> {
    Ok(TestDefinitionRow {
        test_id: row.get(0)?,
        name: row.get(1)?,
        kind: row.get(2)?,
        price: row.get(3)?,
        unit: row.get(4)?,
        method: row.get(5)?,
        formula: row.get(6)?,
        reference_ranges: row.get(7)?,
        interpretation: row.get(8)?,
        active: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

impl TryFrom<TestDefinitionRow> for TestDefinition {
    type Error = DbError;

    fn try_from(row: TestDefinitionRow) -> Result<Self, Self::Error> {
        let kind = TestKind::parse(&row.kind)
            .ok_or_else(|| DbError::Constraint(format!("Unknown test kind: {}", row.kind)))?;

        Ok(TestDefinition {
            test_id: row.test_id,
            name: row.name,
            kind,
            price: row.price,
            unit: row.unit,
            method: row.method,
            formula: row.formula,
            reference_ranges: serde_json::from_str(&row.reference_ranges)?,
            interpretation: row.interpretation,
            sub_test_ids: Vec::new(),
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Escape special FTS5 characters and prepare query for prefix matching.
fn escape_fts_query(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();

    cleaned
        .split_whitespace()
        .map(|word| format!("{}*", word))
        .collect::<Vec<_>>()
        .join(" ")
}
