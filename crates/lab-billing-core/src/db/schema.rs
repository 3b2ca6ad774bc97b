//! SQLite schema definition.

/// Complete database schema for lab billing.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Test Catalog
-- ============================================================================

CREATE TABLE IF NOT EXISTS test_definitions (
    test_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('normal', 'descriptive', 'group')),
    price INTEGER NOT NULL DEFAULT 0,             -- minor currency units
    unit TEXT,
    method TEXT,
    formula TEXT,
    reference_ranges TEXT NOT NULL DEFAULT '[]',  -- JSON array of {name, min, max}
    interpretation TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- FTS5 virtual table for name search
CREATE VIRTUAL TABLE IF NOT EXISTS test_definitions_fts USING fts5(
    test_id,
    name,
    content='test_definitions',
    content_rowid='rowid'
);

-- Triggers to keep FTS5 in sync with main table
CREATE TRIGGER IF NOT EXISTS test_definitions_ai AFTER INSERT ON test_definitions BEGIN
    INSERT INTO test_definitions_fts(rowid, test_id, name)
    VALUES (new.rowid, new.test_id, new.name);
END;

CREATE TRIGGER IF NOT EXISTS test_definitions_ad AFTER DELETE ON test_definitions BEGIN
    INSERT INTO test_definitions_fts(test_definitions_fts, rowid, test_id, name)
    VALUES ('delete', old.rowid, old.test_id, old.name);
END;

CREATE TRIGGER IF NOT EXISTS test_definitions_au AFTER UPDATE ON test_definitions BEGIN
    INSERT INTO test_definitions_fts(test_definitions_fts, rowid, test_id, name)
    VALUES ('delete', old.rowid, old.test_id, old.name);
    INSERT INTO test_definitions_fts(rowid, test_id, name)
    VALUES (new.rowid, new.test_id, new.name);
END;

-- Group ownership: a sub-test belongs to at most one group
CREATE TABLE IF NOT EXISTS group_members (
    group_id TEXT NOT NULL REFERENCES test_definitions(test_id) ON DELETE CASCADE,
    sub_test_id TEXT NOT NULL UNIQUE REFERENCES test_definitions(test_id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    PRIMARY KEY (group_id, position)
);

CREATE INDEX IF NOT EXISTS idx_group_members_group ON group_members(group_id);

-- ============================================================================
-- Bills
-- ============================================================================

CREATE TABLE IF NOT EXISTS bills (
    bill_id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL,
    doctor_id TEXT,
    line_items TEXT NOT NULL DEFAULT '[]',       -- JSON array of {test_id, price}
    total_amount INTEGER NOT NULL DEFAULT 0,
    discount_value REAL NOT NULL DEFAULT 0,
    discount_type TEXT NOT NULL DEFAULT 'AMOUNT' CHECK (discount_type IN ('AMOUNT', 'PERCENTAGE')),
    discount_amount INTEGER NOT NULL DEFAULT 0,
    paid_amount INTEGER NOT NULL DEFAULT 0,
    due_amount INTEGER NOT NULL DEFAULT 0 CHECK (due_amount >= 0),
    status TEXT NOT NULL DEFAULT 'PENDING' CHECK (status IN ('PENDING', 'PARTIAL', 'PAID')),
    payment_type TEXT NOT NULL DEFAULT '',
    due_payment_type TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_bills_patient ON bills(patient_id);
CREATE INDEX IF NOT EXISTS idx_bills_status ON bills(status);

-- ============================================================================
-- Reports (1:1 with bills)
-- ============================================================================

CREATE TABLE IF NOT EXISTS reports (
    report_id TEXT PRIMARY KEY,
    bill_id TEXT NOT NULL UNIQUE REFERENCES bills(bill_id) ON DELETE CASCADE,
    patient_id TEXT NOT NULL,
    doctor_id TEXT,
    results TEXT NOT NULL DEFAULT '[]',          -- JSON array of ResultEntry
    status TEXT NOT NULL DEFAULT 'INITIAL'
        CHECK (status IN ('INITIAL', 'IN_PROGRESS', 'COMPLETED', 'VERIFIED', 'PRINTED', 'DELIVERED')),
    impression TEXT,
    revision INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_reports_status ON reports(status);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_valid() {
        let conn = Connection::open_in_memory().unwrap();
        let result = conn.execute_batch(SCHEMA);
        assert!(result.is_ok(), "Schema should be valid SQL: {:?}", result);
    }

    #[test]
    fn test_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        assert!(conn.execute_batch(SCHEMA).is_ok());
    }

    #[test]
    fn test_fts_trigger() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        conn.execute(
            "INSERT INTO test_definitions (test_id, name, kind) VALUES (?, ?, ?)",
            ["CBC", "Complete Blood Count", "group"],
        )
        .unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM test_definitions_fts WHERE test_definitions_fts MATCH 'blood'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_sub_test_owned_by_one_group() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        for (id, kind) in [("G1", "group"), ("G2", "group"), ("HB", "normal")] {
            conn.execute(
                "INSERT INTO test_definitions (test_id, name, kind) VALUES (?1, ?1, ?2)",
                [id, kind],
            )
            .unwrap();
        }

        conn.execute(
            "INSERT INTO group_members (group_id, sub_test_id, position) VALUES ('G1', 'HB', 0)",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO group_members (group_id, sub_test_id, position) VALUES ('G2', 'HB', 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_due_amount_never_negative() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        let result = conn.execute(
            "INSERT INTO bills (bill_id, patient_id, due_amount) VALUES ('b1', 'p1', -5)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_one_report_per_bill() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        conn.execute("INSERT INTO bills (bill_id, patient_id) VALUES ('b1', 'p1')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO reports (report_id, bill_id, patient_id) VALUES ('r1', 'b1', 'p1')",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO reports (report_id, bill_id, patient_id) VALUES ('r2', 'b1', 'p1')",
            [],
        );
        assert!(result.is_err());
    }
}
