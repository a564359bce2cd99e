use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS imports (
    id INTEGER PRIMARY KEY,
    bank TEXT NOT NULL,
    period_month TEXT NOT NULL,
    file_sha256 TEXT NOT NULL,
    source_file TEXT NOT NULL,
    user_id TEXT NOT NULL,
    notes TEXT DEFAULT '',
    created_at TEXT DEFAULT (datetime('now')),
    UNIQUE (bank, period_month, file_sha256, user_id)
);

CREATE TABLE IF NOT EXISTS transactions_raw (
    id INTEGER PRIMARY KEY,
    import_batch_id INTEGER NOT NULL,
    bank TEXT NOT NULL,
    ts TEXT NOT NULL,
    description TEXT NOT NULL,
    merchant TEXT,
    amount_raw TEXT,
    amount REAL NOT NULL,
    currency TEXT NOT NULL,
    account_label TEXT,
    extra TEXT,
    FOREIGN KEY (import_batch_id) REFERENCES imports(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    raw_id INTEGER NOT NULL,
    ts TEXT NOT NULL,
    account_id TEXT NOT NULL,
    account_label TEXT,
    description TEXT NOT NULL,
    merchant TEXT,
    category TEXT,
    subcategory TEXT,
    amount REAL NOT NULL,
    currency TEXT NOT NULL,
    balance REAL,
    is_transfer INTEGER NOT NULL DEFAULT 0,
    source_file TEXT,
    import_batch_id INTEGER NOT NULL,
    user_id TEXT NOT NULL,
    FOREIGN KEY (raw_id) REFERENCES transactions_raw(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_transactions_month ON transactions (substr(ts, 1, 7), account_id);

CREATE TABLE IF NOT EXISTS category_rules (
    id INTEGER PRIMARY KEY,
    active INTEGER NOT NULL DEFAULT 1,
    priority INTEGER NOT NULL DEFAULT 0,
    field TEXT NOT NULL,
    operator TEXT NOT NULL,
    pattern TEXT NOT NULL,
    set_category TEXT,
    set_subcategory TEXT,
    set_is_transfer INTEGER,
    hit_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS txn_overrides (
    id INTEGER PRIMARY KEY,
    txn_id INTEGER NOT NULL,
    set_category TEXT,
    set_subcategory TEXT,
    set_is_transfer INTEGER,
    note TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_txn_overrides_txn ON txn_overrides (txn_id);

CREATE TABLE IF NOT EXISTS rollup_monthly (
    account_id TEXT NOT NULL,
    month TEXT NOT NULL,
    category TEXT NOT NULL,
    subcategory TEXT NOT NULL,
    income REAL NOT NULL,
    expense REAL NOT NULL,
    net REAL NOT NULL,
    PRIMARY KEY (account_id, month, category, subcategory)
);

CREATE TABLE IF NOT EXISTS statements_eom (
    account_id TEXT NOT NULL,
    period_month TEXT NOT NULL,
    balance REAL NOT NULL,
    updated_at TEXT DEFAULT (datetime('now')),
    PRIMARY KEY (account_id, period_month)
);
";

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// `?n, ?n+1, ...` placeholders for an `IN (...)` list starting at `first`.
pub fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
pub fn test_db() -> (tempfile::TempDir, Connection) {
    let dir = tempfile::tempdir().unwrap();
    let conn = get_connection(&dir.path().join("test.db")).unwrap();
    init_db(&conn).unwrap();
    (dir, conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_db_creates_tables() {
        let (_dir, conn) = test_db();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        for expected in &[
            "imports",
            "transactions_raw",
            "transactions",
            "category_rules",
            "txn_overrides",
            "rollup_monthly",
            "statements_eom",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table: {expected}");
        }
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let (_dir, conn) = test_db();
        init_db(&conn).unwrap();
    }

    #[test]
    fn test_import_ledger_is_unique() {
        let (_dir, conn) = test_db();
        let insert = "INSERT INTO imports (bank, period_month, file_sha256, source_file, user_id) \
                      VALUES ('BNP', '2025-07-01', 'abc', 'a.csv', 'me')";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(2, 3), "?2, ?3, ?4");
        assert_eq!(placeholders(1, 1), "?1");
    }
}
