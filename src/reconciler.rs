use rusqlite::Connection;

use crate::error::Result;
use crate::period::Period;

const TOLERANCE: f64 = 0.01;

pub struct ReconcileResult {
    pub account_id: String,
    pub month: Period,
    pub is_reconciled: bool,
    pub statement_balance: f64,
    pub computed_balance: f64,
    pub delta: f64,
}

pub struct ReconciliationRow {
    pub account_id: String,
    pub month: String,
    pub statement_balance: f64,
    pub computed_balance: f64,
    pub delta: f64,
    pub is_reconciled: bool,
    pub updated_at: String,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn computed_balance(conn: &Connection, account_id: &str, month: Period) -> Result<f64> {
    let computed = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM transactions WHERE account_id = ?1 AND substr(ts, 1, 7) = ?2",
        rusqlite::params![account_id, month.month_key()],
        |row| row.get(0),
    )?;
    Ok(computed)
}

/// Stores the end-of-month statement balance and compares it with the sum
/// of the month's derived transactions for the account.
pub fn record_statement(
    conn: &Connection,
    account_id: &str,
    month: Period,
    statement_balance: f64,
) -> Result<ReconcileResult> {
    let computed = computed_balance(conn, account_id, month)?;
    let delta = computed - statement_balance;

    conn.execute(
        "INSERT INTO statements_eom (account_id, period_month, balance) VALUES (?1, ?2, ?3) \
         ON CONFLICT (account_id, period_month) DO UPDATE SET balance = excluded.balance, updated_at = datetime('now')",
        rusqlite::params![account_id, month.to_string(), statement_balance],
    )?;

    let is_reconciled = delta.abs() < TOLERANCE;
    tracing::info!(account_id, %month, delta, is_reconciled, "statement recorded");
    Ok(ReconcileResult {
        account_id: account_id.to_string(),
        month,
        is_reconciled,
        statement_balance,
        computed_balance: round2(computed),
        delta: round2(delta),
    })
}

/// Stored statements with their current computed balances, newest month first.
pub fn reconciliation_status(
    conn: &Connection,
    month: Option<Period>,
    account_id: Option<&str>,
) -> Result<Vec<ReconciliationRow>> {
    let mut conditions = Vec::new();
    let mut params: Vec<String> = Vec::new();
    if let Some(m) = month {
        params.push(m.to_string());
        conditions.push(format!("s.period_month = ?{}", params.len()));
    }
    if let Some(a) = account_id {
        params.push(a.to_string());
        conditions.push(format!("s.account_id = ?{}", params.len()));
    }
    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        "SELECT s.account_id, s.period_month, s.balance, \
                COALESCE((SELECT SUM(t.amount) FROM transactions t \
                          WHERE t.account_id = s.account_id \
                            AND substr(t.ts, 1, 7) = substr(s.period_month, 1, 7)), 0), \
                COALESCE(s.updated_at, '') \
         FROM statements_eom s {clause} \
         ORDER BY s.period_month DESC, s.account_id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            let statement_balance: f64 = row.get(2)?;
            let computed_balance: f64 = row.get(3)?;
            let delta = computed_balance - statement_balance;
            Ok(ReconciliationRow {
                account_id: row.get(0)?,
                month: row.get(1)?,
                statement_balance,
                computed_balance: round2(computed_balance),
                delta: round2(delta),
                is_reconciled: delta.abs() < TOLERANCE,
                updated_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
