use rusqlite::Connection;

use crate::db::placeholders;
use crate::error::Result;
use crate::models::RollupRow;
use crate::period::Period;

pub const UNCATEGORIZED: &str = "Uncategorized";

#[derive(Debug, Clone, PartialEq)]
pub struct RollupSummary {
    pub month: String,
    pub income: f64,
    pub expense: f64,
    pub net: f64,
    pub delta_mom: f64,
    pub savings_rate: f64,
    pub rows: Vec<RollupRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubcategoryLine {
    pub subcategory: String,
    pub income: f64,
    pub expense: f64,
    pub net: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryBreakdown {
    pub category: String,
    pub income: f64,
    pub expense: f64,
    pub net: f64,
    pub subcategories: Vec<SubcategoryLine>,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

fn account_clause(column: &str, first: usize, accounts: &[String]) -> String {
    if accounts.is_empty() {
        String::new()
    } else {
        format!(" AND {column} IN ({})", placeholders(first, accounts.len()))
    }
}

fn params_with(head: &[String], accounts: &[String]) -> Vec<String> {
    head.iter().chain(accounts.iter()).cloned().collect()
}

// ---------------------------------------------------------------------------
// Rebuild
// ---------------------------------------------------------------------------

/// Replaces the month's rollup rows in one transaction.
pub fn rebuild(conn: &mut Connection, month: Period, accounts: &[String]) -> Result<RollupSummary> {
    let tx = conn.transaction()?;
    let summary = rebuild_in(&tx, month, accounts)?;
    tx.commit()?;
    Ok(summary)
}

/// Same as [`rebuild`], inside a scope the caller already opened.
pub fn rebuild_in(conn: &Connection, month: Period, accounts: &[String]) -> Result<RollupSummary> {
    let month_value = month.to_string();

    let delete = format!(
        "DELETE FROM rollup_monthly WHERE month = ?1{}",
        account_clause("account_id", 2, accounts)
    );
    conn.execute(
        &delete,
        rusqlite::params_from_iter(params_with(&[month_value.clone()], accounts)),
    )?;

    // Transfers stay in their group with zero sums so the row set mirrors
    // the derived categories.
    let insert = format!(
        "INSERT INTO rollup_monthly (account_id, month, category, subcategory, income, expense, net) \
         SELECT account_id, ?1, category, subcategory, income, expense, income - expense FROM ( \
           SELECT account_id, \
                  COALESCE(NULLIF(category, ''), '{UNCATEGORIZED}') AS category, \
                  COALESCE(subcategory, '') AS subcategory, \
                  SUM(CASE WHEN amount > 0 AND is_transfer = 0 THEN amount ELSE 0 END) AS income, \
                  SUM(CASE WHEN amount < 0 AND is_transfer = 0 THEN -amount ELSE 0 END) AS expense \
           FROM transactions \
           WHERE substr(ts, 1, 7) = ?2{} \
           GROUP BY 1, 2, 3)",
        account_clause("account_id", 3, accounts)
    );
    let inserted = conn.execute(
        &insert,
        rusqlite::params_from_iter(params_with(&[month_value, month.month_key()], accounts)),
    )?;
    tracing::debug!(%month, rows = inserted, "rollup rebuilt");

    summary(conn, month, accounts)
}

// ---------------------------------------------------------------------------
// Read path
// ---------------------------------------------------------------------------

fn totals(conn: &Connection, month: Period, accounts: &[String]) -> Result<(f64, f64, f64)> {
    let sql = format!(
        "SELECT COALESCE(SUM(income), 0), COALESCE(SUM(expense), 0), COALESCE(SUM(net), 0) \
         FROM rollup_monthly WHERE month = ?1{}",
        account_clause("account_id", 2, accounts)
    );
    let row = conn.query_row(
        &sql,
        rusqlite::params_from_iter(params_with(&[month.to_string()], accounts)),
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    Ok(row)
}

pub fn summary(conn: &Connection, month: Period, accounts: &[String]) -> Result<RollupSummary> {
    let (income, expense, net) = totals(conn, month, accounts)?;
    let (_, _, previous_net) = totals(conn, month.previous(), accounts)?;
    let savings_rate = if income != 0.0 { net / income } else { 0.0 };

    Ok(RollupSummary {
        month: month.to_string(),
        income: round2(income),
        expense: round2(expense),
        net: round2(net),
        delta_mom: round2(net - previous_net),
        savings_rate: round4(savings_rate),
        rows: rollup_rows(conn, month, accounts)?,
    })
}

pub fn rollup_rows(conn: &Connection, month: Period, accounts: &[String]) -> Result<Vec<RollupRow>> {
    let sql = format!(
        "SELECT account_id, month, category, subcategory, income, expense, net \
         FROM rollup_monthly WHERE month = ?1{} \
         ORDER BY account_id, category, subcategory",
        account_clause("account_id", 2, accounts)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            rusqlite::params_from_iter(params_with(&[month.to_string()], accounts)),
            |row| {
                Ok(RollupRow {
                    account_id: row.get(0)?,
                    month: row.get(1)?,
                    category: row.get(2)?,
                    subcategory: row.get(3)?,
                    income: row.get(4)?,
                    expense: row.get(5)?,
                    net: row.get(6)?,
                })
            },
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Per-category totals across accounts, each with its subcategory lines.
pub fn breakdown(conn: &Connection, month: Period, accounts: &[String]) -> Result<Vec<CategoryBreakdown>> {
    let sql = format!(
        "SELECT category, subcategory, SUM(income), SUM(expense), SUM(net) \
         FROM rollup_monthly WHERE month = ?1{} \
         GROUP BY 1, 2 ORDER BY 1, 2",
        account_clause("account_id", 2, accounts)
    );
    let mut stmt = conn.prepare(&sql)?;
    let lines: Vec<(String, String, f64, f64, f64)> = stmt
        .query_map(
            rusqlite::params_from_iter(params_with(&[month.to_string()], accounts)),
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut out: Vec<CategoryBreakdown> = Vec::new();
    for (category, subcategory, income, expense, net) in lines {
        if out.last().map(|c| c.category != category).unwrap_or(true) {
            out.push(CategoryBreakdown {
                category: category.clone(),
                income: 0.0,
                expense: 0.0,
                net: 0.0,
                subcategories: Vec::new(),
            });
        }
        if let Some(entry) = out.last_mut() {
            entry.income += income;
            entry.expense += expense;
            entry.net += net;
            entry.subcategories.push(SubcategoryLine {
                subcategory,
                income: round2(income),
                expense: round2(expense),
                net: round2(net),
            });
        }
    }
    for entry in &mut out {
        entry.income = round2(entry.income);
        entry.expense = round2(entry.expense);
        entry.net = round2(entry.net);
    }
    Ok(out)
}

/// Non-transfer derived transactions of the month with no usable category.
pub fn uncategorized_count(conn: &Connection, month: Period, accounts: &[String]) -> Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM transactions \
         WHERE substr(ts, 1, 7) = ?1 AND is_transfer = 0 \
           AND (category IS NULL OR category = '' OR category = '{UNCATEGORIZED}'){}",
        account_clause("account_id", 2, accounts)
    );
    let count = conn.query_row(
        &sql,
        rusqlite::params_from_iter(params_with(&[month.month_key()], accounts)),
        |row| row.get(0),
    )?;
    Ok(count)
}
