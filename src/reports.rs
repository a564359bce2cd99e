use rusqlite::{Connection, OptionalExtension, Row};

use crate::db::placeholders;
use crate::error::{Result, TallyError};
use crate::models::TransactionRecord;
use crate::period::Period;
use crate::rollup::{self, CategoryBreakdown, RollupSummary, UNCATEGORIZED};

pub const MAX_PAGE_SIZE: usize = 1000;
const DEFAULT_PAGE_SIZE: usize = 100;

// ---------------------------------------------------------------------------
// P&L
// ---------------------------------------------------------------------------

pub struct PlReport {
    pub summary: RollupSummary,
    pub categories: Vec<CategoryBreakdown>,
    pub uncategorized_count: i64,
}

/// Rebuilds the month's rollup, then reads the summary and per-category
/// breakdown back from it.
pub fn pl_summary(conn: &mut Connection, month: Period, accounts: &[String]) -> Result<PlReport> {
    let summary = rollup::rebuild(conn, month, accounts)?;
    let categories = rollup::breakdown(conn, month, accounts)?;
    let uncategorized_count = rollup::uncategorized_count(conn, month, accounts)?;
    Ok(PlReport {
        summary,
        categories,
        uncategorized_count,
    })
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

const TXN_COLUMNS: &str = "id, ts, account_id, account_label, description, merchant, category, \
                           subcategory, amount, currency, is_transfer, source_file";

fn row_to_record(row: &Row) -> rusqlite::Result<TransactionRecord> {
    Ok(TransactionRecord {
        id: row.get(0)?,
        ts: row.get(1)?,
        account_id: row.get(2)?,
        account_label: row.get(3)?,
        description: row.get(4)?,
        merchant: row.get(5)?,
        category: row.get(6)?,
        subcategory: row.get(7)?,
        amount: row.get(8)?,
        currency: row.get(9)?,
        is_transfer: row.get::<_, i64>(10)? != 0,
        source_file: row.get(11)?,
    })
}

pub fn get_transaction(conn: &Connection, id: i64) -> Result<TransactionRecord> {
    conn.query_row(
        &format!("SELECT {TXN_COLUMNS} FROM transactions WHERE id = ?1"),
        [id],
        row_to_record,
    )
    .optional()?
    .ok_or(TallyError::UnknownTransaction(id))
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub month: Option<Period>,
    pub accounts: Vec<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub merchant: Option<String>,
    pub uncategorized_only: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

pub struct TransactionPage {
    pub transactions: Vec<TransactionRecord>,
    pub total_count: i64,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

fn filter_clause(filter: &TransactionFilter) -> (String, Vec<String>) {
    let mut conditions: Vec<String> = Vec::new();
    let mut params: Vec<String> = Vec::new();

    if let Some(month) = filter.month {
        params.push(month.month_key());
        conditions.push(format!("substr(ts, 1, 7) = ?{}", params.len()));
    }
    if !filter.accounts.is_empty() {
        conditions.push(format!(
            "account_id IN ({})",
            placeholders(params.len() + 1, filter.accounts.len())
        ));
        params.extend(filter.accounts.iter().cloned());
    }
    if filter.uncategorized_only {
        conditions.push(format!(
            "(category IS NULL OR category = '' OR category = '{UNCATEGORIZED}') AND is_transfer = 0"
        ));
    } else {
        if let Some(category) = &filter.category {
            params.push(category.clone());
            conditions.push(format!("category = ?{}", params.len()));
        }
        if let Some(subcategory) = &filter.subcategory {
            params.push(subcategory.clone());
            conditions.push(format!("subcategory = ?{}", params.len()));
        }
    }
    if let Some(merchant) = &filter.merchant {
        params.push(format!("%{}%", merchant.to_lowercase()));
        conditions.push(format!("lower(COALESCE(merchant, '')) LIKE ?{}", params.len()));
    }

    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    (clause, params)
}

/// Newest first. `limit` is capped at [`MAX_PAGE_SIZE`].
pub fn list_transactions(conn: &Connection, filter: &TransactionFilter) -> Result<TransactionPage> {
    let limit = filter.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let (clause, params) = filter_clause(filter);

    let total_count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM transactions{clause}"),
        rusqlite::params_from_iter(params.iter()),
        |row| row.get(0),
    )?;

    let sql = format!(
        "SELECT {TXN_COLUMNS} FROM transactions{clause} ORDER BY ts DESC, id DESC LIMIT {limit} OFFSET {}",
        filter.offset
    );
    let mut stmt = conn.prepare(&sql)?;
    let transactions = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), row_to_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let has_more = (filter.offset + transactions.len()) < total_count as usize;
    Ok(TransactionPage {
        transactions,
        total_count,
        limit,
        offset: filter.offset,
        has_more,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::rollup::tests::insert_txn;

    fn july() -> Period {
        Period::new(2025, 7).unwrap()
    }

    fn seed(conn: &Connection) {
        insert_txn(conn, "2025-07-01 00:00:00", "BNP", "SALAIRE", 2000.0, Some("Income"), Some("Salary"), false);
        insert_txn(conn, "2025-07-02 00:00:00", "BNP", "CB CARREFOUR", -40.0, Some("Food"), Some("Groceries"), false);
        insert_txn(conn, "2025-07-03 00:00:00", "Revolut", "CARREFOUR CITY", -10.0, None, None, false);
        insert_txn(conn, "2025-07-04 00:00:00", "BNP", "VIR LIVRET", -300.0, None, None, true);
        insert_txn(conn, "2025-08-01 00:00:00", "BNP", "AUGUST", -1.0, None, None, false);
    }

    #[test]
    fn test_pl_summary_rebuilds_first() {
        let (_dir, mut conn) = test_db();
        seed(&conn);
        let report = pl_summary(&mut conn, july(), &[]).unwrap();
        assert_eq!(report.summary.income, 2000.0);
        assert_eq!(report.summary.expense, 50.0);
        assert_eq!(report.summary.net, 1950.0);
        assert_eq!(report.uncategorized_count, 1);
        let names: Vec<&str> = report.categories.iter().map(|c| c.category.as_str()).collect();
        assert_eq!(names, vec!["Food", "Income", UNCATEGORIZED]);
    }

    #[test]
    fn test_pl_summary_account_filter() {
        let (_dir, mut conn) = test_db();
        seed(&conn);
        let report = pl_summary(&mut conn, july(), &["Revolut".to_string()]).unwrap();
        assert_eq!(report.summary.income, 0.0);
        assert_eq!(report.summary.expense, 10.0);
        assert_eq!(report.summary.savings_rate, 0.0);
    }

    #[test]
    fn test_list_transactions_filters() {
        let (_dir, conn) = test_db();
        seed(&conn);

        let all_july = list_transactions(&conn, &TransactionFilter { month: Some(july()), ..Default::default() }).unwrap();
        assert_eq!(all_july.total_count, 4);
        assert_eq!(all_july.transactions[0].description, "VIR LIVRET");
        assert!(!all_july.has_more);

        let uncategorized = list_transactions(
            &conn,
            &TransactionFilter { month: Some(july()), uncategorized_only: true, ..Default::default() },
        )
        .unwrap();
        assert_eq!(uncategorized.total_count, 1);
        assert_eq!(uncategorized.transactions[0].account_id, "Revolut");

        let carrefour = list_transactions(
            &conn,
            &TransactionFilter { merchant: Some("Carrefour".to_string()), ..Default::default() },
        )
        .unwrap();
        assert_eq!(carrefour.total_count, 2);

        let food = list_transactions(
            &conn,
            &TransactionFilter {
                category: Some("Food".to_string()),
                accounts: vec!["BNP".to_string()],
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(food.total_count, 1);
        assert_eq!(food.transactions[0].subcategory.as_deref(), Some("Groceries"));
    }

    #[test]
    fn test_list_transactions_pagination() {
        let (_dir, conn) = test_db();
        seed(&conn);
        let page = list_transactions(&conn, &TransactionFilter { limit: Some(2), ..Default::default() }).unwrap();
        assert_eq!(page.transactions.len(), 2);
        assert_eq!(page.total_count, 5);
        assert!(page.has_more);
        assert_eq!(page.transactions[0].description, "AUGUST");

        let last = list_transactions(&conn, &TransactionFilter { limit: Some(2), offset: 4, ..Default::default() }).unwrap();
        assert_eq!(last.transactions.len(), 1);
        assert!(!last.has_more);

        let capped = list_transactions(&conn, &TransactionFilter { limit: Some(50_000), ..Default::default() }).unwrap();
        assert_eq!(capped.limit, MAX_PAGE_SIZE);
    }

    #[test]
    fn test_get_transaction() {
        let (_dir, conn) = test_db();
        let id = insert_txn(&conn, "2025-07-01 00:00:00", "BNP", "X", -1.0, None, None, true);
        let txn = get_transaction(&conn, id).unwrap();
        assert!(txn.is_transfer);
        assert_eq!(txn.month_key(), "2025-07");
        assert!(matches!(get_transaction(&conn, 999), Err(TallyError::UnknownTransaction(999))));
    }
}
