use std::collections::HashMap;

use rusqlite::{Connection, Row};

use crate::error::{Result, TallyError};
use crate::models::{Effects, TransactionOverride, TransactionRecord};
use crate::period::Period;
use crate::reports;
use crate::rollup::{self, RollupSummary};

fn row_to_override(row: &Row) -> rusqlite::Result<TransactionOverride> {
    Ok(TransactionOverride {
        id: row.get(0)?,
        txn_id: row.get(1)?,
        effects: Effects {
            category: row.get(2)?,
            subcategory: row.get(3)?,
            is_transfer: row.get::<_, Option<i64>>(4)?.map(|v| v != 0),
        },
        note: row.get(5)?,
        created_at: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
    })
}

/// Oldest first.
pub fn overrides_for(conn: &Connection, txn_id: i64) -> Result<Vec<TransactionOverride>> {
    let mut stmt = conn.prepare(
        "SELECT id, txn_id, set_category, set_subcategory, set_is_transfer, note, created_at \
         FROM txn_overrides WHERE txn_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([txn_id], row_to_override)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Overrides of every transaction imported for `period`, keyed by
/// transaction id.
pub fn overrides_for_period(
    conn: &Connection,
    period: Period,
    user: &str,
) -> Result<HashMap<i64, Vec<TransactionOverride>>> {
    let mut stmt = conn.prepare(
        "SELECT o.id, o.txn_id, o.set_category, o.set_subcategory, o.set_is_transfer, o.note, o.created_at \
         FROM txn_overrides o \
         JOIN transactions_raw r ON r.id = o.txn_id \
         JOIN imports i ON i.id = r.import_batch_id \
         WHERE i.period_month = ?1 AND i.user_id = ?2 \
         ORDER BY o.id",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![period.to_string(), user], row_to_override)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut by_txn: HashMap<i64, Vec<TransactionOverride>> = HashMap::new();
    for ov in rows {
        by_txn.entry(ov.txn_id).or_default().push(ov);
    }
    Ok(by_txn)
}

pub fn record_override(conn: &Connection, txn_id: i64, effects: &Effects, note: Option<&str>) -> Result<i64> {
    conn.execute(
        "INSERT INTO txn_overrides (txn_id, set_category, set_subcategory, set_is_transfer, note) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            txn_id,
            effects.category,
            effects.subcategory,
            effects.is_transfer.map(|v| v as i32),
            note,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

// ---------------------------------------------------------------------------
// Manual edit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct TransactionEdit {
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub is_transfer: Option<bool>,
    pub note: Option<String>,
}

impl TransactionEdit {
    fn effects(&self) -> Effects {
        let clean = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Effects {
            category: clean(&self.category),
            subcategory: clean(&self.subcategory),
            is_transfer: self.is_transfer,
        }
    }
}

#[derive(Debug)]
pub struct EditResult {
    pub override_id: i64,
    pub transaction: TransactionRecord,
    pub rollup: RollupSummary,
}

/// Records the edit as an override, applies it to the derived row and
/// refreshes that month's rollup for the row's account.
pub fn edit_transaction(conn: &mut Connection, id: i64, edit: &TransactionEdit) -> Result<EditResult> {
    let effects = edit.effects();
    if effects == Effects::default() {
        return Err(TallyError::Other(
            "Nothing to change: pass a category, subcategory or transfer flag".to_string(),
        ));
    }

    let tx = conn.transaction()?;
    let before = reports::get_transaction(&tx, id)?;
    let override_id = record_override(&tx, id, &effects, edit.note.as_deref())?;
    tx.execute(
        "UPDATE transactions SET \
           category = COALESCE(?1, category), \
           subcategory = COALESCE(?2, subcategory), \
           is_transfer = COALESCE(?3, is_transfer) \
         WHERE id = ?4",
        rusqlite::params![
            effects.category,
            effects.subcategory,
            effects.is_transfer.map(|v| v as i32),
            id,
        ],
    )?;

    let month = Period::parse(before.month_key())?;
    let rollup = rollup::rebuild_in(&tx, month, std::slice::from_ref(&before.account_id))?;
    let transaction = reports::get_transaction(&tx, id)?;
    tx.commit()?;

    tracing::info!(txn_id = id, override_id, "transaction edited");
    Ok(EditResult {
        override_id,
        transaction,
        rollup,
    })
}
