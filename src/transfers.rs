use std::collections::BTreeSet;

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::db::placeholders;
use crate::error::{Result, TallyError};
use crate::models::{Effects, TransferProposal};
use crate::overrides::record_override;
use crate::period::Period;
use crate::reports;

const TRANSFER_KEYWORDS: &[&str] = &["virement", "transfer", "vir ", "transfert"];
const MAX_PROPOSALS: usize = 100;
const MAX_MATCHES: usize = 10;
const PAIR_WINDOW_DAYS: i64 = 1;
const MATCH_WINDOW_DAYS: i64 = 2;
const CONFIRM_NOTE: &str = "Confirmed as transfer";

/// A non-transfer transaction considered for pairing.
#[derive(Debug, Clone)]
pub struct TransferCandidate {
    pub id: i64,
    pub date: NaiveDate,
    pub account_id: String,
    pub amount: f64,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct TransferMatch {
    pub id: i64,
    pub date: String,
    pub account_id: String,
    pub amount: f64,
    pub description: String,
    pub date_difference_days: i64,
    pub confidence: f64,
}

#[derive(Debug)]
pub struct ConfirmResult {
    pub confirmed_transactions: usize,
    pub confirmed_pairs: usize,
    /// (month, account) pairs whose rollups no longer reflect the flags.
    pub affected: BTreeSet<(Period, String)>,
}

fn cents(amount: f64) -> i64 {
    (amount.abs() * 100.0).round() as i64
}

pub fn has_transfer_keyword(description: &str) -> bool {
    let lower = description.to_lowercase();
    TRANSFER_KEYWORDS.iter().any(|k| lower.contains(k))
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Pair confidence. Amounts always match exactly for a proposed pair.
pub fn transfer_confidence(date_diff: i64, has_keyword: bool) -> f64 {
    let mut confidence: f64 = 0.5;
    if date_diff == 0 {
        confidence += 0.3;
    }
    if has_keyword {
        confidence += 0.2;
    }
    confidence += 0.1;
    round2(confidence.min(1.0))
}

pub fn match_confidence(date_diff: i64, has_keyword: bool) -> f64 {
    let mut confidence: f64 = 0.3;
    match date_diff {
        0 => confidence += 0.4,
        1 => confidence += 0.2,
        _ => {}
    }
    if has_keyword {
        confidence += 0.3;
    }
    round2(confidence.min(1.0))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Proposals
// ---------------------------------------------------------------------------

/// Pairs transactions of equal absolute amount and opposite sign on
/// different accounts at most one day apart.
pub fn pair_candidates(candidates: &[TransferCandidate]) -> Vec<TransferProposal> {
    let mut proposals = Vec::new();
    for a in candidates {
        for b in candidates {
            if a.id >= b.id
                || a.account_id == b.account_id
                || a.amount * b.amount >= 0.0
                || cents(a.amount) != cents(b.amount)
            {
                continue;
            }
            let diff = (b.date - a.date).num_days().abs();
            if diff > PAIR_WINDOW_DAYS {
                continue;
            }
            let keyword = has_transfer_keyword(&a.description) || has_transfer_keyword(&b.description);
            proposals.push(TransferProposal {
                transaction_ids: (a.id, b.id),
                date: a.date.format("%Y-%m-%d").to_string(),
                from_account: a.account_id.clone(),
                to_account: b.account_id.clone(),
                amount: a.amount.abs(),
                descriptions: (a.description.clone(), b.description.clone()),
                date_difference_days: diff,
                confidence: transfer_confidence(diff, keyword),
            });
        }
    }
    proposals.sort_by(|x, y| {
        x.date_difference_days
            .cmp(&y.date_difference_days)
            .then_with(|| y.amount.total_cmp(&x.amount))
            .then_with(|| x.transaction_ids.cmp(&y.transaction_ids))
    });
    proposals.truncate(MAX_PROPOSALS);
    proposals
}

fn parse_day(ts: &str) -> rusqlite::Result<NaiveDate> {
    let day = ts.get(..10).unwrap_or(ts);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_candidate(row: &Row) -> rusqlite::Result<TransferCandidate> {
    let ts: String = row.get(1)?;
    Ok(TransferCandidate {
        id: row.get(0)?,
        date: parse_day(&ts)?,
        account_id: row.get(2)?,
        amount: row.get(3)?,
        description: row.get(4)?,
    })
}

pub fn propose_transfers(conn: &Connection, month: Period, accounts: &[String]) -> Result<Vec<TransferProposal>> {
    let mut sql = String::from(
        "SELECT id, ts, account_id, amount, description FROM transactions \
         WHERE substr(ts, 1, 7) = ?1 AND is_transfer = 0",
    );
    if !accounts.is_empty() {
        sql.push_str(&format!(" AND account_id IN ({})", placeholders(2, accounts.len())));
    }
    sql.push_str(" ORDER BY id");

    let mut params = vec![month.month_key()];
    params.extend(accounts.iter().cloned());
    let mut stmt = conn.prepare(&sql)?;
    let candidates = stmt
        .query_map(rusqlite::params_from_iter(params), row_to_candidate)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let proposals = pair_candidates(&candidates);
    tracing::info!(%month, candidates = candidates.len(), proposals = proposals.len(), "transfer proposals computed");
    Ok(proposals)
}

/// Counterparts for one transaction within two days, best first.
pub fn potential_transfers(conn: &Connection, txn_id: i64) -> Result<Vec<TransferMatch>> {
    let target = conn
        .query_row(
            "SELECT id, ts, account_id, amount, description, is_transfer FROM transactions WHERE id = ?1",
            [txn_id],
            |row| Ok((row_to_candidate(row)?, row.get::<_, i64>(5)? != 0)),
        )
        .optional()?
        .ok_or(TallyError::UnknownTransaction(txn_id))?;
    let (target, already_transfer) = target;
    if already_transfer {
        return Ok(Vec::new());
    }

    let day = target.date.format("%Y-%m-%d").to_string();
    let mut stmt = conn.prepare(
        "SELECT id, ts, account_id, amount, description FROM transactions \
         WHERE is_transfer = 0 AND account_id <> ?1 AND amount * ?2 < 0 \
           AND date(substr(ts, 1, 10)) BETWEEN date(?3, ?4) AND date(?3, ?5) \
         ORDER BY id",
    )?;
    let rows = stmt
        .query_map(
            rusqlite::params![
                target.account_id,
                target.amount,
                day,
                format!("-{MATCH_WINDOW_DAYS} days"),
                format!("+{MATCH_WINDOW_DAYS} days"),
            ],
            row_to_candidate,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let target_keyword = has_transfer_keyword(&target.description);
    let mut matches: Vec<TransferMatch> = rows
        .into_iter()
        .filter(|c| cents(c.amount) == cents(target.amount))
        .map(|c| {
            let diff = (c.date - target.date).num_days().abs();
            let keyword = target_keyword || has_transfer_keyword(&c.description);
            TransferMatch {
                id: c.id,
                date: c.date.format("%Y-%m-%d").to_string(),
                account_id: c.account_id,
                amount: c.amount,
                description: c.description,
                date_difference_days: diff,
                confidence: match_confidence(diff, keyword),
            }
        })
        .collect();
    matches.sort_by(|x, y| {
        x.date_difference_days
            .cmp(&y.date_difference_days)
            .then_with(|| y.amount.abs().total_cmp(&x.amount.abs()))
            .then_with(|| x.id.cmp(&y.id))
    });
    matches.truncate(MAX_MATCHES);
    Ok(matches)
}

// ---------------------------------------------------------------------------
// Confirmation
// ---------------------------------------------------------------------------

/// Flags both sides of every pair as transfers, all or nothing. Rollups are
/// left for the caller to rebuild from `affected`.
pub fn confirm_transfers(conn: &mut Connection, pairs: &[(i64, i64)]) -> Result<ConfirmResult> {
    let tx = conn.transaction()?;
    let effects = Effects {
        is_transfer: Some(true),
        ..Effects::default()
    };
    let mut affected = BTreeSet::new();
    let mut confirmed_transactions = 0;

    for &(first, second) in pairs {
        for id in [first, second] {
            let txn = reports::get_transaction(&tx, id)?;
            record_override(&tx, id, &effects, Some(CONFIRM_NOTE))?;
            tx.execute("UPDATE transactions SET is_transfer = 1 WHERE id = ?1", [id])?;
            affected.insert((Period::parse(txn.month_key())?, txn.account_id));
            confirmed_transactions += 1;
        }
    }
    tx.commit()?;

    tracing::info!(pairs = pairs.len(), transactions = confirmed_transactions, "transfers confirmed");
    Ok(ConfirmResult {
        confirmed_transactions,
        confirmed_pairs: pairs.len(),
        affected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::rollup::tests::insert_txn;

    fn candidate(id: i64, day: u32, account: &str, amount: f64, description: &str) -> TransferCandidate {
        TransferCandidate {
            id,
            date: NaiveDate::from_ymd_opt(2025, 7, day).unwrap(),
            account_id: account.to_string(),
            amount,
            description: description.to_string(),
        }
    }

    #[test]
    fn test_confidence_scores() {
        assert_eq!(transfer_confidence(1, false), 0.6);
        assert_eq!(transfer_confidence(1, true), 0.8);
        assert_eq!(transfer_confidence(0, false), 0.9);
        assert_eq!(transfer_confidence(0, true), 1.0);
        assert_eq!(match_confidence(0, false), 0.7);
        assert_eq!(match_confidence(1, false), 0.5);
        assert_eq!(match_confidence(2, true), 0.6);
        assert_eq!(match_confidence(0, true), 1.0);
    }

    #[test]
    fn test_pair_next_day_opposite_amounts() {
        let proposals = pair_candidates(&[
            candidate(1, 10, "A", -45.0, "CB SHOP"),
            candidate(2, 11, "B", 45.0, "INCOMING"),
        ]);
        assert_eq!(proposals.len(), 1);
        let p = &proposals[0];
        assert_eq!(p.transaction_ids, (1, 2));
        assert_eq!(p.date_difference_days, 1);
        assert_eq!(p.confidence, 0.6);
        assert_eq!(p.from_account, "A");
        assert_eq!(p.to_account, "B");
        assert_eq!(p.amount, 45.0);

        let with_keyword = pair_candidates(&[
            candidate(1, 10, "A", -45.0, "VIREMENT VERS B"),
            candidate(2, 11, "B", 45.0, "INCOMING"),
        ]);
        assert_eq!(with_keyword[0].confidence, 0.8);
    }

    #[test]
    fn test_pairing_rules() {
        let same_account = [candidate(1, 10, "A", -45.0, ""), candidate(2, 10, "A", 45.0, "")];
        let two_days_apart = [candidate(1, 10, "A", -45.0, ""), candidate(2, 12, "B", 45.0, "")];
        let same_sign = [candidate(1, 10, "A", -45.0, ""), candidate(2, 10, "B", -45.0, "")];
        let other_amount = [candidate(1, 10, "A", -45.0, ""), candidate(2, 10, "B", 45.01, "")];
        for set in [same_account, two_days_apart, same_sign, other_amount] {
            assert!(pair_candidates(&set).is_empty());
        }
        let cents_equal = [candidate(1, 10, "A", -45.004, ""), candidate(2, 10, "B", 45.0, "")];
        assert_eq!(pair_candidates(&cents_equal).len(), 1);
    }

    #[test]
    fn test_ranking_prefers_same_day_then_larger_amounts() {
        let proposals = pair_candidates(&[
            candidate(1, 10, "A", -10.0, ""),
            candidate(2, 11, "B", 10.0, ""),
            candidate(3, 10, "A", -20.0, ""),
            candidate(4, 10, "B", 20.0, ""),
            candidate(5, 10, "A", -500.0, ""),
            candidate(6, 11, "B", 500.0, ""),
        ]);
        let ids: Vec<(i64, i64)> = proposals.iter().map(|p| p.transaction_ids).collect();
        assert_eq!(ids, vec![(3, 4), (5, 6), (1, 2)]);
    }

    #[test]
    fn test_propose_from_store_skips_transfers() {
        let (_dir, conn) = test_db();
        insert_txn(&conn, "2025-07-10 09:00:00", "BNP", "VIR VERS REVOLUT", -100.0, None, None, false);
        insert_txn(&conn, "2025-07-10 18:00:00", "Revolut", "TOP-UP", 100.0, None, None, false);
        insert_txn(&conn, "2025-07-20 00:00:00", "BNP", "OLD", -50.0, None, None, true);
        insert_txn(&conn, "2025-07-20 00:00:00", "Revolut", "OLD", 50.0, None, None, false);

        let july = Period::new(2025, 7).unwrap();
        let proposals = propose_transfers(&conn, july, &[]).unwrap();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].confidence, 1.0);
        assert!(propose_transfers(&conn, july, &["BNP".to_string()]).unwrap().is_empty());
    }

    #[test]
    fn test_potential_transfers_window() {
        let (_dir, conn) = test_db();
        let target = insert_txn(&conn, "2025-07-10 00:00:00", "BNP", "VIREMENT", -75.0, None, None, false);
        let near = insert_txn(&conn, "2025-07-11 00:00:00", "Revolut", "IN", 75.0, None, None, false);
        let edge = insert_txn(&conn, "2025-07-12 00:00:00", "Boursorama", "IN", 75.0, None, None, false);
        insert_txn(&conn, "2025-07-13 00:00:00", "Revolut", "TOO LATE", 75.0, None, None, false);
        insert_txn(&conn, "2025-07-10 00:00:00", "BNP", "SAME ACCOUNT", 75.0, None, None, false);

        let matches = potential_transfers(&conn, target).unwrap();
        let ids: Vec<i64> = matches.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![near, edge]);
        assert_eq!(matches[0].confidence, 0.8);
        assert_eq!(matches[1].confidence, 0.6);

        assert!(matches!(potential_transfers(&conn, 999), Err(TallyError::UnknownTransaction(999))));
    }

    #[test]
    fn test_confirm_transfers() {
        let (_dir, mut conn) = test_db();
        let a = insert_txn(&conn, "2025-07-10 00:00:00", "BNP", "VIR", -100.0, None, None, false);
        let b = insert_txn(&conn, "2025-07-10 00:00:00", "Revolut", "IN", 100.0, None, None, false);
        let result = confirm_transfers(&mut conn, &[(a, b)]).unwrap();
        assert_eq!(result.confirmed_transactions, 2);
        assert_eq!(result.confirmed_pairs, 1);
        assert_eq!(result.affected.len(), 2);
        assert!(reports::get_transaction(&conn, a).unwrap().is_transfer);
        let notes: Vec<Option<String>> = crate::overrides::overrides_for(&conn, b)
            .unwrap()
            .into_iter()
            .map(|o| o.note)
            .collect();
        assert_eq!(notes, vec![Some(CONFIRM_NOTE.to_string())]);
    }

    #[test]
    fn test_confirm_unknown_id_rolls_back() {
        let (_dir, mut conn) = test_db();
        let a = insert_txn(&conn, "2025-07-10 00:00:00", "BNP", "VIR", -100.0, None, None, false);
        let err = confirm_transfers(&mut conn, &[(a, 999)]).unwrap_err();
        assert!(matches!(err, TallyError::UnknownTransaction(999)));
        assert!(!reports::get_transaction(&conn, a).unwrap().is_transfer);
        let count: i64 = conn.query_row("SELECT count(*) FROM txn_overrides", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
    }
}
