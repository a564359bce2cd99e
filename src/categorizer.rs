use std::collections::{BTreeSet, HashMap};

use regex::Regex;
use rusqlite::{Connection, TransactionBehavior};

use crate::error::{Result, TallyError};
use crate::ledger;
use crate::models::{
    CategoryRule, ClassificationSource, DerivedTransaction, Effects, RawTransaction, RuleField,
    RuleOperator, TransactionOverride, EXTRA_BALANCE, EXTRA_CATEGORY_HINT, EXTRA_SUBCATEGORY_HINT,
    TS_FORMAT,
};
use crate::overrides;
use crate::period::Period;
use crate::rollup;
use crate::rules;

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// A rule pattern prepared for repeated evaluation. Patterns are compared
/// case-insensitively; regexes are compiled once.
pub(crate) struct RuleMatcher {
    field: RuleField,
    operator: RuleOperator,
    needle: String,
    regex: Option<Regex>,
}

impl RuleMatcher {
    /// `None` when a regex pattern does not compile.
    pub(crate) fn new(rule_id: i64, field: RuleField, operator: RuleOperator, pattern: &str) -> Option<Self> {
        let regex = match operator {
            RuleOperator::Regex => match Regex::new(&format!("(?i){pattern}")) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(rule_id, pattern, error = %e, "invalid rule regex, rule will never match");
                    return None;
                }
            },
            _ => None,
        };
        Some(Self {
            field,
            operator,
            needle: pattern.to_lowercase(),
            regex,
        })
    }

    pub(crate) fn matches(&self, description: &str, merchant: &str) -> bool {
        let value = match self.field {
            RuleField::Merchant => merchant,
            RuleField::Description => description,
        };
        if value.trim().is_empty() {
            return false;
        }
        if let Some(re) = &self.regex {
            return re.is_match(value);
        }
        let value = value.to_lowercase();
        match self.operator {
            RuleOperator::Contains => value.contains(&self.needle),
            RuleOperator::StartsWith => value.starts_with(&self.needle),
            RuleOperator::Equals => value == self.needle,
            RuleOperator::Regex => false,
        }
    }
}

fn compile(rules: &[CategoryRule]) -> Vec<(&CategoryRule, RuleMatcher)> {
    let mut active: Vec<&CategoryRule> = rules.iter().filter(|r| r.active).collect();
    active.sort_by(|a, b| rules::evaluation_order(a, b));
    active
        .into_iter()
        .filter_map(|rule| {
            RuleMatcher::new(rule.id, rule.field, rule.operator, &rule.pattern).map(|m| (rule, m))
        })
        .collect()
}

fn set_if_present(slot: &mut Option<String>, value: &Option<String>) -> bool {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => {
            *slot = Some(v.to_string());
            true
        }
        _ => false,
    }
}

fn apply(derived: &mut DerivedTransaction, effects: &Effects) -> bool {
    let mut applied = set_if_present(&mut derived.category, &effects.category);
    applied |= set_if_present(&mut derived.subcategory, &effects.subcategory);
    if let Some(flag) = effects.is_transfer {
        derived.is_transfer = flag;
        applied = true;
    }
    applied
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

fn seed(raw: &RawTransaction) -> DerivedTransaction {
    let id = raw.id.unwrap_or_default();
    DerivedTransaction {
        id,
        raw_id: id,
        import_batch_id: raw.import_batch_id.unwrap_or_default(),
        ts: raw.ts,
        account_id: raw.bank.clone(),
        account_label: raw.account_label.clone(),
        description: raw.description.clone(),
        merchant: raw.merchant.clone(),
        amount: raw.amount,
        currency: raw.currency.clone(),
        balance: raw.extra_value(EXTRA_BALANCE).and_then(|b| b.parse().ok()),
        category: None,
        subcategory: None,
        is_transfer: false,
        source_file: raw.source_file.clone().unwrap_or_default(),
        source: ClassificationSource::Unclassified,
        matched_rule: None,
    }
}

/// Derives one classified transaction per raw row.
///
/// Precedence, lowest to highest: the bank's own category hint, otherwise
/// the first matching active rule, then the latest manual override.
pub fn classify(
    raws: &[RawTransaction],
    rules: &[CategoryRule],
    overrides: &HashMap<i64, Vec<TransactionOverride>>,
) -> Vec<DerivedTransaction> {
    let compiled = compile(rules);

    raws.iter()
        .map(|raw| {
            let mut derived = seed(raw);

            if let Some(hint) = raw.extra_value(EXTRA_CATEGORY_HINT) {
                derived.category = Some(hint.to_string());
                derived.subcategory = raw.extra_value(EXTRA_SUBCATEGORY_HINT).map(str::to_string);
                derived.source = ClassificationSource::Hint;
            } else if let Some((rule, _)) = compiled
                .iter()
                .find(|(_, m)| m.matches(&raw.description, &raw.merchant))
            {
                apply(&mut derived, &rule.effects);
                derived.source = ClassificationSource::Rule(rule.id);
                derived.matched_rule = Some(rule.id);
            }

            let latest = overrides
                .get(&derived.id)
                .and_then(|list| list.iter().max_by_key(|o| o.id));
            if let Some(ov) = latest {
                if apply(&mut derived, &ov.effects) {
                    derived.source = ClassificationSource::Override;
                }
            }
            derived
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct CommitResult {
    pub period: Period,
    pub accounts_processed: Vec<String>,
    pub transactions_derived: usize,
    pub rules_applied: usize,
    pub rollup_updated: bool,
    pub uncategorized_count: i64,
}

fn insert_derived(conn: &Connection, txn: &DerivedTransaction, user: &str) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO transactions \
         (id, raw_id, ts, account_id, account_label, description, merchant, category, subcategory, \
          amount, currency, balance, is_transfer, source_file, import_batch_id, user_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
    )?;
    stmt.execute(rusqlite::params![
        txn.id,
        txn.raw_id,
        txn.ts.format(TS_FORMAT).to_string(),
        txn.account_id,
        txn.account_label,
        txn.description,
        txn.merchant,
        txn.category,
        txn.subcategory,
        txn.amount,
        txn.currency,
        txn.balance,
        txn.is_transfer as i32,
        txn.source_file,
        txn.import_batch_id,
        user,
    ])?;
    Ok(())
}

fn derived_months(conn: &Connection, period: Period, accounts: &[String], user: &str) -> Result<Vec<String>> {
    let sql = format!(
        "SELECT DISTINCT substr(ts, 1, 7) FROM transactions \
         WHERE user_id = ?2 AND account_id IN ({}) \
           AND import_batch_id IN (SELECT id FROM imports WHERE period_month = ?1 AND user_id = ?2)",
        crate::db::placeholders(3, accounts.len())
    );
    let mut params = vec![period.to_string(), user.to_string()];
    params.extend(accounts.iter().cloned());
    let mut stmt = conn.prepare(&sql)?;
    let months = stmt
        .query_map(rusqlite::params_from_iter(params), |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(months)
}

fn delete_derived(conn: &Connection, period: Period, accounts: &[String], user: &str) -> Result<usize> {
    let sql = format!(
        "DELETE FROM transactions \
         WHERE user_id = ?2 AND account_id IN ({}) \
           AND import_batch_id IN (SELECT id FROM imports WHERE period_month = ?1 AND user_id = ?2)",
        crate::db::placeholders(3, accounts.len())
    );
    let mut params = vec![period.to_string(), user.to_string()];
    params.extend(accounts.iter().cloned());
    Ok(conn.execute(&sql, rusqlite::params_from_iter(params))?)
}

/// Re-derives every transaction imported for `period` and refreshes the
/// rollups of each month they fall in, in one transaction.
///
/// With no `accounts`, every bank imported for the period is processed.
pub fn commit_period(
    conn: &mut Connection,
    period: Period,
    accounts: &[String],
    user: &str,
) -> Result<CommitResult> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let accounts = if accounts.is_empty() {
        ledger::banks_for_period(&tx, period, user)?
    } else {
        accounts.to_vec()
    };
    let raws = ledger::raw_for_period(&tx, period, user, &accounts)?;
    if raws.is_empty() {
        return Err(TallyError::NoRawTransactions(period.month_key()));
    }

    let rules = rules::active_rules(&tx)?;
    let overrides = overrides::overrides_for_period(&tx, period, user)?;
    let derived = classify(&raws, &rules, &overrides);

    let mut months: BTreeSet<String> = derived_months(&tx, period, &accounts, user)?.into_iter().collect();
    let removed = delete_derived(&tx, period, &accounts, user)?;
    tracing::debug!(%period, removed, "previous derived rows removed");

    let mut hits: HashMap<i64, i64> = HashMap::new();
    for txn in &derived {
        insert_derived(&tx, txn, user)?;
        months.insert(txn.ts.format("%Y-%m").to_string());
        if let Some(id) = txn.matched_rule {
            *hits.entry(id).or_default() += 1;
        }
    }
    for (rule_id, count) in &hits {
        tx.execute(
            "UPDATE category_rules SET hit_count = hit_count + ?1 WHERE id = ?2",
            rusqlite::params![count, rule_id],
        )?;
    }

    months.insert(period.month_key());
    for month in &months {
        rollup::rebuild_in(&tx, Period::parse(month)?, &accounts)?;
    }

    let uncategorized_count = rollup::uncategorized_count(&tx, period, &accounts)?;
    tx.commit()?;

    let result = CommitResult {
        period,
        accounts_processed: accounts,
        transactions_derived: derived.len(),
        rules_applied: hits.values().sum::<i64>() as usize,
        rollup_updated: true,
        uncategorized_count,
    };
    tracing::info!(
        %period,
        derived = result.transactions_derived,
        rules_applied = result.rules_applied,
        months = months.len(),
        uncategorized = uncategorized_count,
        "period committed"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::NaiveDate;

    use super::*;
    use crate::db::test_db;
    use crate::importer::BankKind;

    fn raw(id: i64, description: &str, amount: f64) -> RawTransaction {
        RawTransaction {
            id: Some(id),
            import_batch_id: Some(1),
            bank: "BNP".to_string(),
            ts: NaiveDate::from_ymd_opt(2025, 7, 3).unwrap().and_hms_opt(0, 0, 0).unwrap(),
            description: description.to_string(),
            merchant: description.to_uppercase(),
            amount_raw: amount.to_string(),
            amount,
            currency: "EUR".to_string(),
            account_label: "Compte".to_string(),
            extra: BTreeMap::new(),
            source_file: Some("a.csv".to_string()),
        }
    }

    fn rule(id: i64, operator: RuleOperator, pattern: &str, category: &str, priority: i64) -> CategoryRule {
        CategoryRule {
            id,
            field: RuleField::Description,
            operator,
            pattern: pattern.to_string(),
            effects: Effects {
                category: Some(category.to_string()),
                ..Effects::default()
            },
            priority,
            active: true,
            hit_count: 0,
            created_at: format!("2025-01-0{id} 00:00:00"),
        }
    }

    fn override_for(id: i64, txn_id: i64, category: Option<&str>, is_transfer: Option<bool>) -> TransactionOverride {
        TransactionOverride {
            id,
            txn_id,
            effects: Effects {
                category: category.map(str::to_string),
                subcategory: None,
                is_transfer,
            },
            note: None,
            created_at: String::new(),
        }
    }

    #[test]
    fn test_operators() {
        let m = |op, pattern| RuleMatcher::new(1, RuleField::Description, op, pattern).unwrap();
        assert!(m(RuleOperator::Contains, "carre").matches("CB Carrefour", ""));
        assert!(m(RuleOperator::StartsWith, "cb ").matches("CB Carrefour", ""));
        assert!(!m(RuleOperator::StartsWith, "carrefour").matches("CB Carrefour", ""));
        assert!(m(RuleOperator::Equals, "cb carrefour").matches("CB CARREFOUR", ""));
        assert!(m(RuleOperator::Regex, r"carre\w+").matches("cb CARREFOUR", ""));
        assert!(!m(RuleOperator::Contains, "x").matches("   ", ""));
    }

    #[test]
    fn test_invalid_regex_never_matches() {
        assert!(RuleMatcher::new(1, RuleField::Description, RuleOperator::Regex, "([").is_none());
        let raws = vec![raw(1, "anything", -1.0)];
        let rules = vec![rule(1, RuleOperator::Regex, "([", "Broken", 9), rule(2, RuleOperator::Contains, "any", "Ok", 1)];
        let derived = classify(&raws, &rules, &HashMap::new());
        assert_eq!(derived[0].category.as_deref(), Some("Ok"));
    }

    #[test]
    fn test_highest_priority_wins_and_ties_go_to_oldest() {
        let raws = vec![raw(1, "PAYMENT RECEIVED", 10.0)];
        let rules = vec![
            rule(1, RuleOperator::Contains, "payment", "Low", 1),
            rule(2, RuleOperator::Contains, "payment", "High", 10),
            rule(3, RuleOperator::Contains, "payment", "HighNewer", 10),
        ];
        let derived = classify(&raws, &rules, &HashMap::new());
        assert_eq!(derived[0].category.as_deref(), Some("High"));
        assert_eq!(derived[0].source, ClassificationSource::Rule(2));

        let mut reversed = rules.clone();
        reversed.reverse();
        let derived = classify(&raws, &reversed, &HashMap::new());
        assert_eq!(derived[0].category.as_deref(), Some("High"));
    }

    #[test]
    fn test_hint_beats_rules() {
        let mut hinted = raw(1, "CARTE FRANPRIX", -12.3);
        hinted.extra.insert(EXTRA_CATEGORY_HINT.to_string(), "Vie quotidienne".to_string());
        hinted.extra.insert(EXTRA_SUBCATEGORY_HINT.to_string(), "Alimentation".to_string());
        let rules = vec![rule(1, RuleOperator::Contains, "franprix", "Food", 100)];
        let derived = classify(&[hinted], &rules, &HashMap::new());
        assert_eq!(derived[0].category.as_deref(), Some("Vie quotidienne"));
        assert_eq!(derived[0].subcategory.as_deref(), Some("Alimentation"));
        assert_eq!(derived[0].source, ClassificationSource::Hint);
    }

    #[test]
    fn test_latest_override_wins() {
        let mut hinted = raw(7, "CARTE FRANPRIX", -12.3);
        hinted.extra.insert(EXTRA_CATEGORY_HINT.to_string(), "Vie quotidienne".to_string());
        let mut overrides = HashMap::new();
        overrides.insert(
            7,
            vec![
                override_for(3, 7, Some("Newest"), None),
                override_for(1, 7, Some("Oldest"), Some(true)),
            ],
        );
        let derived = classify(&[hinted], &[], &overrides);
        assert_eq!(derived[0].category.as_deref(), Some("Newest"));
        assert!(!derived[0].is_transfer);
        assert_eq!(derived[0].source, ClassificationSource::Override);
    }

    #[test]
    fn test_override_keeps_matched_rule() {
        let rules = vec![rule(4, RuleOperator::Contains, "fnac", "Shopping", 0)];
        let mut overrides = HashMap::new();
        overrides.insert(1, vec![override_for(1, 1, Some("Leisure"), None)]);
        let derived = classify(&[raw(1, "CB FNAC", -20.0)], &rules, &overrides);
        assert_eq!(derived[0].category.as_deref(), Some("Leisure"));
        assert_eq!(derived[0].source, ClassificationSource::Override);
        assert_eq!(derived[0].matched_rule, Some(4));
    }

    #[test]
    fn test_unmatched_stays_unclassified() {
        let derived = classify(&[raw(1, "RANDOM", -1.0)], &[rule(1, RuleOperator::Equals, "rand", "X", 0)], &HashMap::new());
        assert_eq!(derived[0].category, None);
        assert_eq!(derived[0].source, ClassificationSource::Unclassified);
        assert_eq!(derived[0].account_id, "BNP");
        assert_eq!(derived[0].id, 1);
    }

    #[test]
    fn test_transfer_effect_and_balance() {
        let mut r = raw(1, "VIR VERS LIVRET A", -200.0);
        r.extra.insert(EXTRA_BALANCE.to_string(), "1234.56".to_string());
        let transfer_rule = CategoryRule {
            effects: Effects {
                category: Some("  ".to_string()),
                subcategory: None,
                is_transfer: Some(true),
            },
            ..rule(1, RuleOperator::StartsWith, "vir ", "unused", 0)
        };
        let derived = classify(&[r], &[transfer_rule], &HashMap::new());
        assert!(derived[0].is_transfer);
        assert_eq!(derived[0].category, None);
        assert_eq!(derived[0].balance, Some(1234.56));
    }

    // -- commit -------------------------------------------------------------

    const BNP: &str = "Compte;1\nSolde;2\n\
                       Date operation;Libelle;Montant\n\
                       01-07-2025;CB CARREFOUR;-45,20\n\
                       02-07-2025;VIR SEPA SALAIRE;2 500,00\n\
                       30-06-2025;CB FNAC;-20,00\n";

    fn july() -> Period {
        Period::new(2025, 7).unwrap()
    }

    #[test]
    fn test_commit_period_derives_and_rolls_up() {
        let (_dir, mut conn) = test_db();
        crate::ledger::ingest(&mut conn, BankKind::Bnp, july(), BNP.as_bytes(), "bnp.csv", "me").unwrap();
        let rule_id = rules::add_rule(
            &conn,
            &rules::NewRule {
                field: RuleField::Description,
                operator: RuleOperator::Contains,
                pattern: "carrefour".to_string(),
                effects: Effects {
                    category: Some("Food".to_string()),
                    ..Effects::default()
                },
                priority: 0,
                active: true,
            },
        )
        .unwrap();

        let result = commit_period(&mut conn, july(), &[], "me").unwrap();
        assert_eq!(result.accounts_processed, vec!["BNP".to_string()]);
        assert_eq!(result.transactions_derived, 3);
        assert_eq!(result.rules_applied, 1);
        assert_eq!(result.uncategorized_count, 1);
        assert_eq!(rules::get_rule(&conn, rule_id).unwrap().hit_count, 1);

        // The late June row lands in June's rollup.
        let june = rollup::rollup_rows(&conn, july().previous(), &[]).unwrap();
        assert_eq!(june.len(), 1);
        assert_eq!(june[0].expense, 20.0);
        let july_summary = rollup::summary(&conn, july(), &[]).unwrap();
        assert_eq!(july_summary.income, 2500.0);
        assert_eq!(july_summary.expense, 45.2);
    }

    #[test]
    fn test_recommit_replaces_and_keeps_overrides() {
        let (_dir, mut conn) = test_db();
        crate::ledger::ingest(&mut conn, BankKind::Bnp, july(), BNP.as_bytes(), "bnp.csv", "me").unwrap();
        commit_period(&mut conn, july(), &[], "me").unwrap();
        let fnac_id: i64 = conn
            .query_row("SELECT id FROM transactions WHERE description = 'CB FNAC'", [], |r| r.get(0))
            .unwrap();
        overrides::record_override(
            &conn,
            fnac_id,
            &Effects {
                category: Some("Leisure".to_string()),
                ..Effects::default()
            },
            Some("manual"),
        )
        .unwrap();

        commit_period(&mut conn, july(), &[], "me").unwrap();
        let count: i64 = conn.query_row("SELECT count(*) FROM transactions", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 3);
        let category: String = conn
            .query_row("SELECT category FROM transactions WHERE id = ?1", [fnac_id], |r| r.get(0))
            .unwrap();
        assert_eq!(category, "Leisure");
    }

    #[test]
    fn test_overridden_rule_match_still_counts_as_hit() {
        let (_dir, mut conn) = test_db();
        crate::ledger::ingest(&mut conn, BankKind::Bnp, july(), BNP.as_bytes(), "bnp.csv", "me").unwrap();
        let rule_id = rules::add_rule(
            &conn,
            &rules::NewRule {
                field: RuleField::Description,
                operator: RuleOperator::Contains,
                pattern: "fnac".to_string(),
                effects: Effects {
                    category: Some("Shopping".to_string()),
                    ..Effects::default()
                },
                priority: 0,
                active: true,
            },
        )
        .unwrap();
        commit_period(&mut conn, july(), &[], "me").unwrap();
        let fnac_id: i64 = conn
            .query_row("SELECT id FROM transactions WHERE description = 'CB FNAC'", [], |r| r.get(0))
            .unwrap();
        overrides::record_override(
            &conn,
            fnac_id,
            &Effects {
                category: Some("Leisure".to_string()),
                ..Effects::default()
            },
            None,
        )
        .unwrap();

        let result = commit_period(&mut conn, july(), &[], "me").unwrap();
        assert_eq!(result.rules_applied, 1);
        assert_eq!(rules::get_rule(&conn, rule_id).unwrap().hit_count, 2);
    }

    #[test]
    fn test_failed_recommit_keeps_previous_generation() {
        let (_dir, mut conn) = test_db();
        crate::ledger::ingest(&mut conn, BankKind::Bnp, july(), BNP.as_bytes(), "bnp.csv", "me").unwrap();
        commit_period(&mut conn, july(), &[], "me").unwrap();
        let before = rollup::rollup_rows(&conn, july(), &[]).unwrap();

        conn.execute_batch(
            "CREATE TRIGGER fail_derive BEFORE INSERT ON transactions BEGIN SELECT RAISE(ABORT, 'boom'); END;",
        )
        .unwrap();
        assert!(commit_period(&mut conn, july(), &[], "me").is_err());

        let count: i64 = conn.query_row("SELECT count(*) FROM transactions", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 3);
        assert_eq!(rollup::rollup_rows(&conn, july(), &[]).unwrap(), before);
    }

    #[test]
    fn test_commit_while_another_writer_holds_the_lock_changes_nothing() {
        let (dir, mut conn) = test_db();
        crate::ledger::ingest(&mut conn, BankKind::Bnp, july(), BNP.as_bytes(), "bnp.csv", "me").unwrap();
        commit_period(&mut conn, july(), &[], "me").unwrap();
        conn.busy_timeout(std::time::Duration::ZERO).unwrap();

        let other = crate::db::get_connection(&dir.path().join("test.db")).unwrap();
        other.execute_batch("BEGIN IMMEDIATE;").unwrap();
        let err = commit_period(&mut conn, july(), &[], "me").unwrap_err();
        assert!(matches!(err, TallyError::Db(_)));
        other.execute_batch("ROLLBACK;").unwrap();

        let count: i64 = conn.query_row("SELECT count(*) FROM transactions", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_commit_without_raw_rows_fails() {
        let (_dir, mut conn) = test_db();
        let err = commit_period(&mut conn, july(), &[], "me").unwrap_err();
        assert!(matches!(err, TallyError::NoRawTransactions(_)));
    }
}
