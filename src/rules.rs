use std::cmp::Ordering;

use rusqlite::{Connection, OptionalExtension, Row};

use crate::categorizer::RuleMatcher;
use crate::error::{Result, TallyError};
use crate::models::{CategoryRule, Effects, RuleField, RuleOperator};
use crate::period::Period;

const RULE_COLUMNS: &str = "id, field, operator, pattern, set_category, set_subcategory, \
                            set_is_transfer, priority, active, hit_count, created_at";

const PREVIEW_SAMPLES: usize = 5;

#[derive(Debug, Clone)]
pub struct NewRule {
    pub field: RuleField,
    pub operator: RuleOperator,
    pub pattern: String,
    pub effects: Effects,
    pub priority: i64,
    pub active: bool,
}

/// Partial update of a rule. `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct RuleChanges {
    pub field: Option<RuleField>,
    pub operator: Option<RuleOperator>,
    pub pattern: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub is_transfer: Option<bool>,
    pub priority: Option<i64>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct PreviewSample {
    pub id: i64,
    pub ts: String,
    pub account_id: String,
    pub description: String,
    pub merchant: String,
    pub amount: f64,
    pub category: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RulePreview {
    pub match_count: usize,
    pub uncategorized_matches: usize,
    pub samples: Vec<PreviewSample>,
}

fn row_to_rule(row: &Row) -> rusqlite::Result<CategoryRule> {
    let field: String = row.get(1)?;
    let operator: String = row.get(2)?;
    let bad = |idx: usize, e: TallyError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    };
    Ok(CategoryRule {
        id: row.get(0)?,
        field: field.parse().map_err(|e| bad(1, e))?,
        operator: operator.parse().map_err(|e| bad(2, e))?,
        pattern: row.get(3)?,
        effects: Effects {
            category: row.get(4)?,
            subcategory: row.get(5)?,
            is_transfer: row.get::<_, Option<i64>>(6)?.map(|v| v != 0),
        },
        priority: row.get(7)?,
        active: row.get::<_, i64>(8)? != 0,
        hit_count: row.get(9)?,
        created_at: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
    })
}

fn row_to_sample(row: &Row) -> rusqlite::Result<PreviewSample> {
    Ok(PreviewSample {
        id: row.get(0)?,
        ts: row.get(1)?,
        account_id: row.get(2)?,
        description: row.get(3)?,
        merchant: row.get(4)?,
        amount: row.get(5)?,
        category: row.get(6)?,
    })
}

fn validate(operator: RuleOperator, pattern: &str) -> Result<()> {
    if pattern.trim().is_empty() {
        return Err(TallyError::InvalidRule("pattern must not be empty".to_string()));
    }
    if operator == RuleOperator::Regex {
        regex::Regex::new(pattern)
            .map_err(|e| TallyError::InvalidRule(format!("bad regex '{pattern}': {e}")))?;
    }
    Ok(())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

/// Evaluation order: priority descending, then oldest first.
pub fn evaluation_order(a: &CategoryRule, b: &CategoryRule) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn sort_for_evaluation(rules: &mut [CategoryRule]) {
    rules.sort_by(evaluation_order);
}

// ---------------------------------------------------------------------------
// CRUD
// ---------------------------------------------------------------------------

pub fn add_rule(conn: &Connection, rule: &NewRule) -> Result<i64> {
    validate(rule.operator, &rule.pattern)?;
    conn.execute(
        "INSERT INTO category_rules \
         (active, priority, field, operator, pattern, set_category, set_subcategory, set_is_transfer) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            rule.active as i32,
            rule.priority,
            rule.field.key(),
            rule.operator.key(),
            rule.pattern,
            non_empty(&rule.effects.category),
            non_empty(&rule.effects.subcategory),
            rule.effects.is_transfer.map(|v| v as i32),
        ],
    )?;
    let id = conn.last_insert_rowid();
    tracing::info!(rule_id = id, pattern = %rule.pattern, "rule added");
    Ok(id)
}

pub fn list_rules(conn: &Connection) -> Result<Vec<CategoryRule>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RULE_COLUMNS} FROM category_rules ORDER BY priority DESC, created_at ASC, id ASC"
    ))?;
    let rules = stmt
        .query_map([], row_to_rule)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rules)
}

pub fn active_rules(conn: &Connection) -> Result<Vec<CategoryRule>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RULE_COLUMNS} FROM category_rules WHERE active = 1"
    ))?;
    let mut rules = stmt
        .query_map([], row_to_rule)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    sort_for_evaluation(&mut rules);
    Ok(rules)
}

pub fn get_rule(conn: &Connection, id: i64) -> Result<CategoryRule> {
    conn.query_row(
        &format!("SELECT {RULE_COLUMNS} FROM category_rules WHERE id = ?1"),
        [id],
        row_to_rule,
    )
    .optional()?
    .ok_or(TallyError::UnknownRule(id))
}

pub fn update_rule(conn: &Connection, id: i64, changes: &RuleChanges) -> Result<CategoryRule> {
    let current = get_rule(conn, id)?;
    let operator = changes.operator.unwrap_or(current.operator);
    let pattern = changes.pattern.as_deref().unwrap_or(&current.pattern);
    validate(operator, pattern)?;

    conn.execute(
        "UPDATE category_rules SET \
           field = COALESCE(?1, field), \
           operator = COALESCE(?2, operator), \
           pattern = COALESCE(?3, pattern), \
           set_category = COALESCE(?4, set_category), \
           set_subcategory = COALESCE(?5, set_subcategory), \
           set_is_transfer = COALESCE(?6, set_is_transfer), \
           priority = COALESCE(?7, priority), \
           active = COALESCE(?8, active) \
         WHERE id = ?9",
        rusqlite::params![
            changes.field.map(|f| f.key()),
            changes.operator.map(|o| o.key()),
            changes.pattern,
            non_empty(&changes.category),
            non_empty(&changes.subcategory),
            changes.is_transfer.map(|v| v as i32),
            changes.priority,
            changes.active.map(|v| v as i32),
            id,
        ],
    )?;
    tracing::info!(rule_id = id, "rule updated");
    get_rule(conn, id)
}

pub fn delete_rule(conn: &Connection, id: i64) -> Result<CategoryRule> {
    let rule = get_rule(conn, id)?;
    conn.execute("DELETE FROM category_rules WHERE id = ?1", [id])?;
    tracing::info!(rule_id = id, "rule deleted");
    Ok(rule)
}

// ---------------------------------------------------------------------------
// Preview
// ---------------------------------------------------------------------------

/// Dry-runs a candidate rule against the stored transactions, optionally
/// limited to one month.
pub fn preview_rule(
    conn: &Connection,
    field: RuleField,
    operator: RuleOperator,
    pattern: &str,
    period: Option<Period>,
) -> Result<RulePreview> {
    validate(operator, pattern)?;
    let matcher = RuleMatcher::new(0, field, operator, pattern)
        .ok_or_else(|| TallyError::InvalidRule(format!("bad regex '{pattern}'")))?;

    let mut sql = String::from(
        "SELECT id, ts, account_id, description, COALESCE(merchant, ''), amount, category FROM transactions",
    );
    if period.is_some() {
        sql.push_str(" WHERE substr(ts, 1, 7) = ?1");
    }
    sql.push_str(" ORDER BY ts DESC, id DESC");

    let mut stmt = conn.prepare(&sql)?;
    let candidates = match period {
        Some(p) => stmt.query_map([p.month_key()], row_to_sample)?,
        None => stmt.query_map([], row_to_sample)?,
    }
    .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut preview = RulePreview {
        match_count: 0,
        uncategorized_matches: 0,
        samples: Vec::new(),
    };
    for txn in candidates {
        if !matcher.matches(&txn.description, &txn.merchant) {
            continue;
        }
        preview.match_count += 1;
        if non_empty(&txn.category).is_none() {
            preview.uncategorized_matches += 1;
        }
        if preview.samples.len() < PREVIEW_SAMPLES {
            preview.samples.push(txn);
        }
    }
    Ok(preview)
}
