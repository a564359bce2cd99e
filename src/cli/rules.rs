use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::open_db;
use crate::error::Result;
use crate::fmt::money;
use crate::models::{CategoryRule, Effects, RuleField, RuleOperator};
use crate::period::Period;
use crate::rules::{self, NewRule, RuleChanges};

fn describe_effects(effects: &Effects) -> String {
    let mut parts = Vec::new();
    if let Some(c) = &effects.category {
        parts.push(c.clone());
    }
    if let Some(s) = &effects.subcategory {
        parts.push(format!("/ {s}"));
    }
    if effects.is_transfer == Some(true) {
        parts.push("[transfer]".to_string());
    } else if effects.is_transfer == Some(false) {
        parts.push("[not transfer]".to_string());
    }
    parts.join(" ")
}

fn describe(rule: &CategoryRule) -> String {
    format!(
        "{} {} '{}' \u{2192} {}",
        rule.field.key(),
        rule.operator.key(),
        rule.pattern,
        describe_effects(&rule.effects)
    )
}

#[allow(clippy::too_many_arguments)]
pub fn add(
    field: RuleField,
    operator: RuleOperator,
    pattern: &str,
    category: Option<String>,
    subcategory: Option<String>,
    transfer: Option<bool>,
    priority: i64,
    inactive: bool,
) -> Result<()> {
    let (_, conn) = open_db()?;
    let id = rules::add_rule(
        &conn,
        &NewRule {
            field,
            operator,
            pattern: pattern.to_string(),
            effects: Effects {
                category,
                subcategory,
                is_transfer: transfer,
            },
            priority,
            active: !inactive,
        },
    )?;
    let rule = rules::get_rule(&conn, id)?;
    println!("Added rule {id}: {}", describe(&rule));
    Ok(())
}

pub fn list() -> Result<()> {
    let (_, conn) = open_db()?;
    let rules = rules::list_rules(&conn)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Field", "Operator", "Pattern", "Sets", "Priority", "Active", "Hits"]);
    for rule in &rules {
        table.add_row(vec![
            Cell::new(rule.id),
            Cell::new(rule.field.key()),
            Cell::new(rule.operator.key()),
            Cell::new(&rule.pattern),
            Cell::new(describe_effects(&rule.effects)),
            Cell::new(rule.priority),
            Cell::new(if rule.active { "yes" } else { "no" }),
            Cell::new(rule.hit_count),
        ]);
    }
    println!("Rules\n{table}");
    Ok(())
}

pub fn update(id: i64, changes: RuleChanges) -> Result<()> {
    let (_, conn) = open_db()?;
    let rule = rules::update_rule(&conn, id, &changes)?;
    println!("Updated rule {id}: {}", describe(&rule));
    Ok(())
}

pub fn delete(id: i64) -> Result<()> {
    let (_, conn) = open_db()?;
    let rule = rules::delete_rule(&conn, id)?;
    println!("Deleted rule {id}: {}", describe(&rule));
    Ok(())
}

pub fn preview(field: RuleField, operator: RuleOperator, pattern: &str, period: Option<Period>) -> Result<()> {
    let (_, conn) = open_db()?;
    let preview = rules::preview_rule(&conn, field, operator, pattern, period)?;

    println!(
        "{} matches ({} currently uncategorized)",
        preview.match_count.to_string().bold(),
        preview.uncategorized_matches
    );
    if preview.samples.is_empty() {
        return Ok(());
    }
    let mut table = Table::new();
    table.set_header(vec!["ID", "Date", "Account", "Description", "Amount", "Category"]);
    for s in &preview.samples {
        table.add_row(vec![
            Cell::new(s.id),
            Cell::new(s.ts.get(..10).unwrap_or(&s.ts)),
            Cell::new(&s.account_id),
            Cell::new(&s.description),
            Cell::new(money(s.amount)),
            Cell::new(s.category.as_deref().unwrap_or("")),
        ]);
    }
    println!("{table}");
    Ok(())
}
