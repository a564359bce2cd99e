use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::open_db;
use crate::error::Result;
use crate::fmt::{money, money_in};
use crate::overrides::{edit_transaction, overrides_for, TransactionEdit};
use crate::reports::{list_transactions, TransactionFilter};

pub fn list(filter: &TransactionFilter) -> Result<()> {
    let (_, conn) = open_db()?;
    let page = list_transactions(&conn, filter)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Date", "Account", "Description", "Amount", "Category", "Subcategory", ""]);
    for t in &page.transactions {
        let amount = if t.amount < 0.0 {
            money(t.amount).red().to_string()
        } else {
            money(t.amount).green().to_string()
        };
        table.add_row(vec![
            Cell::new(t.id),
            Cell::new(t.ts.get(..10).unwrap_or(&t.ts)),
            Cell::new(&t.account_id),
            Cell::new(&t.description),
            Cell::new(amount),
            Cell::new(t.category.as_deref().unwrap_or("")),
            Cell::new(t.subcategory.as_deref().unwrap_or("")),
            Cell::new(if t.is_transfer { "transfer" } else { "" }),
        ]);
    }
    println!("{table}");
    println!(
        "Showing {}-{} of {}{}",
        if page.transactions.is_empty() { 0 } else { page.offset + 1 },
        page.offset + page.transactions.len(),
        page.total_count,
        if page.has_more {
            format!(" (next page: --offset {})", page.offset + page.limit)
        } else {
            String::new()
        }
    );
    Ok(())
}

pub fn edit(id: i64, edit: &TransactionEdit) -> Result<()> {
    let (_, mut conn) = open_db()?;
    let result = edit_transaction(&mut conn, id, edit)?;
    let t = &result.transaction;
    println!(
        "Transaction {} ({}, {}) \u{2192} {}{}{} [override #{}]",
        t.id,
        t.description,
        money_in(t.amount, &t.currency),
        t.category.as_deref().unwrap_or("Uncategorized"),
        t.subcategory
            .as_deref()
            .map(|s| format!(" / {s}"))
            .unwrap_or_default(),
        if t.is_transfer { " [transfer]" } else { "" },
        result.override_id
    );
    println!(
        "Rollup {} refreshed: net {}",
        t.month_key(),
        money(result.rollup.net)
    );
    let history = overrides_for(&conn, id)?;
    if history.len() > 1 {
        println!("{} manual edits on record for this transaction:", history.len());
        for ov in &history {
            println!("  #{} {} {}", ov.id, ov.created_at, ov.note.as_deref().unwrap_or(""));
        }
    }
    Ok(())
}
