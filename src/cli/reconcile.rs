use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::open_db;
use crate::error::Result;
use crate::fmt::money;
use crate::period::Period;
use crate::reconciler;

pub fn run(account: &str, month: Period, balance: f64) -> Result<()> {
    let (_, conn) = open_db()?;
    let result = reconciler::record_statement(&conn, account, month, balance)?;

    if result.is_reconciled {
        println!(
            "{} {} {}: {}",
            "Reconciled!".green().bold(),
            result.account_id,
            result.month.month_key(),
            money(result.computed_balance)
        );
    } else {
        println!(
            "DISCREPANCY: {}\n  Statement:  {}\n  Computed:   {}",
            money(result.delta).red().bold(),
            money(result.statement_balance),
            money(result.computed_balance)
        );
    }
    Ok(())
}

pub fn status(month: Option<Period>, account: Option<&str>) -> Result<()> {
    let (_, conn) = open_db()?;
    let rows = reconciler::reconciliation_status(&conn, month, account)?;
    if rows.is_empty() {
        println!("No statements recorded.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Account", "Month", "Statement", "Computed", "Delta", "", "Updated"]);
    for r in &rows {
        table.add_row(vec![
            Cell::new(&r.account_id),
            Cell::new(r.month.get(..7).unwrap_or(&r.month)),
            Cell::new(money(r.statement_balance)),
            Cell::new(money(r.computed_balance)),
            Cell::new(money(r.delta)),
            Cell::new(if r.is_reconciled {
                "ok".green().to_string()
            } else {
                "mismatch".red().to_string()
            }),
            Cell::new(&r.updated_at),
        ]);
    }
    println!("Statements\n{table}");
    Ok(())
}
