use comfy_table::{Cell, Table};

use crate::cli::open_db;
use crate::error::Result;
use crate::fmt::{money, pct};
use crate::period::Period;
use crate::rollup;
use crate::transfers;

pub fn propose(month: Period, accounts: &[String]) -> Result<()> {
    let (_, conn) = open_db()?;
    let proposals = transfers::propose_transfers(&conn, month, accounts)?;
    if proposals.is_empty() {
        println!("No transfer candidates for {}.", month.month_key());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Pair", "Date", "From", "To", "Amount", "Days", "Confidence", "Descriptions"]);
    for p in &proposals {
        table.add_row(vec![
            Cell::new(format!("{}:{}", p.transaction_ids.0, p.transaction_ids.1)),
            Cell::new(&p.date),
            Cell::new(&p.from_account),
            Cell::new(&p.to_account),
            Cell::new(money(p.amount)),
            Cell::new(p.date_difference_days),
            Cell::new(pct(p.confidence)),
            Cell::new(format!("{} | {}", p.descriptions.0, p.descriptions.1)),
        ]);
    }
    println!("Transfer candidates\n{table}");
    println!("Confirm with `tally transfers confirm ID1:ID2 ...`");
    Ok(())
}

pub fn potential(id: i64) -> Result<()> {
    let (_, conn) = open_db()?;
    let matches = transfers::potential_transfers(&conn, id)?;
    if matches.is_empty() {
        println!("No possible counterpart for transaction {id}.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Date", "Account", "Amount", "Days", "Confidence", "Description"]);
    for m in &matches {
        table.add_row(vec![
            Cell::new(m.id),
            Cell::new(&m.date),
            Cell::new(&m.account_id),
            Cell::new(money(m.amount)),
            Cell::new(m.date_difference_days),
            Cell::new(pct(m.confidence)),
            Cell::new(&m.description),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub fn confirm(pairs: &[(i64, i64)]) -> Result<()> {
    let (_, mut conn) = open_db()?;
    let result = transfers::confirm_transfers(&mut conn, pairs)?;
    println!(
        "Confirmed {} pairs ({} transactions)",
        result.confirmed_pairs, result.confirmed_transactions
    );
    for (month, account) in &result.affected {
        rollup::rebuild(&mut conn, *month, std::slice::from_ref(account))?;
    }
    println!("Rebuilt {} rollups", result.affected.len());
    Ok(())
}
