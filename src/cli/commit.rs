use colored::Colorize;

use crate::categorizer::commit_period;
use crate::cli::{open_db, owner_or_default};
use crate::error::Result;
use crate::period::Period;

pub fn run(period: Period, accounts: &[String], owner: Option<&str>) -> Result<()> {
    let (settings, mut conn) = open_db()?;
    let owner = owner_or_default(&settings, owner);

    let result = commit_period(&mut conn, period, accounts, &owner)?;

    println!(
        "Committed {} ({})",
        result.period.month_key(),
        result.accounts_processed.join(", ")
    );
    println!(
        "{} transactions derived, {} categorized by rules",
        result.transactions_derived, result.rules_applied
    );
    if result.rollup_updated {
        println!("Monthly rollups refreshed");
    }
    if result.uncategorized_count > 0 {
        println!(
            "{}",
            format!("{} still uncategorized", result.uncategorized_count).yellow()
        );
    } else {
        println!("{}", "Everything categorized".green());
    }
    Ok(())
}
