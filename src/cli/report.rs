use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::open_db;
use crate::error::Result;
use crate::fmt::{money, pct};
use crate::period::Period;
use crate::reports;
use crate::rollup::{CategoryBreakdown, RollupSummary};

pub(crate) fn print_summary(summary: &RollupSummary) {
    let mut table = Table::new();
    table.set_header(vec!["", "Amount"]);
    table.add_row(vec![Cell::new("Income".green().bold()), Cell::new(money(summary.income))]);
    table.add_row(vec![Cell::new("Expenses".red().bold()), Cell::new(money(summary.expense))]);
    let net_label = if summary.net >= 0.0 {
        "Net".green().bold()
    } else {
        "Net".red().bold()
    };
    table.add_row(vec![Cell::new(net_label), Cell::new(money(summary.net))]);
    table.add_row(vec![Cell::new("vs. previous month"), Cell::new(money(summary.delta_mom))]);
    table.add_row(vec![Cell::new("Savings rate"), Cell::new(pct(summary.savings_rate))]);
    println!("{table}");
}

fn format_breakdown(categories: &[CategoryBreakdown]) -> String {
    let mut table = Table::new();
    table.set_header(vec!["Category", "Income", "Expenses", "Net"]);
    for cat in categories {
        table.add_row(vec![
            Cell::new(cat.category.as_str().bold()),
            Cell::new(money(cat.income)),
            Cell::new(money(cat.expense)),
            Cell::new(money(cat.net)),
        ]);
        for sub in cat.subcategories.iter().filter(|s| !s.subcategory.is_empty()) {
            table.add_row(vec![
                Cell::new(format!("  {}", sub.subcategory)),
                Cell::new(money(sub.income)),
                Cell::new(money(sub.expense)),
                Cell::new(money(sub.net)),
            ]);
        }
    }
    format!("{table}")
}

pub fn summary(month: Period, accounts: &[String]) -> Result<()> {
    let (_, mut conn) = open_db()?;
    let report = reports::pl_summary(&mut conn, month, accounts)?;

    let scope = if accounts.is_empty() {
        "all accounts".to_string()
    } else {
        accounts.join(", ")
    };
    println!("Profit & Loss {} ({scope})", month.month_key());
    print_summary(&report.summary);
    if !report.categories.is_empty() {
        println!("{}", format_breakdown(&report.categories));
    }
    if report.uncategorized_count > 0 {
        println!(
            "{}",
            format!(
                "{} uncategorized transactions (see `tally tx list --month {} --uncategorized`)",
                report.uncategorized_count,
                month.month_key()
            )
            .yellow()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollup::SubcategoryLine;

    #[test]
    fn test_format_breakdown_lists_named_subcategories() {
        colored::control::set_override(false);
        let out = format_breakdown(&[CategoryBreakdown {
            category: "Food".to_string(),
            income: 0.0,
            expense: 57.5,
            net: -57.5,
            subcategories: vec![
                SubcategoryLine { subcategory: "Groceries".to_string(), income: 0.0, expense: 50.0, net: -50.0 },
                SubcategoryLine { subcategory: String::new(), income: 0.0, expense: 7.5, net: -7.5 },
            ],
        }]);
        assert!(out.contains("Food"));
        assert!(out.contains("  Groceries"));
        assert!(out.contains("-57.50"));
    }
}
