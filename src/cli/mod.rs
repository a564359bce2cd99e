pub mod commit;
pub mod import;
pub mod imports;
pub mod init;
pub mod reconcile;
pub mod report;
pub mod rollup;
pub mod rules;
pub mod transfers;
pub mod tx;

use clap::{Parser, Subcommand};
use rusqlite::Connection;

use crate::db::{get_connection, init_db};
use crate::error::Result;
use crate::models::{RuleField, RuleOperator};
use crate::period::Period;
use crate::settings::{db_path, load_settings, Settings};

/// Settings plus an open, initialised database.
pub(crate) fn open_db() -> Result<(Settings, Connection)> {
    let settings = load_settings();
    let path = db_path(&settings);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let conn = get_connection(&path)?;
    init_db(&conn)?;
    tracing::debug!(db = %path.display(), "database opened");
    Ok((settings, conn))
}

pub(crate) fn owner_or_default(settings: &Settings, owner: Option<&str>) -> String {
    owner
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| settings.owner())
}

fn parse_pair(raw: &str) -> std::result::Result<(i64, i64), String> {
    let (a, b) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected ID1:ID2, got '{raw}'"))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<i64>()
            .map_err(|_| format!("'{s}' is not a transaction ID"))
    };
    Ok((parse(a)?, parse(b)?))
}

#[derive(Parser)]
#[command(
    name = "tally",
    version,
    about = "Normalize bank exports, categorize transactions and build monthly P&L rollups."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Choose a data directory and initialize the database.
    Init {
        /// Path for tally data (default: ~/Documents/tally)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Import a bank CSV export for a period.
    Import {
        /// Path to the CSV export
        file: String,
        /// Statement period: YYYY-MM
        #[arg(long)]
        period: Period,
        /// Bank: BNP, Boursorama, Revolut (detected from the header when omitted)
        #[arg(long)]
        bank: Option<String>,
        /// Owner of the import (default: user_name from settings)
        #[arg(long)]
        owner: Option<String>,
    },
    /// Classify a period's raw transactions and rebuild its rollups.
    Commit {
        /// Period: YYYY-MM
        #[arg(long)]
        period: Period,
        /// Restrict to these accounts (bank tags); repeatable
        #[arg(long = "account")]
        accounts: Vec<String>,
        #[arg(long)]
        owner: Option<String>,
    },
    /// List recorded imports.
    Imports {
        #[arg(long)]
        owner: Option<String>,
    },
    /// Manage categorization rules.
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },
    /// List and edit derived transactions.
    Tx {
        #[command(subcommand)]
        command: TxCommands,
    },
    /// Detect and confirm transfers between accounts.
    Transfers {
        #[command(subcommand)]
        command: TransfersCommands,
    },
    /// Maintain monthly rollups.
    Rollup {
        #[command(subcommand)]
        command: RollupCommands,
    },
    /// Generate reports.
    Report {
        #[command(subcommand)]
        command: ReportCommands,
    },
    /// Record an end-of-month statement balance and compare it.
    Reconcile {
        /// Account (bank tag)
        account: String,
        /// Month: YYYY-MM
        #[arg(long)]
        month: Period,
        /// Statement balance
        #[arg(long, allow_hyphen_values = true)]
        balance: f64,
    },
    /// Show recorded statements and their reconciliation status.
    Statements {
        #[arg(long)]
        month: Option<Period>,
        #[arg(long)]
        account: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum RulesCommands {
    /// Add a categorization rule.
    Add {
        /// Field to match: merchant, description
        #[arg(long)]
        field: RuleField,
        /// Operator: contains, startswith, equals, regex
        #[arg(long)]
        operator: RuleOperator,
        /// Pattern to match (case-insensitive)
        #[arg(long)]
        pattern: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        subcategory: Option<String>,
        /// Mark matches as transfers: true, false
        #[arg(long)]
        transfer: Option<bool>,
        /// Rule priority (higher wins)
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        priority: i64,
        /// Create the rule disabled
        #[arg(long)]
        inactive: bool,
    },
    /// List all rules in evaluation order.
    List,
    /// Update an existing rule.
    Update {
        /// Rule ID (shown in `tally rules list`)
        id: i64,
        #[arg(long)]
        field: Option<RuleField>,
        #[arg(long)]
        operator: Option<RuleOperator>,
        #[arg(long)]
        pattern: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        subcategory: Option<String>,
        #[arg(long)]
        transfer: Option<bool>,
        #[arg(long, allow_hyphen_values = true)]
        priority: Option<i64>,
        /// Enable or disable: true, false
        #[arg(long)]
        active: Option<bool>,
    },
    /// Delete a rule by ID.
    Delete {
        id: i64,
    },
    /// Show what a rule would match without saving it.
    Preview {
        #[arg(long)]
        field: RuleField,
        #[arg(long)]
        operator: RuleOperator,
        #[arg(long)]
        pattern: String,
        /// Limit to one month: YYYY-MM
        #[arg(long)]
        period: Option<Period>,
    },
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// List derived transactions, newest first.
    List {
        #[arg(long)]
        month: Option<Period>,
        #[arg(long = "account")]
        accounts: Vec<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        subcategory: Option<String>,
        /// Merchant substring
        #[arg(long)]
        merchant: Option<String>,
        /// Only non-transfer transactions without a category
        #[arg(long)]
        uncategorized: bool,
        #[arg(long, default_value = "100")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
    },
    /// Manually recategorize a transaction.
    Edit {
        id: i64,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        subcategory: Option<String>,
        #[arg(long)]
        transfer: Option<bool>,
        #[arg(long)]
        note: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum TransfersCommands {
    /// Propose transfer pairs for a month.
    Propose {
        #[arg(long)]
        month: Period,
        #[arg(long = "account")]
        accounts: Vec<String>,
    },
    /// Show possible counterparts of one transaction.
    Potential {
        id: i64,
    },
    /// Confirm pairs as transfers: ID1:ID2 ...
    Confirm {
        #[arg(required = true, value_parser = parse_pair)]
        pairs: Vec<(i64, i64)>,
    },
}

#[derive(Subcommand)]
pub enum RollupCommands {
    /// Recompute a month's rollup rows.
    Rebuild {
        #[arg(long)]
        month: Period,
        #[arg(long = "account")]
        accounts: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum ReportCommands {
    /// Monthly profit & loss with category breakdown.
    Summary {
        #[arg(long)]
        month: Period,
        #[arg(long = "account")]
        accounts: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_pair() {
        assert_eq!(parse_pair("12:34"), Ok((12, 34)));
        assert!(parse_pair("12").is_err());
        assert!(parse_pair("a:1").is_err());
    }

    #[test]
    fn test_typed_arguments() {
        let cli = Cli::try_parse_from([
            "tally", "import", "x.csv", "--period", "2025-07", "--bank", "BNP",
        ])
        .unwrap();
        match cli.command {
            Commands::Import { period, bank, .. } => {
                assert_eq!(period, Period::new(2025, 7).unwrap());
                assert_eq!(bank.as_deref(), Some("BNP"));
            }
            _ => panic!("expected import"),
        }
        assert!(Cli::try_parse_from(["tally", "commit", "--period", "July"]).is_err());
    }

    #[test]
    fn test_owner_falls_back_to_settings() {
        let settings = Settings {
            user_name: "alice".to_string(),
            ..Settings::default()
        };
        assert_eq!(owner_or_default(&settings, None), "alice");
        assert_eq!(owner_or_default(&settings, Some(" bob ")), "bob");
        assert_eq!(owner_or_default(&settings, Some("")), "alice");
    }
}
