mod categorizer;
mod cli;
mod db;
mod error;
mod fmt;
mod importer;
mod ledger;
mod models;
mod overrides;
mod period;
mod reconciler;
mod reports;
mod rollup;
mod rules;
mod settings;
mod transfers;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::{
    Cli, Commands, ReportCommands, RollupCommands, RulesCommands, TransfersCommands, TxCommands,
};
use overrides::TransactionEdit;
use reports::TransactionFilter;
use rules::RuleChanges;

fn init_tracing() {
    let level = settings::load_settings().log_level;
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| format!("tally={level}"));
    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Import {
            file,
            period,
            bank,
            owner,
        } => cli::import::run(&file, period, bank.as_deref(), owner.as_deref()),
        Commands::Commit {
            period,
            accounts,
            owner,
        } => cli::commit::run(period, &accounts, owner.as_deref()),
        Commands::Imports { owner } => cli::imports::run(owner.as_deref()),
        Commands::Rules { command } => match command {
            RulesCommands::Add {
                field,
                operator,
                pattern,
                category,
                subcategory,
                transfer,
                priority,
                inactive,
            } => cli::rules::add(
                field,
                operator,
                &pattern,
                category,
                subcategory,
                transfer,
                priority,
                inactive,
            ),
            RulesCommands::List => cli::rules::list(),
            RulesCommands::Update {
                id,
                field,
                operator,
                pattern,
                category,
                subcategory,
                transfer,
                priority,
                active,
            } => cli::rules::update(
                id,
                RuleChanges {
                    field,
                    operator,
                    pattern,
                    category,
                    subcategory,
                    is_transfer: transfer,
                    priority,
                    active,
                },
            ),
            RulesCommands::Delete { id } => cli::rules::delete(id),
            RulesCommands::Preview {
                field,
                operator,
                pattern,
                period,
            } => cli::rules::preview(field, operator, &pattern, period),
        },
        Commands::Tx { command } => match command {
            TxCommands::List {
                month,
                accounts,
                category,
                subcategory,
                merchant,
                uncategorized,
                limit,
                offset,
            } => cli::tx::list(&TransactionFilter {
                month,
                accounts,
                category,
                subcategory,
                merchant,
                uncategorized_only: uncategorized,
                limit: Some(limit),
                offset,
            }),
            TxCommands::Edit {
                id,
                category,
                subcategory,
                transfer,
                note,
            } => cli::tx::edit(
                id,
                &TransactionEdit {
                    category,
                    subcategory,
                    is_transfer: transfer,
                    note,
                },
            ),
        },
        Commands::Transfers { command } => match command {
            TransfersCommands::Propose { month, accounts } => {
                cli::transfers::propose(month, &accounts)
            }
            TransfersCommands::Potential { id } => cli::transfers::potential(id),
            TransfersCommands::Confirm { pairs } => cli::transfers::confirm(&pairs),
        },
        Commands::Rollup { command } => match command {
            RollupCommands::Rebuild { month, accounts } => cli::rollup::rebuild(month, &accounts),
        },
        Commands::Report { command } => match command {
            ReportCommands::Summary { month, accounts } => cli::report::summary(month, &accounts),
        },
        Commands::Reconcile {
            account,
            month,
            balance,
        } => cli::reconcile::run(&account, month, balance),
        Commands::Statements { month, account } => {
            cli::reconcile::status(month, account.as_deref())
        }
    };

    if let Err(e) = result {
        tracing::debug!(error = ?e, "command failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
