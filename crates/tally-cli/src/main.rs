//! Tally CLI - Ledger pattern analysis and prediction
//!
//! Usage:
//!   tally init                              Initialize database
//!   tally import --file ledger.csv          Import ledger transactions
//!   tally bank-accounts add ADMIN CODE      Register a bank account
//!   tally analyze ADMIN --mode full         Build patterns from the ledger
//!   tally apply --file new.csv --admin A    Predict missing fields
//!   tally schedule --interval-secs 900      Refresh patterns periodically

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let config = cli.config.as_deref();

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt),
        Commands::Import { file, admin } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_import(&db, &file, admin.as_deref())
        }
        Commands::BankAccounts { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                BankAccountsAction::Add { admin, code, name } => {
                    commands::cmd_bank_accounts_add(&db, &admin, &code, name.as_deref())
                }
                BankAccountsAction::List { admin } => {
                    commands::cmd_bank_accounts_list(&db, admin.as_deref())
                }
                BankAccountsAction::Remove { admin, code } => {
                    commands::cmd_bank_accounts_remove(&db, &admin, &code)
                }
            }
        }
        Commands::Analyze { admin, mode } => {
            let engine = commands::open_engine(&cli.db, cli.no_encrypt, config)?;
            commands::cmd_analyze(&engine, &admin, mode.into())
        }
        Commands::Apply {
            file,
            admin,
            format,
            output,
        } => {
            let engine = commands::open_engine(&cli.db, cli.no_encrypt, config)?;
            commands::cmd_apply(&engine, &file, &admin, format, output.as_deref())
        }
        Commands::Patterns { admin, verb, limit } => {
            let engine = commands::open_engine(&cli.db, cli.no_encrypt, config)?;
            commands::cmd_patterns(&engine, &admin, verb.as_deref(), limit)
        }
        Commands::Invalidate { admin } => {
            let engine = commands::open_engine(&cli.db, cli.no_encrypt, config)?;
            commands::cmd_invalidate(&engine, &admin)
        }
        Commands::Stats { admins, json } => {
            let engine = commands::open_engine(&cli.db, cli.no_encrypt, config)?;
            commands::cmd_stats(&engine, &admins, json)
        }
        Commands::Prune {
            admin,
            min_confidence,
            stale_before,
        } => {
            let engine = commands::open_engine(&cli.db, cli.no_encrypt, config)?;
            commands::cmd_prune(&engine, &admin, min_confidence, stale_before.as_deref())
        }
        Commands::WarmUp { admins } => {
            let engine = commands::open_engine(&cli.db, cli.no_encrypt, config)?;
            commands::cmd_warm_up(&engine, &admins)
        }
        Commands::Schedule {
            admins,
            interval_secs,
            rounds,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let engine = commands::engine_for(db.clone(), config)?;
            let admins = if admins.is_empty() {
                db.analyzed_administrations()?
            } else {
                admins
            };
            commands::cmd_schedule(engine, admins, interval_secs, rounds).await
        }
    }
}
