//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tally_core::AnalysisMode;

/// Tally - Learn ledger coding patterns and predict missing fields
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Transaction pattern analysis and prediction for bookkeeping ledgers", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "tally.db", global = true)]
    pub db: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set TALLY_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    /// Engine config file (defaults to the data-dir override, then built-in)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Import ledger transactions from CSV
    Import {
        /// CSV file to import
        #[arg(short, long)]
        file: PathBuf,

        /// Administration for rows without an administration column
        #[arg(short, long)]
        admin: Option<String>,
    },

    /// Manage the bank accounts of an administration
    BankAccounts {
        #[command(subcommand)]
        action: BankAccountsAction,
    },

    /// Analyze the ledger and store patterns
    Analyze {
        /// Administration to analyze
        admin: String,

        /// Analysis mode
        #[arg(short, long, value_enum, default_value = "incremental")]
        mode: ModeArg,
    },

    /// Fill missing accounts and references on a CSV batch
    Apply {
        /// CSV file with transactions to complete
        #[arg(short, long)]
        file: PathBuf,

        /// Administration the transactions belong to
        #[arg(short, long)]
        admin: String,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,

        /// Write the result to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List stored patterns
    Patterns {
        /// Administration to list
        admin: String,

        /// Only show patterns for this verb or company
        #[arg(long)]
        verb: Option<String>,

        /// Maximum number of patterns to show
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },

    /// Drop an administration's patterns from every cache tier
    Invalidate {
        /// Administration to invalidate
        admin: String,
    },

    /// Show cache statistics after warming the given administrations
    Stats {
        /// Administrations to load first
        admins: Vec<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete low-confidence or stale patterns
    Prune {
        /// Administration to prune
        admin: String,

        /// Remove patterns below this confidence
        #[arg(long)]
        min_confidence: Option<f64>,

        /// Remove patterns last seen before this date (YYYY-MM-DD)
        #[arg(long)]
        stale_before: Option<String>,
    },

    /// Load administrations into the pattern cache
    WarmUp {
        /// Administrations to load
        #[arg(required = true)]
        admins: Vec<String>,
    },

    /// Run incremental refreshes on an interval
    Schedule {
        /// Administrations to refresh (default: every analyzed administration)
        admins: Vec<String>,

        /// Seconds between refreshes
        #[arg(long, default_value = "900")]
        interval_secs: u64,

        /// Stop after this many rounds
        #[arg(long)]
        rounds: Option<u64>,
    },
}

#[derive(Subcommand)]
pub enum BankAccountsAction {
    /// Register a bank account
    Add {
        /// Administration
        admin: String,

        /// Ledger account code (e.g. 1010)
        code: String,

        /// Display name
        #[arg(long)]
        name: Option<String>,
    },

    /// List registered bank accounts
    List {
        /// Only this administration
        admin: Option<String>,
    },

    /// Remove a bank account
    Remove {
        /// Administration
        admin: String,

        /// Ledger account code
        code: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Full,
    Incremental,
}

impl From<ModeArg> for AnalysisMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Full => AnalysisMode::Full,
            ModeArg::Incremental => AnalysisMode::Incremental,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}
