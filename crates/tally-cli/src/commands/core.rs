//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `open_engine` / `engine_for` - Build a pattern engine over the database
//! - `cmd_init` - Initialize the database

use std::path::Path;

use anyhow::{Context, Result};
use tally_core::{config::EngineConfig, Database, PatternEngine};

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path is not valid UTF-8")?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// Load engine config from an explicit path, the override file, or defaults
pub fn load_config(config_path: Option<&Path>) -> Result<EngineConfig> {
    EngineConfig::load(config_path).context("Failed to load engine config")
}

/// Build a pattern engine over an open database
pub fn engine_for(db: Database, config_path: Option<&Path>) -> Result<PatternEngine> {
    let config = load_config(config_path)?;
    PatternEngine::new(db, config).context("Failed to start pattern engine")
}

pub fn open_engine(
    db_path: &Path,
    no_encrypt: bool,
    config_path: Option<&Path>,
) -> Result<PatternEngine> {
    let db = open_db(db_path, no_encrypt)?;
    engine_for(db, config_path)
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    open_db(db_path, no_encrypt)?;

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Register bank accounts: tally bank-accounts add ADMIN 1010");
    println!("  2. Import the ledger: tally import --file ledger.csv --admin ADMIN");
    println!("  3. Build patterns: tally analyze ADMIN --mode full");

    Ok(())
}
