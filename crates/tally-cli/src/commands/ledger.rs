//! Ledger import and bank-account registry commands

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use tally_core::{import::parse_ledger_csv, Database};

pub fn cmd_import(db: &Database, file: &Path, admin: Option<&str>) -> Result<()> {
    let csv_file =
        File::open(file).with_context(|| format!("Failed to open file: {}", file.display()))?;

    println!("📥 Importing ledger from {}...", file.display());

    let parsed = parse_ledger_csv(csv_file, admin)
        .with_context(|| format!("Failed to parse ledger CSV: {}", file.display()))?;

    println!("   Found {} transactions", parsed.transactions.len());

    let result = db
        .import_ledger(&parsed.transactions)
        .context("Failed to store ledger transactions")?;

    println!();
    println!("✅ Import complete!");
    println!("   Imported: {}", result.inserted);
    println!("   Skipped (duplicates): {}", result.duplicates);

    if !parsed.skipped.is_empty() {
        println!("   Skipped (invalid): {}", parsed.skipped.len());
        for row in parsed.skipped.iter().take(10) {
            println!("      line {}: {}", row.line, row.reason);
        }
        if parsed.skipped.len() > 10 {
            println!("      ... and {} more", parsed.skipped.len() - 10);
        }
    }

    if result.inserted > 0 {
        println!();
        println!("   Run 'tally analyze ADMIN' to fold the new rows into patterns.");
    }

    Ok(())
}

pub fn cmd_bank_accounts_add(
    db: &Database,
    admin: &str,
    code: &str,
    name: Option<&str>,
) -> Result<()> {
    db.add_bank_account(admin, code, name)
        .context("Failed to add bank account")?;
    println!("✅ Registered bank account {} for {}", code.trim(), admin.trim());
    Ok(())
}

pub fn cmd_bank_accounts_list(db: &Database, admin: Option<&str>) -> Result<()> {
    let accounts = db.list_bank_accounts(admin)?;

    if accounts.is_empty() {
        println!("No bank accounts registered.");
        println!("Add one with: tally bank-accounts add ADMIN CODE");
        return Ok(());
    }

    println!("{:<20} {:<12} NAME", "ADMINISTRATION", "CODE");
    println!("{}", "-".repeat(50));
    for account in &accounts {
        println!(
            "{:<20} {:<12} {}",
            super::truncate(&account.administration, 20),
            account.account_code,
            account.name.as_deref().unwrap_or("-")
        );
    }
    println!();
    println!("{} bank account(s)", accounts.len());

    Ok(())
}

pub fn cmd_bank_accounts_remove(db: &Database, admin: &str, code: &str) -> Result<()> {
    if db.remove_bank_account(admin, code)? {
        println!("✅ Removed bank account {} from {}", code, admin);
        Ok(())
    } else {
        anyhow::bail!("Bank account {} not found for {}", code, admin)
    }
}
