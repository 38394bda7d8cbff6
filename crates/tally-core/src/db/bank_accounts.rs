//! Bank account registry

use std::collections::HashSet;

use rusqlite::params;

use super::Database;
use crate::error::{Error, Result};
use crate::models::BankAccount;
use crate::store::BankAccountLookup;

impl Database {
    /// Register a bank account (updates the name if it already exists)
    pub fn add_bank_account(
        &self,
        administration: &str,
        account_code: &str,
        name: Option<&str>,
    ) -> Result<()> {
        let administration = administration.trim();
        let account_code = account_code.trim();
        if administration.is_empty() || account_code.is_empty() {
            return Err(Error::InvalidData(
                "administration and account code are required".into(),
            ));
        }

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO bank_accounts (administration, account_code, name)
            VALUES (?, ?, ?)
            ON CONFLICT(administration, account_code) DO UPDATE SET
                name = COALESCE(excluded.name, bank_accounts.name)
            "#,
            params![administration, account_code, name],
        )?;
        Ok(())
    }

    /// Remove a bank account, returning whether it existed
    pub fn remove_bank_account(&self, administration: &str, account_code: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM bank_accounts WHERE administration = ? AND account_code = ?",
            params![administration, account_code],
        )?;
        Ok(deleted > 0)
    }

    /// List bank accounts, optionally for a single administration
    pub fn list_bank_accounts(&self, administration: Option<&str>) -> Result<Vec<BankAccount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT administration, account_code, name FROM bank_accounts
            WHERE (?1 IS NULL OR administration = ?1)
            ORDER BY administration, account_code
            "#,
        )?;

        let accounts = stmt
            .query_map(params![administration], |row| {
                Ok(BankAccount {
                    administration: row.get(0)?,
                    account_code: row.get(1)?,
                    name: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(accounts)
    }
}

impl BankAccountLookup for Database {
    fn bank_accounts(&self, administration: &str) -> Result<HashSet<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT account_code FROM bank_accounts WHERE administration = ?")?;
        let codes = stmt
            .query_map(params![administration], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(codes)
    }
}
