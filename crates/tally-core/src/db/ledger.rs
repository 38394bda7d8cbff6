//! Ledger operations
//!
//! The ledger is owned by the ingestion pipeline. These writers exist so the
//! CLI and tests can load it; the engine itself only reads through
//! `LedgerSource`.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{format_datetime, parse_date, Database, DATE_FORMAT};
use crate::error::Result;
use crate::models::Transaction;
use crate::store::{LedgerBatch, LedgerSource};

/// Outcome of loading transactions into the ledger
#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerImportResult {
    pub inserted: usize,
    pub duplicates: usize,
}

const LEDGER_COLUMNS: &str = "id, administration, transaction_date, description, amount, \
     debet_account, credit_account, reference_number";

/// Generate a unique hash for deduplication
fn import_hash(tx: &Transaction) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tx.administration.as_bytes());
    hasher.update(tx.date.to_string().as_bytes());
    hasher.update(tx.description.as_bytes());
    hasher.update(tx.amount.to_be_bytes());
    for field in [&tx.debet_account, &tx.credit_account, &tx.reference_number] {
        hasher.update(field.as_deref().unwrap_or("").as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Map a ledger row, returning None (and logging) for malformed dates
fn row_to_transaction(row: &Row<'_>) -> rusqlite::Result<Option<Transaction>> {
    let id: i64 = row.get(0)?;
    let date_str: String = row.get(2)?;
    let date = match parse_date(&date_str) {
        Ok(date) => date,
        Err(e) => {
            warn!(ledger_id = id, error = %e, "Skipping ledger row with malformed date");
            return Ok(None);
        }
    };

    Ok(Some(Transaction {
        id: Some(id),
        administration: row.get(1)?,
        date,
        description: row.get(3)?,
        amount: row.get(4)?,
        debet_account: row.get(5)?,
        credit_account: row.get(6)?,
        reference_number: row.get(7)?,
    }))
}

impl Database {
    /// Insert a ledger transaction stamped with the current time
    ///
    /// Returns None when an identical row was already imported. The stamp is
    /// for auditing only; analyses track new rows by id.
    pub fn insert_ledger_transaction(&self, tx: &Transaction) -> Result<Option<i64>> {
        let conn = self.conn()?;
        let hash = import_hash(tx);

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM ledger_transactions WHERE import_hash = ?",
                params![hash],
                |row| row.get(0),
            )
            .optional()?;

        if existing.is_some() {
            debug!(description = %tx.description, "Skipping duplicate ledger row");
            return Ok(None);
        }

        conn.execute(
            r#"
            INSERT INTO ledger_transactions
                (administration, transaction_date, description, amount,
                 debet_account, credit_account, reference_number, import_hash, imported_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                tx.administration,
                tx.date.format(DATE_FORMAT).to_string(),
                tx.description,
                tx.amount,
                tx.debet_account,
                tx.credit_account,
                tx.reference_number,
                hash,
                format_datetime(&Utc::now()),
            ],
        )?;

        Ok(Some(conn.last_insert_rowid()))
    }

    /// Insert a batch of ledger transactions, skipping duplicates
    pub fn import_ledger(&self, transactions: &[Transaction]) -> Result<LedgerImportResult> {
        let mut result = LedgerImportResult::default();
        for tx in transactions {
            match self.insert_ledger_transaction(tx)? {
                Some(_) => result.inserted += 1,
                None => result.duplicates += 1,
            }
        }
        Ok(result)
    }

    /// Count ledger transactions for an administration
    pub fn count_ledger_transactions(&self, administration: &str) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM ledger_transactions WHERE administration = ?",
            params![administration],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Read rows above `after_id`, bounded by the committed high-water mark
    fn read_batch(
        &self,
        administration: &str,
        after_id: i64,
        from_date: NaiveDate,
    ) -> Result<LedgerBatch> {
        let conn = self.conn()?;

        // Uncommitted rows already hold ids above every committed one, so all
        // ids up to the mark stay visible to the query below.
        let high_water: i64 = conn.query_row(
            "SELECT COALESCE(MAX(id), 0) FROM ledger_transactions WHERE administration = ?",
            params![administration],
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {} FROM ledger_transactions \
             WHERE administration = ? AND id > ? AND id <= ? AND transaction_date >= ? \
             ORDER BY transaction_date, id",
            LEDGER_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![
                    administration,
                    after_id,
                    high_water,
                    from_date.format(DATE_FORMAT).to_string(),
                ],
                row_to_transaction,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(LedgerBatch {
            transactions: rows.into_iter().flatten().collect(),
            high_water: high_water.max(after_id),
        })
    }
}

impl LedgerSource for Database {
    fn transactions_in_window(
        &self,
        administration: &str,
        from_date: NaiveDate,
    ) -> Result<LedgerBatch> {
        self.read_batch(administration, 0, from_date)
    }

    fn transactions_after_id(
        &self,
        administration: &str,
        after_id: i64,
        from_date: NaiveDate,
    ) -> Result<LedgerBatch> {
        self.read_batch(administration, after_id, from_date)
    }
}
