//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `ledger` - The transaction ledger the analyzer reads from
//! - `bank_accounts` - Administration-scoped bank account registry
//! - `patterns` - Learned patterns and analysis metadata

use chrono::{DateTime, NaiveDate, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::{Error, Result};

mod bank_accounts;
mod ledger;
mod patterns;

pub use ledger::LedgerImportResult;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "TALLY_DB_KEY";

/// Text format for stored timestamps (lexical order equals time order)
pub(crate) const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

/// Derive an encryption key from a passphrase using Argon2
///
/// Uses a fixed application salt so the same passphrase always produces the same key,
/// regardless of database path.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Changing this would invalidate all existing encrypted databases
    const APP_SALT: &[u8; 16] = b"tally-salt-v1-fx";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Failed to create salt: {}", e)))?;

    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;

    let hash_str = hash
        .hash
        .ok_or_else(|| Error::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_str.as_bytes()))
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

/// Parse a stored timestamp
pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|dt| dt.and_utc())
        .map_err(|_| Error::InvalidData(format!("Invalid timestamp: {}", s)))
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|_| Error::InvalidData(format!("Invalid date: {}", s)))
}

/// Convert a domain error raised inside a row mapper
pub(crate) fn to_sql_err(e: Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Create a new database connection pool with encryption
    ///
    /// Requires `TALLY_DB_KEY` environment variable to be set.
    /// The database will be encrypted using SQLCipher with a key derived
    /// from the passphrase via Argon2.
    ///
    /// Returns an error if `TALLY_DB_KEY` is not set. Use `new_unencrypted()`
    /// for development/testing without encryption.
    pub fn new(path: &str) -> Result<Self> {
        let encryption_key = std::env::var(DB_KEY_ENV).ok();
        match encryption_key {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Database encryption required. Set {} environment variable with your passphrase, \
                or use --no-encrypt for unencrypted databases (not recommended for production).",
                DB_KEY_ENV
            ))),
        }
    }

    /// Create a new unencrypted database connection pool
    ///
    /// WARNING: Only use for development or testing.
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Create a new database with an explicit encryption key
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);

        let pool = if let Some(pass) = passphrase {
            let key = derive_key(pass)?;
            let key_pragma = format!("PRAGMA key = 'x\"{}\"';", key);

            let manager = manager.with_init(move |conn| {
                conn.execute_batch(&key_pragma)?;
                // Concurrent writers wait instead of failing with SQLITE_BUSY
                conn.busy_timeout(std::time::Duration::from_secs(5))?;
                Ok(())
            });

            Pool::builder().max_size(10).build(manager)?
        } else {
            let manager = manager.with_init(|conn| {
                conn.busy_timeout(std::time::Duration::from_secs(5))?;
                Ok(())
            });
            Pool::builder().max_size(10).build(manager)?
        };

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create an in-memory database (for testing)
    ///
    /// Note: Uses a temporary file rather than `:memory:` because every pooled
    /// connection would otherwise see its own empty database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "tally_test_{}_{}.db",
            std::process::id(),
            id
        ));

        // Remove any existing file
        let _ = std::fs::remove_file(&path);

        Self::new_unencrypted(&path.to_string_lossy())
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run a closure inside an explicit transaction, rolling back on error
    pub(crate) fn with_transaction<T>(
        &self,
        f: impl FnOnce(&DbConn) -> Result<T>,
    ) -> Result<T> {
        let conn = self.conn()?;
        conn.execute("BEGIN IMMEDIATE TRANSACTION", [])?;

        match f(&conn) {
            Ok(value) => {
                conn.execute("COMMIT", [])?;
                Ok(value)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Enable foreign keys
            PRAGMA foreign_keys = ON;

            -- WAL mode: readers don't block writers
            PRAGMA journal_mode = WAL;

            -- Cache size: ~8MB (2000 pages * 4KB default page size)
            PRAGMA cache_size = 2000;

            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            -- External ledger (append-only; the engine only reads it)
            -- AUTOINCREMENT: ids never repeat, so they order commits
            CREATE TABLE IF NOT EXISTS ledger_transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                administration TEXT NOT NULL,
                transaction_date DATE NOT NULL,
                description TEXT NOT NULL,
                amount REAL NOT NULL,
                debet_account TEXT,
                credit_account TEXT,
                reference_number TEXT,
                import_hash TEXT UNIQUE,
                imported_at TEXT NOT NULL                 -- YYYY-MM-DD HH:MM:SS.ffffff UTC
            );

            CREATE INDEX IF NOT EXISTS idx_ledger_admin_date ON ledger_transactions(administration, transaction_date);

            -- Bank accounts per administration
            CREATE TABLE IF NOT EXISTS bank_accounts (
                administration TEXT NOT NULL,
                account_code TEXT NOT NULL,
                name TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (administration, account_code)
            );

            -- Learned patterns
            CREATE TABLE IF NOT EXISTS patterns (
                id INTEGER PRIMARY KEY,
                administration TEXT NOT NULL,
                bank_account TEXT NOT NULL,
                verb TEXT NOT NULL,                       -- COMPANY or COMPANY|REFERENCE
                verb_company TEXT NOT NULL,
                verb_reference TEXT,
                is_compound BOOLEAN NOT NULL DEFAULT 0,
                reference_number TEXT,
                debet_account TEXT,
                credit_account TEXT,
                occurrences INTEGER NOT NULL CHECK (occurrences >= 1),
                confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
                last_seen DATE NOT NULL,
                total_amount REAL NOT NULL DEFAULT 0,
                sample_description TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(administration, bank_account, verb)
            );

            CREATE INDEX IF NOT EXISTS idx_patterns_admin_company ON patterns(administration, verb_company);

            -- One row per administration
            CREATE TABLE IF NOT EXISTS analysis_metadata (
                administration TEXT PRIMARY KEY,
                last_analysis_date TEXT NOT NULL,
                last_ledger_id INTEGER NOT NULL DEFAULT 0,   -- ledger high-water mark
                transactions_analyzed INTEGER NOT NULL DEFAULT 0,
                patterns_discovered INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;

        // Databases created before the ledger high-water mark existed
        let has_ledger_mark: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info('analysis_metadata') WHERE name = 'last_ledger_id'",
            [],
            |row| row.get(0),
        )?;
        if has_ledger_mark == 0 {
            conn.execute(
                "ALTER TABLE analysis_metadata ADD COLUMN last_ledger_id INTEGER NOT NULL DEFAULT 0",
                [],
            )?;
            info!("Added last_ledger_id to analysis_metadata");
        }

        info!("Database schema initialized");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
