//! Storage interfaces consumed by the engine
//!
//! The analyzer and cache never talk to SQLite directly. They take these
//! traits as `Arc<dyn ...>` handles so the ledger, the pattern tables and the
//! bank-account registry can live behind any backend:
//!
//! - `LedgerSource` - read-only view of the external transaction ledger
//! - `BankAccountLookup` - administration-scoped set of bank account codes
//! - `PatternStore` - the authoritative pattern and metadata tables
//!
//! `Database` implements all three.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{Error, Result};
use crate::models::{AnalysisMetadata, Pattern, PruneCriteria, Transaction};

/// Ledger rows returned by one read, with the id high-water mark they were
/// read at
#[derive(Debug, Clone, Default)]
pub struct LedgerBatch {
    pub transactions: Vec<Transaction>,
    /// Largest ledger id committed for the administration when the batch was
    /// read. Rows committed later always get a larger id.
    pub high_water: i64,
}

/// Read access to the external ledger
pub trait LedgerSource: Send + Sync {
    /// Transactions dated on or after `from_date`
    fn transactions_in_window(
        &self,
        administration: &str,
        from_date: NaiveDate,
    ) -> Result<LedgerBatch>;

    /// Transactions with a ledger id above `after_id`, dated on or after
    /// `from_date`
    fn transactions_after_id(
        &self,
        administration: &str,
        after_id: i64,
        from_date: NaiveDate,
    ) -> Result<LedgerBatch>;
}

/// Bank-account registry lookup
pub trait BankAccountLookup: Send + Sync {
    fn bank_accounts(&self, administration: &str) -> Result<HashSet<String>>;
}

/// How analysis results are written over existing rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertMode {
    /// Overwrite every field (full analysis owns the aggregate)
    Replace,
    /// Keep the larger occurrences/last_seen so concurrent writers converge
    Merge,
}

/// Everything an analysis run commits in one transaction
#[derive(Debug, Clone)]
pub struct AnalysisWrite<'a> {
    pub administration: &'a str,
    pub patterns: &'a [Pattern],
    pub mode: UpsertMode,
    /// Run start; becomes `last_analysis_date`
    pub analyzed_at: DateTime<Utc>,
    /// Ledger high-water mark the run read up to; becomes `last_ledger_id`
    pub high_water: i64,
    pub transactions_analyzed: i64,
    /// Checked before commit; an expired deadline rolls the write back
    pub deadline: Deadline,
}

/// The authoritative pattern tables
pub trait PatternStore: Send + Sync {
    fn load_patterns(&self, administration: &str) -> Result<Vec<Pattern>>;

    fn load_metadata(&self, administration: &str) -> Result<Option<AnalysisMetadata>>;

    /// Upsert patterns and metadata atomically, returning the new metadata
    fn write_analysis(&self, write: &AnalysisWrite<'_>) -> Result<AnalysisMetadata>;

    /// Delete all patterns and the metadata row for an administration
    fn clear(&self, administration: &str) -> Result<()>;

    /// Delete patterns matching the criteria, returning how many were removed
    fn prune(&self, administration: &str, criteria: &PruneCriteria) -> Result<usize>;
}

/// Deadline for a single analysis run
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    timeout: Duration,
}

impl Deadline {
    pub fn new(timeout: Duration) -> Self {
        Self {
            started: Instant::now(),
            timeout,
        }
    }

    /// A deadline that never expires
    pub fn unbounded() -> Self {
        Self::new(Duration::MAX)
    }

    pub fn is_expired(&self) -> bool {
        self.started.elapsed() > self.timeout
    }

    pub fn check(&self) -> Result<()> {
        if self.is_expired() {
            return Err(Error::Timeout(self.timeout));
        }
        Ok(())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline() {
        assert!(Deadline::unbounded().check().is_ok());

        let expired = Deadline::new(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));
        assert!(expired.is_expired());
        assert!(matches!(expired.check(), Err(Error::Timeout(_))));
    }
}
