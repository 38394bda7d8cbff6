//! Tally Core Library
//!
//! Transaction pattern analysis and caching for bookkeeping ledgers:
//! - Verb extraction from free-text descriptions
//! - Bank-account classification per administration
//! - Full and incremental pattern analysis over the ledger
//! - Three-tier pattern cache (memory, database, file snapshots)
//! - Conflict resolution and prediction of missing fields
//! - Database access and migrations
//! - Ledger CSV import

use std::sync::{Mutex, MutexGuard};

pub mod analysis;
pub mod applier;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod import;
pub mod models;
pub mod resolver;
pub mod store;
pub mod verb;

pub use analysis::PatternAnalyzer;
pub use applier::PatternApplier;
pub use cache::{
    CacheLookup, CacheStats, FileSnapshotStore, PatternCache, PatternSet, PatternSnapshot,
    SnapshotStore,
};
pub use classifier::{BankAccountClassifier, BankAccounts, Classification};
pub use config::EngineConfig;
pub use db::{Database, LedgerImportResult};
pub use engine::PatternEngine;
pub use error::{Error, Result};
pub use models::*;
pub use resolver::ConflictResolver;
pub use store::{BankAccountLookup, Deadline, LedgerBatch, LedgerSource, PatternStore};
pub use verb::{Verb, VerbExtractor};

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
