//! Pattern engine: the public entry point wiring analysis, cache and applier

use std::sync::Arc;

use crate::analysis::PatternAnalyzer;
use crate::applier::PatternApplier;
use crate::cache::{CacheLookup, CacheStats, FileSnapshotStore, PatternCache, SnapshotStore};
use crate::classifier::BankAccountClassifier;
use crate::config::EngineConfig;
use crate::db::Database;
use crate::error::Result;
use crate::models::{
    AnalysisMode, AnalysisResult, ApplyResult, Pattern, PredictedTransaction, PruneCriteria,
    Transaction,
};
use crate::resolver::ConflictResolver;
use crate::store::{BankAccountLookup, LedgerSource, PatternStore};
use crate::verb::VerbExtractor;

/// Pattern analysis and prediction for all administrations of one database
pub struct PatternEngine {
    analyzer: Arc<PatternAnalyzer>,
    cache: Arc<PatternCache>,
    applier: PatternApplier,
    config: EngineConfig,
}

impl PatternEngine {
    /// Engine over a SQLite database, with snapshots in the configured
    /// directory
    pub fn new(db: Database, config: EngineConfig) -> Result<Self> {
        let db = Arc::new(db);
        let snapshots = Arc::new(FileSnapshotStore::new(config.cache.snapshot_dir()));
        Self::with_stores(db.clone(), db.clone(), db, snapshots, config)
    }

    /// Engine over arbitrary storage backends
    pub fn with_stores(
        ledger: Arc<dyn LedgerSource>,
        accounts: Arc<dyn BankAccountLookup>,
        store: Arc<dyn PatternStore>,
        snapshots: Arc<dyn SnapshotStore>,
        config: EngineConfig,
    ) -> Result<Self> {
        let extractor = Arc::new(VerbExtractor::new(&config.verbs)?);
        let classifier = BankAccountClassifier::new(accounts);

        let analyzer = Arc::new(PatternAnalyzer::new(
            ledger,
            store.clone(),
            classifier.clone(),
            extractor.clone(),
            config.analysis.clone(),
            config.confidence.clone(),
        ));
        let cache = Arc::new(PatternCache::new(
            store,
            snapshots,
            analyzer.clone(),
            config.cache.clone(),
        ));
        let applier = PatternApplier::new(
            extractor,
            classifier,
            ConflictResolver::new(config.resolver.clone()),
            cache.clone(),
            config.applier.clone(),
            config.analysis.as_of,
        );

        Ok(Self {
            analyzer,
            cache,
            applier,
            config,
        })
    }

    /// Fill missing fields on new transactions of one administration
    pub fn apply_patterns(
        &self,
        transactions: &[Transaction],
        administration: &str,
    ) -> Result<(Vec<PredictedTransaction>, ApplyResult)> {
        self.applier.apply(transactions, administration)
    }

    /// Re-run analysis and refresh every cache tier
    pub fn refresh_patterns(
        &self,
        administration: &str,
        mode: AnalysisMode,
    ) -> Result<AnalysisResult> {
        self.cache.refresh(administration, mode)
    }

    pub fn invalidate_cache(&self, administration: &str) -> Result<()> {
        self.cache.invalidate(administration)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Load an administration into memory, returning its pattern count
    pub fn warm_up(&self, administration: &str) -> Result<usize> {
        self.cache.warm_up(administration)
    }

    pub fn prune_patterns(&self, administration: &str, criteria: &PruneCriteria) -> Result<usize> {
        self.cache.prune(administration, criteria)
    }

    /// Current patterns of an administration, in stored order
    pub fn patterns(&self, administration: &str) -> Result<Vec<Pattern>> {
        Ok(self.cache.get(administration)?.patterns().to_vec())
    }

    /// Pattern set plus the tier that served it
    pub fn lookup(&self, administration: &str) -> Result<CacheLookup> {
        self.cache.lookup(administration)
    }

    pub fn analyzer(&self) -> &PatternAnalyzer {
        &self.analyzer
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
