//! Historical pattern analysis
//!
//! Scans an administration's ledger window and aggregates transactions into
//! patterns keyed by (bank_account, verb). Two modes:
//!
//! - **Full**: re-aggregates the whole window and replaces stored rows.
//! - **Incremental**: folds only ledger rows added since the last run into the
//!   stored aggregates (see `incremental`).
//!
//! Nothing is written until the final commit, so a failed or timed-out run
//! leaves the stored patterns untouched.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{Duration, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::classifier::{validate_administration, BankAccountClassifier, BankAccounts};
use crate::config::{AnalysisConfig, ConfidenceConfig};
use crate::error::Result;
use crate::lock;
use crate::models::{AnalysisMode, AnalysisResult, Pattern, Transaction};
use crate::store::{AnalysisWrite, Deadline, LedgerSource, PatternStore, UpsertMode};
use crate::verb::VerbExtractor;

mod aggregate;
mod incremental;

pub use aggregate::confidence;
pub(crate) use aggregate::PatternBuilder;

/// Deadline is re-checked after this many folded transactions
const DEADLINE_CHECK_INTERVAL: usize = 1000;

type PatternKey = (String, String);

/// Builds and refreshes stored patterns from the ledger
pub struct PatternAnalyzer {
    ledger: Arc<dyn LedgerSource>,
    store: Arc<dyn PatternStore>,
    classifier: BankAccountClassifier,
    extractor: Arc<VerbExtractor>,
    analysis: AnalysisConfig,
    confidence: ConfidenceConfig,
    /// In-flight runs per administration, for overlap detection
    running: Mutex<HashMap<String, usize>>,
}

/// Tracks one in-flight run; released on drop
struct RunGuard<'a> {
    running: &'a Mutex<HashMap<String, usize>>,
    administration: String,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut running = lock(self.running);
        if let Some(count) = running.get_mut(&self.administration) {
            *count -= 1;
            if *count == 0 {
                running.remove(&self.administration);
            }
        }
    }
}

/// Result of folding a batch of transactions
#[derive(Debug, Default)]
pub(crate) struct FoldStats {
    pub analyzed: i64,
    pub skipped: i64,
}

impl PatternAnalyzer {
    pub fn new(
        ledger: Arc<dyn LedgerSource>,
        store: Arc<dyn PatternStore>,
        classifier: BankAccountClassifier,
        extractor: Arc<VerbExtractor>,
        analysis: AnalysisConfig,
        confidence: ConfidenceConfig,
    ) -> Self {
        Self {
            ledger,
            store,
            classifier,
            extractor,
            analysis,
            confidence,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Run an analysis in the requested mode
    pub fn analyze(&self, administration: &str, mode: AnalysisMode) -> Result<AnalysisResult> {
        match mode {
            AnalysisMode::Full => self.analyze_full(administration),
            AnalysisMode::Incremental => self.analyze_incremental(administration),
        }
    }

    /// Re-aggregate the full ledger window and replace stored patterns.
    ///
    /// Fails without touching stored patterns when the ledger cannot be read
    /// or the deadline expires.
    pub fn analyze_full(&self, administration: &str) -> Result<AnalysisResult> {
        validate_administration(administration)?;
        let _guard = self.enter(administration);
        self.run_full(administration)
    }

    fn run_full(&self, administration: &str) -> Result<AnalysisResult> {
        let deadline = Deadline::new(self.analysis.timeout);
        let started = Utc::now();
        let as_of = self.analysis.today();

        let accounts = self.classifier.accounts_for(administration)?;
        let batch = self
            .ledger
            .transactions_in_window(administration, self.window_start(as_of))?;
        let transactions = batch.transactions;
        deadline.check()?;

        let existing: HashSet<PatternKey> = self
            .store
            .load_patterns(administration)?
            .into_iter()
            .map(|p| p.key())
            .collect();

        let mut builders: HashMap<PatternKey, PatternBuilder> = HashMap::new();
        let stats = self.fold(&accounts, &transactions, &mut builders, &deadline)?;

        let patterns = self.finish(builders, as_of);
        let new_patterns = patterns
            .iter()
            .filter(|p| !existing.contains(&p.key()))
            .count() as i64;
        self.check_reduction(administration, patterns.len(), transactions.len());

        let metadata = self.store.write_analysis(&AnalysisWrite {
            administration,
            patterns: &patterns,
            mode: UpsertMode::Replace,
            analyzed_at: started,
            high_water: batch.high_water,
            transactions_analyzed: transactions.len() as i64,
            deadline,
        })?;

        let result = AnalysisResult {
            administration: administration.to_string(),
            mode: AnalysisMode::Full,
            transactions_analyzed: transactions.len() as i64,
            transactions_skipped: stats.skipped,
            patterns_total: metadata.patterns_discovered,
            new_patterns,
            updated_patterns: patterns.len() as i64 - new_patterns,
            fell_back_to_full: false,
            duration_ms: deadline.elapsed().as_millis() as i64,
        };

        info!(
            administration,
            transactions = result.transactions_analyzed,
            folded = stats.analyzed,
            skipped = result.transactions_skipped,
            patterns = result.patterns_total,
            duration_ms = result.duration_ms,
            "Full pattern analysis complete"
        );
        Ok(result)
    }

    /// First date inside the analysis window
    fn window_start(&self, as_of: NaiveDate) -> NaiveDate {
        as_of - Duration::days(self.analysis.window_days)
    }

    /// Register a run, warning when another one is already in flight
    fn enter(&self, administration: &str) -> RunGuard<'_> {
        let mut running = lock(&self.running);
        let count = running.entry(administration.to_string()).or_insert(0);
        if *count > 0 {
            warn!(
                administration,
                in_flight = *count,
                "Overlapping pattern analysis; proceeding (upserts converge)"
            );
        }
        *count += 1;
        RunGuard {
            running: &self.running,
            administration: administration.to_string(),
        }
    }

    /// Fold transactions into builders keyed by (bank_account, verb).
    ///
    /// Ambiguous transactions and empty verbs are skipped and counted.
    /// `builders` may be pre-seeded through `seed` for incremental runs.
    fn fold_with(
        &self,
        accounts: &BankAccounts,
        transactions: &[Transaction],
        builders: &mut HashMap<PatternKey, PatternBuilder>,
        deadline: &Deadline,
        mut seed: impl FnMut(&PatternKey) -> Option<Pattern>,
    ) -> Result<FoldStats> {
        let mut stats = FoldStats::default();

        for (i, tx) in transactions.iter().enumerate() {
            if i % DEADLINE_CHECK_INTERVAL == 0 {
                deadline.check()?;
            }

            let classification = accounts.classify(tx);
            let Some(bank_account) = classification.bank_account() else {
                debug!(id = ?tx.id, "Skipping ambiguous transaction");
                stats.skipped += 1;
                continue;
            };
            let Some(verb) = self.extractor.try_extract(&tx.description) else {
                debug!(id = ?tx.id, description = %tx.description, "Skipping transaction without verb");
                stats.skipped += 1;
                continue;
            };

            let key = (bank_account.to_string(), verb.key());
            match builders.get_mut(&key) {
                Some(builder) => builder.observe(tx),
                None => {
                    let builder = match seed(&key) {
                        Some(existing) => {
                            let mut builder = PatternBuilder::resume(existing);
                            builder.observe(tx);
                            builder
                        }
                        None => PatternBuilder::new(bank_account, &verb, tx),
                    };
                    builders.insert(key, builder);
                }
            }
            stats.analyzed += 1;
        }

        Ok(stats)
    }

    fn fold(
        &self,
        accounts: &BankAccounts,
        transactions: &[Transaction],
        builders: &mut HashMap<PatternKey, PatternBuilder>,
        deadline: &Deadline,
    ) -> Result<FoldStats> {
        self.fold_with(accounts, transactions, builders, deadline, |_| None)
    }

    /// Compute confidences and order patterns deterministically
    fn finish(
        &self,
        builders: HashMap<PatternKey, PatternBuilder>,
        as_of: NaiveDate,
    ) -> Vec<Pattern> {
        let mut patterns: Vec<Pattern> = builders
            .into_values()
            .map(|b| b.finish(as_of, &self.confidence))
            .collect();
        patterns.sort_by(|a, b| a.verb.cmp(&b.verb).then(a.bank_account.cmp(&b.bank_account)));
        patterns
    }

    /// Patterns must stay a small fraction of the transactions they summarize
    fn check_reduction(&self, administration: &str, patterns: usize, transactions: usize) {
        if transactions == 0 {
            return;
        }
        let ratio = patterns as f64 / transactions as f64;
        if ratio > self.analysis.max_pattern_ratio {
            warn!(
                administration,
                patterns,
                transactions,
                ratio,
                "Pattern count is high relative to transactions; check verb consolidation rules"
            );
        }
    }
}
