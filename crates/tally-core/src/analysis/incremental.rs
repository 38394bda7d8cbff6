//! Incremental updates
//!
//! Folds ledger rows added after the last analysis into the stored aggregates
//! instead of rescanning the window. The cutoff is the ledger id high-water
//! mark recorded by the previous run. Ids follow commit order, so a row that
//! commits while a run is reading is picked up by the next run and counted
//! exactly once.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{info, warn};

use super::{PatternAnalyzer, PatternBuilder, PatternKey};
use crate::classifier::validate_administration;
use crate::error::{Error, Result};
use crate::models::{AnalysisMetadata, AnalysisMode, AnalysisResult, Pattern};
use crate::store::{AnalysisWrite, Deadline, UpsertMode};

impl PatternAnalyzer {
    /// Fold newly imported transactions into the stored patterns.
    ///
    /// Runs a full analysis when there is no previous run. Any other failure
    /// except a timeout or configuration error falls back to a full analysis.
    pub fn analyze_incremental(&self, administration: &str) -> Result<AnalysisResult> {
        validate_administration(administration)?;
        let _guard = self.enter(administration);

        let metadata = match self.store.load_metadata(administration) {
            Ok(Some(metadata)) if metadata.has_ledger_mark() => metadata,
            Ok(Some(_)) => {
                info!(administration, "No ledger high-water mark recorded, running full analysis");
                return self.run_full(administration);
            }
            Ok(None) => {
                info!(administration, "No previous analysis, running full analysis");
                return self.run_full(administration);
            }
            Err(e) => return self.fall_back(administration, e),
        };

        match self.run_incremental(administration, &metadata) {
            Ok(result) => Ok(result),
            Err(e) if e.is_configuration() || matches!(e, Error::Timeout(_)) => Err(e),
            Err(e) => self.fall_back(administration, e),
        }
    }

    fn fall_back(&self, administration: &str, error: Error) -> Result<AnalysisResult> {
        warn!(administration, error = %error, "Incremental analysis failed, falling back to full");
        let mut result = self.run_full(administration)?;
        result.fell_back_to_full = true;
        Ok(result)
    }

    fn run_incremental(
        &self,
        administration: &str,
        previous: &AnalysisMetadata,
    ) -> Result<AnalysisResult> {
        let deadline = Deadline::new(self.analysis.timeout);
        let started = Utc::now();
        let as_of = self.analysis.today();

        let accounts = self.classifier.accounts_for(administration)?;
        let batch = self.ledger.transactions_after_id(
            administration,
            previous.last_ledger_id,
            self.window_start(as_of),
        )?;
        let transactions = batch.transactions;
        deadline.check()?;

        let mut existing: HashMap<PatternKey, Pattern> = self
            .store
            .load_patterns(administration)?
            .into_iter()
            .map(|p| (p.key(), p))
            .collect();

        let mut new_patterns = 0i64;
        let mut updated_patterns = 0i64;
        let mut builders: HashMap<PatternKey, PatternBuilder> = HashMap::new();
        let stats = self.fold_with(&accounts, &transactions, &mut builders, &deadline, |key| {
            let found = existing.remove(key);
            match found {
                Some(_) => updated_patterns += 1,
                None => new_patterns += 1,
            }
            found
        })?;

        let patterns = self.finish(builders, as_of);

        let metadata = self.store.write_analysis(&AnalysisWrite {
            administration,
            patterns: &patterns,
            mode: UpsertMode::Merge,
            analyzed_at: started,
            high_water: batch.high_water,
            transactions_analyzed: previous.transactions_analyzed + transactions.len() as i64,
            deadline,
        })?;

        let result = AnalysisResult {
            administration: administration.to_string(),
            mode: AnalysisMode::Incremental,
            transactions_analyzed: transactions.len() as i64,
            transactions_skipped: stats.skipped,
            patterns_total: metadata.patterns_discovered,
            new_patterns,
            updated_patterns,
            fell_back_to_full: false,
            duration_ms: deadline.elapsed().as_millis() as i64,
        };

        info!(
            administration,
            transactions = result.transactions_analyzed,
            new = result.new_patterns,
            updated = result.updated_patterns,
            patterns = result.patterns_total,
            "Incremental pattern analysis complete"
        );
        Ok(result)
    }
}
