//! Pattern application: filling missing fields on new transactions

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::cache::{PatternCache, PatternSet};
use crate::classifier::{validate_administration, BankAccountClassifier, Classification};
use crate::config::ApplierConfig;
use crate::error::Result;
use crate::models::{
    ApplyResult, Field, FieldConfidence, Pattern, PredictedTransaction, Side, Transaction,
};
use crate::resolver::ConflictResolver;
use crate::verb::VerbExtractor;

/// Fills missing debet, credit and reference fields from cached patterns.
///
/// Read-only over the cache: applying never writes patterns.
pub struct PatternApplier {
    extractor: Arc<VerbExtractor>,
    classifier: BankAccountClassifier,
    resolver: ConflictResolver,
    cache: Arc<PatternCache>,
    config: ApplierConfig,
    as_of: Option<NaiveDate>,
}

/// Why a transaction got no prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Miss {
    ForeignAdministration,
    NoVerb,
    NoCandidate,
    NothingToFill,
}

impl PatternApplier {
    pub fn new(
        extractor: Arc<VerbExtractor>,
        classifier: BankAccountClassifier,
        resolver: ConflictResolver,
        cache: Arc<PatternCache>,
        config: ApplierConfig,
        as_of: Option<NaiveDate>,
    ) -> Self {
        Self {
            extractor,
            classifier,
            resolver,
            cache,
            config,
            as_of,
        }
    }

    /// Fill missing fields on a batch of transactions.
    ///
    /// Only configuration errors (blank or unknown administration) fail the
    /// call. Every other problem leaves the transaction unchanged and counts
    /// it as a failed prediction.
    pub fn apply(
        &self,
        transactions: &[Transaction],
        administration: &str,
    ) -> Result<(Vec<PredictedTransaction>, ApplyResult)> {
        validate_administration(administration)?;
        let accounts = self.classifier.accounts_or_empty(administration)?;
        let set = self.cache.get(administration)?;
        let today = self
            .as_of
            .unwrap_or_else(|| chrono::Utc::now().date_naive());

        let mut result = ApplyResult::default();
        let mut confidence_sum = 0.0;
        let mut predicted = Vec::with_capacity(transactions.len());

        for tx in transactions {
            result.total_processed += 1;
            let mut out = PredictedTransaction {
                transaction: tx.clone(),
                confidence: FieldConfidence::default(),
                filled: Vec::new(),
                matched_verb: None,
            };

            if tx.administration == administration && !tx.needs_prediction() {
                result.already_complete += 1;
                predicted.push(out);
                continue;
            }

            let classification = accounts.classify(tx);
            let outcome = self.predict(tx, administration, &classification, &set, today);

            match outcome {
                Ok(pattern) => {
                    fill(&mut out, pattern, &classification);
                    if out.filled.is_empty() {
                        debug!(description = %tx.description, "Matched pattern has nothing to fill");
                        result.failed_predictions += 1;
                    } else {
                        for field in &out.filled {
                            result.record(*field);
                            confidence_sum += pattern.confidence;
                        }
                        out.matched_verb = Some(pattern.verb.clone());
                    }
                }
                Err(miss) => {
                    debug!(description = %tx.description, reason = ?miss, "No prediction");
                    result.failed_predictions += 1;
                }
            }

            predicted.push(out);
        }

        let filled = result.predictions_made();
        if filled > 0 {
            result.average_confidence = confidence_sum / filled as f64;
        }

        info!(
            administration,
            processed = result.total_processed,
            predictions = filled,
            failed = result.failed_predictions,
            "Applied patterns"
        );
        Ok((predicted, result))
    }

    fn predict<'s>(
        &self,
        tx: &Transaction,
        administration: &str,
        classification: &Classification,
        set: &'s PatternSet,
        today: NaiveDate,
    ) -> std::result::Result<&'s Pattern, Miss> {
        if tx.administration != administration {
            return Err(Miss::ForeignAdministration);
        }
        if !wants_any(tx, classification) {
            return Err(Miss::NothingToFill);
        }
        let verb = self
            .extractor
            .try_extract(&tx.description)
            .ok_or(Miss::NoVerb)?;
        let candidates = set.candidates(&verb, self.config.min_confidence);
        self.resolver
            .resolve(&candidates, tx, classification.bank_account(), today)
            .ok_or(Miss::NoCandidate)
    }
}

/// Whether any missing field could be filled for this classification
fn wants_any(tx: &Transaction, classification: &Classification) -> bool {
    targets(tx, classification).next().is_some() || tx.is_missing(Field::Reference)
}

/// Account fields to fill, paired with the side of the pattern to read.
///
/// With a known bank side only the opposite side is a target, and it takes
/// the pattern's counter account. Otherwise each empty side takes the
/// pattern's value for that same side.
fn targets<'a>(
    tx: &'a Transaction,
    classification: &'a Classification,
) -> impl Iterator<Item = Side> + 'a {
    [Side::Debet, Side::Credit]
        .into_iter()
        .filter(move |side| tx.is_missing(side.field()))
        .filter(move |side| match classification.target_side() {
            Some(target) => *side == target,
            None => true,
        })
}

fn fill(out: &mut PredictedTransaction, pattern: &Pattern, classification: &Classification) {
    let tx = out.transaction.clone();

    for side in targets(&tx, classification) {
        let value = match classification {
            Classification::Bank { .. } => pattern.counter_account(),
            Classification::Ambiguous => pattern.value_for(side.field()),
        };
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            set(out, side.field(), value, pattern.confidence);
        }
    }

    if tx.is_missing(Field::Reference) {
        if let Some(reference) = pattern
            .reference_number
            .as_deref()
            .filter(|v| !v.trim().is_empty())
        {
            set(out, Field::Reference, reference, pattern.confidence);
        }
    }
}

fn set(out: &mut PredictedTransaction, field: Field, value: &str, confidence: f64) {
    out.transaction.set_field(field, value.to_string());
    out.confidence.set(field, confidence);
    out.filled.push(field);
}
