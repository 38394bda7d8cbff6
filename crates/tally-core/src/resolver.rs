//! Conflict resolution between candidate patterns
//!
//! When a verb yields several candidates, each is scored as
//!
//! `recency_weight * recency + frequency_weight * frequency
//!  + amount_weight * amount_similarity + bank_account_weight * bank_account_match`
//!
//! with the default weights 0.4 / 0.3 / 0.2 / 0.1. The winner is fully
//! determined by the candidate set and the transaction: ties fall back to
//! later `last_seen`, then more occurrences, then the lexically smallest
//! (verb, bank_account).

use std::cmp::Ordering;

use chrono::NaiveDate;

use crate::config::ResolverConfig;
use crate::models::{Pattern, Transaction};

/// Scores closer than this are ties
const SCORE_EPSILON: f64 = 1e-9;

/// Score components of one candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateScore {
    pub recency: f64,
    pub frequency: f64,
    pub amount_similarity: f64,
    pub bank_account_match: f64,
    pub total: f64,
}

#[derive(Debug, Clone)]
pub struct ConflictResolver {
    config: ResolverConfig,
}

impl ConflictResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Pick the best candidate for a transaction.
    ///
    /// `bank_account` is the transaction's classified bank account, if any;
    /// `today` anchors recency.
    pub fn resolve<'a>(
        &self,
        candidates: &[&'a Pattern],
        tx: &Transaction,
        bank_account: Option<&str>,
        today: NaiveDate,
    ) -> Option<&'a Pattern> {
        match candidates {
            [] => None,
            [only] => Some(*only),
            _ => {
                let max_occurrences = candidates
                    .iter()
                    .map(|p| p.occurrences)
                    .max()
                    .unwrap_or(1)
                    .max(1);

                let mut best: Option<(&'a Pattern, f64)> = None;
                for candidate in candidates {
                    let score = self
                        .score(candidate, max_occurrences, tx, bank_account, today)
                        .total;
                    best = match best {
                        Some((current, current_score))
                            if compare(current, current_score, candidate, score)
                                != Ordering::Less =>
                        {
                            Some((current, current_score))
                        }
                        _ => Some((*candidate, score)),
                    };
                }
                best.map(|(p, _)| p)
            }
        }
    }

    /// Score one candidate against the transaction
    pub fn score(
        &self,
        candidate: &Pattern,
        max_occurrences: i64,
        tx: &Transaction,
        bank_account: Option<&str>,
        today: NaiveDate,
    ) -> CandidateScore {
        let days = (today - candidate.last_seen).num_days().max(0) as f64;
        let recency = 1.0 / (1.0 + days / self.config.recency_decay_days);

        let frequency = if max_occurrences > 0 {
            (candidate.occurrences as f64 / max_occurrences as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let amount_similarity = amount_similarity(tx.amount, candidate.average_amount());

        let bank_account_match = match bank_account {
            Some(account) if account == candidate.bank_account => 1.0,
            _ => 0.0,
        };

        let c = &self.config;
        let total = c.recency_weight * recency
            + c.frequency_weight * frequency
            + c.amount_weight * amount_similarity
            + c.bank_account_weight * bank_account_match;

        CandidateScore {
            recency,
            frequency,
            amount_similarity,
            bank_account_match,
            total,
        }
    }
}

/// 1.0 for identical amounts, falling linearly to 0.0 at 100% difference
pub fn amount_similarity(amount: f64, average: f64) -> f64 {
    let scale = amount.abs().max(average.abs());
    if scale == 0.0 {
        return 1.0;
    }
    (1.0 - (amount - average).abs() / scale).clamp(0.0, 1.0)
}

/// Total order on scored candidates (Greater = `a` is better)
fn compare(a: &Pattern, a_score: f64, b: &Pattern, b_score: f64) -> Ordering {
    if (a_score - b_score).abs() >= SCORE_EPSILON {
        return a_score.partial_cmp(&b_score).unwrap_or(Ordering::Equal);
    }
    a.last_seen
        .cmp(&b.last_seen)
        .then(a.occurrences.cmp(&b.occurrences))
        .then_with(|| (&b.verb, &b.bank_account).cmp(&(&a.verb, &a.bank_account)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn pattern(verb: &str, bank: &str, occurrences: i64, days_ago: i64, avg: f64) -> Pattern {
        Pattern {
            administration: "acme".into(),
            bank_account: bank.into(),
            verb: verb.into(),
            verb_company: verb.split('|').next().unwrap().into(),
            verb_reference: None,
            is_compound: verb.contains('|'),
            reference_number: None,
            debet_account: Some("4000".into()),
            credit_account: Some(bank.into()),
            occurrences,
            confidence: 0.5,
            last_seen: today() - Duration::days(days_ago),
            total_amount: avg * occurrences as f64,
            sample_description: verb.into(),
        }
    }

    fn tx(amount: f64) -> Transaction {
        Transaction {
            id: None,
            administration: "acme".into(),
            date: today(),
            description: "ANWB".into(),
            amount,
            debet_account: None,
            credit_account: Some("1010".into()),
            reference_number: None,
        }
    }

    #[test]
    fn test_frequent_old_vs_rare_recent_is_deterministic() {
        let resolver = ConflictResolver::new(ResolverConfig::default());
        let frequent = pattern("ANWB|111111", "1010", 50, 182, -50.0);
        let recent = pattern("ANWB|222222", "1010", 3, 2, -50.0);
        let t = tx(-50.0);

        let forward = resolver.resolve(&[&frequent, &recent], &t, Some("1010"), today());
        let backward = resolver.resolve(&[&recent, &frequent], &t, Some("1010"), today());

        // 0.4*0.9375 + 0.3*0.06 + 0.2 + 0.1 beats 0.4*0.1415 + 0.3 + 0.2 + 0.1
        assert_eq!(forward.map(|p| &p.verb), Some(&recent.verb));
        assert_eq!(forward, backward);
        for _ in 0..10 {
            assert_eq!(
                resolver.resolve(&[&frequent, &recent], &t, Some("1010"), today()),
                forward
            );
        }
    }

    #[test]
    fn test_score_components() {
        let resolver = ConflictResolver::new(ResolverConfig::default());
        let p = pattern("GAMMA", "1010", 10, 30, -100.0);

        let s = resolver.score(&p, 20, &tx(-50.0), Some("1010"), today());
        assert!((s.recency - 0.5).abs() < 1e-12);
        assert!((s.frequency - 0.5).abs() < 1e-12);
        assert!((s.amount_similarity - 0.5).abs() < 1e-12);
        assert_eq!(s.bank_account_match, 1.0);
        assert!((s.total - (0.2 + 0.15 + 0.1 + 0.1)).abs() < 1e-12);

        let s = resolver.score(&p, 20, &tx(-100.0), Some("1020"), today());
        assert_eq!(s.bank_account_match, 0.0);
        assert_eq!(s.amount_similarity, 1.0);
    }

    #[test]
    fn test_amount_similarity() {
        assert_eq!(amount_similarity(0.0, 0.0), 1.0);
        assert_eq!(amount_similarity(100.0, 100.0), 1.0);
        assert_eq!(amount_similarity(100.0, -100.0), 0.0);
        assert!((amount_similarity(80.0, 100.0) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_bank_account_breaks_otherwise_equal_candidates() {
        let resolver = ConflictResolver::new(ResolverConfig::default());
        let a = pattern("GAMMA", "1010", 5, 10, -20.0);
        let b = pattern("GAMMA", "1020", 5, 10, -20.0);

        let winner = resolver.resolve(&[&a, &b], &tx(-20.0), Some("1020"), today());
        assert_eq!(winner.map(|p| p.bank_account.as_str()), Some("1020"));
    }

    #[test]
    fn test_exact_ties_break_lexically() {
        let resolver = ConflictResolver::new(ResolverConfig::default());
        let a = pattern("GAMMA", "1010", 5, 10, -20.0);
        let b = pattern("GAMMA", "1020", 5, 10, -20.0);

        let w1 = resolver.resolve(&[&a, &b], &tx(-20.0), None, today());
        let w2 = resolver.resolve(&[&b, &a], &tx(-20.0), None, today());
        assert_eq!(w1.map(|p| p.bank_account.as_str()), Some("1010"));
        assert_eq!(w1, w2);
    }

    #[test]
    fn test_empty_and_single() {
        let resolver = ConflictResolver::new(ResolverConfig::default());
        assert!(resolver.resolve(&[], &tx(1.0), None, today()).is_none());
        let only = pattern("KPN", "1010", 1, 400, 10.0);
        assert_eq!(
            resolver.resolve(&[&only], &tx(1.0), None, today()),
            Some(&only)
        );
    }
}
