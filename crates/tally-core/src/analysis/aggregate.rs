//! Folding observations into pattern aggregates

use chrono::NaiveDate;

use crate::config::ConfidenceConfig;
use crate::models::{Field, Pattern, Transaction};
use crate::verb::Verb;

/// Orders observations: date, then ledger id (None sorts first)
type ObservationKey = (NaiveDate, Option<i64>);

/// Pattern confidence from occurrence count and recency.
///
/// Monotonically increasing in occurrences, decreasing in days since
/// `last_seen`, and always within [0, 1].
pub fn confidence(
    occurrences: i64,
    last_seen: NaiveDate,
    as_of: NaiveDate,
    config: &ConfidenceConfig,
) -> f64 {
    if occurrences <= 0 {
        return 0.0;
    }
    let frequency = 1.0 - (-(occurrences as f64) / config.frequency_scale).exp();
    let days = (as_of - last_seen).num_days().max(0) as f64;
    let recency = 0.5 + 0.5 * (-days / config.recency_decay_days).exp();
    (frequency * recency).clamp(0.0, 1.0)
}

/// Accumulates observations for one (administration, bank_account, verb)
#[derive(Debug, Clone)]
pub(crate) struct PatternBuilder {
    pattern: Pattern,
    latest: ObservationKey,
    latest_reference: Option<ObservationKey>,
}

impl PatternBuilder {
    /// Start a new aggregate from its first observation
    pub(crate) fn new(bank_account: &str, verb: &Verb, tx: &Transaction) -> Self {
        let mut builder = Self {
            pattern: Pattern {
                administration: tx.administration.clone(),
                bank_account: bank_account.to_string(),
                verb: verb.key(),
                verb_company: verb.company().to_string(),
                verb_reference: verb.reference().map(String::from),
                is_compound: verb.is_compound(),
                reference_number: None,
                debet_account: None,
                credit_account: None,
                occurrences: 0,
                confidence: 0.0,
                last_seen: tx.date,
                total_amount: 0.0,
                sample_description: String::new(),
            },
            latest: (NaiveDate::MIN, None),
            latest_reference: None,
        };
        builder.observe(tx);
        builder
    }

    /// Resume from a stored aggregate.
    ///
    /// The stored predictions count as observed on `last_seen`, so new
    /// evidence dated on or after it replaces them.
    pub(crate) fn resume(pattern: Pattern) -> Self {
        let key = (pattern.last_seen, None);
        let latest_reference = pattern.reference_number.as_ref().map(|_| key);
        Self {
            pattern,
            latest: key,
            latest_reference,
        }
    }

    pub(crate) fn observe(&mut self, tx: &Transaction) {
        let p = &mut self.pattern;
        p.occurrences += 1;
        p.total_amount += tx.amount;
        if tx.date > p.last_seen {
            p.last_seen = tx.date;
        }

        let key = (tx.date, tx.id);
        if key >= self.latest {
            p.debet_account = tx.field(Field::Debet).map(String::from);
            p.credit_account = tx.field(Field::Credit).map(String::from);
            p.sample_description = tx.description.clone();
            self.latest = key;
        }

        if let Some(reference) = tx.field(Field::Reference) {
            if self.latest_reference.map_or(true, |k| key >= k) {
                p.reference_number = Some(reference.to_string());
                self.latest_reference = Some(key);
            }
        }
    }

    pub(crate) fn finish(mut self, as_of: NaiveDate, config: &ConfidenceConfig) -> Pattern {
        self.pattern.confidence = confidence(
            self.pattern.occurrences,
            self.pattern.last_seen,
            as_of,
            config,
        );
        self.pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn tx(id: i64, day: NaiveDate, debet: &str, reference: Option<&str>) -> Transaction {
        Transaction {
            id: Some(id),
            administration: "acme".into(),
            date: day,
            description: format!("ANWB {}", id),
            amount: -10.0,
            debet_account: Some(debet.into()),
            credit_account: Some("1010".into()),
            reference_number: reference.map(String::from),
        }
    }

    #[test]
    fn test_confidence_is_monotonic_and_bounded() {
        let config = ConfidenceConfig::default();
        let today = date(2024, 6, 1);

        let few = confidence(1, today, today, &config);
        let many = confidence(50, today, today, &config);
        assert!(many > few);
        assert!(many <= 1.0);

        let old = confidence(10, date(2022, 6, 1), today, &config);
        let recent = confidence(10, date(2024, 5, 1), today, &config);
        assert!(recent > old);
        assert!(old >= 0.0);

        // Future-dated observations are treated as today
        assert_eq!(
            confidence(3, date(2024, 7, 1), today, &config),
            confidence(3, today, today, &config)
        );
        assert_eq!(confidence(0, today, today, &config), 0.0);
    }

    #[test]
    fn test_builder_takes_latest_observation() {
        let verb = Verb::Simple("ANWB".into());
        let mut b = PatternBuilder::new("1010", &verb, &tx(1, date(2024, 1, 1), "4000", Some("R1")));
        b.observe(&tx(3, date(2024, 3, 1), "4100", None));
        b.observe(&tx(2, date(2024, 2, 1), "4200", Some("R2")));

        let p = b.finish(date(2024, 3, 1), &ConfidenceConfig::default());
        assert_eq!(p.occurrences, 3);
        assert_eq!(p.last_seen, date(2024, 3, 1));
        assert_eq!(p.debet_account.as_deref(), Some("4100"));
        // Latest observation carrying a reference
        assert_eq!(p.reference_number.as_deref(), Some("R2"));
        assert_eq!(p.total_amount, -30.0);
        assert_eq!(p.sample_description, "ANWB 3");
    }

    #[test]
    fn test_resume_folds_new_evidence() {
        let verb = Verb::Simple("ANWB".into());
        let stored = PatternBuilder::new("1010", &verb, &tx(1, date(2024, 1, 1), "4000", Some("R1")))
            .finish(date(2024, 1, 1), &ConfidenceConfig::default());

        let mut b = PatternBuilder::resume(stored.clone());
        b.observe(&tx(5, date(2023, 12, 1), "4999", Some("OLD")));
        let p = b.finish(date(2024, 1, 1), &ConfidenceConfig::default());
        assert_eq!(p.occurrences, 2);
        assert_eq!(p.debet_account.as_deref(), Some("4000"));
        assert_eq!(p.reference_number.as_deref(), Some("R1"));
        assert!(p.confidence > stored.confidence);

        let mut b = PatternBuilder::resume(p);
        b.observe(&tx(6, date(2024, 1, 1), "4300", None));
        let p = b.finish(date(2024, 1, 1), &ConfidenceConfig::default());
        assert_eq!(p.occurrences, 3);
        assert_eq!(p.debet_account.as_deref(), Some("4300"));
        assert_eq!(p.reference_number.as_deref(), Some("R1"));
    }
}
