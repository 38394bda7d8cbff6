//! Indexed pattern sets for candidate lookup

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::{AnalysisMetadata, Pattern};
use crate::verb::Verb;

/// All patterns of one administration, indexed by verb key and company
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    administration: String,
    patterns: Vec<Pattern>,
    metadata: Option<AnalysisMetadata>,
    by_verb: HashMap<String, Vec<usize>>,
    by_company: HashMap<String, Vec<usize>>,
}

impl PatternSet {
    pub fn new(
        administration: &str,
        patterns: Vec<Pattern>,
        metadata: Option<AnalysisMetadata>,
    ) -> Self {
        let mut by_verb: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_company: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, p) in patterns.iter().enumerate() {
            by_verb.entry(p.verb.clone()).or_default().push(i);
            by_company.entry(p.verb_company.clone()).or_default().push(i);
        }
        Self {
            administration: administration.to_string(),
            patterns,
            metadata,
            by_verb,
            by_company,
        }
    }

    pub fn empty(administration: &str) -> Self {
        Self::new(administration, Vec::new(), None)
    }

    pub fn administration(&self) -> &str {
        &self.administration
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn metadata(&self) -> Option<&AnalysisMetadata> {
        self.metadata.as_ref()
    }

    /// Metadata version this set was built from
    pub fn version(&self) -> Option<DateTime<Utc>> {
        self.metadata.as_ref().map(|m| m.updated_at)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Candidate patterns for a verb, by matching precedence:
    ///
    /// 1. exact verb key (company and reference)
    /// 2. same company, compound with a different reference
    /// 3. the company's simple pattern
    ///
    /// Only the first non-empty level is returned. Patterns below
    /// `min_confidence` are never candidates.
    pub fn candidates(&self, verb: &Verb, min_confidence: f64) -> Vec<&Pattern> {
        let eligible = |p: &&Pattern| p.confidence >= min_confidence;
        let key = verb.key();

        let exact: Vec<&Pattern> = self.lookup(&self.by_verb, &key).filter(eligible).collect();
        if !exact.is_empty() {
            return exact;
        }

        let same_company: Vec<&Pattern> = self
            .lookup(&self.by_company, verb.company())
            .filter(|p| p.is_compound && p.verb != key)
            .filter(eligible)
            .collect();
        if !same_company.is_empty() {
            return same_company;
        }

        if verb.is_compound() {
            return self
                .lookup(&self.by_verb, verb.company())
                .filter(|p| !p.is_compound)
                .filter(eligible)
                .collect();
        }

        Vec::new()
    }

    fn lookup<'a>(
        &'a self,
        index: &'a HashMap<String, Vec<usize>>,
        key: &str,
    ) -> impl Iterator<Item = &'a Pattern> + 'a {
        index
            .get(key)
            .into_iter()
            .flatten()
            .map(move |&i| &self.patterns[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn pattern(verb: &str, bank: &str, confidence: f64) -> Pattern {
        let v = Verb::from_key(verb);
        Pattern {
            administration: "acme".into(),
            bank_account: bank.into(),
            verb: v.key(),
            verb_company: v.company().to_string(),
            verb_reference: v.reference().map(String::from),
            is_compound: v.is_compound(),
            reference_number: None,
            debet_account: Some("4000".into()),
            credit_account: Some(bank.into()),
            occurrences: 3,
            confidence,
            last_seen: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            total_amount: -30.0,
            sample_description: verb.into(),
        }
    }

    fn set() -> PatternSet {
        PatternSet::new(
            "acme",
            vec![
                pattern("ANWB|111111", "1010", 0.8),
                pattern("ANWB|222222", "1010", 0.6),
                pattern("ANWB", "1010", 0.5),
                pattern("GAMMA", "1010", 0.7),
                pattern("GAMMA", "1020", 0.2),
            ],
            None,
        )
    }

    fn verbs(candidates: &[&Pattern]) -> Vec<String> {
        let mut v: Vec<String> = candidates.iter().map(|p| p.verb.clone()).collect();
        v.sort();
        v
    }

    #[test]
    fn test_exact_match_wins() {
        let set = set();
        let c = set.candidates(&Verb::from_key("ANWB|111111"), 0.0);
        assert_eq!(verbs(&c), vec!["ANWB|111111"]);

        let c = set.candidates(&Verb::from_key("GAMMA"), 0.0);
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_company_match_with_other_reference() {
        let set = set();
        let c = set.candidates(&Verb::from_key("ANWB|999999"), 0.0);
        assert_eq!(verbs(&c), vec!["ANWB|111111", "ANWB|222222"]);
    }

    #[test]
    fn test_simple_fallback_for_compound_verb() {
        let set = set();
        let c = set.candidates(&Verb::from_key("GAMMA|123456"), 0.0);
        assert_eq!(verbs(&c), vec!["GAMMA", "GAMMA"]);
    }

    #[test]
    fn test_min_confidence_filters_candidates() {
        let set = set();
        let c = set.candidates(&Verb::from_key("GAMMA"), 0.5);
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].bank_account, "1010");

        // Filtered exact level falls through to the next level
        let c = set.candidates(&Verb::from_key("ANWB|222222"), 0.7);
        assert_eq!(verbs(&c), vec!["ANWB|111111"]);

        assert!(set.candidates(&Verb::from_key("UNKNOWN"), 0.0).is_empty());
    }
}
