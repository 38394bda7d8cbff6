//! Verb extraction: descriptions to canonical merchant tokens
//!
//! A verb is the normalized merchant name of a description (`ANWB`), optionally
//! paired with a distinguishing reference number found in the text
//! (`ANWB|100431234`). Numbers that are part of an IBAN never become a
//! reference.

use std::ops::Range;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::VerbConfig;
use crate::error::{Error, Result};

/// Separator between company and reference in compound verb keys
pub const VERB_SEPARATOR: char = '|';

/// Shortest and longest digit run treated as a reference
const MIN_REFERENCE_DIGITS: usize = 6;
const MAX_REFERENCE_DIGITS: usize = 12;

/// Normalized merchant token of a description
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verb {
    Simple(String),
    Compound { company: String, reference: String },
}

impl Verb {
    /// Storage key: `COMPANY` or `COMPANY|REFERENCE`
    pub fn key(&self) -> String {
        match self {
            Self::Simple(company) => company.clone(),
            Self::Compound { company, reference } => {
                format!("{}{}{}", company, VERB_SEPARATOR, reference)
            }
        }
    }

    pub fn company(&self) -> &str {
        match self {
            Self::Simple(company) => company,
            Self::Compound { company, .. } => company,
        }
    }

    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::Simple(_) => None,
            Self::Compound { reference, .. } => Some(reference),
        }
    }

    pub fn is_compound(&self) -> bool {
        matches!(self, Self::Compound { .. })
    }

    /// An empty verb means the description had no usable merchant token
    pub fn is_empty(&self) -> bool {
        self.company().is_empty()
    }

    /// Parse a stored key back into a verb
    pub fn from_key(key: &str) -> Self {
        match key.split_once(VERB_SEPARATOR) {
            Some((company, reference)) if !reference.is_empty() => Self::Compound {
                company: company.to_string(),
                reference: reference.to_string(),
            },
            Some((company, _)) => Self::Simple(company.to_string()),
            None => Self::Simple(key.to_string()),
        }
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

struct CompiledRule {
    regex: Regex,
    verb: String,
}

/// Extracts verbs from descriptions using a configurable rule table.
///
/// Construction compiles every regex once; extraction is a pure function.
pub struct VerbExtractor {
    iban: Regex,
    legal_suffix: Option<Regex>,
    separators: Regex,
    noise_words: Vec<String>,
    rules: Vec<CompiledRule>,
}

impl VerbExtractor {
    pub fn new(config: &VerbConfig) -> Result<Self> {
        // Compact (NL28BUKK7893044720) or grouped in fours (NL28 BUKK 7893 0447 20)
        let iban = Regex::new(
            r"\b[A-Z]{2}[0-9]{2}(?:[A-Z0-9]{11,30}|(?: [A-Z0-9]{4}){2,7}(?: [A-Z0-9]{1,4})?)\b",
        )?;

        let legal_suffix = if config.legal_suffixes.is_empty() {
            None
        } else {
            let alternatives = config
                .legal_suffixes
                .iter()
                .map(|s| regex::escape(&s.to_uppercase()))
                .collect::<Vec<_>>()
                .join("|");
            // Suffixes ending in '.' cannot use a trailing \b
            Some(Regex::new(&format!(
                r"(?:^|\s)(?:{})(?:\s|,|$)",
                alternatives
            ))?)
        };

        let separators = Regex::new(r"[*/,;:#]+")?;

        let rules = config
            .consolidate
            .iter()
            .map(|rule| {
                let regex = Regex::new(&format!("^(?:{})$", rule.pattern.to_uppercase()))
                    .map_err(|e| {
                        Error::Config(format!(
                            "Invalid consolidation pattern '{}': {}",
                            rule.pattern, e
                        ))
                    })?;
                Ok(CompiledRule {
                    regex,
                    verb: rule.verb.to_uppercase(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            iban,
            legal_suffix,
            separators,
            noise_words: config.noise_words.iter().map(|w| w.to_uppercase()).collect(),
            rules,
        })
    }

    /// Extract the verb for a description.
    ///
    /// Returns a compound verb when a 6-12 digit run outside any IBAN is
    /// present, else the simple verb. Descriptions without a merchant token
    /// produce an empty simple verb.
    pub fn extract(&self, description: &str) -> Verb {
        let upper = description.to_uppercase();
        let ibans: Vec<Range<usize>> = self.iban.find_iter(&upper).map(|m| m.range()).collect();

        let company = self.company(&upper, &ibans);
        match longest_reference(&upper, &ibans) {
            Some(reference) if !company.is_empty() => Verb::Compound { company, reference },
            _ => Verb::Simple(company),
        }
    }

    /// Extract, treating an empty verb as absent
    pub fn try_extract(&self, description: &str) -> Option<Verb> {
        let verb = self.extract(description);
        (!verb.is_empty()).then_some(verb)
    }

    fn company(&self, upper: &str, ibans: &[Range<usize>]) -> String {
        // Blank out IBANs so their letters never become the merchant token
        let mut text = String::with_capacity(upper.len());
        let mut last = 0;
        for span in ibans {
            text.push_str(&upper[last..span.start]);
            text.push(' ');
            last = span.end;
        }
        text.push_str(&upper[last..]);

        let mut text = collapse_whitespace(&text);
        if let Some(ref suffix) = self.legal_suffix {
            // Replace repeatedly: adjacent suffixes share the separating space
            loop {
                let replaced = suffix.replace_all(&text, " ").into_owned();
                if replaced == text {
                    break;
                }
                text = collapse_whitespace(&replaced);
            }
        }
        let text = collapse_whitespace(&self.separators.replace_all(&text, " "));

        let tokens: Vec<&str> = text.split(' ').filter(|t| !t.is_empty()).collect();
        let start = tokens.iter().position(|token| {
            token.chars().any(|c| c.is_alphabetic())
                && !self.noise_words.iter().any(|w| w == token)
        });
        let Some(start) = start else {
            return String::new();
        };
        let remainder = tokens[start..].join(" ");

        for rule in &self.rules {
            if rule.regex.is_match(&remainder) {
                return rule.verb.clone();
            }
        }

        tokens[start]
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_string()
    }
}

/// Longest 6-12 digit run not overlapping an IBAN (earliest wins ties)
fn longest_reference(upper: &str, ibans: &[Range<usize>]) -> Option<String> {
    let mut best: Option<&str> = None;
    let bytes = upper.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        let run = start..i;
        let len = run.len();
        if !(MIN_REFERENCE_DIGITS..=MAX_REFERENCE_DIGITS).contains(&len) {
            continue;
        }
        let in_iban = ibans
            .iter()
            .any(|iban| run.start < iban.end && iban.start < run.end);
        if in_iban {
            continue;
        }
        if best.map_or(true, |b| len > b.len()) {
            best = Some(&upper[run]);
        }
    }
    best.map(String::from)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsolidationRule;

    fn extractor() -> VerbExtractor {
        VerbExtractor::new(&VerbConfig::default()).unwrap()
    }

    #[test]
    fn test_compound_verb_ignores_iban_digits() {
        let verb = extractor().extract("ANWB Energie B.V. 100431234 NL28BUKK7893044720");
        assert_eq!(verb.key(), "ANWB|100431234");
        assert_eq!(verb.company(), "ANWB");
        assert_eq!(verb.reference(), Some("100431234"));
        assert!(verb.is_compound());
    }

    #[test]
    fn test_simple_verb_without_digits() {
        let verb = extractor().extract("GAMMA BOUWMARKT AMSTERDAM");
        assert_eq!(verb, Verb::Simple("GAMMA".to_string()));
    }

    #[test]
    fn test_iban_alone_is_not_a_reference() {
        let verb = extractor().extract("Overboeking Vattenfall NL91ABNA0417164300");
        assert_eq!(verb.key(), "OVERBOEKING");

        let verb = extractor().extract("VATTENFALL NL91 ABNA 0417 1643 00");
        assert_eq!(verb.key(), "VATTENFALL");
    }

    #[test]
    fn test_longest_digit_run_wins() {
        let verb = extractor().extract("KPN 1234567 klant 123456789012 periode 2024");
        assert_eq!(verb.key(), "KPN|123456789012");
    }

    #[test]
    fn test_digit_runs_outside_bounds_ignored() {
        // 5 digits too short, 13 digits too long
        let verb = extractor().extract("ZIGGO 12345 1234567890123");
        assert_eq!(verb, Verb::Simple("ZIGGO".to_string()));
    }

    #[test]
    fn test_consolidation_rules() {
        let ex = extractor();
        assert_eq!(ex.extract("Albert Heijn 1234 Amsterdam").key(), "ALBERT");
        assert_eq!(ex.extract("ALBERTHEIJN.NL").key(), "ALBERT");
        assert_eq!(ex.extract("bol.com b.v.").key(), "BOL");
        assert_eq!(ex.extract("BOLCOM Utrecht").key(), "BOL");
    }

    #[test]
    fn test_legal_suffix_and_whitespace_normalization() {
        let ex = extractor();
        assert_eq!(ex.extract("  Coolblue   B.V.  ").key(), "COOLBLUE");
        assert_eq!(ex.extract("BV Acme Holding").key(), "ACME");
        assert_eq!(ex.extract("Shell N.V., Den Haag").key(), "SHELL");
    }

    #[test]
    fn test_noise_words_skipped() {
        let ex = extractor();
        assert_eq!(ex.extract("SEPA INCASSO Eneco 998877665").key(), "ENECO|998877665");
        assert_eq!(ex.extract("BEA   Kruidvat*Utrecht").key(), "KRUIDVAT");
    }

    #[test]
    fn test_empty_descriptions() {
        let ex = extractor();
        assert!(ex.extract("").is_empty());
        assert!(ex.extract("   123 456 ").is_empty());
        assert!(ex.try_extract("*** ///").is_none());
    }

    #[test]
    fn test_custom_rule_table() {
        let config = VerbConfig {
            legal_suffixes: vec![],
            noise_words: vec![],
            consolidate: vec![ConsolidationRule {
                pattern: "NS .*|NS".to_string(),
                verb: "NS".to_string(),
            }],
        };
        let ex = VerbExtractor::new(&config).unwrap();
        assert_eq!(ex.extract("NS Groep reizen").key(), "NS");
        assert_eq!(ex.extract("Acme B.V.").key(), "ACME");
    }

    #[test]
    fn test_invalid_rule_is_config_error() {
        let config = VerbConfig {
            consolidate: vec![ConsolidationRule {
                pattern: "(unclosed".to_string(),
                verb: "X".to_string(),
            }],
            ..VerbConfig::default()
        };
        let err = VerbExtractor::new(&config).err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_key_round_trip() {
        assert_eq!(
            Verb::from_key("ANWB|7073498490"),
            Verb::Compound {
                company: "ANWB".into(),
                reference: "7073498490".into()
            }
        );
        assert_eq!(Verb::from_key("GAMMA"), Verb::Simple("GAMMA".into()));
    }
}
