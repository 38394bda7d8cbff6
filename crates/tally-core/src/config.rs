//! Engine configuration
//!
//! ## Configuration Resolution
//!
//! Config is loaded with a two-layer resolution:
//! 1. An explicit path, or the override in the data dir
//!    (~/.local/share/tally/config/patterns.toml)
//! 2. Fall back to embedded defaults (compiled into binary)
//!
//! Keys missing from a file keep their `Default` values.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/patterns.toml");

/// Historical analysis settings
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// How far back the ledger is scanned
    pub window_days: i64,
    /// Deadline for a single analysis run.
    ///
    /// Checked between phases, every 1000 folded transactions, every 256
    /// upserts and before COMMIT. A single ledger or pattern query is not
    /// interrupted: a query blocked on a lock waits up to SQLite's 5 s
    /// `busy_timeout` (plus the pool's connection timeout) before the run
    /// notices, so a run can overshoot the deadline by that much. Nothing is
    /// committed once it has expired.
    pub timeout: Duration,
    /// Pattern/transaction ratio above which a warning is logged
    pub max_pattern_ratio: f64,
    /// Reference date for recency; None means today (UTC)
    pub as_of: Option<NaiveDate>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_days: 730,
            timeout: Duration::from_secs(300),
            max_pattern_ratio: 0.05,
            as_of: None,
        }
    }
}

impl AnalysisConfig {
    pub fn today(&self) -> NaiveDate {
        self.as_of
            .unwrap_or_else(|| chrono::Utc::now().date_naive())
    }
}

/// Pattern confidence curve
#[derive(Debug, Clone)]
pub struct ConfidenceConfig {
    /// Occurrences at which the frequency factor reaches ~63%
    pub frequency_scale: f64,
    /// Days over which recency decays by a factor of e
    pub recency_decay_days: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            frequency_scale: 5.0,
            recency_decay_days: 365.0,
        }
    }
}

/// Pattern cache settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Administrations held in the memory tier
    pub memory_capacity: usize,
    /// Minimum time between metadata coherence checks of a memory entry
    pub coherence_check: Duration,
    /// Directory for file-tier snapshots (None = platform default)
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: 128,
            coherence_check: Duration::ZERO,
            snapshot_dir: None,
        }
    }
}

impl CacheConfig {
    pub fn snapshot_dir(&self) -> PathBuf {
        self.snapshot_dir.clone().unwrap_or_else(default_snapshot_dir)
    }
}

/// Conflict resolver weights
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub recency_weight: f64,
    pub frequency_weight: f64,
    pub amount_weight: f64,
    pub bank_account_weight: f64,
    /// Days at which recency_score has halved
    pub recency_decay_days: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            recency_weight: 0.4,
            frequency_weight: 0.3,
            amount_weight: 0.2,
            bank_account_weight: 0.1,
            recency_decay_days: 30.0,
        }
    }
}

/// Pattern applier settings
#[derive(Debug, Clone, Default)]
pub struct ApplierConfig {
    /// Patterns below this confidence are never used
    pub min_confidence: f64,
}

/// A merchant consolidation rule: descriptions fully matching `pattern`
/// collapse to `verb`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConsolidationRule {
    pub pattern: String,
    pub verb: String,
}

/// Verb extraction tables
#[derive(Debug, Clone, PartialEq)]
pub struct VerbConfig {
    pub legal_suffixes: Vec<String>,
    /// Leading tokens skipped when picking the merchant token
    pub noise_words: Vec<String>,
    /// Applied in order; first match wins
    pub consolidate: Vec<ConsolidationRule>,
}

impl Default for VerbConfig {
    fn default() -> Self {
        let rule = |pattern: &str, verb: &str| ConsolidationRule {
            pattern: pattern.to_string(),
            verb: verb.to_string(),
        };
        Self {
            legal_suffixes: ["B.V.", "BV", "N.V.", "NV", "LTD.", "LTD", "V.O.F.", "GMBH"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            noise_words: ["SEPA", "INCASSO", "IDEAL", "BEA", "GEA", "APLPAY", "SQ", "TST"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            consolidate: vec![
                rule("ALBERT.*", "ALBERT"),
                rule(r"BOL\.?COM.*", "BOL"),
                rule("JUMBO.*", "JUMBO"),
            ],
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub analysis: AnalysisConfig,
    pub confidence: ConfidenceConfig,
    pub cache: CacheConfig,
    pub resolver: ResolverConfig,
    pub applier: ApplierConfig,
    pub verbs: VerbConfig,
}

impl EngineConfig {
    /// Load configuration (explicit path, then override, then embedded default)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let content = match path {
            Some(path) => fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("Failed to read config {}: {}", path.display(), e))
            })?,
            None => match default_config_path() {
                Some(default_path) if default_path.exists() => fs::read_to_string(&default_path)
                    .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?,
                _ => DEFAULT_CONFIG.to_string(),
            },
        };

        parse_config(&content)
    }

    /// The embedded defaults
    pub fn embedded() -> Result<Self> {
        parse_config(DEFAULT_CONFIG)
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("tally").join("config").join("patterns.toml"))
}

/// Default directory for file-tier snapshots
pub fn default_snapshot_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("tally")
        .join("snapshots")
}

/// Raw config structure for TOML parsing
#[derive(Debug, Deserialize)]
struct RawConfig {
    analysis: Option<RawAnalysis>,
    confidence: Option<RawConfidence>,
    cache: Option<RawCache>,
    resolver: Option<RawResolver>,
    applier: Option<RawApplier>,
    verbs: Option<RawVerbs>,
}

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    window_days: Option<i64>,
    timeout_secs: Option<u64>,
    max_pattern_ratio: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawConfidence {
    frequency_scale: Option<f64>,
    recency_decay_days: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawCache {
    memory_capacity: Option<usize>,
    coherence_check_secs: Option<u64>,
    snapshot_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawResolver {
    recency: Option<f64>,
    frequency: Option<f64>,
    amount: Option<f64>,
    bank_account: Option<f64>,
    recency_decay_days: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawApplier {
    min_confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawVerbs {
    legal_suffixes: Option<Vec<String>>,
    noise_words: Option<Vec<String>>,
    consolidate: Option<Vec<ConsolidationRule>>,
}

/// Parse config from TOML content
fn parse_config(content: &str) -> Result<EngineConfig> {
    let raw: RawConfig = toml::from_str(content)
        .map_err(|e| Error::Config(format!("Invalid config TOML: {}", e)))?;

    let mut config = EngineConfig::default();

    if let Some(analysis) = raw.analysis {
        if let Some(days) = analysis.window_days {
            config.analysis.window_days = days;
        }
        if let Some(secs) = analysis.timeout_secs {
            config.analysis.timeout = Duration::from_secs(secs);
        }
        if let Some(ratio) = analysis.max_pattern_ratio {
            config.analysis.max_pattern_ratio = ratio;
        }
    }

    if let Some(confidence) = raw.confidence {
        if let Some(scale) = confidence.frequency_scale {
            config.confidence.frequency_scale = scale;
        }
        if let Some(days) = confidence.recency_decay_days {
            config.confidence.recency_decay_days = days;
        }
    }

    if let Some(cache) = raw.cache {
        if let Some(capacity) = cache.memory_capacity {
            config.cache.memory_capacity = capacity;
        }
        if let Some(secs) = cache.coherence_check_secs {
            config.cache.coherence_check = Duration::from_secs(secs);
        }
        if cache.snapshot_dir.is_some() {
            config.cache.snapshot_dir = cache.snapshot_dir;
        }
    }

    if let Some(resolver) = raw.resolver {
        let r = &mut config.resolver;
        r.recency_weight = resolver.recency.unwrap_or(r.recency_weight);
        r.frequency_weight = resolver.frequency.unwrap_or(r.frequency_weight);
        r.amount_weight = resolver.amount.unwrap_or(r.amount_weight);
        r.bank_account_weight = resolver.bank_account.unwrap_or(r.bank_account_weight);
        r.recency_decay_days = resolver.recency_decay_days.unwrap_or(r.recency_decay_days);
    }

    if let Some(applier) = raw.applier {
        if let Some(min) = applier.min_confidence {
            config.applier.min_confidence = min;
        }
    }

    if let Some(verbs) = raw.verbs {
        if let Some(suffixes) = verbs.legal_suffixes {
            config.verbs.legal_suffixes = suffixes;
        }
        if let Some(words) = verbs.noise_words {
            config.verbs.noise_words = words;
        }
        if let Some(rules) = verbs.consolidate {
            config.verbs.consolidate = rules;
        }
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &EngineConfig) -> Result<()> {
    if config.analysis.window_days <= 0 {
        return Err(Error::Config("analysis.window_days must be positive".into()));
    }
    if config.confidence.frequency_scale <= 0.0 || config.confidence.recency_decay_days <= 0.0 {
        return Err(Error::Config(
            "confidence.frequency_scale and recency_decay_days must be positive".into(),
        ));
    }
    if config.cache.memory_capacity == 0 {
        return Err(Error::Config("cache.memory_capacity must be at least 1".into()));
    }
    let r = &config.resolver;
    let weights = [
        r.recency_weight,
        r.frequency_weight,
        r.amount_weight,
        r.bank_account_weight,
    ];
    if weights.iter().any(|w| *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
        return Err(Error::Config(
            "resolver weights must be non-negative and not all zero".into(),
        ));
    }
    if r.recency_decay_days <= 0.0 {
        return Err(Error::Config("resolver.recency_decay_days must be positive".into()));
    }
    if !(0.0..=1.0).contains(&config.applier.min_confidence) {
        return Err(Error::Config("applier.min_confidence must be within 0..=1".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_config_parses() {
        let config = EngineConfig::embedded().unwrap();
        assert_eq!(config.analysis.window_days, 730);
        assert_eq!(config.resolver.recency_weight, 0.4);
        assert_eq!(config.resolver.bank_account_weight, 0.1);
        assert!(config
            .verbs
            .consolidate
            .iter()
            .any(|r| r.verb == "ALBERT"));
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = parse_config(
            r#"
            [cache]
            memory_capacity = 4

            [applier]
            min_confidence = 0.25
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.memory_capacity, 4);
        assert_eq!(config.applier.min_confidence, 0.25);
        assert_eq!(config.analysis.window_days, 730);
        assert_eq!(config.verbs, VerbConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = parse_config("[cache]\nmemory_capacity = 0\n").unwrap_err();
        assert!(err.is_configuration());

        let err = parse_config("[resolver]\nrecency = -1.0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        assert!(parse_config("not toml at all [").is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patterns.toml");
        fs::write(&path, "[analysis]\nwindow_days = 365\ntimeout_secs = 5\n").unwrap();

        let config = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.analysis.window_days, 365);
        assert_eq!(config.analysis.timeout, Duration::from_secs(5));

        let missing = dir.path().join("missing.toml");
        assert!(EngineConfig::load(Some(&missing)).is_err());
    }
}
