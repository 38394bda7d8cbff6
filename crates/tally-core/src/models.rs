//! Domain models for Tally

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A bookkeeping transaction as produced by the ledger ingestion pipeline.
///
/// The engine never mutates ledger rows; predictions are applied to copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Ledger row id (None for transactions that are not stored yet)
    pub id: Option<i64>,
    /// Tenant the transaction belongs to
    pub administration: String,
    pub date: NaiveDate,
    pub description: String,
    /// Signed amount
    pub amount: f64,
    pub debet_account: Option<String>,
    pub credit_account: Option<String>,
    pub reference_number: Option<String>,
}

impl Transaction {
    /// Value of a field, with blank strings treated as missing
    pub fn field(&self, field: Field) -> Option<&str> {
        let value = match field {
            Field::Debet => self.debet_account.as_deref(),
            Field::Credit => self.credit_account.as_deref(),
            Field::Reference => self.reference_number.as_deref(),
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn is_missing(&self, field: Field) -> bool {
        self.field(field).is_none()
    }

    /// True when at least one predictable field is empty
    pub fn needs_prediction(&self) -> bool {
        Field::all().iter().any(|f| self.is_missing(*f))
    }

    pub(crate) fn set_field(&mut self, field: Field, value: String) {
        match field {
            Field::Debet => self.debet_account = Some(value),
            Field::Credit => self.credit_account = Some(value),
            Field::Reference => self.reference_number = Some(value),
        }
    }
}

/// Side of a double-entry transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Debet,
    Credit,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Debet => Self::Credit,
            Self::Credit => Self::Debet,
        }
    }

    pub fn field(&self) -> Field {
        match self {
            Self::Debet => Field::Debet,
            Self::Credit => Field::Credit,
        }
    }
}

/// A predictable transaction field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Debet,
    Credit,
    Reference,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debet => "debet",
            Self::Credit => "credit",
            Self::Reference => "reference_number",
        }
    }

    pub fn all() -> &'static [Field] {
        &[Self::Debet, Self::Credit, Self::Reference]
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A learned correlation between a description verb and ledger coding.
///
/// Unique per (administration, bank_account, verb).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub administration: String,
    /// The tenant's own account this pattern was observed against
    pub bank_account: String,
    /// Verb key: `COMPANY` or `COMPANY|REFERENCE`
    pub verb: String,
    pub verb_company: String,
    pub verb_reference: Option<String>,
    pub is_compound: bool,
    pub reference_number: Option<String>,
    pub debet_account: Option<String>,
    pub credit_account: Option<String>,
    pub occurrences: i64,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub last_seen: NaiveDate,
    /// Sum of observed amounts, for the resolver's amount similarity
    pub total_amount: f64,
    pub sample_description: String,
}

impl Pattern {
    pub fn average_amount(&self) -> f64 {
        if self.occurrences <= 0 {
            return 0.0;
        }
        self.total_amount / self.occurrences as f64
    }

    /// The side of the learned coding that is not the bank account
    pub fn counter_account(&self) -> Option<&str> {
        match (self.debet_account.as_deref(), self.credit_account.as_deref()) {
            (Some(d), credit) if d == self.bank_account => credit,
            (debet, Some(c)) if c == self.bank_account => debet,
            _ => None,
        }
    }

    /// Learned value for a field as observed (no side mapping)
    pub fn value_for(&self, field: Field) -> Option<&str> {
        match field {
            Field::Debet => self.debet_account.as_deref(),
            Field::Credit => self.credit_account.as_deref(),
            Field::Reference => self.reference_number.as_deref(),
        }
    }

    /// Unique key within an administration
    pub fn key(&self) -> (String, String) {
        (self.bank_account.clone(), self.verb.clone())
    }
}

/// One row per administration; drives staleness decisions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub administration: String,
    /// Start of the last analysis run
    pub last_analysis_date: DateTime<Utc>,
    /// Ledger id high-water mark folded so far; rows above it are new
    #[serde(default)]
    pub last_ledger_id: i64,
    pub transactions_analyzed: i64,
    pub patterns_discovered: i64,
    /// Bumped on every write to the stored pattern set (analysis or prune).
    /// Memory-tier entries built from an older value are stale.
    pub updated_at: DateTime<Utc>,
}

impl AnalysisMetadata {
    /// False for rows analyzed before the ledger high-water mark was tracked
    pub fn has_ledger_mark(&self) -> bool {
        self.last_ledger_id > 0 || self.transactions_analyzed == 0
    }
}

/// How a refresh should be performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    Full,
    Incremental,
}

impl AnalysisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

impl std::str::FromStr for AnalysisMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "incremental" | "incr" => Ok(Self::Incremental),
            _ => Err(format!("Unknown analysis mode: {}", s)),
        }
    }
}

impl std::fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a full or incremental analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub administration: String,
    /// Mode that actually ran (incremental may fall back to full)
    pub mode: AnalysisMode,
    pub transactions_analyzed: i64,
    /// Transactions skipped as ambiguous or malformed
    pub transactions_skipped: i64,
    /// Patterns stored for the administration after the run
    pub patterns_total: i64,
    pub new_patterns: i64,
    pub updated_patterns: i64,
    pub fell_back_to_full: bool,
    pub duration_ms: i64,
}

/// Which cache tier produced a pattern set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Memory,
    Database,
    File,
    /// Nothing was reachable; an empty set was served
    Empty,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Database => "database",
            Self::File => "file",
            Self::Empty => "empty",
        }
    }

    /// Sets from these tiers are retried against the database on next use
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::File | Self::Empty)
    }
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-field confidence attached to a predicted transaction (0 = unfilled)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldConfidence {
    pub debet: f64,
    pub credit: f64,
    pub reference_number: f64,
}

impl FieldConfidence {
    pub fn get(&self, field: Field) -> f64 {
        match field {
            Field::Debet => self.debet,
            Field::Credit => self.credit,
            Field::Reference => self.reference_number,
        }
    }

    pub(crate) fn set(&mut self, field: Field, confidence: f64) {
        match field {
            Field::Debet => self.debet = confidence,
            Field::Credit => self.credit = confidence,
            Field::Reference => self.reference_number = confidence,
        }
    }
}

/// A transaction after pattern application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictedTransaction {
    pub transaction: Transaction,
    pub confidence: FieldConfidence,
    /// Fields filled by the applier
    pub filled: Vec<Field>,
    /// Verb key of the pattern used, if any
    pub matched_verb: Option<String>,
}

/// Summary of an apply batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyResult {
    pub total_processed: i64,
    pub debet_predictions: i64,
    pub credit_predictions: i64,
    pub reference_predictions: i64,
    /// Mean confidence over all filled fields (0 when nothing was filled)
    pub average_confidence: f64,
    pub failed_predictions: i64,
    /// Transactions that had nothing missing
    pub already_complete: i64,
}

impl ApplyResult {
    pub fn predictions_made(&self) -> i64 {
        self.debet_predictions + self.credit_predictions + self.reference_predictions
    }

    pub(crate) fn record(&mut self, field: Field) {
        match field {
            Field::Debet => self.debet_predictions += 1,
            Field::Credit => self.credit_predictions += 1,
            Field::Reference => self.reference_predictions += 1,
        }
    }
}

/// Criteria for explicit pattern maintenance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruneCriteria {
    /// Remove patterns with confidence strictly below this value
    pub min_confidence: Option<f64>,
    /// Remove patterns last seen before this date
    pub stale_before: Option<NaiveDate>,
}

impl PruneCriteria {
    pub fn is_empty(&self) -> bool {
        self.min_confidence.is_none() && self.stale_before.is_none()
    }
}

/// A bank account registered for an administration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankAccount {
    pub administration: String,
    pub account_code: String,
    pub name: Option<String>,
}
