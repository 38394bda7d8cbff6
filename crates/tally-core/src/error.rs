//! Error types for Tally

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown administration: {0}")]
    UnknownAdministration(String),

    #[error("Import error: {0}")]
    Import(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Analysis timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Analysis error: {0}")]
    Analysis(String),
}

impl Error {
    /// Configuration errors are surfaced to callers; everything else is a
    /// storage or data problem that the engine degrades around.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::UnknownAdministration(_) | Self::Regex(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
