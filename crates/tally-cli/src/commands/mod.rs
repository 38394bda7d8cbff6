//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Init and shared utilities (open_db, open_engine)
//! - `ledger` - Ledger CSV import and the bank-account registry
//! - `patterns` - Analyze, apply, list, invalidate, stats, prune, warm-up
//! - `schedule` - Periodic incremental refresh

pub mod core;
pub mod ledger;
pub mod patterns;
pub mod schedule;

// Re-export command functions for main.rs
pub use self::core::*;
pub use ledger::*;
pub use patterns::*;
pub use schedule::*;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
