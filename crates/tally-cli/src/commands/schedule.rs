//! Scheduled incremental refresh

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tally_core::{AnalysisMode, PatternEngine};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Outcome of one refresh round
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RoundSummary {
    pub refreshed: usize,
    pub failed: usize,
}

/// Refresh every administration once. Failures are logged and skipped.
pub async fn run_round(engine: Arc<PatternEngine>, admins: &[String]) -> Result<RoundSummary> {
    let mut summary = RoundSummary::default();

    for admin in admins {
        let engine = engine.clone();
        let name = admin.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            engine.refresh_patterns(&name, AnalysisMode::Incremental)
        })
        .await?;

        match outcome {
            Ok(result) => {
                info!(
                    administration = %admin,
                    mode = %result.mode,
                    transactions = result.transactions_analyzed,
                    patterns = result.patterns_total,
                    "Scheduled refresh complete"
                );
                summary.refreshed += 1;
            }
            Err(e) => {
                warn!(administration = %admin, error = %e, "Scheduled refresh failed");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

pub async fn cmd_schedule(
    engine: PatternEngine,
    admins: Vec<String>,
    interval_secs: u64,
    rounds: Option<u64>,
) -> Result<()> {
    if admins.is_empty() {
        anyhow::bail!(
            "No administrations to refresh. Pass them explicitly or run 'tally analyze ADMIN' first."
        );
    }

    println!(
        "⏱️  Refreshing {} administration(s) every {}s (Ctrl-C to stop)",
        admins.len(),
        interval_secs
    );

    let engine = Arc::new(engine);
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut round = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping scheduled refresh");
                break;
            }
        }

        round += 1;
        let summary = run_round(engine.clone(), &admins).await?;
        println!(
            "   Round {}: {} refreshed, {} failed",
            round, summary.refreshed, summary.failed
        );

        if rounds.is_some_and(|max| round >= max) {
            break;
        }
    }

    let stats = engine.cache_stats();
    println!(
        "✅ Stopped after {} round(s); cache hit rate {:.1}%",
        round,
        stats.hit_rate() * 100.0
    );
    Ok(())
}
