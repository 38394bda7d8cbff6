//! Pattern engine commands: analyze, apply, list, maintain

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use tally_core::{
    import::parse_ledger_csv, AnalysisMode, ApplyResult, Field, PatternEngine,
    PredictedTransaction, PruneCriteria,
};

use super::truncate;
use crate::cli::OutputFormat;

pub fn cmd_analyze(engine: &PatternEngine, admin: &str, mode: AnalysisMode) -> Result<()> {
    println!("🔍 Analyzing {} ({})...", admin, mode);

    let result = engine
        .refresh_patterns(admin, mode)
        .with_context(|| format!("Pattern analysis failed for {}", admin))?;

    if result.fell_back_to_full {
        println!("   ⚠️  Incremental update failed, ran a full analysis instead");
    }

    println!();
    println!("📊 Analysis Results ({})", result.mode);
    println!("   ─────────────────────────────");
    println!("   Transactions analyzed: {}", result.transactions_analyzed);
    println!("   Transactions skipped: {}", result.transactions_skipped);
    println!("   New patterns: {}", result.new_patterns);
    println!("   Updated patterns: {}", result.updated_patterns);
    println!("   Patterns stored: {}", result.patterns_total);
    println!("   Duration: {} ms", result.duration_ms);

    Ok(())
}

/// One output row of `apply --format csv`
#[derive(Serialize)]
struct ApplyRow<'a> {
    administration: &'a str,
    date: NaiveDate,
    description: &'a str,
    amount: f64,
    debet: Option<&'a str>,
    credit: Option<&'a str>,
    reference: Option<&'a str>,
    debet_confidence: f64,
    credit_confidence: f64,
    reference_confidence: f64,
    verb: Option<&'a str>,
}

impl<'a> From<&'a PredictedTransaction> for ApplyRow<'a> {
    fn from(p: &'a PredictedTransaction) -> Self {
        let tx = &p.transaction;
        Self {
            administration: &tx.administration,
            date: tx.date,
            description: &tx.description,
            amount: tx.amount,
            debet: tx.debet_account.as_deref(),
            credit: tx.credit_account.as_deref(),
            reference: tx.reference_number.as_deref(),
            debet_confidence: p.confidence.get(Field::Debet),
            credit_confidence: p.confidence.get(Field::Credit),
            reference_confidence: p.confidence.get(Field::Reference),
            verb: p.matched_verb.as_deref(),
        }
    }
}

#[derive(Serialize)]
struct ApplyReport<'a> {
    result: &'a ApplyResult,
    transactions: &'a [PredictedTransaction],
}

pub fn cmd_apply(
    engine: &PatternEngine,
    file: &Path,
    admin: &str,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<()> {
    let csv_file =
        File::open(file).with_context(|| format!("Failed to open file: {}", file.display()))?;
    let parsed = parse_ledger_csv(csv_file, Some(admin))
        .with_context(|| format!("Failed to parse CSV: {}", file.display()))?;

    for row in &parsed.skipped {
        eprintln!("   ⚠️  line {}: {}", row.line, row.reason);
    }

    let (predicted, result) = engine
        .apply_patterns(&parsed.transactions, admin)
        .with_context(|| format!("Failed to apply patterns for {}", admin))?;

    let mut out: Box<dyn Write> = match output {
        Some(path) => Box::new(
            File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };

    match format {
        OutputFormat::Json => {
            let report = ApplyReport {
                result: &result,
                transactions: &predicted,
            };
            serde_json::to_writer_pretty(&mut out, &report)
                .context("Failed to serialize predictions")?;
            writeln!(out)?;
        }
        OutputFormat::Csv => write_csv(&mut out, &predicted)?,
        OutputFormat::Table => write_table(&mut out, &predicted, &result)?,
    }
    out.flush()?;

    if let Some(path) = output {
        println!(
            "✅ Wrote {} transactions to {}",
            predicted.len(),
            path.display()
        );
    }

    Ok(())
}

fn write_csv(out: &mut dyn Write, predicted: &[PredictedTransaction]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for p in predicted {
        writer.serialize(ApplyRow::from(p))?;
    }
    writer.flush()?;
    Ok(())
}

fn write_table(
    out: &mut dyn Write,
    predicted: &[PredictedTransaction],
    result: &ApplyResult,
) -> Result<()> {
    writeln!(
        out,
        "{:<10} {:<32} {:>10} {:<8} {:<8} {:<14} CONF",
        "DATE", "DESCRIPTION", "AMOUNT", "DEBET", "CREDIT", "REFERENCE"
    )?;
    writeln!(out, "{}", "-".repeat(96))?;

    for p in predicted {
        let tx = &p.transaction;
        let mark = |field: Field| if p.filled.contains(&field) { "*" } else { "" };
        let confidence = p
            .filled
            .iter()
            .map(|f| p.confidence.get(*f))
            .fold(0.0_f64, f64::max);
        writeln!(
            out,
            "{:<10} {:<32} {:>10.2} {:<8} {:<8} {:<14} {}",
            tx.date,
            truncate(&tx.description, 32),
            tx.amount,
            format!("{}{}", tx.debet_account.as_deref().unwrap_or("-"), mark(Field::Debet)),
            format!("{}{}", tx.credit_account.as_deref().unwrap_or("-"), mark(Field::Credit)),
            format!(
                "{}{}",
                truncate(tx.reference_number.as_deref().unwrap_or("-"), 12),
                mark(Field::Reference)
            ),
            if p.filled.is_empty() {
                "-".to_string()
            } else {
                format!("{:.2}", confidence)
            }
        )?;
    }

    writeln!(out)?;
    writeln!(out, "📊 {} transactions processed (* = predicted)", result.total_processed)?;
    writeln!(
        out,
        "   Predicted: {} debet, {} credit, {} reference",
        result.debet_predictions, result.credit_predictions, result.reference_predictions
    )?;
    writeln!(out, "   Average confidence: {:.2}", result.average_confidence)?;
    writeln!(out, "   Already complete: {}", result.already_complete)?;
    writeln!(out, "   No prediction: {}", result.failed_predictions)?;
    Ok(())
}

pub fn cmd_patterns(
    engine: &PatternEngine,
    admin: &str,
    verb: Option<&str>,
    limit: usize,
) -> Result<()> {
    let filter = verb.map(str::to_uppercase);
    let mut patterns: Vec<_> = engine
        .patterns(admin)?
        .into_iter()
        .filter(|p| match &filter {
            Some(v) => p.verb == *v || p.verb_company == *v,
            None => true,
        })
        .collect();

    if patterns.is_empty() {
        println!("No patterns found for {}.", admin);
        return Ok(());
    }

    patterns.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.verb.cmp(&b.verb))
    });

    println!(
        "{:<28} {:<6} {:<6} {:<6} {:<12} {:>5} {:>5} {:<10} SAMPLE",
        "VERB", "BANK", "DEBET", "CREDIT", "REFERENCE", "OCC", "CONF", "LAST SEEN"
    );
    println!("{}", "-".repeat(110));
    for p in patterns.iter().take(limit) {
        println!(
            "{:<28} {:<6} {:<6} {:<6} {:<12} {:>5} {:>5.2} {:<10} {}",
            truncate(&p.verb, 28),
            p.bank_account,
            p.debet_account.as_deref().unwrap_or("-"),
            p.credit_account.as_deref().unwrap_or("-"),
            truncate(p.reference_number.as_deref().unwrap_or("-"), 12),
            p.occurrences,
            p.confidence,
            p.last_seen,
            truncate(&p.sample_description, 30)
        );
    }

    println!();
    if patterns.len() > limit {
        println!("Showing {} of {} patterns", limit, patterns.len());
    } else {
        println!("{} pattern(s)", patterns.len());
    }

    Ok(())
}

pub fn cmd_invalidate(engine: &PatternEngine, admin: &str) -> Result<()> {
    engine
        .invalidate_cache(admin)
        .with_context(|| format!("Failed to invalidate patterns for {}", admin))?;
    println!("✅ Patterns for {} invalidated", admin);
    println!("   The next lookup re-analyzes the ledger.");
    Ok(())
}

pub fn cmd_stats(engine: &PatternEngine, admins: &[String], json: bool) -> Result<()> {
    for admin in admins {
        engine
            .warm_up(admin)
            .with_context(|| format!("Failed to load patterns for {}", admin))?;
    }

    let stats = engine.cache_stats();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("📊 Pattern Cache");
    println!("   ─────────────────────────────");
    println!("   Entries: {} / {}", stats.entries, stats.capacity);
    println!("   Memory hits: {}", stats.memory_hits);
    println!("   Database hits: {}", stats.database_hits);
    println!("   Snapshot hits: {}", stats.file_hits);
    println!("   Misses (analyses): {}", stats.misses);
    println!("   Stale reloads: {}", stats.stale_reloads);
    println!("   Evictions: {}", stats.evictions);
    println!("   Invalidations: {}", stats.invalidations);
    println!("   Degraded serves: {}", stats.degraded_serves);
    println!("   Hit rate: {:.1}%", stats.hit_rate() * 100.0);

    Ok(())
}

pub fn cmd_prune(
    engine: &PatternEngine,
    admin: &str,
    min_confidence: Option<f64>,
    stale_before: Option<&str>,
) -> Result<()> {
    let stale_before = stale_before
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .transpose()
        .context("Invalid --stale-before date format (use YYYY-MM-DD)")?;

    let criteria = PruneCriteria {
        min_confidence,
        stale_before,
    };
    if criteria.is_empty() {
        anyhow::bail!("Specify --min-confidence and/or --stale-before");
    }

    let removed = engine.prune_patterns(admin, &criteria)?;
    println!("🧹 Removed {} pattern(s) from {}", removed, admin);
    Ok(())
}

pub fn cmd_warm_up(engine: &PatternEngine, admins: &[String]) -> Result<()> {
    for admin in admins {
        let count = engine
            .warm_up(admin)
            .with_context(|| format!("Failed to load patterns for {}", admin))?;
        println!("   {}: {} patterns", admin, count);
    }
    println!("✅ Warmed up {} administration(s)", admins.len());
    Ok(())
}
