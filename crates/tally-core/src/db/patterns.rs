//! Pattern and analysis metadata storage

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use super::{format_datetime, parse_date, parse_datetime, to_sql_err, Database, DATE_FORMAT};
use crate::error::Result;
use crate::models::{AnalysisMetadata, Pattern, PruneCriteria};
use crate::store::{AnalysisWrite, PatternStore, UpsertMode};

const INSERT_PATTERN: &str = r#"
    INSERT INTO patterns (
        administration, bank_account, verb, verb_company, verb_reference, is_compound,
        reference_number, debet_account, credit_account, occurrences, confidence,
        last_seen, total_amount, sample_description, updated_at
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
"#;

const ON_CONFLICT_REPLACE: &str = r#"
    ON CONFLICT(administration, bank_account, verb) DO UPDATE SET
        verb_company = excluded.verb_company,
        verb_reference = excluded.verb_reference,
        is_compound = excluded.is_compound,
        reference_number = excluded.reference_number,
        debet_account = excluded.debet_account,
        credit_account = excluded.credit_account,
        occurrences = excluded.occurrences,
        confidence = excluded.confidence,
        last_seen = excluded.last_seen,
        total_amount = excluded.total_amount,
        sample_description = excluded.sample_description,
        updated_at = excluded.updated_at
"#;

// SET expressions all see the pre-update row
const ON_CONFLICT_MERGE: &str = r#"
    ON CONFLICT(administration, bank_account, verb) DO UPDATE SET
        debet_account = CASE WHEN excluded.last_seen >= patterns.last_seen
            THEN excluded.debet_account ELSE patterns.debet_account END,
        credit_account = CASE WHEN excluded.last_seen >= patterns.last_seen
            THEN excluded.credit_account ELSE patterns.credit_account END,
        sample_description = CASE WHEN excluded.last_seen >= patterns.last_seen
            THEN excluded.sample_description ELSE patterns.sample_description END,
        reference_number = COALESCE(
            CASE WHEN excluded.last_seen >= patterns.last_seen THEN excluded.reference_number END,
            patterns.reference_number),
        confidence = CASE WHEN excluded.occurrences >= patterns.occurrences
            THEN excluded.confidence ELSE patterns.confidence END,
        total_amount = CASE WHEN excluded.occurrences >= patterns.occurrences
            THEN excluded.total_amount ELSE patterns.total_amount END,
        occurrences = MAX(patterns.occurrences, excluded.occurrences),
        last_seen = MAX(patterns.last_seen, excluded.last_seen),
        updated_at = excluded.updated_at
"#;

const UPSERT_METADATA_REPLACE: &str = r#"
    INSERT INTO analysis_metadata
        (administration, last_analysis_date, transactions_analyzed, patterns_discovered,
         updated_at, last_ledger_id)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(administration) DO UPDATE SET
        last_analysis_date = excluded.last_analysis_date,
        last_ledger_id = excluded.last_ledger_id,
        transactions_analyzed = excluded.transactions_analyzed,
        patterns_discovered = excluded.patterns_discovered,
        updated_at = excluded.updated_at
"#;

const UPSERT_METADATA_MERGE: &str = r#"
    INSERT INTO analysis_metadata
        (administration, last_analysis_date, transactions_analyzed, patterns_discovered,
         updated_at, last_ledger_id)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(administration) DO UPDATE SET
        last_analysis_date = MAX(analysis_metadata.last_analysis_date, excluded.last_analysis_date),
        last_ledger_id = MAX(analysis_metadata.last_ledger_id, excluded.last_ledger_id),
        transactions_analyzed = MAX(analysis_metadata.transactions_analyzed, excluded.transactions_analyzed),
        patterns_discovered = excluded.patterns_discovered,
        updated_at = excluded.updated_at
"#;

const PATTERN_COLUMNS: &str = "administration, bank_account, verb, verb_company, verb_reference, \
     is_compound, reference_number, debet_account, credit_account, occurrences, confidence, \
     last_seen, total_amount, sample_description";

fn row_to_pattern(row: &Row<'_>) -> rusqlite::Result<Pattern> {
    let last_seen: String = row.get(11)?;
    Ok(Pattern {
        administration: row.get(0)?,
        bank_account: row.get(1)?,
        verb: row.get(2)?,
        verb_company: row.get(3)?,
        verb_reference: row.get(4)?,
        is_compound: row.get(5)?,
        reference_number: row.get(6)?,
        debet_account: row.get(7)?,
        credit_account: row.get(8)?,
        occurrences: row.get(9)?,
        confidence: row.get(10)?,
        last_seen: parse_date(&last_seen).map_err(to_sql_err)?,
        total_amount: row.get(12)?,
        sample_description: row.get(13)?,
    })
}

fn row_to_metadata(row: &Row<'_>) -> rusqlite::Result<AnalysisMetadata> {
    let last_analysis: String = row.get(1)?;
    let updated_at: String = row.get(4)?;
    Ok(AnalysisMetadata {
        administration: row.get(0)?,
        last_analysis_date: parse_datetime(&last_analysis).map_err(to_sql_err)?,
        transactions_analyzed: row.get(2)?,
        patterns_discovered: row.get(3)?,
        updated_at: parse_datetime(&updated_at).map_err(to_sql_err)?,
        last_ledger_id: row.get(5)?,
    })
}

fn count_patterns(conn: &rusqlite::Connection, administration: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM patterns WHERE administration = ?",
        params![administration],
        |row| row.get(0),
    )?;
    Ok(count)
}

impl Database {
    /// Administrations that have analysis metadata
    pub fn analyzed_administrations(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT administration FROM analysis_metadata ORDER BY administration")?;
        let admins = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(admins)
    }
}

impl PatternStore for Database {
    fn load_patterns(&self, administration: &str) -> Result<Vec<Pattern>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM patterns WHERE administration = ? ORDER BY verb, bank_account",
            PATTERN_COLUMNS
        ))?;

        let patterns = stmt
            .query_map(params![administration], row_to_pattern)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(patterns)
    }

    fn load_metadata(&self, administration: &str) -> Result<Option<AnalysisMetadata>> {
        let conn = self.conn()?;
        let metadata = conn
            .query_row(
                r#"
                SELECT administration, last_analysis_date, transactions_analyzed,
                       patterns_discovered, updated_at, last_ledger_id
                FROM analysis_metadata WHERE administration = ?
                "#,
                params![administration],
                row_to_metadata,
            )
            .optional()?;
        Ok(metadata)
    }

    fn write_analysis(&self, write: &AnalysisWrite<'_>) -> Result<AnalysisMetadata> {
        let (conflict, metadata_sql) = match write.mode {
            UpsertMode::Replace => (ON_CONFLICT_REPLACE, UPSERT_METADATA_REPLACE),
            UpsertMode::Merge => (ON_CONFLICT_MERGE, UPSERT_METADATA_MERGE),
        };
        let upsert = format!("{}{}", INSERT_PATTERN, conflict);

        self.with_transaction(|conn| {
            let updated_at = format_datetime(&Utc::now());

            {
                let mut stmt = conn.prepare(&upsert)?;
                for (i, p) in write.patterns.iter().enumerate() {
                    if i % 256 == 0 {
                        write.deadline.check()?;
                    }
                    stmt.execute(params![
                        write.administration,
                        p.bank_account,
                        p.verb,
                        p.verb_company,
                        p.verb_reference,
                        p.is_compound,
                        p.reference_number,
                        p.debet_account,
                        p.credit_account,
                        p.occurrences,
                        p.confidence,
                        p.last_seen.format(DATE_FORMAT).to_string(),
                        p.total_amount,
                        p.sample_description,
                        updated_at,
                    ])?;
                }
            }

            let patterns_discovered = count_patterns(conn, write.administration)?;
            conn.execute(
                metadata_sql,
                params![
                    write.administration,
                    format_datetime(&write.analyzed_at),
                    write.transactions_analyzed,
                    patterns_discovered,
                    updated_at,
                    write.high_water,
                ],
            )?;

            // Last chance to abort: nothing is visible until COMMIT
            write.deadline.check()?;

            let metadata = conn.query_row(
                r#"
                SELECT administration, last_analysis_date, transactions_analyzed,
                       patterns_discovered, updated_at, last_ledger_id
                FROM analysis_metadata WHERE administration = ?
                "#,
                params![write.administration],
                row_to_metadata,
            )?;
            Ok(metadata)
        })
    }

    fn clear(&self, administration: &str) -> Result<()> {
        self.with_transaction(|conn| {
            let patterns = conn.execute(
                "DELETE FROM patterns WHERE administration = ?",
                params![administration],
            )?;
            conn.execute(
                "DELETE FROM analysis_metadata WHERE administration = ?",
                params![administration],
            )?;
            debug!(administration, patterns, "Cleared stored patterns");
            Ok(())
        })
    }

    fn prune(&self, administration: &str, criteria: &PruneCriteria) -> Result<usize> {
        if criteria.is_empty() {
            return Ok(0);
        }

        self.with_transaction(|conn| {
            let stale_before = criteria
                .stale_before
                .map(|d| d.format(DATE_FORMAT).to_string());
            let removed = conn.execute(
                r#"
                DELETE FROM patterns
                WHERE administration = ?1
                  AND ((?2 IS NOT NULL AND confidence < ?2)
                    OR (?3 IS NOT NULL AND last_seen < ?3))
                "#,
                params![administration, criteria.min_confidence, stale_before],
            )?;

            if removed > 0 {
                let remaining = count_patterns(conn, administration)?;
                conn.execute(
                    r#"
                    UPDATE analysis_metadata SET patterns_discovered = ?, updated_at = ?
                    WHERE administration = ?
                    "#,
                    params![remaining, format_datetime(&Utc::now()), administration],
                )?;
            }

            Ok(removed)
        })
    }
}
