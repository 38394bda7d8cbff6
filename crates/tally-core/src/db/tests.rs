//! Database tests

use super::*;
use crate::models::*;
use crate::store::{AnalysisWrite, BankAccountLookup, Deadline, LedgerSource, PatternStore, UpsertMode};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use rusqlite::params;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ledger_tx(admin: &str, day: NaiveDate, description: &str, amount: f64) -> Transaction {
        Transaction {
            id: None,
            administration: admin.into(),
            date: day,
            description: description.into(),
            amount,
            debet_account: Some("4000".into()),
            credit_account: Some("1010".into()),
            reference_number: None,
        }
    }

    fn pattern(verb: &str, occurrences: i64, last_seen: NaiveDate) -> Pattern {
        Pattern {
            administration: "acme".into(),
            bank_account: "1010".into(),
            verb: verb.into(),
            verb_company: verb.into(),
            verb_reference: None,
            is_compound: false,
            reference_number: Some("REF-1".into()),
            debet_account: Some("4000".into()),
            credit_account: Some("1010".into()),
            occurrences,
            confidence: 0.5,
            last_seen,
            total_amount: -10.0 * occurrences as f64,
            sample_description: format!("{} sample", verb),
        }
    }

    fn write<'a>(patterns: &'a [Pattern], mode: UpsertMode, analyzed: i64) -> AnalysisWrite<'a> {
        AnalysisWrite {
            administration: "acme",
            patterns,
            mode,
            analyzed_at: Utc::now(),
            high_water: analyzed,
            transactions_analyzed: analyzed,
            deadline: Deadline::unbounded(),
        }
    }

    #[test]
    fn test_in_memory_db() {
        let db = Database::in_memory().unwrap();
        assert!(db.list_bank_accounts(None).unwrap().is_empty());
        assert!(db.load_patterns("acme").unwrap().is_empty());
        assert!(db.load_metadata("acme").unwrap().is_none());
    }

    #[test]
    fn test_schema_exists() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();

        let result: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('patterns') WHERE name IN ('administration', 'bank_account', 'verb', 'verb_company', 'verb_reference', 'is_compound', 'reference_number', 'debet_account', 'credit_account', 'occurrences', 'confidence', 'last_seen', 'sample_description')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(result, 13, "patterns table should have 13 expected columns");

        let result: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('analysis_metadata') WHERE name IN ('administration', 'last_analysis_date', 'last_ledger_id', 'transactions_analyzed', 'patterns_discovered')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(result, 5);
    }

    #[test]
    fn test_legacy_metadata_gains_ledger_mark() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("legacy.db");
        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute_batch(
                r#"
                CREATE TABLE analysis_metadata (
                    administration TEXT PRIMARY KEY,
                    last_analysis_date TEXT NOT NULL,
                    transactions_analyzed INTEGER NOT NULL DEFAULT 0,
                    patterns_discovered INTEGER NOT NULL DEFAULT 0,
                    updated_at TEXT NOT NULL
                );
                INSERT INTO analysis_metadata VALUES
                    ('acme', '2024-01-01 00:00:00.000000', 40, 3, '2024-01-01 00:00:00.000000');
                "#,
            )
            .unwrap();
        }

        let db = Database::new_unencrypted(&path.to_string_lossy()).unwrap();
        let meta = db.load_metadata("acme").unwrap().unwrap();
        assert_eq!(meta.last_ledger_id, 0);
        assert_eq!(meta.transactions_analyzed, 40);
        assert!(!meta.has_ledger_mark());
    }

    #[test]
    fn test_bank_account_registry() {
        let db = Database::in_memory().unwrap();
        db.add_bank_account("acme", "1010", Some("ING checking")).unwrap();
        db.add_bank_account("acme", "1020", None).unwrap();
        db.add_bank_account("other", "1010", None).unwrap();

        // Re-adding without a name keeps the existing one
        db.add_bank_account("acme", "1010", None).unwrap();

        let accounts = db.list_bank_accounts(Some("acme")).unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].name.as_deref(), Some("ING checking"));
        assert_eq!(db.list_bank_accounts(None).unwrap().len(), 3);

        let codes = db.bank_accounts("acme").unwrap();
        assert!(codes.contains("1010") && codes.contains("1020"));

        assert!(db.remove_bank_account("acme", "1020").unwrap());
        assert!(!db.remove_bank_account("acme", "1020").unwrap());
        assert_eq!(db.bank_accounts("acme").unwrap().len(), 1);

        assert!(db.add_bank_account(" ", "1010", None).is_err());
    }

    #[test]
    fn test_ledger_dedup_and_window() {
        let db = Database::in_memory().unwrap();
        let today = date(2024, 6, 1);

        let txs = vec![
            ledger_tx("acme", today - Duration::days(10), "ANWB", -50.0),
            ledger_tx("acme", today - Duration::days(800), "OLD", -5.0),
            ledger_tx("other", today, "ANWB", -50.0),
        ];
        let result = db.import_ledger(&txs).unwrap();
        assert_eq!(result.inserted, 3);

        let again = db.import_ledger(&txs[..1]).unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(again.duplicates, 1);
        assert_eq!(db.count_ledger_transactions("acme").unwrap(), 2);

        let window = db
            .transactions_in_window("acme", today - Duration::days(730))
            .unwrap();
        assert_eq!(window.transactions.len(), 1);
        assert_eq!(window.transactions[0].description, "ANWB");
        assert!(window.transactions[0].id.is_some());

        // The mark covers rows outside the date window too
        let ids: Vec<i64> = [&txs[0], &txs[1]]
            .iter()
            .map(|tx| ledger_id(&db, &tx.description))
            .collect();
        assert_eq!(window.high_water, *ids.iter().max().unwrap());
    }

    fn ledger_id(db: &Database, description: &str) -> i64 {
        db.conn()
            .unwrap()
            .query_row(
                "SELECT id FROM ledger_transactions WHERE administration = 'acme' AND description = ?",
                params![description],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn test_ledger_rows_after_high_water_mark() {
        let db = Database::in_memory().unwrap();
        let day = date(2024, 5, 1);

        let empty = db.transactions_in_window("acme", date(2020, 1, 1)).unwrap();
        assert!(empty.transactions.is_empty());
        assert_eq!(empty.high_water, 0);

        db.insert_ledger_transaction(&ledger_tx("acme", day, "A", -1.0))
            .unwrap();
        let first = db.transactions_in_window("acme", date(2020, 1, 1)).unwrap();
        assert_eq!(first.transactions.len(), 1);

        db.insert_ledger_transaction(&ledger_tx("acme", day, "B", -1.0))
            .unwrap();
        db.insert_ledger_transaction(&ledger_tx("other", day, "C", -1.0))
            .unwrap();

        let newer = db
            .transactions_after_id("acme", first.high_water, date(2020, 1, 1))
            .unwrap();
        assert_eq!(newer.transactions.len(), 1);
        assert_eq!(newer.transactions[0].description, "B");
        assert!(newer.high_water > first.high_water);

        // Nothing new keeps the mark where it was
        let none = db
            .transactions_after_id("acme", newer.high_water, date(2020, 1, 1))
            .unwrap();
        assert!(none.transactions.is_empty());
        assert_eq!(none.high_water, newer.high_water);
    }

    #[test]
    fn test_write_analysis_replace_and_metadata() {
        let db = Database::in_memory().unwrap();
        let patterns = vec![
            pattern("ANWB", 3, date(2024, 5, 1)),
            pattern("GAMMA", 1, date(2024, 4, 1)),
        ];

        let meta = db
            .write_analysis(&write(&patterns, UpsertMode::Replace, 4))
            .unwrap();
        assert_eq!(meta.patterns_discovered, 2);
        assert_eq!(meta.transactions_analyzed, 4);

        let loaded = db.load_patterns("acme").unwrap();
        assert_eq!(loaded, patterns);

        // Replace overwrites even with smaller values
        let shrunk = vec![pattern("ANWB", 2, date(2024, 3, 1))];
        let meta2 = db
            .write_analysis(&write(&shrunk, UpsertMode::Replace, 2))
            .unwrap();
        assert_eq!(meta2.transactions_analyzed, 2);
        assert_eq!(meta2.last_ledger_id, 2);
        assert!(meta2.updated_at > meta.updated_at);

        let loaded = db.load_patterns("acme").unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].occurrences, 2);
        assert_eq!(loaded[0].last_seen, date(2024, 3, 1));
    }

    #[test]
    fn test_write_analysis_merge_is_monotonic() {
        let db = Database::in_memory().unwrap();
        let mut newer = pattern("ANWB", 5, date(2024, 5, 1));
        newer.debet_account = Some("4100".into());
        db.write_analysis(&write(&[newer], UpsertMode::Merge, 5))
            .unwrap();

        // A slower concurrent writer with older evidence
        let older = pattern("ANWB", 3, date(2024, 4, 1));
        let meta = db
            .write_analysis(&write(&[older], UpsertMode::Merge, 3))
            .unwrap();
        assert_eq!(meta.transactions_analyzed, 5);
        assert_eq!(meta.last_ledger_id, 5);

        let loaded = db.load_patterns("acme").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].occurrences, 5);
        assert_eq!(loaded[0].last_seen, date(2024, 5, 1));
        assert_eq!(loaded[0].debet_account.as_deref(), Some("4100"));
        assert_eq!(loaded[0].total_amount, -50.0);
    }

    #[test]
    fn test_merge_keeps_reference_when_new_evidence_has_none() {
        let db = Database::in_memory().unwrap();
        db.write_analysis(&write(
            &[pattern("KPN", 1, date(2024, 1, 1))],
            UpsertMode::Merge,
            1,
        ))
        .unwrap();

        let mut update = pattern("KPN", 2, date(2024, 2, 1));
        update.reference_number = None;
        db.write_analysis(&write(&[update], UpsertMode::Merge, 2))
            .unwrap();

        let loaded = db.load_patterns("acme").unwrap();
        assert_eq!(loaded[0].reference_number.as_deref(), Some("REF-1"));
        assert_eq!(loaded[0].occurrences, 2);
    }

    #[test]
    fn test_expired_deadline_rolls_back() {
        let db = Database::in_memory().unwrap();
        let original = vec![pattern("ANWB", 3, date(2024, 5, 1))];
        db.write_analysis(&write(&original, UpsertMode::Replace, 3))
            .unwrap();

        let replacement = vec![pattern("ANWB", 9, date(2024, 6, 1))];
        let mut w = write(&replacement, UpsertMode::Replace, 9);
        w.deadline = Deadline::new(std::time::Duration::ZERO);
        std::thread::sleep(std::time::Duration::from_millis(2));

        let err = db.write_analysis(&w).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(db.load_patterns("acme").unwrap(), original);
        assert_eq!(
            db.load_metadata("acme").unwrap().unwrap().transactions_analyzed,
            3
        );
    }

    #[test]
    fn test_clear_and_prune() {
        let db = Database::in_memory().unwrap();
        let mut weak = pattern("WEAK", 1, date(2020, 1, 1));
        weak.confidence = 0.1;
        let patterns = vec![
            pattern("ANWB", 3, date(2024, 5, 1)),
            weak,
            pattern("STALE", 2, date(2021, 1, 1)),
        ];
        let meta = db
            .write_analysis(&write(&patterns, UpsertMode::Replace, 6))
            .unwrap();

        assert_eq!(db.prune("acme", &PruneCriteria::default()).unwrap(), 0);

        let removed = db
            .prune(
                "acme",
                &PruneCriteria {
                    min_confidence: Some(0.2),
                    stale_before: None,
                },
            )
            .unwrap();
        assert_eq!(removed, 1);

        let removed = db
            .prune(
                "acme",
                &PruneCriteria {
                    min_confidence: None,
                    stale_before: Some(date(2022, 1, 1)),
                },
            )
            .unwrap();
        assert_eq!(removed, 1);

        let after = db.load_metadata("acme").unwrap().unwrap();
        assert_eq!(after.patterns_discovered, 1);
        assert!(after.updated_at > meta.updated_at);
        assert_eq!(after.last_analysis_date, meta.last_analysis_date);

        db.clear("acme").unwrap();
        assert!(db.load_patterns("acme").unwrap().is_empty());
        assert!(db.load_metadata("acme").unwrap().is_none());
    }

    #[test]
    fn test_datetime_round_trip() {
        let now = Utc::now();
        let parsed = parse_datetime(&format_datetime(&now)).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
        assert!(parse_datetime("2024-01-01 10:00:00").is_ok());
        assert!(parse_datetime("yesterday").is_err());
    }
}
