//! Ledger CSV parsing
//!
//! Reads bookkeeping exports into `Transaction`s. Columns are matched by
//! header name (case-insensitive, a few aliases each), so exports with extra
//! or reordered columns load as-is:
//!
//! `administration, date, description, amount, debet, credit, reference`
//!
//! `administration` is optional when a default is supplied. Rows with an
//! unparseable date or amount are data errors: they are reported in
//! `ParsedLedger::skipped` and never abort the file.

use std::io::Read;

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::Transaction;

/// A row that could not be parsed
#[derive(Debug, Clone, Serialize)]
pub struct SkippedRow {
    /// 1-based line number including the header
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedLedger {
    pub transactions: Vec<Transaction>,
    pub skipped: Vec<SkippedRow>,
}

struct Columns {
    administration: Option<usize>,
    date: usize,
    description: usize,
    amount: usize,
    debet: Option<usize>,
    credit: Option<usize>,
    reference: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Result<Self> {
        let find = |aliases: &[&str]| {
            headers.iter().position(|h| {
                let h = h.trim().to_lowercase();
                aliases.iter().any(|a| *a == h)
            })
        };
        let require = |aliases: &[&str]| {
            find(aliases).ok_or_else(|| Error::Import(format!("Missing column: {}", aliases[0])))
        };

        Ok(Self {
            administration: find(&["administration", "admin", "tenant"]),
            date: require(&["date", "transaction_date", "transactiondate", "datum"])?,
            description: require(&["description", "omschrijving", "memo"])?,
            amount: require(&["amount", "bedrag"])?,
            debet: find(&["debet", "debit", "debet_account", "debit_account", "debet_rekening"]),
            credit: find(&["credit", "credit_account", "credit_rekening"]),
            reference: find(&["reference", "reference_number", "referencenumber", "referentie"]),
        })
    }
}

/// Parse a ledger CSV export
///
/// `default_administration` is used for rows without an administration
/// column or with a blank value.
pub fn parse_ledger_csv<R: Read>(
    reader: R,
    default_administration: Option<&str>,
) -> Result<ParsedLedger> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let columns = Columns::from_headers(&headers)?;
    let mut parsed = ParsedLedger::default();

    for (i, result) in rdr.records().enumerate() {
        let line = i + 2;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                parsed.skipped.push(SkippedRow {
                    line,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        match parse_record(&record, &columns, default_administration) {
            Ok(tx) => parsed.transactions.push(tx),
            Err(e) => {
                debug!(line, error = %e, "Skipping ledger row");
                parsed.skipped.push(SkippedRow {
                    line,
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(parsed)
}

fn parse_record(
    record: &StringRecord,
    columns: &Columns,
    default_administration: Option<&str>,
) -> Result<Transaction> {
    let optional = |idx: Option<usize>| {
        idx.and_then(|i| record.get(i))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let administration = optional(columns.administration)
        .or_else(|| default_administration.map(String::from))
        .ok_or_else(|| Error::Import("Missing administration".into()))?;

    let date_str = record
        .get(columns.date)
        .ok_or_else(|| Error::Import("Missing date".into()))?;
    let date = parse_date(date_str)?;

    let description = record
        .get(columns.description)
        .ok_or_else(|| Error::Import("Missing description".into()))?
        .to_string();

    let amount_str = record
        .get(columns.amount)
        .ok_or_else(|| Error::Import("Missing amount".into()))?;
    let amount = parse_amount(amount_str)?;

    Ok(Transaction {
        id: None,
        administration,
        date,
        description,
        amount,
        debet_account: optional(columns.debet),
        credit_account: optional(columns.credit),
        reference_number: optional(columns.reference),
    })
}

/// Parse a date string in the formats bookkeeping exports use
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    let s = s.trim();

    let formats = [
        "%Y-%m-%d", // 2024-01-15
        "%d-%m-%Y", // 15-01-2024
        "%d/%m/%Y", // 15/01/2024
        "%Y%m%d",   // 20240115
    ];

    for fmt in formats {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(date);
        }
    }

    Err(Error::Import(format!("Unable to parse date: {}", s)))
}

/// Parse an amount, accepting both `1,234.56` and `1.234,56`
pub fn parse_amount(s: &str) -> Result<f64> {
    let cleaned: String = s
        .trim()
        .replace(['€', '$', ' '], "")
        .replace('(', "-")
        .replace(')', "");

    // Whichever separator comes last is the decimal separator
    let normalized = match (cleaned.rfind(','), cleaned.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), None) => cleaned.replace(',', "."),
        _ => cleaned.replace(',', ""),
    };

    normalized
        .parse::<f64>()
        .map_err(|_| Error::Import(format!("Unable to parse amount: {}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(parse_date("2024-01-15").unwrap(), expected);
        assert_eq!(parse_date("15-01-2024").unwrap(), expected);
        assert_eq!(parse_date("15/01/2024").unwrap(), expected);
        assert!(parse_date("Jan 15").is_err());
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1,234.56").unwrap(), 1234.56);
        assert_eq!(parse_amount("€ 1.234,56").unwrap(), 1234.56);
        assert_eq!(parse_amount("-12,50").unwrap(), -12.5);
        assert_eq!(parse_amount("(100.00)").unwrap(), -100.0);
        assert!(parse_amount("twelve").is_err());
    }

    #[test]
    fn test_parse_ledger_csv() {
        let csv = "administration,date,description,amount,debet,credit,reference\n\
                   acme,2024-01-15,ANWB Energie B.V. 100431234,-85.00,4000,1010,\n\
                   acme,2024-01-16,GAMMA BOUWMARKT,-12.50,,1010,INV-7\n";

        let parsed = parse_ledger_csv(csv.as_bytes(), None).unwrap();
        assert!(parsed.skipped.is_empty());
        assert_eq!(parsed.transactions.len(), 2);

        let first = &parsed.transactions[0];
        assert_eq!(first.administration, "acme");
        assert_eq!(first.debet_account.as_deref(), Some("4000"));
        assert_eq!(first.reference_number, None);

        let second = &parsed.transactions[1];
        assert_eq!(second.debet_account, None);
        assert_eq!(second.reference_number.as_deref(), Some("INV-7"));
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let csv = "Datum,Omschrijving,Bedrag,Credit\n\
                   2024-01-15,ANWB,-85.00,1010\n\
                   not-a-date,GAMMA,-1.00,1010\n\
                   2024-01-17,KPN,abc,1010\n";

        let parsed = parse_ledger_csv(csv.as_bytes(), Some("acme")).unwrap();
        assert_eq!(parsed.transactions.len(), 1);
        assert_eq!(parsed.transactions[0].administration, "acme");
        assert_eq!(parsed.skipped.len(), 2);
        assert_eq!(parsed.skipped[0].line, 3);
        assert_eq!(parsed.skipped[1].line, 4);
    }

    #[test]
    fn test_missing_required_column() {
        let csv = "date,amount\n2024-01-15,1.00\n";
        assert!(matches!(
            parse_ledger_csv(csv.as_bytes(), Some("acme")),
            Err(Error::Import(_))
        ));
    }

    #[test]
    fn test_missing_administration_is_row_error() {
        let csv = "date,description,amount\n2024-01-15,ANWB,1.00\n";
        let parsed = parse_ledger_csv(csv.as_bytes(), None).unwrap();
        assert!(parsed.transactions.is_empty());
        assert_eq!(parsed.skipped.len(), 1);
    }
}
