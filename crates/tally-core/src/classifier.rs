//! Bank-account classification
//!
//! Decides which side of a transaction is the administration's own bank
//! account. The opposite side is what patterns learn and predict.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::warn;

use crate::error::{Error, Result};
use crate::models::{Side, Transaction};
use crate::store::BankAccountLookup;

/// Outcome of classifying a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Exactly one side is a bank account
    Bank { account: String, side: Side },
    /// Neither or both sides are bank accounts
    Ambiguous,
}

impl Classification {
    pub fn bank_account(&self) -> Option<&str> {
        match self {
            Self::Bank { account, .. } => Some(account),
            Self::Ambiguous => None,
        }
    }

    /// The side to predict (opposite the bank account)
    pub fn target_side(&self) -> Option<Side> {
        match self {
            Self::Bank { side, .. } => Some(side.opposite()),
            Self::Ambiguous => None,
        }
    }
}

/// The bank account codes of one administration
#[derive(Debug, Clone, Default)]
pub struct BankAccounts {
    codes: HashSet<String>,
}

impl BankAccounts {
    pub fn new(codes: HashSet<String>) -> Self {
        Self { codes }
    }

    pub fn is_bank_account(&self, account_code: &str) -> bool {
        let code = account_code.trim();
        !code.is_empty() && self.codes.contains(code)
    }

    pub fn classify(&self, tx: &Transaction) -> Classification {
        let debet = tx.debet_account.as_deref().filter(|c| self.is_bank_account(c));
        let credit = tx.credit_account.as_deref().filter(|c| self.is_bank_account(c));

        match (debet, credit) {
            (Some(account), None) => Classification::Bank {
                account: account.trim().to_string(),
                side: Side::Debet,
            },
            (None, Some(account)) => Classification::Bank {
                account: account.trim().to_string(),
                side: Side::Credit,
            },
            _ => Classification::Ambiguous,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }
}

/// Classifier backed by the bank-account registry
#[derive(Clone)]
pub struct BankAccountClassifier {
    lookup: Arc<dyn BankAccountLookup>,
}

impl BankAccountClassifier {
    pub fn new(lookup: Arc<dyn BankAccountLookup>) -> Self {
        Self { lookup }
    }

    /// Load the bank accounts of an administration.
    ///
    /// A blank administration or one without registered bank accounts is a
    /// configuration error. Lookup failures propagate as storage errors.
    pub fn accounts_for(&self, administration: &str) -> Result<BankAccounts> {
        validate_administration(administration)?;
        let codes = self.lookup.bank_accounts(administration)?;
        if codes.is_empty() {
            return Err(Error::UnknownAdministration(administration.to_string()));
        }
        Ok(BankAccounts::new(codes))
    }

    /// Like `accounts_for`, but a failing lookup degrades to an empty set
    pub fn accounts_or_empty(&self, administration: &str) -> Result<BankAccounts> {
        match self.accounts_for(administration) {
            Ok(accounts) => Ok(accounts),
            Err(e) if e.is_configuration() => Err(e),
            Err(e) => {
                warn!(administration, error = %e, "Bank account lookup failed, classifying without it");
                Ok(BankAccounts::default())
            }
        }
    }

    pub fn is_bank_account(&self, account_code: &str, administration: &str) -> Result<bool> {
        Ok(self.accounts_for(administration)?.is_bank_account(account_code))
    }
}

pub(crate) fn validate_administration(administration: &str) -> Result<()> {
    if administration.trim().is_empty() {
        return Err(Error::Config("administration must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    struct StaticLookup(Vec<&'static str>);

    impl BankAccountLookup for StaticLookup {
        fn bank_accounts(&self, administration: &str) -> Result<HashSet<String>> {
            if administration == "acme" {
                Ok(self.0.iter().map(|s| s.to_string()).collect())
            } else if administration == "broken" {
                Err(Error::InvalidData("lookup offline".into()))
            } else {
                Ok(HashSet::new())
            }
        }
    }

    fn tx(debet: Option<&str>, credit: Option<&str>) -> Transaction {
        Transaction {
            id: None,
            administration: "acme".into(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            description: "ANWB".into(),
            amount: -10.0,
            debet_account: debet.map(String::from),
            credit_account: credit.map(String::from),
            reference_number: None,
        }
    }

    fn classifier() -> BankAccountClassifier {
        BankAccountClassifier::new(Arc::new(StaticLookup(vec!["1010", "1020"])))
    }

    #[test]
    fn test_classify_sides() {
        let accounts = classifier().accounts_for("acme").unwrap();

        let c = accounts.classify(&tx(Some("4000"), Some("1010")));
        assert_eq!(c.bank_account(), Some("1010"));
        assert_eq!(c.target_side(), Some(Side::Debet));

        let c = accounts.classify(&tx(Some("1020"), None));
        assert_eq!(c.target_side(), Some(Side::Credit));

        assert_eq!(
            accounts.classify(&tx(Some("1010"), Some("1020"))),
            Classification::Ambiguous
        );
        assert_eq!(
            accounts.classify(&tx(Some("4000"), Some("8000"))),
            Classification::Ambiguous
        );
    }

    #[test]
    fn test_is_bank_account() {
        let c = classifier();
        assert!(c.is_bank_account("1010", "acme").unwrap());
        assert!(c.is_bank_account(" 1010 ", "acme").unwrap());
        assert!(!c.is_bank_account("4000", "acme").unwrap());
    }

    #[test]
    fn test_unknown_administration_is_configuration_error() {
        let c = classifier();
        assert!(matches!(
            c.accounts_for("other"),
            Err(Error::UnknownAdministration(_))
        ));
        assert!(c.accounts_for("  ").unwrap_err().is_configuration());
    }

    #[test]
    fn test_lookup_failure_degrades() {
        let c = classifier();
        assert!(c.accounts_for("broken").is_err());
        assert!(c.accounts_or_empty("broken").unwrap().is_empty());
    }
}
