use crate::domain::transaction::TransactionStatus;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Field-keyed error messages, `field -> rule -> message`.
///
/// Gateways report into one of these, the rule builder produces one, and every
/// `PaymentError` can be rendered as one so callers see a single shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorSet(BTreeMap<String, BTreeMap<String, String>>);

impl ErrorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set holding a single message.
    pub fn single(field: &str, rule: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, rule, message);
        errors
    }

    pub fn add(&mut self, field: &str, rule: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .insert(rule.to_string(), message.into());
    }

    /// Merges `other` into `self`; messages in `other` win on key collisions.
    pub fn merge(&mut self, other: ErrorSet) {
        for (field, rules) in other.0 {
            self.0.entry(field).or_default().extend(rules);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: &str, rule: &str) -> bool {
        self.0
            .get(field)
            .is_some_and(|rules| rules.contains_key(rule))
    }

    pub fn get(&self, field: &str) -> Option<&BTreeMap<String, String>> {
        self.0.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.0.iter().flat_map(|(field, rules)| {
            rules
                .iter()
                .map(move |(rule, message)| (field.as_str(), rule.as_str(), message.as_str()))
        })
    }
}

impl fmt::Display for ErrorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, rule, message) in self.iter() {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{field}.{rule}: {message}")?;
            first = false;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Validation failed: {0}")]
    ValidationFailed(ErrorSet),
    #[error("No enabled gateway is installed for this request")]
    GatewayNotFound,
    #[error("Payment account not found")]
    AccountNotFound,
    #[error("Transaction not found")]
    TransactionNotFound,
    #[error("Contact not found")]
    ContactNotFound,
    #[error("Client not found")]
    ClientNotFound,
    #[error("Gateway error: {0}")]
    GatewayError(ErrorSet),
    #[error("Unexpected transaction status: expected {expected}, got {actual}")]
    UnexpectedStatus {
        expected: TransactionStatus,
        actual: TransactionStatus,
    },
    #[error("Ledger error: {0}")]
    LedgerError(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PaymentError {
    fn from(err: rocksdb::Error) -> Self {
        PaymentError::LedgerError(err.to_string())
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        PaymentError::LedgerError(format!("Serialization error: {err}"))
    }
}

impl PaymentError {
    /// Field-keyed view of this error.
    pub fn errors(&self) -> ErrorSet {
        match self {
            PaymentError::ValidationFailed(errors) | PaymentError::GatewayError(errors) => {
                errors.clone()
            }
            PaymentError::GatewayNotFound => ErrorSet::single("gateway_id", "exists", self.to_string()),
            PaymentError::AccountNotFound => ErrorSet::single("account_id", "exists", self.to_string()),
            PaymentError::TransactionNotFound => {
                ErrorSet::single("transaction_id", "exists", self.to_string())
            }
            PaymentError::ContactNotFound => ErrorSet::single("contact_id", "exists", self.to_string()),
            PaymentError::ClientNotFound => ErrorSet::single("client_id", "exists", self.to_string()),
            PaymentError::UnexpectedStatus { .. } => {
                ErrorSet::single("status", "unexpected", self.to_string())
            }
            PaymentError::LedgerError(_) => ErrorSet::single("transaction", "ledger", self.to_string()),
            PaymentError::CsvError(_) | PaymentError::IoError(_) => {
                ErrorSet::single("input", "read", self.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;
