use super::gateway::GatewayResponse;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest message the ledger keeps for a transaction.
pub const MAX_MESSAGE_LEN: usize = 255;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    Cc,
    Ach,
    Other,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Cc => "cc",
            PaymentType::Ach => "ach",
            PaymentType::Other => "other",
        }
    }
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cc" => Ok(PaymentType::Cc),
            "ach" => Ok(PaymentType::Ach),
            "other" => Ok(PaymentType::Other),
            other => Err(format!("unknown payment type '{other}'")),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Approved,
    Declined,
    Void,
    Pending,
    Reconciled,
    Refunded,
    Returned,
    Error,
    InReview,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Approved => "approved",
            TransactionStatus::Declined => "declined",
            TransactionStatus::Void => "void",
            TransactionStatus::Pending => "pending",
            TransactionStatus::Reconciled => "reconciled",
            TransactionStatus::Refunded => "refunded",
            TransactionStatus::Returned => "returned",
            TransactionStatus::Error => "error",
            TransactionStatus::InReview => "in_review",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approved" => Ok(TransactionStatus::Approved),
            "declined" => Ok(TransactionStatus::Declined),
            "void" => Ok(TransactionStatus::Void),
            "pending" => Ok(TransactionStatus::Pending),
            "reconciled" => Ok(TransactionStatus::Reconciled),
            "refunded" => Ok(TransactionStatus::Refunded),
            "returned" => Ok(TransactionStatus::Returned),
            "error" => Ok(TransactionStatus::Error),
            "in_review" => Ok(TransactionStatus::InReview),
            other => Err(format!("unknown transaction status '{other}'")),
        }
    }
}

/// An amount allocated from a transaction to one invoice.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
pub struct InvoiceAmount {
    pub invoice_id: u32,
    pub amount: Decimal,
}

/// A persisted invoice allocation.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
pub struct InvoiceApplication {
    pub transaction_id: u64,
    pub invoice_id: u32,
    pub amount: Decimal,
}

/// Sum of the allocated amounts.
pub fn total_applied(amounts: &[InvoiceAmount]) -> Decimal {
    amounts.iter().map(|a| a.amount).sum()
}

/// Keeps allocations in order until `limit` is reached, shrinking the last one that fits
/// partially and dropping the rest.
pub fn fit_to_amount(amounts: &[InvoiceAmount], limit: Decimal) -> Vec<InvoiceAmount> {
    let mut remaining = limit.max(Decimal::ZERO);
    let mut fitted = Vec::with_capacity(amounts.len());
    for allocation in amounts {
        if remaining <= Decimal::ZERO {
            break;
        }
        if allocation.amount <= Decimal::ZERO {
            continue;
        }
        let amount = allocation.amount.min(remaining);
        remaining -= amount;
        fitted.push(InvoiceAmount {
            invoice_id: allocation.invoice_id,
            amount,
        });
    }
    fitted
}

/// A ledger row.
///
/// `transaction_id` and `parent_transaction_id` are remote processor references; the
/// parent link is a weak lookup key, not an ownership relation.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Transaction {
    pub id: u64,
    pub client_id: u32,
    pub account_id: Option<u32>,
    pub amount: Decimal,
    pub currency: String,
    pub r#type: PaymentType,
    pub gateway_id: Option<u32>,
    pub transaction_id: Option<String>,
    pub reference_id: Option<String>,
    pub parent_transaction_id: Option<String>,
    pub message: Option<String>,
    pub status: TransactionStatus,
    pub date_added: DateTime<Utc>,
}

/// Fields for inserting a new ledger row.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct NewTransaction {
    pub client_id: u32,
    pub account_id: Option<u32>,
    pub amount: Decimal,
    pub currency: String,
    pub r#type: PaymentType,
    pub gateway_id: Option<u32>,
    pub transaction_id: Option<String>,
    pub reference_id: Option<String>,
    pub parent_transaction_id: Option<String>,
    pub message: Option<String>,
    pub status: TransactionStatus,
}

impl NewTransaction {
    pub fn into_transaction(self, id: u64, date_added: DateTime<Utc>) -> Transaction {
        Transaction {
            id,
            client_id: self.client_id,
            account_id: self.account_id,
            amount: self.amount,
            currency: self.currency,
            r#type: self.r#type,
            gateway_id: self.gateway_id,
            transaction_id: self.transaction_id,
            reference_id: self.reference_id,
            parent_transaction_id: self.parent_transaction_id,
            message: self.message.map(clip_message),
            status: self.status,
            date_added,
        }
    }

    /// The edit an insert turns into when its remote id is already recorded.
    pub fn to_update(&self) -> TransactionUpdate {
        TransactionUpdate {
            amount: Some(self.amount),
            r#type: Some(self.r#type),
            gateway_id: self.gateway_id,
            transaction_id: self.transaction_id.clone(),
            reference_id: self.reference_id.clone(),
            parent_transaction_id: self.parent_transaction_id.clone(),
            message: self.message.clone(),
            status: Some(self.status),
        }
    }
}

/// Fields an edit may change. `None` leaves the stored value untouched.
///
/// There is no `client_id` or `currency`: an edit can never move a transaction to
/// another client or change the currency it was recorded in.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct TransactionUpdate {
    pub amount: Option<Decimal>,
    pub r#type: Option<PaymentType>,
    pub gateway_id: Option<u32>,
    pub transaction_id: Option<String>,
    pub reference_id: Option<String>,
    pub parent_transaction_id: Option<String>,
    pub message: Option<String>,
    pub status: Option<TransactionStatus>,
}

impl TransactionUpdate {
    /// Carries over the remote identifiers, message and status of a gateway response.
    pub fn from_response(response: &GatewayResponse) -> Self {
        Self {
            amount: response.amount,
            r#type: None,
            gateway_id: None,
            transaction_id: response.transaction_id.clone(),
            reference_id: response.reference_id.clone(),
            parent_transaction_id: response.parent_transaction_id.clone(),
            message: response.message.clone(),
            status: Some(response.status),
        }
    }

    pub fn apply_to(self, tx: &mut Transaction) {
        if let Some(amount) = self.amount {
            tx.amount = amount;
        }
        if let Some(r#type) = self.r#type {
            tx.r#type = r#type;
        }
        if let Some(gateway_id) = self.gateway_id {
            tx.gateway_id = Some(gateway_id);
        }
        if let Some(transaction_id) = self.transaction_id {
            tx.transaction_id = Some(transaction_id);
        }
        if let Some(reference_id) = self.reference_id {
            tx.reference_id = Some(reference_id);
        }
        if let Some(parent) = self.parent_transaction_id {
            tx.parent_transaction_id = Some(parent);
        }
        if let Some(message) = self.message {
            tx.message = Some(clip_message(message));
        }
        if let Some(status) = self.status {
            tx.status = status;
        }
    }
}

/// Truncates a message to `MAX_MESSAGE_LEN` characters.
pub fn clip_message(message: String) -> String {
    match message.char_indices().nth(MAX_MESSAGE_LEN) {
        Some((cut, _)) => message[..cut].to_string(),
        None => message,
    }
}

/// How a refund relates to the transaction it refunds.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum RefundPlan {
    /// The whole amount came back: the original row becomes `refunded` in place.
    Full,
    /// Part of the amount came back: a new negative row is linked to the original.
    Partial { amount: Decimal },
    /// Only approved transactions can be refunded.
    Reject { actual: TransactionStatus },
}

impl RefundPlan {
    /// Classifies a refund of `amount` in `currency` against `parent`.
    ///
    /// `cast` rounds an amount to its currency's precision; both sides are rounded in
    /// their own currency before comparing.
    pub fn classify<F>(parent: &Transaction, amount: Decimal, currency: &str, cast: F) -> Self
    where
        F: Fn(Decimal, &str) -> Decimal,
    {
        if parent.status != TransactionStatus::Approved {
            return RefundPlan::Reject {
                actual: parent.status,
            };
        }

        let refunded = cast(amount.abs(), currency);
        if cast(parent.amount, &parent.currency) == refunded {
            RefundPlan::Full
        } else {
            RefundPlan::Partial { amount: -refunded }
        }
    }
}
