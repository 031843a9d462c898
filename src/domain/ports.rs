use super::account::{Client, Contact, StoredPaymentAccount};
use super::context::Context;
use super::gateway::GatewayRecord;
use super::transaction::{
    InvoiceAmount, InvoiceApplication, NewTransaction, PaymentType, Transaction, TransactionUpdate,
};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

/// Installed gateways per company.
///
/// Resolution returns `Ok(None)` when nothing enabled matches; callers decide whether that
/// is a failure.
#[async_trait]
pub trait GatewayRegistry: Send + Sync {
    /// The active merchant gateway for the company and currency, optionally pinned to an id.
    async fn resolve_merchant(
        &self,
        ctx: &Context,
        currency: &str,
        gateway_id: Option<u32>,
    ) -> Result<Option<GatewayRecord>>;

    async fn resolve_nonmerchant(
        &self,
        ctx: &Context,
        currency: Option<&str>,
        gateway_id: Option<u32>,
        name: Option<&str>,
    ) -> Result<Option<GatewayRecord>>;

    async fn all_nonmerchant(&self, ctx: &Context, currency: &str) -> Result<Vec<GatewayRecord>>;

    /// Any enabled gateway of either kind installed under `name`.
    async fn resolve_named(&self, ctx: &Context, name: &str) -> Result<Option<GatewayRecord>>;
}

/// Durable store for transactions and their invoice allocations.
#[async_trait]
pub trait TransactionLedger: Send + Sync {
    async fn get(&self, id: u64) -> Result<Option<Transaction>>;

    /// Looks up a row by remote transaction id, optionally scoped to a client and gateway.
    async fn get_by_transaction_id(
        &self,
        remote_id: &str,
        client_id: Option<u32>,
        gateway_id: Option<u32>,
    ) -> Result<Option<Transaction>>;

    /// Rows recorded against the parent remote id on one gateway.
    async fn get_linked(
        &self,
        parent_transaction_id: &str,
        gateway_id: Option<u32>,
    ) -> Result<Vec<Transaction>>;

    /// Inserts a row and returns its id. A row whose `(gateway_id, transaction_id)` is
    /// already recorded is edited instead and keeps its id.
    async fn add(&self, tx: NewTransaction) -> Result<u64>;

    async fn edit(
        &self,
        id: u64,
        update: TransactionUpdate,
        staff_id: Option<u32>,
    ) -> Result<Transaction>;

    /// Allocates the transaction to invoices. Fails when the total applied would exceed
    /// the transaction amount.
    async fn apply(&self, id: u64, amounts: &[InvoiceAmount]) -> Result<()>;

    async fn applications(&self, id: u64) -> Result<Vec<InvoiceApplication>>;

    async fn get_all(&self) -> Result<Vec<Transaction>>;
}

/// Saved payment accounts and the client records around them.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_cc(
        &self,
        account_id: u32,
        passphrase: Option<&str>,
        staff_id: Option<u32>,
    ) -> Result<Option<StoredPaymentAccount>>;

    async fn get_ach(
        &self,
        account_id: u32,
        passphrase: Option<&str>,
        staff_id: Option<u32>,
    ) -> Result<Option<StoredPaymentAccount>>;

    async fn get_client(&self, client_id: u32) -> Result<Option<Client>>;

    async fn get_contact(&self, contact_id: u32) -> Result<Option<Contact>>;

    async fn record_autodebit_failure(
        &self,
        client_id: u32,
        r#type: PaymentType,
        account_id: Option<u32>,
    ) -> Result<()>;

    async fn reset_autodebit_failures(
        &self,
        client_id: u32,
        r#type: PaymentType,
        account_id: Option<u32>,
    ) -> Result<()>;
}

/// A templated email to send.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailMessage {
    pub template: String,
    pub company_id: u32,
    pub language: String,
    pub to: String,
    pub tags: BTreeMap<String, serde_json::Value>,
    pub to_client_id: Option<u32>,
    pub from_staff_id: Option<u32>,
}

#[async_trait]
pub trait Emailer: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<()>;
}

/// Currency rounding and display.
pub trait CurrencyFormatter: Send + Sync {
    /// Rounds to the currency's minor-unit precision.
    fn cast(&self, amount: Decimal, currency: &str) -> Decimal;

    fn format(&self, amount: Decimal, currency: &str) -> String;
}

pub type GatewayRegistryBox = Box<dyn GatewayRegistry>;
pub type TransactionLedgerBox = Box<dyn TransactionLedger>;
pub type AccountStoreBox = Box<dyn AccountStore>;
pub type EmailerBox = Box<dyn Emailer>;
pub type CurrencyFormatterBox = Box<dyn CurrencyFormatter>;
