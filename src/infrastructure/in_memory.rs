use crate::domain::account::{Client, Contact, StoredPaymentAccount};
use crate::domain::context::Context;
use crate::domain::gateway::{GatewayKind, GatewayRecord};
use crate::domain::ports::{AccountStore, EmailMessage, Emailer, GatewayRegistry, TransactionLedger};
use crate::domain::transaction::{
    InvoiceAmount, InvoiceApplication, NewTransaction, PaymentType, Transaction, TransactionUpdate,
    total_applied,
};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

type RemoteKey = (Option<u32>, String);

#[derive(Default)]
struct LedgerState {
    last_id: u64,
    transactions: BTreeMap<u64, Transaction>,
    /// `(gateway_id, transaction_id)` to row id; unique.
    remote_index: HashMap<RemoteKey, u64>,
    applications: Vec<InvoiceApplication>,
}

fn remote_key(tx: &Transaction) -> Option<RemoteKey> {
    tx.transaction_id.clone().map(|r| (tx.gateway_id, r))
}

impl LedgerState {
    fn edit(&mut self, id: u64, update: TransactionUpdate) -> Result<Transaction> {
        let current = self
            .transactions
            .get(&id)
            .ok_or(PaymentError::TransactionNotFound)?;
        let old_key = remote_key(current);
        let mut edited = current.clone();
        update.apply_to(&mut edited);
        let new_key = remote_key(&edited);

        if old_key != new_key {
            if let Some(key) = &new_key {
                if self.remote_index.get(key).is_some_and(|other| *other != id) {
                    return Err(PaymentError::LedgerError(format!(
                        "remote transaction '{}' is already recorded",
                        key.1
                    )));
                }
                self.remote_index.insert(key.clone(), id);
            }
            if let Some(key) = old_key {
                self.remote_index.remove(&key);
            }
        }
        self.transactions.insert(id, edited.clone());
        Ok(edited)
    }
}

/// A thread-safe in-memory transaction ledger.
///
/// `(gateway_id, transaction_id)` is unique: an insert that collides with a recorded
/// remote id edits that row instead.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionLedger for InMemoryLedger {
    async fn get(&self, id: u64) -> Result<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state.transactions.get(&id).cloned())
    }

    async fn get_by_transaction_id(
        &self,
        remote_id: &str,
        client_id: Option<u32>,
        gateway_id: Option<u32>,
    ) -> Result<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .values()
            .find(|tx| {
                tx.transaction_id.as_deref() == Some(remote_id)
                    && client_id.is_none_or(|c| tx.client_id == c)
                    && gateway_id.is_none_or(|g| tx.gateway_id == Some(g))
            })
            .cloned())
    }

    async fn get_linked(
        &self,
        parent_transaction_id: &str,
        gateway_id: Option<u32>,
    ) -> Result<Vec<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .values()
            .filter(|tx| {
                tx.parent_transaction_id.as_deref() == Some(parent_transaction_id)
                    && tx.gateway_id == gateway_id
            })
            .cloned()
            .collect())
    }

    async fn add(&self, tx: NewTransaction) -> Result<u64> {
        let mut state = self.state.write().await;

        let key = tx.transaction_id.clone().map(|r| (tx.gateway_id, r));
        if let Some(id) = key.as_ref().and_then(|k| state.remote_index.get(k)).copied() {
            tracing::info!(
                id,
                transaction_id = tx.transaction_id.as_deref().unwrap_or("-"),
                "remote transaction already recorded; updating the existing row"
            );
            state.edit(id, tx.to_update())?;
            return Ok(id);
        }

        state.last_id += 1;
        let id = state.last_id;
        if let Some(key) = key {
            state.remote_index.insert(key, id);
        }
        state
            .transactions
            .insert(id, tx.into_transaction(id, Utc::now()));
        tracing::debug!(id, "transaction recorded");
        Ok(id)
    }

    async fn edit(
        &self,
        id: u64,
        update: TransactionUpdate,
        staff_id: Option<u32>,
    ) -> Result<Transaction> {
        let mut state = self.state.write().await;
        let edited = state.edit(id, update)?;
        tracing::debug!(id, staff_id, status = %edited.status, "transaction edited");
        Ok(edited)
    }

    async fn apply(&self, id: u64, amounts: &[InvoiceAmount]) -> Result<()> {
        let mut state = self.state.write().await;
        let tx_amount = state
            .transactions
            .get(&id)
            .map(|tx| tx.amount)
            .ok_or(PaymentError::TransactionNotFound)?;

        let already: rust_decimal::Decimal = state
            .applications
            .iter()
            .filter(|a| a.transaction_id == id)
            .map(|a| a.amount)
            .sum();
        if already + total_applied(amounts) > tx_amount {
            return Err(PaymentError::LedgerError(format!(
                "applying {} to transaction {id} would exceed its amount {tx_amount}",
                total_applied(amounts)
            )));
        }

        state
            .applications
            .extend(amounts.iter().map(|a| InvoiceApplication {
                transaction_id: id,
                invoice_id: a.invoice_id,
                amount: a.amount,
            }));
        Ok(())
    }

    async fn applications(&self, id: u64) -> Result<Vec<InvoiceApplication>> {
        let state = self.state.read().await;
        Ok(state
            .applications
            .iter()
            .filter(|a| a.transaction_id == id)
            .copied()
            .collect())
    }

    async fn get_all(&self) -> Result<Vec<Transaction>> {
        let state = self.state.read().await;
        Ok(state.transactions.values().cloned().collect())
    }
}

type AutodebitKey = (u32, PaymentType, Option<u32>);

#[derive(Default)]
struct AccountState {
    cards: HashMap<u32, StoredPaymentAccount>,
    banks: HashMap<u32, StoredPaymentAccount>,
    clients: HashMap<u32, Client>,
    contacts: HashMap<u32, Contact>,
    autodebit_failures: HashMap<AutodebitKey, u32>,
}

/// In-memory saved accounts, clients and contacts.
///
/// With a passphrase set, locally stored account details are only returned to callers
/// that present it.
#[derive(Default, Clone)]
pub struct InMemoryAccountStore {
    state: Arc<RwLock<AccountState>>,
    passphrase: Option<String>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Adds a client and its primary contact.
    pub async fn add_client(&self, client: Client) {
        let mut state = self.state.write().await;
        state.contacts.insert(client.contact.id, client.contact.clone());
        state.clients.insert(client.id, client);
    }

    pub async fn add_contact(&self, contact: Contact) {
        self.state.write().await.contacts.insert(contact.id, contact);
    }

    pub async fn add_cc(&self, account: StoredPaymentAccount) {
        self.state.write().await.cards.insert(account.id, account);
    }

    pub async fn add_ach(&self, account: StoredPaymentAccount) {
        self.state.write().await.banks.insert(account.id, account);
    }

    pub async fn autodebit_failures(
        &self,
        client_id: u32,
        r#type: PaymentType,
        account_id: Option<u32>,
    ) -> u32 {
        let state = self.state.read().await;
        state
            .autodebit_failures
            .get(&(client_id, r#type, account_id))
            .copied()
            .unwrap_or(0)
    }

    fn unlock(&self, mut account: StoredPaymentAccount, passphrase: Option<&str>) -> StoredPaymentAccount {
        if self.passphrase.is_some() && self.passphrase.as_deref() != passphrase {
            account.details = None;
        }
        account
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn get_cc(
        &self,
        account_id: u32,
        passphrase: Option<&str>,
        _staff_id: Option<u32>,
    ) -> Result<Option<StoredPaymentAccount>> {
        let state = self.state.read().await;
        Ok(state
            .cards
            .get(&account_id)
            .cloned()
            .map(|a| self.unlock(a, passphrase)))
    }

    async fn get_ach(
        &self,
        account_id: u32,
        passphrase: Option<&str>,
        _staff_id: Option<u32>,
    ) -> Result<Option<StoredPaymentAccount>> {
        let state = self.state.read().await;
        Ok(state
            .banks
            .get(&account_id)
            .cloned()
            .map(|a| self.unlock(a, passphrase)))
    }

    async fn get_client(&self, client_id: u32) -> Result<Option<Client>> {
        Ok(self.state.read().await.clients.get(&client_id).cloned())
    }

    async fn get_contact(&self, contact_id: u32) -> Result<Option<Contact>> {
        Ok(self.state.read().await.contacts.get(&contact_id).cloned())
    }

    async fn record_autodebit_failure(
        &self,
        client_id: u32,
        r#type: PaymentType,
        account_id: Option<u32>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        *state
            .autodebit_failures
            .entry((client_id, r#type, account_id))
            .or_default() += 1;
        Ok(())
    }

    async fn reset_autodebit_failures(
        &self,
        client_id: u32,
        r#type: PaymentType,
        account_id: Option<u32>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .autodebit_failures
            .remove(&(client_id, r#type, account_id));
        Ok(())
    }
}

/// Installed gateways held in memory. The first matching installation wins.
#[derive(Default, Clone)]
pub struct InMemoryGatewayRegistry {
    records: Arc<RwLock<Vec<GatewayRecord>>>,
}

impl InMemoryGatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn install(&self, record: GatewayRecord) {
        self.records.write().await.push(record);
    }

    async fn find<F>(&self, ctx: &Context, matches: F) -> Vec<GatewayRecord>
    where
        F: Fn(&GatewayRecord) -> bool,
    {
        let records = self.records.read().await;
        records
            .iter()
            .filter(|r| r.company_id == ctx.company_id && r.enabled && matches(r))
            .cloned()
            .collect()
    }
}

fn named(record: &GatewayRecord, name: &str) -> bool {
    record.name.eq_ignore_ascii_case(name) || record.class.eq_ignore_ascii_case(name)
}

#[async_trait]
impl GatewayRegistry for InMemoryGatewayRegistry {
    async fn resolve_merchant(
        &self,
        ctx: &Context,
        currency: &str,
        gateway_id: Option<u32>,
    ) -> Result<Option<GatewayRecord>> {
        let found = self
            .find(ctx, |r| {
                r.kind == GatewayKind::Merchant
                    && r.accepts(currency)
                    && gateway_id.is_none_or(|id| r.id == id)
            })
            .await;
        Ok(found.into_iter().next())
    }

    async fn resolve_nonmerchant(
        &self,
        ctx: &Context,
        currency: Option<&str>,
        gateway_id: Option<u32>,
        name: Option<&str>,
    ) -> Result<Option<GatewayRecord>> {
        let found = self
            .find(ctx, |r| {
                r.kind == GatewayKind::Nonmerchant
                    && currency.is_none_or(|c| r.accepts(c))
                    && gateway_id.is_none_or(|id| r.id == id)
                    && name.is_none_or(|n| named(r, n))
            })
            .await;
        Ok(found.into_iter().next())
    }

    async fn all_nonmerchant(&self, ctx: &Context, currency: &str) -> Result<Vec<GatewayRecord>> {
        Ok(self
            .find(ctx, |r| r.kind == GatewayKind::Nonmerchant && r.accepts(currency))
            .await)
    }

    async fn resolve_named(&self, ctx: &Context, name: &str) -> Result<Option<GatewayRecord>> {
        Ok(self.find(ctx, |r| named(r, name)).await.into_iter().next())
    }
}

/// Records every email it is asked to send.
#[derive(Default, Clone)]
pub struct InMemoryOutbox {
    sent: Arc<RwLock<Vec<EmailMessage>>>,
    unavailable: bool,
}

impl InMemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// An outbox whose every send fails.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub async fn sent(&self) -> Vec<EmailMessage> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl Emailer for InMemoryOutbox {
    async fn send(&self, message: EmailMessage) -> Result<()> {
        if self.unavailable {
            return Err(PaymentError::IoError(std::io::Error::other(
                "mail transport unavailable",
            )));
        }
        tracing::info!(
            template = %message.template,
            to = %message.to,
            client_id = message.to_client_id,
            "email queued"
        );
        self.sent.write().await.push(message);
        Ok(())
    }
}
