#![allow(dead_code)]

use async_trait::async_trait;
use gateway_orchestrator::application::binder::GatewayCatalog;
use gateway_orchestrator::application::dispatcher::PaymentOptions;
use gateway_orchestrator::application::engine::PaymentOrchestrator;
use gateway_orchestrator::domain::account::{
    AccountHolder, AccountInfo, BankAccountType, BankDetails, CardDetails, Client, Contact,
    StoredPaymentAccount,
};
use gateway_orchestrator::domain::context::Context;
use gateway_orchestrator::domain::gateway::{
    CallbackParams, Capability, CapabilitySet, GatewayKind, GatewayOutcome, GatewayRecord,
    GatewayResponse, MerchantBank, MerchantBankStorage, MerchantBankVerification, MerchantCard,
    MerchantCardStorage, MerchantStoredBank, MerchantStoredCard, NotificationHook,
    PaymentGateway, RemoteTransaction, StorageResponse, StoredReferences,
};
use gateway_orchestrator::domain::ports::TransactionLedger;
use gateway_orchestrator::domain::transaction::{
    InvoiceAmount, NewTransaction, PaymentType, Transaction, TransactionStatus,
};
use gateway_orchestrator::error::ErrorSet;
use gateway_orchestrator::infrastructure::currency::IsoCurrencyFormatter;
use gateway_orchestrator::infrastructure::in_memory::{
    InMemoryAccountStore, InMemoryGatewayRegistry, InMemoryLedger, InMemoryOutbox,
};
use gateway_orchestrator::infrastructure::postback::{self, PostbackGateway};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub const COMPANY_ID: u32 = 1;
pub const CLIENT_ID: u32 = 5;
pub const CONTACT_ID: u32 = 50;
pub const MERCHANT_ID: u32 = 1;
pub const POSTBACK_ID: u32 = 2;
pub const MERCHANT_NAME: &str = "Scripted";

/// What the scripted gateway implements and answers.
#[derive(Clone)]
pub struct Script {
    pub capabilities: CapabilitySet,
    /// Returned by every payment call.
    pub response: Option<GatewayResponse>,
    /// Reported alongside every call.
    pub errors: ErrorSet,
    pub storage: Option<StorageResponse>,
    pub requires_storage: bool,
    /// `Some` installs a notification hook returning this outcome.
    pub notification: Option<GatewayOutcome>,
}

impl Script {
    pub fn new(capabilities: &[Capability]) -> Self {
        Self {
            capabilities: CapabilitySet::of(capabilities),
            response: None,
            errors: ErrorSet::new(),
            storage: None,
            requires_storage: true,
            notification: None,
        }
    }

    /// Every card and bank capability, answering `approved` with remote id `TX1`.
    pub fn full() -> Self {
        Self::new(&Capability::ALL).responding(approved("TX1"))
    }

    pub fn responding(mut self, response: GatewayResponse) -> Self {
        self.response = Some(response);
        self
    }
}

pub fn approved(remote_id: &str) -> GatewayResponse {
    GatewayResponse::new(TransactionStatus::Approved).with_transaction_id(remote_id)
}

pub fn status(status: TransactionStatus, remote_id: &str) -> GatewayResponse {
    GatewayResponse::new(status).with_transaction_id(remote_id)
}

pub type SharedScript = Arc<Mutex<Script>>;
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub struct ScriptedGateway {
    script: SharedScript,
    calls: CallLog,
}

impl ScriptedGateway {
    fn script(&self) -> Script {
        self.script.lock().unwrap().clone()
    }

    fn record(&self, call: &str) -> GatewayOutcome {
        self.calls.lock().unwrap().push(call.to_string());
        let script = self.script();
        GatewayOutcome {
            response: script.response,
            errors: script.errors,
        }
    }

    fn record_storage(&self, call: &str) -> GatewayOutcome<StorageResponse> {
        self.calls.lock().unwrap().push(call.to_string());
        let script = self.script();
        GatewayOutcome {
            response: script.storage,
            errors: script.errors,
        }
    }

    fn has(&self, capability: Capability) -> bool {
        self.script().capabilities.contains(capability)
    }
}

#[async_trait]
impl MerchantCard for ScriptedGateway {
    async fn process_cc(&self, _: &CardDetails, _: Decimal, _: &[InvoiceAmount]) -> GatewayOutcome {
        self.record("process_cc")
    }
    async fn authorize_cc(
        &self,
        _: &CardDetails,
        _: Decimal,
        _: &[InvoiceAmount],
    ) -> GatewayOutcome {
        self.record("authorize_cc")
    }
    async fn capture_cc(
        &self,
        _: &RemoteTransaction,
        _: Decimal,
        _: &[InvoiceAmount],
    ) -> GatewayOutcome {
        self.record("capture_cc")
    }
    async fn refund_cc(&self, _: &RemoteTransaction, _: Decimal) -> GatewayOutcome {
        self.record("refund_cc")
    }
    async fn void_cc(&self, _: &RemoteTransaction) -> GatewayOutcome {
        self.record("void_cc")
    }
}

#[async_trait]
impl MerchantStoredCard for ScriptedGateway {
    async fn process_stored_cc(
        &self,
        _: &StoredReferences,
        _: Decimal,
        _: &[InvoiceAmount],
    ) -> GatewayOutcome {
        self.record("process_stored_cc")
    }
    async fn authorize_stored_cc(
        &self,
        _: &StoredReferences,
        _: Decimal,
        _: &[InvoiceAmount],
    ) -> GatewayOutcome {
        self.record("authorize_stored_cc")
    }
    async fn capture_stored_cc(
        &self,
        _: &StoredReferences,
        _: &RemoteTransaction,
        _: Decimal,
        _: &[InvoiceAmount],
    ) -> GatewayOutcome {
        self.record("capture_stored_cc")
    }
    async fn refund_stored_cc(
        &self,
        _: &StoredReferences,
        _: &RemoteTransaction,
        _: Decimal,
    ) -> GatewayOutcome {
        self.record("refund_stored_cc")
    }
    async fn void_stored_cc(&self, _: &StoredReferences, _: &RemoteTransaction) -> GatewayOutcome {
        self.record("void_stored_cc")
    }
}

#[async_trait]
impl MerchantCardStorage for ScriptedGateway {
    fn requires_cc_storage(&self) -> bool {
        self.script().requires_storage
    }
    async fn store_cc(&self, _: &CardDetails, _: &Contact) -> GatewayOutcome<StorageResponse> {
        self.record_storage("store_cc")
    }
    async fn update_cc(
        &self,
        _: &CardDetails,
        _: &Contact,
        _: &StoredReferences,
    ) -> GatewayOutcome<StorageResponse> {
        self.record_storage("update_cc")
    }
    async fn remove_cc(&self, _: &StoredReferences) -> GatewayOutcome<StorageResponse> {
        self.record_storage("remove_cc")
    }
}

#[async_trait]
impl MerchantBank for ScriptedGateway {
    async fn process_ach(&self, _: &BankDetails, _: Decimal, _: &[InvoiceAmount]) -> GatewayOutcome {
        self.record("process_ach")
    }
    async fn refund_ach(&self, _: &RemoteTransaction, _: Decimal) -> GatewayOutcome {
        self.record("refund_ach")
    }
    async fn void_ach(&self, _: &RemoteTransaction) -> GatewayOutcome {
        self.record("void_ach")
    }
}

#[async_trait]
impl MerchantStoredBank for ScriptedGateway {
    async fn process_stored_ach(
        &self,
        _: &StoredReferences,
        _: Decimal,
        _: &[InvoiceAmount],
    ) -> GatewayOutcome {
        self.record("process_stored_ach")
    }
    async fn refund_stored_ach(
        &self,
        _: &StoredReferences,
        _: &RemoteTransaction,
        _: Decimal,
    ) -> GatewayOutcome {
        self.record("refund_stored_ach")
    }
    async fn void_stored_ach(&self, _: &StoredReferences, _: &RemoteTransaction) -> GatewayOutcome {
        self.record("void_stored_ach")
    }
}

#[async_trait]
impl MerchantBankStorage for ScriptedGateway {
    fn requires_ach_storage(&self) -> bool {
        self.script().requires_storage
    }
    async fn store_ach(&self, _: &BankDetails, _: &Contact) -> GatewayOutcome<StorageResponse> {
        self.record_storage("store_ach")
    }
    async fn update_ach(
        &self,
        _: &BankDetails,
        _: &Contact,
        _: &StoredReferences,
    ) -> GatewayOutcome<StorageResponse> {
        self.record_storage("update_ach")
    }
    async fn remove_ach(&self, _: &StoredReferences) -> GatewayOutcome<StorageResponse> {
        self.record_storage("remove_ach")
    }
}

#[async_trait]
impl MerchantBankVerification for ScriptedGateway {
    async fn verify_ach(&self, _: &[Decimal], _: &StoredReferences) -> GatewayOutcome<StorageResponse> {
        self.record_storage("verify_ach")
    }
}

#[async_trait]
impl NotificationHook for ScriptedGateway {
    async fn validate(&self, _: &CallbackParams, _: &CallbackParams) -> GatewayOutcome {
        self.calls.lock().unwrap().push("validate".to_string());
        self.script().notification.unwrap_or_else(GatewayOutcome::nothing)
    }
}

impl PaymentGateway for ScriptedGateway {
    fn card(&self) -> Option<&dyn MerchantCard> {
        self.has(Capability::ChargeCard).then_some(self as &dyn MerchantCard)
    }
    fn stored_card(&self) -> Option<&dyn MerchantStoredCard> {
        self.has(Capability::ChargeStoredCard)
            .then_some(self as &dyn MerchantStoredCard)
    }
    fn card_storage(&self) -> Option<&dyn MerchantCardStorage> {
        self.has(Capability::OffsiteCardStorage)
            .then_some(self as &dyn MerchantCardStorage)
    }
    fn bank(&self) -> Option<&dyn MerchantBank> {
        self.has(Capability::ChargeBank).then_some(self as &dyn MerchantBank)
    }
    fn stored_bank(&self) -> Option<&dyn MerchantStoredBank> {
        self.has(Capability::ChargeStoredBank)
            .then_some(self as &dyn MerchantStoredBank)
    }
    fn bank_storage(&self) -> Option<&dyn MerchantBankStorage> {
        self.has(Capability::OffsiteBankStorage)
            .then_some(self as &dyn MerchantBankStorage)
    }
    fn bank_verification(&self) -> Option<&dyn MerchantBankVerification> {
        self.has(Capability::AchVerification)
            .then_some(self as &dyn MerchantBankVerification)
    }
    fn notifications(&self) -> Option<&dyn NotificationHook> {
        self.script()
            .notification
            .is_some()
            .then_some(self as &dyn NotificationHook)
    }
    fn custom_forms(&self) -> CapabilitySet {
        self.script().capabilities
    }
}

/// An orchestrator wired to in-memory collaborators, a scripted merchant gateway and the
/// postback non-merchant gateway.
pub struct Harness {
    pub orchestrator: PaymentOrchestrator,
    pub ctx: Context,
    pub ledger: InMemoryLedger,
    pub accounts: InMemoryAccountStore,
    pub outbox: InMemoryOutbox,
    pub registry: InMemoryGatewayRegistry,
    pub script: SharedScript,
    pub calls: CallLog,
}

impl Harness {
    pub async fn new(script: Script) -> Self {
        Self::with_outbox(script, InMemoryOutbox::new()).await
    }

    pub async fn with_outbox(script: Script, outbox: InMemoryOutbox) -> Self {
        let ledger = InMemoryLedger::new();
        let accounts = InMemoryAccountStore::new();
        let registry = InMemoryGatewayRegistry::new();
        let script: SharedScript = Arc::new(Mutex::new(script));
        let calls: CallLog = Arc::default();

        registry
            .install(record(MERCHANT_ID, "scripted", MERCHANT_NAME, GatewayKind::Merchant))
            .await;
        registry
            .install(record(POSTBACK_ID, postback::CLASS, "postback", GatewayKind::Nonmerchant))
            .await;
        accounts.add_client(client()).await;

        let catalog = {
            let script = script.clone();
            let calls = calls.clone();
            GatewayCatalog::new()
                .with("scripted", move |_| {
                    Box::new(ScriptedGateway {
                        script: script.clone(),
                        calls: calls.clone(),
                    })
                })
                .with(postback::CLASS, |setup| Box::new(PostbackGateway::new(setup)))
        };

        let orchestrator = PaymentOrchestrator::new(
            Box::new(registry.clone()),
            catalog,
            Box::new(ledger.clone()),
            Box::new(accounts.clone()),
            Box::new(outbox.clone()),
            Box::new(IsoCurrencyFormatter),
        );

        Self {
            orchestrator,
            ctx: Context::new(COMPANY_ID),
            ledger,
            accounts,
            outbox,
            registry,
            script,
            calls,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn respond_with(&self, response: Option<GatewayResponse>) {
        self.script.lock().unwrap().response = response;
    }

    pub fn report_errors(&self, errors: ErrorSet) {
        self.script.lock().unwrap().errors = errors;
    }

    pub fn notify_with(&self, outcome: GatewayOutcome) {
        self.script.lock().unwrap().notification = Some(outcome);
    }

    pub async fn seed(&self, tx: NewTransaction) -> Transaction {
        let id = self.ledger.add(tx).await.unwrap();
        self.ledger.get(id).await.unwrap().unwrap()
    }

    pub async fn rows(&self) -> Vec<Transaction> {
        self.ledger.get_all().await.unwrap()
    }

    pub async fn templates(&self) -> Vec<String> {
        self.outbox
            .sent()
            .await
            .into_iter()
            .map(|m| m.template)
            .collect()
    }
}

pub fn record(id: u32, class: &str, name: &str, kind: GatewayKind) -> GatewayRecord {
    GatewayRecord {
        id,
        company_id: COMPANY_ID,
        class: class.to_string(),
        name: name.to_string(),
        kind,
        currencies: vec!["USD".to_string()],
        enabled: true,
        meta: BTreeMap::new(),
    }
}

pub fn client() -> Client {
    Client {
        id: CLIENT_ID,
        company_id: COMPANY_ID,
        default_currency: "USD".to_string(),
        language: "en_us".to_string(),
        contact: Contact {
            id: CONTACT_ID,
            client_id: CLIENT_ID,
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
        },
    }
}

pub fn holder() -> AccountHolder {
    AccountHolder {
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        ..Default::default()
    }
}

pub fn visa() -> AccountInfo {
    AccountInfo::Card(CardDetails::new(holder(), "4111 1111 1111 1111", "203012"))
}

pub fn checking() -> AccountInfo {
    AccountInfo::Bank(BankDetails {
        holder: holder(),
        account_number: "000123456789".to_string(),
        routing_number: "110000000".to_string(),
        account_type: BankAccountType::Checking,
    })
}

/// A saved card; `gateway_id` makes it an offsite account.
pub fn saved_card(id: u32, client_id: u32, gateway_id: Option<u32>) -> StoredPaymentAccount {
    StoredPaymentAccount {
        id,
        client_id,
        contact_id: CONTACT_ID,
        gateway_id,
        reference_id: gateway_id.map(|_| "acct-ref".to_string()),
        client_reference_id: gateway_id.map(|_| "client-ref".to_string()),
        last4: "1111".to_string(),
        details: Some(visa()),
    }
}

pub fn options() -> PaymentOptions {
    PaymentOptions::default()
}

pub fn invoices(pairs: &[(u32, Decimal)]) -> Vec<InvoiceAmount> {
    pairs
        .iter()
        .map(|&(invoice_id, amount)| InvoiceAmount { invoice_id, amount })
        .collect()
}

/// An approved merchant card transaction for the fixture client.
pub fn approved_charge(amount: Decimal, remote_id: &str) -> NewTransaction {
    NewTransaction {
        client_id: CLIENT_ID,
        account_id: None,
        amount,
        currency: "USD".to_string(),
        r#type: PaymentType::Cc,
        gateway_id: Some(MERCHANT_ID),
        transaction_id: Some(remote_id.to_string()),
        reference_id: None,
        parent_transaction_id: None,
        message: None,
        status: TransactionStatus::Approved,
    }
}

pub fn params(pairs: &[(&str, &str)]) -> CallbackParams {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
