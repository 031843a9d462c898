use super::account::{BankDetails, CardDetails, Contact};
use super::transaction::{InvoiceAmount, TransactionStatus};
use crate::error::ErrorSet;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    Merchant,
    Nonmerchant,
}

/// An operation family a gateway implementation may support.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Capability {
    ChargeCard,
    ChargeBank,
    ChargeStoredCard,
    ChargeStoredBank,
    OffsiteCardStorage,
    OffsiteBankStorage,
    CustomCcForm,
    CustomAchForm,
    AchVerification,
}

impl Capability {
    pub const ALL: [Capability; 9] = [
        Capability::ChargeCard,
        Capability::ChargeBank,
        Capability::ChargeStoredCard,
        Capability::ChargeStoredBank,
        Capability::OffsiteCardStorage,
        Capability::OffsiteBankStorage,
        Capability::CustomCcForm,
        Capability::CustomAchForm,
        Capability::AchVerification,
    ];

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// A set of capabilities stored as a bitset.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CapabilitySet(u16);

impl CapabilitySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn of(capabilities: &[Capability]) -> Self {
        capabilities.iter().copied().collect()
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0 |= capability.bit();
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn union(self, other: CapabilitySet) -> Self {
        Self(self.0 | other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// True when any card charge or storage capability is present.
    pub fn handles_cards(&self) -> bool {
        self.contains(Capability::ChargeCard)
            || self.contains(Capability::ChargeStoredCard)
            || self.contains(Capability::OffsiteCardStorage)
    }

    /// True when any bank charge or storage capability is present.
    pub fn handles_banks(&self) -> bool {
        self.contains(Capability::ChargeBank)
            || self.contains(Capability::ChargeStoredBank)
            || self.contains(Capability::OffsiteBankStorage)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.contains(*c))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut set = CapabilitySet::empty();
        for capability in iter {
            set.insert(capability);
        }
        set
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|c| format!("{c:?}")).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// An installed gateway as stored by the registry.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct GatewayRecord {
    pub id: u32,
    pub company_id: u32,
    /// Implementation class, used to find the constructor in the catalog.
    pub class: String,
    pub name: String,
    pub kind: GatewayKind,
    /// Currencies this installation accepts; empty means any.
    pub currencies: Vec<String>,
    pub enabled: bool,
    pub meta: BTreeMap<String, String>,
}

impl GatewayRecord {
    pub fn accepts(&self, currency: &str) -> bool {
        self.currencies.is_empty()
            || self
                .currencies
                .iter()
                .any(|c| c.eq_ignore_ascii_case(currency))
    }
}

/// Typed view over a gateway's flat key/value meta.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayConfig {
    values: BTreeMap<String, String>,
}

impl GatewayConfig {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Reads `"true"`, `"1"`, `"yes"` and `"on"` as set.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            )
        })
    }

    pub fn parse<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// Deserializes the whole map into a gateway-specific settings struct.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let object: serde_json::Map<String, serde_json::Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        serde_json::from_value(serde_json::Value::Object(object))
    }
}

/// What a gateway implementation is constructed with.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySetup {
    pub gateway_id: u32,
    pub config: GatewayConfig,
    /// Unknown while a notification payload has not been parsed yet.
    pub currency: Option<String>,
    /// Staff member acting on the request, for the gateway's own audit log.
    pub staff_id: Option<u32>,
}

/// The result a capability call returns.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct GatewayResponse {
    pub status: TransactionStatus,
    pub transaction_id: Option<String>,
    pub reference_id: Option<String>,
    pub parent_transaction_id: Option<String>,
    pub message: Option<String>,
    pub client_id: Option<u32>,
    pub currency: Option<String>,
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub invoices: Vec<InvoiceAmount>,
}

impl GatewayResponse {
    pub fn new(status: TransactionStatus) -> Self {
        Self {
            status,
            transaction_id: None,
            reference_id: None,
            parent_transaction_id: None,
            message: None,
            client_id: None,
            currency: None,
            amount: None,
            invoices: Vec::new(),
        }
    }

    pub fn with_transaction_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    pub fn with_reference_id(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// References a gateway hands back after storing payment data on its side.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct StorageResponse {
    pub client_reference_id: Option<String>,
    pub reference_id: Option<String>,
    /// Capability-specific extras (e.g. `last4`, `expiration`).
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// Response data plus whatever errors the gateway raised producing it.
///
/// A response and errors can coexist: a gateway may report a soft error alongside a
/// transaction that still has to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayOutcome<T = GatewayResponse> {
    pub response: Option<T>,
    pub errors: ErrorSet,
}

impl<T> GatewayOutcome<T> {
    pub fn ok(response: T) -> Self {
        Self {
            response: Some(response),
            errors: ErrorSet::new(),
        }
    }

    pub fn failed(errors: ErrorSet) -> Self {
        Self {
            response: None,
            errors,
        }
    }

    /// Nothing to report and nothing failed.
    pub fn nothing() -> Self {
        Self {
            response: None,
            errors: ErrorSet::new(),
        }
    }

    pub fn with_errors(mut self, errors: ErrorSet) -> Self {
        self.errors.merge(errors);
        self
    }
}

/// Stored-account tokens used for offsite dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredReferences {
    pub client_reference_id: Option<String>,
    pub account_reference_id: Option<String>,
}

/// Remote identifiers of a transaction being captured, refunded or voided.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTransaction {
    pub reference_id: Option<String>,
    pub transaction_id: Option<String>,
}

/// Request/query values of an inbound callback.
pub type CallbackParams = BTreeMap<String, String>;

#[async_trait]
pub trait MerchantCard: Send + Sync {
    async fn process_cc(
        &self,
        card: &CardDetails,
        amount: Decimal,
        invoices: &[InvoiceAmount],
    ) -> GatewayOutcome;
    async fn authorize_cc(
        &self,
        card: &CardDetails,
        amount: Decimal,
        invoices: &[InvoiceAmount],
    ) -> GatewayOutcome;
    async fn capture_cc(
        &self,
        remote: &RemoteTransaction,
        amount: Decimal,
        invoices: &[InvoiceAmount],
    ) -> GatewayOutcome;
    async fn refund_cc(&self, remote: &RemoteTransaction, amount: Decimal) -> GatewayOutcome;
    async fn void_cc(&self, remote: &RemoteTransaction) -> GatewayOutcome;
}

#[async_trait]
pub trait MerchantStoredCard: Send + Sync {
    async fn process_stored_cc(
        &self,
        stored: &StoredReferences,
        amount: Decimal,
        invoices: &[InvoiceAmount],
    ) -> GatewayOutcome;
    async fn authorize_stored_cc(
        &self,
        stored: &StoredReferences,
        amount: Decimal,
        invoices: &[InvoiceAmount],
    ) -> GatewayOutcome;
    async fn capture_stored_cc(
        &self,
        stored: &StoredReferences,
        remote: &RemoteTransaction,
        amount: Decimal,
        invoices: &[InvoiceAmount],
    ) -> GatewayOutcome;
    async fn refund_stored_cc(
        &self,
        stored: &StoredReferences,
        remote: &RemoteTransaction,
        amount: Decimal,
    ) -> GatewayOutcome;
    async fn void_stored_cc(
        &self,
        stored: &StoredReferences,
        remote: &RemoteTransaction,
    ) -> GatewayOutcome;
}

#[async_trait]
pub trait MerchantCardStorage: Send + Sync {
    /// Whether this installation wants card data held on the processor's side.
    fn requires_cc_storage(&self) -> bool {
        true
    }
    async fn store_cc(
        &self,
        card: &CardDetails,
        contact: &Contact,
    ) -> GatewayOutcome<StorageResponse>;
    async fn update_cc(
        &self,
        card: &CardDetails,
        contact: &Contact,
        stored: &StoredReferences,
    ) -> GatewayOutcome<StorageResponse>;
    async fn remove_cc(&self, stored: &StoredReferences) -> GatewayOutcome<StorageResponse>;
}

#[async_trait]
pub trait MerchantBank: Send + Sync {
    async fn process_ach(
        &self,
        bank: &BankDetails,
        amount: Decimal,
        invoices: &[InvoiceAmount],
    ) -> GatewayOutcome;
    async fn refund_ach(&self, remote: &RemoteTransaction, amount: Decimal) -> GatewayOutcome;
    async fn void_ach(&self, remote: &RemoteTransaction) -> GatewayOutcome;
}

#[async_trait]
pub trait MerchantStoredBank: Send + Sync {
    async fn process_stored_ach(
        &self,
        stored: &StoredReferences,
        amount: Decimal,
        invoices: &[InvoiceAmount],
    ) -> GatewayOutcome;
    async fn refund_stored_ach(
        &self,
        stored: &StoredReferences,
        remote: &RemoteTransaction,
        amount: Decimal,
    ) -> GatewayOutcome;
    async fn void_stored_ach(
        &self,
        stored: &StoredReferences,
        remote: &RemoteTransaction,
    ) -> GatewayOutcome;
}

#[async_trait]
pub trait MerchantBankStorage: Send + Sync {
    fn requires_ach_storage(&self) -> bool {
        true
    }
    async fn store_ach(
        &self,
        bank: &BankDetails,
        contact: &Contact,
    ) -> GatewayOutcome<StorageResponse>;
    async fn update_ach(
        &self,
        bank: &BankDetails,
        contact: &Contact,
        stored: &StoredReferences,
    ) -> GatewayOutcome<StorageResponse>;
    async fn remove_ach(&self, stored: &StoredReferences) -> GatewayOutcome<StorageResponse>;
}

#[async_trait]
pub trait MerchantBankVerification: Send + Sync {
    /// Confirms micro-deposit `amounts` against a stored bank account.
    async fn verify_ach(
        &self,
        amounts: &[Decimal],
        stored: &StoredReferences,
    ) -> GatewayOutcome<StorageResponse>;
}

/// Off-site gateways that redirect the payer and report back later.
#[async_trait]
pub trait Nonmerchant: Send + Sync {
    /// Validates a synchronous return from the processor's payment page.
    async fn success(&self, get: &CallbackParams, post: &CallbackParams) -> GatewayOutcome;
    async fn refund(
        &self,
        remote: &RemoteTransaction,
        amount: Decimal,
        notes: Option<&str>,
    ) -> GatewayOutcome;
    async fn void(&self, remote: &RemoteTransaction, notes: Option<&str>) -> GatewayOutcome;
}

/// Inbound asynchronous notifications (webhooks).
#[async_trait]
pub trait NotificationHook: Send + Sync {
    async fn validate(&self, get: &CallbackParams, post: &CallbackParams) -> GatewayOutcome;
}

/// A gateway implementation.
///
/// Each accessor returns the capability when it is implemented. The binder probes them
/// once and caches the result as a `CapabilitySet`.
pub trait PaymentGateway: Send + Sync {
    fn card(&self) -> Option<&dyn MerchantCard> {
        None
    }
    fn stored_card(&self) -> Option<&dyn MerchantStoredCard> {
        None
    }
    fn card_storage(&self) -> Option<&dyn MerchantCardStorage> {
        None
    }
    fn bank(&self) -> Option<&dyn MerchantBank> {
        None
    }
    fn stored_bank(&self) -> Option<&dyn MerchantStoredBank> {
        None
    }
    fn bank_storage(&self) -> Option<&dyn MerchantBankStorage> {
        None
    }
    fn bank_verification(&self) -> Option<&dyn MerchantBankVerification> {
        None
    }
    fn nonmerchant(&self) -> Option<&dyn Nonmerchant> {
        None
    }
    fn notifications(&self) -> Option<&dyn NotificationHook> {
        None
    }
    /// Payment forms the gateway renders itself.
    fn custom_forms(&self) -> CapabilitySet {
        CapabilitySet::empty()
    }
}
