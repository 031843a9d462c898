use crate::domain::gateway::{
    Capability, CapabilitySet, GatewayConfig, GatewayKind, GatewayOutcome, GatewayRecord,
    GatewaySetup, PaymentGateway,
};
use crate::error::{ErrorSet, PaymentError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds a gateway implementation from its setup.
pub type GatewayConstructor = Arc<dyn Fn(GatewaySetup) -> Box<dyn PaymentGateway> + Send + Sync>;

/// Gateway implementations known to the application, keyed by class name.
#[derive(Default, Clone)]
pub struct GatewayCatalog {
    constructors: HashMap<String, GatewayConstructor>,
}

impl GatewayCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, class: &str, constructor: F)
    where
        F: Fn(GatewaySetup) -> Box<dyn PaymentGateway> + Send + Sync + 'static,
    {
        self.constructors
            .insert(class.to_ascii_lowercase(), Arc::new(constructor));
    }

    pub fn with<F>(mut self, class: &str, constructor: F) -> Self
    where
        F: Fn(GatewaySetup) -> Box<dyn PaymentGateway> + Send + Sync + 'static,
    {
        self.register(class, constructor);
        self
    }

    /// Instantiates the gateway for `record` and probes what it implements.
    ///
    /// `currency` is `None` for notifications, where it is only known once the gateway
    /// has parsed the payload.
    pub fn bind(
        &self,
        record: &GatewayRecord,
        currency: Option<&str>,
        staff_id: Option<u32>,
    ) -> Result<BoundGateway> {
        let constructor = self
            .constructors
            .get(&record.class.to_ascii_lowercase())
            .ok_or_else(|| {
                tracing::warn!(
                    gateway_id = record.id,
                    class = %record.class,
                    "gateway is installed but no implementation is registered for its class"
                );
                PaymentError::GatewayNotFound
            })?;

        let gateway = constructor(GatewaySetup {
            gateway_id: record.id,
            config: GatewayConfig::new(record.meta.clone()),
            currency: currency.map(str::to_string),
            staff_id,
        });

        let capabilities = probe(gateway.as_ref());
        let accepts_notifications = gateway.notifications().is_some();
        tracing::debug!(
            gateway_id = record.id,
            class = %record.class,
            %capabilities,
            accepts_notifications,
            "gateway bound"
        );

        Ok(BoundGateway {
            record: record.clone(),
            gateway,
            capabilities,
            accepts_notifications,
            currency: currency.map(str::to_string),
            errors: ErrorSet::new(),
        })
    }
}

fn probe(gateway: &dyn PaymentGateway) -> CapabilitySet {
    let forms = gateway.custom_forms();
    let mut set: CapabilitySet = [Capability::CustomCcForm, Capability::CustomAchForm]
        .into_iter()
        .filter(|c| forms.contains(*c))
        .collect();

    let probes = [
        (gateway.card().is_some(), Capability::ChargeCard),
        (gateway.stored_card().is_some(), Capability::ChargeStoredCard),
        (gateway.card_storage().is_some(), Capability::OffsiteCardStorage),
        (gateway.bank().is_some(), Capability::ChargeBank),
        (gateway.stored_bank().is_some(), Capability::ChargeStoredBank),
        (gateway.bank_storage().is_some(), Capability::OffsiteBankStorage),
        (gateway.bank_verification().is_some(), Capability::AchVerification),
    ];
    for (present, capability) in probes {
        if present {
            set.insert(capability);
        }
    }
    set
}

/// A gateway instantiated for one request.
///
/// Errors from capability calls accumulate here until the caller drains them with
/// `take_errors`.
pub struct BoundGateway {
    record: GatewayRecord,
    gateway: Box<dyn PaymentGateway>,
    capabilities: CapabilitySet,
    accepts_notifications: bool,
    currency: Option<String>,
    errors: ErrorSet,
}

impl BoundGateway {
    pub fn record(&self) -> &GatewayRecord {
        &self.record
    }

    pub fn id(&self) -> u32 {
        self.record.id
    }

    pub fn kind(&self) -> GatewayKind {
        self.record.kind
    }

    pub fn currency(&self) -> Option<&str> {
        self.currency.as_deref()
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    pub fn implements(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn accepts_notifications(&self) -> bool {
        self.accepts_notifications
    }

    pub fn gateway(&self) -> &dyn PaymentGateway {
        self.gateway.as_ref()
    }

    /// Records the outcome's errors and hands back its response.
    pub fn settle<T>(&mut self, outcome: GatewayOutcome<T>) -> Option<T> {
        self.errors.merge(outcome.errors);
        outcome.response
    }

    pub fn errors(&self) -> &ErrorSet {
        &self.errors
    }

    pub fn take_errors(&mut self) -> ErrorSet {
        std::mem::take(&mut self.errors)
    }
}

impl fmt::Debug for BoundGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundGateway")
            .field("record", &self.record)
            .field("capabilities", &self.capabilities)
            .field("accepts_notifications", &self.accepts_notifications)
            .field("currency", &self.currency)
            .finish_non_exhaustive()
    }
}
