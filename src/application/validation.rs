use super::binder::BoundGateway;
use crate::domain::gateway::{Capability, CapabilitySet};
use crate::domain::transaction::PaymentType;
use crate::error::ErrorSet;
use rust_decimal::Decimal;

/// Decides whether a gateway with `capabilities` can take a payment of the given type,
/// optionally requiring offsite storage.
pub type CapabilityPredicate = fn(CapabilitySet, PaymentType, bool) -> bool;

/// The predicate used for merchant dispatch and storage.
pub fn implements_merchant(
    capabilities: CapabilitySet,
    r#type: PaymentType,
    require_offsite: bool,
) -> bool {
    let needed = match (r#type, require_offsite) {
        (PaymentType::Cc, false) => Capability::ChargeCard,
        (PaymentType::Cc, true) => Capability::OffsiteCardStorage,
        (PaymentType::Ach, false) => Capability::ChargeBank,
        (PaymentType::Ach, true) => Capability::OffsiteBankStorage,
        (PaymentType::Other, _) => return false,
    };
    capabilities.contains(needed)
}

#[derive(Debug, Clone)]
pub enum Check {
    /// The value parses (case-insensitively) as one of these payment types.
    TypeIn(Vec<PaymentType>),
    /// When present, the amount is greater than zero.
    Positive,
    /// The payment type is one the gateway can handle.
    Implements {
        predicate: CapabilityPredicate,
        capabilities: CapabilitySet,
        require_offsite: bool,
    },
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub field: &'static str,
    pub key: &'static str,
    pub message: String,
    pub check: Check,
}

/// What the rules are evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct PaymentInput<'a> {
    pub r#type: &'a str,
    pub amount: Option<Decimal>,
}

impl Rule {
    fn passes(&self, input: &PaymentInput<'_>) -> bool {
        match &self.check {
            Check::TypeIn(allowed) => input
                .r#type
                .parse::<PaymentType>()
                .is_ok_and(|t| allowed.contains(&t)),
            Check::Positive => input.amount.is_none_or(|amount| amount > Decimal::ZERO),
            Check::Implements {
                predicate,
                capabilities,
                require_offsite,
            } => input
                .r#type
                .parse::<PaymentType>()
                .is_ok_and(|t| predicate(*capabilities, t, *require_offsite)),
        }
    }
}

/// Ordered validation rules. Evaluation stops at the first failure per field.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Rules for dispatching a payment of one of `allowed` types through `gateway`.
    ///
    /// Unless the only allowed type is `other`, the type must also pass `predicate`
    /// against the gateway's capabilities.
    pub fn build(
        gateway: &BoundGateway,
        allowed: &[PaymentType],
        require_offsite: bool,
        predicate: CapabilityPredicate,
    ) -> Self {
        let names: Vec<&str> = allowed.iter().map(PaymentType::as_str).collect();
        let mut rules = RuleSet::default();

        rules.push(Rule {
            field: "type",
            key: "valid",
            message: format!("Payment type must be one of: {}", names.join(", ")),
            check: Check::TypeIn(allowed.to_vec()),
        });
        rules.push(Rule {
            field: "amount",
            key: "positive",
            message: "Amount must be greater than zero".to_string(),
            check: Check::Positive,
        });
        if allowed != [PaymentType::Other] {
            rules.push(Rule {
                field: "type",
                key: "implemented",
                message: "The selected gateway does not support this payment type".to_string(),
                check: Check::Implements {
                    predicate,
                    capabilities: gateway.capabilities(),
                    require_offsite,
                },
            });
        }
        rules
    }

    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn validate(&self, input: &PaymentInput<'_>) -> Result<(), ErrorSet> {
        let mut errors = ErrorSet::new();
        for rule in &self.rules {
            if errors.get(rule.field).is_some() {
                continue;
            }
            if !rule.passes(input) {
                errors.add(rule.field, rule.key, rule.message.clone());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
