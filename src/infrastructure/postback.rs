use crate::domain::gateway::{
    CallbackParams, GatewayOutcome, GatewayResponse, GatewaySetup, Nonmerchant, NotificationHook,
    PaymentGateway, RemoteTransaction,
};
use crate::domain::transaction::{InvoiceAmount, TransactionStatus};
use crate::error::ErrorSet;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Catalog class of the built-in postback gateway.
pub const CLASS: &str = "postback";

/// A non-merchant gateway whose processor posts transaction fields back verbatim.
///
/// Recognized fields: `transaction_id`, `parent_transaction_id`, `reference_id`,
/// `client_id`, `amount`, `currency`, `status`, `message` and `invoices`
/// (`invoice_id:amount` pairs separated by `;`). When the installation sets a `secret`,
/// callbacks must carry the same value.
pub struct PostbackGateway {
    setup: GatewaySetup,
}

impl PostbackGateway {
    pub fn new(setup: GatewaySetup) -> Self {
        Self { setup }
    }

    fn parse(&self, get: &CallbackParams, post: &CallbackParams) -> GatewayOutcome {
        let field = |key: &str| {
            post.get(key)
                .or_else(|| get.get(key))
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };
        let mut errors = ErrorSet::new();

        let secret = self.setup.config.get("secret");
        if secret.is_some() && field("secret") != secret {
            errors.add("secret", "matches", "Callback secret does not match");
            return GatewayOutcome::failed(errors);
        }

        let status = match field("status").map(TransactionStatus::from_str) {
            Some(Ok(status)) => status,
            Some(Err(err)) => {
                errors.add("status", "valid", err);
                return GatewayOutcome::failed(errors);
            }
            None => {
                errors.add("status", "exists", "Callback carries no status");
                return GatewayOutcome::failed(errors);
            }
        };

        let mut response = GatewayResponse::new(status);
        response.transaction_id = field("transaction_id").map(str::to_string);
        response.parent_transaction_id = field("parent_transaction_id").map(str::to_string);
        response.reference_id = field("reference_id").map(str::to_string);
        response.message = field("message").map(str::to_string);
        response.currency = field("currency")
            .map(str::to_ascii_uppercase)
            .or_else(|| self.setup.currency.clone())
            .or_else(|| self.setup.config.get("currency").map(str::to_ascii_uppercase));

        match field("client_id").map(u32::from_str) {
            Some(Ok(client_id)) => response.client_id = Some(client_id),
            Some(Err(_)) => errors.add("client_id", "valid", "Client id is not a number"),
            None => {}
        }
        match field("amount").map(Decimal::from_str) {
            Some(Ok(amount)) => response.amount = Some(amount),
            Some(Err(_)) => errors.add("amount", "valid", "Amount is not a decimal"),
            None => {}
        }
        if let Some(raw) = field("invoices") {
            match parse_invoices(raw) {
                Some(invoices) => response.invoices = invoices,
                None => errors.add("invoices", "valid", "Invoices must be id:amount pairs"),
            }
        }

        // Malformed optional fields are reported but the callback still reconciles.
        GatewayOutcome::ok(response).with_errors(errors)
    }
}

fn parse_invoices(raw: &str) -> Option<Vec<InvoiceAmount>> {
    raw.split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (id, amount) = pair.split_once(':')?;
            Some(InvoiceAmount {
                invoice_id: id.trim().parse().ok()?,
                amount: amount.trim().parse().ok()?,
            })
        })
        .collect()
}

#[async_trait]
impl Nonmerchant for PostbackGateway {
    async fn success(&self, get: &CallbackParams, post: &CallbackParams) -> GatewayOutcome {
        self.parse(get, post)
    }

    async fn refund(
        &self,
        remote: &RemoteTransaction,
        amount: Decimal,
        notes: Option<&str>,
    ) -> GatewayOutcome {
        let mut response = GatewayResponse::new(TransactionStatus::Refunded);
        response.transaction_id = remote.transaction_id.clone();
        response.reference_id = remote.reference_id.clone();
        response.amount = Some(amount);
        response.message = notes.map(str::to_string);
        GatewayOutcome::ok(response)
    }

    async fn void(&self, remote: &RemoteTransaction, notes: Option<&str>) -> GatewayOutcome {
        let mut response = GatewayResponse::new(TransactionStatus::Void);
        response.transaction_id = remote.transaction_id.clone();
        response.reference_id = remote.reference_id.clone();
        response.message = notes.map(str::to_string);
        GatewayOutcome::ok(response)
    }
}

#[async_trait]
impl NotificationHook for PostbackGateway {
    async fn validate(&self, get: &CallbackParams, post: &CallbackParams) -> GatewayOutcome {
        self.parse(get, post)
    }
}

impl PaymentGateway for PostbackGateway {
    fn nonmerchant(&self) -> Option<&dyn Nonmerchant> {
        Some(self)
    }

    fn notifications(&self) -> Option<&dyn NotificationHook> {
        Some(self)
    }
}
