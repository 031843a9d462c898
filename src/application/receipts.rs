use super::engine::PaymentOrchestrator;
use crate::domain::account::Contact;
use crate::domain::context::Context;
use crate::domain::gateway::GatewayResponse;
use crate::domain::ports::EmailMessage;
use crate::domain::transaction::{PaymentType, Transaction, TransactionStatus};
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Email template for a merchant payment outcome, e.g. `payment_cc_approved`.
pub fn template_key(r#type: PaymentType, status: TransactionStatus) -> String {
    format!("payment_{}_{}", r#type, status)
}

pub const NONMERCHANT_APPROVED: &str = "payment_nonmerchant_approved";

/// What a receipt is about.
pub(crate) struct Receipt<'a> {
    pub template: String,
    pub transaction: &'a Transaction,
    pub response: &'a GatewayResponse,
    /// Amount to show, which may differ from the row (e.g. a partial refund).
    pub amount: Decimal,
    /// Contact the account belongs to; the client's primary contact otherwise.
    pub contact_id: Option<u32>,
    pub last4: Option<String>,
    pub account_type: Option<&'static str>,
    pub gateway_name: Option<&'a str>,
    pub staff_id: Option<u32>,
}

impl PaymentOrchestrator {
    /// Sends a receipt. Failures are logged and never undo the ledger write.
    pub(crate) async fn send_receipt(&self, ctx: &Context, receipt: Receipt<'_>) {
        let template = receipt.template.clone();
        let transaction_id = receipt.transaction.id;
        if let Err(err) = self.try_send_receipt(ctx, receipt).await {
            tracing::warn!(
                template = %template,
                transaction_id,
                error = %err,
                "payment receipt was not sent"
            );
        }
    }

    async fn try_send_receipt(&self, ctx: &Context, receipt: Receipt<'_>) -> Result<()> {
        let tx = receipt.transaction;
        let client = self
            .accounts
            .get_client(tx.client_id)
            .await?
            .ok_or(PaymentError::ClientNotFound)?;

        let contact = match receipt.contact_id {
            Some(contact_id) if contact_id != client.contact.id => self
                .accounts
                .get_contact(contact_id)
                .await?
                .filter(|c| c.client_id == client.id)
                .unwrap_or_else(|| client.contact.clone()),
            _ => client.contact.clone(),
        };

        let tags = self.receipt_tags(ctx, &receipt, &contact);
        let message = EmailMessage {
            template: receipt.template,
            company_id: ctx.company_id,
            language: client.language.clone(),
            to: contact.email.clone(),
            tags,
            to_client_id: Some(client.id),
            from_staff_id: receipt.staff_id,
        };
        self.emailer.send(message).await
    }

    fn receipt_tags(
        &self,
        ctx: &Context,
        receipt: &Receipt<'_>,
        contact: &Contact,
    ) -> BTreeMap<String, Value> {
        let tx = receipt.transaction;
        let response = receipt.response;
        let mut tags = BTreeMap::new();

        tags.insert(
            "contact".to_string(),
            json!({
                "first_name": contact.first_name,
                "last_name": contact.last_name,
                "email": contact.email,
            }),
        );
        tags.insert(
            "amount".to_string(),
            Value::String(self.currency.format(receipt.amount, &tx.currency)),
        );
        tags.insert(
            "response".to_string(),
            json!({
                "status": response.status.as_str(),
                "transaction_id": response.transaction_id,
                "reference_id": response.reference_id,
                "message": response.message,
            }),
        );
        tags.insert(
            "date_added".to_string(),
            Value::String(ctx.format_datetime(tx.date_added)),
        );
        if let Some(last4) = &receipt.last4 {
            tags.insert("last4".to_string(), Value::String(last4.clone()));
        }
        if let Some(account_type) = receipt.account_type {
            let key = match tx.r#type {
                PaymentType::Cc => "card_type",
                _ => "account_type",
            };
            tags.insert(key.to_string(), Value::String(account_type.to_string()));
        }
        if let Some(name) = receipt.gateway_name {
            tags.insert("gateway".to_string(), Value::String(name.to_string()));
        }
        tags
    }
}
