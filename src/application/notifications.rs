use super::binder::BoundGateway;
use super::dispatcher::PaymentResult;
use super::engine::PaymentOrchestrator;
use super::receipts::{NONMERCHANT_APPROVED, Receipt};
use crate::domain::context::Context;
use crate::domain::gateway::{CallbackParams, GatewayKind, GatewayRecord, GatewayResponse};
use crate::domain::transaction::{
    NewTransaction, PaymentType, RefundPlan, Transaction, TransactionStatus, TransactionUpdate,
    fit_to_amount, total_applied,
};
use crate::error::{ErrorSet, PaymentError, Result};
use rust_decimal::Decimal;

/// Where a reconciled notification ends up in the ledger.
enum Target {
    /// Edit this row.
    Edit(Transaction, TransactionUpdate),
    /// Insert a new row.
    Insert(NewTransaction),
}

impl PaymentOrchestrator {
    /// Validates a synchronous return from a non-merchant payment page.
    ///
    /// Nothing is persisted; the asynchronous notification records the payment.
    pub async fn process_received(
        &self,
        ctx: &Context,
        gateway_name: &str,
        get: &CallbackParams,
        post: &CallbackParams,
    ) -> Result<Option<GatewayResponse>> {
        let record = self.named_gateway(ctx, gateway_name).await?;
        let mut gateway = self.bind(&record, None, None)?;

        let Some(nonmerchant) = gateway.gateway().nonmerchant() else {
            tracing::debug!(gateway = %record.name, "gateway has no return handler");
            return Ok(None);
        };
        let outcome = nonmerchant.success(get, post).await;
        let response = gateway.settle(outcome);
        let errors = gateway.take_errors();
        match response {
            Some(response) => Ok(Some(response)),
            None if errors.is_empty() => Ok(None),
            None => Err(PaymentError::GatewayError(errors)),
        }
    }

    /// Reconciles an inbound gateway notification into the ledger.
    ///
    /// Returns `Ok(None)` when the gateway has nothing to reconcile: it takes no
    /// notifications, its hook returned nothing, or it is a merchant gateway reporting a
    /// transaction this ledger never recorded.
    pub async fn process_notification(
        &self,
        ctx: &Context,
        gateway_name: &str,
        get: &CallbackParams,
        post: &CallbackParams,
    ) -> Result<Option<PaymentResult>> {
        let record = self.named_gateway(ctx, gateway_name).await?;
        let mut gateway = self.bind(&record, None, None)?;

        let Some(hook) = gateway.gateway().notifications() else {
            tracing::debug!(gateway = %record.name, "gateway takes no notifications");
            return Ok(None);
        };
        let outcome = hook.validate(get, post).await;
        let response = gateway.settle(outcome);
        let gateway_errors = gateway.take_errors();
        let Some(response) = response else {
            if gateway_errors.is_empty() {
                return Ok(None);
            }
            tracing::warn!(
                gateway = %record.name,
                errors = %gateway_errors,
                "notification rejected by gateway"
            );
            return Err(PaymentError::GatewayError(gateway_errors));
        };

        let existing = match &response.transaction_id {
            Some(remote_id) => {
                self.ledger
                    .get_by_transaction_id(remote_id, None, Some(gateway.id()))
                    .await?
            }
            None => None,
        };
        let r#type = infer_type(&gateway, existing.as_ref());

        let parent = match &response.parent_transaction_id {
            Some(remote_id) => {
                self.ledger
                    .get_by_transaction_id(remote_id, response.client_id, Some(gateway.id()))
                    .await?
            }
            None => None,
        };

        let target = match parent {
            Some(parent) if response.status == TransactionStatus::Refunded => {
                self.reconcile_refund(&gateway, parent, existing, r#type, &response)
                    .await?
            }
            _ => match existing {
                Some(existing) => {
                    let update = self.notification_update(&gateway, &existing.currency, &response);
                    Target::Edit(existing, update)
                }
                None if gateway.kind() == GatewayKind::Nonmerchant => {
                    Target::Insert(self.notification_insert(&gateway, r#type, &response)?)
                }
                None => {
                    tracing::debug!(
                        gateway = %record.name,
                        transaction_id = response.transaction_id.as_deref().unwrap_or("-"),
                        "merchant notification for an unrecorded transaction; ignored"
                    );
                    return Ok(None);
                }
            },
        };

        let (transaction, was_approved) = match target {
            Target::Edit(current, update) => {
                let was_approved = current.status == TransactionStatus::Approved;
                if was_approved && update.status == Some(TransactionStatus::Approved) {
                    tracing::info!(
                        id = current.id,
                        gateway = %record.name,
                        "duplicate notification delivery"
                    );
                }
                let edited = self.ledger.edit(current.id, update, None).await?;
                (edited, was_approved)
            }
            Target::Insert(new) => {
                let id = self.ledger.add(new).await?;
                let inserted = self
                    .ledger
                    .get(id)
                    .await?
                    .ok_or(PaymentError::TransactionNotFound)?;
                (inserted, false)
            }
        };

        if transaction.status == TransactionStatus::Approved && !response.invoices.is_empty() {
            self.apply_notified_invoices(&transaction, &response).await?;
        }

        if transaction.status == TransactionStatus::Approved
            && !was_approved
            && transaction.r#type == PaymentType::Other
        {
            self.send_receipt(
                ctx,
                Receipt {
                    template: NONMERCHANT_APPROVED.to_string(),
                    transaction: &transaction,
                    response: &response,
                    amount: transaction.amount,
                    contact_id: None,
                    last4: None,
                    account_type: None,
                    gateway_name: Some(&record.name),
                    staff_id: None,
                },
            )
            .await;
        }

        Ok(Some(PaymentResult {
            transaction,
            gateway_errors,
        }))
    }

    async fn named_gateway(&self, ctx: &Context, name: &str) -> Result<GatewayRecord> {
        self.registry
            .resolve_named(ctx, name)
            .await?
            .ok_or(PaymentError::GatewayNotFound)
    }

    /// A refund notification against a recorded parent.
    async fn reconcile_refund(
        &self,
        gateway: &BoundGateway,
        parent: Transaction,
        existing: Option<Transaction>,
        r#type: PaymentType,
        response: &GatewayResponse,
    ) -> Result<Target> {
        let amount = response.amount.unwrap_or(parent.amount);
        let currency = response
            .currency
            .clone()
            .unwrap_or_else(|| parent.currency.clone());
        let plan = RefundPlan::classify(&parent, amount, &currency, |a, c| {
            self.currency.cast(a, c)
        });
        tracing::info!(
            parent_id = parent.id,
            gateway_id = gateway.id(),
            %amount,
            plan = ?plan,
            "refund notification classified"
        );

        match plan {
            RefundPlan::Reject { actual } => Err(PaymentError::UnexpectedStatus {
                expected: TransactionStatus::Approved,
                actual,
            }),
            RefundPlan::Full => {
                let update = TransactionUpdate {
                    amount: None,
                    transaction_id: None,
                    parent_transaction_id: None,
                    gateway_id: Some(gateway.id()),
                    ..TransactionUpdate::from_response(response)
                };
                Ok(Target::Edit(parent, update))
            }
            RefundPlan::Partial { amount } => {
                let transaction_id = response
                    .transaction_id
                    .clone()
                    .filter(|id| parent.transaction_id.as_ref() != Some(id));

                // A redelivery lands on the row the first delivery created. Rows without
                // their own remote id are matched by parent, amount and reference.
                let existing = existing.filter(|e| e.id != parent.id);
                let earlier = match (existing, &parent.transaction_id) {
                    (Some(existing), _) => Some(existing),
                    (None, Some(parent_remote)) if transaction_id.is_none() => self
                        .ledger
                        .get_linked(parent_remote, Some(gateway.id()))
                        .await?
                        .into_iter()
                        .find(|row| {
                            row.transaction_id.is_none()
                                && row.amount == amount
                                && row.reference_id == response.reference_id
                        }),
                    _ => None,
                };
                if let Some(earlier) = earlier {
                    tracing::info!(id = earlier.id, "partial refund already recorded");
                    let update = TransactionUpdate {
                        amount: Some(amount),
                        status: Some(TransactionStatus::Approved),
                        transaction_id: transaction_id.clone(),
                        parent_transaction_id: parent.transaction_id.clone(),
                        ..TransactionUpdate::from_response(response)
                    };
                    return Ok(Target::Edit(earlier, update));
                }
                Ok(Target::Insert(NewTransaction {
                    client_id: parent.client_id,
                    account_id: parent.account_id,
                    amount,
                    currency: parent.currency.clone(),
                    r#type: match r#type {
                        PaymentType::Other => parent.r#type,
                        known => known,
                    },
                    gateway_id: Some(gateway.id()),
                    transaction_id,
                    reference_id: response.reference_id.clone(),
                    parent_transaction_id: parent.transaction_id.clone(),
                    message: response.message.clone(),
                    status: TransactionStatus::Approved,
                }))
            }
        }
    }

    fn notification_update(
        &self,
        gateway: &BoundGateway,
        currency: &str,
        response: &GatewayResponse,
    ) -> TransactionUpdate {
        TransactionUpdate {
            amount: response.amount.map(|a| self.currency.cast(a, currency)),
            gateway_id: Some(gateway.id()),
            ..TransactionUpdate::from_response(response)
        }
    }

    fn notification_insert(
        &self,
        gateway: &BoundGateway,
        r#type: PaymentType,
        response: &GatewayResponse,
    ) -> Result<NewTransaction> {
        let mut errors = ErrorSet::new();
        if response.client_id.is_none() {
            errors.add("client_id", "exists", "The notification names no client");
        }
        if response.amount.is_none() {
            errors.add("amount", "exists", "The notification carries no amount");
        }
        if response.currency.is_none() {
            errors.add("currency", "exists", "The notification carries no currency");
        }
        let (Some(client_id), Some(amount), Some(currency)) =
            (response.client_id, response.amount, response.currency.clone())
        else {
            return Err(PaymentError::ValidationFailed(errors));
        };

        Ok(NewTransaction {
            client_id,
            account_id: None,
            amount: self.currency.cast(amount, &currency),
            currency,
            r#type,
            gateway_id: Some(gateway.id()),
            transaction_id: response.transaction_id.clone(),
            reference_id: response.reference_id.clone(),
            parent_transaction_id: response.parent_transaction_id.clone(),
            message: response.message.clone(),
            status: response.status,
        })
    }

    /// Applies the payload's allocations, trimmed to what is still unapplied.
    async fn apply_notified_invoices(
        &self,
        transaction: &Transaction,
        response: &GatewayResponse,
    ) -> Result<()> {
        let applied: Decimal = self
            .ledger
            .applications(transaction.id)
            .await?
            .iter()
            .map(|a| a.amount)
            .sum();
        let fitted = fit_to_amount(&response.invoices, transaction.amount - applied);
        if fitted.is_empty() {
            return Ok(());
        }
        if total_applied(&fitted) < total_applied(&response.invoices) {
            tracing::warn!(
                id = transaction.id,
                requested = %total_applied(&response.invoices),
                applied = %total_applied(&fitted),
                "notification allocations trimmed to the transaction amount"
            );
        }
        self.ledger.apply(transaction.id, &fitted).await
    }
}

/// Card-only gateways report cards, bank-only report banks. Gateways handling both reuse
/// the type the transaction was recorded with.
fn infer_type(gateway: &BoundGateway, prior: Option<&Transaction>) -> PaymentType {
    let capabilities = gateway.capabilities();
    match (capabilities.handles_cards(), capabilities.handles_banks()) {
        (true, false) => PaymentType::Cc,
        (false, true) => PaymentType::Ach,
        (true, true) => prior.map_or(PaymentType::Other, |tx| tx.r#type),
        (false, false) => PaymentType::Other,
    }
}
