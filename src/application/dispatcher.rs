use super::binder::BoundGateway;
use super::engine::PaymentOrchestrator;
use super::receipts::{Receipt, template_key};
use super::validation::{PaymentInput, RuleSet, implements_merchant};
use crate::domain::account::{AccountInfo, CardType, StoredPaymentAccount};
use crate::domain::context::Context;
use crate::domain::gateway::{
    Capability, GatewayKind, GatewayOutcome, GatewayResponse, RemoteTransaction, StoredReferences,
};
use crate::domain::transaction::{
    InvoiceAmount, NewTransaction, PaymentType, RefundPlan, Transaction, TransactionStatus,
    TransactionUpdate,
};
use crate::error::{ErrorSet, PaymentError, Result};
use rust_decimal::Decimal;
use std::fmt;

/// Per-call options shared by every payment operation.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentOptions {
    /// Invoices to apply an approved payment to.
    pub invoices: Vec<InvoiceAmount>,
    /// Staff member acting on the request, if any.
    pub staff_id: Option<u32>,
    pub email_receipt: bool,
    /// Unlocks locally stored account data.
    pub passphrase: Option<String>,
}

impl Default for PaymentOptions {
    fn default() -> Self {
        Self {
            invoices: Vec::new(),
            staff_id: None,
            email_receipt: true,
            passphrase: None,
        }
    }
}

/// A charge or authorization.
///
/// Funding comes from `account_info` or from the saved account `account_id`. A saved
/// account held offsite by its gateway always wins over raw data.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    pub client_id: u32,
    /// `cc` or `ach`, as given by the caller.
    pub r#type: String,
    pub amount: Decimal,
    pub currency: String,
    pub account_info: Option<AccountInfo>,
    pub account_id: Option<u32>,
    pub options: PaymentOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub client_id: u32,
    /// Ledger id of the authorized transaction.
    pub transaction_id: u64,
    /// Defaults to the authorized amount.
    pub amount: Option<Decimal>,
    pub options: PaymentOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundRequest {
    pub client_id: u32,
    pub transaction_id: u64,
    /// Defaults to the full transaction amount.
    pub amount: Option<Decimal>,
    pub notes: Option<String>,
    pub options: PaymentOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoidRequest {
    pub client_id: u32,
    pub transaction_id: u64,
    pub notes: Option<String>,
    pub options: PaymentOptions,
}

/// A recorded transaction plus soft errors the gateway reported alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentResult {
    pub transaction: Transaction,
    pub gateway_errors: ErrorSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Process,
    Authorize,
    Capture,
    Refund,
    Void,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Process => "process",
            Operation::Authorize => "authorize",
            Operation::Capture => "capture",
            Operation::Refund => "refund",
            Operation::Void => "void",
        })
    }
}

/// Where the money comes from for one call.
#[derive(Default)]
struct Funding {
    account: Option<StoredPaymentAccount>,
    info: Option<AccountInfo>,
}

impl Funding {
    /// Tokens for a stored dispatch; `None` means raw dispatch.
    fn stored(&self) -> Option<StoredReferences> {
        self.account
            .as_ref()
            .filter(|a| a.is_offsite())
            .map(|a| StoredReferences {
                client_reference_id: a.client_reference_id.clone(),
                account_reference_id: a.reference_id.clone(),
            })
    }

    fn pinned_gateway(&self) -> Option<u32> {
        self.account.as_ref().and_then(|a| a.gateway_id)
    }

    fn account_id(&self) -> Option<u32> {
        self.account.as_ref().map(|a| a.id)
    }

    fn contact_id(&self) -> Option<u32> {
        self.account.as_ref().map(|a| a.contact_id)
    }

    fn last4(&self) -> Option<String> {
        self.info
            .as_ref()
            .map(AccountInfo::last4)
            .or_else(|| self.account.as_ref().map(|a| a.last4.clone()))
    }

    fn account_type(&self) -> Option<&'static str> {
        self.info
            .as_ref()
            .or_else(|| self.account.as_ref().and_then(|a| a.details.as_ref()))
            .map(AccountInfo::account_type)
    }
}

fn unsupported(capability: Capability) -> PaymentError {
    PaymentError::ValidationFailed(ErrorSet::single(
        "type",
        "implemented",
        format!("The selected gateway does not implement {capability:?}"),
    ))
}

fn nonmerchant_unsupported(operation: Operation) -> PaymentError {
    PaymentError::GatewayError(ErrorSet::single(
        "gateway",
        "nonmerchant",
        format!("The gateway does not support non-merchant {operation}s"),
    ))
}

fn parse_type(raw: &str) -> Result<PaymentType> {
    raw.parse().map_err(|_| {
        PaymentError::ValidationFailed(ErrorSet::single(
            "type",
            "valid",
            format!("Invalid payment type '{raw}'"),
        ))
    })
}

fn remote_of(tx: &Transaction) -> RemoteTransaction {
    RemoteTransaction {
        reference_id: tx.reference_id.clone(),
        transaction_id: tx.transaction_id.clone(),
    }
}

impl PaymentOrchestrator {
    /// Charges a card or bank account and records the transaction.
    pub async fn process_payment(
        &self,
        ctx: &Context,
        request: PaymentRequest,
    ) -> Result<PaymentResult> {
        self.charge(ctx, request, Operation::Process).await
    }

    /// Authorizes a card charge for a later capture and records the transaction.
    pub async fn authorize_payment(
        &self,
        ctx: &Context,
        request: PaymentRequest,
    ) -> Result<PaymentResult> {
        self.charge(ctx, request, Operation::Authorize).await
    }

    async fn charge(
        &self,
        ctx: &Context,
        request: PaymentRequest,
        operation: Operation,
    ) -> Result<PaymentResult> {
        let PaymentRequest {
            client_id,
            r#type: raw_type,
            amount,
            currency,
            account_info,
            account_id,
            options,
        } = request;

        let amount = self.currency.cast(amount, &currency);
        // An unknown type pins no account and is reported once a gateway is bound.
        let funding = match raw_type.parse::<PaymentType>() {
            Ok(r#type) => {
                self.resolve_funding(client_id, r#type, account_info, account_id, &options)
                    .await?
            }
            Err(_) => Funding::default(),
        };

        let mut gateway = self
            .bind_merchant(ctx, &currency, funding.pinned_gateway(), options.staff_id)
            .await?
            .ok_or(PaymentError::GatewayNotFound)?;

        let allowed: &[PaymentType] = match operation {
            Operation::Authorize => &[PaymentType::Cc],
            _ => &[PaymentType::Ach, PaymentType::Cc],
        };
        RuleSet::build(&gateway, allowed, false, implements_merchant)
            .validate(&PaymentInput {
                r#type: &raw_type,
                amount: Some(amount),
            })
            .map_err(PaymentError::ValidationFailed)?;
        let r#type = parse_type(&raw_type)?;
        self.check_invoices(&options.invoices, amount)?;

        let stored = funding.stored();
        tracing::info!(
            %operation,
            gateway_id = gateway.id(),
            client_id,
            payment_type = %r#type,
            stored = stored.is_some(),
            %amount,
            currency = %currency,
            "dispatching payment"
        );

        let outcome = Self::dispatch_charge(
            &gateway,
            operation,
            r#type,
            &funding,
            stored.as_ref(),
            amount,
            &options.invoices,
        )
        .await?;
        let (response, gateway_errors) = Self::drain(&mut gateway, outcome, operation)?;

        let id = self
            .ledger
            .add(NewTransaction {
                client_id,
                account_id: funding.account_id(),
                amount,
                currency: currency.clone(),
                r#type,
                gateway_id: Some(gateway.id()),
                transaction_id: response.transaction_id.clone(),
                reference_id: response.reference_id.clone(),
                parent_transaction_id: response.parent_transaction_id.clone(),
                message: response.message.clone(),
                status: response.status,
            })
            .await
            .map_err(|err| Self::after_dispatch(err, operation, &response))?;

        if response.status == TransactionStatus::Approved && !options.invoices.is_empty() {
            self.ledger
                .apply(id, &options.invoices)
                .await
                .map_err(|err| Self::after_dispatch(err, operation, &response))?;
        }

        if operation == Operation::Process {
            match response.status {
                TransactionStatus::Declined => {
                    self.accounts
                        .record_autodebit_failure(client_id, r#type, funding.account_id())
                        .await?
                }
                TransactionStatus::Approved => {
                    self.accounts
                        .reset_autodebit_failures(client_id, r#type, funding.account_id())
                        .await?
                }
                _ => {}
            }
        }

        let transaction = self.recorded(id).await?;
        if options.email_receipt {
            self.send_receipt(
                ctx,
                Receipt {
                    template: template_key(r#type, response.status),
                    transaction: &transaction,
                    response: &response,
                    amount,
                    contact_id: funding.contact_id(),
                    last4: funding.last4(),
                    account_type: funding.account_type(),
                    gateway_name: None,
                    staff_id: options.staff_id,
                },
            )
            .await;
        }

        Ok(PaymentResult {
            transaction,
            gateway_errors,
        })
    }

    async fn dispatch_charge(
        gateway: &BoundGateway,
        operation: Operation,
        r#type: PaymentType,
        funding: &Funding,
        stored: Option<&StoredReferences>,
        amount: Decimal,
        invoices: &[InvoiceAmount],
    ) -> Result<GatewayOutcome> {
        let gw = gateway.gateway();
        let outcome = match (r#type, stored) {
            (PaymentType::Cc, Some(refs)) => {
                let card = gw
                    .stored_card()
                    .ok_or_else(|| unsupported(Capability::ChargeStoredCard))?;
                match operation {
                    Operation::Authorize => card.authorize_stored_cc(refs, amount, invoices).await,
                    _ => card.process_stored_cc(refs, amount, invoices).await,
                }
            }
            (PaymentType::Cc, None) => {
                let Some(AccountInfo::Card(details)) = &funding.info else {
                    return Err(PaymentError::AccountNotFound);
                };
                let card = gw.card().ok_or_else(|| unsupported(Capability::ChargeCard))?;
                match operation {
                    Operation::Authorize => card.authorize_cc(details, amount, invoices).await,
                    _ => card.process_cc(details, amount, invoices).await,
                }
            }
            (PaymentType::Ach, Some(refs)) => {
                gw.stored_bank()
                    .ok_or_else(|| unsupported(Capability::ChargeStoredBank))?
                    .process_stored_ach(refs, amount, invoices)
                    .await
            }
            (PaymentType::Ach, None) => {
                let Some(AccountInfo::Bank(details)) = &funding.info else {
                    return Err(PaymentError::AccountNotFound);
                };
                gw.bank()
                    .ok_or_else(|| unsupported(Capability::ChargeBank))?
                    .process_ach(details, amount, invoices)
                    .await
            }
            (PaymentType::Other, _) => return Err(unsupported(Capability::ChargeCard)),
        };
        Ok(outcome)
    }

    /// Captures a previously authorized card transaction.
    pub async fn capture_payment(
        &self,
        ctx: &Context,
        request: CaptureRequest,
    ) -> Result<PaymentResult> {
        let CaptureRequest {
            client_id,
            transaction_id,
            amount,
            options,
        } = request;
        let operation = Operation::Capture;

        let tx = self.owned_transaction(client_id, transaction_id).await?;
        let amount = self.currency.cast(amount.unwrap_or(tx.amount), &tx.currency);
        let funding = self.recorded_funding(&tx, &options).await?;

        let mut gateway = self
            .bind_merchant(ctx, &tx.currency, tx.gateway_id, options.staff_id)
            .await?
            .ok_or(PaymentError::GatewayNotFound)?;

        RuleSet::build(&gateway, &[PaymentType::Cc], false, implements_merchant)
            .validate(&PaymentInput {
                r#type: tx.r#type.as_str(),
                amount: Some(amount),
            })
            .map_err(PaymentError::ValidationFailed)?;
        self.check_invoices(&options.invoices, amount)?;

        let remote = remote_of(&tx);
        let stored = funding.stored();
        tracing::info!(
            %operation,
            gateway_id = gateway.id(),
            transaction_id = tx.id,
            stored = stored.is_some(),
            %amount,
            "dispatching capture"
        );

        let gw = gateway.gateway();
        let outcome = match &stored {
            Some(refs) => {
                gw.stored_card()
                    .ok_or_else(|| unsupported(Capability::ChargeStoredCard))?
                    .capture_stored_cc(refs, &remote, amount, &options.invoices)
                    .await
            }
            None => {
                gw.card()
                    .ok_or_else(|| unsupported(Capability::ChargeCard))?
                    .capture_cc(&remote, amount, &options.invoices)
                    .await
            }
        };
        let (response, gateway_errors) = Self::drain(&mut gateway, outcome, operation)?;

        let update = TransactionUpdate {
            amount: Some(amount),
            ..TransactionUpdate::from_response(&response)
        };
        let transaction = self
            .ledger
            .edit(tx.id, update, options.staff_id)
            .await
            .map_err(|err| Self::after_dispatch(err, operation, &response))?;

        if response.status == TransactionStatus::Approved && !options.invoices.is_empty() {
            self.ledger
                .apply(tx.id, &options.invoices)
                .await
                .map_err(|err| Self::after_dispatch(err, operation, &response))?;
        }

        if options.email_receipt {
            self.send_receipt(
                ctx,
                Receipt {
                    template: template_key(tx.r#type, response.status),
                    transaction: &transaction,
                    response: &response,
                    amount,
                    contact_id: funding.contact_id(),
                    last4: funding.last4(),
                    account_type: funding.account_type(),
                    gateway_name: None,
                    staff_id: options.staff_id,
                },
            )
            .await;
        }

        Ok(PaymentResult {
            transaction,
            gateway_errors,
        })
    }

    /// Refunds all or part of an approved transaction.
    ///
    /// A full refund marks the original `refunded` in place. A partial refund records a
    /// new approved row with a negative amount, linked to the original's remote id.
    pub async fn refund_payment(
        &self,
        ctx: &Context,
        request: RefundRequest,
    ) -> Result<PaymentResult> {
        let RefundRequest {
            client_id,
            transaction_id,
            amount,
            notes,
            options,
        } = request;
        let operation = Operation::Refund;

        let tx = self.owned_transaction(client_id, transaction_id).await?;
        let amount = self.currency.cast(amount.unwrap_or(tx.amount), &tx.currency);
        let plan = RefundPlan::classify(&tx, amount, &tx.currency, |a, c| {
            self.currency.cast(a, c)
        });
        if let RefundPlan::Reject { actual } = plan {
            return Err(PaymentError::UnexpectedStatus {
                expected: TransactionStatus::Approved,
                actual,
            });
        }

        let funding = self.recorded_funding(&tx, &options).await?;
        let mut gateway = self.bind_recorded(ctx, &tx, options.staff_id).await?;
        Self::validate_recorded(&gateway, &tx, Some(amount))?;
        if amount > self.currency.cast(tx.amount, &tx.currency) {
            return Err(PaymentError::ValidationFailed(ErrorSet::single(
                "amount",
                "refundable",
                "The refund amount may not exceed the transaction amount",
            )));
        }

        let remote = remote_of(&tx);
        let stored = funding.stored();
        tracing::info!(
            %operation,
            gateway_id = gateway.id(),
            transaction_id = tx.id,
            stored = stored.is_some(),
            %amount,
            partial = matches!(plan, RefundPlan::Partial { .. }),
            "dispatching refund"
        );

        let gw = gateway.gateway();
        let outcome = match (gateway.kind(), tx.r#type, &stored) {
            (GatewayKind::Nonmerchant, _, _) => {
                gw.nonmerchant()
                    .ok_or_else(|| nonmerchant_unsupported(operation))?
                    .refund(&remote, amount, notes.as_deref())
                    .await
            }
            (_, PaymentType::Cc, Some(refs)) => {
                gw.stored_card()
                    .ok_or_else(|| unsupported(Capability::ChargeStoredCard))?
                    .refund_stored_cc(refs, &remote, amount)
                    .await
            }
            (_, PaymentType::Cc, None) => {
                gw.card()
                    .ok_or_else(|| unsupported(Capability::ChargeCard))?
                    .refund_cc(&remote, amount)
                    .await
            }
            (_, PaymentType::Ach, Some(refs)) => {
                gw.stored_bank()
                    .ok_or_else(|| unsupported(Capability::ChargeStoredBank))?
                    .refund_stored_ach(refs, &remote, amount)
                    .await
            }
            (_, PaymentType::Ach, None) => {
                gw.bank()
                    .ok_or_else(|| unsupported(Capability::ChargeBank))?
                    .refund_ach(&remote, amount)
                    .await
            }
            (_, PaymentType::Other, _) => return Err(unsupported(Capability::ChargeCard)),
        };
        let (response, gateway_errors) = Self::drain(&mut gateway, outcome, operation)?;
        Self::require_status(&response, TransactionStatus::Refunded)?;

        let transaction = match plan {
            RefundPlan::Partial { amount: negative } => {
                let refund_remote_id = response
                    .transaction_id
                    .clone()
                    .filter(|id| tx.transaction_id.as_ref() != Some(id));
                let id = self
                    .ledger
                    .add(NewTransaction {
                        client_id: tx.client_id,
                        account_id: tx.account_id,
                        amount: negative,
                        currency: tx.currency.clone(),
                        r#type: tx.r#type,
                        gateway_id: tx.gateway_id,
                        transaction_id: refund_remote_id,
                        reference_id: response.reference_id.clone(),
                        parent_transaction_id: tx.transaction_id.clone(),
                        message: response.message.clone(),
                        status: TransactionStatus::Approved,
                    })
                    .await
                    .map_err(|err| Self::after_dispatch(err, operation, &response))?;
                self.recorded(id).await?
            }
            _ => {
                let update = TransactionUpdate {
                    amount: Some(amount),
                    status: Some(TransactionStatus::Refunded),
                    message: response.message.clone(),
                    ..Default::default()
                };
                self.ledger
                    .edit(tx.id, update, options.staff_id)
                    .await
                    .map_err(|err| Self::after_dispatch(err, operation, &response))?
            }
        };

        if options.email_receipt {
            self.send_receipt(
                ctx,
                Receipt {
                    template: template_key(tx.r#type, response.status),
                    transaction: &transaction,
                    response: &response,
                    amount,
                    contact_id: funding.contact_id(),
                    last4: funding.last4(),
                    account_type: funding.account_type(),
                    gateway_name: None,
                    staff_id: options.staff_id,
                },
            )
            .await;
        }

        Ok(PaymentResult {
            transaction,
            gateway_errors,
        })
    }

    /// Voids an approved or authorized transaction.
    pub async fn void_payment(&self, ctx: &Context, request: VoidRequest) -> Result<PaymentResult> {
        let VoidRequest {
            client_id,
            transaction_id,
            notes,
            options,
        } = request;
        let operation = Operation::Void;

        let tx = self.owned_transaction(client_id, transaction_id).await?;
        if !matches!(
            tx.status,
            TransactionStatus::Approved | TransactionStatus::Pending
        ) {
            return Err(PaymentError::UnexpectedStatus {
                expected: TransactionStatus::Approved,
                actual: tx.status,
            });
        }

        let funding = self.recorded_funding(&tx, &options).await?;
        let mut gateway = self.bind_recorded(ctx, &tx, options.staff_id).await?;
        Self::validate_recorded(&gateway, &tx, None)?;

        let remote = remote_of(&tx);
        let stored = funding.stored();
        tracing::info!(
            %operation,
            gateway_id = gateway.id(),
            transaction_id = tx.id,
            stored = stored.is_some(),
            "dispatching void"
        );

        let gw = gateway.gateway();
        let outcome = match (gateway.kind(), tx.r#type, &stored) {
            (GatewayKind::Nonmerchant, _, _) => {
                gw.nonmerchant()
                    .ok_or_else(|| nonmerchant_unsupported(operation))?
                    .void(&remote, notes.as_deref())
                    .await
            }
            (_, PaymentType::Cc, Some(refs)) => {
                gw.stored_card()
                    .ok_or_else(|| unsupported(Capability::ChargeStoredCard))?
                    .void_stored_cc(refs, &remote)
                    .await
            }
            (_, PaymentType::Cc, None) => {
                gw.card()
                    .ok_or_else(|| unsupported(Capability::ChargeCard))?
                    .void_cc(&remote)
                    .await
            }
            (_, PaymentType::Ach, Some(refs)) => {
                gw.stored_bank()
                    .ok_or_else(|| unsupported(Capability::ChargeStoredBank))?
                    .void_stored_ach(refs, &remote)
                    .await
            }
            (_, PaymentType::Ach, None) => {
                gw.bank()
                    .ok_or_else(|| unsupported(Capability::ChargeBank))?
                    .void_ach(&remote)
                    .await
            }
            (_, PaymentType::Other, _) => return Err(unsupported(Capability::ChargeCard)),
        };
        let (response, gateway_errors) = Self::drain(&mut gateway, outcome, operation)?;
        Self::require_status(&response, TransactionStatus::Void)?;

        let update = TransactionUpdate {
            amount: Some(tx.amount),
            status: Some(TransactionStatus::Void),
            message: response.message.clone(),
            reference_id: response.reference_id.clone(),
            ..Default::default()
        };
        let transaction = self
            .ledger
            .edit(tx.id, update, options.staff_id)
            .await
            .map_err(|err| Self::after_dispatch(err, operation, &response))?;

        if options.email_receipt {
            self.send_receipt(
                ctx,
                Receipt {
                    template: template_key(tx.r#type, response.status),
                    transaction: &transaction,
                    response: &response,
                    amount: tx.amount,
                    contact_id: funding.contact_id(),
                    last4: funding.last4(),
                    account_type: funding.account_type(),
                    gateway_name: None,
                    staff_id: options.staff_id,
                },
            )
            .await;
        }

        Ok(PaymentResult {
            transaction,
            gateway_errors,
        })
    }

    /// Refund and void validation: merchant gateways check the recorded type against
    /// their capabilities, non-merchant ones take any type.
    fn validate_recorded(
        gateway: &BoundGateway,
        tx: &Transaction,
        amount: Option<Decimal>,
    ) -> Result<()> {
        let (allowed, r#type): (&[PaymentType], &str) = match gateway.kind() {
            GatewayKind::Merchant => (&[PaymentType::Ach, PaymentType::Cc], tx.r#type.as_str()),
            GatewayKind::Nonmerchant => (&[PaymentType::Other], PaymentType::Other.as_str()),
        };
        RuleSet::build(gateway, allowed, false, implements_merchant)
            .validate(&PaymentInput { r#type, amount })
            .map_err(PaymentError::ValidationFailed)
    }

    /// Drains the gateway's errors. Without a response the call failed outright.
    fn drain(
        gateway: &mut BoundGateway,
        outcome: GatewayOutcome,
        operation: Operation,
    ) -> Result<(GatewayResponse, ErrorSet)> {
        let response = gateway.settle(outcome);
        let mut errors = gateway.take_errors();
        match response {
            Some(response) => {
                if !errors.is_empty() {
                    tracing::warn!(
                        %operation,
                        gateway_id = gateway.id(),
                        errors = %errors,
                        "gateway reported errors alongside its response"
                    );
                }
                Ok((response, errors))
            }
            None => {
                if errors.is_empty() {
                    errors.add("gateway", "response", "The gateway returned no response");
                }
                tracing::warn!(
                    %operation,
                    gateway_id = gateway.id(),
                    errors = %errors,
                    "gateway call failed"
                );
                Err(PaymentError::GatewayError(errors))
            }
        }
    }

    fn require_status(response: &GatewayResponse, expected: TransactionStatus) -> Result<()> {
        if response.status == expected {
            Ok(())
        } else {
            tracing::warn!(
                expected = %expected,
                actual = %response.status,
                transaction_id = response.transaction_id.as_deref().unwrap_or("-"),
                "gateway returned a non-terminal status; nothing recorded"
            );
            Err(PaymentError::UnexpectedStatus {
                expected,
                actual: response.status,
            })
        }
    }

    /// Logs a ledger failure that happened after the gateway already moved money.
    fn after_dispatch(
        err: PaymentError,
        operation: Operation,
        response: &GatewayResponse,
    ) -> PaymentError {
        tracing::error!(
            %operation,
            status = %response.status,
            remote_transaction_id = response.transaction_id.as_deref().unwrap_or("-"),
            error = %err,
            "gateway call completed but the ledger write failed; do not retry the charge"
        );
        err
    }

    async fn owned_transaction(&self, client_id: u32, id: u64) -> Result<Transaction> {
        self.ledger
            .get(id)
            .await?
            .filter(|tx| tx.client_id == client_id)
            .ok_or(PaymentError::TransactionNotFound)
    }

    async fn recorded(&self, id: u64) -> Result<Transaction> {
        self.ledger
            .get(id)
            .await?
            .ok_or(PaymentError::TransactionNotFound)
    }

    async fn lookup_account(
        &self,
        r#type: PaymentType,
        account_id: u32,
        options: &PaymentOptions,
    ) -> Result<Option<StoredPaymentAccount>> {
        let passphrase = options.passphrase.as_deref();
        match r#type {
            PaymentType::Cc => {
                self.accounts
                    .get_cc(account_id, passphrase, options.staff_id)
                    .await
            }
            PaymentType::Ach => {
                self.accounts
                    .get_ach(account_id, passphrase, options.staff_id)
                    .await
            }
            PaymentType::Other => Ok(None),
        }
    }

    async fn resolve_funding(
        &self,
        client_id: u32,
        r#type: PaymentType,
        account_info: Option<AccountInfo>,
        account_id: Option<u32>,
        options: &PaymentOptions,
    ) -> Result<Funding> {
        let account = match account_id {
            Some(id) => Some(
                self.lookup_account(r#type, id, options)
                    .await?
                    .filter(|a| a.client_id == client_id)
                    .ok_or(PaymentError::AccountNotFound)?,
            ),
            None => None,
        };

        let info = match &account {
            Some(a) if a.is_offsite() => None,
            Some(a) => account_info.or_else(|| a.details.clone()),
            None => account_info,
        };
        let offsite = account.as_ref().is_some_and(StoredPaymentAccount::is_offsite);
        if !offsite && info.is_none() {
            return Err(PaymentError::AccountNotFound);
        }

        let info = info.map(|info| match info {
            AccountInfo::Card(mut card) => {
                card.card_type = CardType::classify(&card.number);
                AccountInfo::Card(card)
            }
            bank => bank,
        });
        if info.as_ref().is_some_and(|i| i.payment_type() != r#type) {
            return Err(PaymentError::ValidationFailed(ErrorSet::single(
                "type",
                "matches",
                format!("Account details do not match payment type '{}'", r#type),
            )));
        }

        Ok(Funding { account, info })
    }

    /// The saved account behind a recorded transaction, if it still exists.
    async fn recorded_funding(&self, tx: &Transaction, options: &PaymentOptions) -> Result<Funding> {
        let account = match tx.account_id {
            Some(id) => self
                .lookup_account(tx.r#type, id, options)
                .await?
                .filter(|a| a.client_id == tx.client_id),
            None => None,
        };
        let info = account.as_ref().and_then(|a| a.details.clone());
        Ok(Funding { account, info })
    }
}
