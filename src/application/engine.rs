use super::binder::{BoundGateway, GatewayCatalog};
use crate::domain::context::Context;
use crate::domain::gateway::GatewayRecord;
use crate::domain::ports::{
    AccountStoreBox, CurrencyFormatterBox, EmailerBox, GatewayRegistryBox, TransactionLedgerBox,
    TransactionLedger,
};
use crate::domain::transaction::{InvoiceAmount, Transaction, total_applied};
use crate::error::{ErrorSet, PaymentError, Result};
use rust_decimal::Decimal;

/// The payment gateway orchestration engine.
///
/// `PaymentOrchestrator` resolves and binds gateways, validates requests, dispatches
/// them to the right capability, and reconciles results into the transaction ledger.
/// It owns its collaborators; every call is awaited to completion before the next
/// ledger write, so a single call never interleaves with itself.
pub struct PaymentOrchestrator {
    pub(crate) registry: GatewayRegistryBox,
    pub(crate) catalog: GatewayCatalog,
    pub(crate) ledger: TransactionLedgerBox,
    pub(crate) accounts: AccountStoreBox,
    pub(crate) emailer: EmailerBox,
    pub(crate) currency: CurrencyFormatterBox,
}

impl PaymentOrchestrator {
    /// Creates a new `PaymentOrchestrator`.
    ///
    /// # Arguments
    ///
    /// * `registry` - Installed gateways per company.
    /// * `catalog` - Gateway implementations by class.
    /// * `ledger` - The transaction ledger.
    /// * `accounts` - Saved payment accounts, clients and contacts.
    /// * `emailer` - Sends templated receipts.
    /// * `currency` - Currency rounding and display.
    pub fn new(
        registry: GatewayRegistryBox,
        catalog: GatewayCatalog,
        ledger: TransactionLedgerBox,
        accounts: AccountStoreBox,
        emailer: EmailerBox,
        currency: CurrencyFormatterBox,
    ) -> Self {
        Self {
            registry,
            catalog,
            ledger,
            accounts,
            emailer,
            currency,
        }
    }

    pub fn ledger(&self) -> &dyn TransactionLedger {
        self.ledger.as_ref()
    }

    /// Consumes the orchestrator and returns every transaction in the ledger.
    pub async fn into_results(self) -> Result<Vec<Transaction>> {
        self.ledger.get_all().await
    }

    /// Resolves the merchant gateway for a currency and binds it.
    pub(crate) async fn bind_merchant(
        &self,
        ctx: &Context,
        currency: &str,
        gateway_id: Option<u32>,
        staff_id: Option<u32>,
    ) -> Result<Option<BoundGateway>> {
        let Some(record) = self
            .registry
            .resolve_merchant(ctx, currency, gateway_id)
            .await?
        else {
            return Ok(None);
        };
        self.bind(&record, Some(currency), staff_id).map(Some)
    }

    /// Resolves the gateway a recorded transaction went through, merchant first.
    pub(crate) async fn bind_recorded(
        &self,
        ctx: &Context,
        tx: &Transaction,
        staff_id: Option<u32>,
    ) -> Result<BoundGateway> {
        if let Some(bound) = self
            .bind_merchant(ctx, &tx.currency, tx.gateway_id, staff_id)
            .await?
        {
            return Ok(bound);
        }
        let record = self
            .registry
            .resolve_nonmerchant(ctx, Some(&tx.currency), tx.gateway_id, None)
            .await?
            .ok_or(PaymentError::GatewayNotFound)?;
        self.bind(&record, Some(&tx.currency), staff_id)
    }

    pub(crate) fn bind(
        &self,
        record: &GatewayRecord,
        currency: Option<&str>,
        staff_id: Option<u32>,
    ) -> Result<BoundGateway> {
        tracing::debug!(
            gateway_id = record.id,
            kind = ?record.kind,
            currency = currency.unwrap_or("-"),
            "gateway resolved"
        );
        self.catalog.bind(record, currency, staff_id)
    }

    /// Rejects invoice allocations that would exceed `amount`.
    pub(crate) fn check_invoices(&self, invoices: &[InvoiceAmount], amount: Decimal) -> Result<()> {
        let mut errors = ErrorSet::new();
        if invoices.iter().any(|i| i.amount <= Decimal::ZERO) {
            errors.add(
                "invoices",
                "positive",
                "Invoice amounts must be greater than zero",
            );
        }
        if total_applied(invoices) > amount {
            errors.add(
                "invoices",
                "exceeds_amount",
                "The amount applied to invoices may not exceed the payment amount",
            );
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PaymentError::ValidationFailed(errors))
        }
    }
}
