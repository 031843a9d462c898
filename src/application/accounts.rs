use super::binder::BoundGateway;
use super::engine::PaymentOrchestrator;
use super::validation::implements_merchant;
use crate::domain::account::{AccountInfo, Contact};
use crate::domain::context::Context;
use crate::domain::gateway::{Capability, GatewayOutcome, StorageResponse, StoredReferences};
use crate::domain::transaction::PaymentType;
use crate::error::{ErrorSet, PaymentError, Result};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Tokens a gateway returned for an account held on its side.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredReference {
    pub gateway_id: u32,
    pub client_reference_id: Option<String>,
    pub reference_id: Option<String>,
    /// Capability-specific extras.
    pub fields: BTreeMap<String, String>,
}

/// Common arguments of stored-account calls.
#[derive(Debug, Clone, Copy)]
pub struct StorageScope<'a> {
    pub contact_id: u32,
    /// Defaults to the client's currency.
    pub currency: Option<&'a str>,
    pub staff_id: Option<u32>,
}

// Stored-account calls return `Ok(None)` when the gateway cannot hold the account
// offsite. Missing contacts or clients and gateway failures are errors.
impl PaymentOrchestrator {
    pub async fn store_account(
        &self,
        ctx: &Context,
        scope: StorageScope<'_>,
        info: &AccountInfo,
    ) -> Result<Option<StoredReference>> {
        let Some((contact, mut gateway)) = self
            .storage_gateway(ctx, scope, info.payment_type())
            .await?
        else {
            return Ok(None);
        };

        let gw = gateway.gateway();
        let outcome = match info {
            AccountInfo::Card(card) => match gw.card_storage() {
                Some(storage) if storage.requires_cc_storage() => {
                    storage.store_cc(card, &contact).await
                }
                _ => return Ok(None),
            },
            AccountInfo::Bank(bank) => match gw.bank_storage() {
                Some(storage) if storage.requires_ach_storage() => {
                    storage.store_ach(bank, &contact).await
                }
                _ => return Ok(None),
            },
        };
        finish(&mut gateway, outcome, "store").map(Some)
    }

    pub async fn update_account(
        &self,
        ctx: &Context,
        scope: StorageScope<'_>,
        info: &AccountInfo,
        stored: &StoredReferences,
    ) -> Result<Option<StoredReference>> {
        let Some((contact, mut gateway)) = self
            .storage_gateway(ctx, scope, info.payment_type())
            .await?
        else {
            return Ok(None);
        };

        let gw = gateway.gateway();
        let outcome = match info {
            AccountInfo::Card(card) => match gw.card_storage() {
                Some(storage) if storage.requires_cc_storage() => {
                    storage.update_cc(card, &contact, stored).await
                }
                _ => return Ok(None),
            },
            AccountInfo::Bank(bank) => match gw.bank_storage() {
                Some(storage) if storage.requires_ach_storage() => {
                    storage.update_ach(bank, &contact, stored).await
                }
                _ => return Ok(None),
            },
        };
        finish(&mut gateway, outcome, "update").map(Some)
    }

    /// Confirms micro-deposit amounts for a bank account stored offsite.
    pub async fn verify_account(
        &self,
        ctx: &Context,
        scope: StorageScope<'_>,
        amounts: &[Decimal],
        stored: &StoredReferences,
    ) -> Result<Option<StoredReference>> {
        let Some((_, mut gateway)) = self.storage_gateway(ctx, scope, PaymentType::Ach).await?
        else {
            return Ok(None);
        };
        if !gateway.implements(Capability::AchVerification) {
            return Ok(None);
        }

        let Some(verification) = gateway.gateway().bank_verification() else {
            return Ok(None);
        };
        let outcome = verification.verify_ach(amounts, stored).await;
        finish(&mut gateway, outcome, "verify").map(Some)
    }

    pub async fn remove_account(
        &self,
        ctx: &Context,
        scope: StorageScope<'_>,
        r#type: PaymentType,
        stored: &StoredReferences,
    ) -> Result<Option<StoredReference>> {
        let Some((_, mut gateway)) = self.storage_gateway(ctx, scope, r#type).await? else {
            return Ok(None);
        };

        let gw = gateway.gateway();
        let outcome = match r#type {
            PaymentType::Cc => match gw.card_storage() {
                Some(storage) => storage.remove_cc(stored).await,
                None => return Ok(None),
            },
            PaymentType::Ach => match gw.bank_storage() {
                Some(storage) => storage.remove_ach(stored).await,
                None => return Ok(None),
            },
            PaymentType::Other => return Ok(None),
        };
        finish(&mut gateway, outcome, "remove").map(Some)
    }

    /// Contact, then client, then currency, then the merchant gateway, which must be able
    /// to hold `r#type` accounts offsite.
    async fn storage_gateway(
        &self,
        ctx: &Context,
        scope: StorageScope<'_>,
        r#type: PaymentType,
    ) -> Result<Option<(Contact, BoundGateway)>> {
        let contact = self
            .accounts
            .get_contact(scope.contact_id)
            .await?
            .ok_or(PaymentError::ContactNotFound)?;
        let client = self
            .accounts
            .get_client(contact.client_id)
            .await?
            .ok_or(PaymentError::ClientNotFound)?;
        let currency = scope.currency.unwrap_or(client.default_currency.as_str());

        let Some(gateway) = self
            .bind_merchant(ctx, currency, None, scope.staff_id)
            .await?
        else {
            tracing::debug!(client_id = client.id, currency, "no merchant gateway for storage");
            return Ok(None);
        };

        let offsite = match r#type {
            PaymentType::Ach if gateway.implements(Capability::AchVerification) => true,
            _ => implements_merchant(gateway.capabilities(), r#type, true),
        };
        if !offsite {
            tracing::debug!(
                gateway_id = gateway.id(),
                payment_type = %r#type,
                "gateway cannot store accounts offsite"
            );
            return Ok(None);
        }
        Ok(Some((contact, gateway)))
    }
}

fn finish(
    gateway: &mut BoundGateway,
    outcome: GatewayOutcome<StorageResponse>,
    action: &str,
) -> Result<StoredReference> {
    let response = gateway.settle(outcome);
    let mut errors = gateway.take_errors();
    match response {
        Some(response) => {
            if !errors.is_empty() {
                tracing::warn!(
                    gateway_id = gateway.id(),
                    action,
                    errors = %errors,
                    "gateway reported errors alongside stored account"
                );
            }
            Ok(StoredReference {
                gateway_id: gateway.id(),
                client_reference_id: response.client_reference_id,
                reference_id: response.reference_id,
                fields: response.fields,
            })
        }
        None => {
            if errors.is_empty() {
                errors = ErrorSet::single("gateway", "response", "The gateway returned no response");
            }
            tracing::warn!(
                gateway_id = gateway.id(),
                action,
                errors = %errors,
                "stored account call failed"
            );
            Err(PaymentError::GatewayError(errors))
        }
    }
}
