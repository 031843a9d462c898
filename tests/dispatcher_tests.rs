mod common;

use common::*;
use gateway_orchestrator::application::dispatcher::{
    CaptureRequest, PaymentOptions, PaymentRequest, RefundRequest, VoidRequest,
};
use gateway_orchestrator::domain::account::{AccountInfo, StoredPaymentAccount};
use gateway_orchestrator::domain::gateway::{Capability, GatewayKind};
use gateway_orchestrator::domain::ports::TransactionLedger;
use gateway_orchestrator::domain::transaction::{NewTransaction, PaymentType, TransactionStatus};
use gateway_orchestrator::error::{ErrorSet, PaymentError};
use gateway_orchestrator::infrastructure::in_memory::InMemoryOutbox;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn card_payment(amount: Decimal) -> PaymentRequest {
    PaymentRequest {
        client_id: CLIENT_ID,
        r#type: "cc".to_string(),
        amount,
        currency: "USD".to_string(),
        account_info: Some(visa()),
        account_id: None,
        options: options(),
    }
}

fn refund(transaction_id: u64, amount: Option<Decimal>) -> RefundRequest {
    RefundRequest {
        client_id: CLIENT_ID,
        transaction_id,
        amount,
        notes: None,
        options: options(),
    }
}

#[tokio::test]
async fn test_process_card_payment_records_and_emails() {
    let h = Harness::new(Script::full()).await;

    let result = h
        .orchestrator
        .process_payment(&h.ctx, card_payment(dec!(100.00)))
        .await
        .unwrap();

    assert_eq!(result.transaction.amount, dec!(100.00));
    assert_eq!(result.transaction.status, TransactionStatus::Approved);
    assert_eq!(result.transaction.transaction_id.as_deref(), Some("TX1"));
    assert_eq!(result.transaction.gateway_id, Some(MERCHANT_ID));
    assert!(result.gateway_errors.is_empty());
    assert_eq!(h.calls(), ["process_cc"]);
    assert_eq!(h.rows().await.len(), 1);

    let sent = h.outbox.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].template, "payment_cc_approved");
    assert_eq!(sent[0].to, "ada@example.com");
    assert_eq!(sent[0].tags["amount"], "$100.00");
    assert_eq!(sent[0].tags["last4"], "1111");
    assert_eq!(sent[0].tags["card_type"], "visa");
}

#[tokio::test]
async fn test_amount_is_cast_to_currency_precision() {
    let h = Harness::new(Script::full()).await;
    let result = h
        .orchestrator
        .process_payment(&h.ctx, card_payment(dec!(10.005)))
        .await
        .unwrap();
    assert_eq!(result.transaction.amount, dec!(10.01));
}

#[tokio::test]
async fn test_invoices_applied_only_when_approved() {
    let h = Harness::new(Script::full()).await;
    let mut request = card_payment(dec!(100.00));
    request.options.invoices = invoices(&[(7, dec!(60.00)), (8, dec!(40.00))]);

    let approved = h
        .orchestrator
        .process_payment(&h.ctx, request.clone())
        .await
        .unwrap();
    assert_eq!(
        h.ledger.applications(approved.transaction.id).await.unwrap().len(),
        2
    );

    h.respond_with(Some(status(TransactionStatus::Declined, "TX2")));
    let declined = h
        .orchestrator
        .process_payment(&h.ctx, request)
        .await
        .unwrap();
    assert_eq!(declined.transaction.status, TransactionStatus::Declined);
    assert!(
        h.ledger
            .applications(declined.transaction.id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_autodebit_counter_tracks_process_outcomes() {
    let h = Harness::new(Script::full().responding(status(TransactionStatus::Declined, "TX1")))
        .await;

    h.orchestrator
        .process_payment(&h.ctx, card_payment(dec!(5)))
        .await
        .unwrap();
    h.respond_with(Some(status(TransactionStatus::Declined, "TX2")));
    h.orchestrator
        .process_payment(&h.ctx, card_payment(dec!(5)))
        .await
        .unwrap();
    assert_eq!(
        h.accounts
            .autodebit_failures(CLIENT_ID, PaymentType::Cc, None)
            .await,
        2
    );

    h.respond_with(Some(approved("TX3")));
    h.orchestrator
        .process_payment(&h.ctx, card_payment(dec!(5)))
        .await
        .unwrap();
    assert_eq!(
        h.accounts
            .autodebit_failures(CLIENT_ID, PaymentType::Cc, None)
            .await,
        0
    );
}

#[tokio::test]
async fn test_offsite_account_always_uses_stored_variant() {
    let h = Harness::new(Script::full()).await;
    h.accounts.add_cc(saved_card(3, CLIENT_ID, Some(MERCHANT_ID))).await;

    let mut request = card_payment(dec!(25.00));
    request.account_id = Some(3);
    // Raw data alongside an offsite account is ignored.
    request.account_info = Some(visa());

    let result = h
        .orchestrator
        .process_payment(&h.ctx, request)
        .await
        .unwrap();
    assert_eq!(h.calls(), ["process_stored_cc"]);
    assert_eq!(result.transaction.account_id, Some(3));
}

#[tokio::test]
async fn test_locally_saved_account_uses_raw_variant() {
    let h = Harness::new(Script::full()).await;
    h.accounts.add_cc(saved_card(4, CLIENT_ID, None)).await;

    let mut request = card_payment(dec!(25.00));
    request.account_id = Some(4);
    request.account_info = None;

    h.orchestrator
        .process_payment(&h.ctx, request)
        .await
        .unwrap();
    assert_eq!(h.calls(), ["process_cc"]);
}

#[tokio::test]
async fn test_account_of_another_client_is_not_found() {
    let h = Harness::new(Script::full()).await;
    h.accounts.add_cc(saved_card(3, 99, Some(MERCHANT_ID))).await;

    let mut request = card_payment(dec!(25.00));
    request.account_id = Some(3);

    let err = h
        .orchestrator
        .process_payment(&h.ctx, request)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::AccountNotFound));
    assert!(h.calls().is_empty());
    assert!(h.rows().await.is_empty());
}

#[tokio::test]
async fn test_bank_payment_dispatches_ach() {
    let h = Harness::new(Script::full()).await;
    let request = PaymentRequest {
        r#type: "ACH".to_string(),
        account_info: Some(checking()),
        ..card_payment(dec!(80.00))
    };

    let result = h
        .orchestrator
        .process_payment(&h.ctx, request)
        .await
        .unwrap();
    assert_eq!(h.calls(), ["process_ach"]);
    assert_eq!(result.transaction.r#type, PaymentType::Ach);
    assert_eq!(h.templates().await, ["payment_ach_approved"]);
}

#[tokio::test]
async fn test_authorize_without_card_capability_fails_before_dispatch() {
    let h = Harness::new(
        Script::new(&[Capability::ChargeBank, Capability::ChargeStoredBank])
            .responding(approved("TX1")),
    )
    .await;

    let err = h
        .orchestrator
        .authorize_payment(&h.ctx, card_payment(dec!(10)))
        .await
        .unwrap_err();
    match err {
        PaymentError::ValidationFailed(errors) => assert!(errors.contains("type", "implemented")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(h.calls().is_empty());
    assert!(h.rows().await.is_empty());
}

#[tokio::test]
async fn test_authorize_rejects_bank_type() {
    let h = Harness::new(Script::full()).await;
    let request = PaymentRequest {
        r#type: "ach".to_string(),
        account_info: Some(checking()),
        ..card_payment(dec!(10))
    };

    let err = h
        .orchestrator
        .authorize_payment(&h.ctx, request)
        .await
        .unwrap_err();
    assert!(err.errors().contains("type", "valid"));
    assert!(h.calls().is_empty());
}

#[tokio::test]
async fn test_non_positive_amount_fails_validation() {
    let h = Harness::new(Script::full()).await;
    let err = h
        .orchestrator
        .process_payment(&h.ctx, card_payment(dec!(0)))
        .await
        .unwrap_err();
    assert!(err.errors().contains("amount", "positive"));
    assert!(h.calls().is_empty());
}

#[tokio::test]
async fn test_mismatched_account_data_fails_validation() {
    let h = Harness::new(Script::full()).await;
    let request = PaymentRequest {
        account_info: Some(checking()),
        ..card_payment(dec!(10))
    };
    let err = h
        .orchestrator
        .process_payment(&h.ctx, request)
        .await
        .unwrap_err();
    assert!(err.errors().contains("type", "matches"));
}

#[tokio::test]
async fn test_missing_gateway_for_currency() {
    let h = Harness::new(Script::full()).await;
    let request = PaymentRequest {
        currency: "EUR".to_string(),
        ..card_payment(dec!(10))
    };
    let err = h
        .orchestrator
        .process_payment(&h.ctx, request)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::GatewayNotFound));
    assert!(h.calls().is_empty());
}

#[tokio::test]
async fn test_over_applied_invoices_fail_before_dispatch() {
    let h = Harness::new(Script::full()).await;
    let mut request = card_payment(dec!(50.00));
    request.options.invoices = invoices(&[(1, dec!(30.00)), (2, dec!(30.00))]);

    let err = h
        .orchestrator
        .process_payment(&h.ctx, request)
        .await
        .unwrap_err();
    assert!(err.errors().contains("invoices", "exceeds_amount"));
    assert!(h.calls().is_empty());
}

#[tokio::test]
async fn test_gateway_errors_without_response_persist_nothing() {
    let h = Harness::new(Script::full()).await;
    h.respond_with(None);
    h.report_errors(ErrorSet::single("cc", "declined", "Card reported stolen"));

    let err = h
        .orchestrator
        .process_payment(&h.ctx, card_payment(dec!(10)))
        .await
        .unwrap_err();
    match err {
        PaymentError::GatewayError(errors) => assert!(errors.contains("cc", "declined")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(h.rows().await.is_empty());
    assert!(h.outbox.sent().await.is_empty());
}

#[tokio::test]
async fn test_soft_gateway_errors_still_persist() {
    let h = Harness::new(Script::full()).await;
    h.report_errors(ErrorSet::single("avs", "mismatch", "Address did not match"));

    let result = h
        .orchestrator
        .process_payment(&h.ctx, card_payment(dec!(10)))
        .await
        .unwrap();
    assert!(result.gateway_errors.contains("avs", "mismatch"));
    assert_eq!(h.rows().await.len(), 1);
}

#[tokio::test]
async fn test_receipt_failure_keeps_transaction() {
    let h = Harness::with_outbox(Script::full(), InMemoryOutbox::unavailable()).await;
    let result = h
        .orchestrator
        .process_payment(&h.ctx, card_payment(dec!(10)))
        .await
        .unwrap();
    assert_eq!(result.transaction.status, TransactionStatus::Approved);
    assert_eq!(h.rows().await.len(), 1);
}

#[tokio::test]
async fn test_no_receipt_when_disabled() {
    let h = Harness::new(Script::full()).await;
    let mut request = card_payment(dec!(10));
    request.options = PaymentOptions {
        email_receipt: false,
        ..PaymentOptions::default()
    };
    h.orchestrator
        .process_payment(&h.ctx, request)
        .await
        .unwrap();
    assert!(h.outbox.sent().await.is_empty());
}

#[tokio::test]
async fn test_capture_defaults_to_authorized_amount() {
    let h = Harness::new(Script::full()).await;
    let authorized = h
        .orchestrator
        .authorize_payment(&h.ctx, card_payment(dec!(75.00)))
        .await
        .unwrap()
        .transaction;

    h.respond_with(Some(approved("TX1").with_reference_id("CAP-1")));
    let captured = h
        .orchestrator
        .capture_payment(
            &h.ctx,
            CaptureRequest {
                client_id: CLIENT_ID,
                transaction_id: authorized.id,
                amount: None,
                options: options(),
            },
        )
        .await
        .unwrap()
        .transaction;

    assert_eq!(h.calls(), ["authorize_cc", "capture_cc"]);
    assert_eq!(captured.id, authorized.id);
    assert_eq!(captured.amount, dec!(75.00));
    assert_eq!(captured.reference_id.as_deref(), Some("CAP-1"));
    assert_eq!(h.rows().await.len(), 1);
}

#[tokio::test]
async fn test_capture_of_another_clients_transaction_is_not_found() {
    let h = Harness::new(Script::full()).await;
    let tx = h.seed(approved_charge(dec!(20), "TX9")).await;

    let err = h
        .orchestrator
        .capture_payment(
            &h.ctx,
            CaptureRequest {
                client_id: 99,
                transaction_id: tx.id,
                amount: None,
                options: options(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::TransactionNotFound));
    assert!(h.calls().is_empty());
}

#[tokio::test]
async fn test_full_refund_updates_parent_in_place() {
    let h = Harness::new(Script::full()).await;
    let parent = h.seed(approved_charge(dec!(50.00), "TX1")).await;
    h.respond_with(Some(status(TransactionStatus::Refunded, "TX1")));

    let result = h
        .orchestrator
        .refund_payment(&h.ctx, refund(parent.id, Some(dec!(50.00))))
        .await
        .unwrap();

    assert_eq!(h.calls(), ["refund_cc"]);
    assert_eq!(result.transaction.id, parent.id);
    assert_eq!(result.transaction.status, TransactionStatus::Refunded);
    assert_eq!(result.transaction.amount, dec!(50.00));
    assert_eq!(h.rows().await.len(), 1);
    assert_eq!(h.templates().await, ["payment_cc_refunded"]);
}

#[tokio::test]
async fn test_refund_amount_defaults_to_full_amount() {
    let h = Harness::new(Script::full()).await;
    let parent = h.seed(approved_charge(dec!(50.00), "TX1")).await;
    h.respond_with(Some(status(TransactionStatus::Refunded, "TX1")));

    h.orchestrator
        .refund_payment(&h.ctx, refund(parent.id, None))
        .await
        .unwrap();
    let rows = h.rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, TransactionStatus::Refunded);
}

#[tokio::test]
async fn test_partial_refund_creates_linked_negative_row() {
    let h = Harness::new(Script::full()).await;
    let parent = h.seed(approved_charge(dec!(50.00), "TX1")).await;
    h.respond_with(Some(status(TransactionStatus::Refunded, "RF-1")));

    let result = h
        .orchestrator
        .refund_payment(&h.ctx, refund(parent.id, Some(dec!(20.00))))
        .await
        .unwrap();

    let child = result.transaction;
    assert_ne!(child.id, parent.id);
    assert_eq!(child.amount, dec!(-20.00));
    assert_eq!(child.status, TransactionStatus::Approved);
    assert_eq!(child.parent_transaction_id.as_deref(), Some("TX1"));
    assert_eq!(child.transaction_id.as_deref(), Some("RF-1"));

    let parent = h.ledger.get(parent.id).await.unwrap().unwrap();
    assert_eq!(parent.status, TransactionStatus::Approved);
    assert_eq!(parent.amount, dec!(50.00));
    assert_eq!(h.rows().await.len(), 2);

    let sent = h.outbox.sent().await;
    assert_eq!(sent[0].tags["amount"], "$20.00");
}

#[tokio::test]
async fn test_refund_of_unapproved_parent_is_rejected() {
    let h = Harness::new(Script::full()).await;
    let parent = h
        .seed(NewTransaction {
            status: TransactionStatus::Pending,
            ..approved_charge(dec!(50.00), "TX1")
        })
        .await;

    let err = h
        .orchestrator
        .refund_payment(&h.ctx, refund(parent.id, Some(dec!(20.00))))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PaymentError::UnexpectedStatus {
            expected: TransactionStatus::Approved,
            actual: TransactionStatus::Pending
        }
    ));
    assert!(h.calls().is_empty());
    assert_eq!(h.rows().await, vec![parent]);
}

#[tokio::test]
async fn test_refund_larger_than_original_fails_validation() {
    let h = Harness::new(Script::full()).await;
    let parent = h.seed(approved_charge(dec!(50.00), "TX1")).await;

    let err = h
        .orchestrator
        .refund_payment(&h.ctx, refund(parent.id, Some(dec!(60.00))))
        .await
        .unwrap_err();
    assert!(err.errors().contains("amount", "refundable"));
    assert!(h.calls().is_empty());
}

#[tokio::test]
async fn test_refund_with_non_refunded_status_leaves_ledger_untouched() {
    let h = Harness::new(Script::full()).await;
    let parent = h.seed(approved_charge(dec!(50.00), "TX1")).await;
    h.respond_with(Some(status(TransactionStatus::Pending, "TX1")));

    let err = h
        .orchestrator
        .refund_payment(&h.ctx, refund(parent.id, Some(dec!(20.00))))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::UnexpectedStatus { .. }));
    assert_eq!(h.rows().await, vec![parent]);
}

#[tokio::test]
async fn test_void_with_error_status_leaves_ledger_untouched() {
    let h = Harness::new(Script::full()).await;
    let tx = h.seed(approved_charge(dec!(30.00), "TX1")).await;
    h.respond_with(Some(status(TransactionStatus::Error, "TX1")));

    let err = h
        .orchestrator
        .void_payment(
            &h.ctx,
            VoidRequest {
                client_id: CLIENT_ID,
                transaction_id: tx.id,
                notes: None,
                options: options(),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PaymentError::UnexpectedStatus {
            expected: TransactionStatus::Void,
            actual: TransactionStatus::Error
        }
    ));
    assert_eq!(h.calls(), ["void_cc"]);
    assert_eq!(h.rows().await, vec![tx]);
    assert!(h.outbox.sent().await.is_empty());
}

#[tokio::test]
async fn test_void_marks_transaction_void() {
    let h = Harness::new(Script::full()).await;
    let tx = h.seed(approved_charge(dec!(30.00), "TX1")).await;
    h.respond_with(Some(status(TransactionStatus::Void, "TX1")));

    let result = h
        .orchestrator
        .void_payment(
            &h.ctx,
            VoidRequest {
                client_id: CLIENT_ID,
                transaction_id: tx.id,
                notes: Some("duplicate order".to_string()),
                options: options(),
            },
        )
        .await
        .unwrap();
    assert_eq!(result.transaction.status, TransactionStatus::Void);
    assert_eq!(result.transaction.amount, dec!(30.00));
    assert_eq!(h.templates().await, ["payment_cc_void"]);
}

#[tokio::test]
async fn test_stored_account_refund_uses_stored_variant() {
    let h = Harness::new(Script::full()).await;
    h.accounts
        .add_ach(StoredPaymentAccount {
            last4: "6789".to_string(),
            details: Some(checking()),
            ..saved_card(6, CLIENT_ID, Some(MERCHANT_ID))
        })
        .await;
    let parent = h
        .seed(NewTransaction {
            r#type: PaymentType::Ach,
            account_id: Some(6),
            ..approved_charge(dec!(40.00), "TX1")
        })
        .await;
    h.respond_with(Some(status(TransactionStatus::Refunded, "TX1")));

    h.orchestrator
        .refund_payment(&h.ctx, refund(parent.id, None))
        .await
        .unwrap();
    assert_eq!(h.calls(), ["refund_stored_ach"]);
}

#[tokio::test]
async fn test_nonmerchant_refund_goes_through_type_agnostic_path() {
    let h = Harness::new(Script::full()).await;
    let parent = h
        .seed(NewTransaction {
            r#type: PaymentType::Other,
            gateway_id: Some(POSTBACK_ID),
            ..approved_charge(dec!(50.00), "PB-1")
        })
        .await;

    let result = h
        .orchestrator
        .refund_payment(&h.ctx, refund(parent.id, Some(dec!(20.00))))
        .await
        .unwrap();

    // The scripted merchant gateway was never called.
    assert!(h.calls().is_empty());
    assert_eq!(result.transaction.amount, dec!(-20.00));
    assert_eq!(result.transaction.gateway_id, Some(POSTBACK_ID));
    assert_eq!(result.transaction.parent_transaction_id.as_deref(), Some("PB-1"));
    assert_eq!(result.transaction.transaction_id, None);
}

#[tokio::test]
async fn test_card_type_is_reclassified_from_number() {
    let h = Harness::new(Script::full()).await;
    let mut info = visa();
    if let AccountInfo::Card(card) = &mut info {
        card.number = "378282246310005".to_string();
    }
    let request = PaymentRequest {
        account_info: Some(info),
        ..card_payment(dec!(10))
    };
    h.orchestrator
        .process_payment(&h.ctx, request)
        .await
        .unwrap();
    assert_eq!(h.outbox.sent().await[0].tags["card_type"], "amex");
}

#[tokio::test]
async fn test_unknown_type_without_gateway_reports_missing_gateway() {
    let h = Harness::new(Script::full()).await;
    let request = PaymentRequest {
        r#type: "wire".to_string(),
        currency: "EUR".to_string(),
        ..card_payment(dec!(10))
    };
    let err = h
        .orchestrator
        .process_payment(&h.ctx, request)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::GatewayNotFound));
}

#[tokio::test]
async fn test_unknown_type_is_rejected_once_gateway_is_bound() {
    let h = Harness::new(Script::full()).await;
    let request = PaymentRequest {
        r#type: "wire".to_string(),
        ..card_payment(dec!(10))
    };
    let err = h
        .orchestrator
        .process_payment(&h.ctx, request)
        .await
        .unwrap_err();
    assert!(err.errors().contains("type", "valid"));
    assert!(h.calls().is_empty());
}

#[tokio::test]
async fn test_oversized_refund_without_gateway_reports_missing_gateway() {
    let h = Harness::new(Script::full()).await;
    let parent = h
        .seed(NewTransaction {
            currency: "EUR".to_string(),
            ..approved_charge(dec!(40.00), "TX1")
        })
        .await;

    let err = h
        .orchestrator
        .refund_payment(&h.ctx, refund(parent.id, Some(dec!(100.00))))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::GatewayNotFound));
}

async fn offsite_without_support(h: &Harness) -> u64 {
    h.registry
        .install(record(3, "scripted", "Offsite", GatewayKind::Nonmerchant))
        .await;
    h.seed(NewTransaction {
        r#type: PaymentType::Other,
        gateway_id: Some(3),
        ..approved_charge(dec!(30.00), "OFF-1")
    })
    .await
    .id
}

#[tokio::test]
async fn test_refund_on_nonmerchant_gateway_without_support() {
    let h = Harness::new(Script::full()).await;
    let id = offsite_without_support(&h).await;

    let err = h
        .orchestrator
        .refund_payment(&h.ctx, refund(id, None))
        .await
        .unwrap_err();
    match err {
        PaymentError::GatewayError(errors) => assert!(errors.contains("gateway", "nonmerchant")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(h.calls().is_empty());
}

#[tokio::test]
async fn test_void_on_nonmerchant_gateway_without_support() {
    let h = Harness::new(Script::full()).await;
    let id = offsite_without_support(&h).await;

    let err = h
        .orchestrator
        .void_payment(
            &h.ctx,
            VoidRequest {
                client_id: CLIENT_ID,
                transaction_id: id,
                notes: None,
                options: options(),
            },
        )
        .await
        .unwrap_err();
    match err {
        PaymentError::GatewayError(errors) => assert!(errors.contains("gateway", "nonmerchant")),
        other => panic!("unexpected error: {other:?}"),
    }
    let tx = h.ledger.get(id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Approved);
}
