mod common;

use common::*;
use std::sync::Arc;
use vtu_backend::database::memory::Fault;
use vtu_backend::database::commission_repository::{CommissionRepository, CommissionStatus};
use vtu_backend::database::transaction_repository::{
    ProviderStatus, TransactionRepository, TransactionStatus,
};
use vtu_backend::database::wallet_repository::WalletRepository;
use vtu_backend::delivery::DeliveryError;
use vtu_backend::error::ErrorCode;
use vtu_backend::services::purchase_orchestrator::AirtimePurchaseRequest;

#[tokio::test]
async fn wallet_purchase_delivers_and_records_commission() {
    let h = Harness::new().await;
    h.fund(USER, 100_000).await;

    let receipt = h
        .state
        .orchestrator
        .purchase_data(USER, data_request(None))
        .await
        .unwrap();

    assert_eq!(receipt.status, TransactionStatus::Success);
    assert_eq!(receipt.provider_status, ProviderStatus::Delivered);
    assert!(!receipt.is_duplicate);
    assert!(!receipt.is_pending());
    assert_eq!(receipt.amount, PLAN_PRICE);

    let wallet = h.wallet(USER).await;
    assert_eq!(wallet.balance, 75_000);
    assert_eq!(wallet.total_spent, PLAN_PRICE);
    assert!(wallet.is_balanced());

    let tx = h.store.find_transaction(receipt.transaction_id).await.unwrap().unwrap();
    assert_eq!(tx.platform_commission, PLAN_COMMISSION);
    assert_eq!(tx.agent_profit, PLAN_PRICE - PLAN_COMMISSION);
    assert_eq!(tx.phone_number.as_deref(), Some("08031234567"));

    let commission = h.store.find_commission(tx.id).await.unwrap().unwrap();
    assert_eq!(commission.amount, PLAN_COMMISSION);
    assert_eq!(commission.status, CommissionStatus::Pending);

    assert_eq!(h.delivery.purchase_calls(), 1);
    assert_eq!(h.delivery.requery_calls(), 0);
}

#[tokio::test]
async fn replayed_idempotency_key_returns_original() {
    let h = Harness::new().await;
    h.fund(USER, 100_000).await;

    let first = h
        .state
        .orchestrator
        .purchase_data(USER, data_request(Some("order-42")))
        .await
        .unwrap();
    let second = h
        .state
        .orchestrator
        .purchase_data(USER, data_request(Some("order-42")))
        .await
        .unwrap();

    assert!(second.is_duplicate);
    assert_eq!(first.transaction_id, second.transaction_id);
    assert_eq!(h.delivery.purchase_calls(), 1);
    assert_eq!(h.wallet(USER).await.balance, 75_000);
    assert_eq!(h.store.transactions_for(USER).await.len(), 1);
}

#[tokio::test]
async fn concurrent_requests_with_one_key_charge_once() {
    let h = Harness::new().await;
    h.fund(USER, 100_000).await;
    let orchestrator = Arc::clone(&h.state.orchestrator);

    let (a, b) = tokio::join!(
        orchestrator.purchase_data(USER, data_request(Some("same-key"))),
        orchestrator.purchase_data(USER, data_request(Some("same-key"))),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.transaction_id, b.transaction_id);
    assert!(a.is_duplicate || b.is_duplicate);
    assert_eq!(h.store.transactions_for(USER).await.len(), 1);
    assert_eq!(h.delivery.purchase_calls(), 1);
    assert_eq!(h.wallet(USER).await.balance, 75_000);
}

#[tokio::test]
async fn idempotency_key_from_another_user_is_rejected() {
    let h = Harness::new().await;
    h.fund(USER, 100_000).await;
    h.fund("user-2", 100_000).await;

    h.state
        .orchestrator
        .purchase_data(USER, data_request(Some("shared")))
        .await
        .unwrap();
    let err = h
        .state
        .orchestrator
        .purchase_data("user-2", data_request(Some("shared")))
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), ErrorCode::ValidationError);
    assert_eq!(h.wallet("user-2").await.balance, 100_000);
}

#[tokio::test]
async fn hard_failure_refunds_the_wallet() {
    let h = Harness::new().await;
    h.fund(USER, 100_000).await;
    let mut failed = reply("failed");
    failed.message = Some("Invalid number".to_string());
    h.delivery.on_purchase(Ok(failed));

    let err = h
        .state
        .orchestrator
        .purchase_data(USER, data_request(None))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::DeliveryFailed);
    assert_eq!(err.status_code(), 502);

    let tx = h.store.transactions_for(USER).await.remove(0);
    assert_eq!(tx.status, TransactionStatus::Failed);
    assert_eq!(tx.provider_status, ProviderStatus::Failed);
    assert_eq!(tx.error_message.as_deref(), Some("Invalid number (Refunded)"));

    let wallet = h.wallet(USER).await;
    assert_eq!(wallet.balance, 100_000);
    assert_eq!(wallet.total_refunded, PLAN_PRICE);
    assert!(wallet.is_balanced());
    assert_eq!(h.store.refund_count().await, 1);
    assert!(h.store.find_refund(tx.id).await.unwrap().is_some());
    assert!(h.store.find_commission(tx.id).await.unwrap().is_none());
}

#[tokio::test]
async fn timeout_is_requeried_once_and_adopts_the_answer() {
    let h = Harness::new().await;
    h.fund(USER, 100_000).await;
    h.delivery.on_purchase(Err(timeout()));
    h.delivery.on_requery(Ok(reply("delivered")));

    let receipt = h
        .state
        .orchestrator
        .purchase_data(USER, data_request(None))
        .await
        .unwrap();

    assert_eq!(receipt.status, TransactionStatus::Success);
    assert_eq!(receipt.provider_status, ProviderStatus::Delivered);
    assert_eq!(h.delivery.purchase_calls(), 1);
    assert_eq!(h.delivery.requery_calls(), 1);
    assert_eq!(h.wallet(USER).await.balance, 75_000);
}

#[tokio::test]
async fn unresolved_delivery_is_parked_without_refund() {
    let h = Harness::new().await;
    h.fund(USER, 100_000).await;
    h.delivery.on_purchase(Ok(reply("pending")));
    h.delivery.on_requery(Err(timeout()));

    let receipt = h
        .state
        .orchestrator
        .purchase_data(USER, data_request(None))
        .await
        .unwrap();

    assert!(receipt.is_pending());
    assert_eq!(receipt.status, TransactionStatus::Success);
    assert_eq!(receipt.provider_status, ProviderStatus::Pending);
    assert_eq!(h.delivery.requery_calls(), 1);
    assert_eq!(h.store.refund_count().await, 0);
    assert_eq!(h.wallet(USER).await.balance, 75_000);
}

#[tokio::test]
async fn duplicate_report_parks_for_reconciliation() {
    let h = Harness::new().await;
    h.fund(USER, 100_000).await;
    h.delivery.on_purchase(Ok(reply("duplicate")));

    let err = h
        .state
        .orchestrator
        .purchase_data(USER, data_request(None))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::DuplicateProviderRequest);
    assert_eq!(err.status_code(), 409);

    let tx = h.store.transactions_for(USER).await.remove(0);
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert_eq!(tx.provider_status, ProviderStatus::Retry);
    assert_eq!(h.store.refund_count().await, 0);
    assert_eq!(h.wallet(USER).await.balance, 75_000);
    assert_eq!(h.delivery.requery_calls(), 0);
}

#[tokio::test]
async fn rejected_credentials_refund_and_surface_as_unauthorized() {
    let h = Harness::new().await;
    h.fund(USER, 100_000).await;
    h.delivery.on_purchase(Err(DeliveryError::Auth {
        provider: "vtpass".to_string(),
        message: "invalid api key".to_string(),
    }));

    let err = h
        .state
        .orchestrator
        .purchase_data(USER, data_request(None))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);

    let tx = h.store.transactions_for(USER).await.remove(0);
    assert_eq!(tx.status, TransactionStatus::Failed);
    assert_eq!(h.wallet(USER).await.balance, 100_000);
    assert_eq!(h.delivery.requery_calls(), 0);
}

#[tokio::test]
async fn purchases_rejected_for_credentials_are_not_retried() {
    let h = Harness::new().await;
    h.fund(USER, 100_000).await;
    h.delivery.on_purchase(Err(DeliveryError::Auth {
        provider: "vtpass".to_string(),
        message: "invalid api key".to_string(),
    }));
    let _ = h
        .state
        .orchestrator
        .purchase_data(USER, data_request(None))
        .await
        .unwrap_err();
    let tx = h.store.transactions_for(USER).await.remove(0);
    let calls = h.delivery.purchase_calls();

    let err = h
        .state
        .orchestrator
        .retry_transaction(USER, tx.id)
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), ErrorCode::TransactionNotRetryable);
    assert_eq!(h.delivery.purchase_calls(), calls);
    assert_eq!(h.store.transactions_for(USER).await.len(), 1);
    assert_eq!(h.wallet(USER).await.balance, 100_000);
}

#[tokio::test]
async fn failed_refund_leaves_the_purchase_open_until_settled() {
    let h = Harness::new().await;
    h.fund(USER, 100_000).await;
    h.delivery.on_purchase(Ok(reply("failed")));
    h.store.inject_fault(Fault::Refund).await;

    let err = h
        .state
        .orchestrator
        .purchase_data(USER, data_request(None))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 500);

    // Neither the failure nor the refund was written
    let tx = h.store.transactions_for(USER).await.remove(0);
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert_eq!(tx.provider_status, ProviderStatus::Pending);
    assert_eq!(h.store.refund_count().await, 0);
    assert_eq!(h.wallet(USER).await.balance, 75_000);

    // A later requery settles it once the store is back
    h.store.clear_fault(Fault::Refund).await;
    h.delivery.on_requery(Ok(reply("failed")));
    let err = h
        .state
        .orchestrator
        .retry_transaction(USER, tx.id)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::DeliveryFailed);
    assert!(err.user_message().ends_with("(Refunded)"));

    let tx = h.store.find_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Failed);
    assert_eq!(h.store.refund_count().await, 1);
    let wallet = h.wallet(USER).await;
    assert_eq!(wallet.balance, 100_000);
    assert!(wallet.is_balanced());
}

#[tokio::test]
async fn insufficient_balance_never_reaches_the_provider() {
    let h = Harness::new().await;
    h.fund(USER, 10_000).await;

    let err = h
        .state
        .orchestrator
        .purchase_data(USER, data_request(None))
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), ErrorCode::InsufficientBalance);
    assert_eq!(h.delivery.purchase_calls(), 0);
    let tx = h.store.transactions_for(USER).await.remove(0);
    assert_eq!(tx.status, TransactionStatus::Failed);
    assert_eq!(tx.provider_status, ProviderStatus::Pending);
    assert_eq!(h.wallet(USER).await.balance, 10_000);
}

#[tokio::test]
async fn airtime_outside_limits_is_rejected_before_any_write() {
    let h = Harness::new().await;
    h.fund(USER, 100_000).await;

    let request: AirtimePurchaseRequest = serde_json::from_value(serde_json::json!({
        "network_id": 1,
        "amount": 100,
        "phone": "08031234567"
    }))
    .unwrap();
    let err = h
        .state
        .orchestrator
        .purchase_airtime(USER, request)
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 400);
    assert!(h.store.transactions_for(USER).await.is_empty());
}

#[tokio::test]
async fn airtime_purchase_charges_face_value() {
    let h = Harness::new().await;
    h.fund(USER, 100_000).await;

    let request: AirtimePurchaseRequest = serde_json::from_value(serde_json::json!({
        "network_id": 3,
        "amount": 50_000,
        "phone": "+2349031234567"
    }))
    .unwrap();
    let receipt = h
        .state
        .orchestrator
        .purchase_airtime(USER, request)
        .await
        .unwrap();

    assert_eq!(receipt.status, TransactionStatus::Success);
    assert_eq!(h.wallet(USER).await.balance, 50_000);
    let tx = h.store.find_transaction(receipt.transaction_id).await.unwrap().unwrap();
    assert_eq!(tx.platform_commission, 5_000);
}

#[tokio::test]
async fn balance_identity_holds_across_mixed_outcomes() {
    let h = Harness::new().await;
    h.fund(USER, 200_000).await;
    h.delivery.on_purchase(Ok(reply("delivered")));
    h.delivery.on_purchase(Ok(reply("failed")));
    h.delivery.on_purchase(Ok(reply("pending")));
    h.delivery.on_requery(Ok(reply("pending")));
    h.delivery.on_purchase(Err(timeout()));
    h.delivery.on_requery(Ok(reply("failed")));

    for _ in 0..4 {
        let _ = h
            .state
            .orchestrator
            .purchase_data(USER, data_request(None))
            .await;
    }

    let wallet = h.wallet(USER).await;
    assert!(wallet.is_balanced());
    // delivered + parked stay spent; the two failures are refunded
    assert_eq!(wallet.balance, 200_000 - 2 * PLAN_PRICE);
    assert_eq!(wallet.total_refunded, 2 * PLAN_PRICE);
    assert_eq!(h.store.refund_count().await, 2);
}
