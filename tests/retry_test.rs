mod common;

use common::*;
use vtu_backend::config::PurchaseConfig;
use vtu_backend::database::transaction_repository::{
    PaymentMethod, ProviderStatus, TransactionRepository, TransactionStatus,
};
use vtu_backend::error::ErrorCode;
use vtu_backend::services::funding::FundWalletRequest;

#[tokio::test]
async fn failed_purchase_is_retried_as_a_linked_transaction() {
    let h = Harness::new().await;
    h.fund(USER, 100_000).await;
    h.delivery.on_purchase(Ok(reply("failed")));
    let _ = h
        .state
        .orchestrator
        .purchase_data(USER, data_request(None))
        .await
        .unwrap_err();
    let original = h.store.transactions_for(USER).await.remove(0);

    let receipt = h
        .state
        .orchestrator
        .retry_transaction(USER, original.id)
        .await
        .unwrap();

    assert_ne!(receipt.transaction_id, original.id);
    assert_eq!(receipt.status, TransactionStatus::Success);
    assert_eq!(receipt.provider_status, ProviderStatus::Delivered);

    let retry = h.store.find_transaction(receipt.transaction_id).await.unwrap().unwrap();
    assert_eq!(retry.retry_of, Some(original.id));
    assert_eq!(retry.retry_count, 1);
    assert_eq!(retry.payment_method, PaymentMethod::Wallet);
    assert_eq!(retry.plan_id, original.plan_id);

    let original = h.store.find_transaction(original.id).await.unwrap().unwrap();
    assert_eq!(original.retry_count, 1);
    assert_eq!(original.status, TransactionStatus::Failed);

    let wallet = h.wallet(USER).await;
    assert_eq!(wallet.balance, 75_000);
    assert!(wallet.is_balanced());
}

#[tokio::test]
async fn retries_stop_at_the_configured_maximum() {
    let h = Harness::with_config(PurchaseConfig {
        max_retries: 2,
        ..PurchaseConfig::default()
    })
    .await;
    h.fund(USER, 100_000).await;
    for _ in 0..3 {
        h.delivery.on_purchase(Ok(reply("failed")));
    }
    let _ = h
        .state
        .orchestrator
        .purchase_data(USER, data_request(None))
        .await;
    let original = h.store.transactions_for(USER).await.remove(0);

    for _ in 0..2 {
        let err = h
            .state
            .orchestrator
            .retry_transaction(USER, original.id)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::DeliveryFailed);
    }
    let err = h
        .state
        .orchestrator
        .retry_transaction(USER, original.id)
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), ErrorCode::MaxRetriesExceeded);
    assert_eq!(h.delivery.purchase_calls(), 3);
    assert_eq!(h.store.transactions_for(USER).await.len(), 3);
    let wallet = h.wallet(USER).await;
    assert_eq!(wallet.balance, 100_000);
    assert!(wallet.is_balanced());
}

#[tokio::test]
async fn retrying_a_retry_counts_against_the_original() {
    let h = Harness::with_config(PurchaseConfig {
        max_retries: 1,
        ..PurchaseConfig::default()
    })
    .await;
    h.fund(USER, 100_000).await;
    h.delivery.on_purchase(Ok(reply("failed")));
    h.delivery.on_purchase(Ok(reply("failed")));
    let _ = h
        .state
        .orchestrator
        .purchase_data(USER, data_request(None))
        .await;
    let original = h.store.transactions_for(USER).await.remove(0);
    let _ = h
        .state
        .orchestrator
        .retry_transaction(USER, original.id)
        .await;
    let retry = h
        .store
        .transactions_for(USER)
        .await
        .into_iter()
        .find(|t| t.retry_of == Some(original.id))
        .unwrap();

    let err = h
        .state
        .orchestrator
        .retry_transaction(USER, retry.id)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::MaxRetriesExceeded);
}

#[tokio::test]
async fn parked_purchase_retry_requeries_in_place() {
    let h = Harness::new().await;
    h.fund(USER, 100_000).await;
    h.delivery.on_purchase(Ok(reply("pending")));
    h.delivery.on_requery(Ok(reply("pending")));
    let receipt = h
        .state
        .orchestrator
        .purchase_data(USER, data_request(None))
        .await
        .unwrap();
    h.delivery.on_requery(Ok(reply("delivered")));

    let retried = h
        .state
        .orchestrator
        .retry_transaction(USER, receipt.transaction_id)
        .await
        .unwrap();

    assert_eq!(retried.transaction_id, receipt.transaction_id);
    assert_eq!(retried.provider_status, ProviderStatus::Delivered);
    assert_eq!(h.delivery.purchase_calls(), 1);
    assert_eq!(h.delivery.requery_calls(), 2);
    assert_eq!(h.wallet(USER).await.balance, 75_000);

    let tx = h.store.find_transaction(receipt.transaction_id).await.unwrap().unwrap();
    assert_eq!(tx.retry_count, 1);
}

#[tokio::test]
async fn delivered_and_funding_transactions_are_not_retryable() {
    let h = Harness::new().await;
    h.fund(USER, 100_000).await;
    let delivered = h
        .state
        .orchestrator
        .purchase_data(USER, data_request(None))
        .await
        .unwrap();

    let err = h
        .state
        .orchestrator
        .retry_transaction(USER, delivered.transaction_id)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::TransactionNotRetryable);

    let checkout = h
        .state
        .funding
        .initialize_funding(
            USER,
            FundWalletRequest {
                email: "ada@example.com".to_string(),
                amount: 10_000,
                callback_url: None,
            },
        )
        .await
        .unwrap();
    let err = h
        .state
        .orchestrator
        .retry_transaction(USER, checkout.transaction_id)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::TransactionNotRetryable);
}

#[tokio::test]
async fn other_users_transactions_are_invisible() {
    let h = Harness::new().await;
    h.fund(USER, 100_000).await;
    let receipt = h
        .state
        .orchestrator
        .purchase_data(USER, data_request(None))
        .await
        .unwrap();

    let err = h
        .state
        .orchestrator
        .retry_transaction("intruder", receipt.transaction_id)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::TransactionNotFound);
}

#[tokio::test]
async fn delivered_retry_closes_the_purchase_to_further_retries() {
    let h = Harness::new().await;
    h.fund(USER, 100_000).await;
    h.delivery.on_purchase(Ok(reply("failed")));
    let _ = h
        .state
        .orchestrator
        .purchase_data(USER, data_request(None))
        .await
        .unwrap_err();
    let original = h.store.transactions_for(USER).await.remove(0);

    h.state
        .orchestrator
        .retry_transaction(USER, original.id)
        .await
        .unwrap();
    let err = h
        .state
        .orchestrator
        .retry_transaction(USER, original.id)
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), ErrorCode::TransactionNotRetryable);
    assert_eq!(h.delivery.purchase_calls(), 2);
    assert_eq!(h.store.transactions_for(USER).await.len(), 2);
    assert_eq!(h.wallet(USER).await.balance, 75_000);
}

#[tokio::test]
async fn concurrent_retries_deliver_once() {
    let h = Harness::new().await;
    h.fund(USER, 100_000).await;
    h.delivery.on_purchase(Ok(reply("failed")));
    let _ = h
        .state
        .orchestrator
        .purchase_data(USER, data_request(None))
        .await
        .unwrap_err();
    let original = h.store.transactions_for(USER).await.remove(0);

    let orchestrator = &h.state.orchestrator;
    let (first, second) = tokio::join!(
        orchestrator.retry_transaction(USER, original.id),
        orchestrator.retry_transaction(USER, original.id),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let refused = results
        .iter()
        .find_map(|r| r.as_ref().err())
        .expect("one retry refused");
    assert_eq!(refused.error_code(), ErrorCode::TransactionNotRetryable);

    assert_eq!(h.delivery.purchase_calls(), 2);
    let wallet = h.wallet(USER).await;
    assert_eq!(wallet.balance, 75_000);
    assert!(wallet.is_balanced());
}
