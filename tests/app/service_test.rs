// Wallet Service Tests
// End-to-end flows through the service: gateway initiation, callbacks, refunds

use gigwallet::app::{Config, RetryPolicy, ServiceError, WalletService};
use gigwallet::commission::Rejection;
use gigwallet::gateway::{GatewayError, Gateways, MockGateway, VerifiedCallback};
use gigwallet::ledger::{Confirmation, LedgerError, TransactionStatus};
use gigwallet::primitives::{Currency, ExternalRef, IdempotencyKey, Rail, UserId};
use gigwallet::reconciliation::CallbackOutcome;
use gigwallet::settings::{
    AdminCaller, CommissionSettings, CurrencyLimitsPatch, SettingsPatch,
};
use gigwallet::storage::{CommitRejection, LedgerStore};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn config() -> Config {
    let mut config = Config::default();
    config.settings.initial = CommissionSettings::default()
        .with_percentage(dec!(2))
        .with_on_deposits(true);
    config.retry = RetryPolicy::new().with_initial_backoff(Duration::from_millis(1));
    config
}

fn service(gateways: Gateways) -> WalletService {
    let store = Arc::new(LedgerStore::temporary().unwrap());
    WalletService::with_store(store, config(), gateways).unwrap()
}

fn user(name: &str) -> UserId {
    UserId::new(name).unwrap()
}

async fn fund(service: &WalletService, owner: &UserId, currency: Currency, amount: Decimal) {
    let ledger = service.ledger();
    let tx = ledger
        .deposit(owner, currency, amount, None, IdempotencyKey::generate())
        .await
        .unwrap();
    ledger.settle_deposit(tx.id(), &Confirmation::new()).await.unwrap();
}

// ============================================================================
// DEPOSITS
// ============================================================================

#[tokio::test]
async fn test_deposit_flow_from_request_to_callback() {
    let card = Arc::new(MockGateway::new(Rail::CardUpi));
    let service = service(Gateways::new().with_adapter(card.clone()));
    let alice = user("alice");

    let quote = service.quote_deposit(dec!(1000), Currency::Inr).unwrap();
    let receipt = service
        .request_deposit(&alice, Currency::Inr, dec!(1000), IdempotencyKey::generate())
        .await
        .unwrap();

    let payment = receipt.payment.unwrap();
    let tx = receipt.transaction;
    assert_eq!(tx.commission_amount(), quote.commission);
    assert_eq!(tx.total_payable(), quote.total_payable);
    assert_eq!(tx.external_reference(), Some(&payment.external_ref));
    assert!(payment.redirect_or_address.starts_with("https://"));

    let callback = card
        .callback(
            &VerifiedCallback::succeeded(payment.external_ref.clone())
                .with_confirmed_amount(dec!(1020)),
        )
        .unwrap();
    let outcome = service.handle_callback(Rail::CardUpi, &callback).await.unwrap();

    assert!(matches!(outcome, CallbackOutcome::Settled(_)));
    assert_eq!(service.balance(&alice, Currency::Inr).unwrap(), dec!(1000));
    assert_eq!(service.revenue(Currency::Inr).unwrap(), dec!(20));
}

#[tokio::test]
async fn test_repeated_deposit_request_initiates_once() {
    let card = Arc::new(MockGateway::new(Rail::CardUpi));
    let service = service(Gateways::new().with_adapter(card.clone()));
    let key = IdempotencyKey::new("topup-1").unwrap();

    let first = service
        .request_deposit(&user("alice"), Currency::Inr, dec!(50), key.clone())
        .await
        .unwrap();
    let second = service
        .request_deposit(&user("alice"), Currency::Inr, dec!(50), key)
        .await
        .unwrap();

    assert!(first.payment.is_some());
    assert!(second.payment.is_none());
    assert_eq!(first.transaction.id(), second.transaction.id());
    assert_eq!(card.initiate_calls(), 1);
}

#[tokio::test]
async fn test_gateway_refusal_fails_deposit() {
    let card = Arc::new(
        MockGateway::new(Rail::CardUpi)
            .with_failure(GatewayError::InitiationFailed("merchant blocked".to_string())),
    );
    let service = service(Gateways::new().with_adapter(card));
    let key = IdempotencyKey::generate();

    let result = service
        .request_deposit(&user("alice"), Currency::Inr, dec!(10), key.clone())
        .await;

    assert!(matches!(
        result,
        Err(ServiceError::Gateway(GatewayError::InitiationFailed(_)))
    ));
    let tx = service
        .ledger()
        .transaction_by_idempotency_key(&key)
        .unwrap()
        .unwrap();
    assert_eq!(tx.status(), TransactionStatus::Failed);
    assert!(tx.failure_reason().unwrap().contains("merchant blocked"));
}

#[tokio::test]
async fn test_unrecordable_reference_surfaces_error_and_leaves_deposit_unbound() {
    let reused = ExternalRef::new("upi_reused").unwrap();
    let card = Arc::new(MockGateway::new(Rail::CardUpi).with_fixed_reference(reused.clone()));
    let service = service(Gateways::new().with_adapter(card.clone()));

    let first = service
        .request_deposit(&user("alice"), Currency::Inr, dec!(100), IdempotencyKey::generate())
        .await
        .unwrap();
    assert_eq!(first.transaction.external_reference(), Some(&reused));

    let key = IdempotencyKey::generate();
    let result = service
        .request_deposit(&user("bob"), Currency::Inr, dec!(100), key.clone())
        .await;

    assert!(matches!(
        result,
        Err(ServiceError::Ledger(LedgerError::Conflict(
            CommitRejection::DuplicateExternalRef { .. }
        )))
    ));
    let orphan = service
        .ledger()
        .transaction_by_idempotency_key(&key)
        .unwrap()
        .unwrap();
    assert_eq!(orphan.status(), TransactionStatus::Pending);
    assert_eq!(orphan.external_reference(), None);
    assert_eq!(card.initiate_calls(), 2);
}

#[tokio::test]
async fn test_transient_gateway_outage_is_retried() {
    let card = Arc::new(MockGateway::new(Rail::CardUpi).with_failures_then_success(2));
    let service = service(Gateways::new().with_adapter(card.clone()));

    let receipt = service
        .request_deposit(&user("alice"), Currency::Inr, dec!(10), IdempotencyKey::generate())
        .await
        .unwrap();

    assert_eq!(card.initiate_calls(), 3);
    assert_eq!(receipt.transaction.status(), TransactionStatus::Pending);
}

#[tokio::test]
async fn test_missing_gateway_fails_deposit() {
    let service = service(Gateways::new());
    let key = IdempotencyKey::generate();

    let result = service
        .request_deposit(&user("alice"), Currency::Usd, dec!(10), key.clone())
        .await;

    assert!(matches!(
        result,
        Err(ServiceError::Gateway(GatewayError::NoAdapter(Rail::PayPal)))
    ));
    let tx = service.ledger().transaction_by_idempotency_key(&key).unwrap().unwrap();
    assert_eq!(tx.status(), TransactionStatus::Failed);
}

#[tokio::test]
async fn test_disabled_wallet_never_reaches_gateway() {
    let card = Arc::new(MockGateway::new(Rail::CardUpi));
    let service = service(Gateways::new().with_adapter(card.clone()));
    service
        .settings()
        .set(
            &AdminCaller::verified(user("admin")),
            &SettingsPatch::new().with_currency(
                Currency::Inr,
                CurrencyLimitsPatch::new().with_wallet_enabled(false),
            ),
        )
        .await
        .unwrap();

    let result = service
        .request_deposit(&user("alice"), Currency::Inr, dec!(10), IdempotencyKey::generate())
        .await;

    assert!(matches!(
        result,
        Err(ServiceError::Ledger(LedgerError::Validation(Rejection::WalletDisabled(
            Currency::Inr
        ))))
    ));
    assert_eq!(card.initiate_calls(), 0);
}

// ============================================================================
// WITHDRAWALS AND TRANSFERS
// ============================================================================

#[tokio::test]
async fn test_withdrawal_completes_on_callback() {
    let paypal = Arc::new(MockGateway::new(Rail::PayPal));
    let service = service(Gateways::new().with_adapter(paypal.clone()));
    let alice = user("alice");
    fund(&service, &alice, Currency::Usd, dec!(100)).await;

    let tx = service
        .request_withdrawal(&alice, Currency::Usd, dec!(60), IdempotencyKey::generate())
        .await
        .unwrap();
    assert_eq!(service.balance(&alice, Currency::Usd).unwrap(), dec!(40));

    let reference = tx.external_reference().unwrap().clone();
    let callback = paypal.callback(&VerifiedCallback::succeeded(reference)).unwrap();
    let outcome = service.handle_callback(Rail::PayPal, &callback).await.unwrap();

    let CallbackOutcome::Settled(completed) = outcome else {
        panic!("expected settlement, got {:?}", outcome);
    };
    assert_eq!(completed.id(), tx.id());
    assert_eq!(service.balance(&alice, Currency::Usd).unwrap(), dec!(40));
}

#[tokio::test]
async fn test_refused_payout_restores_balance() {
    let paypal = Arc::new(MockGateway::new(Rail::PayPal).with_failure(GatewayError::Timeout));
    let service = service(Gateways::new().with_adapter(paypal.clone()));
    let alice = user("alice");
    fund(&service, &alice, Currency::Usd, dec!(100)).await;
    let key = IdempotencyKey::generate();

    let result = service
        .request_withdrawal(&alice, Currency::Usd, dec!(60), key.clone())
        .await;

    assert!(matches!(result, Err(ServiceError::Gateway(GatewayError::Timeout))));
    // Timeouts are retried before giving up
    assert_eq!(paypal.initiate_calls(), 3);
    assert_eq!(service.balance(&alice, Currency::Usd).unwrap(), dec!(100));
    let tx = service.ledger().transaction_by_idempotency_key(&key).unwrap().unwrap();
    assert_eq!(tx.status(), TransactionStatus::Failed);
}

#[tokio::test]
async fn test_transfer_through_service() {
    let service = service(Gateways::new());
    let (a, b) = (user("a"), user("b"));
    fund(&service, &a, Currency::Inr, dec!(10)).await;

    let quote = service.quote_transfer(dec!(4), Currency::Inr).unwrap();
    let (out, incoming) = service
        .transfer(&a, &b, dec!(4), Currency::Inr, IdempotencyKey::generate())
        .await
        .unwrap();

    assert_eq!(incoming.net_amount(), quote.net_to_recipient);
    assert_eq!(out.commission_amount(), quote.commission);
    assert_eq!(service.balance(&a, Currency::Inr).unwrap(), dec!(6));
    assert_eq!(service.balance(&b, Currency::Inr).unwrap(), dec!(4));
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let mut config = config();
    config.storage.data_dir = dir.path().to_path_buf();
    let alice = user("alice");

    {
        let service = WalletService::open(config.clone(), Gateways::new()).unwrap();
        fund(&service, &alice, Currency::Usdt, dec!(3.5)).await;
        service
            .settings()
            .set(
                &AdminCaller::verified(user("admin")),
                &SettingsPatch::new().with_percentage("4"),
            )
            .await
            .unwrap();
        service.flush().unwrap();
    }

    let service = WalletService::open(config, Gateways::new()).unwrap();
    assert_eq!(service.balance(&alice, Currency::Usdt).unwrap(), dec!(3.5));
    assert_eq!(service.settings().get().percentage, dec!(4));
}

#[tokio::test]
async fn test_background_tasks_stop_on_shutdown() {
    let service = service(Gateways::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handles = service.spawn_background(shutdown_rx);
    assert_eq!(handles.len(), 2);

    shutdown_tx.send(true).unwrap();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
