// Deposit Tests
// Pending deposits, settlement, commission accrual and idempotency

use gigwallet::ledger::{Confirmation, Ledger, LedgerError, TransactionKind, TransactionStatus};
use gigwallet::primitives::{AccountOwner, Currency, ExternalRef, IdempotencyKey, UserId};
use gigwallet::settings::{
    AdminCaller, CommissionSettings, CurrencyLimits, CurrencyLimitsPatch, SettingsPatch,
    SettingsStore,
};
use gigwallet::commission::Rejection;
use gigwallet::storage::LedgerStore;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn setup(settings: CommissionSettings) -> (Arc<SettingsStore>, Ledger) {
    let store = Arc::new(LedgerStore::temporary().unwrap());
    let settings = Arc::new(SettingsStore::open(store.clone(), settings).unwrap());
    let ledger = Ledger::new(store, settings.subscribe());
    (settings, ledger)
}

fn two_percent_on_deposits() -> CommissionSettings {
    CommissionSettings::default()
        .with_percentage(dec!(2))
        .with_on_deposits(true)
}

fn user(name: &str) -> UserId {
    UserId::new(name).unwrap()
}

fn reference(value: &str) -> ExternalRef {
    ExternalRef::new(value).unwrap()
}

fn admin() -> AdminCaller {
    AdminCaller::verified(user("admin"))
}

// ============================================================================
// SETTLEMENT
// ============================================================================

#[tokio::test]
async fn test_inr_deposit_with_two_percent_commission() {
    let (_, ledger) = setup(two_percent_on_deposits());
    let alice = user("alice");

    let tx = ledger
        .deposit(&alice, Currency::Inr, dec!(1000), Some(reference("upi_1")), IdempotencyKey::generate())
        .await
        .unwrap();
    assert_eq!(tx.commission_amount(), dec!(20));
    assert_eq!(tx.total_payable(), dec!(1020));
    assert_eq!(tx.status(), TransactionStatus::Pending);

    let settled = ledger
        .settle_deposit(
            tx.id(),
            &Confirmation::new()
                .with_external_ref(reference("upi_1"))
                .with_confirmed_amount(dec!(1020)),
        )
        .await
        .unwrap();

    assert_eq!(settled.status(), TransactionStatus::Completed);
    assert!(settled.settled_at().is_some());
    assert_eq!(ledger.balance(&alice.clone().into(), Currency::Inr).unwrap(), dec!(1000));
    assert_eq!(ledger.balance(&AccountOwner::Platform, Currency::Inr).unwrap(), dec!(20));

    let revenue: Vec<_> = ledger
        .history(&AccountOwner::Platform, Currency::Inr)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(revenue.len(), 1);
    assert_eq!(revenue[0].kind(), TransactionKind::CommissionEarning);
    assert_eq!(revenue[0].net_amount(), dec!(20));
    assert_eq!(revenue[0].related(), Some(tx.id()));
}

#[tokio::test]
async fn test_duplicate_settlement_credits_once() {
    let (_, ledger) = setup(two_percent_on_deposits());
    let alice = user("alice");
    let tx = ledger
        .deposit(&alice, Currency::Usd, dec!(50), None, IdempotencyKey::generate())
        .await
        .unwrap();

    for _ in 0..3 {
        let settled = ledger.settle_deposit(tx.id(), &Confirmation::new()).await.unwrap();
        assert_eq!(settled.status(), TransactionStatus::Completed);
    }

    assert_eq!(ledger.balance(&alice.into(), Currency::Usd).unwrap(), dec!(50));
    assert_eq!(ledger.balance(&AccountOwner::Platform, Currency::Usd).unwrap(), dec!(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_settlements_credit_once() {
    let (_, ledger) = setup(two_percent_on_deposits());
    let ledger = Arc::new(ledger);
    let alice = user("alice");
    let tx = ledger
        .deposit(&alice, Currency::Inr, dec!(100), None, IdempotencyKey::generate())
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let ledger = ledger.clone();
        let id = tx.id();
        tasks.push(tokio::spawn(async move {
            ledger.settle_deposit(id, &Confirmation::new()).await
        }));
    }
    for task in tasks {
        let settled = task.await.unwrap().unwrap();
        assert_eq!(settled.status(), TransactionStatus::Completed);
    }

    assert_eq!(ledger.balance(&alice.into(), Currency::Inr).unwrap(), dec!(100));
    assert_eq!(ledger.balance(&AccountOwner::Platform, Currency::Inr).unwrap(), dec!(2));
}

#[tokio::test]
async fn test_underpaid_settlement_is_rejected() {
    let (_, ledger) = setup(two_percent_on_deposits());
    let tx = ledger
        .deposit(&user("alice"), Currency::Inr, dec!(1000), None, IdempotencyKey::generate())
        .await
        .unwrap();

    let result = ledger
        .settle_deposit(tx.id(), &Confirmation::new().with_confirmed_amount(dec!(1000)))
        .await;

    assert!(matches!(
        result,
        Err(LedgerError::Underpaid { required, received, .. })
            if required == dec!(1020) && received == dec!(1000)
    ));
    assert_eq!(
        ledger.transaction(tx.id()).unwrap().unwrap().status(),
        TransactionStatus::Pending
    );
}

#[tokio::test]
async fn test_mismatched_reference_is_rejected() {
    let (_, ledger) = setup(CommissionSettings::default());
    let tx = ledger
        .deposit(&user("alice"), Currency::Inr, dec!(10), Some(reference("upi_a")), IdempotencyKey::generate())
        .await
        .unwrap();

    let result = ledger
        .settle_deposit(tx.id(), &Confirmation::new().with_external_ref(reference("upi_b")))
        .await;
    assert!(matches!(result, Err(LedgerError::ExternalRefMismatch { .. })));
}

#[tokio::test]
async fn test_failed_deposit_cannot_settle() {
    let (_, ledger) = setup(CommissionSettings::default());
    let alice = user("alice");
    let tx = ledger
        .deposit(&alice, Currency::Inr, dec!(10), None, IdempotencyKey::generate())
        .await
        .unwrap();

    let failed = ledger.fail_transaction(tx.id(), "card declined").await.unwrap();
    assert_eq!(failed.failure_reason(), Some("card declined"));

    assert!(matches!(
        ledger.settle_deposit(tx.id(), &Confirmation::new()).await,
        Err(LedgerError::InvalidTransition { .. })
    ));
    assert_eq!(ledger.balance(&alice.into(), Currency::Inr).unwrap(), Decimal::ZERO);
}

// ============================================================================
// VALIDATION AND SETTINGS
// ============================================================================

#[tokio::test]
async fn test_disabled_currency_rejects_before_any_transaction() {
    let settings = CommissionSettings::default().with_limits(
        Currency::Usd,
        CurrencyLimits::default().with_wallet_enabled(false),
    );
    let (_, ledger) = setup(settings);
    let key = IdempotencyKey::generate();

    let result = ledger
        .deposit(&user("alice"), Currency::Usd, dec!(10), None, key.clone())
        .await;

    assert!(matches!(
        result,
        Err(LedgerError::Validation(Rejection::WalletDisabled(Currency::Usd)))
    ));
    assert!(ledger.transaction_by_idempotency_key(&key).unwrap().is_none());
}

#[tokio::test]
async fn test_deposit_below_minimum_is_rejected() {
    let settings = CommissionSettings::default().with_limits(
        Currency::Inr,
        CurrencyLimits::default().with_deposit_range(dec!(100), dec!(10000)),
    );
    let (_, ledger) = setup(settings);

    let result = ledger
        .deposit(&user("alice"), Currency::Inr, dec!(99.99), None, IdempotencyKey::generate())
        .await;
    assert!(matches!(
        result,
        Err(LedgerError::Validation(Rejection::BelowMinimum { minimum, .. })) if minimum == dec!(100)
    ));
}

#[tokio::test]
async fn test_settings_change_does_not_alter_pending_deposit() {
    let (settings, ledger) = setup(two_percent_on_deposits());
    let alice = user("alice");
    let tx = ledger
        .deposit(&alice, Currency::Inr, dec!(500), None, IdempotencyKey::generate())
        .await
        .unwrap();

    settings
        .set(&admin(), &SettingsPatch::new().with_percentage("10"))
        .await
        .unwrap();

    let settled = ledger.settle_deposit(tx.id(), &Confirmation::new()).await.unwrap();
    assert_eq!(settled.commission_amount(), dec!(10));
    assert_eq!(settled.commission().percentage(), dec!(2));
    assert_eq!(ledger.balance(&AccountOwner::Platform, Currency::Inr).unwrap(), dec!(10));

    let next = ledger
        .deposit(&alice, Currency::Inr, dec!(500), None, IdempotencyKey::generate())
        .await
        .unwrap();
    assert_eq!(next.commission_amount(), dec!(50));
}

#[tokio::test]
async fn test_disabling_currency_blocks_new_deposits() {
    let (settings, ledger) = setup(CommissionSettings::default());
    settings
        .set(
            &admin(),
            &SettingsPatch::new().with_currency(
                Currency::Usdt,
                CurrencyLimitsPatch::new().with_wallet_enabled(false),
            ),
        )
        .await
        .unwrap();

    let result = ledger
        .deposit(&user("alice"), Currency::Usdt, dec!(1), None, IdempotencyKey::generate())
        .await;
    assert!(matches!(
        result,
        Err(LedgerError::Validation(Rejection::WalletDisabled(Currency::Usdt)))
    ));
}

// ============================================================================
// IDEMPOTENCY
// ============================================================================

#[tokio::test]
async fn test_repeated_deposit_request_returns_original() {
    let (_, ledger) = setup(two_percent_on_deposits());
    let alice = user("alice");
    let key = IdempotencyKey::new("checkout-42").unwrap();

    let first = ledger
        .deposit(&alice, Currency::Inr, dec!(100), None, key.clone())
        .await
        .unwrap();
    let second = ledger
        .deposit(&alice, Currency::Inr, dec!(100), None, key)
        .await
        .unwrap();

    assert_eq!(first.id(), second.id());
    let history: Vec<_> = ledger
        .history(&alice.into(), Currency::Inr)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_crypto_deposit_confirming_then_settled() {
    let settings = two_percent_on_deposits().with_crypto_decimals(6);
    let (_, ledger) = setup(settings);
    let alice = user("alice");
    let tx = ledger
        .deposit(&alice, Currency::Usdt, dec!(12.345678), None, IdempotencyKey::generate())
        .await
        .unwrap();
    assert_eq!(tx.commission_amount(), dec!(0.246914));

    let confirming = ledger.mark_confirming(tx.id(), 1).await.unwrap();
    assert_eq!(confirming.status(), TransactionStatus::Confirming);
    let confirming = ledger.mark_confirming(tx.id(), 2).await.unwrap();
    assert_eq!(confirming.confirmations(), 2);

    ledger
        .settle_deposit(tx.id(), &Confirmation::new().with_confirmations(3))
        .await
        .unwrap();
    assert_eq!(ledger.balance(&alice.into(), Currency::Usdt).unwrap(), dec!(12.345678));
    assert_eq!(
        ledger.balance(&AccountOwner::Platform, Currency::Usdt).unwrap(),
        dec!(0.246914)
    );
}
