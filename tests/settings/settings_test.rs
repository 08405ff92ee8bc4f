// Settings Tests
// Admin updates, validation and publication of commission settings

use gigwallet::primitives::{Currency, UserId};
use gigwallet::settings::{
    AdminCaller, CommissionSettings, CurrencyLimitsPatch, SettingsBackend, SettingsError,
    SettingsPatch, SettingsStore,
};
use gigwallet::storage::LedgerStore;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn admin() -> AdminCaller {
    AdminCaller::verified(UserId::new("ops-admin").unwrap())
}

fn open() -> (Arc<LedgerStore>, SettingsStore) {
    let backend = Arc::new(LedgerStore::temporary().unwrap());
    let store = SettingsStore::open(backend.clone(), CommissionSettings::default()).unwrap();
    (backend, store)
}

// ============================================================================
// SEEDING
// ============================================================================

#[test]
fn test_first_open_seeds_defaults() {
    let (backend, store) = open();
    let settings = store.get();

    assert_eq!(settings.version, 0);
    assert_eq!(settings.percentage, dec!(0));
    assert!(!settings.on_deposits);
    assert!(!settings.on_transfers);
    assert_eq!(settings.crypto_decimals, 6);
    for currency in Currency::ALL {
        assert!(settings.wallet_enabled(currency));
    }
    assert_eq!(backend.load_settings().unwrap().as_ref(), Some(&*settings));
}

#[test]
fn test_invalid_seed_is_refused() {
    let backend = Arc::new(LedgerStore::temporary().unwrap());
    let result = SettingsStore::open(
        backend,
        CommissionSettings::default().with_percentage(dec!(101)),
    );
    assert!(matches!(result, Err(SettingsError::PercentageOutOfRange(_))));
}

#[test]
fn test_persisted_settings_win_over_seed() {
    let backend = Arc::new(LedgerStore::temporary().unwrap());
    SettingsStore::open(backend.clone(), CommissionSettings::default().with_percentage(dec!(3)))
        .unwrap();

    let reopened =
        SettingsStore::open(backend, CommissionSettings::default().with_percentage(dec!(9)))
            .unwrap();
    assert_eq!(reopened.get().percentage, dec!(3));
}

// ============================================================================
// ADMIN UPDATES
// ============================================================================

#[tokio::test]
async fn test_patch_updates_only_named_fields() {
    let (_, store) = open();

    let updated = store
        .set(
            &admin(),
            &SettingsPatch::new()
                .with_percentage("2.5")
                .with_on_deposits(true)
                .with_currency(
                    Currency::Usdt,
                    CurrencyLimitsPatch::new()
                        .with_min_deposit("10")
                        .with_max_withdrawal("5000"),
                ),
        )
        .await
        .unwrap();

    assert_eq!(updated.version, 1);
    assert_eq!(updated.percentage, dec!(2.5));
    assert!(updated.on_deposits);
    assert!(!updated.on_transfers);
    let usdt = updated.limits(Currency::Usdt).unwrap();
    assert_eq!(usdt.min_deposit, dec!(10));
    assert_eq!(usdt.max_withdrawal, dec!(5000));
    assert_eq!(usdt.max_deposit, dec!(100000));
    assert_eq!(updated.limits(Currency::Inr), store.get().limits(Currency::Inr));
}

#[tokio::test]
async fn test_non_numeric_input_is_rejected() {
    let (_, store) = open();

    let result = store
        .set(&admin(), &SettingsPatch::new().with_percentage("two"))
        .await;

    assert!(matches!(result, Err(SettingsError::NotNumeric { .. })));
    assert_eq!(store.get().version, 0);
}

#[tokio::test]
async fn test_inverted_range_is_rejected() {
    let (_, store) = open();

    let result = store
        .set(
            &admin(),
            &SettingsPatch::new().with_currency(
                Currency::Inr,
                CurrencyLimitsPatch::new().with_min_withdrawal("500").with_max_withdrawal("100"),
            ),
        )
        .await;

    assert!(matches!(
        result,
        Err(SettingsError::InvertedRange {
            currency: Currency::Inr,
            ..
        })
    ));
}

#[tokio::test]
async fn test_out_of_range_percentage_is_rejected() {
    let (_, store) = open();
    for raw in ["-1", "100.01"] {
        let result = store
            .set(&admin(), &SettingsPatch::new().with_percentage(raw))
            .await;
        assert!(matches!(result, Err(SettingsError::PercentageOutOfRange(_))));
    }
    assert!(store
        .set(&admin(), &SettingsPatch::new().with_percentage("100"))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_versions_increase_per_change() {
    let (backend, store) = open();
    for expected in 1..=3u64 {
        let updated = store
            .set(&admin(), &SettingsPatch::new().with_on_transfers(expected % 2 == 1))
            .await
            .unwrap();
        assert_eq!(updated.version, expected);
    }
    assert_eq!(backend.load_settings().unwrap().unwrap().version, 3);
}

// ============================================================================
// PUBLICATION
// ============================================================================

#[tokio::test]
async fn test_views_see_new_settings_and_keep_old_snapshots() {
    let (_, store) = open();
    let mut view = store.subscribe();
    let before = view.snapshot();

    store
        .set(&admin(), &SettingsPatch::new().with_crypto_decimals(8))
        .await
        .unwrap();

    assert!(view.changed().await);
    assert_eq!(view.snapshot().precision(Currency::Usdt), 8);
    assert_eq!(before.precision(Currency::Usdt), 6);
}

#[tokio::test]
async fn test_reload_ignores_same_version() {
    let (_, store) = open();
    assert!(!store.reload().await.unwrap());
}
