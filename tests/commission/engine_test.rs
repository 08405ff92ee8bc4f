// Commission Engine Tests
// Pricing, rounding and threshold validation

use gigwallet::commission::{
    commission_for, compute_deposit, compute_transfer, round_to_precision, validate_withdrawal,
    Operation, Rejection,
};
use gigwallet::primitives::Currency;
use gigwallet::settings::{CommissionSettings, CurrencyLimits};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn settings(percentage: Decimal) -> CommissionSettings {
    CommissionSettings::default()
        .with_percentage(percentage)
        .with_on_deposits(true)
        .with_on_transfers(true)
}

// ============================================================================
// PRICING
// ============================================================================

#[test]
fn test_deposit_quote_examples() {
    let quote = compute_deposit(dec!(1000), Currency::Inr, &settings(dec!(2))).unwrap();
    assert_eq!(quote.commission, dec!(20));
    assert_eq!(quote.total_payable, dec!(1020));

    let quote = compute_deposit(dec!(33.33), Currency::Usd, &settings(dec!(1.5))).unwrap();
    // 0.49995 rounds half-up to 0.50
    assert_eq!(quote.commission, dec!(0.50));
    assert_eq!(quote.total_payable, dec!(33.83));
}

#[test]
fn test_transfer_quote_examples() {
    let quote = compute_transfer(dec!(500), Currency::Usd, &settings(dec!(1))).unwrap();
    assert_eq!(quote.commission, dec!(5));
    assert_eq!(quote.net_to_recipient, dec!(495));
    assert_eq!(quote.commission + quote.net_to_recipient, quote.amount);
}

#[test]
fn test_disabled_flags_mean_zero_commission() {
    let settings = CommissionSettings::default().with_percentage(dec!(5));

    let deposit = compute_deposit(dec!(100), Currency::Inr, &settings).unwrap();
    assert_eq!(deposit.commission, Decimal::ZERO);
    assert_eq!(deposit.total_payable, dec!(100));

    let transfer = compute_transfer(dec!(100), Currency::Inr, &settings).unwrap();
    assert_eq!(transfer.net_to_recipient, dec!(100));
}

#[test]
fn test_crypto_uses_configured_precision() {
    let settings = settings(dec!(1)).with_crypto_decimals(4);

    let quote = compute_deposit(dec!(1.2345), Currency::Usdt, &settings).unwrap();
    assert_eq!(quote.commission, dec!(0.0123));

    assert_eq!(
        compute_deposit(dec!(1.23456), Currency::Usdt, &settings),
        Err(Rejection::TooPrecise {
            currency: Currency::Usdt,
            precision: 4
        })
    );
}

#[test]
fn test_quotes_are_deterministic() {
    let settings = settings(dec!(2.75));
    for amount in [dec!(1), dec!(19.99), dec!(12345.67), dec!(99999.99)] {
        let first = compute_deposit(amount, Currency::Inr, &settings).unwrap();
        let second = compute_deposit(amount, Currency::Inr, &settings).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.total_payable, first.amount + first.commission);
    }
}

#[test]
fn test_rounding_is_half_up() {
    assert_eq!(round_to_precision(dec!(0.125), 2), dec!(0.13));
    assert_eq!(round_to_precision(dec!(0.124), 2), dec!(0.12));
    assert_eq!(commission_for(dec!(0.01), dec!(50), 2), Ok(dec!(0.01)));
    assert_eq!(commission_for(dec!(0.01), dec!(49), 2), Ok(dec!(0.00)));
}

// ============================================================================
// VALIDATION
// ============================================================================

#[test]
fn test_non_positive_amounts_are_rejected() {
    let settings = settings(dec!(1));
    assert_eq!(
        compute_deposit(Decimal::ZERO, Currency::Inr, &settings),
        Err(Rejection::NonPositiveAmount)
    );
    assert_eq!(
        compute_transfer(dec!(-5), Currency::Inr, &settings),
        Err(Rejection::NonPositiveAmount)
    );
}

#[test]
fn test_thresholds_are_inclusive() {
    let settings = CommissionSettings::default().with_limits(
        Currency::Inr,
        CurrencyLimits::default()
            .with_deposit_range(dec!(100), dec!(500))
            .with_withdrawal_range(dec!(50), dec!(200)),
    );

    assert!(compute_deposit(dec!(100), Currency::Inr, &settings).is_ok());
    assert!(compute_deposit(dec!(500), Currency::Inr, &settings).is_ok());
    assert_eq!(
        compute_deposit(dec!(500.01), Currency::Inr, &settings),
        Err(Rejection::AboveMaximum {
            operation: Operation::Deposit,
            currency: Currency::Inr,
            maximum: dec!(500),
        })
    );
    assert_eq!(
        validate_withdrawal(dec!(49.99), Currency::Inr, &settings),
        Err(Rejection::BelowMinimum {
            operation: Operation::Withdrawal,
            currency: Currency::Inr,
            minimum: dec!(50),
        })
    );
}

#[test]
fn test_disabled_wallet_is_checked_first() {
    let settings = CommissionSettings::default().with_limits(
        Currency::Usd,
        CurrencyLimits::default().with_wallet_enabled(false),
    );
    assert_eq!(
        compute_deposit(Decimal::ZERO, Currency::Usd, &settings),
        Err(Rejection::WalletDisabled(Currency::Usd))
    );
    assert_eq!(
        compute_transfer(dec!(1), Currency::Usd, &settings),
        Err(Rejection::WalletDisabled(Currency::Usd))
    );
}

#[test]
fn test_rejection_messages_are_specific() {
    let rejection = Rejection::BelowMinimum {
        operation: Operation::Deposit,
        currency: Currency::Inr,
        minimum: dec!(100),
    };
    assert_eq!(rejection.to_string(), "Minimum deposit for INR is 100");
}
