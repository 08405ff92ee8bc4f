// Commission Engine - pure pricing of deposits and transfers
//
// Every function here is deterministic and free of I/O: the quote shown to a
// user before confirmation is recomputed bit-for-bit when the ledger applies it.

use crate::commission::Rejection;
use crate::primitives::{Currency, UserId};
use crate::settings::{CommissionSettings, CurrencyLimits};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation a threshold applies to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Deposit,
    Withdrawal,
    Transfer,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Deposit => f.write_str("deposit"),
            Operation::Withdrawal => f.write_str("withdrawal"),
            Operation::Transfer => f.write_str("transfer"),
        }
    }
}

// ============================================================================
// QUOTES
// ============================================================================

/// Price of a deposit: the user pays `total_payable` and is credited `amount`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositQuote {
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub commission: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_payable: Decimal,
}

/// Price of a transfer: the sender pays `amount`, the recipient gets `net_to_recipient`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferQuote {
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub commission: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub net_to_recipient: Decimal,
}

// ============================================================================
// ROUNDING
// ============================================================================

/// Round half-up to `precision` decimal places
pub fn round_to_precision(value: Decimal, precision: u32) -> Decimal {
    value.round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero)
}

/// `amount × percentage / 100`, rounded to the currency's minor unit.
///
/// Amounts too large to price are rejected instead of overflowing.
pub fn commission_for(
    amount: Decimal,
    percentage: Decimal,
    precision: u32,
) -> Result<Decimal, Rejection> {
    amount
        .checked_mul(percentage)
        .and_then(|scaled| scaled.checked_div(dec!(100)))
        .map(|raw| round_to_precision(raw, precision))
        .ok_or(Rejection::AmountTooLarge)
}

// ============================================================================
// VALIDATION
// ============================================================================

fn enabled_limits(
    currency: Currency,
    settings: &CommissionSettings,
) -> Result<&CurrencyLimits, Rejection> {
    match settings.limits(currency) {
        Some(limits) if limits.wallet_enabled => Ok(limits),
        _ => Err(Rejection::WalletDisabled(currency)),
    }
}

/// Amount must be positive and representable in the currency's minor unit
pub fn validate_amount(
    amount: Decimal,
    currency: Currency,
    settings: &CommissionSettings,
) -> Result<(), Rejection> {
    if amount <= Decimal::ZERO {
        return Err(Rejection::NonPositiveAmount);
    }
    let precision = settings.precision(currency);
    if amount.normalize().scale() > precision {
        return Err(Rejection::TooPrecise {
            currency,
            precision,
        });
    }
    Ok(())
}

fn check_range(
    operation: Operation,
    currency: Currency,
    amount: Decimal,
    minimum: Decimal,
    maximum: Decimal,
) -> Result<(), Rejection> {
    if amount < minimum {
        return Err(Rejection::BelowMinimum {
            operation,
            currency,
            minimum,
        });
    }
    if amount > maximum {
        return Err(Rejection::AboveMaximum {
            operation,
            currency,
            maximum,
        });
    }
    Ok(())
}

pub fn validate_deposit(
    amount: Decimal,
    currency: Currency,
    settings: &CommissionSettings,
) -> Result<(), Rejection> {
    let limits = enabled_limits(currency, settings)?;
    validate_amount(amount, currency, settings)?;
    check_range(
        Operation::Deposit,
        currency,
        amount,
        limits.min_deposit,
        limits.max_deposit,
    )
}

pub fn validate_withdrawal(
    amount: Decimal,
    currency: Currency,
    settings: &CommissionSettings,
) -> Result<(), Rejection> {
    let limits = enabled_limits(currency, settings)?;
    validate_amount(amount, currency, settings)?;
    check_range(
        Operation::Withdrawal,
        currency,
        amount,
        limits.min_withdrawal,
        limits.max_withdrawal,
    )
}

pub fn validate_transfer(
    from: &UserId,
    to: &UserId,
    amount: Decimal,
    currency: Currency,
    settings: &CommissionSettings,
) -> Result<(), Rejection> {
    if from == to {
        return Err(Rejection::SelfTransfer);
    }
    enabled_limits(currency, settings)?;
    validate_amount(amount, currency, settings)
}

// ============================================================================
// PRICING
// ============================================================================

/// Price a deposit. Commission is charged on top of the deposited amount.
pub fn compute_deposit(
    amount: Decimal,
    currency: Currency,
    settings: &CommissionSettings,
) -> Result<DepositQuote, Rejection> {
    validate_deposit(amount, currency, settings)?;

    let commission = if settings.on_deposits {
        commission_for(amount, settings.percentage, settings.precision(currency))?
    } else {
        Decimal::ZERO
    };
    let total_payable = amount
        .checked_add(commission)
        .ok_or(Rejection::AmountTooLarge)?;

    Ok(DepositQuote {
        amount,
        commission,
        total_payable,
    })
}

/// Price a transfer. Commission is taken out of the transferred amount.
pub fn compute_transfer(
    amount: Decimal,
    currency: Currency,
    settings: &CommissionSettings,
) -> Result<TransferQuote, Rejection> {
    enabled_limits(currency, settings)?;
    validate_amount(amount, currency, settings)?;

    let commission = if settings.on_transfers {
        commission_for(amount, settings.percentage, settings.precision(currency))?
    } else {
        Decimal::ZERO
    };

    Ok(TransferQuote {
        amount,
        commission,
        net_to_recipient: amount - commission,
    })
}
