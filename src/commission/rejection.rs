// Typed validation failures callers can render as specific messages

use crate::commission::Operation;
use crate::primitives::Currency;
use rust_decimal::Decimal;
use thiserror::Error;

/// A request refused before any state was touched
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("Amount must be greater than zero")]
    NonPositiveAmount,

    #[error("{currency} amounts allow at most {precision} decimal places")]
    TooPrecise { currency: Currency, precision: u32 },

    #[error("{0} wallet is currently disabled")]
    WalletDisabled(Currency),

    #[error("Minimum {operation} for {currency} is {minimum}")]
    BelowMinimum {
        operation: Operation,
        currency: Currency,
        minimum: Decimal,
    },

    #[error("Maximum {operation} for {currency} is {maximum}")]
    AboveMaximum {
        operation: Operation,
        currency: Currency,
        maximum: Decimal,
    },

    #[error("Amount is too large to price")]
    AmountTooLarge,

    #[error("Cannot transfer to the same account")]
    SelfTransfer,
}
