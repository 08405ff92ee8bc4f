// Commission module - pure pricing and threshold validation

mod engine;
mod rejection;

pub use engine::{
    commission_for, compute_deposit, compute_transfer, round_to_precision, validate_amount,
    validate_deposit, validate_transfer, validate_withdrawal, DepositQuote, Operation,
    TransferQuote,
};
pub use rejection::Rejection;
