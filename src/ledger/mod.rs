// Ledger module - BALANCES AND THE TRANSACTION LOG
// Wallet accounts, transaction state machine, and the operations that move money

mod error;
mod history;
mod locks;
mod model;
mod operations;

pub use error::LedgerError;
pub use history::History;
pub use model::{
    CommissionSnapshot, InvalidTransition, Transaction, TransactionKind, TransactionStatus,
    WalletAccount,
};
pub use operations::{Confirmation, Ledger};
