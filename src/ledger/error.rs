// Ledger errors - business outcomes and infrastructure faults of ledger operations

use crate::commission::Rejection;
use crate::ledger::{TransactionKind, TransactionStatus};
use crate::primitives::{ExternalRef, IdempotencyKey, TransactionId};
use crate::storage::{CommitRejection, StoreError};
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Rejected: {0}")]
    Validation(#[from] Rejection),

    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        available: Decimal,
        required: Decimal,
    },

    #[error("Concurrent modification, nothing applied: {0}")]
    Conflict(CommitRejection),

    #[error("Transaction {0} not found")]
    TransactionNotFound(TransactionId),

    #[error("Transaction {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Transaction {id} is a {found}, expected a {expected}")]
    WrongKind {
        id: TransactionId,
        found: TransactionKind,
        expected: TransactionKind,
    },

    #[error("Transaction {id} is bound to {bound}, got {received}")]
    ExternalRefMismatch {
        id: TransactionId,
        bound: ExternalRef,
        received: ExternalRef,
    },

    #[error("Transaction {id} underpaid: required {required}, received {received}")]
    Underpaid {
        id: TransactionId,
        required: Decimal,
        received: Decimal,
    },

    #[error("Idempotency key {key} already used by a different request ({existing})")]
    KeyReused {
        key: IdempotencyKey,
        existing: TransactionId,
    },

    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl LedgerError {
    /// Whether repeating the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Conflict(CommitRejection::DuplicateExternalRef { .. }) => false,
            LedgerError::Conflict(_) | LedgerError::Storage(_) => true,
            _ => false,
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(rejection) => LedgerError::Conflict(rejection),
            other => LedgerError::Storage(other),
        }
    }
}
