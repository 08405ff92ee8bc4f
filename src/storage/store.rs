// LedgerStore - Persistent ledger state using sled
//
// Layout:
// - accounts:      currency|owner            -> WalletAccount
// - transactions:  transaction id            -> Transaction
// - history:       owner|currency|sequence   -> transaction id
// - external_refs: gateway reference         -> transaction id
// - idempotency:   sha256(idempotency key)   -> transaction id
// - settings:      singleton                 -> CommissionSettings

use crate::ledger::{Transaction, TransactionStatus, WalletAccount};
use crate::primitives::{
    AccountKey, AccountOwner, Currency, ExternalRef, IdempotencyKey, TransactionId,
};
use crate::settings::{CommissionSettings, SettingsBackend};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use std::path::Path;
use thiserror::Error;

/// Key names for organizing data
mod keys {
    pub const ACCOUNTS: &str = "accounts";
    pub const TRANSACTIONS: &str = "transactions";
    pub const HISTORY: &str = "history";
    pub const EXTERNAL_REFS: &str = "external_refs";
    pub const IDEMPOTENCY: &str = "idempotency";
    pub const SETTINGS: &str = "settings";
    pub const COMMISSION_SETTINGS: &[u8] = b"settings:commission";
}

/// Errors from storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    OpenFailed(String),

    #[error("Database operation failed: {0}")]
    DatabaseError(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Flush failed: {0}")]
    FlushFailed(String),

    #[error("Commit rejected: {0}")]
    Rejected(CommitRejection),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::DatabaseError(err.to_string())
    }
}

/// Reasons an atomic commit was aborted without applying anything
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommitRejection {
    #[error("Version conflict on {key}: expected {expected}, found {found}")]
    VersionConflict {
        key: AccountKey,
        expected: u64,
        found: u64,
    },

    #[error("Balance of {key} would go negative: available {available}, change {delta}")]
    NegativeBalance {
        key: AccountKey,
        available: Decimal,
        delta: Decimal,
    },

    #[error("Transaction {id} changed concurrently: expected {expected}, found {found}")]
    StatusConflict {
        id: TransactionId,
        expected: TransactionStatus,
        found: TransactionStatus,
    },

    #[error("Transaction {0} not found")]
    MissingTransaction(TransactionId),

    #[error("Idempotency key already used by transaction {0}")]
    DuplicateIdempotencyKey(TransactionId),

    #[error("External reference {reference} already bound to transaction {id}")]
    DuplicateExternalRef {
        reference: ExternalRef,
        id: TransactionId,
    },
}

// ============================================================================
// COMMIT BATCH
// ============================================================================

/// Signed change to one account's balance
#[derive(Clone, Debug)]
struct BalanceChange {
    key: AccountKey,
    delta: Decimal,
    expected_version: Option<u64>,
}

/// Everything one ledger operation writes, applied all-or-nothing
#[derive(Clone, Debug, Default)]
pub struct CommitBatch {
    balance_changes: Vec<BalanceChange>,
    inserts: Vec<Transaction>,
    updates: Vec<(Transaction, TransactionStatus)>,
}

impl CommitBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` to an account whose version the caller read under its lock
    pub fn credit(mut self, key: AccountKey, amount: Decimal, expected_version: u64) -> Self {
        self.balance_changes.push(BalanceChange {
            key,
            delta: amount,
            expected_version: Some(expected_version),
        });
        self
    }

    /// Subtract `amount`; the commit aborts if the balance would go negative
    pub fn debit(mut self, key: AccountKey, amount: Decimal, expected_version: u64) -> Self {
        self.balance_changes.push(BalanceChange {
            key,
            delta: -amount,
            expected_version: Some(expected_version),
        });
        self
    }

    /// Atomic add to the platform revenue account, without a version check
    pub fn accrue_revenue(mut self, currency: Currency, amount: Decimal) -> Self {
        if amount > Decimal::ZERO {
            self.balance_changes.push(BalanceChange {
                key: AccountKey::platform(currency),
                delta: amount,
                expected_version: None,
            });
        }
        self
    }

    /// Append a new transaction to the log
    pub fn insert(mut self, transaction: Transaction) -> Self {
        self.inserts.push(transaction);
        self
    }

    /// Replace a transaction that must still be in `expected` status
    pub fn update(mut self, transaction: Transaction, expected: TransactionStatus) -> Self {
        self.updates.push((transaction, expected));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.balance_changes.is_empty() && self.inserts.is_empty() && self.updates.is_empty()
    }
}

/// One page of an account's history, newest first
#[derive(Clone, Debug)]
pub struct HistoryPage {
    pub transactions: Vec<Transaction>,
    /// Pass back to fetch the next (older) page; `None` when exhausted
    pub next_cursor: Option<Vec<u8>>,
}

// ============================================================================
// LEDGER STORE
// ============================================================================

/// Persistent store for wallet accounts and transactions
///
/// Uses sled for crash-safe, embedded storage. Every balance mutation goes
/// through [`LedgerStore::commit`], a single multi-tree transaction.
pub struct LedgerStore {
    db: sled::Db,
    accounts: sled::Tree,
    transactions: sled::Tree,
    history: sled::Tree,
    external_refs: sled::Tree,
    idempotency: sled::Tree,
    settings: sled::Tree,
}

impl LedgerStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        Self::from_db(db)
    }

    /// Open a throwaway store that is deleted on drop
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            accounts: db.open_tree(keys::ACCOUNTS)?,
            transactions: db.open_tree(keys::TRANSACTIONS)?,
            history: db.open_tree(keys::HISTORY)?,
            external_refs: db.open_tree(keys::EXTERNAL_REFS)?,
            idempotency: db.open_tree(keys::IDEMPOTENCY)?,
            settings: db.open_tree(keys::SETTINGS)?,
            db,
        })
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::FlushFailed(e.to_string()))?;
        Ok(())
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Load an account; `None` if it has never been credited
    pub fn account(&self, key: &AccountKey) -> Result<Option<WalletAccount>, StoreError> {
        match self.accounts.get(key.storage_key())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, StoreError> {
        match self.transactions.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Find the transaction a gateway reference belongs to
    pub fn transaction_by_external_ref(
        &self,
        reference: &ExternalRef,
    ) -> Result<Option<Transaction>, StoreError> {
        self.resolve_index(&self.external_refs, reference.as_str().as_bytes())
    }

    pub fn transaction_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Transaction>, StoreError> {
        self.resolve_index(&self.idempotency, &key.digest())
    }

    fn resolve_index(
        &self,
        index: &sled::Tree,
        key: &[u8],
    ) -> Result<Option<Transaction>, StoreError> {
        match index.get(key)? {
            Some(id_bytes) => {
                let id = TransactionId::from_bytes(&id_bytes)
                    .map_err(|e| StoreError::DeserializationFailed(e.to_string()))?;
                self.transaction(&id)
            }
            None => Ok(None),
        }
    }

    /// Read one page of history strictly older than `cursor`
    pub fn history_page(
        &self,
        owner: &AccountOwner,
        currency: Currency,
        cursor: Option<&[u8]>,
        limit: usize,
    ) -> Result<HistoryPage, StoreError> {
        let prefix = history_prefix(owner, currency);
        let upper = match cursor {
            Some(cursor) => cursor.to_vec(),
            None => {
                let mut upper = prefix.clone();
                upper.extend_from_slice(&[0xFF; 9]);
                upper
            }
        };

        let mut transactions = Vec::new();
        let mut last_key = None;
        for entry in self.history.range(prefix..upper).rev().take(limit) {
            let (key, id_bytes) = entry?;
            let id = TransactionId::from_bytes(&id_bytes)
                .map_err(|e| StoreError::DeserializationFailed(e.to_string()))?;
            let transaction = self.transaction(&id)?.ok_or_else(|| {
                StoreError::DeserializationFailed(format!("history points at missing {}", id))
            })?;
            transactions.push(transaction);
            last_key = Some(key.to_vec());
        }

        let next_cursor = if transactions.len() == limit { last_key } else { None };
        Ok(HistoryPage {
            transactions,
            next_cursor,
        })
    }

    /// All transactions currently in one of `statuses`
    pub fn transactions_in_status(
        &self,
        statuses: &[TransactionStatus],
    ) -> Result<Vec<Transaction>, StoreError> {
        let mut found = Vec::new();
        for entry in self.transactions.iter() {
            let (_, bytes) = entry?;
            let transaction: Transaction = decode(&bytes)?;
            if statuses.contains(&transaction.status()) {
                found.push(transaction);
            }
        }
        Ok(found)
    }

    // ========================================================================
    // ATOMIC COMMIT
    // ========================================================================

    /// Apply a batch as one transaction across every tree.
    ///
    /// Either every balance change, insert and update lands, or none does.
    pub fn commit(&self, batch: &CommitBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        // Reserved outside the transaction so a retried closure reuses them
        let sequences = batch
            .inserts
            .iter()
            .map(|_| self.db.generate_id())
            .collect::<Result<Vec<u64>, sled::Error>>()?;

        let result = (
            &self.accounts,
            &self.transactions,
            &self.history,
            &self.external_refs,
            &self.idempotency,
        )
            .transaction(|(accounts, transactions, history, refs, idempotency)| {
                for change in &batch.balance_changes {
                    let key = change.key.storage_key();
                    let mut account = match accounts.get(&key)? {
                        Some(bytes) => decode::<WalletAccount>(&bytes).map_err(abort)?,
                        None => WalletAccount::new(change.key.clone(), now),
                    };
                    if let Some(expected) = change.expected_version {
                        if account.version() != expected {
                            return Err(reject(CommitRejection::VersionConflict {
                                key: change.key.clone(),
                                expected,
                                found: account.version(),
                            }));
                        }
                    }
                    account.apply(change.delta, now).map_err(|available| {
                        reject(CommitRejection::NegativeBalance {
                            key: change.key.clone(),
                            available,
                            delta: change.delta,
                        })
                    })?;
                    accounts.insert(key, encode(&account).map_err(abort)?)?;
                }

                for (transaction, sequence) in batch.inserts.iter().zip(&sequences) {
                    let id = transaction.id();
                    let digest = transaction.idempotency_key().digest();
                    if let Some(existing) = idempotency.get(&digest[..])? {
                        let existing = TransactionId::from_bytes(&existing).map_err(|e| {
                            abort(StoreError::DeserializationFailed(e.to_string()))
                        })?;
                        return Err(reject(CommitRejection::DuplicateIdempotencyKey(existing)));
                    }
                    idempotency.insert(&digest[..], &id.as_bytes()[..])?;

                    if let Some(reference) = transaction.external_reference() {
                        bind_reference(refs, reference, id)?;
                    }
                    transactions.insert(&id.as_bytes()[..], encode(transaction).map_err(abort)?)?;
                    let history_key =
                        history_key(transaction.owner(), transaction.currency(), *sequence);
                    history.insert(history_key, &id.as_bytes()[..])?;
                }

                for (transaction, expected) in &batch.updates {
                    let id = transaction.id();
                    let current: Transaction = match transactions.get(&id.as_bytes()[..])? {
                        Some(bytes) => decode(&bytes).map_err(abort)?,
                        None => return Err(reject(CommitRejection::MissingTransaction(id))),
                    };
                    if current.status() != *expected {
                        return Err(reject(CommitRejection::StatusConflict {
                            id,
                            expected: *expected,
                            found: current.status(),
                        }));
                    }
                    if let Some(reference) = transaction.external_reference() {
                        if current.external_reference() != Some(reference) {
                            bind_reference(refs, reference, id)?;
                        }
                    }
                    transactions.insert(&id.as_bytes()[..], encode(transaction).map_err(abort)?)?;
                }

                Ok(())
            });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }
}

// ============================================================================
// SETTINGS PERSISTENCE
// ============================================================================

impl SettingsBackend for LedgerStore {
    fn load_settings(&self) -> Result<Option<CommissionSettings>, StoreError> {
        match self.settings.get(keys::COMMISSION_SETTINGS)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_settings(&self, settings: &CommissionSettings) -> Result<(), StoreError> {
        self.settings
            .insert(keys::COMMISSION_SETTINGS, encode(settings)?)?;
        Ok(())
    }
}

// ============================================================================
// HELPERS
// ============================================================================

type TxResult<T> = Result<T, ConflictableTransactionError<StoreError>>;

fn abort(err: StoreError) -> ConflictableTransactionError<StoreError> {
    ConflictableTransactionError::Abort(err)
}

fn reject(rejection: CommitRejection) -> ConflictableTransactionError<StoreError> {
    ConflictableTransactionError::Abort(StoreError::Rejected(rejection))
}

fn bind_reference(
    refs: &sled::transaction::TransactionalTree,
    reference: &ExternalRef,
    id: TransactionId,
) -> TxResult<()> {
    let key = reference.as_str().as_bytes();
    if let Some(bound) = refs.get(key)? {
        if bound.as_ref() != &id.as_bytes()[..] {
            let bound = TransactionId::from_bytes(&bound)
                .map_err(|e| abort(StoreError::DeserializationFailed(e.to_string())))?;
            return Err(reject(CommitRejection::DuplicateExternalRef {
                reference: reference.clone(),
                id: bound,
            }));
        }
        return Ok(());
    }
    refs.insert(key, &id.as_bytes()[..])?;
    Ok(())
}

fn history_prefix(owner: &AccountOwner, currency: Currency) -> Vec<u8> {
    let mut prefix = Vec::new();
    prefix.extend_from_slice(owner.storage_tag().as_bytes());
    prefix.push(0);
    prefix.extend_from_slice(currency.code().as_bytes());
    prefix.push(0);
    prefix
}

fn history_key(owner: &AccountOwner, currency: Currency, sequence: u64) -> Vec<u8> {
    let mut key = history_prefix(owner, currency);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    postcard::to_allocvec(value).map_err(|e| StoreError::SerializationFailed(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    postcard::from_bytes(bytes).map_err(|e| StoreError::DeserializationFailed(e.to_string()))
}
