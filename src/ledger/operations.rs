// Ledger operations - the only surface that mutates balances and transactions
//
// Every operation builds one CommitBatch and hands it to the store, so the
// balances, the transaction log and its indexes change together or not at all.

use crate::commission::{compute_deposit, compute_transfer, validate_transfer, validate_withdrawal};
use crate::ledger::locks::KeyLocks;
use crate::ledger::{
    CommissionSnapshot, History, LedgerError, Transaction, TransactionKind, TransactionStatus,
    WalletAccount,
};
use crate::primitives::{
    AccountKey, AccountOwner, Currency, ExternalRef, IdempotencyKey, TransactionId, UserId,
};
use crate::settings::SettingsView;
use crate::storage::{CommitBatch, CommitRejection, LedgerStore, StoreError};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Gateway evidence that a transaction was paid or paid out
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Confirmation {
    pub external_ref: Option<ExternalRef>,
    /// Amount the gateway reports as received; `None` if the rail does not say
    pub confirmed_amount: Option<Decimal>,
    pub confirmations: u32,
}

impl Confirmation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_external_ref(mut self, reference: ExternalRef) -> Self {
        self.external_ref = Some(reference);
        self
    }

    pub fn with_confirmed_amount(mut self, amount: Decimal) -> Self {
        self.confirmed_amount = Some(amount);
        self
    }

    pub fn with_confirmations(mut self, confirmations: u32) -> Self {
        self.confirmations = confirmations;
        self
    }
}

/// Wallet ledger over a [`LedgerStore`]
pub struct Ledger {
    store: Arc<LedgerStore>,
    settings: SettingsView,
    locks: KeyLocks,
}

impl Ledger {
    pub fn new(store: Arc<LedgerStore>, settings: SettingsView) -> Self {
        Self {
            store,
            settings,
            locks: KeyLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    pub fn settings(&self) -> &SettingsView {
        &self.settings
    }

    // ========================================================================
    // DEPOSITS
    // ========================================================================

    /// Create a pending deposit. No balance changes until it settles.
    #[instrument(name = "ledger.deposit", skip(self, gateway_ref), fields(tx_id), err)]
    pub async fn deposit(
        &self,
        user: &UserId,
        currency: Currency,
        amount: Decimal,
        gateway_ref: Option<ExternalRef>,
        idempotency_key: IdempotencyKey,
    ) -> Result<Transaction, LedgerError> {
        if let Some(existing) = self.replay(&idempotency_key, TransactionKind::Deposit, user)? {
            return Ok(existing);
        }

        let settings = self.settings.snapshot();
        let quote = compute_deposit(amount, currency, &settings)?;
        let mut tx = Transaction::deposit(
            user.clone(),
            currency,
            &quote,
            CommissionSnapshot::capture(&settings, TransactionKind::Deposit),
            idempotency_key.clone(),
            Utc::now(),
        );
        if let Some(reference) = gateway_ref {
            tx.set_external_reference(reference);
        }
        tracing::Span::current().record("tx_id", tracing::field::display(tx.id()));

        match self.store.commit(&CommitBatch::new().insert(tx.clone())) {
            Ok(()) => {
                info!(
                    amount = %quote.amount,
                    commission = %quote.commission,
                    total_payable = %quote.total_payable,
                    "deposit pending"
                );
                Ok(tx)
            }
            Err(e) => self.replay_after_race(e, &idempotency_key, TransactionKind::Deposit, user),
        }
    }

    /// Bind the gateway's reference to a transaction created before initiation
    #[instrument(name = "ledger.attach_external_ref", skip(self), err)]
    pub async fn attach_external_ref(
        &self,
        id: TransactionId,
        reference: ExternalRef,
    ) -> Result<Transaction, LedgerError> {
        let tx = self.require(id)?;
        match tx.external_reference() {
            Some(bound) if bound == &reference => return Ok(tx),
            Some(bound) => {
                return Err(LedgerError::ExternalRefMismatch {
                    id,
                    bound: bound.clone(),
                    received: reference,
                })
            }
            None => {}
        }
        if tx.status().is_final() {
            return Err(LedgerError::InvalidTransition {
                id,
                from: tx.status(),
                to: tx.status(),
            });
        }

        let mut updated = tx.clone();
        updated.set_external_reference(reference);
        self.store
            .commit(&CommitBatch::new().update(updated.clone(), tx.status()))?;
        Ok(updated)
    }

    /// Credit a paid deposit. Settling an already completed deposit is a no-op.
    #[instrument(name = "ledger.settle_deposit", skip(self, confirmation), err)]
    pub async fn settle_deposit(
        &self,
        id: TransactionId,
        confirmation: &Confirmation,
    ) -> Result<Transaction, LedgerError> {
        let key = self.require_kind(id, TransactionKind::Deposit)?.account_key();
        let _guards = self.locks.acquire(&[key.clone()]).await;

        let tx = self.require(id)?;
        if tx.status() == TransactionStatus::Completed {
            debug!("deposit already settled");
            return Ok(tx);
        }
        self.check_confirmation(&tx, confirmation)?;

        let now = Utc::now();
        let mut settled = tx.clone();
        transition(&mut settled, TransactionStatus::Completed, now)?;
        settled.set_confirmations(confirmation.confirmations);
        if settled.external_reference().is_none() {
            if let Some(reference) = &confirmation.external_ref {
                settled.set_external_reference(reference.clone());
            }
        }

        let mut batch = CommitBatch::new()
            .credit(key.clone(), settled.net_amount(), self.version_of(&key)?)
            .update(settled.clone(), tx.status());
        if settled.commission_amount() > Decimal::ZERO {
            batch = batch
                .accrue_revenue(settled.currency(), settled.commission_amount())
                .insert(Transaction::commission_earning(&settled, now));
        }

        match self.store.commit(&batch) {
            Ok(()) => {
                info!(
                    user = %key.owner,
                    currency = %key.currency,
                    credited = %settled.net_amount(),
                    commission = %settled.commission_amount(),
                    "deposit settled"
                );
                Ok(settled)
            }
            Err(e) => self.settled_by_someone_else(id, e),
        }
    }

    /// Record crypto confirmations below the required count
    #[instrument(name = "ledger.mark_confirming", skip(self), err)]
    pub async fn mark_confirming(
        &self,
        id: TransactionId,
        confirmations: u32,
    ) -> Result<Transaction, LedgerError> {
        let tx = self.require(id)?;
        let mut updated = tx.clone();
        transition(&mut updated, TransactionStatus::Confirming, Utc::now())?;
        updated.set_confirmations(confirmations);
        self.store
            .commit(&CommitBatch::new().update(updated.clone(), tx.status()))?;
        debug!(confirmations = updated.confirmations(), "transaction confirming");
        Ok(updated)
    }

    /// Mark a transaction failed. A failed withdrawal gets its reserved amount back.
    #[instrument(name = "ledger.fail_transaction", skip(self), err)]
    pub async fn fail_transaction(
        &self,
        id: TransactionId,
        reason: &str,
    ) -> Result<Transaction, LedgerError> {
        let key = self.require(id)?.account_key();
        let _guards = self.locks.acquire(&[key.clone()]).await;

        let tx = self.require(id)?;
        if tx.status() == TransactionStatus::Failed {
            return Ok(tx);
        }

        let mut failed = tx.clone();
        transition(&mut failed, TransactionStatus::Failed, Utc::now())?;
        failed.set_failure_reason(reason);

        let mut batch = CommitBatch::new().update(failed.clone(), tx.status());
        if failed.kind() == TransactionKind::Withdrawal {
            batch = batch.credit(key.clone(), failed.gross_amount(), self.version_of(&key)?);
        }
        self.store.commit(&batch)?;

        warn!(kind = %failed.kind(), reason, "transaction failed");
        Ok(failed)
    }

    /// Give up on a deposit whose confirmations never arrived
    #[instrument(name = "ledger.expire_transaction", skip(self), err)]
    pub async fn expire_transaction(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        let tx = self.require_kind(id, TransactionKind::Deposit)?;
        if tx.status() == TransactionStatus::Expired {
            return Ok(tx);
        }

        let mut expired = tx.clone();
        transition(&mut expired, TransactionStatus::Expired, Utc::now())?;
        self.store
            .commit(&CommitBatch::new().update(expired.clone(), tx.status()))?;
        warn!("deposit expired");
        Ok(expired)
    }

    // ========================================================================
    // WITHDRAWALS
    // ========================================================================

    /// Reserve `amount` and create a pending withdrawal
    #[instrument(name = "ledger.withdraw", skip(self), fields(tx_id), err)]
    pub async fn withdraw(
        &self,
        user: &UserId,
        currency: Currency,
        amount: Decimal,
        idempotency_key: IdempotencyKey,
    ) -> Result<Transaction, LedgerError> {
        if let Some(existing) = self.replay(&idempotency_key, TransactionKind::Withdrawal, user)? {
            return Ok(existing);
        }

        let settings = self.settings.snapshot();
        validate_withdrawal(amount, currency, &settings)?;

        let key = AccountKey::new(user, currency);
        let _guards = self.locks.acquire(&[key.clone()]).await;

        let account = self.account_or_empty(&key)?;
        if account.balance() < amount {
            return Err(LedgerError::InsufficientFunds {
                available: account.balance(),
                required: amount,
            });
        }

        let tx = Transaction::withdrawal(
            user.clone(),
            currency,
            amount,
            CommissionSnapshot::capture(&settings, TransactionKind::Withdrawal),
            idempotency_key.clone(),
            Utc::now(),
        );
        tracing::Span::current().record("tx_id", tracing::field::display(tx.id()));

        let batch = CommitBatch::new()
            .debit(key, amount, account.version())
            .insert(tx.clone());
        match self.store.commit(&batch) {
            Ok(()) => {
                info!(amount = %amount, "withdrawal reserved");
                Ok(tx)
            }
            Err(e) => {
                self.replay_after_race(e, &idempotency_key, TransactionKind::Withdrawal, user)
            }
        }
    }

    /// Mark a payout as delivered. The amount was already debited when reserved.
    #[instrument(name = "ledger.complete_withdrawal", skip(self, confirmation), err)]
    pub async fn complete_withdrawal(
        &self,
        id: TransactionId,
        confirmation: &Confirmation,
    ) -> Result<Transaction, LedgerError> {
        let tx = self.require_kind(id, TransactionKind::Withdrawal)?;
        if tx.status() == TransactionStatus::Completed {
            return Ok(tx);
        }
        // The payout already left; a reported amount that differs is flagged, never refunded
        self.check_reference(&tx, confirmation)?;
        if let Some(reported) = confirmation.confirmed_amount {
            if reported != tx.gross_amount() {
                warn!(
                    reserved = %tx.gross_amount(),
                    reported = %reported,
                    "payout amount differs from reservation"
                );
            }
        }

        let mut completed = tx.clone();
        transition(&mut completed, TransactionStatus::Completed, Utc::now())?;
        completed.set_confirmations(confirmation.confirmations);
        if completed.external_reference().is_none() {
            if let Some(reference) = &confirmation.external_ref {
                completed.set_external_reference(reference.clone());
            }
        }

        match self
            .store
            .commit(&CommitBatch::new().update(completed.clone(), tx.status()))
        {
            Ok(()) => {
                info!(amount = %completed.gross_amount(), "withdrawal completed");
                Ok(completed)
            }
            Err(e) => self.settled_by_someone_else(id, e),
        }
    }

    // ========================================================================
    // TRANSFERS
    // ========================================================================

    /// Move funds between users. Settles synchronously.
    ///
    /// Returns the sender's `transfer_out` and the recipient's `transfer_in`.
    #[instrument(name = "ledger.transfer", skip(self), err)]
    pub async fn transfer(
        &self,
        from: &UserId,
        to: &UserId,
        amount: Decimal,
        currency: Currency,
        idempotency_key: IdempotencyKey,
    ) -> Result<(Transaction, Transaction), LedgerError> {
        if let Some(out) = self.replay(&idempotency_key, TransactionKind::TransferOut, from)? {
            return self.transfer_pair(out);
        }

        let settings = self.settings.snapshot();
        validate_transfer(from, to, amount, currency, &settings)?;
        let quote = compute_transfer(amount, currency, &settings)?;

        let from_key = AccountKey::new(from, currency);
        let to_key = AccountKey::new(to, currency);
        let _guards = self.locks.acquire(&[from_key.clone(), to_key.clone()]).await;

        let sender = self.account_or_empty(&from_key)?;
        if sender.balance() < amount {
            return Err(LedgerError::InsufficientFunds {
                available: sender.balance(),
                required: amount,
            });
        }
        let recipient_version = self.version_of(&to_key)?;

        let now = Utc::now();
        let out = Transaction::transfer_out(
            from.clone(),
            to.clone(),
            currency,
            &quote,
            CommissionSnapshot::capture(&settings, TransactionKind::TransferOut),
            idempotency_key.clone(),
            now,
        );
        let incoming = Transaction::transfer_in(&out, to.clone(), now);

        let mut batch = CommitBatch::new()
            .debit(from_key, quote.amount, sender.version())
            .credit(to_key, quote.net_to_recipient, recipient_version)
            .insert(out.clone())
            .insert(incoming.clone());
        if quote.commission > Decimal::ZERO {
            batch = batch
                .accrue_revenue(currency, quote.commission)
                .insert(Transaction::commission_earning(&out, now));
        }

        match self.store.commit(&batch) {
            Ok(()) => {
                info!(
                    tx_id = %out.id(),
                    amount = %quote.amount,
                    commission = %quote.commission,
                    net = %quote.net_to_recipient,
                    "transfer completed"
                );
                Ok((out, incoming))
            }
            Err(e) => {
                let out = self.replay_after_race(
                    e,
                    &idempotency_key,
                    TransactionKind::TransferOut,
                    from,
                )?;
                self.transfer_pair(out)
            }
        }
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Current balance; zero for an account that was never credited
    pub fn balance(&self, owner: &AccountOwner, currency: Currency) -> Result<Decimal, LedgerError> {
        let key = AccountKey::new(owner.clone(), currency);
        Ok(self.store.account(&key)?.map(|a| a.balance()).unwrap_or(Decimal::ZERO))
    }

    pub fn account(
        &self,
        owner: &AccountOwner,
        currency: Currency,
    ) -> Result<Option<WalletAccount>, LedgerError> {
        Ok(self.store.account(&AccountKey::new(owner.clone(), currency))?)
    }

    /// Lazy newest-first history of one account
    pub fn history(&self, owner: &AccountOwner, currency: Currency) -> History {
        History::new(self.store.clone(), owner.clone(), currency)
    }

    pub fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.store.transaction(&id)?)
    }

    pub fn transaction_by_external_ref(
        &self,
        reference: &ExternalRef,
    ) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.store.transaction_by_external_ref(reference)?)
    }

    pub fn transaction_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.store.transaction_by_idempotency_key(key)?)
    }

    /// Open transactions of a kind, for the reconciliation worker
    pub fn open_transactions(
        &self,
        kind: TransactionKind,
        status: TransactionStatus,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let mut found = self.store.transactions_in_status(&[status])?;
        found.retain(|tx| tx.kind() == kind);
        found.sort_by_key(|tx| tx.created_at());
        Ok(found)
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn require(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        self.store
            .transaction(&id)?
            .ok_or(LedgerError::TransactionNotFound(id))
    }

    fn require_kind(
        &self,
        id: TransactionId,
        expected: TransactionKind,
    ) -> Result<Transaction, LedgerError> {
        let tx = self.require(id)?;
        if tx.kind() != expected {
            return Err(LedgerError::WrongKind {
                id,
                found: tx.kind(),
                expected,
            });
        }
        Ok(tx)
    }

    fn account_or_empty(&self, key: &AccountKey) -> Result<WalletAccount, LedgerError> {
        Ok(self
            .store
            .account(key)?
            .unwrap_or_else(|| WalletAccount::new(key.clone(), Utc::now())))
    }

    fn version_of(&self, key: &AccountKey) -> Result<u64, LedgerError> {
        Ok(self.store.account(key)?.map(|a| a.version()).unwrap_or(0))
    }

    fn check_reference(
        &self,
        tx: &Transaction,
        confirmation: &Confirmation,
    ) -> Result<(), LedgerError> {
        if let (Some(bound), Some(received)) = (tx.external_reference(), &confirmation.external_ref)
        {
            if bound != received {
                return Err(LedgerError::ExternalRefMismatch {
                    id: tx.id(),
                    bound: bound.clone(),
                    received: received.clone(),
                });
            }
        }
        Ok(())
    }

    /// Reference must match and the payment must cover `total_payable`
    fn check_confirmation(
        &self,
        tx: &Transaction,
        confirmation: &Confirmation,
    ) -> Result<(), LedgerError> {
        self.check_reference(tx, confirmation)?;
        if let Some(received) = confirmation.confirmed_amount {
            if received < tx.total_payable() {
                return Err(LedgerError::Underpaid {
                    id: tx.id(),
                    required: tx.total_payable(),
                    received,
                });
            }
        }
        Ok(())
    }

    /// The transaction an idempotency key already produced, if any
    fn replay(
        &self,
        key: &IdempotencyKey,
        kind: TransactionKind,
        owner: &UserId,
    ) -> Result<Option<Transaction>, LedgerError> {
        match self.store.transaction_by_idempotency_key(key)? {
            Some(existing) if existing.kind() == kind && existing.owner().user() == Some(owner) => {
                debug!(tx_id = %existing.id(), "idempotent replay");
                Ok(Some(existing))
            }
            Some(existing) => Err(LedgerError::KeyReused {
                key: key.clone(),
                existing: existing.id(),
            }),
            None => Ok(None),
        }
    }

    /// A concurrent request with the same key may have won the commit
    fn replay_after_race(
        &self,
        err: StoreError,
        key: &IdempotencyKey,
        kind: TransactionKind,
        owner: &UserId,
    ) -> Result<Transaction, LedgerError> {
        if let StoreError::Rejected(CommitRejection::DuplicateIdempotencyKey(_)) = &err {
            if let Some(existing) = self.replay(key, kind, owner)? {
                return Ok(existing);
            }
        }
        Err(err.into())
    }

    /// A losing settle/complete commit is fine if the winner completed it
    fn settled_by_someone_else(
        &self,
        id: TransactionId,
        err: StoreError,
    ) -> Result<Transaction, LedgerError> {
        if let StoreError::Rejected(CommitRejection::StatusConflict { .. }) = &err {
            let current = self.require(id)?;
            if current.status() == TransactionStatus::Completed {
                return Ok(current);
            }
        }
        Err(err.into())
    }

    fn transfer_pair(&self, out: Transaction) -> Result<(Transaction, Transaction), LedgerError> {
        let in_key = out.idempotency_key().derive("in");
        let incoming = self
            .store
            .transaction_by_idempotency_key(&in_key)?
            .ok_or(LedgerError::TransactionNotFound(out.id()))?;
        Ok((out, incoming))
    }
}

fn transition(
    tx: &mut Transaction,
    next: TransactionStatus,
    now: chrono::DateTime<Utc>,
) -> Result<(), LedgerError> {
    let id = tx.id();
    tx.transition(next, now)
        .map_err(|invalid| LedgerError::InvalidTransition {
            id,
            from: invalid.from,
            to: invalid.to,
        })
}
