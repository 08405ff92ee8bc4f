// Ledger records - wallet accounts and the append-only transaction log

use crate::commission::{DepositQuote, TransferQuote};
use crate::primitives::{
    AccountKey, AccountOwner, Currency, ExternalRef, IdempotencyKey, TransactionId, UserId,
};
use crate::settings::CommissionSettings;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// TRANSACTION KIND
// ============================================================================

/// What a transaction does to its owner's balance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    TransferOut,
    TransferIn,
    CommissionEarning,
}

impl TransactionKind {
    /// Debits reduce the owner's balance
    pub fn is_debit(&self) -> bool {
        matches!(self, TransactionKind::Withdrawal | TransactionKind::TransferOut)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::TransferOut => "transfer_out",
            TransactionKind::TransferIn => "transfer_in",
            TransactionKind::CommissionEarning => "commission_earning",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TRANSACTION STATUS
// ============================================================================

/// Lifecycle of a transaction.
///
/// ```text
/// pending ──► completed
///    │  ╲
///    │   ╲──► failed
///    ▼
/// confirming ──► completed | expired | failed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Confirming,
    Completed,
    Failed,
    Expired,
}

impl TransactionStatus {
    /// Final transactions are immutable
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed | TransactionStatus::Failed | TransactionStatus::Expired
        )
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        match (self, next) {
            (Pending, Confirming | Completed | Failed) => true,
            (Confirming, Confirming | Completed | Expired | Failed) => true,
            (Pending | Confirming, Pending) => false,
            (Completed | Failed | Expired, _) => false,
            (Pending, Expired) => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Confirming => "confirming",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// COMMISSION SNAPSHOT
// ============================================================================

/// Commission terms frozen onto a transaction when it is created
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionSnapshot {
    #[serde(with = "rust_decimal::serde::str")]
    percentage: Decimal,
    settings_version: u64,
    applied: bool,
}

impl CommissionSnapshot {
    /// Snapshot the terms for a transaction kind
    pub fn capture(settings: &CommissionSettings, kind: TransactionKind) -> Self {
        let applied = match kind {
            TransactionKind::Deposit => settings.on_deposits,
            TransactionKind::TransferOut => settings.on_transfers,
            _ => false,
        };
        Self {
            percentage: settings.percentage,
            settings_version: settings.version,
            applied,
        }
    }

    pub fn percentage(&self) -> Decimal {
        self.percentage
    }

    pub fn settings_version(&self) -> u64 {
        self.settings_version
    }

    /// Whether commission was charged at all
    pub fn applied(&self) -> bool {
        self.applied
    }
}

// ============================================================================
// TRANSACTION
// ============================================================================

/// A single entry in the ledger's transaction log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    id: TransactionId,
    owner: AccountOwner,
    counterparty: Option<UserId>,
    currency: Currency,
    kind: TransactionKind,
    #[serde(with = "rust_decimal::serde::str")]
    gross_amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    commission_amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    net_amount: Decimal,
    status: TransactionStatus,
    external_reference: Option<ExternalRef>,
    idempotency_key: IdempotencyKey,
    commission: CommissionSnapshot,
    /// Transaction this record was produced by (transfer_in, commission_earning)
    related: Option<TransactionId>,
    confirmations: u32,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    settled_at: Option<DateTime<Utc>>,
}

/// Rejected status change
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: TransactionStatus,
    pub to: TransactionStatus,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    fn base(
        kind: TransactionKind,
        owner: AccountOwner,
        counterparty: Option<UserId>,
        currency: Currency,
        gross_amount: Decimal,
        commission_amount: Decimal,
        net_amount: Decimal,
        idempotency_key: IdempotencyKey,
        commission: CommissionSnapshot,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            owner,
            counterparty,
            currency,
            kind,
            gross_amount,
            commission_amount,
            net_amount,
            status: TransactionStatus::Pending,
            external_reference: None,
            idempotency_key,
            commission,
            related: None,
            confirmations: 0,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            settled_at: None,
        }
    }

    fn settled(mut self, now: DateTime<Utc>) -> Self {
        self.status = TransactionStatus::Completed;
        self.settled_at = Some(now);
        self
    }

    /// Pending deposit awaiting the gateway; the user is credited `quote.amount`
    pub(crate) fn deposit(
        user: UserId,
        currency: Currency,
        quote: &DepositQuote,
        commission: CommissionSnapshot,
        idempotency_key: IdempotencyKey,
        now: DateTime<Utc>,
    ) -> Self {
        Self::base(
            TransactionKind::Deposit,
            AccountOwner::User(user),
            None,
            currency,
            quote.amount,
            quote.commission,
            quote.amount,
            idempotency_key,
            commission,
            now,
        )
    }

    /// Pending withdrawal whose amount has already been reserved
    pub(crate) fn withdrawal(
        user: UserId,
        currency: Currency,
        amount: Decimal,
        commission: CommissionSnapshot,
        idempotency_key: IdempotencyKey,
        now: DateTime<Utc>,
    ) -> Self {
        Self::base(
            TransactionKind::Withdrawal,
            AccountOwner::User(user),
            None,
            currency,
            amount,
            Decimal::ZERO,
            amount,
            idempotency_key,
            commission,
            now,
        )
    }

    pub(crate) fn transfer_out(
        from: UserId,
        to: UserId,
        currency: Currency,
        quote: &TransferQuote,
        commission: CommissionSnapshot,
        idempotency_key: IdempotencyKey,
        now: DateTime<Utc>,
    ) -> Self {
        Self::base(
            TransactionKind::TransferOut,
            AccountOwner::User(from),
            Some(to),
            currency,
            quote.amount,
            quote.commission,
            quote.net_to_recipient,
            idempotency_key,
            commission,
            now,
        )
        .settled(now)
    }

    pub(crate) fn transfer_in(out: &Transaction, to: UserId, now: DateTime<Utc>) -> Self {
        let mut tx = Self::base(
            TransactionKind::TransferIn,
            AccountOwner::User(to),
            out.owner.user().cloned(),
            out.currency,
            out.net_amount,
            Decimal::ZERO,
            out.net_amount,
            out.idempotency_key.derive("in"),
            out.commission.clone(),
            now,
        )
        .settled(now);
        tx.related = Some(out.id);
        tx
    }

    /// Platform-side record of commission charged on `source`
    pub(crate) fn commission_earning(source: &Transaction, now: DateTime<Utc>) -> Self {
        let mut tx = Self::base(
            TransactionKind::CommissionEarning,
            AccountOwner::Platform,
            source.owner.user().cloned(),
            source.currency,
            source.commission_amount,
            Decimal::ZERO,
            source.commission_amount,
            source.idempotency_key.derive("commission"),
            source.commission.clone(),
            now,
        )
        .settled(now);
        tx.related = Some(source.id);
        tx
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn owner(&self) -> &AccountOwner {
        &self.owner
    }

    pub fn account_key(&self) -> AccountKey {
        AccountKey {
            currency: self.currency,
            owner: self.owner.clone(),
        }
    }

    pub fn counterparty(&self) -> Option<&UserId> {
        self.counterparty.as_ref()
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn gross_amount(&self) -> Decimal {
        self.gross_amount
    }

    pub fn commission_amount(&self) -> Decimal {
        self.commission_amount
    }

    pub fn net_amount(&self) -> Decimal {
        self.net_amount
    }

    /// What the user pays the gateway: deposits carry their commission on top
    pub fn total_payable(&self) -> Decimal {
        match self.kind {
            TransactionKind::Deposit => self.gross_amount + self.commission_amount,
            _ => self.gross_amount,
        }
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn external_reference(&self) -> Option<&ExternalRef> {
        self.external_reference.as_ref()
    }

    pub fn idempotency_key(&self) -> &IdempotencyKey {
        &self.idempotency_key
    }

    pub fn commission(&self) -> &CommissionSnapshot {
        &self.commission
    }

    pub fn related(&self) -> Option<TransactionId> {
        self.related
    }

    pub fn confirmations(&self) -> u32 {
        self.confirmations
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn settled_at(&self) -> Option<DateTime<Utc>> {
        self.settled_at
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    // ========================================================================
    // STATE CHANGES
    // ========================================================================

    pub(crate) fn transition(
        &mut self,
        next: TransactionStatus,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        if next == TransactionStatus::Completed {
            self.settled_at = Some(now);
        }
        Ok(())
    }

    pub(crate) fn set_external_reference(&mut self, reference: ExternalRef) {
        self.external_reference = Some(reference);
    }

    pub(crate) fn set_confirmations(&mut self, confirmations: u32) {
        self.confirmations = self.confirmations.max(confirmations);
    }

    pub(crate) fn set_failure_reason(&mut self, reason: &str) {
        self.failure_reason = Some(reason.to_string());
    }
}

// ============================================================================
// WALLET ACCOUNT
// ============================================================================

/// Balance of one owner in one currency
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAccount {
    key: AccountKey,
    #[serde(with = "rust_decimal::serde::str")]
    balance: Decimal,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WalletAccount {
    /// Zero-balance account, as it exists before its first credit
    pub fn new(key: AccountKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            balance: Decimal::ZERO,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> &AccountKey {
        &self.key
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    /// Incremented on every committed balance change
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Apply a signed delta; refuses to go below zero and returns the balance it had
    pub(crate) fn apply(&mut self, delta: Decimal, now: DateTime<Utc>) -> Result<(), Decimal> {
        let next = self.balance + delta;
        if next < Decimal::ZERO {
            return Err(self.balance);
        }
        self.balance = next;
        self.version += 1;
        self.updated_at = now;
        Ok(())
    }
}
